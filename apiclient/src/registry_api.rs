// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Typed calls against the registry's internal API.
//!
//! The error enums encode the worker's decision table: `NotFound` means the
//! queue item is an orphan and gets dropped, `AlreadyCompleted` is treated
//! as success so a delivery is confirmed at most once, everything transient
//! goes back on the queue.

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use relaycommon::{
    endpoint_paths::{ENDPOINT_INTERNAL_DELIVER, ENDPOINT_INTERNAL_REGISTER},
    identifiers::MessageId,
    messages::{
        DeliverMessageRequest, DeliverMessageResponse, RegisterMessageRequest,
        RegisterMessageResponse, UpdateStatusRequest, UpdateStatusResponse,
    },
};

use crate::ApiClient;

#[derive(Debug, Error)]
pub enum RegisterError {
    /// The registry already holds a row for this message id.
    #[error("message already registered")]
    AlreadyRegistered,
    /// Anything the caller may retry against a fresh message id.
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum DeliverError {
    /// Orphan queue item: the registry has no such message.
    #[error("message not found")]
    NotFound,
    /// The message is already in a terminal state.
    #[error("message already completed")]
    AlreadyCompleted,
    /// Network failure, 5xx or timeout; the attempt may be retried.
    #[error("transient delivery failure: {0}")]
    Transient(String),
}

#[derive(Debug, Error)]
pub enum UpdateStatusError {
    #[error("message not found")]
    NotFound,
    /// The registry holds a higher attempt count than the requested one.
    #[error("attempt count conflict")]
    Conflict,
    #[error("transient update failure: {0}")]
    Transient(String),
}

/// The registry operations the gateway and worker depend on. A trait so
/// tests can exercise both without a live registry.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    async fn register_message(
        &self,
        request: &RegisterMessageRequest,
    ) -> Result<RegisterMessageResponse, RegisterError>;

    async fn deliver_message(
        &self,
        request: &DeliverMessageRequest,
    ) -> Result<DeliverMessageResponse, DeliverError>;

    async fn update_status(
        &self,
        message_id: MessageId,
        request: &UpdateStatusRequest,
    ) -> Result<UpdateStatusResponse, UpdateStatusError>;
}

#[async_trait]
impl RegistryApi for ApiClient {
    async fn register_message(
        &self,
        request: &RegisterMessageRequest,
    ) -> Result<RegisterMessageResponse, RegisterError> {
        let url = self.build_url(ENDPOINT_INTERNAL_REGISTER);
        let response = self
            .client()
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| RegisterError::Unavailable(e.to_string()))?;
        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|e| RegisterError::Unavailable(e.to_string())),
            StatusCode::CONFLICT => Err(RegisterError::AlreadyRegistered),
            status => Err(RegisterError::Unavailable(format!(
                "registry answered {status}"
            ))),
        }
    }

    async fn deliver_message(
        &self,
        request: &DeliverMessageRequest,
    ) -> Result<DeliverMessageResponse, DeliverError> {
        let url = self.build_url(ENDPOINT_INTERNAL_DELIVER);
        let response = self
            .client()
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| DeliverError::Transient(e.to_string()))?;
        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|e| DeliverError::Transient(e.to_string())),
            StatusCode::NOT_FOUND => Err(DeliverError::NotFound),
            StatusCode::CONFLICT => Err(DeliverError::AlreadyCompleted),
            status => Err(DeliverError::Transient(format!(
                "registry answered {status}"
            ))),
        }
    }

    async fn update_status(
        &self,
        message_id: MessageId,
        request: &UpdateStatusRequest,
    ) -> Result<UpdateStatusResponse, UpdateStatusError> {
        let url = self.build_url(&format!("/internal/messages/{message_id}/status"));
        let response = self
            .client()
            .put(url)
            .json(request)
            .send()
            .await
            .map_err(|e| UpdateStatusError::Transient(e.to_string()))?;
        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|e| UpdateStatusError::Transient(e.to_string())),
            StatusCode::NOT_FOUND => Err(UpdateStatusError::NotFound),
            StatusCode::CONFLICT => Err(UpdateStatusError::Conflict),
            status => Err(UpdateStatusError::Transient(format!(
                "registry answered {status}"
            ))),
        }
    }
}
