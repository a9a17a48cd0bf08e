// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

pub(crate) mod admin;
pub(crate) mod internal;
pub(crate) mod portal;

pub use internal::InternalApiPolicy;

use actix_web::{web::Data, HttpResponse, Responder};
use tracing::error;

use relaybackend::{
    errors::{IdentityError, RegistryError},
    queue::WorkQueue,
    registry::MessageRegistry,
};
use relaycommon::messages::{ErrorBody, HealthReport};

use crate::metrics::ServerMetrics;

/// Health probe: the store, the queue and the key material must all be
/// usable for the registry to count as healthy.
pub(crate) async fn health_check(
    registry: Data<MessageRegistry>,
    queue: Data<dyn WorkQueue>,
) -> impl Responder {
    let report = HealthReport::from_components(vec![
        ("database".to_owned(), registry.healthy().await),
        ("queue".to_owned(), queue.healthy().await),
        ("encryption_keys".to_owned(), registry.keys_loaded()),
    ]);
    if report.is_healthy() {
        HttpResponse::Ok().json(report)
    } else {
        HttpResponse::ServiceUnavailable().json(report)
    }
}

pub(crate) async fn metrics_endpoint(metrics: Data<ServerMetrics>) -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics.encode())
}

pub(crate) fn registry_error_response(error: RegistryError) -> HttpResponse {
    match error {
        RegistryError::NotFound => {
            HttpResponse::NotFound().json(ErrorBody::new("not_found", "message not found"))
        }
        RegistryError::AlreadyRegistered => HttpResponse::Conflict().json(ErrorBody::new(
            "already_registered",
            "a message with this id already exists",
        )),
        RegistryError::InvalidTransition { current } => HttpResponse::Conflict().json(
            ErrorBody::new("invalid_transition", format!("message is already {current}")),
        ),
        RegistryError::AttemptCountRegression { stored, requested } => {
            HttpResponse::Conflict().json(ErrorBody::new(
                "attempt_count_conflict",
                format!("stored attempt count {stored} exceeds requested {requested}"),
            ))
        }
        RegistryError::Crypto(e) => {
            error!(error = %e, "crypto failure in registry operation");
            HttpResponse::InternalServerError()
                .json(ErrorBody::new("internal_error", "internal error"))
        }
        RegistryError::Storage(e) => {
            error!(error = %e, "storage failure in registry operation");
            HttpResponse::InternalServerError()
                .json(ErrorBody::new("internal_error", "internal error"))
        }
    }
}

pub(crate) fn identity_error_response(error: IdentityError) -> HttpResponse {
    match error {
        IdentityError::ClientExists => HttpResponse::Conflict().json(ErrorBody::new(
            "client_exists",
            "an active identity already exists for this client",
        )),
        IdentityError::ClientNotFound => {
            HttpResponse::NotFound().json(ErrorBody::new("not_found", "client not found"))
        }
        IdentityError::AlreadyRevoked => HttpResponse::Conflict().json(ErrorBody::new(
            "already_revoked",
            "client is already revoked",
        )),
        IdentityError::OperatorExists => HttpResponse::Conflict().json(ErrorBody::new(
            "operator_exists",
            "an operator with this email already exists",
        )),
        IdentityError::OperatorNotFound => {
            HttpResponse::NotFound().json(ErrorBody::new("not_found", "operator not found"))
        }
        IdentityError::AuthFailed => HttpResponse::Unauthorized()
            .json(ErrorBody::new("unauthorized", "authentication failed")),
        IdentityError::SelfStatusChange => HttpResponse::Forbidden().json(ErrorBody::new(
            "forbidden",
            "operators cannot change their own status",
        )),
        IdentityError::WeakPassword => HttpResponse::BadRequest().json(ErrorBody::new(
            "weak_password",
            "password must be at least 8 characters",
        )),
        IdentityError::InvalidResetToken => HttpResponse::BadRequest().json(ErrorBody::new(
            "invalid_token",
            "reset token is invalid, expired or already used",
        )),
        IdentityError::Crypto(e) => {
            error!(error = %e, "crypto failure in identity operation");
            HttpResponse::InternalServerError()
                .json(ErrorBody::new("internal_error", "internal error"))
        }
        IdentityError::Storage(e) => {
            error!(error = %e, "storage failure in identity operation");
            HttpResponse::InternalServerError()
                .json(ErrorBody::new("internal_error", "internal error"))
        }
    }
}

pub(crate) fn forbidden(message: &str) -> HttpResponse {
    HttpResponse::Forbidden().json(ErrorBody::new("forbidden", message))
}

pub(crate) fn source_address(req: &actix_web::HttpRequest) -> Option<String> {
    req.peer_addr().map(|addr| addr.ip().to_string())
}
