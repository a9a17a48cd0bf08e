// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! API client for the relay registry's internal endpoints.

use std::{path::PathBuf, time::Duration};

use reqwest::{Client, ClientBuilder};
use thiserror::Error;

pub mod registry_api;

pub use registry_api::{DeliverError, RegisterError, RegistryApi, UpdateStatusError};

const OVERALL_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport options for reaching the registry. The identity bundle is the
/// PEM concatenation of the service certificate and its key, issued by the
/// same CA as client certificates but assigned to a proxy/worker identity.
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    pub verify_tls: bool,
    pub ca_cert: Option<PathBuf>,
    pub client_identity: Option<PathBuf>,
}

#[derive(Error, Debug)]
pub enum ApiClientInitError {
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ApiClient is a wrapper around a reqwest client.
// It exposes a single function for each internal API endpoint.
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Creates a new API client that connects to the given base URL,
    /// presenting the configured client identity over mTLS.
    pub fn initialize(
        base_url: impl Into<String>,
        options: &TransportOptions,
    ) -> Result<Self, ApiClientInitError> {
        let mut builder = ClientBuilder::new()
            .user_agent("RelayClient/0.1")
            .timeout(OVERALL_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .use_rustls_tls();
        if let Some(ca_cert) = &options.ca_cert {
            let pem = std::fs::read(ca_cert)?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }
        if let Some(identity) = &options.client_identity {
            let pem = std::fs::read(identity)?;
            builder = builder.identity(reqwest::Identity::from_pem(&pem)?);
        }
        if !options.verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Builds a URL for a given endpoint.
    fn build_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), endpoint)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_building_tolerates_trailing_slashes() {
        let options = TransportOptions {
            verify_tls: true,
            ..Default::default()
        };
        let client = ApiClient::initialize("https://registry:8443/", &options).unwrap();
        assert_eq!(
            client.build_url("/internal/messages/register"),
            "https://registry:8443/internal/messages/register"
        );
    }
}
