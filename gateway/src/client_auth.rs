// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Mapping a connection to a client identity.

use actix_web::HttpRequest;

use relaycommon::identifiers::ClientId;

use crate::connect_info::TlsPeer;

/// Header consulted only when `gateway.trusted_header_auth` is enabled.
pub const CLIENT_ID_HEADER: &str = "X-Client-ID";

/// How the caller's identity was established.
#[derive(Debug, Clone)]
pub enum ClientAuth {
    /// CN and fingerprint of the peer certificate presented during the TLS
    /// handshake.
    PeerCertificate {
        client_id: ClientId,
        fingerprint: String,
    },
    /// Development shortcut; every use lands in the audit trail.
    TrustedHeader(ClientId),
}

impl ClientAuth {
    pub fn client_id(&self) -> &ClientId {
        match self {
            ClientAuth::PeerCertificate { client_id, .. } => client_id,
            ClientAuth::TrustedHeader(client_id) => client_id,
        }
    }

    /// The presented certificate's fingerprint, absent on header auth.
    pub fn certificate_fingerprint(&self) -> Option<&str> {
        match self {
            ClientAuth::PeerCertificate { fingerprint, .. } => Some(fingerprint),
            ClientAuth::TrustedHeader(_) => None,
        }
    }

    pub fn via_trusted_header(&self) -> bool {
        matches!(self, ClientAuth::TrustedHeader(_))
    }
}

/// Resolve the submitting client. The peer certificate always wins; the
/// trusted header is consulted only when explicitly enabled.
pub fn resolve_client(
    req: &HttpRequest,
    trusted_header_auth: bool,
) -> Result<ClientAuth, &'static str> {
    if let Some(TlsPeer(identity)) = req.conn_data::<TlsPeer>() {
        let client_id = identity
            .common_name
            .parse()
            .map_err(|_| "certificate common name is not a usable client id")?;
        return Ok(ClientAuth::PeerCertificate {
            client_id,
            fingerprint: identity.fingerprint.clone(),
        });
    }
    if trusted_header_auth {
        if let Some(raw) = req
            .headers()
            .get(CLIENT_ID_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            let client_id = raw
                .parse()
                .map_err(|_| "client id header is not a usable client id")?;
            return Ok(ClientAuth::TrustedHeader(client_id));
        }
    }
    Err("peer certificate required")
}

#[cfg(test)]
mod tests {
    use actix_web::test::TestRequest;

    use super::*;

    #[test]
    fn header_is_ignored_unless_enabled() {
        let req = TestRequest::default()
            .insert_header((CLIENT_ID_HEADER, "client_alpha"))
            .to_http_request();
        assert!(resolve_client(&req, false).is_err());

        let auth = resolve_client(&req, true).unwrap();
        assert!(auth.via_trusted_header());
        assert_eq!(auth.client_id().as_str(), "client_alpha");
        assert!(auth.certificate_fingerprint().is_none());
    }

    #[test]
    fn no_identity_no_access() {
        let req = TestRequest::default().to_http_request();
        assert!(resolve_client(&req, true).is_err());
        assert!(resolve_client(&req, false).is_err());
    }

    #[test]
    fn blank_header_value_is_rejected() {
        let req = TestRequest::default()
            .insert_header((CLIENT_ID_HEADER, "   "))
            .to_http_request();
        assert!(resolve_client(&req, true).is_err());
    }

    #[test]
    fn certificate_auth_exposes_the_fingerprint() {
        let auth = ClientAuth::PeerCertificate {
            client_id: "client_alpha".parse().unwrap(),
            fingerprint: "ab".repeat(32),
        };
        assert!(!auth.via_trusted_header());
        assert_eq!(auth.certificate_fingerprint(), Some("ab".repeat(32).as_str()));
    }
}
