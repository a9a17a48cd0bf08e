// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Internal confirmation API used by the gateway and the workers.
//!
//! Authentication is transport-level: the listener demands a certificate
//! from the broker CA, and these handlers additionally pin the peer CN to
//! the configured service allowlist.

use actix_web::{
    web::{self, Data},
    HttpRequest, HttpResponse, Responder,
};
use tracing::warn;

use relaybackend::registry::MessageRegistry;
use relaycommon::{
    identifiers::MessageId,
    messages::{DeliverMessageRequest, ErrorBody, RegisterMessageRequest, UpdateStatusRequest, UpdateStatusResponse},
    status::MessageStatus,
};

use crate::{
    connect_info::TlsPeer,
    endpoints::registry_error_response,
    metrics::{failure_reason_label, ServerMetrics},
};

/// Which peers may call the internal API.
#[derive(Debug, Clone)]
pub struct InternalApiPolicy {
    /// Whether the listener terminates mTLS. Without TLS (local runs) the
    /// check degrades to allow-all.
    pub mtls_enabled: bool,
    /// Accepted service CNs; empty admits any certificate from the CA.
    pub allowed_cns: Vec<String>,
}

impl InternalApiPolicy {
    fn admit(&self, peer: Option<&TlsPeer>) -> Result<(), HttpResponse> {
        if !self.mtls_enabled {
            return Ok(());
        }
        let Some(TlsPeer(identity)) = peer else {
            return Err(HttpResponse::Unauthorized()
                .json(ErrorBody::new("unauthorized", "peer certificate required")));
        };
        if !self.allowed_cns.is_empty()
            && !self.allowed_cns.iter().any(|cn| cn == &identity.common_name)
        {
            warn!(cn = %identity.common_name, "peer not on internal API allowlist");
            return Err(HttpResponse::Forbidden()
                .json(ErrorBody::new("forbidden", "peer not allowed on internal API")));
        }
        Ok(())
    }
}

pub(crate) async fn register_message(
    req: HttpRequest,
    policy: Data<InternalApiPolicy>,
    registry: Data<MessageRegistry>,
    metrics: Data<ServerMetrics>,
    payload: web::Json<RegisterMessageRequest>,
) -> impl Responder {
    if let Err(response) = policy.admit(req.conn_data::<TlsPeer>()) {
        return response;
    }
    let request = payload.into_inner();
    match registry.register(&request).await {
        Ok(response) => {
            metrics.message_registered(request.client_id.as_str());
            HttpResponse::Ok().json(response)
        }
        Err(e) => registry_error_response(e),
    }
}

pub(crate) async fn deliver_message(
    req: HttpRequest,
    policy: Data<InternalApiPolicy>,
    registry: Data<MessageRegistry>,
    metrics: Data<ServerMetrics>,
    payload: web::Json<DeliverMessageRequest>,
) -> impl Responder {
    if let Err(response) = policy.admit(req.conn_data::<TlsPeer>()) {
        return response;
    }
    let request = payload.into_inner();
    match registry.deliver(request.message_id, &request.worker_id).await {
        Ok(delivered) => {
            metrics.message_delivered(delivered.client_id.as_str());
            HttpResponse::Ok().json(delivered.response)
        }
        Err(e) => registry_error_response(e),
    }
}

pub(crate) async fn update_status(
    req: HttpRequest,
    policy: Data<InternalApiPolicy>,
    registry: Data<MessageRegistry>,
    metrics: Data<ServerMetrics>,
    path: web::Path<uuid::Uuid>,
    payload: web::Json<UpdateStatusRequest>,
) -> impl Responder {
    if let Err(response) = policy.admit(req.conn_data::<TlsPeer>()) {
        return response;
    }
    let message_id = MessageId::from_uuid(path.into_inner());
    let request = payload.into_inner();
    match registry
        .update_status(
            message_id,
            request.status,
            request.attempt_count,
            request.error_message.as_deref(),
        )
        .await
    {
        Ok(record) => {
            if record.status == MessageStatus::Failed {
                metrics.message_failed(
                    record.client_id.as_str(),
                    failure_reason_label(record.error_message.as_deref()),
                );
            }
            HttpResponse::Ok().json(UpdateStatusResponse {
                message_id,
                status: record.status,
                attempt_count: record.attempt_count,
            })
        }
        Err(e) => registry_error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use relaybackend::tls::PeerIdentity;

    use super::*;

    fn peer(cn: &str) -> TlsPeer {
        TlsPeer(PeerIdentity {
            common_name: cn.to_owned(),
            fingerprint: "ab".repeat(32),
        })
    }

    #[test]
    fn plaintext_listener_admits_everyone() {
        let policy = InternalApiPolicy {
            mtls_enabled: false,
            allowed_cns: vec![],
        };
        assert!(policy.admit(None).is_ok());
    }

    #[test]
    fn mtls_listener_requires_a_peer_certificate() {
        let policy = InternalApiPolicy {
            mtls_enabled: true,
            allowed_cns: vec![],
        };
        assert!(policy.admit(None).is_err());
        assert!(policy.admit(Some(&peer("message-worker"))).is_ok());
    }

    #[test]
    fn allowlist_pins_service_cns() {
        let policy = InternalApiPolicy {
            mtls_enabled: true,
            allowed_cns: vec!["message-proxy".into(), "message-worker".into()],
        };
        assert!(policy.admit(Some(&peer("message-worker"))).is_ok());
        assert!(policy.admit(Some(&peer("client_alpha"))).is_err());
    }
}
