// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Administrative endpoints: operators, client certificates, statistics and
//! data retention.

use actix_web::{
    web::{self, Data},
    HttpResponse, Responder,
};
use chrono::Utc;
use tracing::error;

use relaybackend::{
    identity::IdentityService,
    registry::{AuditEntry, AuditEvent, MessageRegistry},
};
use relaycommon::{
    identifiers::{ClientId, MessageId},
    messages::ErrorBody,
    portal::{
        ChangePasswordRequest, CreateOperatorRequest, ExpiringQuery, MessageBodyResponse,
        RegisterClientRequest, RetentionRequest, RetentionResponse, RevokeClientRequest,
        UpdateActiveRequest, UpdateRoleRequest,
    },
    status::AuditSeverity,
};

use crate::{
    auth_extractor::AuthedOperator,
    endpoints::{forbidden, identity_error_response, registry_error_response},
    metrics::ServerMetrics,
};

async fn record_audit(registry: &MessageRegistry, entry: AuditEntry) {
    if let Err(e) = registry.record_audit(entry).await {
        error!(error = %e, "failed to record audit entry");
    }
}

// Operators

pub(crate) async fn create_operator(
    caller: AuthedOperator,
    identity: Data<IdentityService>,
    registry: Data<MessageRegistry>,
    payload: web::Json<CreateOperatorRequest>,
) -> impl Responder {
    if !caller.0.role.may_manage_operators() {
        return forbidden("operator management requires a manager role");
    }
    let request = payload.into_inner();
    match identity
        .create_operator(
            &request.email,
            &request.password,
            request.role,
            request.client_id.as_ref(),
        )
        .await
    {
        Ok(record) => {
            record_audit(
                &registry,
                AuditEntry::new(AuditEvent::OperatorCreated, AuditSeverity::Info)
                    .with_operator(caller.0.uid)
                    .with_details(serde_json::json!({
                        "created": record.email,
                        "role": record.role,
                    })),
            )
            .await;
            HttpResponse::Created().json(record.profile())
        }
        Err(e) => identity_error_response(e),
    }
}

pub(crate) async fn update_operator_role(
    caller: AuthedOperator,
    identity: Data<IdentityService>,
    registry: Data<MessageRegistry>,
    path: web::Path<i64>,
    payload: web::Json<UpdateRoleRequest>,
) -> impl Responder {
    if !caller.0.role.is_admin() {
        return forbidden("role changes require admin");
    }
    let operator_id = path.into_inner();
    match identity
        .update_operator_role(operator_id, payload.role)
        .await
    {
        Ok(()) => {
            record_audit(
                &registry,
                AuditEntry::new(AuditEvent::OperatorRoleChanged, AuditSeverity::Info)
                    .with_operator(caller.0.uid)
                    .with_details(serde_json::json!({
                        "operator_id": operator_id,
                        "role": payload.role,
                    })),
            )
            .await;
            HttpResponse::Ok().json(serde_json::json!({ "status": "updated" }))
        }
        Err(e) => identity_error_response(e),
    }
}

pub(crate) async fn update_operator_status(
    caller: AuthedOperator,
    identity: Data<IdentityService>,
    registry: Data<MessageRegistry>,
    path: web::Path<i64>,
    payload: web::Json<UpdateActiveRequest>,
) -> impl Responder {
    if !caller.0.role.may_manage_operators() {
        return forbidden("operator management requires a manager role");
    }
    let operator_id = path.into_inner();
    match identity
        .update_operator_status(caller.0.uid, operator_id, payload.is_active)
        .await
    {
        Ok(()) => {
            record_audit(
                &registry,
                AuditEntry::new(AuditEvent::OperatorStatusChanged, AuditSeverity::Info)
                    .with_operator(caller.0.uid)
                    .with_details(serde_json::json!({
                        "operator_id": operator_id,
                        "is_active": payload.is_active,
                    })),
            )
            .await;
            HttpResponse::Ok().json(serde_json::json!({ "status": "updated" }))
        }
        Err(e) => identity_error_response(e),
    }
}

pub(crate) async fn change_operator_password(
    caller: AuthedOperator,
    identity: Data<IdentityService>,
    registry: Data<MessageRegistry>,
    path: web::Path<i64>,
    payload: web::Json<ChangePasswordRequest>,
) -> impl Responder {
    if !caller.0.role.may_manage_operators() {
        return forbidden("operator management requires a manager role");
    }
    let operator_id = path.into_inner();
    match identity
        .change_password(operator_id, &payload.new_password)
        .await
    {
        Ok(()) => {
            record_audit(
                &registry,
                AuditEntry::new(AuditEvent::PasswordChanged, AuditSeverity::Info)
                    .with_operator(caller.0.uid)
                    .with_details(serde_json::json!({ "operator_id": operator_id })),
            )
            .await;
            HttpResponse::Ok().json(serde_json::json!({ "status": "updated" }))
        }
        Err(e) => identity_error_response(e),
    }
}

// Client certificates

pub(crate) async fn register_client(
    caller: AuthedOperator,
    identity: Data<IdentityService>,
    registry: Data<MessageRegistry>,
    metrics: Data<ServerMetrics>,
    payload: web::Json<RegisterClientRequest>,
) -> impl Responder {
    if !caller.0.role.is_admin() {
        return forbidden("certificate management requires admin");
    }
    let request = payload.into_inner();
    match identity
        .register_client(
            request.client_id.clone(),
            request.cert_fingerprint,
            request.domain,
            request.issued_at,
            request.expires_at,
        )
        .await
    {
        Ok(record) => {
            metrics.certificate_issued();
            record_audit(
                &registry,
                AuditEntry::new(AuditEvent::ClientRegistered, AuditSeverity::Info)
                    .with_operator(caller.0.uid)
                    .with_client(record.client_id.clone())
                    .with_details(serde_json::json!({
                        "expires_at": record.expires_at,
                    })),
            )
            .await;
            HttpResponse::Created().json(record.into_info(Utc::now()))
        }
        Err(e) => identity_error_response(e),
    }
}

pub(crate) async fn revoke_client(
    caller: AuthedOperator,
    identity: Data<IdentityService>,
    registry: Data<MessageRegistry>,
    metrics: Data<ServerMetrics>,
    path: web::Path<String>,
    payload: web::Json<RevokeClientRequest>,
) -> impl Responder {
    if !caller.0.role.is_admin() {
        return forbidden("certificate management requires admin");
    }
    let client_id: ClientId = match path.into_inner().parse() {
        Ok(client_id) => client_id,
        Err(e) => {
            return HttpResponse::BadRequest().json(ErrorBody::new("bad_request", e.to_string()))
        }
    };
    let request = payload.into_inner();
    match identity.revoke_client(&client_id, &request.reason).await {
        Ok(record) => {
            metrics.certificate_revoked();
            record_audit(
                &registry,
                AuditEntry::new(AuditEvent::ClientRevoked, AuditSeverity::Warning)
                    .with_operator(caller.0.uid)
                    .with_client(client_id)
                    .with_details(serde_json::json!({ "reason": request.reason })),
            )
            .await;
            HttpResponse::Ok().json(record.into_info(Utc::now()))
        }
        Err(e) => identity_error_response(e),
    }
}

pub(crate) async fn list_clients(
    caller: AuthedOperator,
    identity: Data<IdentityService>,
) -> impl Responder {
    if !caller.0.role.is_admin() {
        return forbidden("certificate management requires admin");
    }
    match identity.list_clients().await {
        Ok(records) => {
            let now = Utc::now();
            let infos: Vec<_> = records
                .into_iter()
                .map(|record| record.into_info(now))
                .collect();
            HttpResponse::Ok().json(infos)
        }
        Err(e) => identity_error_response(e),
    }
}

pub(crate) async fn list_expiring_clients(
    caller: AuthedOperator,
    identity: Data<IdentityService>,
    query: web::Query<ExpiringQuery>,
) -> impl Responder {
    if !caller.0.role.is_admin() {
        return forbidden("certificate management requires admin");
    }
    match identity.list_expiring(query.within_days as i32).await {
        Ok(records) => {
            let now = Utc::now();
            let infos: Vec<_> = records
                .into_iter()
                .map(|record| record.into_info(now))
                .collect();
            HttpResponse::Ok().json(infos)
        }
        Err(e) => identity_error_response(e),
    }
}

// Statistics, retention and body access

pub(crate) async fn stats(
    caller: AuthedOperator,
    registry: Data<MessageRegistry>,
) -> impl Responder {
    if !caller.0.role.is_admin() {
        return forbidden("statistics require admin");
    }
    match registry.stats().await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => registry_error_response(e),
    }
}

pub(crate) async fn retention_cleanup(
    caller: AuthedOperator,
    registry: Data<MessageRegistry>,
    payload: web::Json<RetentionRequest>,
) -> impl Responder {
    if !caller.0.role.is_admin() {
        return forbidden("retention requires admin");
    }
    if payload.older_than_days < 1 {
        return HttpResponse::BadRequest().json(ErrorBody::new(
            "bad_request",
            "older_than_days must be at least 1",
        ));
    }
    match registry
        .cleanup_delivered(payload.older_than_days as i32)
        .await
    {
        Ok(deleted) => HttpResponse::Ok().json(RetentionResponse { deleted }),
        Err(e) => registry_error_response(e),
    }
}

/// Decrypt one message body. Admin only; every access is audit logged.
pub(crate) async fn message_body(
    caller: AuthedOperator,
    registry: Data<MessageRegistry>,
    path: web::Path<uuid::Uuid>,
) -> impl Responder {
    if !caller.0.role.is_admin() {
        return forbidden("body access requires admin");
    }
    let message_id = MessageId::from_uuid(path.into_inner());
    match registry.decrypt_body(message_id).await {
        Ok(message_body) => {
            record_audit(
                &registry,
                AuditEntry::new(AuditEvent::MessageBodyDecrypted, AuditSeverity::Info)
                    .with_operator(caller.0.uid)
                    .with_details(serde_json::json!({ "message_id": message_id })),
            )
            .await;
            HttpResponse::Ok().json(MessageBodyResponse {
                message_id,
                message_body,
            })
        }
        Err(e) => registry_error_response(e),
    }
}
