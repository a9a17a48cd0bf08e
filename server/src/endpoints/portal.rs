// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Operator-facing portal: authentication and role-scoped message views.

use actix_web::{
    web::{self, Data},
    HttpRequest, HttpResponse, Responder,
};
use tracing::error;

use relaybackend::{
    auth::TokenIssuer,
    errors::IdentityError,
    identity::IdentityService,
    registry::{AuditEntry, AuditEvent, MessageRegistry},
};
use relaycommon::{
    messages::ErrorBody,
    portal::{
        ForgotPasswordRequest, LoginRequest, MessageListQuery, MessageListResponse,
        RefreshRequest, ResetPasswordRequest, TokenResponse,
    },
    status::{AuditSeverity, UserRole},
};

use crate::{
    auth_extractor::AuthedOperator,
    endpoints::{forbidden, identity_error_response, source_address},
};

pub(crate) async fn login(
    req: HttpRequest,
    identity: Data<IdentityService>,
    registry: Data<MessageRegistry>,
    issuer: Data<TokenIssuer>,
    payload: web::Json<LoginRequest>,
) -> impl Responder {
    let source = source_address(&req);
    match identity.authenticate(&payload.email, &payload.password).await {
        Ok(operator) => {
            let mut entry = AuditEntry::new(AuditEvent::LoginSuccess, AuditSeverity::Info)
                .with_operator(operator.id);
            if let Some(source) = source {
                entry = entry.with_source(source);
            }
            if let Err(e) = registry.record_audit(entry).await {
                error!(error = %e, "failed to record login audit entry");
            }
            match issuer.issue_pair(&operator) {
                Ok(tokens) => HttpResponse::Ok().json(tokens),
                Err(e) => {
                    error!(error = %e, "failed to issue tokens");
                    HttpResponse::InternalServerError()
                        .json(ErrorBody::new("internal_error", "internal error"))
                }
            }
        }
        Err(IdentityError::AuthFailed) => {
            let mut entry = AuditEntry::new(AuditEvent::LoginFailed, AuditSeverity::Warning)
                .with_details(serde_json::json!({ "email": payload.email.clone() }));
            if let Some(source) = source {
                entry = entry.with_source(source);
            }
            if let Err(e) = registry.record_audit(entry).await {
                error!(error = %e, "failed to record login audit entry");
            }
            HttpResponse::Unauthorized()
                .json(ErrorBody::new("unauthorized", "authentication failed"))
        }
        Err(e) => identity_error_response(e),
    }
}

pub(crate) async fn refresh(
    issuer: Data<TokenIssuer>,
    payload: web::Json<RefreshRequest>,
) -> impl Responder {
    match issuer.refresh_access(&payload.refresh_token) {
        Ok(access_token) => HttpResponse::Ok().json(TokenResponse {
            access_token,
            refresh_token: payload.refresh_token.clone(),
            token_type: "bearer".to_owned(),
            expires_in: issuer.access_ttl_secs(),
        }),
        Err(e) => HttpResponse::Unauthorized().json(ErrorBody::new("unauthorized", e.to_string())),
    }
}

/// Always answers 200 so callers cannot probe which emails exist.
pub(crate) async fn forgot_password(
    req: HttpRequest,
    identity: Data<IdentityService>,
    registry: Data<MessageRegistry>,
    payload: web::Json<ForgotPasswordRequest>,
) -> impl Responder {
    match identity.issue_reset_ticket(&payload.email).await {
        Ok(ticket) => {
            if let Some(ticket) = ticket {
                let mut entry =
                    AuditEntry::new(AuditEvent::PasswordResetRequested, AuditSeverity::Info)
                        .with_operator(ticket.user_id);
                if let Some(source) = source_address(&req) {
                    entry = entry.with_source(source);
                }
                if let Err(e) = registry.record_audit(entry).await {
                    error!(error = %e, "failed to record reset audit entry");
                }
            }
            HttpResponse::Ok().json(serde_json::json!({
                "message": "If the account exists, a reset email has been sent."
            }))
        }
        Err(e) => identity_error_response(e),
    }
}

pub(crate) async fn reset_password(
    req: HttpRequest,
    identity: Data<IdentityService>,
    registry: Data<MessageRegistry>,
    payload: web::Json<ResetPasswordRequest>,
) -> impl Responder {
    match identity
        .redeem_reset_ticket(&payload.token, &payload.new_password)
        .await
    {
        Ok(()) => {
            let mut entry =
                AuditEntry::new(AuditEvent::PasswordResetCompleted, AuditSeverity::Info);
            if let Some(source) = source_address(&req) {
                entry = entry.with_source(source);
            }
            if let Err(e) = registry.record_audit(entry).await {
                error!(error = %e, "failed to record reset audit entry");
            }
            HttpResponse::Ok().json(serde_json::json!({ "message": "password updated" }))
        }
        Err(e) => identity_error_response(e),
    }
}

/// Role-scoped message listing: admins see everything, users see their
/// bound client, unbound users see nothing, managers have no message view.
pub(crate) async fn list_messages(
    operator: AuthedOperator,
    registry: Data<MessageRegistry>,
    query: web::Query<MessageListQuery>,
) -> impl Responder {
    let claims = operator.0;
    let scope = match claims.role {
        UserRole::Admin => None,
        UserRole::UserManager => return forbidden("managers have no access to messages"),
        UserRole::User => match claims.client_id {
            Some(client_id) => Some(client_id),
            None => {
                return HttpResponse::Ok().json(MessageListResponse {
                    messages: vec![],
                    total: 0,
                    page: query.page.unwrap_or(1),
                    page_size: query.page_size.unwrap_or(50),
                })
            }
        },
    };
    match registry
        .list_messages(scope.as_ref(), query.status, query.page, query.page_size)
        .await
    {
        Ok(listing) => HttpResponse::Ok().json(listing),
        Err(e) => crate::endpoints::registry_error_response(e),
    }
}

pub(crate) async fn profile(
    operator: AuthedOperator,
    identity: Data<IdentityService>,
) -> impl Responder {
    match identity.lookup_operator(operator.0.uid).await {
        Ok(Some(record)) => HttpResponse::Ok().json(record.profile()),
        Ok(None) => {
            HttpResponse::NotFound().json(ErrorBody::new("not_found", "operator not found"))
        }
        Err(e) => identity_error_response(e),
    }
}
