// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bearer token extraction for the portal and admin endpoints.

use std::future::{ready, Ready};

use actix_web::{dev::Payload, error::InternalError, web::Data, FromRequest, HttpRequest, HttpResponse};

use relaybackend::auth::{Claims, TokenIssuer};
use relaycommon::messages::ErrorBody;

/// An authenticated operator, established from the `Authorization: Bearer`
/// header. Extraction fails with 401 before the handler runs.
pub struct AuthedOperator(pub Claims);

impl FromRequest for AuthedOperator {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(extract(req))
    }
}

fn extract(req: &HttpRequest) -> Result<AuthedOperator, actix_web::Error> {
    let issuer = req
        .app_data::<Data<TokenIssuer>>()
        .ok_or_else(|| unauthorized("token issuer not configured"))?;
    let header = req
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| unauthorized("missing bearer token"))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| unauthorized("missing bearer token"))?;
    let claims = issuer
        .verify_access(token)
        .map_err(|e| unauthorized(&e.to_string()))?;
    Ok(AuthedOperator(claims))
}

fn unauthorized(message: &str) -> actix_web::Error {
    InternalError::from_response(
        message.to_owned(),
        HttpResponse::Unauthorized().json(ErrorBody::new("unauthorized", message)),
    )
    .into()
}
