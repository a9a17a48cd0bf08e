// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Portal bearer tokens: signed, expiring, refreshable.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use relaycommon::{identifiers::ClientId, portal::TokenResponse, status::UserRole};

use crate::{identity::OperatorRecord, settings::AuthSettings};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
    /// An access token was presented where a refresh token is required, or
    /// vice versa.
    #[error("wrong token type")]
    WrongTokenUse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    Access,
    Refresh,
}

/// Claims carried by both token kinds. `sub` is the operator's email; the
/// role and optional client binding let endpoints authorize without a
/// database round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub uid: i64,
    pub role: UserRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    pub token_use: TokenUse,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and validates the portal's bearer tokens (HS256).
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(settings: &AuthSettings) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(settings.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(settings.jwt_secret.as_bytes()),
            access_ttl: Duration::seconds(settings.access_ttl_secs as i64),
            refresh_ttl: Duration::seconds(settings.refresh_ttl_secs as i64),
        }
    }

    pub fn access_ttl_secs(&self) -> u64 {
        self.access_ttl.num_seconds() as u64
    }

    /// Mint an access/refresh token pair for a freshly authenticated
    /// operator.
    pub fn issue_pair(&self, operator: &OperatorRecord) -> Result<TokenResponse, TokenError> {
        let access_token = self.issue(operator, TokenUse::Access, self.access_ttl)?;
        let refresh_token = self.issue(operator, TokenUse::Refresh, self.refresh_ttl)?;
        Ok(TokenResponse {
            access_token,
            refresh_token,
            token_type: "bearer".to_owned(),
            expires_in: self.access_ttl_secs(),
        })
    }

    /// Exchange a refresh token for a fresh access token. The refresh token
    /// itself stays valid until it expires.
    pub fn refresh_access(&self, refresh_token: &str) -> Result<String, TokenError> {
        let claims = self.verify(refresh_token, TokenUse::Refresh)?;
        let now = Utc::now();
        let refreshed = Claims {
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
            token_use: TokenUse::Access,
            ..claims
        };
        encode(&Header::default(), &refreshed, &self.encoding_key)
            .map_err(|_| TokenError::Invalid)
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, TokenUse::Access)
    }

    fn issue(
        &self,
        operator: &OperatorRecord,
        token_use: TokenUse,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: operator.email.clone(),
            uid: operator.id,
            role: operator.role,
            client_id: operator.client_id.clone(),
            token_use,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key).map_err(|_| TokenError::Invalid)
    }

    fn verify(&self, token: &str, expected_use: TokenUse) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default()).map_err(
            |e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            },
        )?;
        if data.claims.token_use != expected_use {
            return Err(TokenError::WrongTokenUse);
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn issuer(access_ttl_secs: u64) -> TokenIssuer {
        TokenIssuer::new(&AuthSettings {
            jwt_secret: "a-secret-only-tests-know".into(),
            access_ttl_secs,
            refresh_ttl_secs: 3600,
        })
    }

    fn operator() -> OperatorRecord {
        OperatorRecord {
            id: 7,
            email: "operator@example.com".into(),
            password_hash: "irrelevant".into(),
            role: UserRole::User,
            client_id: Some("client_alpha".parse().unwrap()),
            is_active: true,
            last_login: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn access_token_round_trips() {
        let issuer = issuer(60);
        let pair = issuer.issue_pair(&operator()).unwrap();
        assert_eq!(pair.token_type, "bearer");
        assert_eq!(pair.expires_in, 60);

        let claims = issuer.verify_access(&pair.access_token).unwrap();
        assert_eq!(claims.sub, "operator@example.com");
        assert_eq!(claims.uid, 7);
        assert_eq!(claims.role, UserRole::User);
        assert_eq!(claims.client_id, Some("client_alpha".parse().unwrap()));
    }

    #[test]
    fn refresh_token_is_rejected_as_access_token() {
        let issuer = issuer(60);
        let pair = issuer.issue_pair(&operator()).unwrap();
        assert_eq!(
            issuer.verify_access(&pair.refresh_token).unwrap_err(),
            TokenError::WrongTokenUse
        );
    }

    #[test]
    fn refresh_mints_a_new_access_token() {
        let issuer = issuer(60);
        let pair = issuer.issue_pair(&operator()).unwrap();
        let refreshed = issuer.refresh_access(&pair.refresh_token).unwrap();
        let claims = issuer.verify_access(&refreshed).unwrap();
        assert_eq!(claims.uid, 7);
        assert_eq!(claims.token_use, TokenUse::Access);
    }

    #[test]
    fn access_token_cannot_be_used_to_refresh() {
        let issuer = issuer(60);
        let pair = issuer.issue_pair(&operator()).unwrap();
        assert!(issuer.refresh_access(&pair.access_token).is_err());
    }

    #[test]
    fn tampered_tokens_are_invalid() {
        let issuer = issuer(60);
        let pair = issuer.issue_pair(&operator()).unwrap();
        let mut tampered = pair.access_token.clone();
        tampered.push('x');
        assert_eq!(issuer.verify_access(&tampered).unwrap_err(), TokenError::Invalid);
    }

    #[test]
    fn tokens_from_another_secret_are_invalid() {
        let pair = issuer(60).issue_pair(&operator()).unwrap();
        let other = TokenIssuer::new(&AuthSettings {
            jwt_secret: "different".into(),
            access_ttl_secs: 60,
            refresh_ttl_secs: 3600,
        });
        assert_eq!(
            other.verify_access(&pair.access_token).unwrap_err(),
            TokenError::Invalid
        );
    }
}
