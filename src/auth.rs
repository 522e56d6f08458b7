// ABOUTME: JWT-based session resolution for turn requests
// ABOUTME: Handles token generation, validation, and header/cookie extraction
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # Authentication and Session Management
//!
//! Sessions are stateless HS256 JWTs. The token carries the user id, email,
//! and user type; the gate layer turns the type into entitlements. Tokens
//! arrive either as an `Authorization: Bearer` header or an `auth_token`
//! cookie.

use axum::http::HeaderMap;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entitlements::UserType;
use crate::errors::{AppError, AppResult};

/// Token audience value
const TOKEN_AUDIENCE: &str = "colloquy";

/// `JWT` claims for user authentication
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// User email
    pub email: String,
    /// User type for entitlement lookup
    pub user_type: UserType,
    /// Issued at timestamp
    pub iat: i64,
    /// Expiration timestamp
    pub exp: i64,
    /// Audience
    pub aud: String,
}

/// Authenticated caller context
#[derive(Debug, Clone)]
pub struct AuthResult {
    /// Authenticated user id
    pub user_id: Uuid,
    /// User email
    pub email: String,
    /// User type
    pub user_type: UserType,
}

/// JWT session manager
pub struct AuthManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_hours: i64,
}

impl AuthManager {
    /// Create a manager with an HS256 secret
    #[must_use]
    pub fn new(secret: &[u8], expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            expiry_hours,
        }
    }

    /// Generate a session token for a user
    ///
    /// # Errors
    ///
    /// Returns an error if token signing fails.
    pub fn generate_token(
        &self,
        user_id: Uuid,
        email: &str,
        user_type: UserType,
    ) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_owned(),
            user_type,
            iat: now.timestamp(),
            exp: (now + Duration::hours(self.expiry_hours)).timestamp(),
            aud: TOKEN_AUDIENCE.to_owned(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::internal(format!("Failed to sign token: {e}")))
    }

    /// Validate a token and return its claims
    ///
    /// # Errors
    ///
    /// Returns `unauthorized` for expired, malformed, or mis-signed tokens.
    pub fn validate_token(&self, token: &str) -> AppResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[TOKEN_AUDIENCE]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| AppError::unauthorized(format!("Invalid session token: {e}")))
    }

    /// Resolve the caller from request headers
    ///
    /// Accepts `Authorization: Bearer <token>` or an `auth_token` cookie.
    ///
    /// # Errors
    ///
    /// Returns `unauthorized` if no token is present or validation fails.
    pub fn authenticate(&self, headers: &HeaderMap) -> AppResult<AuthResult> {
        let token = bearer_token(headers)
            .or_else(|| cookie_value(headers, "auth_token"))
            .ok_or_else(|| AppError::unauthorized("Missing authorization header or cookie"))?;

        let claims = self.validate_token(&token)?;
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| AppError::unauthorized("Session token has a malformed subject"))?;

        Ok(AuthResult {
            user_id,
            email: claims.email,
            user_type: claims.user_type,
        })
    }
}

/// Extract the token from an `Authorization: Bearer` header
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(ToOwned::to_owned)
}

/// Extract a named cookie value from the `Cookie` header
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get(http::header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_owned())
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use axum::http::HeaderValue;

    fn manager() -> AuthManager {
        AuthManager::new(b"test-secret", 24)
    }

    #[test]
    fn test_round_trip_token() {
        let manager = manager();
        let user_id = Uuid::new_v4();
        let token = manager
            .generate_token(user_id, "user@example.com", UserType::Regular)
            .unwrap();

        let claims = manager.validate_token(&token).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.user_type, UserType::Regular);
        assert_eq!(claims.aud, TOKEN_AUDIENCE);
    }

    #[test]
    fn test_rejects_garbage_token() {
        assert!(manager().validate_token("not-a-jwt").is_err());
    }

    #[test]
    fn test_rejects_wrong_secret() {
        let token = manager()
            .generate_token(Uuid::new_v4(), "user@example.com", UserType::Guest)
            .unwrap();
        let other = AuthManager::new(b"different-secret", 24);
        assert!(other.validate_token(&token).is_err());
    }

    #[test]
    fn test_authenticate_from_bearer_header() {
        let manager = manager();
        let user_id = Uuid::new_v4();
        let token = manager
            .generate_token(user_id, "user@example.com", UserType::Guest)
            .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );

        let auth = manager.authenticate(&headers).unwrap();
        assert_eq!(auth.user_id, user_id);
        assert_eq!(auth.user_type, UserType::Guest);
    }

    #[test]
    fn test_authenticate_from_cookie() {
        let manager = manager();
        let user_id = Uuid::new_v4();
        let token = manager
            .generate_token(user_id, "user@example.com", UserType::Regular)
            .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::COOKIE,
            HeaderValue::from_str(&format!("theme=dark; auth_token={token}")).unwrap(),
        );

        let auth = manager.authenticate(&headers).unwrap();
        assert_eq!(auth.user_id, user_id);
    }

    #[test]
    fn test_authenticate_missing_credentials() {
        let err = manager().authenticate(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::Unauthorized);
    }
}
