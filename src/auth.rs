// ABOUTME: Bearer credential validation for the session API
// ABOUTME: Claims carry the user id and an opaque delegated model-provider token
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

//! # Authentication Contract
//!
//! Token issuance is external (an OAuth-style exchange); this module only
//! validates the resulting bearer JWT and extracts `{user_id,
//! provider_credential}`. The provider credential is opaque to the core and
//! forwarded verbatim to the provider gateway. A mint helper exists for the
//! server binary's dev mode and for tests.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::providers::UserHandle;

/// JWT claims carried by a council bearer credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Opaque delegated model-provider token
    #[serde(default)]
    pub provider_credential: String,
    /// Expiry, seconds since epoch
    pub exp: i64,
    /// Issued at, seconds since epoch
    pub iat: i64,
}

/// Validates and mints bearer credentials
#[derive(Clone)]
pub struct AuthManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AuthManager {
    /// Create a manager over an HS256 shared secret
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Validate an `Authorization` header value and extract the caller
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` for a missing scheme, an invalid signature, or
    /// an expired token.
    pub fn validate_bearer(&self, header_value: &str) -> AppResult<UserHandle> {
        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::unauthorized("expected a bearer credential"))?;
        self.validate_token(token)
    }

    /// Validate a raw token and extract the caller
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` for an invalid or expired token.
    pub fn validate_token(&self, token: &str) -> AppResult<UserHandle> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| AppError::unauthorized(format!("invalid credential: {e}")))?;

        Ok(UserHandle {
            user_id: data.claims.sub,
            credential: data.claims.provider_credential,
        })
    }

    /// Mint a bearer token. Used by the binary's dev mode and by tests; the
    /// production exchange lives outside this service.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` if signing fails.
    pub fn mint_token(
        &self,
        user_id: &str,
        provider_credential: &str,
        ttl: Duration,
    ) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_owned(),
            provider_credential: provider_credential.to_owned(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::unauthorized(format!("could not sign credential: {e}")))
    }
}
