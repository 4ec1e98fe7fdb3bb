// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Loads server, council, and provider gateway knobs from environment variables
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

//! Environment-based configuration management

use std::env;

use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

/// Default debate round count when the request does not specify one
pub const DEFAULT_DEBATE_ROUNDS: u32 = 3;

/// Upper bound on debate rounds accepted at admission
pub const MAX_DEBATE_ROUNDS: u32 = 10;

/// Default per-stream inactivity timeout in seconds
pub const DEFAULT_RESPONSE_TIMEOUT_SECS: u64 = 60;

/// Minimum participating models per session
pub const MIN_MODELS: usize = 2;

/// Maximum participating models per session
pub const MAX_MODELS: usize = 8;

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// HTTP port
    pub http_port: u16,
    /// Database URL (SQLite)
    pub database_url: String,
    /// Secret used to validate bearer credentials
    pub jwt_secret: String,
    /// Allowed CORS origin for the frontend
    pub frontend_origin: Option<String>,
    /// Council orchestration knobs
    pub council: CouncilConfig,
    /// Provider gateway knobs
    pub provider: ProviderConfig,
    /// Per-subscriber event buffer capacity
    pub event_buffer_size: usize,
}

/// Orchestration policy knobs shared by admission and the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilConfig {
    /// Maximum accepted question length in characters
    pub max_question_len: usize,
    /// Weight applied to user-submitted ballots
    pub user_vote_weight: f64,
    /// Weight applied to the mystery judge's ballot
    pub mystery_judge_weight: f64,
    /// Divisor in the minority-report divergence threshold `n*(n-1)/divisor`
    pub minority_threshold_divisor: usize,
    /// Fixed seed for role assignment, labels, and bracketing; None draws
    /// from entropy. Set only in tests.
    pub role_seed: Option<u64>,
}

impl Default for CouncilConfig {
    fn default() -> Self {
        Self {
            max_question_len: 8_000,
            user_vote_weight: 0.5,
            mystery_judge_weight: 1.5,
            minority_threshold_divisor: 4,
            role_seed: None,
        }
    }
}

/// Provider gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the OpenAI-compatible endpoint
    pub base_url: String,
    /// Per-request timeout in seconds for non-streaming calls
    pub request_timeout_secs: u64,
    /// Client start/connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Idle threshold after which a per-user client is evicted, in seconds
    pub idle_eviction_secs: u64,
    /// TTL of the per-user models-list cache, in seconds
    pub models_cache_ttl_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".into(),
            request_timeout_secs: 300,
            connect_timeout_secs: 30,
            idle_eviction_secs: 30 * 60,
            models_cache_ttl_secs: 5 * 60,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            http_port: 8080,
            database_url: "sqlite:./data/council.db".into(),
            jwt_secret: String::new(),
            frontend_origin: None,
            council: CouncilConfig::default(),
            provider: ProviderConfig::default(),
            event_buffer_size: 256,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a variable contains an unparsable value or a
    /// required secret is missing.
    pub fn from_env() -> AppResult<Self> {
        let defaults = Self::default();

        let config = Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            http_port: parse_env("HTTP_PORT", defaults.http_port)?,
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            jwt_secret: env::var("SESSION_SECRET").unwrap_or_default(),
            frontend_origin: env::var("FRONTEND_URL").ok(),
            council: CouncilConfig {
                max_question_len: parse_env(
                    "COUNCIL_MAX_QUESTION_LEN",
                    defaults.council.max_question_len,
                )?,
                user_vote_weight: parse_env(
                    "COUNCIL_USER_VOTE_WEIGHT",
                    defaults.council.user_vote_weight,
                )?,
                mystery_judge_weight: parse_env(
                    "COUNCIL_MYSTERY_JUDGE_WEIGHT",
                    defaults.council.mystery_judge_weight,
                )?,
                minority_threshold_divisor: parse_env(
                    "COUNCIL_MINORITY_DIVISOR",
                    defaults.council.minority_threshold_divisor,
                )?,
                role_seed: None,
            },
            provider: ProviderConfig {
                base_url: env::var("PROVIDER_BASE_URL").unwrap_or(defaults.provider.base_url),
                request_timeout_secs: parse_env(
                    "PROVIDER_REQUEST_TIMEOUT_SECS",
                    defaults.provider.request_timeout_secs,
                )?,
                connect_timeout_secs: parse_env(
                    "PROVIDER_CONNECT_TIMEOUT_SECS",
                    defaults.provider.connect_timeout_secs,
                )?,
                idle_eviction_secs: parse_env(
                    "PROVIDER_IDLE_EVICTION_SECS",
                    defaults.provider.idle_eviction_secs,
                )?,
                models_cache_ttl_secs: parse_env(
                    "PROVIDER_MODELS_CACHE_TTL_SECS",
                    defaults.provider.models_cache_ttl_secs,
                )?,
            },
            event_buffer_size: parse_env("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.jwt_secret.len() < 32 {
            return Err(AppError::invalid_request(
                "SESSION_SECRET must be set and at least 32 characters",
            ));
        }
        if self.event_buffer_size == 0 {
            return Err(AppError::invalid_request(
                "EVENT_BUFFER_SIZE must be positive",
            ));
        }
        Ok(())
    }

    /// Socket address string for the HTTP listener
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> AppResult<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::invalid_request(format!("invalid value for {key}: {raw}"))),
        Err(_) => Ok(default),
    }
}
