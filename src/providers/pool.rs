// ABOUTME: Per-user HTTP client pool for the provider gateway
// ABOUTME: Clients carry the user's delegated credential; idle clients and stale model caches are evicted
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use super::UserHandle;
use crate::config::ProviderConfig;
use crate::errors::{AppError, AppResult};
use crate::models::ModelInfo;

/// How often the sweeper looks for idle clients
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct UserClient {
    http: reqwest::Client,
    credential: String,
    models: Option<CachedModels>,
    last_used: Instant,
}

struct CachedModels {
    fetched_at: Instant,
    models: Vec<ModelInfo>,
}

/// Pool of per-user HTTP clients shared across that user's sessions.
///
/// A client is created on first use with the user's delegated credential as
/// its bearer header, reused while active, and evicted after the configured
/// idle threshold. The per-user models list is cached with its own TTL.
pub struct ClientPool {
    clients: Arc<RwLock<HashMap<String, UserClient>>>,
    config: ProviderConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl ClientPool {
    /// Create the pool and start its background eviction sweep
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            config,
            shutdown_tx,
        };
        pool.spawn_sweeper(shutdown_rx);
        pool
    }

    fn spawn_sweeper(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let clients = Arc::clone(&self.clients);
        let idle_threshold = Duration::from_secs(self.config.idle_eviction_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut guard = clients.write().await;
                        let before = guard.len();
                        guard.retain(|user_id, client| {
                            let keep = client.last_used.elapsed() < idle_threshold;
                            if !keep {
                                info!(user_id, "evicting idle provider client");
                            }
                            keep
                        });
                        if guard.len() != before {
                            debug!(evicted = before - guard.len(), "idle sweep complete");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Get or create the HTTP client for a user, refreshing `last_used`.
    ///
    /// A credential change replaces the client (and drops its model cache).
    ///
    /// # Errors
    ///
    /// Returns `ProviderFailure` if the client cannot be constructed.
    pub async fn client_for(&self, user: &UserHandle) -> AppResult<reqwest::Client> {
        {
            let mut guard = self.clients.write().await;
            if let Some(existing) = guard.get_mut(&user.user_id) {
                if existing.credential == user.credential {
                    existing.last_used = Instant::now();
                    return Ok(existing.http.clone());
                }
                warn!(user_id = %user.user_id, "credential changed, rebuilding provider client");
                guard.remove(&user.user_id);
            }
        }

        let http = self.build_client(&user.credential)?;
        let mut guard = self.clients.write().await;
        guard.insert(
            user.user_id.clone(),
            UserClient {
                http: http.clone(),
                credential: user.credential.clone(),
                models: None,
                last_used: Instant::now(),
            },
        );
        info!(user_id = %user.user_id, "provider client created");
        Ok(http)
    }

    fn build_client(&self, credential: &str) -> AppResult<reqwest::Client> {
        let mut headers = HeaderMap::new();
        if !credential.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {credential}"))
                .map_err(|e| AppError::provider(format!("invalid provider credential: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(self.config.connect_timeout_secs))
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::provider(format!("failed to build provider client: {e}")))
    }

    /// Cached models for a user, if the cache is still fresh
    pub async fn cached_models(&self, user_id: &str) -> Option<Vec<ModelInfo>> {
        let ttl = Duration::from_secs(self.config.models_cache_ttl_secs);
        let guard = self.clients.read().await;
        guard
            .get(user_id)
            .and_then(|client| client.models.as_ref())
            .filter(|cache| cache.fetched_at.elapsed() < ttl)
            .map(|cache| cache.models.clone())
    }

    /// Store a freshly fetched models list for a user
    pub async fn store_models(&self, user_id: &str, models: Vec<ModelInfo>) {
        let mut guard = self.clients.write().await;
        if let Some(client) = guard.get_mut(user_id) {
            client.models = Some(CachedModels {
                fetched_at: Instant::now(),
                models,
            });
        }
    }

    /// Number of pooled clients
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Whether the pool is empty
    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// Stop the sweeper and drop all clients
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.clients.write().await.clear();
    }
}
