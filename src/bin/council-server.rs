// ABOUTME: Server binary wiring configuration, store, event hub, gateway, and HTTP surface
// ABOUTME: Supports a dev-token mint for local use and shuts down gracefully on SIGINT
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

#![deny(unsafe_code)]

//! # Council Server Binary
//!
//! Starts the council deliberation server: SQLite store, live event hub,
//! OpenAI-compatible provider gateway, and the HTTP/SSE surface.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use council_arena::auth::AuthManager;
use council_arena::config::ServerConfig;
use council_arena::council::CouncilService;
use council_arena::database::Database;
use council_arena::events::EventHub;
use council_arena::logging;
use council_arena::providers::OpenAiCompatibleGateway;
use council_arena::routes::{router, AppState};

#[derive(Parser)]
#[command(name = "council-server")]
#[command(about = "Council Arena - multi-model deliberation server")]
struct Args {
    /// Override the HTTP port
    #[arg(long)]
    http_port: Option<u16>,

    /// Override the database URL
    #[arg(long)]
    database_url: Option<String>,

    /// Mint a development bearer token for this user id and exit
    #[arg(long)]
    mint_dev_token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::from_env().context("failed to load configuration")?;
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(url) = args.database_url {
        config.database_url = url;
    }

    let auth = AuthManager::new(&config.jwt_secret);
    if let Some(user_id) = args.mint_dev_token {
        let token = auth
            .mint_token(&user_id, "", chrono::Duration::days(30))
            .context("failed to mint dev token")?;
        println!("{token}");
        return Ok(());
    }

    logging::init_from_env().context("failed to initialize logging")?;
    info!("starting council server");

    let database = Database::new(&config.database_url)
        .await
        .context("failed to open database")?;
    let hub = EventHub::new(config.event_buffer_size);
    let gateway = Arc::new(OpenAiCompatibleGateway::new(config.provider.clone()));
    let service = CouncilService::new(
        database.clone(),
        hub.clone(),
        gateway.clone(),
        config.council.clone(),
    );

    let state = Arc::new(AppState {
        service,
        hub: hub.clone(),
        auth,
    });
    let app = router(state, config.frontend_origin.as_deref());

    let address = config.server_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!("listening on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutting down");
    hub.shutdown().await;
    gateway.shutdown().await;
    database.close().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
