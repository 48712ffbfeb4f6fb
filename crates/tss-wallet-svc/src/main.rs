//! Threshold Wallet Service
//!
//! HTTP service that creates threshold wallets and signs data with them.

mod config;
mod routes;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;
use tss_core::{SessionController, WalletRegistry};

use config::Args;
use routes::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.validate()?;

    // Initialize tracing
    let filter = EnvFilter::from_default_env().add_directive(Level::INFO.into());
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!(
        listen = %args.listen,
        participants = args.participants,
        threshold = args.threshold,
        session_timeout_secs = args.session_timeout_secs,
        "Starting threshold wallet service"
    );

    let controller = SessionController::new(Arc::new(WalletRegistry::new()), args.session_settings());
    let state = Arc::new(AppState {
        controller,
        participants: args.participants,
        threshold: args.threshold,
    });

    let app = routes::app(state);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(address = %args.listen, "Listening");

    axum::serve(listener, app).await?;

    Ok(())
}
