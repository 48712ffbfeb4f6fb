//! HTTP routes

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tss_core::SessionController;

/// Application state
pub struct AppState {
    pub controller: SessionController,
    /// Defaults for `POST /wallet`
    pub participants: usize,
    pub threshold: usize,
}

/// Optional overrides for wallet creation
#[derive(Debug, Default, Deserialize)]
pub struct CreateWalletParams {
    participants: Option<usize>,
    threshold: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SignParams {
    wallet: Option<String>,
    data: Option<String>,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/wallet", post(create_wallet))
        .route("/wallets", get(list_wallets))
        .route("/sign", get(sign))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "tss-wallet-svc",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Run keygen and return the new wallet's address
async fn create_wallet(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CreateWalletParams>,
) -> impl IntoResponse {
    let participants = params.participants.unwrap_or(state.participants);
    let threshold = params.threshold.unwrap_or(state.threshold);

    match state.controller.run_keygen(participants, threshold).await {
        Ok(address) => {
            info!(%address, "Wallet request served");
            (StatusCode::OK, Json(json!({ "address": address })))
        }
        Err(e) => {
            warn!(error = %e, participants, threshold, "Wallet creation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

/// Every wallet address created so far
async fn list_wallets(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "wallets": state.controller.list_addresses() }))
}

/// Sign `data` with the wallet at `wallet`
async fn sign(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SignParams>,
) -> impl IntoResponse {
    let (wallet, data) = match (params.wallet, params.data) {
        (Some(wallet), Some(data)) if !wallet.is_empty() && !data.is_empty() => (wallet, data),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "wallet and data are required" })),
            );
        }
    };

    match state.controller.run_signing(&wallet, data.as_bytes()).await {
        Ok(signature) => (
            StatusCode::OK,
            Json(json!({ "signature": signature.to_hex() })),
        ),
        Err(e) => {
            warn!(error = %e, %wallet, "Signing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}
