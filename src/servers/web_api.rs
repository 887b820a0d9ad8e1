//! HTTP API for one-shot negotiation requests.
//!
//! `POST /negotiate` evaluates the current conversation and returns
//! candidate replies without running a tree search; clients that want the
//! full search connect to the websocket server instead.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::services::{NegotiationRequest, NegotiationResponse, NegotiationService};

/// Configuration for the HTTP API server.
#[derive(Debug, Clone)]
pub struct WebApiConfig {
    pub port: u16,
    pub host: String,
}

impl Default for WebApiConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// HTTP API server.
pub struct WebApiServer {
    config: WebApiConfig,
    service: Arc<NegotiationService>,
}

impl WebApiServer {
    pub fn new(config: WebApiConfig, service: Arc<NegotiationService>) -> Self {
        Self { config, service }
    }

    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error>> {
        let app = self.create_router();
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;
        let listener = TcpListener::bind(addr).await?;

        log::info!("HTTP API listening on http://{addr}");

        axum::serve(listener, app).await?;
        Ok(())
    }

    fn create_router(&self) -> Router {
        Router::new()
            .route("/negotiate", post(negotiate))
            .route("/health", get(health))
            .with_state(Arc::clone(&self.service))
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
    }
}

async fn negotiate(
    State(service): State<Arc<NegotiationService>>,
    Json(request): Json<NegotiationRequest>,
) -> Result<ResponseJson<NegotiationResponse>, (StatusCode, String)> {
    let response = service.evaluate_options(&request).await.map_err(|e| {
        log::error!("negotiate request failed: {e}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error processing request: {e}"),
        )
    })?;

    if response.options.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "No valid response options available".to_string(),
        ));
    }

    Ok(ResponseJson(response))
}

async fn health() -> ResponseJson<serde_json::Value> {
    ResponseJson(serde_json::json!({ "status": "healthy" }))
}
