//! HTTP invoke endpoint built on Axum.
//!
//! `POST /invoke` runs one invocation and always answers with an
//! `InvokeResponse`; `GET /health` reports liveness.

use super::dispatcher::Dispatcher;
use super::message::{InvokeRequest, InvokeResponse};
use crate::cancel::CancellationToken;
use crate::config::InvokeConfig;
use crate::{BridgeError, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

type Outcome = Option<std::result::Result<(), String>>;

/// Handle to a running invoke endpoint. Dropping it requests a graceful
/// shutdown.
#[derive(Debug)]
pub struct InvokeServerHandle {
    pub addr: SocketAddr,
    shutdown: CancellationToken,
    outcome: watch::Receiver<Outcome>,
}

impl InvokeServerHandle {
    /// Get the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and let in-flight invocations finish.
    pub fn shutdown(&self) {
        if self.shutdown.cancel() {
            info!("Invoke endpoint on {} shutting down", self.addr);
        }
    }

    /// Wait until the server has stopped.
    pub async fn wait(&self) -> Result<()> {
        let mut outcome = self.outcome.clone();
        let finished = outcome
            .wait_for(Option::is_some)
            .await
            .map(|state| state.clone())
            .map_err(|_| BridgeError::transport("invoke server task vanished"))?;
        match finished {
            Some(Err(message)) => Err(BridgeError::transport(message)),
            _ => Ok(()),
        }
    }
}

impl Drop for InvokeServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The invoke endpoint.
pub struct InvokeServer;

impl InvokeServer {
    /// Bind `bind` and serve `dispatcher` in the background.
    pub async fn start(bind: SocketAddr, dispatcher: Arc<Dispatcher>) -> Result<InvokeServerHandle> {
        let listener = TcpListener::bind(bind).await?;
        let addr = listener.local_addr()?;

        info!("Invoke endpoint listening on {}", addr);

        let shutdown = CancellationToken::new();
        let (outcome_tx, outcome) = watch::channel(None);

        let app = router(dispatcher);
        let signal = {
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        };

        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(signal)
                .await;
            let outcome = match result {
                Ok(()) => Ok(()),
                Err(e) => {
                    error!("Invoke endpoint error: {}", e);
                    Err(e.to_string())
                }
            };
            outcome_tx.send_replace(Some(outcome));
        });

        Ok(InvokeServerHandle {
            addr,
            shutdown,
            outcome,
        })
    }
}

/// Routes of the invoke endpoint.
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/invoke", post(handle_invoke))
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Run one invocation.
pub async fn handle_invoke(
    State(dispatcher): State<Arc<Dispatcher>>,
    payload: std::result::Result<Json<InvokeRequest>, JsonRejection>,
) -> impl IntoResponse {
    match payload {
        Ok(Json(request)) => (StatusCode::OK, Json(dispatcher.dispatch(request).await)),
        Err(rejection) => {
            warn!("Rejecting invoke request: {}", rejection.body_text());
            (
                rejection.status(),
                Json(InvokeResponse::failure(
                    String::new(),
                    InvokeConfig::HANDLER_FAULT_CODE,
                    format!("invalid invoke request: {}", rejection.body_text()),
                )),
            )
        }
    }
}
