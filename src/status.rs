//! src/status.rs
//!
//! An optional read-only status endpoint: a JSON snapshot of every Host
//! this process knows about. Built on an axum `Router` served behind
//! `tower_http`'s trace layer with graceful shutdown, trading a
//! WebSocket topology push for a single polled GET route over the
//! Host/Manager state this process actually owns.

use crate::comms::Comms;
use crate::error::Result;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct StatusState {
    comms: Arc<Comms>,
}

#[derive(Serialize)]
struct HostStatus {
    id: String,
    address: String,
    connected: bool,
    generation: u64,
    dynamic: bool,
    /// Errors recorded since the last time this endpoint was polled
    /// (`Host::get_metrics` resets its counter on read).
    errors_since_last_poll: u64,
}

pub struct StatusServer {
    bind_addr: SocketAddr,
    comms: Arc<Comms>,
}

impl StatusServer {
    pub fn new(bind_addr: SocketAddr, comms: Arc<Comms>) -> Self {
        Self { bind_addr, comms }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let state = StatusState { comms: self.comms };
        let app = Router::new()
            .route("/status", get(status_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        tracing::info!(listen_addr = %self.bind_addr, "status endpoint listening");
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("status endpoint received shutdown signal");
            })
            .await?;
        Ok(())
    }
}

async fn status_handler(State(state): State<StatusState>) -> Json<Vec<HostStatus>> {
    let hosts = state
        .comms
        .manager
        .snapshot()
        .into_iter()
        .map(|host| {
            let (connected, generation) = host.connected();
            HostStatus {
                id: host.id.to_string(),
                address: host.address(),
                connected,
                generation,
                dynamic: host.is_dynamic_host(),
                errors_since_last_poll: host.get_metrics(),
            }
        })
        .collect();
    Json(hosts)
}
