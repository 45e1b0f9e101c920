//! src/app.rs
//!
//! Defines the main `App` struct, which encapsulates the application's state
//! and manages the lifecycle of all its concurrent services: load
//! identity/config, build the facade, spawn its background tasks, wait for
//! Ctrl+C, join everything on the way out.

use crate::{
    comms::Comms,
    config::Config,
    error::Result,
    gossip,
    identity::Identity,
    status::StatusServer,
    transport::{quic::QuicTransport, Transport},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Encapsulates the entire application, including its configuration and the
/// lifecycle management of its concurrent services.
pub struct App {
    config: Config,
    shutdown_token: CancellationToken,
}

impl App {
    /// Creates a new `App` from the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self {
            config,
            shutdown_token: CancellationToken::new(),
        })
    }

    /// The main run loop for the application.
    ///
    /// This function performs the following steps:
    ///   1. Initializes the node's cryptographic identity.
    ///   2. Builds the transport (real QUIC, unless testing disables TLS).
    ///   3. Constructs the `Comms` facade in the server role and spawns its
    ///      accept loop and gossip buffer sweeper.
    ///   4. Waits for a shutdown signal (like Ctrl+C) and gracefully
    ///      terminates all tasks.
    pub async fn run(self) -> Result<()> {
        let identity = Arc::new(Identity::from_file(&self.config.identity_path)?);

        tracing::info!(
            node_id = %identity.node_id,
            listen_addr = %self.config.listen_addr,
            "🚀 Starting node..."
        );

        let transport: Arc<dyn Transport> = Arc::new(QuicTransport::new(
            self.config.listen_addr,
            &self.config.ca_cert_path,
            &self.config.cert_path,
            &self.config.key_path,
            self.config.disable_tls_for_testing,
        )?);

        let comms = Arc::new(Comms::new_server(
            identity,
            transport,
            self.config.disable_auth_for_testing,
            gossip::ManagerFlags::from(self.config.gossip_manager_flags),
            self.config.default_host_params.send_timeout,
        ));
        let serve_task = comms.serve(self.shutdown_token.clone());
        tracing::debug!("Comms accept loop and gossip sweeper spawned.");

        let status_task = self.config.status_addr.map(|status_addr| {
            tracing::info!("Status endpoint enabled.");
            let status_server = StatusServer::new(status_addr, comms.clone());
            tokio::spawn(status_server.run(self.shutdown_token.clone()))
        });

        // --- Wait for Shutdown Signal ---
        let shutdown_token = self.shutdown_token.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
            tracing::info!("Ctrl+C received. Initiating graceful shutdown...");
            shutdown_token.cancel();
        });

        // --- Await Service Termination ---
        self.shutdown_token.cancelled().await;
        comms.shutdown();

        if let Err(e) = serve_task.await {
            tracing::error!(error = ?e, "Comms accept loop task failed");
        }
        if let Some(task) = status_task {
            match task.await {
                Ok(Err(e)) => tracing::error!(error = %e, "Status endpoint failed"),
                Err(e) => tracing::error!(error = ?e, "Status endpoint task panicked"),
                Ok(Ok(())) => {}
            }
        }
        tracing::info!("👋 Node has shut down gracefully.");

        Ok(())
    }
}
