//! src/transport/loopback.rs
//!
//! An in-process stand-in for `QuicTransport`: peers are addressed by an
//! arbitrary string key in a shared registry instead of a socket, so
//! Host/Manager/auth/gossip logic can be exercised in unit tests without
//! binding real ports, patterned after spinning up real nodes in
//! integration tests but simplified to direct in-memory dispatch.

use crate::error::{Error, Result};
use crate::transport::{Connection, InboundHandler, Stream, Transport};
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// The shared registry every `LoopbackTransport` in a test dials through.
/// Clone to hand a second peer a handle to the same virtual network.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    peers: Arc<RwLock<HashMap<String, Arc<dyn InboundHandler>>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct LoopbackTransport {
    address: String,
    network: LoopbackNetwork,
}

impl LoopbackTransport {
    pub fn new(address: impl Into<String>, network: LoopbackNetwork) -> Self {
        Self {
            address: address.into(),
            network,
        }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn dial(&self, address: &str, _deadline: Duration) -> Result<Box<dyn Connection>> {
        let peers = self.network.peers.read().await;
        if !peers.contains_key(address) {
            return Err(Error::ConnectionRefused);
        }
        Ok(Box::new(LoopbackConnection {
            local: self.address.clone(),
            remote: address.to_string(),
            network: self.network.clone(),
        }))
    }

    async fn serve(
        &self,
        handler: Arc<dyn InboundHandler>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        self.network
            .peers
            .write()
            .await
            .insert(self.address.clone(), handler);
        shutdown.cancelled().await;
        self.network.peers.write().await.remove(&self.address);
        Ok(())
    }
}

struct LoopbackConnection {
    local: String,
    remote: String,
    network: LoopbackNetwork,
}

impl LoopbackConnection {
    async fn remote_handler(&self) -> Result<Arc<dyn InboundHandler>> {
        self.network
            .peers
            .read()
            .await
            .get(&self.remote)
            .cloned()
            .ok_or(Error::HostDisconnected)
    }
}

#[async_trait]
impl Connection for LoopbackConnection {
    async fn open_request(&self, payload: Vec<u8>) -> Result<Vec<u8>> {
        let handler = self.remote_handler().await?;
        handler.handle_request(self.local.clone(), payload).await
    }

    async fn open_stream(&self) -> Result<Box<dyn Stream>> {
        let handler = self.remote_handler().await?;
        Ok(Box::new(LoopbackStream {
            local: self.local.clone(),
            handler,
        }))
    }

    fn is_alive(&self) -> bool {
        true
    }

    fn remote_address(&self) -> String {
        self.remote.clone()
    }
}

struct LoopbackStream {
    local: String,
    handler: Arc<dyn InboundHandler>,
}

#[async_trait]
impl Stream for LoopbackStream {
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.handler
            .handle_stream_frame(self.local.clone(), payload.to_vec())
            .await;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
