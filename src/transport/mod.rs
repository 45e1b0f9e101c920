//! src/transport/mod.rs
//!
//! The narrow capability the core plugs the network into. `Connection`
//! and `Stream` are the only interfaces Host/Auth/Gossip depend on, so a
//! real QUIC socket (`quic::QuicTransport`) and an in-process stand-in
//! (`loopback::LoopbackTransport`) are interchangeable in tests.

pub mod loopback;
pub mod quic;
pub mod tls;

use crate::error::Result;
use async_trait::async_trait;

/// Maximum size of a single unary request/response or streamed frame.
pub const MAX_MESSAGE_SIZE: usize = 1_024 * 1_024; // 1 MiB

/// Upper bound on concurrently in-flight inbound streams per connection,
/// enforced with a semaphore around the accept loop.
pub const MAX_CONCURRENT_STREAMS: usize = 256;

/// ALPN identifier negotiated over the QUIC handshake.
pub const ALPN_PROTOCOL: &[u8] = b"comms/1";

/// An open duplex channel to a peer. Unary calls (`RequestToken`,
/// `AuthenticateToken`, any other RPC) go through `open_request`; gossip
/// fan-out and other one-way bulk transfer go through `open_stream`.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn open_request(&self, payload: Vec<u8>) -> Result<Vec<u8>>;
    async fn open_stream(&self) -> Result<Box<dyn Stream>>;
    fn is_alive(&self) -> bool;
    fn remote_address(&self) -> String;
}

/// A one-way outbound byte stream opened on top of a `Connection`.
#[async_trait]
pub trait Stream: Send + Sync {
    async fn send(&mut self, payload: &[u8]) -> Result<()>;
    async fn finish(&mut self) -> Result<()>;
}

/// A handler invoked for each unary request or stream frame a transport
/// accepts, so `quic` and `loopback` can share the same dispatch contract
/// used by the Comms facade and the gossip engine.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle_request(&self, from: String, payload: Vec<u8>) -> Result<Vec<u8>>;
    async fn handle_stream_frame(&self, from: String, payload: Vec<u8>);
}

/// A connectable, acceptable network endpoint: the capability `Host` and
/// the facade dial through, and the accept loop listens on.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Dials `address`, aborting if `deadline` elapses first (Host's
    /// backoff-derived per-attempt deadline).
    async fn dial(&self, address: &str, deadline: std::time::Duration) -> Result<Box<dyn Connection>>;

    /// Runs the accept loop, dispatching every inbound request/frame to
    /// `handler`, until `shutdown` fires.
    async fn serve(
        &self,
        handler: std::sync::Arc<dyn InboundHandler>,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> Result<()>;
}
