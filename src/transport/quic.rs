//! src/transport/quic.rs
//!
//! The QUIC implementation of the `Transport`/`Connection`/`Stream`
//! capability: a `quinn::Endpoint` bound with `socket2` (for `SO_REUSEADDR`),
//! bidirectional streams for unary request/response, unidirectional
//! streams for gossip fan-out, and a semaphore bounding concurrent
//! inbound streams per connection.

use crate::error::{Error, Result};
use crate::transport::{
    tls::{configure_insecure_tls, configure_tls},
    Connection, InboundHandler, Stream, Transport, MAX_CONCURRENT_STREAMS, MAX_MESSAGE_SIZE,
};
use async_trait::async_trait;
use quinn::{Endpoint, RecvStream, SendStream, TokioRuntime};
use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

pub struct QuicTransport {
    endpoint: Endpoint,
}

impl QuicTransport {
    pub fn new(
        bind_addr: SocketAddr,
        ca_cert_path: &Path,
        node_cert_path: &Path,
        node_key_path: &Path,
        disable_tls_for_testing: bool,
    ) -> Result<Self> {
        let (server_config, client_config) = if disable_tls_for_testing {
            configure_insecure_tls()?
        } else {
            configure_tls(ca_cert_path, node_cert_path, node_key_path)?
        };

        let socket = Socket::new(
            Domain::for_address(bind_addr),
            Type::DGRAM,
            Some(SockProtocol::UDP),
        )?;
        socket.set_reuse_address(true)?;
        socket.bind(&bind_addr.into())?;
        let std_socket: std::net::UdpSocket = socket.into();
        std_socket.set_nonblocking(true)?;

        let mut endpoint = Endpoint::new(
            Default::default(),
            Some(server_config),
            std_socket,
            Arc::new(TokioRuntime),
        )?;
        endpoint.set_default_client_config(client_config);

        Ok(Self { endpoint })
    }

    /// The socket address this transport actually bound to — useful when
    /// `bind_addr`'s port was 0 and the OS picked one.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }
}

#[async_trait]
impl Transport for QuicTransport {
    async fn dial(&self, address: &str, deadline: Duration) -> Result<Box<dyn Connection>> {
        let socket_addr: SocketAddr = address
            .parse()
            .map_err(|_| Error::MalformedMessage(format!("invalid dial address: {address}")))?;

        let connecting = self
            .endpoint
            .connect(socket_addr, "localhost")
            .map_err(|e| Error::ConnectFailed(address.to_string(), e))?;

        let conn = tokio::time::timeout(deadline, connecting)
            .await
            .map_err(|_| Error::DeadlineExceeded)?
            .map_err(|e| Error::ConnectionEstablishFailed(address.to_string(), e))?;

        Ok(Box::new(QuicConnection { inner: conn }))
    }

    async fn serve(
        &self,
        handler: Arc<dyn InboundHandler>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_STREAMS));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("QUIC transport received shutdown signal");
                    break;
                }
                accepted = self.endpoint.accept() => {
                    let Some(connecting) = accepted else {
                        tracing::info!("QUIC endpoint closed, transport shutting down");
                        break;
                    };
                    let handler = handler.clone();
                    let semaphore = semaphore.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(connecting, handler, semaphore).await {
                            tracing::error!(error = %e, "connection handling failed");
                        }
                    });
                }
            }
        }
        self.endpoint.wait_idle().await;
        Ok(())
    }
}

async fn handle_connection(
    connecting: quinn::Connecting,
    handler: Arc<dyn InboundHandler>,
    semaphore: Arc<Semaphore>,
) -> Result<()> {
    let connection = connecting.await?;
    let peer = connection.remote_address().to_string();
    tracing::info!(peer = %peer, "accepted connection");

    loop {
        tokio::select! {
            bi = connection.accept_bi() => {
                let (send, recv) = match bi {
                    Ok(streams) => streams,
                    Err(e) => {
                        tracing::debug!(peer = %peer, error = %e, "bi-stream acceptance ended");
                        break;
                    }
                };
                let Ok(permit) = semaphore.clone().acquire_owned().await else { break };
                let handler = handler.clone();
                let peer = peer.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = handle_request_stream(peer.clone(), send, recv, handler).await {
                        tracing::warn!(peer = %peer, error = %e, "request stream failed");
                    }
                });
            }
            uni = connection.accept_uni() => {
                let mut recv = match uni {
                    Ok(recv) => recv,
                    Err(e) => {
                        tracing::debug!(peer = %peer, error = %e, "uni-stream acceptance ended");
                        break;
                    }
                };
                let Ok(permit) = semaphore.clone().acquire_owned().await else { break };
                let handler = handler.clone();
                let peer = peer.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    match recv.read_to_end(MAX_MESSAGE_SIZE).await {
                        Ok(payload) => handler.handle_stream_frame(peer, payload).await,
                        Err(e) => tracing::warn!(peer = %peer, error = %e, "failed to read stream frame"),
                    }
                });
            }
        }
    }
    Ok(())
}

async fn handle_request_stream(
    peer: String,
    mut send: SendStream,
    mut recv: RecvStream,
    handler: Arc<dyn InboundHandler>,
) -> Result<()> {
    let payload = recv.read_to_end(MAX_MESSAGE_SIZE).await.map_err(|e| Error::ReadStream(e.to_string()))?;
    let reply = handler.handle_request(peer, payload).await?;
    send.write_all(&reply).await?;
    send.finish().await.map_err(|e| Error::ReadStream(e.to_string()))?;
    Ok(())
}

struct QuicConnection {
    inner: quinn::Connection,
}

#[async_trait]
impl Connection for QuicConnection {
    async fn open_request(&self, payload: Vec<u8>) -> Result<Vec<u8>> {
        let (mut send, mut recv) = self.inner.open_bi().await?;
        send.write_all(&payload).await?;
        send.finish().await.map_err(|e| Error::ReadStream(e.to_string()))?;
        let reply = recv
            .read_to_end(MAX_MESSAGE_SIZE)
            .await
            .map_err(|e| Error::ReadStream(e.to_string()))?;
        Ok(reply)
    }

    async fn open_stream(&self) -> Result<Box<dyn Stream>> {
        let send = self.inner.open_uni().await?;
        Ok(Box::new(QuicStream { inner: send }))
    }

    fn is_alive(&self) -> bool {
        self.inner.close_reason().is_none()
    }

    fn remote_address(&self) -> String {
        self.inner.remote_address().to_string()
    }
}

struct QuicStream {
    inner: SendStream,
}

#[async_trait]
impl Stream for QuicStream {
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.inner.write_all(payload).await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.inner
            .finish()
            .await
            .map_err(|e| Error::ReadStream(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct NoopHandler;
    #[async_trait]
    impl InboundHandler for NoopHandler {
        async fn handle_request(&self, _from: String, payload: Vec<u8>) -> Result<Vec<u8>> {
            Ok(payload)
        }
        async fn handle_stream_frame(&self, _from: String, _payload: Vec<u8>) {}
    }

    #[tokio::test]
    async fn disable_tls_for_testing_skips_the_provisioned_pki() {
        // Deliberately bogus paths: with TLS disabled these must never be read.
        let bogus = PathBuf::from("/nonexistent/does-not-exist");
        let server = QuicTransport::new("127.0.0.1:0".parse().unwrap(), &bogus, &bogus, &bogus, true)
            .expect("insecure transport construction must not touch the PKI paths");
        let server_addr = server.local_addr().unwrap();

        let shutdown = CancellationToken::new();
        let server_shutdown = shutdown.clone();
        let server_task = tokio::spawn(async move {
            server.serve(Arc::new(NoopHandler), server_shutdown).await.unwrap();
        });
        tokio::task::yield_now().await;

        let client = QuicTransport::new("127.0.0.1:0".parse().unwrap(), &bogus, &bogus, &bogus, true)
            .unwrap();
        let conn = client
            .dial(&server_addr.to_string(), Duration::from_secs(5))
            .await
            .expect("insecure client must connect without verifying a CA");
        let reply = conn.open_request(b"ping".to_vec()).await.unwrap();
        assert_eq!(reply, b"ping");

        shutdown.cancel();
        server_task.await.unwrap();
    }
}
