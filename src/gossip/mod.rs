//! src/gossip/mod.rs
//!
//! Tag-scoped pub/sub over the same transport the RPC substrate uses.
//! Grounded on `original_source/gossip/manager.go` and
//! `gossip/functions.go`: a `Manager` holds a tag → `Protocol` map plus a
//! buffer for tags with no registered protocol yet, swept on a timer.

use crate::error::{Error, Result};
use crate::transport::Transport;
use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub type Fingerprint = [u8; 32];

/// A single gossiped unit: a tag identifying the topic, the originating
/// identity, an opaque payload, and its signature.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GossipMsg {
    pub tag: String,
    pub origin: Vec<u8>,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

pub fn fingerprint(msg: &GossipMsg) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(msg.tag.as_bytes());
    hasher.update(&msg.origin);
    hasher.update(&msg.payload);
    hasher.update(&msg.signature);
    hasher.finalize().into()
}

pub type Receiver = Arc<dyn Fn(&GossipMsg) -> Result<()> + Send + Sync>;
pub type SignatureVerification = Arc<dyn Fn(&GossipMsg) -> Result<()> + Send + Sync>;

/// Per-tag state: a fingerprint → seen-count map for de-dup, the static
/// peer list to fan out to, and the receiver/verifier callbacks supplied
/// at registration.
pub struct Protocol {
    tag: String,
    seen: Mutex<HashMap<Fingerprint, u64>>,
    peers: Vec<String>,
    receiver: Receiver,
    verifier: SignatureVerification,
    defunct: AtomicBool,
}

impl Protocol {
    fn new(tag: String, peers: Vec<String>, receiver: Receiver, verifier: SignatureVerification) -> Self {
        Self {
            tag,
            seen: Mutex::new(HashMap::new()),
            peers,
            receiver,
            verifier,
            defunct: AtomicBool::new(false),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    fn mark_defunct(&self) {
        self.defunct.store(true, Ordering::SeqCst);
    }

    /// Processes one inbound message: de-dups by fingerprint, verifies,
    /// delivers at most once, then fans out to every configured peer
    /// except whichever peer relayed it to us.
    pub async fn receive(
        &self,
        transport: &dyn Transport,
        msg: GossipMsg,
        from_addr: Option<&str>,
        send_timeout: Duration,
    ) -> Result<()> {
        if self.defunct.load(Ordering::SeqCst) {
            return Err(Error::ProtocolDefunct(self.tag.clone()));
        }

        let fp = fingerprint(&msg);
        {
            let mut seen = self.seen.lock().unwrap();
            if let Some(count) = seen.get_mut(&fp) {
                *count += 1;
                return Ok(());
            }
        }

        (self.verifier)(&msg)?;

        {
            let mut seen = self.seen.lock().unwrap();
            seen.insert(fp, 1);
        }

        (self.receiver)(&msg)?;

        self.fan_out(transport, &msg, from_addr, send_timeout).await;
        Ok(())
    }

    async fn fan_out(
        &self,
        transport: &dyn Transport,
        msg: &GossipMsg,
        from_addr: Option<&str>,
        send_timeout: Duration,
    ) {
        let Ok(payload) = bincode::serialize(msg) else {
            return;
        };
        let targets: Vec<&String> = self
            .peers
            .iter()
            .filter(|addr| from_addr != Some(addr.as_str()))
            .collect();

        let sends = targets.into_iter().map(|addr| {
            let payload = payload.clone();
            async move {
                let result = tokio::time::timeout(send_timeout, async {
                    let conn = transport.dial(addr, send_timeout).await?;
                    let mut stream = conn.open_stream().await?;
                    stream.send(&payload).await?;
                    stream.finish().await
                })
                .await;
                if let Err(e) = result {
                    tracing::debug!(peer = %addr, error = %e, "gossip fan-out timed out");
                } else if let Ok(Err(e)) = result {
                    tracing::debug!(peer = %addr, error = %e, "gossip fan-out failed");
                }
            }
        });
        futures::future::join_all(sends).await;
    }
}

/// Timing knobs for the buffer sweeper.
#[derive(Clone, Copy, Debug)]
pub struct ManagerFlags {
    pub buffer_expiration: Duration,
    pub monitor_thread_frequency: Duration,
}

impl Default for ManagerFlags {
    fn default() -> Self {
        Self {
            buffer_expiration: Duration::from_secs(300),
            monitor_thread_frequency: Duration::from_secs(150),
        }
    }
}

/// Buffer for gossip messages whose tag has no protocol registered yet:
/// the timestamp of first insertion plus an append-only list, drained in
/// order once a protocol for the tag appears.
struct MessageRecord {
    timestamp: Instant,
    messages: Vec<(GossipMsg, Option<String>)>,
}

pub struct Manager {
    transport: Arc<dyn Transport>,
    protocols: RwLock<HashMap<String, Arc<Protocol>>>,
    buffer: RwLock<HashMap<String, MessageRecord>>,
    flags: ManagerFlags,
    send_timeout: Duration,
}

impl Manager {
    pub fn new(transport: Arc<dyn Transport>, flags: ManagerFlags, send_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            transport,
            protocols: RwLock::new(HashMap::new()),
            buffer: RwLock::new(HashMap::new()),
            flags,
            send_timeout,
        })
    }

    /// Spawns the background sweeper that periodically evicts buffer
    /// entries older than `BufferExpirationTime`.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(manager.flags.monitor_thread_frequency) => {
                        manager.sweep_once();
                    }
                }
            }
        });
    }

    /// One sweep pass, exposed directly so tests don't need to wait on
    /// real time.
    pub fn sweep_once(&self) {
        let expiration = self.flags.buffer_expiration;
        self.buffer
            .write()
            .unwrap()
            .retain(|_, record| record.timestamp.elapsed() < expiration);
    }

    /// Registers a Protocol for `tag` and drains any buffered messages
    /// for it, in insertion order, exactly once.
    pub async fn new_gossip(
        self: &Arc<Self>,
        tag: &str,
        peers: Vec<String>,
        receiver: Receiver,
        verifier: SignatureVerification,
    ) -> Arc<Protocol> {
        let protocol = Arc::new(Protocol::new(tag.to_string(), peers, receiver, verifier));
        self.protocols
            .write()
            .unwrap()
            .insert(tag.to_string(), protocol.clone());

        let buffered = self.buffer.write().unwrap().remove(tag);
        if let Some(record) = buffered {
            for (msg, from_addr) in record.messages {
                let _ = protocol
                    .receive(self.transport.as_ref(), msg, from_addr.as_deref(), self.send_timeout)
                    .await;
            }
        }
        protocol
    }

    pub fn get(&self, tag: &str) -> Option<Arc<Protocol>> {
        self.protocols.read().unwrap().get(tag).cloned()
    }

    pub fn delete(&self, tag: &str) {
        if let Some(protocol) = self.protocols.write().unwrap().remove(tag) {
            protocol.mark_defunct();
        }
    }

    /// Entry point for an inbound `GossipMsg`: delivers immediately if a
    /// Protocol is registered for its tag, otherwise buffers it.
    pub async fn handle_inbound(&self, msg: GossipMsg, from_addr: Option<String>) -> Result<()> {
        let protocol = self.protocols.read().unwrap().get(&msg.tag).cloned();
        match protocol {
            Some(protocol) => {
                protocol
                    .receive(self.transport.as_ref(), msg, from_addr.as_deref(), self.send_timeout)
                    .await
            }
            None => {
                let mut buffer = self.buffer.write().unwrap();
                let record = buffer.entry(msg.tag.clone()).or_insert_with(|| MessageRecord {
                    timestamp: Instant::now(),
                    messages: Vec::new(),
                });
                record.messages.push((msg, from_addr));
                Ok(())
            }
        }
    }
}
