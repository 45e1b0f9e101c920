//! src/host/mod.rs
//!
//! `Host`: the connection state machine for one remote peer. Grounded on
//! `original_source/connect/host.go`'s `Host`/`newHost`/`transmit`/
//! `connect`/`disconnect`/`conditionalDisconnect`.

pub mod backoff;
pub mod cooloff;

use crate::error::{Error, Result, PROXY_ERROR};
use crate::host::cooloff::CoolOffBucket;
use crate::identity::NodeId;
use crate::metrics::{Metric, MovingAvg, MovingAvgParams};
use crate::token::Live;
use crate::transport::{Connection, Transport};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Whether a Host is reached over the native transport or the web-framed
/// variant (the multiplexed-listener analogue of the source's
/// `ConnectionType`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionType {
    Native,
    Web,
}

/// Immutable per-host configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostParams {
    /// 0 means effectively unbounded.
    pub max_retries: u32,
    pub auth_enabled: bool,
    pub enable_cool_off: bool,
    pub num_sends_before_cool_off: u32,
    pub cool_off_timeout: Duration,
    pub send_timeout: Duration,
    pub enable_metrics: bool,
    pub exclude_metric_errors: Vec<String>,
    pub connection_type: ConnectionType,
    pub disable_lazy_connection: bool,
    pub proxy_error_metric_params: MovingAvgParams,
}

impl Default for HostParams {
    fn default() -> Self {
        Self {
            max_retries: 100,
            auth_enabled: true,
            enable_cool_off: false,
            num_sends_before_cool_off: 3,
            cool_off_timeout: Duration::from_secs(60),
            send_timeout: Duration::from_secs(30),
            enable_metrics: true,
            exclude_metric_errors: Vec::new(),
            connection_type: ConnectionType::Native,
            disable_lazy_connection: true,
            proxy_error_metric_params: MovingAvgParams::default(),
        }
    }
}

struct ConnState {
    connection: Option<Arc<dyn Connection>>,
    generation: u64,
}

/// One instance per remote peer this process may talk to.
pub struct Host {
    pub id: NodeId,
    address: RwLock<String>,
    certificate: Vec<u8>,
    verifying_key: Option<[u8; 32]>,
    reception_token: Live,
    transmission_token: Live,
    conn: RwLock<ConnState>,
    metrics: Metric,
    proxy_error_metric: MovingAvg,
    cool_off: Option<CoolOffBucket>,
    params: HostParams,
    window_size: AtomicI32,
    dynamic: bool,
}

impl Host {
    /// Mirrors `newHost`: builds reception/transmission token cells,
    /// conditionally creates the cool-off bucket, and refuses to
    /// construct a host with no certificate unless the caller explicitly
    /// allows it (the `allow_no_tls` escape hatch is for tests only).
    pub fn new(
        id: NodeId,
        address: String,
        certificate: Vec<u8>,
        verifying_key: Option<[u8; 32]>,
        params: HostParams,
        dynamic: bool,
        allow_no_tls: bool,
    ) -> Result<Self> {
        if certificate.is_empty() && !allow_no_tls {
            return Err(Error::TlsConfig(
                "Host requires a certificate unless TLS is explicitly disabled for testing"
                    .to_string(),
            ));
        }
        let cool_off = params.enable_cool_off.then(|| {
            CoolOffBucket::new(params.num_sends_before_cool_off, params.cool_off_timeout)
        });
        Ok(Self {
            id,
            address: RwLock::new(address),
            certificate,
            verifying_key,
            reception_token: Live::new(),
            transmission_token: Live::new(),
            conn: RwLock::new(ConnState {
                connection: None,
                generation: 0,
            }),
            metrics: Metric::new(params.exclude_metric_errors.clone()),
            proxy_error_metric: MovingAvg::new(params.proxy_error_metric_params),
            cool_off,
            params,
            window_size: AtomicI32::new(0),
            dynamic,
        })
    }

    pub fn address(&self) -> String {
        self.address.read().unwrap().clone()
    }

    pub fn update_address(&self, new_address: String) {
        *self.address.write().unwrap() = new_address;
    }

    pub fn verifying_key(&self) -> Option<&[u8; 32]> {
        self.verifying_key.as_ref()
    }

    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    pub fn transmission_token(&self) -> &Live {
        &self.transmission_token
    }

    pub fn reception_token(&self) -> &Live {
        &self.reception_token
    }

    pub fn params(&self) -> &HostParams {
        &self.params
    }

    pub fn is_dynamic_host(&self) -> bool {
        self.dynamic
    }

    pub fn is_web(&self) -> bool {
        self.params.connection_type == ConnectionType::Web
    }

    pub fn set_window_size(&self, size: i32) {
        self.window_size.store(size, Ordering::SeqCst);
    }

    pub fn window_size(&self) -> i32 {
        self.window_size.load(Ordering::SeqCst)
    }

    fn authentication_required(&self) -> bool {
        self.params.auth_enabled && !self.transmission_token.has()
    }

    /// `connected()`: connection alive AND (AuthEnabled ⇒ transmission
    /// token present). Returns the connection generation alongside.
    pub fn connected(&self) -> (bool, u64) {
        let state = self.conn.read().unwrap();
        let alive = state
            .connection
            .as_ref()
            .map(|c| c.is_alive())
            .unwrap_or(false);
        (alive && !self.authentication_required(), state.generation)
    }

    /// Non-TLS TCP probe with a five-second timeout; closes the probe
    /// socket immediately. Returns `(latency, reachable)`.
    pub async fn is_online(&self) -> (Duration, bool) {
        let address = self.address();
        let start = std::time::Instant::now();
        match tokio::time::timeout(
            Duration::from_secs(5),
            tokio::net::TcpStream::connect(&address),
        )
        .await
        {
            Ok(Ok(_stream)) => (start.elapsed(), true),
            _ => (start.elapsed(), false),
        }
    }

    /// Forces a (re)connect under the write lock, retrying with
    /// step-function backoff until the connection is alive or
    /// `MaxRetries` attempts have been made.
    pub async fn connect(&self, transport: &dyn Transport) -> Result<()> {
        let address = self.address();
        if address.is_empty() {
            return Err(Error::BlankAddress);
        }
        if let Some(bucket) = &self.cool_off {
            if bucket.in_cool_off() {
                return Err(Error::Other(format!(
                    "host {address} is cooling off, refusing to connect"
                )));
            }
        }

        let mut attempt: u32 = 0;
        loop {
            let deadline = backoff::backoff_duration(attempt);
            match transport.dial(&address, deadline).await {
                Ok(connection) => {
                    let mut state = self.conn.write().unwrap();
                    state.connection = Some(Arc::from(connection));
                    state.generation += 1;
                    drop(state);
                    if let Some(bucket) = &self.cool_off {
                        bucket.record_success();
                    }
                    return Ok(());
                }
                Err(e) => {
                    if let Some(bucket) = &self.cool_off {
                        bucket.record_failure();
                    }
                    attempt += 1;
                    if self.params.max_retries != 0 && attempt >= self.params.max_retries {
                        tracing::warn!(%address, error = %e, "exhausted connect retries");
                        return Err(Error::ConnectRetriesExhausted(address));
                    }
                }
            }
        }
    }

    /// Clears the connection and the transmission token. Idempotent.
    pub fn disconnect(&self) {
        let mut state = self.conn.write().unwrap();
        state.connection = None;
        drop(state);
        self.transmission_token.clear();
    }

    /// A no-op unless `generation` still matches the current connection
    /// generation at the moment the write lock is acquired.
    pub fn conditional_disconnect(&self, generation: u64) {
        let mut state = self.conn.write().unwrap();
        if state.generation != generation {
            return;
        }
        state.connection = None;
        drop(state);
        self.transmission_token.clear();
    }

    /// Ensures a live connection exists (connecting lazily if needed),
    /// then invokes `f` against it, updating metrics and the proxy-error
    /// moving average on failure.
    pub async fn transmit<F, Fut, T>(&self, transport: &dyn Transport, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn Connection>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let existing = {
            let state = self.conn.read().unwrap();
            state.connection.clone()
        };
        let connection = match existing {
            Some(c) if c.is_alive() => c,
            _ => {
                self.connect(transport).await?;
                let state = self.conn.read().unwrap();
                match &state.connection {
                    Some(c) => c.clone(),
                    None => return Err(Error::HostDisconnected),
                }
            }
        };

        match f(connection).await {
            Ok(value) => Ok(value),
            Err(e) => Err(self.record_transmit_error(e)),
        }
    }

    fn record_transmit_error(&self, error: Error) -> Error {
        let text = error.to_string();
        if self.params.enable_metrics {
            self.metrics.record(&text);
        }
        if text.contains(PROXY_ERROR) {
            let tripped = self.proxy_error_metric.record(1.0);
            if tripped {
                return Error::TooManyProxyError(text);
            }
        }
        error
    }

    /// Deep-copies the current error count and resets it.
    pub fn get_metrics(&self) -> u64 {
        self.metrics.get_and_reset()
    }
}
