//! src/config.rs
//!
//! Strongly-typed runtime configuration, loaded from defaults, an
//! optional `config.toml`, and `COMMS_`-prefixed environment variables
//! via `figment` — the same defaults/file/env layering throughout, extended with the
//! knobs this core needs so retry/backoff/cool-off/gossip timing is
//! tunable without recompiling.

use crate::gossip::ManagerFlags;
use crate::host::{ConnectionType, HostParams};
use crate::metrics::MovingAvgParams;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub identity_path: PathBuf,
    pub listen_addr: SocketAddr,
    pub ca_cert_path: PathBuf,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Binds the read-only JSON status endpoint when set; omitted by
    /// default, since a deployment has no reason to expose it unasked.
    pub status_addr: Option<SocketAddr>,
    pub default_host_params: HostParams,
    pub gossip_manager_flags: GossipManagerFlagsConfig,
    /// Bypasses QUIC transport TLS entirely; real deployments must never
    /// set this.
    pub disable_tls_for_testing: bool,
    /// Bypasses signature verification in the auth handshake; real
    /// deployments must never set this.
    pub disable_auth_for_testing: bool,
}

/// Millisecond-granularity mirror of `gossip::ManagerFlags`, since
/// `figment`/TOML read plain integers more naturally than `Duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipManagerFlagsConfig {
    pub buffer_expiration_ms: u64,
    pub monitor_thread_frequency_ms: u64,
}

impl From<GossipManagerFlagsConfig> for ManagerFlags {
    fn from(cfg: GossipManagerFlagsConfig) -> Self {
        ManagerFlags {
            buffer_expiration: Duration::from_millis(cfg.buffer_expiration_ms),
            monitor_thread_frequency: Duration::from_millis(cfg.monitor_thread_frequency_ms),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("COMMS_"))
            .extract()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identity_path: PathBuf::from("identity.key"),
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 5800),
            ca_cert_path: PathBuf::from("certs/ca.cert"),
            cert_path: PathBuf::from("certs/node.cert"),
            key_path: PathBuf::from("certs/node.key"),
            status_addr: None,
            default_host_params: HostParams::default(),
            gossip_manager_flags: GossipManagerFlagsConfig {
                buffer_expiration_ms: 300_000,
                monitor_thread_frequency_ms: 150_000,
            },
            disable_tls_for_testing: false,
            disable_auth_for_testing: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn loads_defaults_with_no_config_file() {
        Jail::expect_with(|_jail| {
            let config = Config::load()?;
            assert_eq!(config.listen_addr.port(), 5800);
            assert!(!config.disable_tls_for_testing);
            Ok(())
        });
    }

    #[test]
    fn file_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                listen_addr = "127.0.0.1:9000"
                disable_tls_for_testing = true
                "#,
            )?;
            let config = Config::load()?;
            assert_eq!(config.listen_addr, "127.0.0.1:9000".parse().unwrap());
            assert!(config.disable_tls_for_testing);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", r#"listen_addr = "127.0.0.1:1111""#)?;
            jail.set_env("COMMS_LISTEN_ADDR", "127.0.0.1:9999");
            let config = Config::load()?;
            assert_eq!(config.listen_addr, "127.0.0.1:9999".parse().unwrap());
            Ok(())
        });
    }

    #[test]
    fn gossip_flags_convert_to_durations() {
        let cfg = GossipManagerFlagsConfig {
            buffer_expiration_ms: 1000,
            monitor_thread_frequency_ms: 500,
        };
        let flags: ManagerFlags = cfg.into();
        assert_eq!(flags.buffer_expiration, Duration::from_millis(1000));
        assert_eq!(flags.monitor_thread_frequency, Duration::from_millis(500));
    }
}
