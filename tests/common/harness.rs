//! tests/common/harness.rs
//!
//! Shared test scaffolding: generating a private-PKI certificate set (one
//! CA, one leaf cert per node signed by it) and writing it to a temp
//! directory in the layout `transport::tls::configure_tls` expects.

use anyhow::{Context, Result};
use rcgen::{Certificate, CertificateParams, DistinguishedName};
use std::{fs, net::SocketAddr, path::PathBuf};
use tempfile::TempDir;

/// A CA certificate plus one leaf certificate/key signed by it.
#[derive(Clone)]
pub struct CertSet {
    pub ca_cert_der: Vec<u8>,
    pub node_cert_der: Vec<u8>,
    pub node_key_der: Vec<u8>,
}

impl CertSet {
    pub fn write_to_disk(&self, dir: &PathBuf) -> Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join("ca.cert"), &self.ca_cert_der)?;
        fs::write(dir.join("node.cert"), &self.node_cert_der)?;
        fs::write(dir.join("node.key"), &self.node_key_der)?;
        Ok(())
    }
}

/// Generates a new CA and a leaf certificate signed by it, both valid for
/// `domain` (SAN `localhost` is what `QuicTransport::dial` verifies
/// against, since it always connects with server name `"localhost"`).
pub fn generate_certs(domain: &str) -> CertSet {
    let ca_params = CertificateParams::new(vec![domain.to_string()]);
    let ca_cert = Certificate::from_params(ca_params).unwrap();
    let ca_cert_der = ca_cert.serialize_der().unwrap();

    let mut node_params = CertificateParams::new(vec![domain.to_string()]);
    node_params.distinguished_name = DistinguishedName::new();
    let node_cert = Certificate::from_params(node_params).unwrap();
    let node_cert_der = node_cert.serialize_der_with_signer(&ca_cert).unwrap();
    let node_key_der = node_cert.serialize_private_key_der();

    CertSet {
        ca_cert_der,
        node_cert_der,
        node_key_der,
    }
}

/// Writes one node's cert set into its own temp directory, returning the
/// paths `configure_tls` wants plus the directory handle (drop = cleanup).
pub fn cert_dir(certs: &CertSet) -> Result<(TempDir, PathBuf, PathBuf, PathBuf)> {
    let dir = tempfile::tempdir().context("failed to create temp cert dir")?;
    certs.write_to_disk(&dir.path().to_path_buf())?;
    let ca = dir.path().join("ca.cert");
    let cert = dir.path().join("node.cert");
    let key = dir.path().join("node.key");
    Ok((dir, ca, cert, key))
}

/// A bindable, unused loopback address; QUIC transports created with this
/// may race another process for the port, but that's the same tradeoff
/// every ephemeral-port test harness makes.
pub fn ephemeral_addr() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}
