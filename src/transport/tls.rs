//! src/transport/tls.rs
//!
//! TLS configuration for QUIC using a private PKI: a CA certificate plus
//! this node's own certificate and key, read from configurable paths
//! rather than a hardcoded `certs/` directory. Also provides the
//! construction-time "disable TLS for testing" escape hatch named
//! alongside the disable-auth switch: QUIC mandates a TLS 1.3 handshake,
//! so this can't drop encryption outright, but it can skip the
//! operator-provisioned PKI entirely (ephemeral self-signed cert, no
//! server certificate verification).

use crate::error::{Error, Result};
use crate::transport::ALPN_PROTOCOL;
use quinn::{ClientConfig, ServerConfig};
use std::{fs, path::Path, sync::Arc, time::Duration};

pub fn configure_tls(
    ca_cert_path: &Path,
    node_cert_path: &Path,
    node_key_path: &Path,
) -> Result<(ServerConfig, ClientConfig)> {
    let ca_cert_der = fs::read(ca_cert_path).map_err(|e| {
        Error::TlsConfig(format!("Failed to read CA certificate ({}): {e}", ca_cert_path.display()))
    })?;
    let ca_cert = rustls::Certificate(ca_cert_der);

    let mut root_store = rustls::RootCertStore::empty();
    root_store
        .add(&ca_cert)
        .map_err(|e| Error::TlsConfig(format!("Failed to add CA to root store: {e}")))?;

    let mut rustls_client_config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    rustls_client_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];
    let client_config = ClientConfig::new(Arc::new(rustls_client_config));

    let cert_chain_der = fs::read(node_cert_path).map_err(|e| {
        Error::TlsConfig(format!("Failed to read node certificate ({}): {e}", node_cert_path.display()))
    })?;
    let key_der = fs::read(node_key_path).map_err(|e| {
        Error::TlsConfig(format!("Failed to read node private key ({}): {e}", node_key_path.display()))
    })?;
    let cert_chain = vec![rustls::Certificate(cert_chain_der)];
    let key = rustls::PrivateKey(key_der);

    let mut rustls_server_config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| Error::TlsConfig(format!("Failed to create server config: {e}")))?;
    rustls_server_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];
    let mut server_config = ServerConfig::with_crypto(Arc::new(rustls_server_config));

    let transport_config = Arc::get_mut(&mut server_config.transport).unwrap();
    transport_config.keep_alive_interval(Some(Duration::from_secs(10)));

    Ok((server_config, client_config))
}

/// The "disable TLS for testing" construction-time switch: generates an
/// ephemeral self-signed certificate instead of reading operator-provided
/// PEM files, and configures the client side to skip server certificate
/// verification entirely. Must never be set for a real deployment.
pub fn configure_insecure_tls() -> Result<(ServerConfig, ClientConfig)> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| Error::TlsConfig(format!("Failed to generate ephemeral certificate: {e}")))?;
    let cert_der = cert
        .serialize_der()
        .map_err(|e| Error::TlsConfig(format!("Failed to serialize ephemeral certificate: {e}")))?;
    let key_der = cert.serialize_private_key_der();

    let cert_chain = vec![rustls::Certificate(cert_der)];
    let key = rustls::PrivateKey(key_der);

    let mut rustls_client_config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(NoServerVerification))
        .with_no_client_auth();
    rustls_client_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];
    let client_config = ClientConfig::new(Arc::new(rustls_client_config));

    let mut rustls_server_config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| Error::TlsConfig(format!("Failed to create insecure server config: {e}")))?;
    rustls_server_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];
    let mut server_config = ServerConfig::with_crypto(Arc::new(rustls_server_config));

    let transport_config = Arc::get_mut(&mut server_config.transport).unwrap();
    transport_config.keep_alive_interval(Some(Duration::from_secs(10)));

    Ok((server_config, client_config))
}

/// Accepts any server certificate unconditionally. Only ever installed
/// when the caller has explicitly opted into `configure_insecure_tls`.
struct NoServerVerification;

impl rustls::client::ServerCertVerifier for NoServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}
