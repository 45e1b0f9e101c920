//! src/auth/mod.rs
//!
//! The reverse-authentication handshake and its wire envelope. Grounded
//! on `original_source/connect/auth.go`: `clientHandshake`,
//! `PackAuthenticatedMessage`, `PackAuthenticatedContext` /
//! `UnpackAuthenticatedContext`, `ValidateToken`, `dynamicAuth`,
//! `AuthenticatedReceiver`, `SignMessage` / `VerifyMessage`.

use crate::error::{Error, Result};
use crate::host::{Host, HostParams};
use crate::identity::{verify_bytes, Identity, NodeId, Role};
use crate::manager::Manager;
use crate::token::TokenStore;
use crate::transport::Transport;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Dynamic-auth block: non-empty only for a client registering itself
/// for the first time.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClientId {
    pub salt: Vec<u8>,
    pub public_key: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssignToken {
    pub token: Vec<u8>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Ping {}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ack {
    pub error: Option<String>,
}

/// The authenticated envelope wrapping every RPC: sender identity,
/// optional signature over the inner message, the attached token, an
/// optional dynamic-client block, and the inner payload bytes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthenticatedMessage {
    pub id: Vec<u8>,
    pub signature: Vec<u8>,
    pub token: Vec<u8>,
    pub client: ClientId,
    pub message: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RpcRequest {
    RequestToken(Ping),
    AuthenticateToken(AuthenticatedMessage),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RpcResponse {
    AssignToken(AssignToken),
    Ack(Ack),
}

/// Result of `AuthenticatedReceiver`: whether the envelope's token
/// matches what this process expects from the claimed sender.
pub struct Auth {
    pub is_authenticated: bool,
    pub sender: Option<Arc<Host>>,
}

fn sign_bytes_raw(identity: &Identity, payload: &[u8]) -> Vec<u8> {
    identity.sign_bytes(payload).to_bytes().to_vec()
}

fn verify_signature(verifying_key: &[u8; 32], payload: &[u8], signature: &[u8]) -> Result<()> {
    let sig_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| Error::InvalidTokenSignature("malformed signature length".to_string()))?;
    let signature = Signature::from_bytes(&sig_bytes);
    verify_bytes(verifying_key, payload, &signature)
        .map_err(|_| Error::InvalidTokenSignature("signature verification failed".to_string()))
}

/// Wraps `inner` (already serialized) in an `AuthenticatedMessage`: sets
/// `ID`/`Token` from the local identity and host, signs it if requested
/// and auth is not disabled.
pub fn pack_authenticated_message(
    inner: Vec<u8>,
    identity: &Identity,
    host: &Host,
    enable_signature: bool,
    disable_auth: bool,
) -> AuthenticatedMessage {
    let signature = if enable_signature && !disable_auth {
        sign_bytes_raw(identity, &inner)
    } else {
        Vec::new()
    };
    AuthenticatedMessage {
        id: identity.node_id.marshal(),
        signature,
        token: host.transmission_token().get().unwrap_or_default(),
        client: ClientId::default(),
        message: inner,
    }
}

/// Stuffs `id`/`token` as base64 into the metadata headers used by
/// streaming calls.
pub fn pack_authenticated_context(id: &NodeId, token: &[u8]) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert("ID".to_string(), BASE64.encode(id.marshal()));
    headers.insert("TOKEN".to_string(), BASE64.encode(token));
    headers
}

/// Inverse of `pack_authenticated_context`.
pub fn unpack_authenticated_context(headers: &HashMap<String, String>) -> Result<(NodeId, Vec<u8>)> {
    let id_b64 = headers.get("ID").ok_or(Error::MissingAuthHeaders)?;
    let token_b64 = headers.get("TOKEN").ok_or(Error::MissingAuthHeaders)?;
    let id_bytes = BASE64
        .decode(id_b64)
        .map_err(|_| Error::MissingAuthHeaders)?;
    let token = BASE64
        .decode(token_b64)
        .map_err(|_| Error::MissingAuthHeaders)?;
    let id = NodeId::unmarshal(&id_bytes)?;
    Ok((id, token))
}

/// Runs the two-phase handshake against `host`: RequestToken then
/// AuthenticateToken. On success the token is stored as the host's
/// transmission token, so subsequent calls need no re-signing.
pub async fn client_handshake(
    identity: &Identity,
    host: &Host,
    transport: &dyn Transport,
    client_id_material: Option<(Vec<u8>, [u8; 32])>,
    disable_auth: bool,
) -> Result<()> {
    let request = RpcRequest::RequestToken(Ping::default());
    let request_bytes = bincode::serialize(&request)?;
    let reply_bytes = host
        .transmit(transport, |conn| async move { conn.open_request(request_bytes).await })
        .await?;
    let response: RpcResponse = bincode::deserialize(&reply_bytes)?;
    let assigned = match response {
        RpcResponse::AssignToken(assigned) => assigned,
        _ => return Err(Error::MalformedMessage("expected AssignToken".to_string())),
    };

    let inner_bytes = bincode::serialize(&assigned)?;
    let mut envelope =
        pack_authenticated_message(inner_bytes.clone(), identity, host, !disable_auth, disable_auth);
    if let Some((salt, public_key)) = client_id_material {
        envelope.client = ClientId {
            salt,
            public_key: public_key.to_vec(),
        };
    }

    let auth_request = RpcRequest::AuthenticateToken(envelope);
    let auth_bytes = bincode::serialize(&auth_request)?;
    let ack_bytes = host
        .transmit(transport, |conn| async move { conn.open_request(auth_bytes).await })
        .await?;
    let response: RpcResponse = bincode::deserialize(&ack_bytes)?;
    match response {
        RpcResponse::Ack(Ack { error: None }) => {
            host.transmission_token().set(assigned.token);
            Ok(())
        }
        RpcResponse::Ack(Ack { error: Some(message) }) => Err(Error::TokenValidationFailed(message)),
        _ => Err(Error::MalformedMessage("expected Ack".to_string())),
    }
}

/// Server-side authenticator: issues tokens, validates handshakes, and
/// registers dynamic hosts on first contact.
pub struct Authenticator {
    manager: Arc<Manager>,
    tokens: Arc<TokenStore>,
    disable_auth: bool,
}

impl Authenticator {
    pub fn new(manager: Arc<Manager>, tokens: Arc<TokenStore>, disable_auth: bool) -> Self {
        Self {
            manager,
            tokens,
            disable_auth,
        }
    }

    /// `RequestToken(Ping) -> AssignToken`.
    pub fn generate_token(&self) -> AssignToken {
        AssignToken {
            token: self.tokens.generate(),
        }
    }

    /// `AuthenticateToken(AuthenticatedMessage) -> Ack`.
    pub fn validate_token(&self, envelope: AuthenticatedMessage) -> Ack {
        match self.validate_token_inner(envelope) {
            Ok(()) => Ack { error: None },
            Err(e) => Ack {
                error: Some(e.to_string()),
            },
        }
    }

    fn validate_token_inner(&self, envelope: AuthenticatedMessage) -> Result<()> {
        let claimed_id = NodeId::unmarshal(&envelope.id)?;

        let host = match self.manager.get_host(&claimed_id) {
            Some(host) => host,
            None => self.dynamic_auth(&envelope, claimed_id)?,
        };

        let assigned: AssignToken = bincode::deserialize(&envelope.message)
            .map_err(|_| Error::MalformedMessage("could not decode AssignToken".to_string()))?;

        if !self.disable_auth {
            let verifying_key = host
                .verifying_key()
                .ok_or_else(|| Error::InvalidTokenSignature("no public key on record".to_string()))?;
            verify_signature(verifying_key, &envelope.message, &envelope.signature)?;
        }

        if !self.tokens.validate(&assigned.token) {
            return Err(Error::TokenValidationFailed(
                "token not recognized by this process".to_string(),
            ));
        }

        host.reception_token().set(assigned.token);
        Ok(())
    }

    /// Accepts a previously unknown peer if it supplies `{public_key,
    /// salt}` whose derived ID matches the one it claims, registering a
    /// dynamic Host for it.
    fn dynamic_auth(&self, envelope: &AuthenticatedMessage, claimed_id: NodeId) -> Result<Arc<Host>> {
        if envelope.client.public_key.is_empty() || envelope.client.salt.is_empty() {
            return Err(Error::InvalidDynamicAuth(
                "missing client salt or public key".to_string(),
            ));
        }
        let public_key: [u8; 32] = envelope
            .client
            .public_key
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidDynamicAuth("malformed public key length".to_string()))?;

        let derived = NodeId::derive(&public_key, &envelope.client.salt, Role::User);
        if derived != claimed_id {
            return Err(Error::IdMismatch {
                expected: derived.to_string(),
                actual: claimed_id.to_string(),
            });
        }

        let host = Arc::new(Host::new(
            claimed_id,
            String::new(),
            Vec::new(),
            Some(public_key),
            HostParams::default(),
            true,
            true,
        )?);
        self.manager.add_host(host.clone());
        Ok(host)
    }

    /// Per-inbound-application-message check: token presence alone is the
    /// authenticator; no signature is re-verified here.
    pub fn authenticated_receiver(&self, id_bytes: &[u8], token: &[u8]) -> Auth {
        let Ok(claimed_id) = NodeId::unmarshal(id_bytes) else {
            return Auth {
                is_authenticated: false,
                sender: None,
            };
        };
        match self.manager.get_host(&claimed_id) {
            None => Auth {
                is_authenticated: false,
                sender: None,
            },
            Some(host) => {
                let authenticated = host.reception_token().get().as_deref() == Some(token);
                Auth {
                    is_authenticated: authenticated,
                    sender: Some(host),
                }
            }
        }
    }
}
