//! src/identity.rs
//!
//! Cryptographic identity: a signing keypair plus the self-describing
//! `NodeId` derived from it. `NodeId` carries a `Role` byte so a raw ID
//! cannot be confused across roles (mirrors the source's `id.ID`, which
//! embeds a role byte after the digest).

use crate::error::{Error, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{fmt, fs, io, path::Path};

/// Role a `NodeId` was minted for. Kept distinct from the transport-level
/// `ConnectionType` in `config.rs`: a Role describes who the peer is, a
/// ConnectionType describes how we talk to them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Role {
    Generic = 0,
    Gateway = 1,
    Node = 2,
    User = 3,
}

impl Role {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(Role::Generic),
            1 => Ok(Role::Gateway),
            2 => Ok(Role::Node),
            3 => Ok(Role::User),
            _ => Err(Error::InvalidKeyFile),
        }
    }
}

/// A unique, self-describing identifier: a 32-byte digest plus a trailing
/// role byte, so two IDs with the same digest but different roles never
/// compare equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    digest: [u8; 32],
    role: Role,
}

impl NodeId {
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Serializes to the wire form carried in `AuthenticatedMessage.id`.
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(33);
        out.extend_from_slice(&self.digest);
        out.push(self.role as u8);
        out
    }

    pub fn unmarshal(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 33 {
            return Err(Error::MalformedMessage(format!(
                "expected 33-byte id, got {}",
                bytes.len()
            )));
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&bytes[..32]);
        Ok(Self {
            digest,
            role: Role::from_byte(bytes[32])?,
        })
    }

    /// Derives the ID a dynamic client claims: `sha256(public_key || salt ||
    /// role)`, mirroring the source's `xx.NewID(pubKey, salt, role)`.
    pub fn derive(public_key_bytes: &[u8], salt: &[u8], role: Role) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(public_key_bytes);
        hasher.update(salt);
        hasher.update([role as u8]);
        let digest: [u8; 32] = hasher.finalize().into();
        Self { digest, role }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node::{}", hex::encode(&self.digest[..4]))
    }
}

/// This node's cryptographic identity: a keypair plus the `NodeId` derived
/// from its public half.
#[derive(Debug)]
pub struct Identity {
    keypair: SigningKey,
    pub node_id: NodeId,
}

impl Identity {
    pub fn new(role: Role) -> Self {
        let mut csprng = OsRng;
        let keypair = SigningKey::generate(&mut csprng);
        let node_id = Self::derive_self_id(&keypair, role);
        Self { keypair, node_id }
    }

    /// Loads an identity from a file, creating one (role `Node`) if the
    /// file doesn't exist yet.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        match fs::read(path.as_ref()) {
            Ok(bytes) => {
                let keypair_bytes: [u8; 32] =
                    bytes.try_into().map_err(|_| Error::InvalidKeyFile)?;
                let keypair = SigningKey::from_bytes(&keypair_bytes);
                let node_id = Self::derive_self_id(&keypair, Role::Node);
                Ok(Self { keypair, node_id })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let identity = Self::new(Role::Node);
                fs::write(path.as_ref(), identity.keypair.to_bytes())?;
                Ok(identity)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn derive_self_id(keypair: &SigningKey, role: Role) -> NodeId {
        // No salt for self-identity: the salt mechanism exists so an
        // unknown dynamic peer can prove the ID it claims, not for our
        // own well-known identity.
        NodeId::derive(keypair.verifying_key().as_bytes(), &[], role)
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.keypair.verifying_key().to_bytes()
    }

    /// Signs an arbitrary byte payload. Used both for `SignedMessage` and
    /// for signing the `AssignToken` envelope during the handshake.
    pub fn sign_bytes(&self, payload: &[u8]) -> Signature {
        self.keypair.sign(payload)
    }
}

/// Verifies a signature over `payload` against a caller-supplied public key
/// (used when verifying a peer's signature, where we have their key but not
/// their `SigningKey`).
pub fn verify_bytes(public_key_bytes: &[u8; 32], payload: &[u8], signature: &Signature) -> Result<()> {
    let key = VerifyingKey::from_bytes(public_key_bytes)?;
    key.verify(payload, signature).map_err(Error::Crypto)
}
