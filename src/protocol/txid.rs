//! Transaction identifiers.
//!
//! A transaction ID is the lowercase hex SHA-256 of a random 24-byte nonce followed by
//! the creator's serialized identity. The ledger uses it as its dedup key, and the commit
//! confirmation loop polls for it.

use std::fmt;

use prost::Message;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::framework::Signer;
use crate::protos::msp::SerializedIdentity;

const NONCE_LENGTH: usize = 24;

/// A freshly generated transaction ID together with the material it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionId {
    id: String,
    nonce: Vec<u8>,
    creator: Vec<u8>,
}

/// Serializes an MSP ID and certificate into the creator form used in signature headers.
pub fn serialize_identity(msp_id: &str, certificate_pem: &str) -> Vec<u8> {
    SerializedIdentity {
        mspid: msp_id.to_string(),
        id_bytes: certificate_pem.as_bytes().to_vec(),
    }
    .encode_to_vec()
}

impl TransactionId {
    /// Generates a new transaction ID for the signer.
    pub fn new<S: Signer + ?Sized>(signer: &S) -> Self {
        let mut nonce = vec![0u8; NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut nonce);
        let creator = serialize_identity(signer.msp_id(), signer.identity().certificate_pem());
        Self::from_parts(nonce, creator)
    }

    /// Derives the ID for a known nonce and serialized creator.
    pub fn from_parts(nonce: Vec<u8>, creator: Vec<u8>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(&nonce);
        hasher.update(&creator);
        let id = hex::encode(hasher.finalize());
        Self { id, nonce, creator }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }

    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    /// The serialized identity of the creator.
    pub fn creator(&self) -> &[u8] {
        &self.creator
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
