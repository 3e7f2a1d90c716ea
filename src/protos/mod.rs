//! # Ledger Wire Schema
//!
//! Hand-written `prost` definitions for the subset of the ledger's public protobuf
//! schema the control plane speaks. Field numbers and types follow the published
//! `.proto` files exactly, so the encoded bytes interoperate with unmodified ledger
//! nodes. Unknown fields in received messages are skipped by `prost`, which is why
//! some messages here only declare the fields that are read.
//!
//! Maps use `BTreeMap` so encoding is deterministic.

pub mod common;
pub mod msp;
pub mod orderer;
pub mod peer;

use prost::Message;

/// Encodes any message into a fresh buffer.
pub fn marshal<M: Message>(message: &M) -> Vec<u8> {
    message.encode_to_vec()
}
