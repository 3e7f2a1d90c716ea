//! # Protocol Engine
//!
//! Builds, signs and interprets the binary messages the control plane exchanges with the
//! ledger: genesis blocks, channel config updates, block seeks, proposals and endorsed
//! transactions.
//!
//! ## Architecture Note
//! Nothing in here owns a connection. Every operation that talks to the ledger takes a
//! capability from [`crate::framework`] ([`Deliverer`](crate::framework::Deliverer),
//! [`Broadcaster`](crate::framework::Broadcaster) or [`Endorser`](crate::framework::Endorser)),
//! so the same code runs against live gRPC connections and against
//! [`MockLedger`](crate::framework::mock::MockLedger) in tests.
//!
//! ## Layout
//! - [`txid`], [`builder`]: transaction IDs and the header/payload/envelope framing.
//! - [`policy`], [`msp`]: policy encodings and per-organization config groups.
//! - [`genesis`]: block 0 of the ordering service's system channel.
//! - [`configtx`]: structural diff between two configuration trees.
//! - [`channel`]: channel options, creation and update.
//! - [`blocks`]: single-block seeks and commit confirmation.
//! - [`proposal`]: proposals, endorsement collection and transaction assembly.

pub mod blocks;
pub mod builder;
pub mod channel;
pub mod configtx;
mod error;
pub mod genesis;
pub mod msp;
pub mod policy;
pub mod proposal;
pub mod txid;

pub use blocks::SeekBehavior;
pub use channel::ChannelOption;
pub use error::ProtocolError;
pub use msp::MspDefinition;
pub use proposal::{Invocation, PreparedProposal};
pub use txid::TransactionId;
