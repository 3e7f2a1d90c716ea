#![doc(html_logo_url = "https://www.rust-lang.org/logos/rust-logo-128x128.png")]
#![doc(html_favicon_url = "https://www.rust-lang.org/favicon.ico")]
//! # Microfab
//!
//! > **A single-host ledger network, up in one command.**
//!
//! This crate brings up a complete permissioned-ledger network on one machine: an ordering
//! service, one endorsing node and (optionally) one certificate authority per organization,
//! and any number of channels those organizations share. It supervises the server binaries
//! as child processes, talks to them over their gRPC and HTTP protocols, and tears everything
//! down again on SIGINT or SIGTERM.
//!
//! ## Design Philosophy
//!
//! ### Restart in place
//! A network started from an unchanged configuration comes back as the same network.
//! The configuration hash and the CA key material are persisted next to the ledger data;
//! when they match, channels are not recreated and existing identities stay valid.
//!
//! ### Capabilities, not connections
//! The protocol engine never owns a socket. Channel creation, config updates, block seeks and
//! transaction submission are written against the [`Deliverer`](framework::Deliverer),
//! [`Broadcaster`](framework::Broadcaster) and [`Endorser`](framework::Endorser) traits, so
//! the same code runs against live nodes and against [`MockLedger`](framework::mock::MockLedger).
//!
//! ## Architecture Notes
//!
//! ### 1. Type-Safe Error Handling
//! Each module defines its own error type (`ConfigError`, `ProtocolError`, `ComponentError`, ...).
//! The orchestrator wraps failures in [`NetworkError::Stage`](lifecycle::NetworkError::Stage)
//! so the binary can say which stage of start-up failed and why.
//!
//! ### 2. Concurrency Model
//! Independent work (creating organizations, starting components, creating channels) fans out
//! onto Tokio tasks through a [`TaskGroup`](lifecycle::TaskGroup); the first failure cancels
//! its siblings. Each child process is owned by a supervisor task that alone mutates its state.
//!
//! ### 3. Observability
//! `tracing` everywhere with structured fields. See the [`lifecycle::tracing`] module.
//!
//! ## Module Tour
//!
//! ### 1. The Model ([`model`], [`identity`])
//! - **Role**: What a network is made of: configuration, organizations, X509 identities.
//! - **Key items**: [`Config`](model::Config), [`Organization`](model::Organization),
//!   [`Identity`](identity::Identity).
//!
//! ### 2. The Protocol ([`protos`], [`protocol`], [`framework`])
//! - **Role**: Wire messages, genesis and channel config construction, block retrieval.
//! - **Key items**: [`ChannelOption`](protocol::ChannelOption), [`SeekBehavior`](protocol::SeekBehavior).
//!
//! ### 3. The Processes ([`supervisor`], [`components`])
//! - **Role**: Lay each component out on disk, launch it, decide when it is ready.
//! - **Key items**: [`Supervisor`](supervisor::Supervisor), [`PeerNode`](components::PeerNode).
//!
//! ### 4. The Interface ([`clients`], [`console`])
//! - **Role**: gRPC connections to the nodes, the chaincode client, the console API.
//! - **Key items**: [`ChaincodeClient`](clients::ChaincodeClient), [`Console`](console::Console).
//!
//! ### 5. The Orchestrator ([`lifecycle`])
//! - **Role**: Start everything in order, persist what a restart needs, stop everything in reverse.
//! - **Key items**: [`Network`](lifecycle::Network).
//!
//! ## Quick Start
//!
//! ```bash
//! # Defaults: one endorsing organization, one channel, CouchDB and CAs enabled
//! RUST_LOG=info microfab
//!
//! # Two organizations sharing a channel
//! MICROFAB_CONFIG='{"endorsing_organizations":[{"name":"Org1"},{"name":"Org2"}],
//!   "channels":[{"name":"channel1","endorsing_organizations":["Org1","Org2"]}]}' microfab
//! ```
//!
//! ### Running Tests
//!
//! ```bash
//! cargo test
//! ```

pub mod clients;
pub mod components;
pub mod console;
pub mod framework;
pub mod identity;
pub mod lifecycle;
pub mod model;
pub mod protocol;
pub mod protos;
pub mod supervisor;
