//! Network orchestration and lifecycle management.
//!
//! This module owns everything that happens between loading a [`Config`](crate::model::Config)
//! and a running network:
//!
//! - **Orchestration**: bringing components up stage by stage, and down in reverse
//! - **Persistence**: the bootstrap state that lets an unchanged network restart in place
//! - **Observability setup**: the process-wide tracing subscriber
//!
//! # Main Components
//!
//! - [`Network`] - The orchestrator that owns every started component
//! - [`PortAllocator`] - Hands out listener ports from the internal pool
//! - [`TaskGroup`] - Fan-out with first-failure cancellation
//! - [`setup_tracing`] - Initializes logging

pub mod error;
pub mod network;
pub mod ports;
pub mod state;
pub mod tasks;
pub mod tracing;

pub use error::NetworkError;
pub use network::{Network, Started};
pub use ports::PortAllocator;
pub use state::{PersistedState, STATE_FILE};
pub use tasks::TaskGroup;
pub use tracing::setup_tracing;
