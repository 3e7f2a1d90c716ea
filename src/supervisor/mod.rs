//! Supervision of external executables.
//!
//! Every ledger component runs as its own operating-system process. This module spawns
//! them, decides when they are ready, drains their output and tears them down.

pub mod error;
pub mod probe;
pub mod process;

pub use error::SupervisorError;
pub use probe::{AllOf, Check, HttpStatus, ReadinessProbe};
pub use process::{ProcessSpec, ProcessState, Supervisor, POLL_INTERVAL};
