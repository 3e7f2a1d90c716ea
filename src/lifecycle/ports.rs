//! Port allocation for component listeners.

use std::sync::{Mutex, PoisonError};

use tracing::trace;

use crate::model::{ConfigError, PORT_RANGE_END, PORT_RANGE_START};

/// Hands out ports from `[start, end)` in increasing order, never the same one twice.
///
/// Safe to share between concurrently starting components; the counter is the only
/// state behind the lock.
#[derive(Debug)]
pub struct PortAllocator {
    next: Mutex<u16>,
    start: u16,
    end: u16,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(PORT_RANGE_START, PORT_RANGE_END)
    }
}

impl PortAllocator {
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            next: Mutex::new(start),
            start,
            end,
        }
    }

    /// The next free port. Running past the end of the range is fatal; it never wraps.
    pub fn allocate(&self) -> Result<u16, ConfigError> {
        let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
        if *next >= self.end {
            return Err(ConfigError::PortsExhausted {
                start: self.start,
                end: self.end,
            });
        }
        let port = *next;
        *next += 1;
        trace!(port, "Allocated port");
        Ok(port)
    }

    /// `N` ports, allocated one at a time.
    pub fn allocate_many<const N: usize>(&self) -> Result<[u16; N], ConfigError> {
        let mut ports = [0; N];
        for port in &mut ports {
            *port = self.allocate()?;
        }
        Ok(ports)
    }
}
