//! Shared server state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tandem_shared::time::Clock;

use crate::registry::RoomRegistry;

/// Shared application state
pub struct AppState {
    /// Registry of all active rooms
    pub registry: RoomRegistry,
    /// Source of connection serials; see [`crate::room::RoomMember`]
    next_connection_serial: AtomicU64,
}

impl AppState {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: RoomRegistry::new(clock),
            next_connection_serial: AtomicU64::new(1),
        }
    }

    /// Allocate a process-unique serial for a new WebSocket connection.
    pub fn allocate_connection_serial(&self) -> u64 {
        self.next_connection_serial.fetch_add(1, Ordering::Relaxed)
    }
}
