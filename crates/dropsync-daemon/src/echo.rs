//! Echo suppression for nodes whose watched folder is also the drop folder.
//!
//! The Receiver records each name it creates; the Sender skips the first
//! watcher event for a recorded name.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone, Default)]
pub struct EchoGuard {
    names: Arc<Mutex<HashSet<String>>>,
}

impl EchoGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn names(&self) -> MutexGuard<'_, HashSet<String>> {
        match self.names.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Remember that `name` was just materialized from the peer.
    pub fn record(&self, name: &str) {
        self.names().insert(name.to_string());
    }

    /// Consume a recorded name. True if the event is an echo.
    pub fn take(&self, name: &str) -> bool {
        self.names().remove(name)
    }
}
