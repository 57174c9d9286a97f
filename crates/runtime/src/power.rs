//! Power-control hook
//!
//! Power commands name a rail or GPIO and an action. What that means is up
//! to the platform; the runtime only sequences the calls.

use panel_core::{PowerAction, TransportError};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

pub trait PowerControl {
    fn execute(&mut self, name: &str, action: PowerAction) -> Result<(), TransportError>;
}

/// Platform without controllable power rails; every action succeeds
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPower;

impl PowerControl for NoPower {
    fn execute(&mut self, name: &str, action: PowerAction) -> Result<(), TransportError> {
        debug!(rail = name, %action, "no power control, ignoring");
        Ok(())
    }
}

/// Records actions; clones share the log
#[derive(Debug, Clone, Default)]
pub struct PowerLog {
    actions: Arc<Mutex<Vec<(String, PowerAction)>>>,
}

impl PowerLog {
    pub fn new() -> Self {
        PowerLog::default()
    }

    pub fn actions(&self) -> Vec<(String, PowerAction)> {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PowerControl for PowerLog {
    fn execute(&mut self, name: &str, action: PowerAction) -> Result<(), TransportError> {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.to_string(), action));
        Ok(())
    }
}
