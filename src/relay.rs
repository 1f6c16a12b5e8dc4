//! Relay set source for mev-boost.
//!
//! Relay discovery is an external subsystem; the supervisor just asks for
//! the current set at session start.

use anyhow::Result;

pub trait Booster {
    fn get_relays(&self) -> Result<Vec<String>>;
}

/// Serves a fixed relay list, typically from configuration.
pub struct StaticBooster {
    relays: Vec<String>,
}

impl StaticBooster {
    pub fn new(relays: Vec<String>) -> Self {
        Self { relays }
    }
}

impl Booster for StaticBooster {
    fn get_relays(&self) -> Result<Vec<String>> {
        Ok(self.relays.clone())
    }
}
