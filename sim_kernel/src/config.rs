//! Kernel configuration

use serde::{Deserialize, Serialize};

/// Tunables of the simulated kernel
///
/// Every field has a default, so a JSON override only needs the fields it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Receive buffer size used when a registration gives none
    pub ipc_queue_capacity: usize,
    /// Stack size of tasks created without an explicit size
    pub stack_size: usize,
    /// Simulated ticks charged for each switch into an application task
    pub switch_cost_ticks: u64,
    /// Dispatcher iterations a single kernel poll may run before it is
    /// reported as stalled
    pub max_dispatch_rounds: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            ipc_queue_capacity: 512,
            stack_size: 4096,
            switch_cost_ticks: 1,
            max_dispatch_rounds: 10_000,
        }
    }
}

impl KernelConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
