//! Application state shared across handlers.

use ferrite_core::ports::{BuildStore, ConfigStore};
use ferrite_scheduler::Scheduler;
use std::sync::Arc;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub builds: Arc<dyn BuildStore>,
    pub config: Arc<dyn ConfigStore>,
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    pub fn new(
        builds: Arc<dyn BuildStore>,
        config: Arc<dyn ConfigStore>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            builds,
            config,
            scheduler,
        }
    }
}
