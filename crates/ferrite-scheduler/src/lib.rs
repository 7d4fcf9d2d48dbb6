//! Ferrite Scheduler
//!
//! The pipeline scheduling core: input resolution over a versions snapshot,
//! input mapping persistence, admission-controlled build starting, and the
//! per-tick scheduling loop with its distributed lease.

pub mod algorithm;
pub mod buildstarter;
pub mod inputmapper;
pub mod runner;
pub mod scheduler;

pub use buildstarter::BuildStarter;
pub use inputmapper::InputMapper;
pub use runner::Runner;
pub use scheduler::{Scheduler, Waiter};
