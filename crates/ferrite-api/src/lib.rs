//! HTTP surface for the scheduling control plane: the execution-engine
//! status callback and the trigger-immediately endpoint.

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
