//! Per-connection sessions and the registry that tracks them.

mod controller;
mod registry;

pub use controller::{Outbound, SessionController, SessionDeps, OUTBOUND_CAPACITY};
pub use registry::spawn_registry;
