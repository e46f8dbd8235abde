//! Per-session execution over the pipeline graph.

pub mod executor;
pub mod manager;

pub use executor::{SessionNotice, TransportHandle};
pub use manager::SessionManager;
