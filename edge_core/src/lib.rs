//! Supervision and scheduling core for the edge extractor runtime.
//!
//! `edge_core` owns the parts of the system that don't change with
//! deployment environment: camera drivers, processor state tracking, secret
//! resolution, config observation, the integration supervisor, the
//! in-process event bus, and the app manager. CLI wiring, OS-service
//! lifecycle, and the secret cipher implementation live in the
//! `edge_extractor` binary crate.

pub mod app_manager;
pub mod config_observer;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod event_bus;
pub mod models;
pub mod platform;
pub mod secrets;
pub mod state_tracker;
pub mod supervisor;

pub use coordinator::Coordinator;
pub use error::{EdgeError, EdgeResult};
