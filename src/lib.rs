#![forbid(unsafe_code)]

//! Agent process supervisor for an automation engine.
//!
//! Launches, handshakes with, monitors, retries, and tears down external
//! helper ("agent") child processes that extend the engine with
//! user-supplied executables. The embedding shell supplies the engine-side
//! collaborators ([`engine::LinkClient`], [`engine::LogSink`],
//! [`engine::Tasker`]); this crate owns process lifecycle, process-group
//! containment, multi-encoding log capture, and best-effort teardown.

pub mod config;
pub mod connector;
pub mod context;
pub mod engine;
pub mod errors;
pub mod process;
pub mod stream;
pub mod supervisor;

pub use config::{AgentConfig, InstanceConfig};
pub use context::AgentContext;
pub use errors::{AppError, Result};
