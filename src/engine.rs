//! Collaborator contracts owned by the automation engine.
//!
//! The supervisor never talks to the vision/automation engine directly; it
//! drives four opaque collaborators supplied by the embedding shell:
//!
//! - [`LinkClient`] — performs the connect/link handshake protocol with a
//!   spawned agent process.
//! - [`ClientFactory`] — creates a [`LinkClient`] bound to the transport
//!   selected by the instance configuration. Implementations close over the
//!   shared engine handle, so the supervisor never needs it at startup.
//! - [`LogSink`] — receives decoded agent output lines for display.
//! - [`Tasker`] — the shared engine handle that agents attach to; stopped
//!   and disposed exactly once after all agents are killed.
//!
//! All async trait methods use the boxed-future form so implementations
//! remain object-safe.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::Result;

/// Future returned by the startup method: resolves to the spawned process
/// ID, or `None` when the spawn failed (which fails the handshake attempt).
pub type StartupFuture = Pin<Box<dyn Future<Output = Option<u32>> + Send>>;

/// Deferred process-startup closure handed to [`LinkClient::link_start`].
///
/// The link protocol decides *when* to launch the agent process, so the
/// connector packages the spawn sequence (process, process group, stream
/// readers, exit watcher) into this reinvocable closure.
pub type StartupMethod = Arc<dyn Fn() -> StartupFuture + Send + Sync>;

/// Callback invoked when the engine releases a link client's native handle.
pub type ReleasingCallback = Box<dyn Fn() + Send + Sync>;

/// Handshake transport between the engine and a spawned agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Agent links to the engine inside the shell process.
    InProcess,
    /// Agent links to the engine over a local network endpoint.
    Network,
}

/// Display style tag accompanying a forwarded agent output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStyle {
    /// Ordinary agent output.
    Info,
    /// Agent stderr or other noteworthy output.
    Warning,
    /// Startup failure diagnostics.
    Error,
}

/// Prefix marking engine-internal control lines in agent output.
///
/// Lines carrying this prefix are plumbing between the agent-side runtime
/// and the engine; they are captured for diagnostics but never forwarded to
/// the [`LogSink`].
pub const CONTROL_LINE_PREFIX: &str = "[warden]";

/// Opaque client performing the connect/link protocol with an agent process.
pub trait LinkClient: Send + Sync {
    /// Set the handshake timeout. `None` means unbounded (a negative
    /// configured timeout).
    fn set_timeout(&self, timeout: Option<Duration>);

    /// Run the link protocol: invoke `startup` to launch the agent process,
    /// then perform the handshake, observing `cancel` throughout.
    ///
    /// Returns `Ok(true)` on a completed handshake and `Ok(false)` when the
    /// agent refused or never answered within the timeout.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Fault`](crate::AppError::Fault) for transient
    /// low-level native faults (the supervisor retries these),
    /// [`AppError::Cancelled`](crate::AppError::Cancelled) when `cancel`
    /// fires, and any other variant for non-retryable protocol failures.
    fn link_start(
        &self,
        startup: StartupMethod,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;

    /// Gracefully end an established link.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Link`](crate::AppError::Link) if the stop message
    /// cannot be delivered. Teardown callers swallow this.
    fn link_stop(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Whether the underlying native handle has already been released.
    /// Teardown skips [`LinkClient::link_stop`] on invalid clients.
    fn is_invalid(&self) -> bool;

    /// Register a callback fired when the engine releases the client's
    /// native handle. The supervisor uses this to null its own reference
    /// before the handle disappears.
    fn on_releasing(&self, callback: ReleasingCallback);
}

impl std::fmt::Debug for dyn LinkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LinkClient")
    }
}

/// Factory producing [`LinkClient`] instances for a given transport.
pub trait ClientFactory: Send + Sync {
    /// Create a client identified by `identifier` over `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Link`](crate::AppError::Link) when the engine
    /// cannot allocate a client for the requested transport.
    fn create(&self, transport: Transport, identifier: &str) -> Result<Arc<dyn LinkClient>>;
}

/// Destination for decoded agent output lines.
pub trait LogSink: Send + Sync {
    /// Append one decoded line with its display style.
    fn add_log(&self, text: &str, style: LogStyle);
}

/// Shared engine handle ("tasker") that agents attach to.
///
/// Owned by the caller; the supervisor stops and disposes it exactly once
/// during [`kill_all`](crate::supervisor::kill_all).
pub trait Tasker: Send + Sync {
    /// Whether the engine is currently running tasks.
    fn is_running(&self) -> bool;

    /// Whether an engine stop is already in flight.
    fn is_stopping(&self) -> bool;

    /// Stop the engine.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Engine`](crate::AppError::Engine) if the engine
    /// rejects the stop request. Shutdown callers log and swallow this.
    fn stop(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

impl std::fmt::Debug for dyn Tasker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Tasker")
    }
}
