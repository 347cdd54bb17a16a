//! Per-agent runtime state.
//!
//! Every OS resource owned by a running agent — handshake client, child
//! process, stream-reader cancellation token, process group — lives in its
//! own [`Slot`], a mutex-guarded optional cell. Teardown follows a strict
//! capture-and-null discipline: a resource is taken out of its slot *before*
//! it is acted on, so any concurrently firing callback that observes an
//! empty slot knows teardown is underway and backs off.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::AgentConfig;
use crate::engine::LinkClient;
use crate::process::group::ProcessGroup;

/// Number of recent output lines retained per stream for diagnostics.
const TAIL_CAPACITY: usize = 64;

// ── Slot ──────────────────────────────────────────────────────────────────────

/// Mutex-guarded optional value with explicit take/replace operations.
///
/// The lock is only ever held for pointer-sized swaps or short synchronous
/// closures — never across an await point.
#[derive(Debug, Default)]
pub struct Slot<T>(Mutex<Option<T>>);

#[allow(clippy::must_use_candidate)] // take/replace are called for their side effects.
impl<T> Slot<T> {
    /// Create an empty slot.
    #[must_use]
    pub fn empty() -> Self {
        Self(Mutex::new(None))
    }

    /// Take the value out, leaving the slot empty.
    pub fn take(&self) -> Option<T> {
        self.lock().take()
    }

    /// Store `value`, returning the previous occupant if any.
    pub fn replace(&self, value: T) -> Option<T> {
        self.lock().replace(value)
    }

    /// Whether the slot currently holds no value.
    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    /// Run `f` with mutable access to the optional value while holding the
    /// lock. `f` must not block.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut Option<T>) -> R) -> R {
        f(&mut self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<T>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[allow(clippy::must_use_candidate)]
impl<T: Clone> Slot<T> {
    /// Clone the current occupant without removing it.
    pub fn get(&self) -> Option<T> {
        self.lock().clone()
    }
}

// ── Tail buffer ───────────────────────────────────────────────────────────────

/// Bounded ring of the most recent output lines from one stream.
#[derive(Debug, Default)]
pub struct TailBuffer(Mutex<VecDeque<String>>);

impl TailBuffer {
    /// Append a line, evicting the oldest once [`TAIL_CAPACITY`] is reached.
    pub fn push(&self, line: String) {
        let mut lines = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == TAIL_CAPACITY {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Snapshot the retained lines in stream order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

// ── AgentContext ──────────────────────────────────────────────────────────────

/// Mutable runtime state of one running (or starting) agent.
#[derive(Debug)]
pub struct AgentContext {
    identifier: String,
    config: AgentConfig,
    /// Handshake client; nulled first on teardown to stop races with async
    /// engine callbacks.
    pub(crate) client: Slot<Arc<dyn LinkClient>>,
    /// Child process handle; the exit watcher nulls it asynchronously.
    pub(crate) process: Slot<Child>,
    /// Current cancellation token for the two stream readers; swapped
    /// (cancel-old, issue-new) on each (re)start.
    pub(crate) read_cancel: Slot<CancellationToken>,
    /// Process-group containment handle; lazily created, released once.
    pub(crate) group: Slot<ProcessGroup>,
    /// Exit status recorded by the exit watcher, for failure diagnostics.
    pub(crate) exit_status: Slot<std::process::ExitStatus>,
    pub(crate) stdout_tail: Arc<TailBuffer>,
    pub(crate) stderr_tail: Arc<TailBuffer>,
}

impl AgentContext {
    /// Create the context for one agent startup.
    #[must_use]
    pub fn new(identifier: String, config: AgentConfig) -> Arc<Self> {
        Arc::new(Self {
            identifier,
            config,
            client: Slot::empty(),
            process: Slot::empty(),
            read_cancel: Slot::empty(),
            group: Slot::empty(),
            exit_status: Slot::empty(),
            stdout_tail: Arc::new(TailBuffer::default()),
            stderr_tail: Arc::new(TailBuffer::default()),
        })
    }

    /// Resolved agent identifier used in every log line.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Static launch configuration this context was created from.
    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Whether a child process handle is currently held.
    #[must_use]
    pub fn has_live_process(&self) -> bool {
        !self.process.is_empty()
    }

    /// Recent stdout lines retained for diagnostics, in stream order.
    #[must_use]
    pub fn recent_stdout(&self) -> Vec<String> {
        self.stdout_tail.snapshot()
    }

    /// Recent stderr lines retained for diagnostics, in stream order.
    #[must_use]
    pub fn recent_stderr(&self) -> Vec<String> {
        self.stderr_tail.snapshot()
    }

    /// Cancel the current reader token (if any) and install a fresh one.
    ///
    /// The swap is atomic under the slot lock, so at most one live token
    /// exists per context at any time.
    pub(crate) fn renew_read_token(&self) -> CancellationToken {
        self.read_cancel.with_mut(|slot| {
            if let Some(old) = slot.take() {
                old.cancel();
            }
            let fresh = CancellationToken::new();
            *slot = Some(fresh.clone());
            fresh
        })
    }

    /// Cancel and clear the reader token. Idempotent.
    pub(crate) fn stop_readers(&self) {
        if let Some(token) = self.read_cancel.take() {
            token.cancel();
            debug!(identifier = self.identifier, "stream readers stopped");
        }
    }
}
