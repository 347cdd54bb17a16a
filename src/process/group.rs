//! Process-group containment for agent process trees.
//!
//! The first agent process spawned for a context becomes the leader of a
//! fresh OS process group; any process spawned later for the same context
//! (handshake retries) joins the existing group. Releasing the
//! [`ProcessGroup`] kills every remaining member, so no grandchild survives
//! the supervisor.
//!
//! Binding is best-effort throughout: a failure to stage or record the
//! group is logged and leaves the context's group slot empty, but never
//! aborts agent startup.
//!
//! On non-Unix targets containment degrades to a logged no-op.

use tokio::process::Command;
use tracing::debug;
#[cfg(unix)]
use tracing::warn;

use crate::context::Slot;

#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::{getpgrp, Pid};

/// Owned handle to an OS process group. Released exactly once; dropping an
/// unreleased handle releases it.
#[derive(Debug)]
pub struct ProcessGroup {
    #[cfg(unix)]
    pgid: Pid,
    released: bool,
}

impl ProcessGroup {
    /// Record the group led by the freshly spawned process `pid`.
    #[cfg(unix)]
    fn from_leader(pid: u32) -> Option<Self> {
        let raw = i32::try_from(pid).ok()?;
        Some(Self {
            pgid: Pid::from_raw(raw),
            released: false,
        })
    }

    /// Whether the group still has at least one member process.
    #[cfg(unix)]
    fn is_alive(&self) -> bool {
        killpg(self.pgid, None).is_ok()
    }

    /// Kill all member processes and invalidate the handle.
    ///
    /// Idempotent; secondary errors (group already gone) are swallowed.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        #[cfg(unix)]
        {
            // Never signal our own group.
            if self.pgid == getpgrp() {
                warn!(pgid = self.pgid.as_raw(), "refusing to kill own process group");
                return;
            }
            match killpg(self.pgid, Signal::SIGKILL) {
                Ok(()) => debug!(pgid = self.pgid.as_raw(), "process group killed"),
                Err(err) => {
                    debug!(pgid = self.pgid.as_raw(), %err, "process group already gone");
                }
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.release();
    }
}

/// Stage group membership on `cmd` before it is spawned.
///
/// With a live group recorded in `slot`, the new process is spawned
/// directly into it; otherwise the new process is spawned as the leader of
/// a fresh group (a dead recorded group is released and discarded first).
/// Staging at spawn time closes the `setpgid`-after-`exec` race a
/// parent-side assignment would have.
pub fn stage(slot: &Slot<ProcessGroup>, cmd: &mut Command) {
    #[cfg(unix)]
    slot.with_mut(|occupant| match occupant {
        Some(group) if group.is_alive() => {
            cmd.process_group(group.pgid.as_raw());
        }
        other => {
            if let Some(mut dead) = other.take() {
                debug!("discarding dead process group before respawn");
                dead.release();
            }
            cmd.process_group(0);
        }
    });

    #[cfg(not(unix))]
    {
        let _ = (slot, cmd);
        debug!("process-group containment unavailable on this platform");
    }
}

/// Record the group of the freshly spawned process `pid` in `slot`.
///
/// Lazy-create: only the first bind per context stores a handle; later
/// binds joined the existing group at spawn time and are logged only.
pub fn bind(slot: &Slot<ProcessGroup>, identifier: &str, pid: u32) {
    #[cfg(unix)]
    slot.with_mut(|occupant| {
        if occupant.is_some() {
            debug!(identifier, pid, "process joined existing group");
            return;
        }
        match ProcessGroup::from_leader(pid) {
            Some(group) => {
                debug!(identifier, pid, "process group created");
                *occupant = Some(group);
            }
            None => warn!(identifier, pid, "could not record process group"),
        }
    });

    #[cfg(not(unix))]
    let _ = (slot, identifier, pid);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
