//! Supervision of all agents belonging to one engine instance.
//!
//! Startup is strictly sequential: one failing agent must not leave
//! siblings in an ambiguous partially-started state, so [`start_all`] rolls
//! back everything it started on the first failure. Teardown is the
//! opposite discipline — best-effort, idempotent, and ordered: every step
//! of [`kill_one`] is wrapped independently so a failure in one never
//! blocks the next.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

use crate::config::{AgentConfig, InstanceConfig};
use crate::connector;
use crate::context::{AgentContext, Slot};
use crate::engine::{ClientFactory, LogSink, LogStyle, Tasker};
use crate::process::format_exit;
use crate::{AppError, Result};

/// Grace period for the process kill during teardown.
const TEARDOWN_KILL_GRACE: Duration = Duration::from_secs(5);

/// Slot holding the shared engine handle until [`kill_all`] disposes it.
pub type TaskerSlot = Slot<Arc<dyn Tasker>>;

/// Whether any config in `configs` names an executable.
#[must_use]
pub fn has_agent_configs(configs: &[AgentConfig]) -> bool {
    configs.iter().any(AgentConfig::has_executable)
}

/// Start every configured agent, strictly sequentially.
///
/// Configs without an executable are skipped; when none remain the call
/// returns an empty list with no side effects. Startup is all-or-nothing:
/// the first failure kills every context started so far.
///
/// # Errors
///
/// Returns [`AppError::Cancelled`] when `cancel` fires mid-startup, after
/// rollback. Any other per-agent failure is logged, forwarded to `sink`,
/// and reported as an empty list rather than an error.
pub async fn start_all(
    configs: &[AgentConfig],
    instance: &InstanceConfig,
    sink: Arc<dyn LogSink>,
    factory: Arc<dyn ClientFactory>,
    base_dir: &Path,
    cancel: &CancellationToken,
) -> Result<Vec<Arc<AgentContext>>> {
    let runnable: Vec<&AgentConfig> = configs.iter().filter(|c| c.has_executable()).collect();
    if runnable.is_empty() {
        return Ok(Vec::new());
    }

    let span = info_span!("start_all", count = runnable.len());
    let _guard = span.enter();
    info!(count = runnable.len(), "starting agent processes");

    let mut started: Vec<Arc<AgentContext>> = Vec::new();
    for config in runnable {
        if cancel.is_cancelled() {
            kill_started(&mut started).await;
            return Err(AppError::Cancelled);
        }

        let outcome = connector::start_one(
            config,
            instance,
            Arc::clone(&sink),
            Arc::clone(&factory),
            base_dir,
            cancel,
        )
        .await;

        match outcome {
            Ok(ctx) => started.push(ctx),
            Err(AppError::Cancelled) => {
                info!("agent startup cancelled, rolling back");
                kill_started(&mut started).await;
                return Err(AppError::Cancelled);
            }
            Err(err) => {
                warn!(%err, "agent startup failed, rolling back");
                sink.add_log(&err.to_string(), LogStyle::Error);
                kill_started(&mut started).await;
                return Ok(Vec::new());
            }
        }
    }

    info!(count = started.len(), "all agents started");
    Ok(started)
}

/// Kill every context in `started`, clearing the list.
async fn kill_started(started: &mut Vec<Arc<AgentContext>>) {
    for ctx in started.drain(..) {
        kill_one(&ctx).await;
    }
}

/// Tear down one agent. Idempotent and best-effort: a second call on the
/// same context is a no-op, and no individual step failure stops the rest.
///
/// Order: stop the stream readers; capture-and-null the client and process
/// references so concurrently firing exit/releasing callbacks observe
/// teardown; gracefully stop the link; kill the process; release the
/// process group.
pub async fn kill_one(ctx: &AgentContext) {
    let identifier = ctx.identifier();

    ctx.stop_readers();

    let client = ctx.client.take();
    let process = ctx.process.take();

    if let Some(client) = client {
        if client.is_invalid() {
            debug!(identifier, "link client already invalid, skipping stop");
        } else if let Err(err) = client.link_stop().await {
            debug!(identifier, %err, "link stop failed during teardown (ignored)");
        }
    }

    if let Some(child) = process {
        kill_captured_process(identifier, child, TEARDOWN_KILL_GRACE).await;
    }

    if let Some(mut group) = ctx.group.take() {
        group.release();
    }

    debug!(identifier, "agent context torn down");
}

/// Kill every context, then stop and dispose the shared engine handle
/// exactly once.
///
/// An already-empty `tasker` slot (a repeated call, or a caller that never
/// installed a handle) is treated as already disposed, not as an error.
pub async fn kill_all(contexts: &mut Vec<Arc<AgentContext>>, tasker: &TaskerSlot) {
    let span = info_span!("kill_all", count = contexts.len());
    let _guard = span.enter();

    kill_started(contexts).await;

    let Some(tasker) = tasker.take() else {
        debug!("engine handle already disposed");
        return;
    };
    if tasker.is_running() && !tasker.is_stopping() {
        if let Err(err) = tasker.stop().await {
            warn!(%err, "engine stop failed during shutdown (ignored)");
        }
    }
    drop(tasker);
    info!("engine handle disposed");
}

/// Cancel and clear the stream-reader token of every context.
pub fn stop_all_read_streams(contexts: &[Arc<AgentContext>]) {
    for ctx in contexts {
        ctx.stop_readers();
    }
}

/// Kill a process captured out of its context slot, waiting up to `grace`
/// for it to die, then dispose the handle regardless of outcome.
///
/// Defensive throughout: an already-exited process and an unavailable
/// handle are both treated as success.
pub(crate) async fn kill_captured_process(identifier: &str, mut child: Child, grace: Duration) {
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(identifier, status = %format_exit(status), "process already exited");
            return;
        }
        Ok(None) => {}
        Err(err) => {
            debug!(identifier, %err, "process handle unavailable during kill (ignored)");
            return;
        }
    }

    if let Err(err) = child.start_kill() {
        debug!(identifier, %err, "kill signal failed (ignored)");
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(identifier, status = %format_exit(status), "process killed");
        }
        Ok(Err(err)) => warn!(identifier, %err, "error waiting for killed process"),
        Err(_) => warn!(identifier, ?grace, "process did not exit within grace period"),
    }
    drop(child);
}
