//! Per-agent startup sequence.
//!
//! [`start_one`] owns everything between an [`AgentConfig`] and a linked
//! [`AgentContext`]:
//!
//! 1. Resolve the agent identifier (configured or generated).
//! 2. Create the handshake client for the instance's transport.
//! 3. Resolve the executable and argument templates; a missing executable
//!    fails immediately and is never retried.
//! 4. Package the spawn sequence (process, process group, stream readers,
//!    exit watcher) into a [`StartupMethod`] the link protocol invokes.
//! 5. Drive the handshake retry loop: up to [`MAX_LINK_ATTEMPTS`] attempts
//!    with linear backoff, killing the stale process between attempts and
//!    recreating the client after transient native faults.
//! 6. On terminal failure, compose aggregated diagnostics (exit status plus
//!    recent output) into a single error.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::process::Command;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{AgentConfig, InstanceConfig};
use crate::context::{AgentContext, TailBuffer};
use crate::engine::{
    ClientFactory, LinkClient, LogSink, LogStyle, StartupMethod, Transport, CONTROL_LINE_PREFIX,
};
use crate::process::{format_exit, group};
use crate::stream::reader::run_line_reader;
use crate::supervisor;
use crate::{AppError, Result};

/// Maximum handshake attempts per agent startup.
pub const MAX_LINK_ATTEMPTS: u32 = 3;

/// Grace period when killing a stale process between handshake attempts.
const RETRY_KILL_GRACE: Duration = Duration::from_secs(3);

/// How long failure diagnostics wait for a live process to exit.
const DIAGNOSTIC_EXIT_WAIT: Duration = Duration::from_secs(3);

/// Exit-watcher polling interval.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Placeholder in executable and argument templates that expands to the
/// application base directory.
pub const APP_DIR_PLACEHOLDER: &str = "{APP_DIR}";

// ── Attempt classification ────────────────────────────────────────────────────

/// Tagged outcome of one handshake attempt.
enum LinkAttempt {
    /// Handshake completed; the agent is linked.
    Linked,
    /// Agent answered but refused the link; retry without client recreation.
    Refused,
    /// Transient low-level fault; kill the context and recreate the client
    /// before the next attempt.
    Transient(AppError),
    /// Non-retryable failure; stop immediately.
    Fatal(AppError),
    /// The overall token fired; propagate without further attempts.
    Cancelled,
}

fn classify(result: Result<bool>, cancel: &CancellationToken) -> LinkAttempt {
    if cancel.is_cancelled() {
        return LinkAttempt::Cancelled;
    }
    match result {
        Ok(true) => LinkAttempt::Linked,
        Ok(false) => LinkAttempt::Refused,
        Err(AppError::Cancelled) => LinkAttempt::Cancelled,
        Err(err) if err.is_transient() => LinkAttempt::Transient(err),
        Err(err) => LinkAttempt::Fatal(err),
    }
}

// ── Startup ───────────────────────────────────────────────────────────────────

/// Start one agent: spawn its process and run the handshake retry loop.
///
/// Returns the fully populated context once the handshake succeeds. Any
/// resource acquired before a terminal failure is torn down before the
/// error is returned.
///
/// # Errors
///
/// - [`AppError::Config`] — the resolved executable does not exist
///   (never retried).
/// - [`AppError::Link`] — the handshake never succeeded; the message
///   aggregates the last error, the process exit status, and recent output.
/// - [`AppError::Cancelled`] — `cancel` fired; the partially started agent
///   has been killed.
#[allow(clippy::too_many_lines)] // The startup sequence is inherently sequential.
pub async fn start_one(
    config: &AgentConfig,
    instance: &InstanceConfig,
    sink: Arc<dyn LogSink>,
    factory: Arc<dyn ClientFactory>,
    base_dir: &Path,
    cancel: &CancellationToken,
) -> Result<Arc<AgentContext>> {
    let identifier = config
        .identifier
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(random_identifier);
    let transport = instance.link_transport();

    let program = resolve_executable(&config.executable, base_dir)?;
    let args = resolve_args(&config.args, base_dir);

    let ctx = AgentContext::new(identifier.clone(), config.clone());
    let mut client = create_client(&factory, transport, &ctx)?;

    info!(identifier, program = %program.display(), ?transport, "starting agent");

    let mut last_error: Option<AppError> = None;
    let mut linked = false;

    for attempt in 0..MAX_LINK_ATTEMPTS {
        if cancel.is_cancelled() {
            supervisor::kill_one(&ctx).await;
            return Err(AppError::Cancelled);
        }

        if attempt > 0 {
            let backoff = Duration::from_millis(u64::from(attempt) * 1000);
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    supervisor::kill_one(&ctx).await;
                    return Err(AppError::Cancelled);
                }
                () = sleep(backoff) => {}
            }
            if let Some(stale) = ctx.process.take() {
                supervisor::kill_captured_process(&identifier, stale, RETRY_KILL_GRACE).await;
            }
        }

        debug!(identifier, attempt, "link attempt");
        let startup = make_startup(&ctx, &program, &args, &sink, cancel);
        let outcome = client.link_start(startup, cancel.clone()).await;

        match classify(outcome, cancel) {
            LinkAttempt::Linked => {
                linked = true;
                break;
            }
            LinkAttempt::Refused => {
                warn!(identifier, attempt, "handshake refused");
                last_error = Some(AppError::Link("handshake refused by agent".into()));
            }
            LinkAttempt::Transient(err) => {
                warn!(identifier, attempt, error = %err, "transient link fault");
                last_error = Some(err);
                if attempt + 1 < MAX_LINK_ATTEMPTS {
                    supervisor::kill_one(&ctx).await;
                    client = create_client(&factory, transport, &ctx)?;
                }
            }
            LinkAttempt::Fatal(err) => {
                warn!(identifier, attempt, error = %err, "link failed");
                last_error = Some(err);
                break;
            }
            LinkAttempt::Cancelled => {
                supervisor::kill_one(&ctx).await;
                return Err(AppError::Cancelled);
            }
        }
    }

    if !linked {
        let diagnostics = gather_failure_diagnostics(&ctx, last_error.as_ref()).await;
        supervisor::kill_one(&ctx).await;
        return Err(AppError::Link(diagnostics));
    }

    info!(identifier, "agent linked");
    Ok(ctx)
}

/// Create a link client, apply the configured timeout, and register the
/// releasing callback that clears the context's client reference.
fn create_client(
    factory: &Arc<dyn ClientFactory>,
    transport: Transport,
    ctx: &Arc<AgentContext>,
) -> Result<Arc<dyn LinkClient>> {
    let client = factory.create(transport, ctx.identifier())?;
    client.set_timeout(ctx.config().link_timeout());

    // Weak back-reference: the callback must not keep a torn-down context
    // alive, and a released client must not resurrect one.
    let weak: Weak<AgentContext> = Arc::downgrade(ctx);
    client.on_releasing(Box::new(move || {
        if let Some(ctx) = weak.upgrade() {
            debug!(identifier = ctx.identifier(), "link client releasing, clearing reference");
            let _ = ctx.client.take();
        }
    }));

    let _ = ctx.client.replace(Arc::clone(&client));
    Ok(client)
}

// ── Resolution helpers ────────────────────────────────────────────────────────

/// Generate an 8-character random alphanumeric agent identifier.
fn random_identifier() -> String {
    Uuid::new_v4().simple().to_string().chars().take(8).collect()
}

fn substitute_placeholders(template: &str, base_dir: &Path) -> String {
    template.replace(APP_DIR_PLACEHOLDER, &base_dir.to_string_lossy())
}

/// Resolve the executable template to an absolute path on disk.
///
/// # Errors
///
/// Returns [`AppError::Config`] when the resolved path is not an existing
/// file; this is a configuration error and is never retried.
pub fn resolve_executable(template: &str, base_dir: &Path) -> Result<PathBuf> {
    let substituted = substitute_placeholders(template, base_dir);
    let path = PathBuf::from(&substituted);
    let path = if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    };
    if path.is_file() {
        Ok(path)
    } else {
        Err(AppError::Config(format!(
            "agent executable not found: {}",
            path.display()
        )))
    }
}

/// Resolve argument templates: substitute placeholders, and pass arguments
/// that name an existing file as absolute paths so the agent receives them
/// unambiguously regardless of its working directory.
#[must_use]
pub fn resolve_args(templates: &[String], base_dir: &Path) -> Vec<String> {
    templates
        .iter()
        .map(|template| {
            let substituted = substitute_placeholders(template, base_dir);
            let candidate = Path::new(&substituted);
            let resolved = if candidate.is_absolute() {
                candidate.to_path_buf()
            } else {
                base_dir.join(candidate)
            };
            if resolved.is_file() {
                resolved.to_string_lossy().into_owned()
            } else {
                substituted
            }
        })
        .collect()
}

// ── Startup method ────────────────────────────────────────────────────────────

/// Package the spawn sequence into the reinvocable closure handed to
/// [`LinkClient::link_start`].
fn make_startup(
    ctx: &Arc<AgentContext>,
    program: &Path,
    args: &[String],
    sink: &Arc<dyn LogSink>,
    cancel: &CancellationToken,
) -> StartupMethod {
    let ctx = Arc::clone(ctx);
    let program = program.to_path_buf();
    let args = args.to_vec();
    let sink = Arc::clone(sink);
    let cancel = cancel.clone();
    Arc::new(move || {
        let ctx = Arc::clone(&ctx);
        let program = program.clone();
        let args = args.clone();
        let sink = Arc::clone(&sink);
        let cancel = cancel.clone();
        Box::pin(async move { launch_agent(ctx, program, args, sink, cancel).await })
    })
}

/// Spawn the agent process and wire up containment, capture, and watching.
///
/// Returns the child PID, or `None` when the spawn failed (which fails the
/// current handshake attempt).
async fn launch_agent(
    ctx: Arc<AgentContext>,
    program: PathBuf,
    args: Vec<String>,
    sink: Arc<dyn LogSink>,
    cancel: CancellationToken,
) -> Option<u32> {
    let identifier = ctx.identifier().to_owned();

    let mut cmd = Command::new(&program);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    group::stage(&ctx.group, &mut cmd);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!(identifier, program = %program.display(), %err, "failed to spawn agent process");
            return None;
        }
    };

    let pid = child.id();
    info!(identifier, pid, "agent process spawned");
    if let Some(pid) = pid {
        group::bind(&ctx.group, &identifier, pid);
    }

    let read_token = ctx.renew_read_token();

    if let Some(stdout) = child.stdout.take() {
        let on_line =
            forwarding_callback(Arc::clone(&ctx.stdout_tail), Arc::clone(&sink), LogStyle::Info);
        drop(tokio::spawn(run_line_reader(
            identifier.clone(),
            "stdout",
            stdout,
            on_line,
            read_token.clone(),
        )));
    } else {
        warn!(identifier, "agent stdout not captured");
    }

    if let Some(stderr) = child.stderr.take() {
        let on_line =
            forwarding_callback(Arc::clone(&ctx.stderr_tail), sink, LogStyle::Warning);
        drop(tokio::spawn(run_line_reader(
            identifier.clone(),
            "stderr",
            stderr,
            on_line,
            read_token,
        )));
    } else {
        warn!(identifier, "agent stderr not captured");
    }

    if let Some(stale) = ctx.process.replace(child) {
        warn!(identifier, "replacing stale process handle");
        drop(stale);
    }

    drop(tokio::spawn(watch_exit(Arc::clone(&ctx), cancel)));

    pid
}

/// Per-line callback: retain the line for diagnostics and forward it to the
/// sink unless it is an engine-internal control line.
fn forwarding_callback(
    tail: Arc<TailBuffer>,
    sink: Arc<dyn LogSink>,
    style: LogStyle,
) -> impl FnMut(String) + Send {
    move |line: String| {
        tail.push(line.clone());
        if !line.starts_with(CONTROL_LINE_PREFIX) {
            sink.add_log(&line, style);
        }
    }
}

// ── Exit watcher ──────────────────────────────────────────────────────────────

enum Polled {
    Running,
    Gone,
    Exited(std::process::ExitStatus),
    Failed(std::io::Error),
}

/// Poll the context's child for exit until it happens or `cancel` fires.
///
/// On exit: record the status, null the process handle, and stop both
/// stream readers.
async fn watch_exit(ctx: Arc<AgentContext>, cancel: CancellationToken) {
    let identifier = ctx.identifier().to_owned();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(identifier, "exit watcher: cancellation received");
                return;
            }
            () = sleep(EXIT_POLL_INTERVAL) => {}
        }

        let polled = ctx.process.with_mut(|slot| {
            let Some(child) = slot.as_mut() else {
                return Polled::Gone;
            };
            match child.try_wait() {
                Ok(None) => Polled::Running,
                Ok(Some(status)) => {
                    *slot = None;
                    Polled::Exited(status)
                }
                Err(err) => {
                    *slot = None;
                    Polled::Failed(err)
                }
            }
        });

        match polled {
            Polled::Running => {}
            Polled::Gone => return,
            Polled::Exited(status) => {
                info!(identifier, status = %format_exit(status), "agent process exited");
                let _ = ctx.exit_status.replace(status);
                ctx.stop_readers();
                return;
            }
            Polled::Failed(err) => {
                warn!(identifier, %err, "failed to poll agent process");
                ctx.stop_readers();
                return;
            }
        }
    }
}

// ── Failure diagnostics ───────────────────────────────────────────────────────

/// Compose the aggregated diagnostic for a terminally failed startup.
///
/// Waits up to [`DIAGNOSTIC_EXIT_WAIT`] for a still-live process to exit so
/// the exit status is meaningful, then assembles the last handshake error,
/// the exit status, and the retained output tails into one message.
async fn gather_failure_diagnostics(
    ctx: &Arc<AgentContext>,
    last_error: Option<&AppError>,
) -> String {
    let deadline = tokio::time::Instant::now() + DIAGNOSTIC_EXIT_WAIT;
    loop {
        if ctx.exit_status.get().is_some() || !ctx.has_live_process() {
            break;
        }
        let status = ctx.process.with_mut(|slot| {
            let child = slot.as_mut()?;
            match child.try_wait() {
                Ok(Some(status)) => {
                    *slot = None;
                    Some(status)
                }
                Ok(None) | Err(_) => None,
            }
        });
        if let Some(status) = status {
            let _ = ctx.exit_status.replace(status);
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }

    let mut parts = vec![format!(
        "agent {} failed to link after {MAX_LINK_ATTEMPTS} attempt(s)",
        ctx.identifier()
    )];
    if let Some(err) = last_error {
        parts.push(format!("last error: {err}"));
    }
    match ctx.exit_status.get() {
        Some(status) => parts.push(format!("process {}", format_exit(status))),
        None if ctx.has_live_process() => parts.push("process still running at diagnosis".into()),
        None => parts.push("process was never spawned or already reaped".into()),
    }
    let stdout = ctx.recent_stdout();
    if !stdout.is_empty() {
        parts.push(format!("recent stdout:\n{}", stdout.join("\n")));
    }
    let stderr = ctx.recent_stderr();
    if !stderr.is_empty() {
        parts.push(format!("recent stderr:\n{}", stderr.join("\n")));
    }
    parts.join("; ")
}
