//! OS-level process containment.
//!
//! Agents are user-supplied executables that may fork their own children
//! (script runtimes routinely do). The `group` submodule binds every
//! spawned agent to an OS process group so the whole tree dies with the
//! group handle, leaving no orphans behind a crash.

pub mod group;

/// Human-readable exit status, matching the shape logged by the exit watcher.
pub(crate) fn format_exit(status: std::process::ExitStatus) -> String {
    status.code().map_or_else(
        || "terminated by signal".to_owned(),
        |code| format!("exited with code {code}"),
    )
}
