//! Unit tests for executable and argument template resolution.

use std::fs;
use std::path::PathBuf;

use agent_warden::connector::{resolve_args, resolve_executable, APP_DIR_PLACEHOLDER};
use agent_warden::AppError;

/// Create a regular file under `dir` and return its name.
fn touch(dir: &std::path::Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, b"#!/bin/sh\n").expect("write stub file");
    path
}

/// A resolved executable that does not exist on disk is a configuration
/// error, not a retryable failure.
#[test]
fn missing_executable_is_config_error() {
    let base = tempfile::tempdir().expect("tempdir");

    let result = resolve_executable("no-such-agent", base.path());
    assert!(
        matches!(result, Err(AppError::Config(_))),
        "missing executable must be AppError::Config, got: {result:?}"
    );
}

/// A relative executable path resolves against the app base directory.
#[test]
fn relative_executable_resolves_against_base_dir() {
    let base = tempfile::tempdir().expect("tempdir");
    let expected = touch(base.path(), "agent.sh");

    let resolved = resolve_executable("agent.sh", base.path()).expect("must resolve");
    assert_eq!(resolved, expected);
}

/// The `{APP_DIR}` placeholder expands to the base directory.
#[test]
fn app_dir_placeholder_is_substituted() {
    let base = tempfile::tempdir().expect("tempdir");
    let expected = touch(base.path(), "agent.sh");

    let template = format!("{APP_DIR_PLACEHOLDER}/agent.sh");
    let resolved = resolve_executable(&template, base.path()).expect("must resolve");
    assert_eq!(resolved, expected);
}

/// Arguments naming existing files become absolute paths; other arguments
/// pass through with placeholders substituted.
#[test]
fn file_args_are_absolutized() {
    let base = tempfile::tempdir().expect("tempdir");
    let script = touch(base.path(), "task.py");

    let args = vec![
        "task.py".to_owned(),
        "--verbose".to_owned(),
        format!("{APP_DIR_PLACEHOLDER}/missing.cfg"),
    ];
    let resolved = resolve_args(&args, base.path());

    assert_eq!(resolved[0], script.to_string_lossy());
    assert_eq!(resolved[1], "--verbose");
    assert_eq!(
        resolved[2],
        format!("{}/missing.cfg", base.path().to_string_lossy()),
        "non-file args keep the substituted template text"
    );
}
