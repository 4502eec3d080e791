//! External renderer execution via subprocess

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

/// Longest stderr excerpt carried in an error message
const MAX_STDERR_EXCERPT: usize = 400;

/// One renderer process run
pub struct Invocation<'a> {
    /// Program to run
    pub program: &'a Path,

    /// Arguments after the program
    pub args: Vec<OsString>,

    /// Working directory, pinned so relative model assets resolve
    pub current_dir: &'a Path,

    /// Extra environment variables
    pub env: Option<&'a BTreeMap<String, String>>,

    /// Bytes written to stdin, which is then closed
    pub stdin: Option<&'a [u8]>,

    /// Time allowed before the process is killed
    pub timeout: Duration,
}

/// Run a renderer process to completion
///
/// A non-zero exit, a spawn failure and a timeout are all errors; the process
/// is killed when the timeout elapses.
pub async fn run(invocation: Invocation<'_>) -> Result<(), String> {
    let program = invocation.program.display().to_string();

    let mut command = Command::new(invocation.program);
    command
        .args(&invocation.args)
        .current_dir(invocation.current_dir)
        .stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(env) = invocation.env {
        command.envs(env);
    }

    let mut child = command
        .spawn()
        .map_err(|e| format!("failed to spawn {program}: {e}"))?;

    if let Some(input) = invocation.stdin
        && let Some(mut stdin) = child.stdin.take()
    {
        // A renderer may exit before reading stdin; its exit status is reported below
        match stdin.write_all(input).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                tracing::debug!(program = %program, "renderer closed stdin early");
            }
            Err(e) => return Err(format!("failed to write to {program} stdin: {e}")),
        }
    }

    let output = timeout(invocation.timeout, child.wait_with_output())
        .await
        .map_err(|_| format!("{program} timed out after {:?}", invocation.timeout))?
        .map_err(|e| format!("{program} execution failed: {e}"))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        tracing::debug!(program = %program, stderr = %stderr.trim(), "renderer stderr");
    }

    if !output.status.success() {
        let code = output.status.code().unwrap_or(-1);
        return Err(format!(
            "{program} exited with code {code}: {}",
            excerpt(stderr.trim())
        ));
    }

    Ok(())
}

/// Tail of a long message, on a char boundary
fn excerpt(text: &str) -> &str {
    if text.len() <= MAX_STDERR_EXCERPT {
        return text;
    }

    let mut start = text.len() - MAX_STDERR_EXCERPT;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
