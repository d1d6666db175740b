//! External process plumbing shared by the converter and archiver chains.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};

use tokio::process::Command;

/// Locate an executable by name on `PATH`.
#[must_use]
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|p| is_executable(p))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[derive(Debug, thiserror::Error)]
pub enum ToolRunError {
    #[error("failed to spawn: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

/// Run `program` to completion, killing it once `timeout` elapses.
///
/// # Errors
///
/// `Spawn` if the process cannot be started (binary vanished, permissions),
/// `Timeout` if it overran, `Failed` on a non-zero exit.
pub async fn run_tool<I, S>(
    program: &Path,
    args: I,
    timeout: Duration,
) -> Result<Output, ToolRunError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let started = Instant::now();
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(ToolRunError::Spawn)?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(ToolRunError::Spawn)?,
        Err(_) => {
            tracing::warn!(tool = %program.display(), timeout_secs = timeout.as_secs(), "tool timed out, killed");
            return Err(ToolRunError::Timeout(timeout));
        }
    };

    tracing::debug!(
        tool = %program.display(),
        status = %output.status,
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "tool finished"
    );

    if output.status.success() {
        Ok(output)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(ToolRunError::Failed {
            status: output.status.to_string(),
            stderr: truncate(stderr.trim(), 512),
        })
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_owned(),
    }
}
