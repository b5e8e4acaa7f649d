//! Waiting on external commands, and finding them in the first place.
//!
//! Every invocation of `pg_autoctl`, `pg_ctl` or `psql` is judged by
//! [`wait_or_timeout`]: callers never look at raw exit codes.

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;

/// Captured output of an external command that exited cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Check if either stream contains the given text
    pub fn contains(&self, text: &str) -> bool {
        self.stdout.contains(text) || self.stderr.contains(text)
    }
}

/// How long output may still trickle in once the process group was killed.
const DRAIN_AFTER_KILL: Duration = Duration::from_secs(5);

/// Wait for `child` to exit and close its output, for at most `timeout`.
///
/// Exit code 0 returns the captured streams. Any other exit, including death by
/// signal, is [`Error::CommandFailed`]. When the deadline passes, either before the
/// exit or while a leftover descendant keeps the pipes open, the process group of
/// `child` is killed once, whatever it managed to print is drained, and
/// [`Error::CommandTimedOut`] is returned.
pub async fn wait_or_timeout(mut child: Child, name: &str, timeout: Duration) -> Result<CommandOutput> {
    // the group outlives a reaped leader, keep its id around
    let pid = child.id();
    let mut stdout = tokio::spawn(drain(child.stdout.take()));
    let mut stderr = tokio::spawn(drain(child.stderr.take()));

    let completed = tokio::time::timeout(timeout, async {
        let status = child.wait().await?;
        let stdout = (&mut stdout).await.unwrap_or_default();
        let stderr = (&mut stderr).await.unwrap_or_default();
        Ok::<_, std::io::Error>((status, stdout, stderr))
    })
    .await;

    let (status, stdout, stderr) = match completed {
        Ok(result) => result?,
        Err(_elapsed) => {
            tracing::warn!(name, timeout = ?timeout, "command timed out, killing it");
            kill_group(pid, &mut child);
            child.wait().await?;

            return Err(Error::CommandTimedOut {
                name: name.to_string(),
                timeout,
                stdout: collect(stdout).await,
                stderr: collect(stderr).await,
            });
        }
    };

    match status.code() {
        Some(0) => Ok(CommandOutput { stdout, stderr }),
        exit_code => {
            tracing::debug!(name, ?exit_code, "command failed");
            Err(Error::CommandFailed {
                name: name.to_string(),
                exit_code,
                stdout,
                stderr,
            })
        }
    }
}

/// SIGKILL the process group led by `pid`, or `child` alone when that fails.
fn kill_group(pid: Option<u32>, child: &mut Child) {
    let Some(pid) = pid else {
        return;
    };

    if let Err(e) = signal_process_group(pid, libc::SIGKILL) {
        tracing::debug!(pid, error = %e, "killpg failed, killing the process alone");
        let _ = child.start_kill();
    }
}

/// Output of a drain task, given up on when something outside the killed group
/// still holds the pipe.
async fn collect(mut drained: tokio::task::JoinHandle<String>) -> String {
    match tokio::time::timeout(DRAIN_AFTER_KILL, &mut drained).await {
        Ok(output) => output.unwrap_or_default(),
        Err(_elapsed) => {
            drained.abort();
            String::new()
        }
    }
}

/// Send `signal` to the process group led by `pid`. A group that is already gone
/// is not an error.
pub(crate) fn signal_process_group(pid: u32, signal: libc::c_int) -> Result<()> {
    let pgid = pid as libc::pid_t;

    // SAFETY: killpg takes plain integers and touches no memory of ours
    if unsafe { libc::killpg(pgid, signal) } == 0 {
        return Ok(());
    }

    let source = std::io::Error::last_os_error();
    match source.raw_os_error() {
        Some(libc::ESRCH) => Ok(()),
        _ => Err(Error::Signal { pgid, source }),
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            tracing::debug!(error = %e, "failed to read command output");
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Resolve an external binary: the `override_var` environment variable wins, then
/// every directory of `PATH` is searched.
pub fn find_binary(name: &str, override_var: &str) -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(override_var) {
        return Ok(PathBuf::from(path));
    }

    let path = std::env::var_os("PATH").ok_or_else(|| Error::BinaryNotFound(name.to_string()))?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| Error::BinaryNotFound(name.to_string()))
}

/// Look for `name` in the directory holding `sibling`.
pub fn find_sibling(sibling: &Path, name: &str) -> Option<PathBuf> {
    let candidate = sibling.parent()?.join(name);
    is_executable(&candidate).then_some(candidate)
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
