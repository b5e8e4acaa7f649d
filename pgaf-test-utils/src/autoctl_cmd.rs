//! Fluent builder for `pg_autoctl`, `pg_ctl` and `psql` invocations

use crate::network::VirtualNode;
use crate::process::{CommandOutput, signal_process_group, wait_or_timeout};
use crate::{COMMAND_TIMEOUT, Result};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

/// Fluent builder for one external command run on a virtual node
#[derive(Debug, Clone)]
pub struct AutoctlCommand {
    program: PathBuf,
    name: String,
    args: Vec<OsString>,
    env: Vec<(String, String)>,
    timeout: Duration,
}

impl AutoctlCommand {
    /// `name` is what errors and logs call this command, e.g. "create monitor"
    pub fn new<P: AsRef<Path>, N: Into<String>>(program: P, name: N) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            name: name.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout: COMMAND_TIMEOUT,
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Append `--name value`
    pub fn flag<S: AsRef<OsStr>>(self, name: &str, value: S) -> Self {
        self.arg(name).arg(value)
    }

    /// Append `--name value` only when there is a value
    pub fn flag_opt<S: AsRef<OsStr>>(self, name: &str, value: Option<S>) -> Self {
        match value {
            Some(value) => self.flag(name, value),
            None => self,
        }
    }

    pub fn envs(mut self, env: &[(String, String)]) -> Self {
        self.env.extend(env.iter().cloned());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    fn command_on(&self, vnode: &dyn VirtualNode) -> tokio::process::Command {
        let mut cmd = vnode.command(&self.program, &self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        // own process group, so a timeout or a stop reaches every descendant
        cmd.stdin(Stdio::null()).process_group(0);
        cmd
    }

    /// Run to completion on `vnode`, judged by [`wait_or_timeout`]
    pub async fn execute_on(self, vnode: &dyn VirtualNode) -> Result<CommandOutput> {
        tracing::debug!(
            name = %self.name,
            address = %vnode.address(),
            program = %self.program.display(),
            args = ?self.args,
            "running command"
        );

        let child = self
            .command_on(vnode)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        wait_or_timeout(child, &self.name, self.timeout).await
    }

    /// Spawn as a long running process (`pg_autoctl run`), output appended to
    /// `log_file` when given and discarded otherwise
    pub fn spawn_background_on(
        self,
        vnode: &dyn VirtualNode,
        log_file: Option<&Path>,
    ) -> Result<BackgroundProcess> {
        let mut cmd = self.command_on(vnode);

        match log_file {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let log = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
                cmd.stdout(log.try_clone()?).stderr(log);
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        cmd.kill_on_drop(true);
        let child = cmd.spawn()?;
        tracing::debug!(name = %self.name, pid = ?child.id(), "spawned background process");

        Ok(BackgroundProcess {
            child,
            name: self.name,
        })
    }
}

/// Handle of a long running process that leads its own process group
///
/// Dropping the handle kills the leading process.
#[derive(Debug)]
pub struct BackgroundProcess {
    child: tokio::process::Child,
    name: String,
}

impl BackgroundProcess {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if process is still running
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Send `signal` to the whole process group, so children such as the postgres
    /// server started by `pg_autoctl` get it too. A group that is already gone is not
    /// an error.
    pub fn signal_group(&self, signal: libc::c_int) -> Result<()> {
        match self.child.id() {
            Some(pid) => signal_process_group(pid, signal),
            None => Ok(()),
        }
    }

    /// Wait for the process to exit, `None` if it is still running after `timeout`
    pub async fn wait(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => Ok(Some(status?)),
            Err(_elapsed) => Ok(None),
        }
    }
}
