//! Error types for the harness.
//!
//! Only hard failures live here. Conditions that are expected while polling for
//! convergence (engine not ready yet, state not reached yet, best-effort stop failing)
//! are reported as `false` plus a log line by the operations themselves.

use std::path::PathBuf;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{name} {}, out: {stdout}\n, err: {stderr}", exit_text(.exit_code))]
    CommandFailed {
        name: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("{name} timed out after {} seconds. out: {stdout}\n, err: {stderr}", .timeout.as_secs())]
    CommandTimedOut {
        name: String,
        timeout: Duration,
        stdout: String,
        stderr: String,
    },

    #[error("datanode {nodeid} in group {group} not found at the monitor")]
    NodeNotFound { nodeid: i64, group: i64 },

    #[error("monitor has already been created")]
    MonitorAlreadyCreated,

    #[error("monitor must be created before data nodes")]
    MonitorNotCreated,

    #[error("pg_autoctl is already running for {}", datadir.display())]
    AlreadyRunning { datadir: PathBuf },

    #[error("monitor reported unknown state '{0}'")]
    UnknownState(String),

    #[error("{0} not found, install it or point the harness at it")]
    BinaryNotFound(String),

    #[error("virtual network has no free address left")]
    AddressPoolExhausted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("failed to signal process group {pgid}: {source}")]
    Signal { pgid: i32, source: std::io::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for the timeout flavour of a failed external command.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::CommandTimedOut { .. })
    }
}

/// No exit code means the process died from a signal.
fn exit_text(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("failed with exit code {code}"),
        None => "was killed by a signal".to_string(),
    }
}
