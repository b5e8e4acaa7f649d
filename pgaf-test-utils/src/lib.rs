//! pg_auto_failover cluster testing utilities
//!
//! This crate drives a real `pg_autoctl` and PostgreSQL as black boxes and checks
//! that the cluster converges to the states a test expects:
//! - Monitor and data node lifecycle (create, run, fail, destroy)
//! - Every external command bounded by a timeout, killed when it hangs
//! - Convergence polling against the monitor's `pgautofailover.node` table
//! - Each node on its own address of a virtual network
//!
//! Nothing here implements failover, it only observes it.

use std::path::PathBuf;
use std::time::Duration;

pub mod autoctl_cmd;
pub mod cluster;
pub mod datanode;
pub mod error;
pub mod monitor;
pub mod network;
pub mod pg_node;
pub mod process;
pub mod types;

pub use autoctl_cmd::{AutoctlCommand, BackgroundProcess};
pub use cluster::{Cluster, DataNodeOptions, MonitorOptions};
pub use datanode::{DataNode, DataNodeSettings};
pub use error::{Error, Result};
pub use monitor::{DEFAULT_FORMATION, MonitorNode};
pub use network::{LoopbackNetwork, VirtualNetwork, VirtualNode};
pub use pg_node::{PgNode, SqlValue};
pub use process::{CommandOutput, wait_or_timeout};
pub use types::{Feature, FormationKind, NodeState, Role};

/// How long a one-shot external command may run before it is killed.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// How long the `wait_until_*` helpers poll by default.
pub const STATE_CHANGE_TIMEOUT: Duration = Duration::from_secs(90);

/// Harness-wide configuration, shared by every node of a [`Cluster`].
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub pg_autoctl: PathBuf,
    pub pg_ctl: PathBuf,
    pub psql: PathBuf,
    pub command_timeout: Duration,
    /// how long the scenarios wait for a node to start or reach a state
    pub state_change_timeout: Duration,
    pub poll_interval: Duration,
    /// `pg_autoctl.cfg` files live below this, namespaced by data directory
    pub config_root: PathBuf,
    /// `pg_autoctl.state` files live below this, namespaced by data directory
    pub state_root: PathBuf,
    pub datanode_username: String,
    /// number of `-v` passed to `pg_autoctl create`
    pub autoctl_verbosity: u8,
    /// where `pg_autoctl run` output goes, discarded when unset
    pub log_dir: Option<PathBuf>,
    /// environment applied to every external command
    pub env: Vec<(String, String)>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let base_dirs = directories::BaseDirs::new();
        let config_root = base_dirs
            .as_ref()
            .map(|d| d.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".config"));
        let state_root = base_dirs
            .as_ref()
            .map(|d| d.data_local_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".local/share"));

        Self {
            pg_autoctl: PathBuf::from("pg_autoctl"),
            pg_ctl: PathBuf::from("pg_ctl"),
            psql: PathBuf::from("psql"),
            command_timeout: COMMAND_TIMEOUT,
            state_change_timeout: STATE_CHANGE_TIMEOUT,
            poll_interval: Duration::from_secs(1),
            config_root: config_root.join("pg_autoctl"),
            state_root: state_root.join("pg_autoctl"),
            datanode_username: std::env::var("USER").unwrap_or_else(|_| "postgres".to_string()),
            autoctl_verbosity: 3,
            log_dir: None,
            env: default_env(),
        }
    }
}

impl HarnessConfig {
    /// Defaults, with the external binaries resolved from `PGAF_PG_AUTOCTL`,
    /// `PGAF_PG_CTL`, `PGAF_PSQL` or `PATH`, and `PGAF_LOG_DIR` honoured.
    pub fn from_env() -> Result<Self> {
        let pg_autoctl = process::find_binary("pg_autoctl", "PGAF_PG_AUTOCTL")?;

        Ok(Self {
            log_dir: std::env::var_os("PGAF_LOG_DIR").map(PathBuf::from),
            ..Self::with_pg_autoctl(pg_autoctl)?
        })
    }

    /// Defaults around the given `pg_autoctl`.
    ///
    /// `pg_ctl` and `psql` come from `PGAF_PG_CTL` and `PGAF_PSQL`, then from the
    /// directory holding `pg_autoctl` (all three live in the PostgreSQL bin
    /// directory), then from `PATH`.
    pub fn with_pg_autoctl(pg_autoctl: PathBuf) -> Result<Self> {
        let pg_ctl = resolve_tool("pg_ctl", "PGAF_PG_CTL", &pg_autoctl)?;
        let psql = resolve_tool("psql", "PGAF_PSQL", &pg_autoctl)?;

        Ok(Self {
            pg_autoctl,
            pg_ctl,
            psql,
            ..Self::default()
        })
    }

    /// Keep pg_autoctl's config and state files below `dir` instead of the user's
    /// home: point `XDG_CONFIG_HOME` and `XDG_DATA_HOME` of every command there and
    /// move the roots along.
    pub fn isolated_in(mut self, dir: &std::path::Path) -> Self {
        let config_home = dir.join("config");
        let data_home = dir.join("data");

        self.config_root = config_home.join("pg_autoctl");
        self.state_root = data_home.join("pg_autoctl");
        self.env.retain(|(key, _)| key != "XDG_CONFIG_HOME" && key != "XDG_DATA_HOME");
        self.env.push((
            "XDG_CONFIG_HOME".to_string(),
            config_home.to_string_lossy().into_owned(),
        ));
        self.env.push((
            "XDG_DATA_HOME".to_string(),
            data_home.to_string_lossy().into_owned(),
        ));
        self
    }
}

fn resolve_tool(name: &str, override_var: &str, pg_autoctl: &std::path::Path) -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(override_var) {
        return Ok(PathBuf::from(path));
    }
    match process::find_sibling(pg_autoctl, name) {
        Some(path) => Ok(path),
        None => process::find_binary(name, override_var),
    }
}

/// The environment every external command runs with: no regress socket dir
/// override, debug mode off, and `localhost` as the default connection host.
pub fn default_env() -> Vec<(String, String)> {
    vec![
        ("PG_REGRESS_SOCK_DIR".to_string(), String::new()),
        ("PG_AUTOCTL_DEBUG".to_string(), String::new()),
        ("PGHOST".to_string(), "localhost".to_string()),
    ]
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test, only the first call installs anything. Filter with
/// `RUST_LOG`, e.g. `RUST_LOG=pgaf_test_utils=debug`.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
