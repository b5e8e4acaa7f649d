//! Data nodes: the postgres, coordinator and worker members a monitor tracks.

use crate::monitor::MonitorNode;
use crate::network::VirtualNode;
use crate::pg_node::{PgNode, SqlValue, poll_attempts};
use crate::types::{NodeState, Role};
use crate::{Error, HarnessConfig, Result};
use sqlx::Row;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const DATANODE_DATABASE: &str = "postgres";

const REPORTED_STATE_SQL: &str = "SELECT reportedstate::text FROM pgautofailover.node \
     WHERE nodeid = $1::bigint AND groupid = $2::bigint";

const GOAL_STATE_SQL: &str = "SELECT goalstate::text FROM pgautofailover.node \
     WHERE nodeid = $1::bigint AND groupid = $2::bigint";

/// Everything a [`DataNode`] is built from, besides the network node it runs on.
#[derive(Debug, Clone)]
pub struct DataNodeSettings {
    pub nodeid: i64,
    pub group: i64,
    pub port: u16,
    /// Advertise the virtual address instead of `localhost`.
    pub listen: bool,
    pub role: Role,
    pub formation: Option<String>,
    pub auth_method: Option<String>,
}

#[derive(Debug)]
pub struct DataNode {
    node: PgNode,
    monitor: Arc<MonitorNode>,
    nodeid: i64,
    group: i64,
    listen: bool,
    formation: Option<String>,
}

impl Deref for DataNode {
    type Target = PgNode;

    fn deref(&self) -> &PgNode {
        &self.node
    }
}

impl DataNode {
    pub fn new(
        datadir: impl AsRef<Path>,
        vnode: Arc<dyn VirtualNode>,
        monitor: Arc<MonitorNode>,
        settings: DataNodeSettings,
        config: Arc<HarnessConfig>,
    ) -> Result<Self> {
        let node = PgNode::new(
            datadir,
            vnode,
            settings.port,
            config.datanode_username.clone(),
            settings.auth_method,
            DATANODE_DATABASE,
            settings.role,
            config,
        )?;

        Ok(Self {
            node,
            monitor,
            nodeid: settings.nodeid,
            group: settings.group,
            listen: settings.listen,
            formation: settings.formation,
        })
    }

    pub fn nodeid(&self) -> i64 {
        self.nodeid
    }

    pub fn group(&self) -> i64 {
        self.group
    }

    pub fn formation(&self) -> Option<&str> {
        self.formation.as_deref()
    }

    pub fn monitor(&self) -> &MonitorNode {
        &self.monitor
    }

    /// `pg_autoctl create <role>` registering with the monitor.
    ///
    /// Unless the node listens on its virtual address it advertises `localhost`, so
    /// pg_autoctl has to work out its own hostname.
    pub async fn create(&self) -> Result<()> {
        let pghost = match self.listen {
            true => self.address().to_string(),
            false => "localhost".to_string(),
        };
        let listen = self.listen.then(|| self.address().to_string());

        self.pg_autoctl_verbose("keeper init")
            .args(["create", self.role().command()])
            .flag("--pgdata", self.datadir())
            .flag("--pghost", pghost)
            .flag("--pgport", self.port().to_string())
            .flag("--pgctl", &self.config().pg_ctl)
            .flag("--monitor", self.monitor.connection_string())
            .flag_opt("--listen", listen)
            .flag_opt("--formation", self.formation.as_deref())
            .execute_on(self.vnode())
            .await?;

        tracing::info!(nodeid = self.nodeid, group = self.group, "data node created");
        Ok(())
    }

    /// The state this node last reported to the monitor.
    pub async fn get_state(&self) -> Result<NodeState> {
        self.query_monitor_state(REPORTED_STATE_SQL).await
    }

    /// The state the monitor wants this node to reach next.
    pub async fn get_goal_state(&self) -> Result<NodeState> {
        self.query_monitor_state(GOAL_STATE_SQL).await
    }

    async fn query_monitor_state(&self, sql: &str) -> Result<NodeState> {
        let rows = self
            .monitor
            .run_sql_query(sql, &[SqlValue::Int(self.nodeid), SqlValue::Int(self.group)])
            .await?
            .unwrap_or_default();

        let state = rows.first().map(|row| row.try_get::<String, _>(0)).transpose()?;
        state_from_row(state, self.nodeid, self.group)
    }

    /// Poll the monitor once per poll interval until this node reports `target`.
    /// Returns false once `timeout` is used up.
    pub async fn wait_until_state(&self, target: NodeState, timeout: Duration) -> Result<bool> {
        let interval = self.config().poll_interval;
        let attempts = poll_attempts(timeout, interval);
        let mut last = None;

        let reached = poll_state(
            target,
            attempts,
            interval,
            move || self.get_state(),
            |current| {
                tracing::info!(
                    nodeid = self.nodeid,
                    "state of {} is '{current}', waiting for '{target}' ...",
                    self.datadir().display()
                );
                last = Some(current);
            },
        )
        .await?;

        if !reached {
            tracing::warn!(
                nodeid = self.nodeid,
                "state of {} is '{}' after {attempts} attempts, expected '{target}'",
                self.datadir().display(),
                last.map_or("unknown", NodeState::as_str)
            );
        }
        Ok(reached)
    }

    /// `pg_autoctl enable maintenance`
    pub async fn enable_maintenance(&self) -> Result<()> {
        self.maintenance("enable").await
    }

    /// `pg_autoctl disable maintenance`
    pub async fn disable_maintenance(&self) -> Result<()> {
        self.maintenance("disable").await
    }

    async fn maintenance(&self, action: &str) -> Result<()> {
        self.pg_autoctl(&format!("{action} maintenance"))
            .args([action, "maintenance"])
            .flag("--pgdata", self.datadir())
            .execute_on(self.vnode())
            .await?;
        Ok(())
    }

    /// `pg_autoctl drop node`: remove this node from its formation.
    pub async fn drop_node(&self) -> Result<()> {
        self.pg_autoctl("drop node")
            .args(["drop", "node"])
            .flag("--pgdata", self.datadir())
            .execute_on(self.vnode())
            .await?;

        tracing::info!(nodeid = self.nodeid, "data node dropped");
        Ok(())
    }
}

/// The state column of the node's row, `None` when the monitor has no such node.
fn state_from_row(state: Option<String>, nodeid: i64, group: i64) -> Result<NodeState> {
    match state {
        Some(state) => state.parse(),
        None => Err(Error::NodeNotFound { nodeid, group }),
    }
}

/// Sleep `interval`, then `observe`, up to `attempts` times, stopping early once
/// `target` shows up. `on_change` sees every state that differs from the one before.
async fn poll_state<F, Fut>(
    target: NodeState,
    attempts: u128,
    interval: Duration,
    mut observe: F,
    mut on_change: impl FnMut(NodeState),
) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<NodeState>>,
{
    let mut previous = None;

    for _ in 0..attempts {
        tokio::time::sleep(interval).await;

        let current = observe().await?;
        if current == target {
            return Ok(true);
        }
        if previous != Some(current) {
            on_change(current);
            previous = Some(current);
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{LoopbackNetwork, VirtualNetwork};
    use std::sync::Mutex;

    #[test]
    fn test_datanode_attributes() {
        let mut network = LoopbackNetwork::default();
        let config = Arc::new(HarnessConfig {
            datanode_username: "tester".to_string(),
            ..HarnessConfig::default()
        });
        let monitor = Arc::new(
            MonitorNode::new("/tmp/monitor", network.create_node().unwrap(), 5432, None, None, config.clone())
                .unwrap(),
        );

        let node = DataNode::new(
            "/tmp/node2",
            network.create_node().unwrap(),
            monitor.clone(),
            DataNodeSettings {
                nodeid: 2,
                group: 1,
                port: 6002,
                listen: true,
                role: Role::Worker,
                formation: Some("citus".to_string()),
                auth_method: None,
            },
            config,
        )
        .unwrap();

        assert_eq!(node.nodeid(), 2);
        assert_eq!(node.group(), 1);
        assert_eq!(node.formation(), Some("citus"));
        assert_eq!(node.role(), Role::Worker);
        assert_eq!(node.monitor().nodename(), "127.0.1.1");
        assert_eq!(node.connection_string(), "postgres://tester@127.0.1.2:6002/postgres");
    }

    #[test]
    fn test_missing_row_is_node_not_found() {
        let err = state_from_row(None, 3, 1).unwrap_err();
        assert!(matches!(err, Error::NodeNotFound { nodeid: 3, group: 1 }), "unexpected error: {err}");
    }

    #[test]
    fn test_row_state_is_parsed() {
        let state = state_from_row(Some("wait_primary".to_string()), 1, 0).unwrap();
        assert_eq!(state, NodeState::WaitPrimary);

        let err = state_from_row(Some("bogus".to_string()), 1, 0).unwrap_err();
        assert!(matches!(err, Error::UnknownState(s) if s == "bogus"));
    }

    /// Hands out `states` in order, repeating the last one, and counts the calls.
    fn scripted(states: Vec<NodeState>) -> (impl FnMut() -> std::future::Ready<Result<NodeState>>, Arc<Mutex<usize>>) {
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let observe = move || {
            let mut calls = counter.lock().unwrap();
            let state = states[(*calls).min(states.len() - 1)];
            *calls += 1;
            std::future::ready(Ok(state))
        };
        (observe, calls)
    }

    #[tokio::test]
    async fn test_poll_state_stops_at_target() {
        let (observe, calls) = scripted(vec![
            NodeState::Init,
            NodeState::Init,
            NodeState::WaitPrimary,
            NodeState::Single,
        ]);
        let mut changes = Vec::new();

        let reached = poll_state(NodeState::Single, 10, Duration::from_millis(1), observe, |state| {
            changes.push(state)
        })
        .await
        .unwrap();

        assert!(reached);
        assert_eq!(*calls.lock().unwrap(), 4);
        assert_eq!(changes, vec![NodeState::Init, NodeState::WaitPrimary]);
    }

    #[tokio::test]
    async fn test_poll_state_gives_up_after_attempts() {
        let (observe, calls) = scripted(vec![NodeState::Init, NodeState::CatchingUp]);
        let mut changes = Vec::new();

        let reached = poll_state(NodeState::Secondary, 5, Duration::from_millis(1), observe, |state| {
            changes.push(state)
        })
        .await
        .unwrap();

        assert!(!reached);
        assert_eq!(*calls.lock().unwrap(), 5);
        assert_eq!(changes, vec![NodeState::Init, NodeState::CatchingUp]);
    }

    #[tokio::test]
    async fn test_poll_state_propagates_errors() {
        let mut calls = 0;
        let observe = || {
            calls += 1;
            std::future::ready(Err(Error::NodeNotFound { nodeid: 1, group: 0 }))
        };

        let err = poll_state(NodeState::Single, 5, Duration::from_millis(1), observe, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NodeNotFound { .. }));
        assert_eq!(calls, 1);
    }
}
