//! The monitor: the node every data node registers with and reports to.

use crate::network::VirtualNode;
use crate::pg_node::{PgNode, quote_literal};
use crate::types::{Feature, FormationKind, Role};
use crate::{HarnessConfig, Result};
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

const MONITOR_USERNAME: &str = "autoctl_node";
const MONITOR_DATABASE: &str = "pg_auto_failover";

/// Formation every node joins when none is given.
pub const DEFAULT_FORMATION: &str = "default";

#[derive(Debug)]
pub struct MonitorNode {
    node: PgNode,
    nodename: String,
}

impl Deref for MonitorNode {
    type Target = PgNode;

    fn deref(&self) -> &PgNode {
        &self.node
    }
}

impl MonitorNode {
    /// `nodename` defaults to the node's virtual address.
    pub fn new(
        datadir: impl AsRef<Path>,
        vnode: Arc<dyn VirtualNode>,
        port: u16,
        nodename: Option<String>,
        auth_method: Option<String>,
        config: Arc<HarnessConfig>,
    ) -> Result<Self> {
        let nodename = nodename.unwrap_or_else(|| vnode.address().to_string());
        let node = PgNode::new(
            datadir,
            vnode,
            port,
            MONITOR_USERNAME,
            auth_method,
            MONITOR_DATABASE,
            Role::Monitor,
            config,
        )?;

        Ok(Self { node, nodename })
    }

    pub fn nodename(&self) -> &str {
        &self.nodename
    }

    /// `pg_autoctl create monitor`
    pub async fn create(&self) -> Result<()> {
        self.pg_autoctl_verbose("create monitor")
            .args(["create", Role::Monitor.command()])
            .flag("--pgdata", self.datadir())
            .flag("--pgport", self.port().to_string())
            .flag("--nodename", &self.nodename)
            .flag_opt("--auth", self.auth_method())
            .execute_on(self.vnode())
            .await?;

        tracing::info!(nodename = %self.nodename, datadir = %self.datadir().display(), "monitor created");
        Ok(())
    }

    /// `pg_autoctl create formation`. `secondary` left as `None` omits the flag and
    /// keeps pg_autoctl's own default.
    pub async fn create_formation(
        &self,
        name: &str,
        kind: FormationKind,
        secondary: Option<bool>,
        dbname: Option<&str>,
    ) -> Result<()> {
        let secondary_flag = secondary.map(|enabled| match enabled {
            true => "--enable-secondary",
            false => "--disable-secondary",
        });

        self.pg_autoctl("create formation")
            .args(["create", "formation"])
            .flag("--pgdata", self.datadir())
            .flag("--formation", name)
            .flag("--kind", kind.as_str())
            .flag_opt("--dbname", dbname)
            .args(secondary_flag)
            .execute_on(self.vnode())
            .await?;
        Ok(())
    }

    /// `pg_autoctl enable <feature>`, on the default formation when `formation` is None.
    pub async fn enable(&self, feature: Feature, formation: Option<&str>) -> Result<()> {
        self.toggle("enable", feature, formation).await
    }

    /// `pg_autoctl disable <feature>`, on the default formation when `formation` is None.
    pub async fn disable(&self, feature: Feature, formation: Option<&str>) -> Result<()> {
        self.toggle("disable", feature, formation).await
    }

    async fn toggle(&self, action: &str, feature: Feature, formation: Option<&str>) -> Result<()> {
        self.pg_autoctl(&format!("{action} {}", feature.command()))
            .args([action, feature.command()])
            .flag("--pgdata", self.datadir())
            .flag("--formation", formation.unwrap_or(DEFAULT_FORMATION))
            .execute_on(self.vnode())
            .await?;
        Ok(())
    }

    /// Ask the monitor to fail over `group` of `formation`.
    pub async fn failover(&self, formation: Option<&str>, group: i64) -> Result<()> {
        let sql = failover_sql(formation.unwrap_or(DEFAULT_FORMATION), group);
        self.psql("manual failover", &sql).await?;

        tracing::info!(group, "manual failover requested");
        Ok(())
    }
}

fn failover_sql(formation: &str, group: i64) -> String {
    format!(
        "select * from pgautofailover.perform_failover({}, {group})",
        quote_literal(formation)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{LoopbackNetwork, VirtualNetwork};

    #[test]
    fn test_nodename_defaults_to_address() {
        let mut network = LoopbackNetwork::default();
        let config = Arc::new(HarnessConfig::default());

        let monitor = MonitorNode::new(
            "/tmp/monitor",
            network.create_node().unwrap(),
            5432,
            None,
            None,
            config.clone(),
        )
        .unwrap();
        assert_eq!(monitor.nodename(), "127.0.1.1");
        assert_eq!(
            monitor.connection_string(),
            "postgres://autoctl_node@127.0.1.1:5432/pg_auto_failover"
        );

        let named = MonitorNode::new(
            "/tmp/monitor2",
            network.create_node().unwrap(),
            5433,
            Some("monitor.local".to_string()),
            None,
            config,
        )
        .unwrap();
        assert_eq!(named.nodename(), "monitor.local");
        assert_eq!(named.role(), Role::Monitor);
    }

    #[test]
    fn test_failover_sql() {
        assert_eq!(
            failover_sql("default", 0),
            "select * from pgautofailover.perform_failover('default', 0)"
        );
        assert_eq!(
            failover_sql("o'brien", 2),
            "select * from pgautofailover.perform_failover('o''brien', 2)"
        );
    }
}
