//! Cluster scenarios for the `pgaf-harness` binary.
//!
//! A scenario returns `Ok(false)` when the cluster did not converge in time, and an
//! error when a command it issued failed outright.

use pgaf_test_utils::{Cluster, DataNode, DataNodeOptions, MonitorNode, MonitorOptions, NodeState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Where and how a scenario lays out its nodes
#[derive(Debug, Clone)]
pub struct Layout {
    pub workdir: PathBuf,
    pub monitor_port: u16,
    /// data node `n` listens on `first_port + n - 1`
    pub first_port: u16,
}

/// Port of the data node at zero-based `index`.
pub fn datanode_port(first_port: u16, index: usize) -> eyre::Result<u16> {
    u16::try_from(index)
        .ok()
        .and_then(|index| first_port.checked_add(index))
        .ok_or_else(|| eyre::eyre!("data node {} does not fit above port {first_port}", index + 1))
}

/// One monitor and one data node, which has to end up `single`.
///
/// Every wait is bounded by the cluster's `state_change_timeout`.
pub async fn single(cluster: &mut Cluster, layout: &Layout) -> eyre::Result<bool> {
    let timeout = cluster.config().state_change_timeout;
    start_monitor(cluster, layout).await?;

    let node = add_datanode(cluster, layout).await?;
    if !check("node1 is running", node.wait_until_pg_is_running(timeout).await?) {
        return Ok(false);
    }

    let converged = node.wait_until_state(NodeState::Single, timeout).await?;
    Ok(check("node1 reached single", converged))
}

/// Two data nodes settle as primary and secondary, then a manual failover has to
/// swap them.
pub async fn failover(cluster: &mut Cluster, layout: &Layout) -> eyre::Result<bool> {
    let timeout = cluster.config().state_change_timeout;
    let monitor = start_monitor(cluster, layout).await?;

    let first = add_datanode(cluster, layout).await?;
    if !check("node1 is running", first.wait_until_pg_is_running(timeout).await?) {
        return Ok(false);
    }
    let second = add_datanode(cluster, layout).await?;
    if !check("node2 is running", second.wait_until_pg_is_running(timeout).await?) {
        return Ok(false);
    }

    if !wait_for_roles(&first, &second, timeout).await? {
        return Ok(false);
    }

    monitor.failover(None, first.group()).await?;
    println!("failover requested for group {}", first.group());

    wait_for_roles(&second, &first, timeout).await
}

async fn start_monitor(cluster: &mut Cluster, layout: &Layout) -> eyre::Result<Arc<MonitorNode>> {
    let timeout = cluster.config().state_change_timeout;
    let monitor = cluster
        .create_monitor(
            layout.workdir.join("monitor"),
            MonitorOptions {
                port: layout.monitor_port,
                ..MonitorOptions::default()
            },
        )
        .await?;
    monitor.run()?;

    eyre::ensure!(
        check("monitor is running", monitor.wait_until_pg_is_running(timeout).await?),
        "monitor did not start within {:?}",
        timeout
    );
    Ok(monitor)
}

async fn add_datanode(cluster: &mut Cluster, layout: &Layout) -> eyre::Result<Arc<DataNode>> {
    let index = cluster.datanodes().len();
    let node = cluster.create_datanode(
        layout.workdir.join(format!("node{}", index + 1)),
        DataNodeOptions {
            port: datanode_port(layout.first_port, index)?,
            ..DataNodeOptions::default()
        },
    )?;

    node.create().await?;
    node.run()?;
    Ok(node)
}

async fn wait_for_roles(primary: &DataNode, secondary: &DataNode, timeout: Duration) -> eyre::Result<bool> {
    let reached = primary.wait_until_state(NodeState::Primary, timeout).await?;
    if !check(&format!("node{} is primary", primary.nodeid()), reached) {
        return Ok(false);
    }

    let reached = secondary.wait_until_state(NodeState::Secondary, timeout).await?;
    Ok(check(&format!("node{} is secondary", secondary.nodeid()), reached))
}

fn check(what: &str, ok: bool) -> bool {
    use colored::Colorize;

    match ok {
        true => println!("{} {what}", "ok".green()),
        false => println!("{} {what}", "FAILED".red()),
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datanode_ports_count_up() {
        assert_eq!(datanode_port(6001, 0).unwrap(), 6001);
        assert_eq!(datanode_port(6001, 1).unwrap(), 6002);
        assert_eq!(datanode_port(65534, 1).unwrap(), 65535);
    }

    #[test]
    fn test_datanode_port_overflow_is_an_error() {
        let err = datanode_port(65535, 1).unwrap_err();
        assert_eq!(err.to_string(), "data node 2 does not fit above port 65535");

        assert!(datanode_port(1, usize::from(u16::MAX) + 1).is_err());
    }
}
