//! Cluster setup and teardown

use crate::datanode::{DataNode, DataNodeSettings};
use crate::monitor::MonitorNode;
use crate::network::{LoopbackNetwork, VirtualNetwork};
use crate::types::Role;
use crate::{Error, HarnessConfig, Result};
use std::path::Path;
use std::sync::Arc;

/// How to create the monitor
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub port: u16,
    /// Defaults to the monitor's virtual address
    pub nodename: Option<String>,
    pub auth_method: Option<String>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            port: 5432,
            nodename: None,
            auth_method: None,
        }
    }
}

/// How to create a data node, its node id comes from the cluster
#[derive(Debug, Clone)]
pub struct DataNodeOptions {
    pub port: u16,
    pub group: i64,
    pub listen: bool,
    pub role: Role,
    pub formation: Option<String>,
    pub auth_method: Option<String>,
}

impl Default for DataNodeOptions {
    fn default() -> Self {
        Self {
            port: 5432,
            group: 0,
            listen: false,
            role: Role::Postgres,
            formation: None,
            auth_method: None,
        }
    }
}

/// A monitor and its data nodes on one virtual network
///
/// Nothing is torn down implicitly, call [`Cluster::destroy`] when done.
#[derive(Debug)]
pub struct Cluster {
    config: Arc<HarnessConfig>,
    network: Box<dyn VirtualNetwork>,
    monitor: Option<Arc<MonitorNode>>,
    datanodes: Vec<Arc<DataNode>>,
}

impl Cluster {
    /// An empty cluster on a [`LoopbackNetwork`]
    pub fn new(config: HarnessConfig) -> Self {
        Self::with_network(config, Box::new(LoopbackNetwork::default()))
    }

    pub fn with_network(config: HarnessConfig, network: Box<dyn VirtualNetwork>) -> Self {
        Self {
            config: Arc::new(config),
            network,
            monitor: None,
            datanodes: Vec::new(),
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn monitor(&self) -> Option<&Arc<MonitorNode>> {
        self.monitor.as_ref()
    }

    /// Data nodes in creation order
    pub fn datanodes(&self) -> &[Arc<DataNode>] {
        &self.datanodes
    }

    pub fn datanode(&self, nodeid: i64) -> Option<&Arc<DataNode>> {
        self.datanodes.iter().find(|node| node.nodeid() == nodeid)
    }

    /// Allocate an address, then create the monitor with `pg_autoctl create monitor`.
    ///
    /// The monitor is registered before it is created, so [`Cluster::destroy`]
    /// cleans up after a create that failed half way.
    pub async fn create_monitor(
        &mut self,
        datadir: impl AsRef<Path>,
        options: MonitorOptions,
    ) -> Result<Arc<MonitorNode>> {
        if self.monitor.is_some() {
            return Err(Error::MonitorAlreadyCreated);
        }

        let vnode = self.network.create_node()?;
        let monitor = Arc::new(MonitorNode::new(
            datadir,
            vnode,
            options.port,
            options.nodename,
            options.auth_method,
            self.config.clone(),
        )?);
        self.monitor = Some(monitor.clone());

        monitor.create().await?;
        Ok(monitor)
    }

    /// Allocate an address and register a data node with the next node id. The
    /// node is not created, call [`DataNode::create`] once it is set up.
    pub fn create_datanode(
        &mut self,
        datadir: impl AsRef<Path>,
        options: DataNodeOptions,
    ) -> Result<Arc<DataNode>> {
        let monitor = self.monitor.clone().ok_or(Error::MonitorNotCreated)?;

        let vnode = self.network.create_node()?;
        let nodeid = self.datanodes.len() as i64 + 1;
        let datanode = Arc::new(DataNode::new(
            datadir,
            vnode,
            monitor,
            DataNodeSettings {
                nodeid,
                group: options.group,
                port: options.port,
                listen: options.listen,
                role: options.role,
                formation: options.formation,
                auth_method: options.auth_method,
            },
            self.config.clone(),
        )?);

        tracing::debug!(nodeid, address = %datanode.address(), "registered data node");
        self.datanodes.push(datanode.clone());
        Ok(datanode)
    }

    /// Destroy every data node, then the monitor, then the network.
    ///
    /// Keeps going past failures and returns the first one.
    pub async fn destroy(&mut self) -> Result<()> {
        let mut first_error = None;

        for datanode in self.datanodes.drain(..) {
            if let Err(e) = datanode.destroy().await {
                tracing::warn!(nodeid = datanode.nodeid(), error = %e, "failed to destroy data node");
                first_error.get_or_insert(e);
            }
        }

        if let Some(monitor) = self.monitor.take() {
            if let Err(e) = monitor.destroy().await {
                tracing::warn!(error = %e, "failed to destroy monitor");
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = self.network.destroy() {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
