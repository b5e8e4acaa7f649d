//! Virtual network the cluster nodes live on.
//!
//! Every node gets its own address and runs its commands "on" that address. The
//! traits are the whole contract; [`LoopbackNetwork`] is the implementation that
//! needs no privileges: the 127.0.0.0/8 block all routes to `lo` on Linux, so
//! distinct addresses inside it behave like distinct hosts for PostgreSQL.

use crate::{Error, Result};
use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;

/// An isolated network identity a process can be launched on.
pub trait VirtualNode: Send + Sync + std::fmt::Debug {
    fn address(&self) -> IpAddr;

    /// Prepare `program args` to run on this node. The caller configures stdio and
    /// spawns it.
    fn command(&self, program: &Path, args: &[OsString]) -> tokio::process::Command;
}

/// Allocates [`VirtualNode`]s and releases them all on `destroy`.
pub trait VirtualNetwork: Send + std::fmt::Debug {
    fn create_node(&mut self) -> Result<Arc<dyn VirtualNode>>;

    fn destroy(&mut self) -> Result<()>;
}

/// Sequential addresses inside one loopback /24, commands run directly on the host.
#[derive(Debug)]
pub struct LoopbackNetwork {
    prefix: [u8; 3],
    next_host: u8,
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new(Ipv4Addr::new(127, 0, 1, 0))
    }
}

impl LoopbackNetwork {
    /// Only the first three octets of `subnet` are used.
    pub fn new(subnet: Ipv4Addr) -> Self {
        let [a, b, c, _] = subnet.octets();
        Self {
            prefix: [a, b, c],
            next_host: 1,
        }
    }
}

impl VirtualNetwork for LoopbackNetwork {
    fn create_node(&mut self) -> Result<Arc<dyn VirtualNode>> {
        if self.next_host == u8::MAX {
            return Err(Error::AddressPoolExhausted);
        }

        let [a, b, c] = self.prefix;
        let address = IpAddr::V4(Ipv4Addr::new(a, b, c, self.next_host));
        self.next_host += 1;

        tracing::debug!(%address, "allocated loopback node");
        Ok(Arc::new(LoopbackNode { address }))
    }

    fn destroy(&mut self) -> Result<()> {
        tracing::debug!(nodes = self.next_host - 1, "releasing loopback network");
        self.next_host = 1;
        Ok(())
    }
}

#[derive(Debug)]
struct LoopbackNode {
    address: IpAddr,
}

impl VirtualNode for LoopbackNode {
    fn address(&self) -> IpAddr {
        self.address
    }

    fn command(&self, program: &Path, args: &[OsString]) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args);
        cmd
    }
}
