//! Closed vocabularies of the cluster: node roles, formation features and kinds,
//! and the replication states the monitor reports.

use crate::Error;

/// What a node is created as, `pg_autoctl create <role>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Monitor,
    Postgres,
    Coordinator,
    Worker,
}

impl Role {
    pub fn command(self) -> &'static str {
        match self {
            Role::Monitor => "monitor",
            Role::Postgres => "postgres",
            Role::Coordinator => "coordinator",
            Role::Worker => "worker",
        }
    }
}

/// Formation features toggled with `pg_autoctl enable|disable <feature>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Secondary,
}

impl Feature {
    pub fn command(self) -> &'static str {
        match self {
            Feature::Secondary => "secondary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FormationKind {
    #[default]
    Pgsql,
    Citus,
}

impl FormationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FormationKind::Pgsql => "pgsql",
            FormationKind::Citus => "citus",
        }
    }
}

impl std::fmt::Display for FormationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replication state of a node as stored by the monitor, both the reported state
/// and the goal state use this vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    Init,
    Single,
    WaitPrimary,
    Primary,
    Draining,
    DemoteTimeout,
    Demoted,
    CatchingUp,
    Secondary,
    PreparePromotion,
    StopReplication,
    WaitStandby,
    Maintenance,
    ReportLsn,
}

impl NodeState {
    pub const ALL: [NodeState; 14] = [
        NodeState::Init,
        NodeState::Single,
        NodeState::WaitPrimary,
        NodeState::Primary,
        NodeState::Draining,
        NodeState::DemoteTimeout,
        NodeState::Demoted,
        NodeState::CatchingUp,
        NodeState::Secondary,
        NodeState::PreparePromotion,
        NodeState::StopReplication,
        NodeState::WaitStandby,
        NodeState::Maintenance,
        NodeState::ReportLsn,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeState::Init => "init",
            NodeState::Single => "single",
            NodeState::WaitPrimary => "wait_primary",
            NodeState::Primary => "primary",
            NodeState::Draining => "draining",
            NodeState::DemoteTimeout => "demote_timeout",
            NodeState::Demoted => "demoted",
            NodeState::CatchingUp => "catchingup",
            NodeState::Secondary => "secondary",
            NodeState::PreparePromotion => "prepare_promotion",
            NodeState::StopReplication => "stop_replication",
            NodeState::WaitStandby => "wait_standby",
            NodeState::Maintenance => "maintenance",
            NodeState::ReportLsn => "report_lsn",
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| Error::UnknownState(s.to_string()))
    }
}
