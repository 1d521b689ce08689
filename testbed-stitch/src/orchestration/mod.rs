use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use strum_macros::Display;
use testbed_stitch_schemas::chameleon_models::{Lease, Router, Subnet};
use testbed_stitch_schemas::fabric_models::{SliceHandle, SliceNode};

pub mod address_pool;
pub mod orchestrator;
pub mod poll;
pub mod stages;
#[cfg(test)]
mod test_support;

/// The workflow stages in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Stage {
    #[strum(serialize = "create lease")]
    CreateLease,
    #[strum(serialize = "wait for lease")]
    WaitForLease,
    #[strum(serialize = "wait for network")]
    WaitForNetwork,
    #[strum(serialize = "subnet and router")]
    SubnetRouter,
    #[strum(serialize = "slice")]
    Slice,
    #[strum(serialize = "assign stitch address")]
    AssignAddress,
    #[strum(serialize = "ping gateway")]
    PingGateway,
    #[strum(serialize = "launch servers")]
    LaunchServers,
    #[strum(serialize = "wait for servers")]
    WaitForServers,
    #[strum(serialize = "resolve fixed ips")]
    ResolveFixedIps,
    #[strum(serialize = "ping servers")]
    PingServers,
    #[strum(serialize = "teardown")]
    Teardown,
}

/// Fatal failures end provisioning straight away, everything else is logged and provisioning
/// carries on with whatever it has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Severity {
    Fatal,
    Logged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// the stage ran and returned an error, holds the full cause chain
    Failed(String),
    /// the stage did not run because an earlier stage left out its input
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: Stage,
    pub severity: Severity,
    pub kind: FailureKind,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FailureKind::Failed(reason) => write!(f, "[{}] {} failed: {}", self.severity, self.stage, reason),
            FailureKind::Skipped(reason) => write!(f, "[{}] {} skipped: {}", self.severity, self.stage, reason),
        }
    }
}

/// Everything that went wrong during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowReport {
    pub failures: Vec<StageFailure>,
    pub teardown_ran: bool,
}

impl WorkflowReport {
    pub fn failed(&mut self, stage: Stage, severity: Severity, err: &anyhow::Error) {
        tracing::error!("{stage} failed: {err:#}");
        err.chain()
            .skip(1)
            .for_each(|cause| tracing::error!("because: {}", cause));
        self.failures.push(StageFailure {
            stage,
            severity,
            kind: FailureKind::Failed(format!("{err:#}")),
        });
    }

    pub fn skipped(&mut self, stage: Stage, reason: &str) {
        tracing::warn!("skipping {stage}: {reason}");
        self.failures.push(StageFailure {
            stage,
            severity: Severity::Logged,
            kind: FailureKind::Skipped(reason.to_string()),
        });
    }

    pub fn is_fatal(&self) -> bool {
        self.failures.iter().any(|f| f.severity == Severity::Fatal)
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_fatal() {
            1
        } else {
            0
        }
    }

    pub fn log_summary(&self) {
        if self.failures.is_empty() {
            tracing::info!("all stages completed");
            return;
        }
        tracing::info!("{} stage(s) did not complete:", self.failures.len());
        for failure in &self.failures {
            tracing::info!("  {failure}");
        }
    }
}

/// The network reserved by the lease once the provider has given it a VLAN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyNetwork {
    pub id: String,
    pub vlan: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationIds {
    pub compute: String,
    pub network: String,
}

/// A server creation that was attempted. The id is missing if the create call failed, the server
/// may still exist so teardown looks it up by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedServer {
    pub name: String,
    pub id: Option<String>,
}

/// What has been created so far. Teardown works only from this record.
#[derive(Debug, Clone, Default)]
pub struct StitchState {
    pub lease: Option<Lease>,
    pub reservations: Option<ReservationIds>,
    pub network: Option<ReadyNetwork>,
    pub subnet: Option<Subnet>,
    pub router: Option<Router>,
    pub router_attached: bool,
    pub slice: Option<SliceHandle>,
    /// Set before the submit call, the slice may exist even if the reply never arrived.
    pub slice_name: Option<String>,
    pub node: Option<SliceNode>,
    pub node_address: Option<Ipv4Addr>,
    pub servers: Vec<LaunchedServer>,
    pub fixed_ips: Vec<(String, IpAddr)>,
}

#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Context};
    use super::*;

    #[test]
    fn test_exit_code() {
        let mut report = WorkflowReport::default();
        assert_eq!(report.exit_code(), 0);
        report.skipped(Stage::PingGateway, "no slice node");
        report.failed(Stage::Slice, Severity::Logged, &anyhow!("StableError"));
        assert_eq!(report.exit_code(), 0);
        report.failed(Stage::CreateLease, Severity::Fatal, &anyhow!("403"));
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_failure_keeps_cause_chain() {
        let err = Err::<(), _>(anyhow!("connection refused"))
            .context("creating subnet")
            .unwrap_err();
        let mut report = WorkflowReport::default();
        report.failed(Stage::SubnetRouter, Severity::Logged, &err);
        assert_eq!(
            report.failures[0].kind,
            FailureKind::Failed("creating subnet: connection refused".into())
        );
        assert_eq!(
            report.failures[0].to_string(),
            "[Logged] subnet and router failed: creating subnet: connection refused"
        );
    }
}
