use anyhow::Context;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use testbed_stitch_schemas::settings::StitchConfig;
use crate::orchestration::address_pool::AddressPool;
use crate::orchestration::poll::PollPolicy;
use crate::orchestration::stages::teardown::StepOutcome;
use crate::orchestration::stages::{connectivity, lease, network, slice, subnet_router, teardown, workload};
use crate::orchestration::{FailureKind, Severity, Stage, StageFailure, StitchState, WorkflowReport};
use crate::platforms::{ChameleonApi, FabricApi};

/// Provision the stitched link, probe it and tear it all down again. Failing to get a lease ends
/// the run with nothing to clean up; from then on teardown always runs for whatever was created.
pub async fn run_workflow(
    config: &StitchConfig,
    chameleon: &dyn ChameleonApi,
    fabric: &dyn FabricApi,
    cancel: &CancellationToken,
) -> WorkflowReport {
    let mut state = StitchState::default();
    let mut report = WorkflowReport::default();

    provision(config, chameleon, fabric, cancel, &mut state, &mut report).await;

    if state.lease.is_none() {
        tracing::error!("exiting, no lease");
        report.log_summary();
        return report;
    }

    let records = teardown::teardown(chameleon, fabric, &state).await;
    for record in records {
        if let StepOutcome::Failed(reason) = record.outcome {
            report.failures.push(StageFailure {
                stage: Stage::Teardown,
                severity: Severity::Logged,
                kind: FailureKind::Failed(format!("{}: {reason}", record.step)),
            });
        }
    }
    report.teardown_ran = true;
    report.log_summary();
    report
}

/// True if the run was cancelled, in which case the stage is recorded as skipped.
fn cancelled(cancel: &CancellationToken, report: &mut WorkflowReport, stage: Stage) -> bool {
    if cancel.is_cancelled() {
        report.skipped(stage, "cancelled");
        return true;
    }
    false
}

async fn provision(
    config: &StitchConfig,
    chameleon: &dyn ChameleonApi,
    fabric: &dyn FabricApi,
    cancel: &CancellationToken,
    state: &mut StitchState,
    report: &mut WorkflowReport,
) {
    let polling = &config.polling;
    let deadline = polling.deadline();

    tracing::info!("Stage: creating lease");
    if cancelled(cancel, report, Stage::CreateLease) {
        return;
    }
    let created = match lease::create_lease(chameleon, &config.chameleon, Utc::now()).await {
        Ok(created) => created,
        Err(err) => {
            report.failed(Stage::CreateLease, Severity::Fatal, &err);
            return;
        }
    };
    state.lease = Some(created.clone());

    tracing::info!("Stage: waiting for lease to become active");
    let lease_policy = PollPolicy::from_secs(polling.lease_interval_secs, deadline);
    let active = lease::wait_for_active(chameleon, &created, &lease_policy, cancel)
        .await
        .and_then(|active| {
            let ids = lease::reservation_ids(&active).context("reading reservations from the active lease")?;
            Ok((active, ids))
        });
    let compute_reservation = match active {
        Ok((active, ids)) => {
            let compute = ids.compute.clone();
            state.lease = Some(active);
            state.reservations = Some(ids);
            compute
        }
        Err(err) => {
            report.failed(Stage::WaitForLease, Severity::Fatal, &err);
            return;
        }
    };

    tracing::info!("Stage: waiting for network segmentation id");
    if cancelled(cancel, report, Stage::WaitForNetwork) {
        return;
    }
    let network_policy = PollPolicy::from_secs(polling.network_interval_secs, deadline);
    let network_name = config.chameleon.network_name();
    match network::wait_for_segmentation_id(chameleon, &network_name, &network_policy, cancel).await {
        Ok(ready) => state.network = Some(ready),
        Err(err) => report.failed(Stage::WaitForNetwork, Severity::Logged, &err),
    }

    tracing::info!("Stage: creating subnet and router");
    if cancelled(cancel, report, Stage::SubnetRouter) {
        return;
    }
    match state.network.clone() {
        Some(ready) => {
            let result = subnet_router::provision_subnet_router(
                chameleon,
                &config.chameleon,
                &config.addressing,
                &ready.id,
                state,
            ).await;
            if let Err(err) = result {
                report.failed(Stage::SubnetRouter, Severity::Logged, &err);
            }
        }
        None => report.skipped(Stage::SubnetRouter, "the network is not ready"),
    }

    tracing::info!("Stage: creating FABRIC slice");
    if cancelled(cancel, report, Stage::Slice) {
        return;
    }
    match state.network.as_ref().map(|ready| ready.vlan) {
        Some(vlan) => {
            let slice_policy = PollPolicy::from_secs(polling.slice_interval_secs, deadline);
            if let Err(err) = build_slice(config, fabric, vlan, &slice_policy, cancel, state).await {
                report.failed(Stage::Slice, Severity::Logged, &err);
            }
        }
        None => report.skipped(Stage::Slice, "no VLAN to stitch to"),
    }

    tracing::info!("Stage: assigning stitch address to FABRIC node");
    if cancelled(cancel, report, Stage::AssignAddress) {
        return;
    }
    let mut pool = AddressPool::from_range(&config.addressing.fabric_pool);
    match &state.slice {
        Some(handle) => match connectivity::stitch_node(fabric, handle, &config.fabric).await {
            Ok(node) => {
                let assigned = connectivity::assign_stitch_address(
                    fabric,
                    &node,
                    &config.fabric,
                    &config.addressing,
                    &mut pool,
                ).await;
                match assigned {
                    Ok(address) => state.node_address = Some(address),
                    // the probes still run, the interface may already carry an address
                    Err(err) => report.failed(Stage::AssignAddress, Severity::Logged, &err),
                }
                state.node = Some(node);
            }
            Err(err) => report.failed(Stage::AssignAddress, Severity::Logged, &err),
        },
        None => report.skipped(Stage::AssignAddress, "no slice was submitted"),
    }

    tracing::info!("Stage: pinging Chameleon gateway from FABRIC node");
    if cancelled(cancel, report, Stage::PingGateway) {
        return;
    }
    match &state.node {
        Some(node) => {
            let gateway = config.addressing.gateway_ip.into();
            if let Err(err) = connectivity::ping_from_node(fabric, node, gateway, config.fabric.ping_count).await {
                report.failed(Stage::PingGateway, Severity::Logged, &err);
            }
        }
        None => report.skipped(Stage::PingGateway, "no FABRIC node"),
    }

    tracing::info!("Stage: launching Chameleon servers");
    if cancelled(cancel, report, Stage::LaunchServers) {
        return;
    }
    if let Err(err) = workload::launch_servers(chameleon, &config.chameleon, &compute_reservation, &mut state.servers).await {
        report.failed(Stage::LaunchServers, Severity::Logged, &err);
    }

    if config.chameleon.wait_for_servers {
        tracing::info!("Stage: waiting for servers to become active");
        let server_policy = PollPolicy::from_secs(polling.server_interval_secs, deadline);
        if let Err(err) = workload::wait_for_servers(chameleon, &state.servers, &server_policy, cancel).await {
            report.failed(Stage::WaitForServers, Severity::Logged, &err);
        }
    }

    tracing::info!("Stage: resolving server addresses");
    if cancelled(cancel, report, Stage::ResolveFixedIps) {
        return;
    }
    if state.servers.is_empty() {
        report.skipped(Stage::ResolveFixedIps, "no servers were launched");
    } else if let Err(err) = workload::resolve_fixed_ips(chameleon, &state.servers, &mut state.fixed_ips).await {
        report.failed(Stage::ResolveFixedIps, Severity::Logged, &err);
    }

    tracing::info!("Stage: pinging Chameleon servers from FABRIC node");
    let Some(node) = &state.node else {
        report.skipped(Stage::PingServers, "no FABRIC node");
        return;
    };
    for (name, ip) in &state.fixed_ips {
        if cancelled(cancel, report, Stage::PingServers) {
            return;
        }
        tracing::info!("{name}: {ip}");
        if let Err(err) = connectivity::ping_from_node(fabric, node, *ip, config.fabric.ping_count).await {
            report.failed(Stage::PingServers, Severity::Logged, &err.context(format!("probing {name}")));
        }
    }
}

/// Site, request, submit and wait. The name is recorded before the submit call and the handle as
/// soon as the slice is accepted.
async fn build_slice(
    config: &StitchConfig,
    fabric: &dyn FabricApi,
    vlan: u32,
    policy: &PollPolicy,
    cancel: &CancellationToken,
    state: &mut StitchState,
) -> anyhow::Result<()> {
    let site = slice::choose_site(fabric, &config.fabric).await?;
    let request = slice::build_slice_request(&config.fabric, &site, vlan)?;
    state.slice_name = Some(request.name.clone());
    let handle = slice::submit_slice(fabric, &request).await?;
    state.slice = Some(handle.clone());
    slice::wait_for_slice(fabric, &handle, policy, cancel).await?;
    Ok(())
}
