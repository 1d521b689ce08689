use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use testbed_stitch_schemas::chameleon_models::{
    Lease, LeaseRequest, LeaseStatus, LeaseWindow, ReservationRequest, ResourceType,
};
use testbed_stitch_schemas::settings::ChameleonConfig;
use crate::error::StitchError;
use crate::orchestration::poll::{poll_until, PollPolicy, PollStep};
use crate::orchestration::ReservationIds;
use crate::platforms::ChameleonApi;

/// The lease request for the configured hosts plus a network that the stitch provider can reach.
pub fn lease_request(config: &ChameleonConfig, now: DateTime<Utc>) -> LeaseRequest {
    let window = LeaseWindow::starting_at(now);
    let reservations = vec![
        ReservationRequest::physical_host(config.server_count, &config.node_type),
        ReservationRequest::stitched_network(&config.network_name(), &config.stitch_provider),
    ];
    LeaseRequest::new(config.lease_name(), &window, reservations)
}

pub async fn create_lease(
    api: &dyn ChameleonApi,
    config: &ChameleonConfig,
    now: DateTime<Utc>,
) -> anyhow::Result<Lease> {
    let request = lease_request(config, now);
    tracing::info!("requesting lease {} from {} to {}", &request.name, &request.start_date, &request.end_date);
    tracing::debug!("lease request: {:?}", &request.reservations);
    let lease = api.create_lease(&request)
        .await
        .with_context(|| format!("creating lease {}", &request.name))?;
    tracing::info!("lease {} created with id {} ({})", &lease.name, &lease.id, lease.status);
    Ok(lease)
}

/// Block until the lease is ACTIVE. A lease in ERROR will never start so that ends the wait, a
/// failed status request is treated as not ready yet.
pub async fn wait_for_active(
    api: &dyn ChameleonApi,
    lease: &Lease,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> anyhow::Result<Lease> {
    let what = format!("lease {}", lease.name);
    let lease_id = lease.id.as_str();
    let lease_name = lease.name.as_str();
    poll_until(&what, policy, cancel, move || async move {
        match api.get_lease(lease_id).await {
            Ok(current) => match current.status {
                LeaseStatus::Active => PollStep::Ready(current),
                LeaseStatus::Error => PollStep::Failed(StitchError::LeaseFailed {
                    name: lease_name.to_string(),
                    status: current.status,
                }.into()),
                status => PollStep::Pending(format!("status {status}")),
            },
            Err(err) => {
                tracing::warn!("could not get lease status: {err:#}");
                PollStep::Pending("status unavailable".to_string())
            }
        }
    }).await
}

/// Ids of the compute host and network reservations held by an active lease.
pub fn reservation_ids(lease: &Lease) -> anyhow::Result<ReservationIds> {
    let compute = lease
        .reservation_id(ResourceType::PhysicalHost)
        .ok_or(StitchError::MissingReservation(ResourceType::PhysicalHost))?;
    let network = lease
        .reservation_id(ResourceType::Network)
        .ok_or(StitchError::MissingReservation(ResourceType::Network))?;
    tracing::info!("compute reservation id: {compute}");
    tracing::info!("network reservation id: {network}");
    Ok(ReservationIds {
        compute: compute.to_string(),
        network: network.to_string(),
    })
}
