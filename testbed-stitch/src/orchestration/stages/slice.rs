use anyhow::Context;
use tokio_util::sync::CancellationToken;
use testbed_stitch_schemas::fabric_models::{SliceHandle, SliceRequest, SliceStatus};
use testbed_stitch_schemas::settings::FabricConfig;
use crate::error::StitchError;
use crate::orchestration::poll::{poll_until, PollPolicy, PollStep};
use crate::platforms::FabricApi;

/// The configured site, or a random one when none is set.
pub async fn choose_site(fabric: &dyn FabricApi, config: &FabricConfig) -> anyhow::Result<String> {
    let site = match &config.site {
        Some(site) => site.clone(),
        None => fabric.random_site().await.context("picking a random FABRIC site")?,
    };
    tracing::info!("fabric site: {site}");
    Ok(site)
}

/// One node with a NIC, the facility port carrying the Chameleon VLAN, and an L2 network joining
/// the first NIC port to the facility port.
pub fn build_slice_request(config: &FabricConfig, site: &str, vlan: u32) -> anyhow::Result<SliceRequest> {
    let mut request = SliceRequest::new(config.slice_name.clone());
    let node = request.add_node(&config.node_name, site, &config.node_image);
    node.set_capacities(config.node_cores, config.node_ram_gb, config.node_disk_gb);
    let node_iface = node
        .add_component(&config.nic_model, &config.nic_name)
        .into_iter()
        .next()
        .with_context(|| format!("{} has no interfaces", &config.nic_model))?;
    let facility_iface = request.add_facility_port(&config.facility_port_name, &config.facility_port_site, vlan);
    request.add_l2network(&config.network_name, &[node_iface, facility_iface])?;
    Ok(request)
}

pub async fn submit_slice(fabric: &dyn FabricApi, request: &SliceRequest) -> anyhow::Result<SliceHandle> {
    let handle = fabric.submit_slice(request)
        .await
        .with_context(|| format!("submitting slice {}", &request.name))?;
    tracing::info!("submitted slice {} with id {}", &handle.name, handle.id);
    Ok(handle)
}

/// Wait for the slice to become stable. A slice that ended up in an error state or is being torn
/// down will not recover.
pub async fn wait_for_slice(
    fabric: &dyn FabricApi,
    slice: &SliceHandle,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> anyhow::Result<SliceStatus> {
    let what = format!("slice {}", slice.name);
    let status = poll_until(&what, policy, cancel, move || async move {
        match fabric.get_slice(slice).await {
            Ok(status) if status.state.is_ready() => PollStep::Ready(status),
            Ok(status) if status.state.is_failed() => PollStep::Failed(StitchError::SliceFailed {
                name: status.name,
                state: status.state,
            }.into()),
            Ok(status) => PollStep::Pending(format!("state {}", status.state)),
            Err(err) => {
                tracing::warn!("could not get slice state: {err:#}");
                PollStep::Pending("state unavailable".to_string())
            }
        }
    }).await?;
    tracing::info!("slice {} is {}", &status.name, status.state);
    Ok(status)
}
