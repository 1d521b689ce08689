use anyhow::Context;
use testbed_stitch_schemas::chameleon_models::SubnetRequest;
use testbed_stitch_schemas::settings::{AddressingConfig, ChameleonConfig};
use crate::orchestration::StitchState;
use crate::platforms::ChameleonApi;

/// Subnet on the stitched network, a router uplinked to the public network, and the subnet
/// attached to the router. Each resource is recorded as soon as it exists so a later failure
/// still leaves teardown with everything that was made.
pub async fn provision_subnet_router(
    api: &dyn ChameleonApi,
    config: &ChameleonConfig,
    addressing: &AddressingConfig,
    network_id: &str,
    state: &mut StitchState,
) -> anyhow::Result<()> {
    let request = SubnetRequest::new(
        config.subnet_name(),
        network_id.to_string(),
        addressing.subnet,
        &addressing.chameleon_pool,
        addressing.gateway_ip,
    );
    let subnet = api.create_subnet(&request)
        .await
        .with_context(|| format!("creating subnet {}", &request.name))?;
    tracing::info!("created subnet {} ({}) with cidr {}", &subnet.name, &subnet.id, &subnet.cidr);
    let subnet_id = subnet.id.clone();
    state.subnet = Some(subnet);

    let router_name = config.router_name();
    let router = api.create_router(&router_name, &config.public_network)
        .await
        .with_context(|| format!("creating router {router_name}"))?;
    tracing::info!("created router {} ({})", &router.name, &router.id);
    let router_id = router.id.clone();
    state.router = Some(router);

    api.add_subnet_to_router(&router_id, &subnet_id)
        .await
        .with_context(|| format!("attaching subnet {subnet_id} to router {router_id}"))?;
    state.router_attached = true;
    tracing::info!("attached subnet {subnet_id} to router {router_id}");
    Ok(())
}
