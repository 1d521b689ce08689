use std::net::{IpAddr, Ipv4Addr};
use anyhow::Context;
use serde::Deserialize;
use testbed_stitch_schemas::fabric_models::{SliceHandle, SliceNode};
use testbed_stitch_schemas::settings::{AddressingConfig, FabricConfig};
use crate::error::StitchError;
use crate::orchestration::address_pool::AddressPool;
use crate::platforms::{CommandOutput, FabricApi};

#[derive(Deserialize, Debug)]
struct LinkInfo {
    ifname: String,
    #[serde(default)]
    address: Option<String>,
}

/// Find the OS device name for a MAC address in the output of `ip -j link`.
fn os_interface_for_mac(ip_link_json: &str, mac: &str) -> anyhow::Result<String> {
    let links: Vec<LinkInfo> = serde_json::from_str(ip_link_json).context("parsing ip link output")?;
    links
        .into_iter()
        .find(|l| l.address.as_deref().map_or(false, |a| a.eq_ignore_ascii_case(mac)))
        .map(|l| l.ifname)
        .with_context(|| format!("no OS interface with mac {mac}"))
}

async fn run_checked(fabric: &dyn FabricApi, node: &SliceNode, command: &str) -> anyhow::Result<CommandOutput> {
    let output = fabric.execute(node, command)
        .await
        .with_context(|| format!("running `{command}` on {}", &node.name))?;
    if !output.success {
        return Err(StitchError::RemoteCommand {
            command: command.to_string(),
            stderr: output.stderr.trim().to_string(),
        }.into());
    }
    Ok(output)
}

/// The slice node as reported by FABRIC, with its management address and interfaces.
pub async fn stitch_node(
    fabric: &dyn FabricApi,
    slice: &SliceHandle,
    config: &FabricConfig,
) -> anyhow::Result<SliceNode> {
    fabric.get_node(slice, &config.node_name)
        .await
        .with_context(|| format!("getting node {} of slice {}", &config.node_name, &slice.name))
}

/// Give the node's stitched interface the next address from the pool and return that address.
pub async fn assign_stitch_address(
    fabric: &dyn FabricApi,
    node: &SliceNode,
    config: &FabricConfig,
    addressing: &AddressingConfig,
    pool: &mut AddressPool,
) -> anyhow::Result<Ipv4Addr> {
    let interface = node
        .get_interface(&config.network_name)
        .with_context(|| format!("node {} has no interface on {}", &node.name, &config.network_name))?;
    let mac = interface
        .mac
        .as_deref()
        .with_context(|| format!("interface {} has no mac address", &interface.name))?;

    let links = run_checked(fabric, node, "ip -j link").await?;
    let device = os_interface_for_mac(&links.stdout, mac)?;

    let address = pool.pop()?;
    tracing::info!("fabric node address: {address}");
    let prefix_len = addressing.subnet.prefix_len();
    run_checked(fabric, node, &format!("sudo ip link set dev {device} up")).await?;
    run_checked(fabric, node, &format!("sudo ip addr add {address}/{prefix_len} dev {device}")).await?;

    let shown = run_checked(fabric, node, &format!("ip addr show {device}")).await?;
    tracing::info!("{}", shown.stdout.trim_end());
    Ok(address)
}

/// ICMP probe from the FABRIC node. Packet loss is returned as an error for the caller to log.
pub async fn ping_from_node(
    fabric: &dyn FabricApi,
    node: &SliceNode,
    target: IpAddr,
    count: u32,
) -> anyhow::Result<CommandOutput> {
    let command = format!("ping -c {count} {target}");
    tracing::info!("pinging {target} from {}", &node.name);
    let output = fabric.execute(node, &command)
        .await
        .with_context(|| format!("running `{command}` on {}", &node.name))?;
    tracing::info!("{}", output.stdout.trim_end());
    if !output.stderr.is_empty() {
        tracing::info!("{}", output.stderr.trim_end());
    }
    if !output.success {
        return Err(StitchError::RemoteCommand {
            command,
            stderr: output.stderr.trim().to_string(),
        }.into());
    }
    Ok(output)
}
