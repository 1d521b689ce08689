use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use uuid::Uuid;

/// The topology of a slice, built up locally and then submitted in a single request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub struct SliceRequest {
    pub name: String,
    pub nodes: Vec<NodeRequest>,
    pub facility_ports: Vec<FacilityPortRequest>,
    pub networks: Vec<L2NetworkRequest>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct NodeRequest {
    pub name: String,
    pub site: String,
    pub image: String,
    pub cores: u32,
    pub ram: u32,
    pub disk: u32,
    pub components: Vec<ComponentRequest>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ComponentRequest {
    pub name: String,
    pub model: String,
    pub interfaces: Vec<String>,
}

/// A facility port is the hand off to an external facility, here the Chameleon VLAN.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct FacilityPortRequest {
    pub name: String,
    pub site: String,
    pub vlan: String,
    pub interface: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum NetworkServiceType {
    L2Bridge,
    #[serde(rename = "L2STS")]
    #[strum(serialize = "L2STS")]
    L2Sts,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct L2NetworkRequest {
    pub name: String,
    pub service_type: NetworkServiceType,
    pub interfaces: Vec<String>,
}

impl SliceRequest {
    pub fn new(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    pub fn add_node(&mut self, name: &str, site: &str, image: &str) -> &mut NodeRequest {
        self.nodes.push(NodeRequest {
            name: name.to_string(),
            site: site.to_string(),
            image: image.to_string(),
            cores: 2,
            ram: 8,
            disk: 10,
            components: Vec::new(),
        });
        let last = self.nodes.len() - 1;
        &mut self.nodes[last]
    }

    /// Returns the name of the facility port's interface so it can be joined to a network.
    pub fn add_facility_port(&mut self, name: &str, site: &str, vlan: u32) -> String {
        let interface = format!("{name}-int");
        self.facility_ports.push(FacilityPortRequest {
            name: name.to_string(),
            site: site.to_string(),
            vlan: vlan.to_string(),
            interface: interface.clone(),
        });
        interface
    }

    /// Join interfaces in an L2 network. Interfaces all on one site get a bridge, interfaces
    /// spread over two sites get a site to site circuit.
    pub fn add_l2network(&mut self, name: &str, interfaces: &[String]) -> anyhow::Result<&L2NetworkRequest> {
        if interfaces.is_empty() {
            bail!("network {name} needs at least one interface");
        }
        let mut sites: Vec<&str> = Vec::new();
        for interface in interfaces {
            let site = self.interface_site(interface)
                .with_context(|| format!("finding interface {interface} for network {name}"))?;
            if !sites.contains(&site) {
                sites.push(site);
            }
        }
        let service_type = match sites.len() {
            1 => NetworkServiceType::L2Bridge,
            2 => NetworkServiceType::L2Sts,
            n => bail!("network {name} spans {n} sites, at most 2 are supported"),
        };
        tracing::debug!("network {name} joins sites {sites:?} with {service_type}");
        self.networks.push(L2NetworkRequest {
            name: name.to_string(),
            service_type,
            interfaces: interfaces.to_vec(),
        });
        let last = self.networks.len() - 1;
        Ok(&self.networks[last])
    }

    fn interface_site(&self, interface: &str) -> Option<&str> {
        for node in &self.nodes {
            if node.components.iter().any(|c| c.interfaces.iter().any(|i| i == interface)) {
                return Some(&node.site);
            }
        }
        self.facility_ports
            .iter()
            .find(|fp| fp.interface == interface)
            .map(|fp| fp.site.as_str())
    }
}

impl NodeRequest {
    pub fn set_capacities(&mut self, cores: u32, ram: u32, disk: u32) -> &mut Self {
        self.cores = cores;
        self.ram = ram;
        self.disk = disk;
        self
    }

    /// Add a NIC, returning its interface names in port order.
    pub fn add_component(&mut self, model: &str, name: &str) -> Vec<String> {
        let ports = nic_port_count(model);
        let interfaces: Vec<String> = (1..=ports)
            .map(|port| format!("{}-{}-p{port}", self.name, name))
            .collect();
        self.components.push(ComponentRequest {
            name: name.to_string(),
            model: model.to_string(),
            interfaces: interfaces.clone(),
        });
        interfaces
    }
}

fn nic_port_count(model: &str) -> u32 {
    match model {
        "NIC_ConnectX_5" | "NIC_ConnectX_6" => 2,
        _ => 1,
    }
}

/// Login user for the stock images.
pub fn default_username(image: &str) -> &'static str {
    if image.starts_with("default_rocky") {
        "rocky"
    } else if image.starts_with("default_centos") {
        "centos"
    } else if image.starts_with("default_debian") {
        "debian"
    } else if image.starts_with("default_fedora") {
        "fedora"
    } else {
        "ubuntu"
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SliceState {
    Nascent,
    Configuring,
    StableOK,
    StableError,
    ModifyOK,
    ModifyError,
    Closing,
    Dead,
    #[serde(other)]
    Unknown,
}

impl SliceState {
    pub fn is_ready(&self) -> bool {
        matches!(self, SliceState::StableOK | SliceState::ModifyOK)
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            SliceState::StableError | SliceState::ModifyError | SliceState::Closing | SliceState::Dead
        )
    }
}

/// Identifies a submitted slice.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SliceHandle {
    pub id: Uuid,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SliceStatus {
    pub slice_id: Uuid,
    pub name: String,
    pub state: SliceState,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeInterface {
    pub name: String,
    pub network_name: Option<String>,
    pub mac: Option<String>,
}

/// A provisioned node as reported back by the orchestrator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SliceNode {
    pub name: String,
    pub site: String,
    pub management_ip: Option<String>,
    pub username: String,
    pub interfaces: Vec<NodeInterface>,
}

impl SliceNode {
    pub fn get_interface(&self, network_name: &str) -> Option<&NodeInterface> {
        self.interfaces
            .iter()
            .find(|i| i.network_name.as_deref() == Some(network_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stitch_request(node_site: &str) -> (SliceRequest, String, String) {
        let mut slice = SliceRequest::new("chameleon_stitch".into());
        let node_iface = slice
            .add_node("node1", node_site, "default_ubuntu_20")
            .add_component("NIC_ConnectX_5", "nic1")
            .remove(0);
        let fp_iface = slice.add_facility_port("Chameleon-StarLight", "STAR", 3210);
        (slice, node_iface, fp_iface)
    }

    #[test]
    fn test_component_interfaces() {
        let mut slice = SliceRequest::new("s".into());
        let node = slice.add_node("node1", "TACC", "default_ubuntu_20");
        assert_eq!(node.add_component("NIC_ConnectX_5", "nic1"), vec!["node1-nic1-p1", "node1-nic1-p2"]);
        assert_eq!(node.add_component("NIC_Basic", "nic2"), vec!["node1-nic2-p1"]);
        node.set_capacities(4, 16, 100);
        assert_eq!(slice.nodes[0].cores, 4);
        assert_eq!(slice.nodes[0].components.len(), 2);
    }

    #[test]
    fn test_facility_port_carries_vlan() {
        let (slice, _, fp_iface) = stitch_request("TACC");
        assert_eq!(fp_iface, "Chameleon-StarLight-int");
        assert_eq!(slice.facility_ports[0].vlan, "3210");
        assert_eq!(slice.facility_ports[0].site, "STAR");
    }

    #[test]
    fn test_cross_site_network_is_sts() {
        let (mut slice, node_iface, fp_iface) = stitch_request("TACC");
        let net = slice.add_l2network("net_facility_port", &[node_iface.clone(), fp_iface.clone()]).unwrap();
        assert_eq!(net.service_type, NetworkServiceType::L2Sts);
        assert_eq!(net.interfaces, vec![node_iface, fp_iface]);
    }

    #[test]
    fn test_same_site_network_is_bridge() {
        let (mut slice, node_iface, fp_iface) = stitch_request("STAR");
        let net = slice.add_l2network("net_facility_port", &[node_iface, fp_iface]).unwrap();
        assert_eq!(net.service_type, NetworkServiceType::L2Bridge);
    }

    #[test]
    fn test_unknown_interface_rejected() {
        let (mut slice, node_iface, _) = stitch_request("TACC");
        assert!(slice.add_l2network("n", &[node_iface, "missing".into()]).is_err());
        assert!(slice.add_l2network("n", &[]).is_err());
        assert!(slice.networks.is_empty());
    }

    #[test]
    fn test_slice_state_parsing() {
        let state: SliceState = serde_json::from_str("\"StableOK\"").unwrap();
        assert!(state.is_ready());
        let state: SliceState = serde_json::from_str("\"StableError\"").unwrap();
        assert!(state.is_failed());
        let state: SliceState = serde_json::from_str("\"AllocatedOK\"").unwrap();
        assert_eq!(state, SliceState::Unknown);
        assert!(!state.is_ready() && !state.is_failed());
    }

    #[test]
    fn test_default_username() {
        assert_eq!(default_username("default_ubuntu_20"), "ubuntu");
        assert_eq!(default_username("default_rocky_9"), "rocky");
        assert_eq!(default_username("default_centos_8"), "centos");
    }

    #[test]
    fn test_get_interface_by_network() {
        let node = SliceNode {
            name: "node1".into(),
            site: "TACC".into(),
            management_ip: Some("10.0.0.1".into()),
            username: "ubuntu".into(),
            interfaces: vec![
                NodeInterface { name: "node1-nic1-p1".into(), network_name: Some("net_facility_port".into()), mac: Some("aa:bb:cc:dd:ee:ff".into()) },
                NodeInterface { name: "node1-nic1-p2".into(), network_name: None, mac: None },
            ],
        };
        assert_eq!(node.get_interface("net_facility_port").unwrap().name, "node1-nic1-p1");
        assert!(node.get_interface("other").is_none());
    }
}
