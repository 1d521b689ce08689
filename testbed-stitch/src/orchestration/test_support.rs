//! Recording stand-ins for both platforms. Every call is appended to a log shared by the two
//! stubs, and any method can be told to fail.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use anyhow::anyhow;
use async_trait::async_trait;
use uuid::Uuid;
use testbed_stitch_schemas::chameleon_models::{
    Lease, LeaseRequest, LeaseStatus, Network, Reservation, ResourceType, Router, Server, ServerSpec,
    Subnet, SubnetRequest,
};
use testbed_stitch_schemas::fabric_models::{
    NodeInterface, SliceHandle, SliceNode, SliceRequest, SliceState, SliceStatus,
};
use crate::error::StitchError;
use crate::platforms::{ChameleonApi, CommandOutput, FabricApi};

pub const STUB_VLAN: u32 = 3210;
pub const STUB_MAC: &str = "0c:42:a1:78:f8:04";

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, call: String) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

#[derive(Default)]
struct Faults {
    failing: HashSet<String>,
    counters: Mutex<HashMap<String, usize>>,
}

impl Faults {
    /// Log the call and return the injected error if there is one.
    fn enter(&self, log: &CallLog, call: String, method: &str) -> anyhow::Result<usize> {
        log.push(call);
        let mut counters = self.counters.lock().unwrap();
        let count = counters.entry(method.to_string()).or_insert(0);
        *count += 1;
        if self.failing.contains(method) {
            return Err(anyhow!("injected failure in {method}"));
        }
        Ok(*count)
    }
}

pub struct StubChameleon {
    pub log: CallLog,
    faults: Faults,
    /// `get_lease` reports PENDING this many times first
    pub lease_pending_polls: usize,
    pub lease_final_status: LeaseStatus,
    pub lease_reservations: Vec<Reservation>,
    /// `get_network` has no segmentation id this many times first
    pub network_pending_polls: usize,
}

impl StubChameleon {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            faults: Faults::default(),
            lease_pending_polls: 0,
            lease_final_status: LeaseStatus::Active,
            lease_reservations: vec![
                Reservation { id: "res-compute".into(), resource_type: ResourceType::PhysicalHost, status: None },
                Reservation { id: "res-network".into(), resource_type: ResourceType::Network, status: None },
            ],
            network_pending_polls: 0,
        }
    }

    pub fn failing(mut self, method: &str) -> Self {
        self.faults.failing.insert(method.to_string());
        self
    }

    fn lease(&self, status: LeaseStatus) -> Lease {
        Lease {
            id: "lease-1".into(),
            name: "fabric_stitch_Lease".into(),
            status,
            reservations: self.lease_reservations.clone(),
            start_date: None,
            end_date: None,
        }
    }
}

#[async_trait]
impl ChameleonApi for StubChameleon {
    async fn create_lease(&self, _request: &LeaseRequest) -> anyhow::Result<Lease> {
        self.faults.enter(&self.log, "create_lease".into(), "create_lease")?;
        Ok(self.lease(LeaseStatus::Pending))
    }

    async fn get_lease(&self, _lease_id: &str) -> anyhow::Result<Lease> {
        let n = self.faults.enter(&self.log, "get_lease".into(), "get_lease")?;
        if n <= self.lease_pending_polls {
            Ok(self.lease(LeaseStatus::Pending))
        } else {
            Ok(self.lease(self.lease_final_status))
        }
    }

    async fn delete_lease(&self, lease_id: &str) -> anyhow::Result<()> {
        self.faults.enter(&self.log, format!("delete_lease:{lease_id}"), "delete_lease")?;
        Ok(())
    }

    async fn get_network(&self, name: &str) -> anyhow::Result<Network> {
        let n = self.faults.enter(&self.log, "get_network".into(), "get_network")?;
        let segmentation_id = if n <= self.network_pending_polls { None } else { Some(STUB_VLAN) };
        Ok(Network {
            id: "net-1".into(),
            name: name.to_string(),
            segmentation_id,
            status: Some("ACTIVE".into()),
        })
    }

    async fn delete_network(&self, network_id: &str) -> anyhow::Result<()> {
        self.faults.enter(&self.log, format!("delete_network:{network_id}"), "delete_network")?;
        Ok(())
    }

    async fn create_subnet(&self, request: &SubnetRequest) -> anyhow::Result<Subnet> {
        self.faults.enter(&self.log, "create_subnet".into(), "create_subnet")?;
        Ok(Subnet {
            id: "subnet-1".into(),
            name: request.name.clone(),
            network_id: request.network_id.clone(),
            cidr: request.cidr.to_string(),
            gateway_ip: Some(request.gateway_ip.to_string()),
            allocation_pools: request.allocation_pools.clone(),
        })
    }

    async fn delete_subnet(&self, subnet_id: &str) -> anyhow::Result<()> {
        self.faults.enter(&self.log, format!("delete_subnet:{subnet_id}"), "delete_subnet")?;
        Ok(())
    }

    async fn create_router(&self, name: &str, _gateway_network: &str) -> anyhow::Result<Router> {
        self.faults.enter(&self.log, "create_router".into(), "create_router")?;
        Ok(Router { id: "router-1".into(), name: name.to_string(), status: None })
    }

    async fn add_subnet_to_router(&self, _router_id: &str, _subnet_id: &str) -> anyhow::Result<()> {
        self.faults.enter(&self.log, "add_subnet_to_router".into(), "add_subnet_to_router")?;
        Ok(())
    }

    async fn remove_subnet_from_router(&self, _router_id: &str, _subnet_id: &str) -> anyhow::Result<()> {
        self.faults.enter(&self.log, "remove_subnet_from_router".into(), "remove_subnet_from_router")?;
        Ok(())
    }

    async fn delete_router(&self, router_id: &str) -> anyhow::Result<()> {
        self.faults.enter(&self.log, format!("delete_router:{router_id}"), "delete_router")?;
        Ok(())
    }

    async fn create_server(&self, spec: &ServerSpec) -> anyhow::Result<Server> {
        self.faults.enter(&self.log, format!("create_server:{}", spec.name), "create_server")?;
        Ok(Server { id: format!("id-{}", spec.name), name: spec.name.clone(), status: Some("BUILD".into()) })
    }

    async fn get_server_id(&self, name: &str) -> anyhow::Result<String> {
        self.faults.enter(&self.log, format!("get_server_id:{name}"), "get_server_id")?;
        Ok(format!("id-{name}"))
    }

    async fn get_server(&self, server_id: &str) -> anyhow::Result<Server> {
        self.faults.enter(&self.log, format!("get_server:{server_id}"), "get_server")?;
        Ok(Server { id: server_id.to_string(), name: String::new(), status: Some("ACTIVE".into()) })
    }

    async fn get_server_fixed_ip(&self, server_id: &str) -> anyhow::Result<IpAddr> {
        self.faults.enter(&self.log, format!("get_server_fixed_ip:{server_id}"), "get_server_fixed_ip")?;
        Ok(IpAddr::V4(Ipv4Addr::new(192, 168, 100, 101)))
    }

    async fn delete_server(&self, server_id: &str) -> anyhow::Result<()> {
        self.faults.enter(&self.log, format!("delete_server:{server_id}"), "delete_server")?;
        Ok(())
    }
}

pub struct StubFabric {
    pub log: CallLog,
    faults: Faults,
    pub slice_state: SliceState,
    /// Whether `find_slice` sees the slice on the orchestrator.
    pub slice_exists: bool,
    /// Remote commands starting with any of these exit non zero.
    pub failing_commands: Vec<String>,
}

impl StubFabric {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            faults: Faults::default(),
            slice_state: SliceState::StableOK,
            slice_exists: true,
            failing_commands: Vec::new(),
        }
    }

    pub fn failing(mut self, method: &str) -> Self {
        self.faults.failing.insert(method.to_string());
        self
    }

    pub fn failing_command(mut self, prefix: &str) -> Self {
        self.failing_commands.push(prefix.to_string());
        self
    }

    pub fn node() -> SliceNode {
        SliceNode {
            name: "node1".into(),
            site: "TACC".into(),
            management_ip: Some("129.114.110.5".into()),
            username: "ubuntu".into(),
            interfaces: vec![NodeInterface {
                name: "node1-nic1-p1".into(),
                network_name: Some("net_facility_port".into()),
                mac: Some(STUB_MAC.to_uppercase()),
            }],
        }
    }
}

#[async_trait]
impl FabricApi for StubFabric {
    async fn random_site(&self) -> anyhow::Result<String> {
        self.faults.enter(&self.log, "random_site".into(), "random_site")?;
        Ok("TACC".into())
    }

    async fn submit_slice(&self, request: &SliceRequest) -> anyhow::Result<SliceHandle> {
        self.faults.enter(&self.log, "submit_slice".into(), "submit_slice")?;
        Ok(SliceHandle { id: Uuid::nil(), name: request.name.clone() })
    }

    async fn get_slice(&self, slice: &SliceHandle) -> anyhow::Result<SliceStatus> {
        self.faults.enter(&self.log, "get_slice".into(), "get_slice")?;
        Ok(SliceStatus { slice_id: slice.id, name: slice.name.clone(), state: self.slice_state })
    }

    async fn find_slice(&self, name: &str) -> anyhow::Result<SliceHandle> {
        self.faults.enter(&self.log, format!("find_slice:{name}"), "find_slice")?;
        if !self.slice_exists {
            return Err(StitchError::NotFound { kind: "slice".into(), name: name.into() }.into());
        }
        Ok(SliceHandle { id: Uuid::nil(), name: name.into() })
    }

    async fn get_node(&self, _slice: &SliceHandle, node_name: &str) -> anyhow::Result<SliceNode> {
        self.faults.enter(&self.log, "get_node".into(), "get_node")?;
        if node_name != "node1" {
            return Err(StitchError::NotFound { kind: "node".into(), name: node_name.into() }.into());
        }
        Ok(Self::node())
    }

    async fn execute(&self, _node: &SliceNode, command: &str) -> anyhow::Result<CommandOutput> {
        self.faults.enter(&self.log, format!("execute:{command}"), "execute")?;
        let failing_ping = command.starts_with("ping") && self.faults.failing.contains("ping");
        if self.failing_commands.iter().any(|prefix| command.starts_with(prefix.as_str())) {
            return Ok(CommandOutput {
                stdout: String::new(),
                stderr: "RTNETLINK answers: File exists".into(),
                success: false,
            });
        }
        let stdout = if command.starts_with("ip -j link") {
            format!(r#"[{{"ifindex":1,"ifname":"lo","address":"00:00:00:00:00:00"}},{{"ifindex":3,"ifname":"ens7","address":"{STUB_MAC}"}}]"#)
        } else {
            String::new()
        };
        Ok(CommandOutput {
            stdout,
            stderr: if failing_ping { "100% packet loss".into() } else { String::new() },
            success: !failing_ping,
        })
    }

    async fn delete_slice(&self, slice: &SliceHandle) -> anyhow::Result<()> {
        self.faults.enter(&self.log, format!("delete_slice:{}", slice.name), "delete_slice")?;
        Ok(())
    }
}
