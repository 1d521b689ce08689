use std::net::IpAddr;
use async_trait::async_trait;
use testbed_stitch_schemas::chameleon_models::{Lease, LeaseRequest, Network, Router, Server, ServerSpec, Subnet, SubnetRequest};
use testbed_stitch_schemas::fabric_models::{SliceHandle, SliceNode, SliceRequest, SliceStatus};

pub mod chameleon;
pub mod fabric;
pub mod http;
pub mod ssh;

/// Operations consumed from Chameleon (Blazar leases, Neutron networking, Nova compute). The
/// orchestration only talks to this trait so that the stages can be exercised against stubs.
#[async_trait]
pub trait ChameleonApi: Send + Sync {
    async fn create_lease(&self, request: &LeaseRequest) -> anyhow::Result<Lease>;
    async fn get_lease(&self, lease_id: &str) -> anyhow::Result<Lease>;
    async fn delete_lease(&self, lease_id: &str) -> anyhow::Result<()>;

    async fn get_network(&self, name: &str) -> anyhow::Result<Network>;
    async fn delete_network(&self, network_id: &str) -> anyhow::Result<()>;
    async fn create_subnet(&self, request: &SubnetRequest) -> anyhow::Result<Subnet>;
    async fn delete_subnet(&self, subnet_id: &str) -> anyhow::Result<()>;
    async fn create_router(&self, name: &str, gateway_network: &str) -> anyhow::Result<Router>;
    async fn add_subnet_to_router(&self, router_id: &str, subnet_id: &str) -> anyhow::Result<()>;
    async fn remove_subnet_from_router(&self, router_id: &str, subnet_id: &str) -> anyhow::Result<()>;
    async fn delete_router(&self, router_id: &str) -> anyhow::Result<()>;

    async fn create_server(&self, spec: &ServerSpec) -> anyhow::Result<Server>;
    async fn get_server_id(&self, name: &str) -> anyhow::Result<String>;
    async fn get_server(&self, server_id: &str) -> anyhow::Result<Server>;
    async fn get_server_fixed_ip(&self, server_id: &str) -> anyhow::Result<IpAddr>;
    async fn delete_server(&self, server_id: &str) -> anyhow::Result<()>;
}

/// Operations consumed from FABRIC, the orchestrator API plus command execution on slice nodes.
#[async_trait]
pub trait FabricApi: Send + Sync {
    async fn random_site(&self) -> anyhow::Result<String>;
    async fn submit_slice(&self, request: &SliceRequest) -> anyhow::Result<SliceHandle>;
    async fn get_slice(&self, slice: &SliceHandle) -> anyhow::Result<SliceStatus>;
    /// The live slice with this name, `StitchError::NotFound` if there is none.
    async fn find_slice(&self, name: &str) -> anyhow::Result<SliceHandle>;
    async fn get_node(&self, slice: &SliceHandle, node_name: &str) -> anyhow::Result<SliceNode>;
    /// A command exiting non zero is not an error here, check `CommandOutput::success`.
    async fn execute(&self, node: &SliceNode, command: &str) -> anyhow::Result<CommandOutput>;
    async fn delete_slice(&self, slice: &SliceHandle) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}
