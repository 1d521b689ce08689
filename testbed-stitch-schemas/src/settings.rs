use std::fmt;
use std::fmt::Formatter;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{bail, Context};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use validator::Validate;
use crate::{
    ENV_FABRIC_BASTION_KEY_LOCATION, ENV_FABRIC_BASTION_USERNAME, ENV_FABRIC_SLICE_PRIVATE_KEY_FILE,
    ENV_FABRIC_SLICE_PUBLIC_KEY_FILE, ENV_FABRIC_TOKEN_LOCATION, ENV_OS_AUTH_URL, ENV_OS_PROJECT_ID,
    ENV_OS_REGION_NAME,
};

/// The full runtime configuration. It is built once at startup and then only ever handed out by
/// reference, every stage reads the names and ranges it needs from here.
#[derive(Deserialize, Serialize, Debug, Clone, Default, Validate)]
#[serde(rename_all = "snake_case")]
pub struct StitchConfig {
    #[serde(default)]
    #[validate]
    pub chameleon: ChameleonConfig,
    #[serde(default)]
    #[validate]
    pub fabric: FabricConfig,
    #[serde(default)]
    pub addressing: AddressingConfig,
    #[serde(default)]
    #[validate]
    pub polling: PollingConfig,
}

impl StitchConfig {
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path).await.with_context(|| "Reading config file")?;
        let value: Self = serde_yaml::from_str(&text).with_context(|| "Parsing config YAML")?;
        Ok(value)
    }

    /// Load the config file if it exists, otherwise fall back to the built in defaults. Environment
    /// variables are applied on top and the result is checked before it is returned.
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config = if path.is_file() {
            tracing::info!("loading config from {:?}", path);
            Self::load_from_file(path).await?
        } else {
            tracing::info!("no config file at {:?}, using defaults", path);
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.check()?;
        Ok(config)
    }

    /// Fill any settings that were not given in the file from the environment, using the variable
    /// names that the platform tooling already exports.
    /// `OS_AUTH_URL` and `OS_REGION_NAME` always win so that a sourced openrc file is respected.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(auth_url) = lookup(ENV_OS_AUTH_URL) {
            self.chameleon.auth_url = auth_url;
        }
        if let Some(region) = lookup(ENV_OS_REGION_NAME) {
            self.chameleon.region_name = region;
        }
        if self.chameleon.project_id.is_none() {
            self.chameleon.project_id = lookup(ENV_OS_PROJECT_ID);
        }
        let fabric = &mut self.fabric;
        if fabric.token_location.is_none() {
            fabric.token_location = lookup(ENV_FABRIC_TOKEN_LOCATION).map(PathBuf::from);
        }
        if fabric.bastion_username.is_none() {
            fabric.bastion_username = lookup(ENV_FABRIC_BASTION_USERNAME);
        }
        if fabric.bastion_key_location.is_none() {
            fabric.bastion_key_location = lookup(ENV_FABRIC_BASTION_KEY_LOCATION).map(PathBuf::from);
        }
        if fabric.slice_private_key_location.is_none() {
            fabric.slice_private_key_location = lookup(ENV_FABRIC_SLICE_PRIVATE_KEY_FILE).map(PathBuf::from);
        }
        if fabric.slice_public_key_location.is_none() {
            fabric.slice_public_key_location = lookup(ENV_FABRIC_SLICE_PUBLIC_KEY_FILE).map(PathBuf::from);
        }
    }

    /// Field level validation followed by the addressing checks that span several fields.
    pub fn check(&self) -> anyhow::Result<()> {
        self.validate().with_context(|| "Validating config semantics")?;
        self.addressing.check().context("checking addressing config")?;
        Ok(())
    }
}

impl fmt::Display for StitchConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string_pretty(&self).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

/// Settings for the lease, network and compute side (Chameleon).
#[derive(Deserialize, Serialize, Debug, Clone, Validate)]
#[serde(rename_all = "snake_case", default)]
pub struct ChameleonConfig {
    /// prepended to every resource created on Chameleon
    #[validate(length(min = 1))]
    pub prefix: String,
    pub image_name: String,
    pub node_type: String,
    pub flavor_name: String,
    pub stitch_provider: String,
    #[validate(range(min = 1))]
    pub server_count: u32,
    pub key_name: String,
    /// name of the external network the router uplinks to
    pub public_network: String,
    pub auth_url: String,
    pub region_name: String,
    pub project_id: Option<String>,
    pub user_domain_name: String,
    #[serde(default)]
    pub endpoints: EndpointOverrides,
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
    /// wait for every server to report ACTIVE before probing them, off unless asked for
    pub wait_for_servers: bool,
}

impl ChameleonConfig {
    pub fn server_name(&self, index: u32) -> String {
        format!("{}Server_{index}", self.prefix)
    }

    pub fn server_names(&self) -> Vec<String> {
        (0..self.server_count).map(|i| self.server_name(i)).collect()
    }

    pub fn network_name(&self) -> String {
        format!("{}Net", self.prefix)
    }

    pub fn subnet_name(&self) -> String {
        format!("{}Subnet", self.prefix)
    }

    pub fn router_name(&self) -> String {
        format!("{}Router", self.prefix)
    }

    pub fn lease_name(&self) -> String {
        format!("{}Lease", self.prefix)
    }
}

impl Default for ChameleonConfig {
    fn default() -> Self {
        Self {
            prefix: "fabric_stitch_".to_string(),
            image_name: "CC-Ubuntu20.04".to_string(),
            node_type: "compute_cascadelake_r".to_string(),
            flavor_name: "baremetal".to_string(),
            stitch_provider: "fabric".to_string(),
            server_count: 1,
            key_name: "fabric_stitch_key".to_string(),
            public_network: "public".to_string(),
            auth_url: "https://chi.uc.chameleoncloud.org:5000/v3".to_string(),
            region_name: "CHI@UC".to_string(),
            project_id: None,
            user_domain_name: "Default".to_string(),
            endpoints: EndpointOverrides::default(),
            timeout_secs: 60,
            wait_for_servers: false,
        }
    }
}

/// Explicit service URLs, any that are set win over the keystone catalog.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "snake_case")]
pub struct EndpointOverrides {
    pub reservation: Option<String>,
    pub network: Option<String>,
    pub compute: Option<String>,
    pub image: Option<String>,
}

/// Settings for the slice side (FABRIC).
#[derive(Deserialize, Serialize, Debug, Clone, Validate)]
#[serde(rename_all = "snake_case", default)]
pub struct FabricConfig {
    #[validate(length(min = 1))]
    pub slice_name: String,
    pub node_name: String,
    pub node_image: String,
    /// leave empty to have a random site picked
    pub site: Option<String>,
    #[validate(range(min = 1))]
    pub node_cores: u32,
    #[validate(range(min = 1))]
    pub node_ram_gb: u32,
    #[validate(range(min = 1))]
    pub node_disk_gb: u32,
    pub nic_model: String,
    pub nic_name: String,
    pub facility_port_name: String,
    pub facility_port_site: String,
    pub network_name: String,
    #[validate(range(min = 1))]
    pub ping_count: u32,
    pub orchestrator_url: String,
    pub token_location: Option<PathBuf>,
    pub bastion_host: String,
    pub bastion_username: Option<String>,
    pub bastion_key_location: Option<PathBuf>,
    pub slice_private_key_location: Option<PathBuf>,
    pub slice_public_key_location: Option<PathBuf>,
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            slice_name: "chameleon_stitch".to_string(),
            node_name: "node1".to_string(),
            node_image: "default_ubuntu_20".to_string(),
            site: None,
            node_cores: 2,
            node_ram_gb: 8,
            node_disk_gb: 10,
            nic_model: "NIC_ConnectX_5".to_string(),
            nic_name: "nic1".to_string(),
            facility_port_name: "Chameleon-StarLight".to_string(),
            facility_port_site: "STAR".to_string(),
            network_name: "net_facility_port".to_string(),
            ping_count: 5,
            orchestrator_url: "https://orchestrator.fabric-testbed.net".to_string(),
            token_location: None,
            bastion_host: "bastion.fabric-testbed.net".to_string(),
            bastion_username: None,
            bastion_key_location: None,
            slice_private_key_location: None,
            slice_public_key_location: None,
            timeout_secs: 120,
        }
    }
}

/// An inclusive range of IPv4 addresses.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl AddressRange {
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.start <= ip && ip <= self.end
    }

    pub fn overlaps(&self, other: &AddressRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn len(&self) -> u64 {
        if self.end < self.start {
            return 0;
        }
        u64::from(u32::from(self.end) - u32::from(self.start)) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// The stitched subnet is shared by both sides. Chameleon's DHCP hands out addresses from
/// `chameleon_pool`, FABRIC interfaces are statically given addresses from `fabric_pool`.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "snake_case", default)]
pub struct AddressingConfig {
    pub subnet: Ipv4Net,
    pub gateway_ip: Ipv4Addr,
    pub chameleon_pool: AddressRange,
    pub fabric_pool: AddressRange,
}

impl AddressingConfig {
    pub fn check(&self) -> anyhow::Result<()> {
        for (name, range) in [("chameleon_pool", &self.chameleon_pool), ("fabric_pool", &self.fabric_pool)] {
            if range.end < range.start {
                bail!("{name} {range} ends before it starts");
            }
            if !self.subnet.contains(&range.start) || !self.subnet.contains(&range.end) {
                bail!("{name} {range} is not inside subnet {}", self.subnet);
            }
            if range.contains(self.subnet.network()) || range.contains(self.subnet.broadcast()) {
                bail!("{name} {range} includes the network or broadcast address of {}", self.subnet);
            }
            if range.contains(self.gateway_ip) {
                bail!("{name} {range} includes the gateway {}", self.gateway_ip);
            }
        }
        if self.chameleon_pool.overlaps(&self.fabric_pool) {
            bail!("chameleon_pool {} and fabric_pool {} overlap", self.chameleon_pool, self.fabric_pool);
        }
        if !self.subnet.contains(&self.gateway_ip) {
            bail!("gateway {} is not inside subnet {}", self.gateway_ip, self.subnet);
        }
        Ok(())
    }
}

impl Default for AddressingConfig {
    fn default() -> Self {
        Self {
            subnet: Ipv4Net::new(Ipv4Addr::new(192, 168, 100, 0), 24)
                .unwrap_or_else(|_| Ipv4Net::from(Ipv4Addr::new(192, 168, 100, 0))),
            gateway_ip: Ipv4Addr::new(192, 168, 100, 1),
            chameleon_pool: AddressRange::new(Ipv4Addr::new(192, 168, 100, 100), Ipv4Addr::new(192, 168, 100, 150)),
            fabric_pool: AddressRange::new(Ipv4Addr::new(192, 168, 100, 200), Ipv4Addr::new(192, 168, 100, 250)),
        }
    }
}

/// Intervals for the fixed rate polling loops. There is no deadline unless one is configured, the
/// platforms give no guarantee of how long provisioning takes.
#[derive(Deserialize, Serialize, Debug, Clone, Validate)]
#[serde(rename_all = "snake_case", default)]
pub struct PollingConfig {
    #[validate(range(min = 1))]
    pub lease_interval_secs: u64,
    #[validate(range(min = 1))]
    pub network_interval_secs: u64,
    #[validate(range(min = 1))]
    pub slice_interval_secs: u64,
    #[validate(range(min = 1))]
    pub server_interval_secs: u64,
    pub deadline_secs: Option<u64>,
}

impl PollingConfig {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            lease_interval_secs: 10,
            network_interval_secs: 10,
            slice_interval_secs: 20,
            server_interval_secs: 10,
            deadline_secs: None,
        }
    }
}
