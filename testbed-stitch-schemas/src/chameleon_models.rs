use std::net::{IpAddr, Ipv4Addr};
use chrono::{DateTime, Duration, Timelike, Utc};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};
use crate::settings::AddressRange;

/// Blazar only accepts minute resolution dates in this format.
pub const BLAZAR_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// The time window of a lease. The start is pushed one minute into the future and rounded up to
/// the next whole minute, Blazar truncates to the minute and rejects leases it thinks started in
/// the past.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl LeaseWindow {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        let start = now + Duration::minutes(1);
        let truncated = start
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(start);
        let start = if truncated < start {
            truncated + Duration::minutes(1)
        } else {
            truncated
        };
        Self {
            start,
            end: now + Duration::days(1),
        }
    }

    pub fn start_date(&self) -> String {
        self.start.format(BLAZAR_TIME_FORMAT).to_string()
    }

    pub fn end_date(&self) -> String {
        self.end.format(BLAZAR_TIME_FORMAT).to_string()
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct LeaseRequest {
    pub name: String,
    pub start_date: String,
    pub end_date: String,
    pub reservations: Vec<ReservationRequest>,
    pub events: Vec<serde_json::Value>,
}

impl LeaseRequest {
    pub fn new(name: String, window: &LeaseWindow, reservations: Vec<ReservationRequest>) -> Self {
        Self {
            name,
            start_date: window.start_date(),
            end_date: window.end_date(),
            reservations,
            events: Vec::new(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "resource_type")]
pub enum ReservationRequest {
    #[serde(rename = "physical:host")]
    PhysicalHost {
        min: u32,
        max: u32,
        hypervisor_properties: String,
        resource_properties: String,
    },
    #[serde(rename = "network")]
    Network {
        network_name: String,
        network_properties: String,
        resource_properties: String,
    },
}

impl ReservationRequest {
    /// Reserve exactly `count` bare metal hosts of the given node type.
    pub fn physical_host(count: u32, node_type: &str) -> Self {
        Self::PhysicalHost {
            min: count,
            max: count,
            hypervisor_properties: String::new(),
            resource_properties: serde_json::json!(["==", "$node_type", node_type]).to_string(),
        }
    }

    /// Reserve an isolated network on a segment that the stitch provider can reach.
    pub fn stitched_network(network_name: &str, stitch_provider: &str) -> Self {
        Self::Network {
            network_name: network_name.to_string(),
            network_properties: String::new(),
            resource_properties: serde_json::json!(["==", "$stitch_provider", stitch_provider]).to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum ResourceType {
    #[serde(rename = "physical:host")]
    #[strum(serialize = "physical:host")]
    PhysicalHost,
    #[serde(rename = "network")]
    #[strum(serialize = "network")]
    Network,
    #[serde(rename = "virtual:floatingip")]
    #[strum(serialize = "virtual:floatingip")]
    FloatingIp,
    #[serde(other)]
    #[strum(serialize = "other")]
    Other,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaseStatus {
    Pending,
    Starting,
    Active,
    Updating,
    Terminating,
    Terminated,
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Reservation {
    pub id: String,
    pub resource_type: ResourceType,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Lease {
    pub id: String,
    pub name: String,
    pub status: LeaseStatus,
    #[serde(default)]
    pub reservations: Vec<Reservation>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

impl Lease {
    /// The id of the first reservation of the given type, if the lease holds one.
    pub fn reservation_id(&self, resource_type: ResourceType) -> Option<&str> {
        self.reservations
            .iter()
            .find(|r| r.resource_type == resource_type)
            .map(|r| r.id.as_str())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LeaseEnvelope {
    pub lease: Lease,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Network {
    pub id: String,
    pub name: String,
    /// only filled in once the provider has allocated the VLAN, can be null for a while
    #[serde(rename = "provider:segmentation_id", default)]
    pub segmentation_id: Option<u32>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NetworkList {
    pub networks: Vec<Network>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AllocationPool {
    pub start: String,
    pub end: String,
}

impl From<&AddressRange> for AllocationPool {
    fn from(range: &AddressRange) -> Self {
        Self {
            start: range.start.to_string(),
            end: range.end.to_string(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SubnetRequest {
    pub name: String,
    pub network_id: String,
    pub ip_version: u8,
    pub cidr: Ipv4Net,
    pub allocation_pools: Vec<AllocationPool>,
    pub gateway_ip: Ipv4Addr,
}

impl SubnetRequest {
    pub fn new(name: String, network_id: String, cidr: Ipv4Net, pool: &AddressRange, gateway_ip: Ipv4Addr) -> Self {
        Self {
            name,
            network_id,
            ip_version: 4,
            cidr,
            allocation_pools: vec![pool.into()],
            gateway_ip,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Subnet {
    pub id: String,
    pub name: String,
    pub network_id: String,
    pub cidr: String,
    #[serde(default)]
    pub gateway_ip: Option<String>,
    #[serde(default)]
    pub allocation_pools: Vec<AllocationPool>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Router {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// What is needed to boot one server, by name. The client resolves the names to ids.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ServerSpec {
    pub name: String,
    pub reservation_id: String,
    pub network_name: String,
    pub image_name: String,
    pub flavor_name: String,
    pub key_name: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Server {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl Server {
    pub fn is_active(&self) -> bool {
        self.status.as_deref() == Some("ACTIVE")
    }

    pub fn is_errored(&self) -> bool {
        self.status.as_deref() == Some("ERROR")
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct FixedIp {
    pub ip_address: IpAddr,
    #[serde(default)]
    pub subnet_id: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct InterfaceAttachment {
    #[serde(default)]
    pub port_id: Option<String>,
    #[serde(default)]
    pub mac_addr: Option<String>,
    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDateTime, TimeZone};
    use super::*;

    fn parse_blazar(s: &str) -> DateTime<Utc> {
        Utc.from_utc_datetime(&NaiveDateTime::parse_from_str(s, BLAZAR_TIME_FORMAT).unwrap())
    }

    #[test]
    fn test_lease_window_rounds_start_up() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 30).unwrap();
        let window = LeaseWindow::starting_at(now);
        assert_eq!(window.start_date(), "2024-03-01 12:02");
        assert_eq!(window.end_date(), "2024-03-02 12:00");
        assert!(parse_blazar(&window.start_date()) >= now + Duration::minutes(1));
    }

    #[test]
    fn test_lease_window_on_the_minute() {
        let now = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 0).unwrap();
        let window = LeaseWindow::starting_at(now);
        assert_eq!(window.start_date(), "2025-01-01 00:00");
        assert_eq!(window.end_date(), "2025-01-01 23:59");
    }

    #[test]
    fn test_lease_window_holds_for_any_second() {
        let base = Utc.with_ymd_and_hms(2024, 6, 15, 8, 30, 0).unwrap();
        for offset in 0..120 {
            let now = base + Duration::seconds(offset) + Duration::milliseconds(offset * 7);
            let window = LeaseWindow::starting_at(now);
            assert!(parse_blazar(&window.start_date()) >= now + Duration::minutes(1));
            assert_eq!(parse_blazar(&window.end_date()), (now + Duration::days(1)).with_second(0).unwrap().with_nanosecond(0).unwrap());
        }
    }

    #[test]
    fn test_reservation_request_wire_format() {
        let host = serde_json::to_value(ReservationRequest::physical_host(2, "compute_skylake")).unwrap();
        assert_eq!(host["resource_type"], "physical:host");
        assert_eq!(host["min"], 2);
        assert_eq!(host["max"], 2);
        assert_eq!(host["resource_properties"], r#"["==","$node_type","compute_skylake"]"#);

        let net = serde_json::to_value(ReservationRequest::stitched_network("n", "fabric")).unwrap();
        assert_eq!(net["resource_type"], "network");
        assert_eq!(net["network_name"], "n");
        assert_eq!(net["resource_properties"], r#"["==","$stitch_provider","fabric"]"#);
    }

    #[test]
    fn test_lease_parsing_and_reservation_lookup() {
        let body = r#"{"lease": {"id": "l1", "name": "x", "status": "ACTIVE", "reservations": [
            {"id": "r-net", "resource_type": "network", "status": "active"},
            {"id": "r-host", "resource_type": "physical:host"},
            {"id": "r-dev", "resource_type": "device"}
        ]}}"#;
        let lease = serde_json::from_str::<LeaseEnvelope>(body).unwrap().lease;
        assert_eq!(lease.status, LeaseStatus::Active);
        assert_eq!(lease.reservation_id(ResourceType::PhysicalHost), Some("r-host"));
        assert_eq!(lease.reservation_id(ResourceType::Network), Some("r-net"));
        assert_eq!(lease.reservation_id(ResourceType::FloatingIp), None);
        assert_eq!(lease.reservations[2].resource_type, ResourceType::Other);
    }

    #[test]
    fn test_unknown_lease_status() {
        let lease: Lease = serde_json::from_str(r#"{"id": "l", "name": "n", "status": "SOMETHING_NEW"}"#).unwrap();
        assert_eq!(lease.status, LeaseStatus::Unknown);
        assert!(lease.reservations.is_empty());
    }

    #[test]
    fn test_network_segmentation_id_nullable() {
        let pending: Network = serde_json::from_str(r#"{"id": "n", "name": "x", "provider:segmentation_id": null}"#).unwrap();
        assert_eq!(pending.segmentation_id, None);
        let ready: Network = serde_json::from_str(r#"{"id": "n", "name": "x", "provider:segmentation_id": 3210}"#).unwrap();
        assert_eq!(ready.segmentation_id, Some(3210));
    }

    #[test]
    fn test_subnet_request_wire_format() {
        let pool = AddressRange::new(Ipv4Addr::new(192, 168, 100, 100), Ipv4Addr::new(192, 168, 100, 150));
        let request = SubnetRequest::new(
            "s".into(),
            "net".into(),
            "192.168.100.0/24".parse().unwrap(),
            &pool,
            Ipv4Addr::new(192, 168, 100, 1),
        );
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["cidr"], "192.168.100.0/24");
        assert_eq!(value["gateway_ip"], "192.168.100.1");
        assert_eq!(value["ip_version"], 4);
        assert_eq!(value["allocation_pools"][0]["start"], "192.168.100.100");
        assert_eq!(value["allocation_pools"][0]["end"], "192.168.100.150");
    }
}
