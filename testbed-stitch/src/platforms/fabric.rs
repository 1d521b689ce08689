use std::path::Path;
use std::time::Duration;
use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use testbed_stitch_schemas::fabric_models::{
    default_username, NodeInterface, SliceHandle, SliceNode, SliceRequest, SliceState, SliceStatus,
};
use testbed_stitch_schemas::settings::FabricConfig;
use crate::error::StitchError;
use crate::platforms::http::{check_response, parse_response};
use crate::platforms::ssh::{BastionRoute, SSHClient};
use crate::platforms::{CommandOutput, FabricApi};

const LEASE_END_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

#[derive(Deserialize)]
struct TokenFile {
    id_token: String,
}

/// The orchestrator wraps every reply in a `data` list.
#[derive(Deserialize, Debug)]
struct Envelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Deserialize, Debug)]
struct ResourceModel {
    model: serde_json::Value,
}

#[derive(Deserialize, Debug)]
struct CreatedSlice {
    slice_id: Uuid,
}

#[derive(Deserialize, Debug)]
struct SliverEntry {
    #[serde(default)]
    sliver_type: Option<String>,
    sliver: SliverBody,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct SliverBody {
    name: String,
    #[serde(default)]
    site: Option<String>,
    #[serde(default)]
    management_ip: Option<String>,
    #[serde(default)]
    image_ref: Option<String>,
    #[serde(default)]
    interfaces: Vec<SliverInterface>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct SliverInterface {
    name: String,
    #[serde(default)]
    network_name: Option<String>,
    #[serde(default, rename = "MAC")]
    mac: Option<String>,
}

/// Site names out of the advertised resource graph. The graph is sometimes sent as a JSON document
/// embedded in a string.
fn sites_from_model(model: &serde_json::Value) -> anyhow::Result<Vec<String>> {
    let graph = match model {
        serde_json::Value::String(text) => serde_json::from_str(text).context("parsing resource graph")?,
        other => other.clone(),
    };
    let nodes = graph
        .get("nodes")
        .and_then(|n| n.as_array())
        .context("resource graph has no nodes")?;
    let mut sites: Vec<String> = nodes
        .iter()
        .filter(|n| n.get("Class").and_then(|c| c.as_str()) == Some("CompositeNode"))
        .filter_map(|n| n.get("Site").or_else(|| n.get("Name")).and_then(|s| s.as_str()))
        .map(String::from)
        .collect();
    sites.sort();
    sites.dedup();
    Ok(sites)
}

fn node_from_slivers(slivers: Vec<SliverEntry>, node_name: &str) -> anyhow::Result<SliceNode> {
    let entry = slivers
        .into_iter()
        .filter(|s| s.sliver_type.as_deref().map_or(true, |t| t == "NodeSliver"))
        .find(|s| s.sliver.name == node_name)
        .with_context(|| format!("slice has no node named {node_name}"))?;
    let sliver = entry.sliver;
    let image = sliver.image_ref.unwrap_or_default();
    Ok(SliceNode {
        name: sliver.name,
        site: sliver.site.unwrap_or_default(),
        management_ip: sliver.management_ip,
        username: default_username(&image).to_string(),
        interfaces: sliver
            .interfaces
            .into_iter()
            .map(|i| NodeInterface {
                name: i.name,
                network_name: i.network_name,
                mac: i.mac,
            })
            .collect(),
    })
}

/// Slices keep their name after deletion, only one that is not closing or dead counts.
fn live_slice_named(statuses: Vec<SliceStatus>, name: &str) -> anyhow::Result<SliceHandle> {
    statuses
        .into_iter()
        .filter(|s| s.name == name)
        .find(|s| !matches!(s.state, SliceState::Closing | SliceState::Dead))
        .map(|s| SliceHandle { id: s.slice_id, name: s.name })
        .ok_or_else(|| StitchError::NotFound { kind: "slice".into(), name: name.into() }.into())
}

fn lease_end_time(now: DateTime<Utc>) -> String {
    (now + chrono::Duration::days(1)).format(LEASE_END_FORMAT).to_string()
}

/// Client for the FABRIC orchestrator, commands on slice nodes go over ssh via the bastion.
pub struct FabricClient {
    client: Client,
    orchestrator_url: String,
    id_token: String,
    slice_public_key: String,
    ssh: SSHClient,
}

impl FabricClient {
    pub async fn new(config: &FabricConfig) -> anyhow::Result<Self> {
        let token_location = config
            .token_location
            .as_ref()
            .context("no FABRIC token file configured, set FABRIC_TOKEN_LOCATION")?;
        let id_token = read_token(token_location).await?;

        let public_key_location = config
            .slice_public_key_location
            .as_ref()
            .context("no slice public key configured")?;
        let slice_public_key = tokio::fs::read_to_string(public_key_location)
            .await
            .with_context(|| format!("reading slice public key {public_key_location:?}"))?
            .trim()
            .to_string();

        let bastion = BastionRoute {
            host: config.bastion_host.clone(),
            username: config.bastion_username.clone().context("no FABRIC bastion username configured")?,
            key_location: config.bastion_key_location.clone().context("no FABRIC bastion key configured")?,
        };
        let node_key = config
            .slice_private_key_location
            .clone()
            .context("no slice private key configured")?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            orchestrator_url: config.orchestrator_url.trim_end_matches('/').to_string(),
            id_token,
            slice_public_key,
            ssh: SSHClient::new(bastion, node_key),
        })
    }

    async fn get_data<T: serde::de::DeserializeOwned>(&self, url: String, action: &str) -> anyhow::Result<Vec<T>> {
        tracing::trace!("api url used = {:?}", &url);
        let resp = self.client.get(url).bearer_auth(&self.id_token).send().await?;
        let envelope: Envelope<T> = parse_response(resp, "fabric", action).await?;
        Ok(envelope.data)
    }
}

async fn read_token(location: &Path) -> anyhow::Result<String> {
    let text = tokio::fs::read_to_string(location)
        .await
        .with_context(|| format!("reading FABRIC token file {location:?}"))?;
    let token: TokenFile = serde_json::from_str(&text).context("parsing FABRIC token file")?;
    Ok(token.id_token)
}

#[async_trait]
impl FabricApi for FabricClient {
    async fn random_site(&self) -> anyhow::Result<String> {
        let url = format!("{}/resources?level=1&graph_format=JSON_NODELINK", self.orchestrator_url);
        let models: Vec<ResourceModel> = self.get_data(url, "list resources").await?;
        let model = models.first().context("no resource graph returned")?;
        let sites = sites_from_model(&model.model)?;
        match sites.choose(&mut rand::thread_rng()) {
            Some(site) => Ok(site.clone()),
            None => bail!("no sites advertised by the orchestrator"),
        }
    }

    async fn submit_slice(&self, request: &SliceRequest) -> anyhow::Result<SliceHandle> {
        let url = format!("{}/slices/creates", self.orchestrator_url);
        let body = json!({
            "graph_model": serde_json::to_string(request)?,
            "ssh_keys": [&self.slice_public_key],
        });
        tracing::trace!("api url used = {:?}", &url);
        tracing::debug!("slice request: {}", serde_json::to_string_pretty(request)?);
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.id_token)
            .query(&[("name", request.name.as_str()), ("lease_end_time", lease_end_time(Utc::now()).as_str())])
            .json(&body)
            .send()
            .await?;
        let envelope: Envelope<CreatedSlice> = parse_response(resp, "fabric", "create slice").await?;
        let created = envelope.data.first().context("create slice returned no slice")?;
        Ok(SliceHandle {
            id: created.slice_id,
            name: request.name.clone(),
        })
    }

    async fn get_slice(&self, slice: &SliceHandle) -> anyhow::Result<SliceStatus> {
        let url = format!("{}/slices/{}", self.orchestrator_url, slice.id);
        let statuses: Vec<SliceStatus> = self.get_data(url, "get slice").await?;
        statuses
            .into_iter()
            .next()
            .with_context(|| format!("slice {} not returned", slice.name))
    }

    async fn find_slice(&self, name: &str) -> anyhow::Result<SliceHandle> {
        let url = format!("{}/slices", self.orchestrator_url);
        tracing::trace!("api url used = {:?}", &url);
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.id_token)
            .query(&[("name", name), ("as_self", "true")])
            .send()
            .await?;
        let envelope: Envelope<SliceStatus> = parse_response(resp, "fabric", "list slices").await?;
        live_slice_named(envelope.data, name)
    }

    async fn get_node(&self, slice: &SliceHandle, node_name: &str) -> anyhow::Result<SliceNode> {
        let url = format!("{}/slivers?slice_id={}", self.orchestrator_url, slice.id);
        let slivers: Vec<SliverEntry> = self.get_data(url, "list slivers").await?;
        node_from_slivers(slivers, node_name)
    }

    async fn execute(&self, node: &SliceNode, command: &str) -> anyhow::Result<CommandOutput> {
        let management_ip = node
            .management_ip
            .as_deref()
            .with_context(|| format!("node {} has no management ip", node.name))?;
        self.ssh.run_node_command(&node.username, management_ip, command).await
    }

    async fn delete_slice(&self, slice: &SliceHandle) -> anyhow::Result<()> {
        let url = format!("{}/slices/delete/{}", self.orchestrator_url, slice.id);
        tracing::trace!("api url used = {:?}", &url);
        let resp = self.client.delete(url).bearer_auth(&self.id_token).send().await?;
        check_response(resp, "fabric", "delete slice").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use chrono::TimeZone;
    use super::*;

    #[test]
    fn test_sites_from_embedded_model() {
        let graph = json!({"nodes": [
            {"Class": "CompositeNode", "Name": "TACC", "Site": "TACC"},
            {"Class": "CompositeNode", "Name": "STAR"},
            {"Class": "NetworkNode", "Name": "TACC_ns"},
            {"Class": "CompositeNode", "Name": "TACC", "Site": "TACC"}
        ]});
        let model = serde_json::Value::String(graph.to_string());
        assert_eq!(sites_from_model(&model).unwrap(), vec!["STAR", "TACC"]);
        assert_eq!(sites_from_model(&graph).unwrap(), vec!["STAR", "TACC"]);
        assert!(sites_from_model(&json!({"links": []})).is_err());
    }

    #[test]
    fn test_node_from_slivers() {
        let body = json!({"data": [
            {"sliver_type": "NetworkServiceSliver", "sliver": {"Name": "net_facility_port"}},
            {"sliver_type": "NodeSliver", "sliver": {
                "Name": "node1",
                "Site": "TACC",
                "ManagementIp": "129.114.110.5",
                "ImageRef": "default_rocky_9",
                "Interfaces": [
                    {"Name": "node1-nic1-p1", "NetworkName": "net_facility_port", "MAC": "0C:42:A1:78:F8:04"},
                    {"Name": "node1-nic1-p2"}
                ]
            }}
        ]});
        let envelope: Envelope<SliverEntry> = serde_json::from_value(body).unwrap();
        let node = node_from_slivers(envelope.data, "node1").unwrap();
        assert_eq!(node.username, "rocky");
        assert_eq!(node.management_ip.as_deref(), Some("129.114.110.5"));
        let iface = node.get_interface("net_facility_port").unwrap();
        assert_eq!(iface.mac.as_deref(), Some("0C:42:A1:78:F8:04"));
        assert!(node.interfaces[1].network_name.is_none());
    }

    #[test]
    fn test_missing_node() {
        let envelope: Envelope<SliverEntry> = serde_json::from_value(json!({"data": []})).unwrap();
        assert!(node_from_slivers(envelope.data, "node1").is_err());
    }

    #[test]
    fn test_live_slice_named() {
        let body = json!({"data": [
            {"slice_id": "11111111-1111-1111-1111-111111111111", "name": "chameleon_stitch", "state": "Dead"},
            {"slice_id": "22222222-2222-2222-2222-222222222222", "name": "other", "state": "StableOK"},
            {"slice_id": "33333333-3333-3333-3333-333333333333", "name": "chameleon_stitch", "state": "Configuring"}
        ]});
        let envelope: Envelope<SliceStatus> = serde_json::from_value(body).unwrap();
        let handle = live_slice_named(envelope.data, "chameleon_stitch").unwrap();
        assert_eq!(handle.id.to_string(), "33333333-3333-3333-3333-333333333333");

        let err = live_slice_named(Vec::new(), "chameleon_stitch").unwrap_err();
        assert!(matches!(err.downcast_ref::<StitchError>(), Some(StitchError::NotFound { .. })));
    }

    #[test]
    fn test_lease_end_time() {
        let now = Utc.with_ymd_and_hms(2024, 12, 31, 23, 0, 0).unwrap();
        assert_eq!(lease_end_time(now), "2025-01-01 23:00:00 +0000");
    }

    #[tokio::test]
    async fn test_read_token() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"id_token": "abc.def", "refresh_token": "xyz"}}"#).unwrap();
        assert_eq!(read_token(file.path()).await.unwrap(), "abc.def");

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(bad, "not json").unwrap();
        assert!(read_token(bad.path()).await.is_err());
    }
}
