use std::net::IpAddr;
use std::time::Duration;
use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use testbed_stitch_schemas::chameleon_models::{
    InterfaceAttachment, Lease, LeaseEnvelope, LeaseRequest, Network, NetworkList, Router, Server,
    ServerSpec, Subnet, SubnetRequest,
};
use testbed_stitch_schemas::settings::ChameleonConfig;
use testbed_stitch_schemas::{
    ENV_OS_APPLICATION_CREDENTIAL_ID, ENV_OS_APPLICATION_CREDENTIAL_SECRET, ENV_OS_PASSWORD,
    ENV_OS_TOKEN, ENV_OS_USERNAME,
};
use crate::error::StitchError;
use crate::platforms::http::{check_response, parse_response, versioned};
use crate::platforms::ChameleonApi;

/// How to authenticate against keystone. Credentials only ever come from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeystoneAuth {
    ApplicationCredential {
        id: String,
        secret: String,
    },
    Token {
        token: String,
        project_id: String,
    },
    Password {
        username: String,
        password: String,
        user_domain_name: String,
        project_id: String,
    },
}

impl KeystoneAuth {
    /// Application credentials are preferred, then an existing token, then a password.
    pub fn from_env<F>(config: &ChameleonConfig, lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let (Some(id), Some(secret)) = (
            lookup(ENV_OS_APPLICATION_CREDENTIAL_ID),
            lookup(ENV_OS_APPLICATION_CREDENTIAL_SECRET),
        ) {
            return Ok(Self::ApplicationCredential { id, secret });
        }
        let project_id = config.project_id.clone();
        if let Some(token) = lookup(ENV_OS_TOKEN) {
            let project_id = project_id.context("a project id is needed to scope an OS_TOKEN")?;
            return Ok(Self::Token { token, project_id });
        }
        if let (Some(username), Some(password)) = (lookup(ENV_OS_USERNAME), lookup(ENV_OS_PASSWORD)) {
            let project_id = project_id.context("a project id is needed for password authentication")?;
            return Ok(Self::Password {
                username,
                password,
                user_domain_name: config.user_domain_name.clone(),
                project_id,
            });
        }
        bail!("no Chameleon credentials found, source your openrc file or set {ENV_OS_APPLICATION_CREDENTIAL_ID}/{ENV_OS_APPLICATION_CREDENTIAL_SECRET}")
    }

    fn request_body(&self) -> serde_json::Value {
        match self {
            KeystoneAuth::ApplicationCredential { id, secret } => json!({
                "auth": {
                    "identity": {
                        "methods": ["application_credential"],
                        "application_credential": {"id": id, "secret": secret}
                    }
                }
            }),
            KeystoneAuth::Token { token, project_id } => json!({
                "auth": {
                    "identity": {"methods": ["token"], "token": {"id": token}},
                    "scope": {"project": {"id": project_id}}
                }
            }),
            KeystoneAuth::Password { username, password, user_domain_name, project_id } => json!({
                "auth": {
                    "identity": {
                        "methods": ["password"],
                        "password": {
                            "user": {
                                "name": username,
                                "domain": {"name": user_domain_name},
                                "password": password
                            }
                        }
                    },
                    "scope": {"project": {"id": project_id}}
                }
            }),
        }
    }
}

#[derive(Deserialize, Debug)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Deserialize, Debug)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
    #[serde(default)]
    expires_at: Option<String>,
}

#[derive(Deserialize, Debug)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Deserialize, Debug)]
struct CatalogEndpoint {
    interface: String,
    #[serde(default)]
    region_id: Option<String>,
    #[serde(default)]
    region: Option<String>,
    url: String,
}

/// Public endpoint of a service in the region, or any public endpoint if none match the region.
fn find_endpoint(catalog: &[CatalogEntry], service_type: &str, region: &str) -> Option<String> {
    let entry = catalog.iter().find(|e| e.service_type == service_type)?;
    let public: Vec<&CatalogEndpoint> = entry.endpoints.iter().filter(|e| e.interface == "public").collect();
    public
        .iter()
        .find(|e| e.region_id.as_deref() == Some(region) || e.region.as_deref() == Some(region))
        .or_else(|| public.first())
        .map(|e| e.url.clone())
}

/// Base urls of the services used, already including their API version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChameleonEndpoints {
    pub reservation: String,
    pub network: String,
    pub compute: String,
    pub image: String,
}

impl ChameleonEndpoints {
    fn resolve(config: &ChameleonConfig, catalog: &[CatalogEntry]) -> anyhow::Result<Self> {
        let lookup = |service: &str, explicit: &Option<String>| -> anyhow::Result<String> {
            match explicit {
                Some(url) => Ok(url.clone()),
                None => find_endpoint(catalog, service, &config.region_name)
                    .with_context(|| format!("no {service} endpoint in the catalog for region {}", config.region_name)),
            }
        };
        Ok(Self {
            reservation: versioned(&lookup("reservation", &config.endpoints.reservation)?, "v1"),
            network: versioned(&lookup("network", &config.endpoints.network)?, "v2.0"),
            compute: lookup("compute", &config.endpoints.compute)?.trim_end_matches('/').to_string(),
            image: versioned(&lookup("image", &config.endpoints.image)?, "v2"),
        })
    }
}

#[derive(Deserialize)]
struct SubnetEnvelope {
    subnet: Subnet,
}

#[derive(Deserialize)]
struct RouterEnvelope {
    router: Router,
}

#[derive(Deserialize)]
struct ServerEnvelope {
    server: Server,
}

#[derive(Deserialize)]
struct ServerList {
    servers: Vec<Server>,
}

#[derive(Deserialize)]
struct NamedResource {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct ImageList {
    images: Vec<NamedResource>,
}

#[derive(Deserialize)]
struct FlavorList {
    flavors: Vec<NamedResource>,
}

#[derive(Deserialize)]
struct InterfaceAttachmentList {
    #[serde(rename = "interfaceAttachments")]
    interface_attachments: Vec<InterfaceAttachment>,
}

#[derive(Serialize)]
struct ServerCreate<'a> {
    server: ServerCreateBody<'a>,
    #[serde(rename = "os:scheduler_hints")]
    scheduler_hints: SchedulerHints<'a>,
}

#[derive(Serialize)]
struct ServerCreateBody<'a> {
    name: &'a str,
    #[serde(rename = "imageRef")]
    image_ref: String,
    #[serde(rename = "flavorRef")]
    flavor_ref: String,
    key_name: &'a str,
    networks: Vec<serde_json::Value>,
    min_count: u32,
    max_count: u32,
}

#[derive(Serialize)]
struct SchedulerHints<'a> {
    reservation: &'a str,
}

/// Exactly one resource must carry the name.
fn single_by_name<T>(items: Vec<T>, kind: &str, name: &str) -> anyhow::Result<T> {
    let count = items.len();
    let mut items = items.into_iter();
    match (items.next(), count) {
        (Some(item), 1) => Ok(item),
        (None, _) => Err(StitchError::NotFound { kind: kind.into(), name: name.into() }.into()),
        (Some(_), count) => Err(StitchError::Ambiguous { kind: kind.into(), name: name.into(), count }.into()),
    }
}

/// REST client for Chameleon, authenticated once against keystone with the service urls taken
/// from the token's catalog.
pub struct ChameleonClient {
    client: Client,
    endpoints: ChameleonEndpoints,
}

impl ChameleonClient {
    pub async fn connect(config: &ChameleonConfig) -> anyhow::Result<Self> {
        let auth = KeystoneAuth::from_env(config, |key| std::env::var(key).ok())?;
        let timeout = Duration::from_secs(config.timeout_secs);
        let auth_api = format!("{}/auth/tokens", versioned(&config.auth_url, "v3"));
        tracing::info!("authenticating with keystone at {}", &config.auth_url);
        tracing::trace!("api url used = {:?}", &auth_api);

        let resp = Client::builder()
            .timeout(timeout)
            .build()?
            .post(&auth_api)
            .json(&auth.request_body())
            .send()
            .await
            .context("requesting keystone token")?;
        let mut token = resp
            .headers()
            .get("X-Subject-Token")
            .context("keystone response had no X-Subject-Token header")?
            .clone();
        token.set_sensitive(true);
        let body: TokenResponse = parse_response(resp, "keystone", "authenticate").await?;
        tracing::debug!("keystone token expires at {:?}", body.token.expires_at);

        let endpoints = ChameleonEndpoints::resolve(config, &body.token.catalog)?;
        tracing::debug!("chameleon endpoints: {:?}", &endpoints);

        let mut headers = HeaderMap::new();
        headers.insert("X-Auth-Token", token);
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self { client, endpoints })
    }

    async fn get<T: DeserializeOwned>(&self, url: String, query: &[(&str, &str)], service: &str, action: &str) -> anyhow::Result<T> {
        tracing::trace!("api url used = {:?} {:?}", &url, query);
        let resp = self.client.get(url).query(query).send().await?;
        parse_response(resp, service, action).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, url: String, body: &B, service: &str, action: &str) -> anyhow::Result<T> {
        tracing::trace!("api url used = {:?}", &url);
        let resp = self.client.post(url).json(body).send().await?;
        parse_response(resp, service, action).await
    }

    async fn put(&self, url: String, body: &serde_json::Value, service: &str, action: &str) -> anyhow::Result<()> {
        tracing::trace!("api url used = {:?}", &url);
        let resp = self.client.put(url).json(body).send().await?;
        check_response(resp, service, action).await?;
        Ok(())
    }

    async fn delete(&self, url: String, service: &str, action: &str) -> anyhow::Result<()> {
        tracing::trace!("api url used = {:?}", &url);
        let resp = self.client.delete(url).send().await?;
        check_response(resp, service, action).await?;
        Ok(())
    }

    async fn get_image_id(&self, name: &str) -> anyhow::Result<String> {
        let url = format!("{}/images", self.endpoints.image);
        let images: ImageList = self.get(url, &[("name", name)], "glance", "list images").await?;
        Ok(single_by_name(images.images, "image", name)?.id)
    }

    async fn get_flavor_id(&self, name: &str) -> anyhow::Result<String> {
        let url = format!("{}/flavors", self.endpoints.compute);
        let flavors: FlavorList = self.get(url, &[], "nova", "list flavors").await?;
        let matching = flavors.flavors.into_iter().filter(|f| f.name == name).collect();
        Ok(single_by_name(matching, "flavor", name)?.id)
    }
}

#[async_trait]
impl ChameleonApi for ChameleonClient {
    async fn create_lease(&self, request: &LeaseRequest) -> anyhow::Result<Lease> {
        let url = format!("{}/leases", self.endpoints.reservation);
        let envelope: LeaseEnvelope = self.post(url, request, "blazar", "create lease").await?;
        Ok(envelope.lease)
    }

    async fn get_lease(&self, lease_id: &str) -> anyhow::Result<Lease> {
        let url = format!("{}/leases/{lease_id}", self.endpoints.reservation);
        let envelope: LeaseEnvelope = self.get(url, &[], "blazar", "get lease").await?;
        Ok(envelope.lease)
    }

    async fn delete_lease(&self, lease_id: &str) -> anyhow::Result<()> {
        self.delete(format!("{}/leases/{lease_id}", self.endpoints.reservation), "blazar", "delete lease").await
    }

    async fn get_network(&self, name: &str) -> anyhow::Result<Network> {
        let url = format!("{}/networks", self.endpoints.network);
        let networks: NetworkList = self.get(url, &[("name", name)], "neutron", "list networks").await?;
        single_by_name(networks.networks, "network", name)
    }

    async fn delete_network(&self, network_id: &str) -> anyhow::Result<()> {
        self.delete(format!("{}/networks/{network_id}", self.endpoints.network), "neutron", "delete network").await
    }

    async fn create_subnet(&self, request: &SubnetRequest) -> anyhow::Result<Subnet> {
        let url = format!("{}/subnets", self.endpoints.network);
        let envelope: SubnetEnvelope = self.post(url, &json!({"subnet": request}), "neutron", "create subnet").await?;
        Ok(envelope.subnet)
    }

    async fn delete_subnet(&self, subnet_id: &str) -> anyhow::Result<()> {
        self.delete(format!("{}/subnets/{subnet_id}", self.endpoints.network), "neutron", "delete subnet").await
    }

    async fn create_router(&self, name: &str, gateway_network: &str) -> anyhow::Result<Router> {
        let gateway = self.get_network(gateway_network)
            .await
            .with_context(|| format!("looking up gateway network {gateway_network}"))?;
        let body = json!({
            "router": {
                "name": name,
                "external_gateway_info": {"network_id": gateway.id}
            }
        });
        let url = format!("{}/routers", self.endpoints.network);
        let envelope: RouterEnvelope = self.post(url, &body, "neutron", "create router").await?;
        Ok(envelope.router)
    }

    async fn add_subnet_to_router(&self, router_id: &str, subnet_id: &str) -> anyhow::Result<()> {
        let url = format!("{}/routers/{router_id}/add_router_interface", self.endpoints.network);
        self.put(url, &json!({"subnet_id": subnet_id}), "neutron", "add router interface").await
    }

    async fn remove_subnet_from_router(&self, router_id: &str, subnet_id: &str) -> anyhow::Result<()> {
        let url = format!("{}/routers/{router_id}/remove_router_interface", self.endpoints.network);
        self.put(url, &json!({"subnet_id": subnet_id}), "neutron", "remove router interface").await
    }

    async fn delete_router(&self, router_id: &str) -> anyhow::Result<()> {
        self.delete(format!("{}/routers/{router_id}", self.endpoints.network), "neutron", "delete router").await
    }

    async fn create_server(&self, spec: &ServerSpec) -> anyhow::Result<Server> {
        let image_ref = self.get_image_id(&spec.image_name).await?;
        let flavor_ref = self.get_flavor_id(&spec.flavor_name).await?;
        let network = self.get_network(&spec.network_name).await?;
        let body = ServerCreate {
            server: ServerCreateBody {
                name: &spec.name,
                image_ref,
                flavor_ref,
                key_name: &spec.key_name,
                networks: vec![json!({"uuid": network.id})],
                min_count: 1,
                max_count: 1,
            },
            scheduler_hints: SchedulerHints {
                reservation: &spec.reservation_id,
            },
        };
        let url = format!("{}/servers", self.endpoints.compute);
        let envelope: ServerEnvelope = self.post(url, &body, "nova", "create server").await?;
        let mut server = envelope.server;
        // the create response only carries the id
        if server.name.is_empty() {
            server.name = spec.name.clone();
        }
        Ok(server)
    }

    async fn get_server_id(&self, name: &str) -> anyhow::Result<String> {
        // nova treats the name filter as a regex
        let pattern = format!("^{name}$");
        let url = format!("{}/servers", self.endpoints.compute);
        let servers: ServerList = self.get(url, &[("name", pattern.as_str())], "nova", "list servers").await?;
        let matching = servers.servers.into_iter().filter(|s| s.name == name).collect();
        Ok(single_by_name(matching, "server", name)?.id)
    }

    async fn get_server(&self, server_id: &str) -> anyhow::Result<Server> {
        let url = format!("{}/servers/{server_id}", self.endpoints.compute);
        let envelope: ServerEnvelope = self.get(url, &[], "nova", "get server").await?;
        Ok(envelope.server)
    }

    async fn get_server_fixed_ip(&self, server_id: &str) -> anyhow::Result<IpAddr> {
        let url = format!("{}/servers/{server_id}/os-interface", self.endpoints.compute);
        let attachments: InterfaceAttachmentList = self.get(url, &[], "nova", "list server interfaces").await?;
        let ip = attachments
            .interface_attachments
            .first()
            .and_then(|a| a.fixed_ips.first())
            .map(|f| f.ip_address)
            .with_context(|| format!("server {server_id} has no fixed ip yet"))?;
        Ok(ip)
    }

    async fn delete_server(&self, server_id: &str) -> anyhow::Result<()> {
        self.delete(format!("{}/servers/{server_id}", self.endpoints.compute), "nova", "delete server").await
    }
}
