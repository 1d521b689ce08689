use std::net::IpAddr;
use anyhow::{anyhow, Context};
use tokio_util::sync::CancellationToken;
use testbed_stitch_schemas::chameleon_models::ServerSpec;
use testbed_stitch_schemas::settings::ChameleonConfig;
use crate::error::StitchError;
use crate::orchestration::poll::{poll_until, PollPolicy, PollStep};
use crate::orchestration::LaunchedServer;
use crate::platforms::ChameleonApi;

fn log_each_failure(errors: &[anyhow::Error]) {
    for err in errors {
        tracing::error!("{err:#}");
    }
}

/// Create the servers one after another. Every attempt is recorded in `launched`, even a failed
/// one, and a failure does not stop the remaining servers from being created.
pub async fn launch_servers(
    api: &dyn ChameleonApi,
    config: &ChameleonConfig,
    reservation_id: &str,
    launched: &mut Vec<LaunchedServer>,
) -> anyhow::Result<()> {
    let mut errors = Vec::new();
    for name in config.server_names() {
        let spec = ServerSpec {
            name: name.clone(),
            reservation_id: reservation_id.to_string(),
            network_name: config.network_name(),
            image_name: config.image_name.clone(),
            flavor_name: config.flavor_name.clone(),
            key_name: config.key_name.clone(),
        };
        match api.create_server(&spec).await {
            Ok(server) => {
                tracing::info!("created server {name} ({})", &server.id);
                launched.push(LaunchedServer { name, id: Some(server.id) });
            }
            Err(err) => {
                errors.push(err.context(format!("creating server {name}")));
                launched.push(LaunchedServer { name, id: None });
            }
        }
    }
    if errors.is_empty() {
        return Ok(());
    }
    log_each_failure(&errors);
    Err(anyhow!("{} of {} servers failed to launch", errors.len(), launched.len()))
}

/// Wait for every launched server to report ACTIVE.
pub async fn wait_for_servers(
    api: &dyn ChameleonApi,
    servers: &[LaunchedServer],
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    for server in servers {
        let Some(server_id) = server.id.as_deref() else {
            continue;
        };
        let name = server.name.as_str();
        let what = format!("server {name}");
        poll_until(&what, policy, cancel, move || async move {
            match api.get_server(server_id).await {
                Ok(current) if current.is_active() => PollStep::Ready(()),
                Ok(current) if current.is_errored() => PollStep::Failed(StitchError::ServerFailed {
                    name: name.to_string(),
                }.into()),
                Ok(current) => PollStep::Pending(format!("status {}", current.status.unwrap_or_default())),
                Err(err) => PollStep::Pending(format!("{err:#}")),
            }
        }).await?;
        tracing::info!("server {name} is active");
    }
    Ok(())
}

/// Look each server up by name then read the first fixed address of its first interface. Servers
/// that cannot be resolved are skipped so the rest can still be probed.
pub async fn resolve_fixed_ips(
    api: &dyn ChameleonApi,
    servers: &[LaunchedServer],
    resolved: &mut Vec<(String, IpAddr)>,
) -> anyhow::Result<()> {
    let mut errors = Vec::new();
    for server in servers {
        let lookup = async {
            let server_id = api.get_server_id(&server.name)
                .await
                .with_context(|| format!("looking up server {}", &server.name))?;
            let ip = api.get_server_fixed_ip(&server_id)
                .await
                .with_context(|| format!("getting fixed ip of server {}", &server.name))?;
            Ok::<IpAddr, anyhow::Error>(ip)
        };
        match lookup.await {
            Ok(ip) => {
                tracing::info!("{}: {ip}", &server.name);
                resolved.push((server.name.clone(), ip));
            }
            Err(err) => errors.push(err),
        }
    }
    if errors.is_empty() {
        return Ok(());
    }
    log_each_failure(&errors);
    Err(anyhow!("{} of {} servers have no fixed ip", errors.len(), servers.len()))
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use crate::orchestration::test_support::{CallLog, StubChameleon};
    use super::*;

    fn config(count: u32) -> ChameleonConfig {
        ChameleonConfig { server_count: count, ..Default::default() }
    }

    #[tokio::test]
    async fn test_launch_servers() {
        let api = StubChameleon::new(CallLog::default());
        let mut launched = Vec::new();
        launch_servers(&api, &config(2), "res-compute", &mut launched).await.unwrap();
        assert_eq!(launched, vec![
            LaunchedServer { name: "fabric_stitch_Server_0".into(), id: Some("id-fabric_stitch_Server_0".into()) },
            LaunchedServer { name: "fabric_stitch_Server_1".into(), id: Some("id-fabric_stitch_Server_1".into()) },
        ]);
    }

    #[tokio::test]
    async fn test_launch_failure_is_recorded() {
        let api = StubChameleon::new(CallLog::default()).failing("create_server");
        let mut launched = Vec::new();
        let err = launch_servers(&api, &config(3), "res-compute", &mut launched).await.unwrap_err();
        assert_eq!(err.to_string(), "3 of 3 servers failed to launch");
        assert_eq!(launched.len(), 3);
        assert!(launched.iter().all(|s| s.id.is_none()));
        assert_eq!(api.log.count("create_server"), 3);
    }

    #[tokio::test]
    async fn test_resolve_fixed_ips_by_name() {
        let api = StubChameleon::new(CallLog::default());
        let mut launched = Vec::new();
        launch_servers(&api, &config(1), "res-compute", &mut launched).await.unwrap();
        let mut resolved = Vec::new();
        resolve_fixed_ips(&api, &launched, &mut resolved).await.unwrap();
        assert_eq!(resolved, vec![(
            "fabric_stitch_Server_0".to_string(),
            IpAddr::V4(Ipv4Addr::new(192, 168, 100, 101)),
        )]);
        let calls = api.log.calls();
        assert_eq!(&calls[1..], &[
            "get_server_id:fabric_stitch_Server_0",
            "get_server_fixed_ip:id-fabric_stitch_Server_0",
        ]);
    }

    #[tokio::test]
    async fn test_wait_for_servers() {
        let api = StubChameleon::new(CallLog::default());
        let servers = vec![
            LaunchedServer { name: "a".into(), id: Some("id-a".into()) },
            LaunchedServer { name: "b".into(), id: None },
        ];
        let policy = PollPolicy::new(Duration::from_millis(1), None);
        wait_for_servers(&api, &servers, &policy, &CancellationToken::new()).await.unwrap();
        assert_eq!(api.log.calls(), vec!["get_server:id-a"]);
    }
}
