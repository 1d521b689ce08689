use std::fmt;
use anyhow::Context;
use crate::error::StitchError;
use crate::orchestration::StitchState;
use crate::platforms::{ChameleonApi, FabricApi};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownStep {
    DeleteServer(String),
    DetachSubnet,
    DeleteRouter,
    DeleteSubnet,
    DeleteNetwork,
    DeleteLease,
    DeleteSlice,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownStep::DeleteServer(name) => write!(f, "delete server {name}"),
            TeardownStep::DetachSubnet => write!(f, "detach subnet from router"),
            TeardownStep::DeleteRouter => write!(f, "delete router"),
            TeardownStep::DeleteSubnet => write!(f, "delete subnet"),
            TeardownStep::DeleteNetwork => write!(f, "delete network"),
            TeardownStep::DeleteLease => write!(f, "delete lease"),
            TeardownStep::DeleteSlice => write!(f, "delete slice"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownRecord {
    pub step: TeardownStep,
    pub outcome: StepOutcome,
}

struct Recorder {
    records: Vec<TeardownRecord>,
}

impl Recorder {
    fn done(&mut self, step: TeardownStep, result: anyhow::Result<()>) {
        let outcome = match result {
            Ok(()) => {
                tracing::info!("{step}: done");
                StepOutcome::Done
            }
            Err(err) => {
                tracing::error!("{step} error: {err:#}");
                StepOutcome::Failed(format!("{err:#}"))
            }
        };
        self.records.push(TeardownRecord { step, outcome });
    }

    fn skipped(&mut self, step: TeardownStep, reason: &str) {
        tracing::info!("{step}: skipped, {reason}");
        self.records.push(TeardownRecord { step, outcome: StepOutcome::Skipped(reason.to_string()) });
    }
}

/// Delete everything recorded in `state`, newest first: servers, the router attachment, router,
/// subnet, network, lease and finally the slice. Every step runs whatever happened to the ones
/// before it, and nothing here returns an error.
pub async fn teardown(
    api: &dyn ChameleonApi,
    fabric: &dyn FabricApi,
    state: &StitchState,
) -> Vec<TeardownRecord> {
    tracing::info!("Stage: teardown");
    let mut recorder = Recorder { records: Vec::new() };

    if state.servers.is_empty() {
        recorder.skipped(TeardownStep::DeleteServer("*".to_string()), "no servers were launched");
    }
    for server in &state.servers {
        let step = TeardownStep::DeleteServer(server.name.clone());
        let server_id = match &server.id {
            Some(id) => id.clone(),
            // the create call failed, the server may exist regardless
            None => match api.get_server_id(&server.name).await {
                Ok(id) => id,
                Err(err) => {
                    let missing = matches!(err.downcast_ref::<StitchError>(), Some(StitchError::NotFound { .. }));
                    if missing {
                        recorder.skipped(step, "server does not exist");
                    } else {
                        recorder.done(step, Err(err.context(format!("looking up server {}", &server.name))));
                    }
                    continue;
                }
            },
        };
        let result = api.delete_server(&server_id)
            .await
            .with_context(|| format!("deleting server {} ({server_id})", &server.name));
        recorder.done(step, result);
    }

    match (&state.router, &state.subnet) {
        (Some(router), Some(subnet)) if state.router_attached => {
            let result = api.remove_subnet_from_router(&router.id, &subnet.id).await;
            recorder.done(TeardownStep::DetachSubnet, result);
        }
        _ => recorder.skipped(TeardownStep::DetachSubnet, "subnet was never attached"),
    }

    match &state.router {
        Some(router) => {
            let result = api.delete_router(&router.id).await;
            recorder.done(TeardownStep::DeleteRouter, result);
        }
        None => recorder.skipped(TeardownStep::DeleteRouter, "no router was created"),
    }

    match &state.subnet {
        Some(subnet) => {
            let result = api.delete_subnet(&subnet.id).await;
            recorder.done(TeardownStep::DeleteSubnet, result);
        }
        None => recorder.skipped(TeardownStep::DeleteSubnet, "no subnet was created"),
    }

    match &state.network {
        Some(network) => {
            let result = api.delete_network(&network.id).await;
            recorder.done(TeardownStep::DeleteNetwork, result);
        }
        None => recorder.skipped(TeardownStep::DeleteNetwork, "network id was never known"),
    }

    match &state.lease {
        Some(lease) => {
            let result = api.delete_lease(&lease.id).await;
            recorder.done(TeardownStep::DeleteLease, result);
        }
        None => recorder.skipped(TeardownStep::DeleteLease, "no lease was created"),
    }

    match (&state.slice, &state.slice_name) {
        (Some(slice), _) => {
            let result = fabric.delete_slice(slice).await;
            recorder.done(TeardownStep::DeleteSlice, result);
        }
        // the submit call failed, the orchestrator may have accepted the slice regardless
        (None, Some(name)) => match fabric.find_slice(name).await {
            Ok(slice) => {
                let result = fabric.delete_slice(&slice)
                    .await
                    .with_context(|| format!("deleting slice {name} ({})", slice.id));
                recorder.done(TeardownStep::DeleteSlice, result);
            }
            Err(err) => {
                let missing = matches!(err.downcast_ref::<StitchError>(), Some(StitchError::NotFound { .. }));
                if missing {
                    recorder.skipped(TeardownStep::DeleteSlice, "slice does not exist");
                } else {
                    recorder.done(TeardownStep::DeleteSlice, Err(err.context(format!("looking up slice {name}"))));
                }
            }
        },
        (None, None) => recorder.skipped(TeardownStep::DeleteSlice, "no slice was submitted"),
    }

    recorder.records
}
