use tokio_util::sync::CancellationToken;
use crate::orchestration::poll::{poll_until, PollPolicy, PollStep};
use crate::orchestration::ReadyNetwork;
use crate::platforms::ChameleonApi;

/// The reserved network only gets its VLAN once the provider has finished allocating it. Until
/// then the network may be missing altogether, both cases are retried.
pub async fn wait_for_segmentation_id(
    api: &dyn ChameleonApi,
    network_name: &str,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> anyhow::Result<ReadyNetwork> {
    let what = format!("network {network_name}");
    let network = poll_until(&what, policy, cancel, move || async move {
        match api.get_network(network_name).await {
            Ok(network) => match network.segmentation_id {
                Some(vlan) => PollStep::Ready(ReadyNetwork { id: network.id, vlan }),
                None => PollStep::Pending(format!("network {} has no segmentation id yet", network.id)),
            },
            Err(err) => PollStep::Pending(format!("{err:#}")),
        }
    }).await?;
    tracing::info!("network id: {}", &network.id);
    tracing::info!("network vlan: {}", network.vlan);
    Ok(network)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use crate::error::StitchError;
    use crate::orchestration::test_support::{CallLog, StubChameleon, STUB_VLAN};
    use super::*;

    fn fast() -> PollPolicy {
        PollPolicy::new(Duration::from_millis(1), None)
    }

    #[tokio::test]
    async fn test_returns_after_k_plus_one_fetches() {
        for k in [0, 1, 5] {
            let mut api = StubChameleon::new(CallLog::default());
            api.network_pending_polls = k;
            let network = wait_for_segmentation_id(&api, "fabric_stitch_Net", &fast(), &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(network, ReadyNetwork { id: "net-1".into(), vlan: STUB_VLAN });
            assert_eq!(api.log.count("get_network"), k + 1);
        }
    }

    #[tokio::test]
    async fn test_lookup_errors_are_retried_until_deadline() {
        let api = StubChameleon::new(CallLog::default()).failing("get_network");
        let policy = PollPolicy::new(Duration::from_millis(2), Some(Duration::from_millis(20)));
        let err = wait_for_segmentation_id(&api, "fabric_stitch_Net", &policy, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<StitchError>(), Some(StitchError::PollDeadline { .. })));
        assert!(api.log.count("get_network") > 1);
    }
}
