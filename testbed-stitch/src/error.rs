use std::time::Duration;
use thiserror::Error;
use testbed_stitch_schemas::chameleon_models::{LeaseStatus, ResourceType};
use testbed_stitch_schemas::fabric_models::SliceState;

/// Failures that the orchestration needs to tell apart. Everything else travels as a plain
/// `anyhow::Error` with context attached.
#[derive(Error, Debug)]
pub enum StitchError {
    #[error("{service} request failed with status {status}: {body}")]
    Api {
        service: String,
        status: u16,
        body: String,
    },
    #[error("no {kind} named {name}")]
    NotFound {
        kind: String,
        name: String,
    },
    #[error("{kind} {name} is ambiguous, {count} matches")]
    Ambiguous {
        kind: String,
        name: String,
        count: usize,
    },
    #[error("lease {name} went to status {status}")]
    LeaseFailed {
        name: String,
        status: LeaseStatus,
    },
    #[error("lease has no {0} reservation")]
    MissingReservation(ResourceType),
    #[error("slice {name} went to state {state}")]
    SliceFailed {
        name: String,
        state: SliceState,
    },
    #[error("server {name} went to status ERROR")]
    ServerFailed {
        name: String,
    },
    #[error("address pool {range} is exhausted")]
    AddressPoolExhausted {
        range: String,
    },
    #[error("cancelled while waiting for {what}")]
    PollCancelled {
        what: String,
    },
    #[error("gave up waiting for {what} after {after:?}")]
    PollDeadline {
        what: String,
        after: Duration,
    },
    #[error("remote command `{command}` failed: {stderr}")]
    RemoteCommand {
        command: String,
        stderr: String,
    },
}
