//! One module per provisioning stage. Each stage takes the platform trait objects and the inputs
//! produced by earlier stages, and returns an `anyhow::Result` for the orchestrator to judge.

pub mod connectivity;
pub mod lease;
pub mod network;
pub mod slice;
pub mod subnet_router;
pub mod teardown;
pub mod workload;
