//! Rolling upgrade core.

pub mod lifecycle;
pub mod orchestrator;
pub mod plan;
pub mod poller;
pub mod types;
pub mod verify;

pub use orchestrator::ClusterUpgradeOrchestrator;
pub use plan::{NodeDescriptor, RunMode, Timing, UpgradePlan};
pub use verify::{VerifyReport, verify_cluster};
