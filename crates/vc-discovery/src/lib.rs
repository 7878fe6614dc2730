//! Issue discovery: pluggable analysis workers, dependency-ordered
//! execution, budgets, and the orchestrator that drives the
//! discover → deduplicate → file pipeline.

pub mod budget;
pub mod orchestrator;
pub mod registry;
pub mod worker;
pub mod workers;

pub use budget::{preset, DiscoveryBudget, Preset, RunningTotals};
pub use orchestrator::{
    DiscoveryOrchestrator, DiscoveryRunResult, DiscoveryStats, OrchestratorConfig,
    OrchestratorError,
};
pub use registry::{RegistryError, WorkerRegistry};
pub use worker::{
    CostCategory, CostEstimate, DiscoveryWorker, WorkerError, WorkerResult, WorkerStats,
};
