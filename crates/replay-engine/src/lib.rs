//! Replay Engine - context batching and noise identification
//!
//! Runs a replay plan context by context:
//! - Partitions cases by the dependency they were recorded under
//! - Warms each dependency up before any of its cases is sent
//! - Probes a few cases per action against the target instance twice
//! - Compares the probe responses to find fields that differ on their own
//! - Resets noise state for actions that are rerun
//!
//! # Example
//!
//! ```rust,ignore
//! use replay_engine::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(sender: Arc<dyn ReplaySender>, plan: ReplayPlan) -> Result<(), EngineError> {
//! let store = Arc::new(InMemoryReplayStore::new());
//! let runner = PlanRunner::in_memory(
//!     &store,
//!     Arc::new(ReplaySenderRegistry::new(vec![sender])),
//!     Arc::new(JsonLeafComparer),
//!     &EngineConfig::default(),
//! );
//!
//! let report = runner.run(&plan).await?;
//! runner.wait_for_analysis().await;
//! println!("{} contexts skipped", report.skipped_contexts());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod audit;
pub mod compare;
pub mod config;
pub mod context;
pub mod desensitize;
pub mod error;
pub mod latch;
pub mod noise;
pub mod pool;
pub mod retry;
pub mod runner;
pub mod sender;
pub mod simulation;
pub mod store;
pub mod trace;

// Re-exports for convenience
pub use audit::{ContextAuditSink, ContextFailureRecord, MemoryAuditSink, TracingAuditSink};
pub use compare::ReplayResultComparer;
pub use config::EngineConfig;
pub use context::{
    ContextDependencies, DefaultExecutionContextProvider, PlanExecutionContextProvider,
    WarmupOutcome,
};
pub use desensitize::{DataDesensitization, DefaultDataDesensitization};
pub use error::{AnalysisError, ConfigError, EngineError, StoreError, WarmupError};
pub use latch::{CountDownLatch, LatchGuard};
pub use noise::{
    select_noise_samples, NoiseAnalysisUnit, NoiseAnalyzer, NoiseIdentifier, NoiseIdentifyReport,
    RecoverySummary,
};
pub use pool::{PoolError, PoolStats, WorkerPool};
pub use retry::{RetryExhausted, RetryPolicy};
pub use runner::{ContextReport, PlanExecutionReport, PlanRunner};
pub use sender::{ReplaySender, ReplaySenderRegistry};
pub use simulation::{JsonLeafComparer, SimulatedSender, SimulationConfig, SimulationReport};
pub use store::{
    ActionStore, CaseStore, ComparePair, CompareSourceLoader, InMemoryReplayStore, NoiseStore,
};
pub use trace::TraceContext;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running replay plans
    pub use crate::{
        DefaultExecutionContextProvider, EngineConfig, EngineError, InMemoryReplayStore,
        JsonLeafComparer, NoiseIdentifier, PlanExecutionContextProvider, PlanRunner,
        ReplayResultComparer, ReplaySender, ReplaySenderRegistry,
    };
    pub use replay_model::{ReplayActionCaseItem, ReplayActionItem, ReplayPlan};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
