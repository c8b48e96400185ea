//! Replay Model - data types shared by the replay engine
//!
//! Describes one replay run and everything the noise engine reads or mutates:
//! - Plans and their set-once error message
//! - Actions (endpoints) with their context completion map
//! - Recorded cases and their send state
//! - Execution contexts and the predicates selecting their cases
//! - Noise findings and comparer verdicts
//!
//! # Example
//!
//! ```rust,ignore
//! use replay_model::{build_context_name, PlanExecutionContext};
//!
//! let ctx = PlanExecutionContext::for_identifier(Some("tenantA"), ());
//! assert_eq!(ctx.context_name(), build_context_name(Some("tenantA")));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod action;
pub mod case;
pub mod context;
pub mod noise;
pub mod plan;

pub use action::{NoiseAnalysisStatus, NoiseFinishedContexts, ReplayActionItem, ServiceInstance};
pub use case::{
    CaseSendScene, CaseSendStatus, CompareMode, ReplayActionCaseItem, TargetRequest,
    DEPENDENCY_ATTRIBUTE,
};
pub use context::{
    build_context_name, normalize_identifier, CaseCriterion, ExecutionContextActionType,
    PlanExecutionContext, NO_DEPENDENCY_CONTEXT_NAME,
};
pub use noise::{CapturedResponse, DeliverySide, FieldVerdict, ReplayNoise};
pub use plan::ReplayPlan;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
