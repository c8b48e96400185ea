//! Response comparison seam
//!
//! The field-by-field diff algorithm lives outside the engine; analysis only
//! consumes its per-field verdicts.

use replay_model::{CapturedResponse, FieldVerdict};

/// Compares two captured responses
pub trait ReplayResultComparer: Send + Sync {
    /// Per-field verdicts; must be free of side effects
    fn compare(&self, expected: &CapturedResponse, actual: &CapturedResponse) -> Vec<FieldVerdict>;
}
