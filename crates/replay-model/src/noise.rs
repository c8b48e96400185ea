//! Noise findings and comparison inputs/outputs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which delivery of a case produced a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeliverySide {
    /// Delivery to the action's source instance
    Source,
    /// Delivery to the action's target instance
    Target,
}

/// A response captured from one delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedResponse {
    /// Case that was delivered
    pub case_id: String,
    /// Delivery side
    pub side: DeliverySide,
    /// Response headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Response body
    pub body: serde_json::Value,
}

impl CapturedResponse {
    /// Create a response with no headers
    #[must_use]
    pub fn new(case_id: impl Into<String>, side: DeliverySide, body: serde_json::Value) -> Self {
        Self {
            case_id: case_id.into(),
            side,
            headers: BTreeMap::new(),
            body,
        }
    }
}

/// Per-field outcome of comparing two responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldVerdict {
    /// Field path (e.g. `body.data.timestamp`)
    pub path: String,
    /// Whether the field differed between the two responses
    pub unstable: bool,
}

impl FieldVerdict {
    /// Field that differed
    #[must_use]
    pub fn unstable(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            unstable: true,
        }
    }

    /// Field that matched
    #[must_use]
    pub fn stable(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            unstable: false,
        }
    }
}

/// Noisy fields discovered for one action in one context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayNoise {
    /// Plan id
    pub plan_id: String,
    /// Action id
    pub plan_item_id: String,
    /// Context the probes belonged to
    pub context_name: String,
    /// Field path -> number of samples that found it unstable
    pub noisy_fields: BTreeMap<String, u32>,
    /// Last time the record changed
    pub updated_at: DateTime<Utc>,
}

impl ReplayNoise {
    /// Empty findings record
    #[must_use]
    pub fn new(
        plan_id: impl Into<String>,
        plan_item_id: impl Into<String>,
        context_name: impl Into<String>,
    ) -> Self {
        Self {
            plan_id: plan_id.into(),
            plan_item_id: plan_item_id.into(),
            context_name: context_name.into(),
            noisy_fields: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Count one more sample finding `path` unstable
    pub fn record_unstable(&mut self, path: impl Into<String>) {
        *self.noisy_fields.entry(path.into()).or_insert(0) += 1;
    }

    /// Fold another record into this one; a field noisy in either stays noisy
    pub fn accumulate(&mut self, other: &ReplayNoise) {
        for (path, count) in &other.noisy_fields {
            *self.noisy_fields.entry(path.clone()).or_insert(0) += count;
        }
        self.updated_at = self.updated_at.max(other.updated_at);
    }

    /// Whether `path` is noisy
    #[must_use]
    pub fn is_noisy(&self, path: &str) -> bool {
        self.noisy_fields.contains_key(path)
    }

    /// Whether no field is noisy
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.noisy_fields.is_empty()
    }
}
