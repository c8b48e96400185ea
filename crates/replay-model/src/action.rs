//! Replay actions (endpoints under test)
//!
//! An action owns its recorded cases and the context completion map that
//! makes noise analysis idempotent across reruns.

use crate::case::ReplayActionCaseItem;
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A deployed instance that cases can be delivered to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Host name or IP
    pub host: String,
    /// Port
    pub port: u16,
    /// Protocol (`http`, `https`, ...)
    pub protocol: String,
}

impl ServiceInstance {
    /// Create an http instance
    #[inline]
    #[must_use]
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            protocol: "http".to_string(),
        }
    }

    /// Base URL of the instance
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

impl fmt::Display for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Noise analysis state of one context for one action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoiseAnalysisStatus {
    /// Probes were compared and findings persisted
    Analyzed,
}

/// Context name -> analysis status, shared between an action and its clones
///
/// Cloning this value shares the underlying map: a mark written through a
/// probe's parent action is visible on the original action.
#[derive(Clone, Default)]
pub struct NoiseFinishedContexts {
    inner: Arc<RwLock<BTreeMap<String, NoiseAnalysisStatus>>>,
}

impl NoiseFinishedContexts {
    /// Create an empty map
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from existing entries
    #[must_use]
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, NoiseAnalysisStatus)>,
        S: Into<String>,
    {
        let map = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    /// Whether the context has already been analyzed
    #[must_use]
    pub fn contains(&self, context_name: &str) -> bool {
        self.inner.read().contains_key(context_name)
    }

    /// Mark a context; returns the previous status
    pub fn insert(
        &self,
        context_name: impl Into<String>,
        status: NoiseAnalysisStatus,
    ) -> Option<NoiseAnalysisStatus> {
        self.inner.write().insert(context_name.into(), status)
    }

    /// Unmark a context; returns the removed status
    pub fn remove(&self, context_name: &str) -> Option<NoiseAnalysisStatus> {
        self.inner.write().remove(context_name)
    }

    /// Number of marked contexts
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether no context is marked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Copy of the current entries
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, NoiseAnalysisStatus> {
        self.inner.read().clone()
    }

    /// Whether two handles share the same map
    #[must_use]
    pub fn shares_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for NoiseFinishedContexts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.inner.read().iter()).finish()
    }
}

impl Serialize for NoiseFinishedContexts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NoiseFinishedContexts {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = BTreeMap::<String, NoiseAnalysisStatus>::deserialize(deserializer)?;
        Ok(Self {
            inner: Arc::new(RwLock::new(map)),
        })
    }
}

/// One logical endpoint under test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayActionItem {
    /// Owning plan
    pub plan_id: String,
    /// Action id (cases reference it as `plan_item_id`)
    pub id: String,
    /// Operation (endpoint) name
    pub operation_name: String,
    /// Instances the recording is compared against
    pub source_instance: Vec<ServiceInstance>,
    /// Instances under test
    pub target_instance: Vec<ServiceInstance>,
    /// Cases of this action; on a rerun these are the previously failed cases
    #[serde(default)]
    pub case_items: Vec<ReplayActionCaseItem>,
    /// Contexts whose noise analysis is complete
    #[serde(default)]
    pub noise_finished_contexts: NoiseFinishedContexts,
}

impl ReplayActionItem {
    /// Create a new action
    #[must_use]
    pub fn new(
        plan_id: impl Into<String>,
        id: impl Into<String>,
        operation_name: impl Into<String>,
    ) -> Self {
        Self {
            plan_id: plan_id.into(),
            id: id.into(),
            operation_name: operation_name.into(),
            source_instance: Vec::new(),
            target_instance: Vec::new(),
            case_items: Vec::new(),
            noise_finished_contexts: NoiseFinishedContexts::new(),
        }
    }

    /// With source instances
    #[must_use]
    pub fn with_source(mut self, instances: Vec<ServiceInstance>) -> Self {
        self.source_instance = instances;
        self
    }

    /// With target instances
    #[must_use]
    pub fn with_target(mut self, instances: Vec<ServiceInstance>) -> Self {
        self.target_instance = instances;
        self
    }

    /// With case items
    #[must_use]
    pub fn with_cases(mut self, cases: Vec<ReplayActionCaseItem>) -> Self {
        self.case_items = cases;
        self
    }

    /// Shallow clone whose source is the target instance.
    ///
    /// Probes built from this clone hit the instance under test on both
    /// deliveries. The completion map stays shared with `self`.
    #[must_use]
    pub fn clone_routed_to_target(&self) -> Self {
        let mut cloned = self.clone();
        cloned.source_instance = cloned.target_instance.clone();
        cloned
    }
}
