//! Replay senders and their registry
//!
//! A sender delivers one case to its parent action's instances. When the
//! parent has a source instance the sender delivers to both source and
//! target, capturing one response per side. Probe cases have their source
//! rewritten to the target, so one send yields two responses from the
//! instance under test.

use async_trait::async_trait;
use dashmap::DashMap;
use replay_model::ReplayActionCaseItem;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Transport for one case category
#[async_trait]
pub trait ReplaySender: Send + Sync {
    /// Whether this sender handles `case_type`
    fn is_supported(&self, case_type: &str) -> bool;

    /// Deliver the case.
    ///
    /// Ordinary delivery failures return `false` and should leave a reason in
    /// `case.send_error_message`; panics are reserved for programming errors.
    async fn send(&self, case: &mut ReplayActionCaseItem) -> bool;

    /// Deliver the case with additional request headers
    async fn send_with_headers(
        &self,
        case: &mut ReplayActionCaseItem,
        _extra_headers: &HashMap<String, String>,
    ) -> bool {
        self.send(case).await
    }

    /// Priority among senders supporting the same type; higher wins
    fn order(&self) -> i32 {
        0
    }
}

/// Resolves the sender for a case category
#[derive(Default)]
pub struct ReplaySenderRegistry {
    senders: Vec<Arc<dyn ReplaySender>>,
    resolved: DashMap<String, Option<Arc<dyn ReplaySender>>>,
}

impl ReplaySenderRegistry {
    /// Registry over `senders`
    #[must_use]
    pub fn new(senders: Vec<Arc<dyn ReplaySender>>) -> Self {
        let mut registry = Self::default();
        for sender in senders {
            registry.register(sender);
        }
        registry
    }

    /// Add a sender
    pub fn register(&mut self, sender: Arc<dyn ReplaySender>) {
        self.senders.push(sender);
        // stable sort keeps registration order among equal priorities
        self.senders.sort_by_key(|s| std::cmp::Reverse(s.order()));
        self.resolved.clear();
    }

    /// With an additional sender
    #[must_use]
    pub fn with_sender(mut self, sender: Arc<dyn ReplaySender>) -> Self {
        self.register(sender);
        self
    }

    /// Highest-priority sender supporting `case_type`, if any
    #[must_use]
    pub fn find_replay_sender(&self, case_type: &str) -> Option<Arc<dyn ReplaySender>> {
        if let Some(hit) = self.resolved.get(case_type) {
            return hit.value().clone();
        }
        let found = self
            .senders
            .iter()
            .find(|s| s.is_supported(case_type))
            .cloned();
        self.resolved.insert(case_type.to_string(), found.clone());
        found
    }

    /// Number of registered senders
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// Whether no sender is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

impl fmt::Debug for ReplaySenderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplaySenderRegistry")
            .field("senders", &self.senders.len())
            .field("resolved", &self.resolved.len())
            .finish()
    }
}
