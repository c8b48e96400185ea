//! Replay plans

use crate::action::ReplayActionItem;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;

/// One replay run
#[derive(Debug)]
pub struct ReplayPlan {
    /// Plan id
    pub id: String,
    /// Application under test
    pub app_id: String,
    /// Whether this run re-executes previously failed actions
    pub rerun: bool,
    action_items: Vec<Arc<ReplayActionItem>>,
    action_index: HashMap<String, Arc<ReplayActionItem>>,
    error_message: OnceCell<String>,
}

impl ReplayPlan {
    /// Create a plan and index its actions
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        app_id: impl Into<String>,
        action_items: Vec<ReplayActionItem>,
    ) -> Self {
        let action_items: Vec<Arc<ReplayActionItem>> =
            action_items.into_iter().map(Arc::new).collect();
        let action_index = action_items
            .iter()
            .map(|action| (action.id.clone(), Arc::clone(action)))
            .collect();
        Self {
            id: id.into(),
            app_id: app_id.into(),
            rerun: false,
            action_items,
            action_index,
            error_message: OnceCell::new(),
        }
    }

    /// Mark as rerun
    #[must_use]
    pub fn as_rerun(mut self) -> Self {
        self.rerun = true;
        self
    }

    /// Actions of this plan
    #[inline]
    #[must_use]
    pub fn action_items(&self) -> &[Arc<ReplayActionItem>] {
        &self.action_items
    }

    /// Look up an action by id
    #[inline]
    #[must_use]
    pub fn action(&self, action_id: &str) -> Option<&Arc<ReplayActionItem>> {
        self.action_index.get(action_id)
    }

    /// Ids of all actions
    pub fn action_ids(&self) -> impl Iterator<Item = &str> {
        self.action_items.iter().map(|a| a.id.as_str())
    }

    /// First fatal error recorded for the plan
    #[inline]
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.get().map(String::as_str)
    }

    /// Record the plan's error unless one is already set.
    ///
    /// Empty messages are ignored. Returns whether this call set the value.
    pub fn set_error_message(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        if message.is_empty() {
            return false;
        }
        self.error_message.set(message).is_ok()
    }
}
