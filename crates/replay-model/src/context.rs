//! Execution contexts
//!
//! A context is a named partition of a plan's cases sharing one downstream
//! dependency identifier, or none.

use crate::case::ReplayActionCaseItem;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Name of the context holding cases without a dependency identifier
pub const NO_DEPENDENCY_CONTEXT_NAME: &str = "default";

const DEPENDENCY_CONTEXT_PREFIX: &str = "dependency:";

/// Treat empty identifiers as absent
#[inline]
#[must_use]
pub fn normalize_identifier(identifier: Option<&str>) -> Option<&str> {
    identifier.filter(|id| !id.is_empty())
}

/// Deterministic context name for a dependency identifier
#[must_use]
pub fn build_context_name(identifier: Option<&str>) -> String {
    match normalize_identifier(identifier) {
        Some(id) => format!("{DEPENDENCY_CONTEXT_PREFIX}{id}"),
        None => NO_DEPENDENCY_CONTEXT_NAME.to_string(),
    }
}

/// What the executor should do with the cases of a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExecutionContextActionType {
    /// Execute normally
    #[default]
    None,
    /// Dependency preparation failed; skip every case of the context
    SkipCaseOfContext,
}

/// Predicate selecting the cases of a context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseCriterion {
    /// `context_identifier == id`
    ContextIdentifierIs(String),
    /// `context_identifier` is absent or empty
    ContextIdentifierIsNull,
    /// Parent action is one of the given ids
    PlanItemIdIn(BTreeSet<String>),
}

impl CaseCriterion {
    /// Evaluate against a case
    #[must_use]
    pub fn matches(&self, case: &ReplayActionCaseItem) -> bool {
        match self {
            Self::ContextIdentifierIs(id) => case.context_dependency() == Some(id.as_str()),
            Self::ContextIdentifierIsNull => case.context_dependency().is_none(),
            Self::PlanItemIdIn(ids) => ids.contains(&case.plan_item_id),
        }
    }

    /// Whether every criterion matches
    #[must_use]
    pub fn all_match(criteria: &[Self], case: &ReplayActionCaseItem) -> bool {
        criteria.iter().all(|c| c.matches(case))
    }
}

/// A named partition of a plan's cases
#[derive(Debug, Clone)]
pub struct PlanExecutionContext<D> {
    context_name: String,
    dependencies: D,
    context_case_query: Vec<CaseCriterion>,
    action_type: ExecutionContextActionType,
}

impl<D> PlanExecutionContext<D> {
    /// Create a context with no predicates
    #[must_use]
    pub fn new(context_name: impl Into<String>, dependencies: D) -> Self {
        Self {
            context_name: context_name.into(),
            dependencies,
            context_case_query: Vec::new(),
            action_type: ExecutionContextActionType::None,
        }
    }

    /// Context for an identifier, with the matching identifier predicate
    #[must_use]
    pub fn for_identifier(identifier: Option<&str>, dependencies: D) -> Self {
        let criterion = match normalize_identifier(identifier) {
            Some(id) => CaseCriterion::ContextIdentifierIs(id.to_string()),
            None => CaseCriterion::ContextIdentifierIsNull,
        };
        Self::new(build_context_name(identifier), dependencies).with_criterion(criterion)
    }

    /// Add a predicate
    #[must_use]
    pub fn with_criterion(mut self, criterion: CaseCriterion) -> Self {
        self.context_case_query.push(criterion);
        self
    }

    /// Narrow the selection with another predicate
    pub fn push_criterion(&mut self, criterion: CaseCriterion) {
        self.context_case_query.push(criterion);
    }

    /// Context name
    #[inline]
    #[must_use]
    pub fn context_name(&self) -> &str {
        &self.context_name
    }

    /// Dependency payload
    #[inline]
    #[must_use]
    pub fn dependencies(&self) -> &D {
        &self.dependencies
    }

    /// Predicates selecting this context's cases
    #[inline]
    #[must_use]
    pub fn context_case_query(&self) -> &[CaseCriterion] {
        &self.context_case_query
    }

    /// Whether a case belongs to this context
    #[must_use]
    pub fn contains_case(&self, case: &ReplayActionCaseItem) -> bool {
        CaseCriterion::all_match(&self.context_case_query, case)
    }

    /// Current action flag
    #[inline]
    #[must_use]
    pub fn action_type(&self) -> ExecutionContextActionType {
        self.action_type
    }

    /// Whether the context's cases must be skipped
    #[inline]
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.action_type == ExecutionContextActionType::SkipCaseOfContext
    }

    /// Skip every case of this context for the rest of the run.
    ///
    /// Terminal: there is no way back to `None`.
    pub fn mark_skip(&mut self) {
        self.action_type = ExecutionContextActionType::SkipCaseOfContext;
    }
}

impl<D: fmt::Debug> fmt::Display for PlanExecutionContext<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({:?}, action={:?})",
            self.context_name, self.dependencies, self.action_type
        )
    }
}
