//! Correlation context passed explicitly across task boundaries
//!
//! Every unit of work receives a `TraceContext` value and runs inside the
//! span it produces, so logs correlate by plan, context, action and case no
//! matter which worker executes them.

use std::fmt;
use tracing::Span;

/// Correlation identifiers for one unit of work
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceContext {
    /// Plan id
    pub plan_id: String,
    /// Execution context name
    pub context_name: Option<String>,
    /// Action id
    pub action_id: Option<String>,
    /// Case id
    pub case_id: Option<String>,
}

impl TraceContext {
    /// Context for a plan
    #[must_use]
    pub fn for_plan(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            ..Self::default()
        }
    }

    /// Narrow to an execution context
    #[must_use]
    pub fn with_context(&self, context_name: impl Into<String>) -> Self {
        Self {
            context_name: Some(context_name.into()),
            ..self.clone()
        }
    }

    /// Narrow to an action
    #[must_use]
    pub fn with_action(&self, action_id: impl Into<String>) -> Self {
        Self {
            action_id: Some(action_id.into()),
            ..self.clone()
        }
    }

    /// Narrow to a case
    #[must_use]
    pub fn with_case(&self, case_id: impl Into<String>) -> Self {
        Self {
            case_id: Some(case_id.into()),
            ..self.clone()
        }
    }

    /// Span carrying these identifiers
    #[must_use]
    pub fn span(&self, name: &'static str) -> Span {
        tracing::info_span!(
            "replay",
            op = name,
            plan_id = %self.plan_id,
            context = self.context_name.as_deref().unwrap_or(""),
            action_id = self.action_id.as_deref().unwrap_or(""),
            case_id = self.case_id.as_deref().unwrap_or(""),
        )
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plan={}", self.plan_id)?;
        if let Some(context) = &self.context_name {
            write!(f, " context={context}")?;
        }
        if let Some(action) = &self.action_id {
            write!(f, " action={action}")?;
        }
        if let Some(case) = &self.case_id {
            write!(f, " case={case}")?;
        }
        Ok(())
    }
}
