//! Recorded cases
//!
//! A case is one recorded request/response pair replayed against a target.

use crate::action::ReplayActionItem;
use crate::context::normalize_identifier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Request attribute carrying the downstream dependency (config batch) id
pub const DEPENDENCY_ATTRIBUTE: &str = "configBatchNo";

/// Send state of a case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CaseSendStatus {
    /// Not sent yet
    #[default]
    WaitHandling,
    /// Delivered successfully
    Success,
    /// Delivery raised an error
    ExceptionFailed,
    /// The context's dependency could not be prepared
    ReadyDependencyFailed,
}

impl CaseSendStatus {
    /// Whether the case ended in a failure state
    #[inline]
    #[must_use]
    pub fn is_failed(self) -> bool {
        matches!(self, Self::ExceptionFailed | Self::ReadyDependencyFailed)
    }
}

/// How the responses of a case are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CompareMode {
    /// Compare only the main response
    #[default]
    Quick,
    /// Compare every captured field
    Full,
}

/// Why a case is being sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CaseSendScene {
    /// Regular replay, counted in results
    #[default]
    Normal,
    /// Out-of-band send (warmup), excluded from result accounting
    Extra,
}

/// The recorded request to replay
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRequest {
    /// Request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Request body
    #[serde(default)]
    pub body: Option<String>,
    /// Attributes extracted at record time
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl TargetRequest {
    /// Add an attribute
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set the body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// One recorded request/response pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayActionCaseItem {
    /// Case id
    pub id: String,
    /// Owning plan
    pub plan_id: String,
    /// Parent action id
    pub plan_item_id: String,
    /// Recording id
    pub record_id: String,
    /// Case category, selects the sender
    pub case_type: String,
    /// Dependency identifier, set once before persistence
    #[serde(default)]
    pub context_identifier: Option<String>,
    /// Send state
    #[serde(default)]
    pub send_status: CaseSendStatus,
    /// Compare mode
    #[serde(default)]
    pub compare_mode: CompareMode,
    /// Send purpose
    #[serde(default)]
    pub send_scene: CaseSendScene,
    /// Recorded request
    #[serde(default)]
    pub target_request: TargetRequest,
    /// Last delivery error
    #[serde(default)]
    pub send_error_message: Option<String>,
    /// Parent action (back-reference, bound at execution time)
    #[serde(skip)]
    pub parent: Option<Arc<ReplayActionItem>>,
}

impl ReplayActionCaseItem {
    /// Create a case waiting to be handled
    #[must_use]
    pub fn new(
        plan_id: impl Into<String>,
        plan_item_id: impl Into<String>,
        id: impl Into<String>,
        case_type: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            record_id: format!("record-{id}"),
            id,
            plan_id: plan_id.into(),
            plan_item_id: plan_item_id.into(),
            case_type: case_type.into(),
            context_identifier: None,
            send_status: CaseSendStatus::WaitHandling,
            compare_mode: CompareMode::Quick,
            send_scene: CaseSendScene::Normal,
            target_request: TargetRequest::default(),
            send_error_message: None,
            parent: None,
        }
    }

    /// With request
    #[must_use]
    pub fn with_request(mut self, request: TargetRequest) -> Self {
        self.target_request = request;
        self
    }

    /// With context identifier
    #[must_use]
    pub fn with_context_identifier(mut self, identifier: Option<&str>) -> Self {
        self.context_identifier = normalize_identifier(identifier).map(str::to_string);
        self
    }

    /// With send status
    #[must_use]
    pub fn with_status(mut self, status: CaseSendStatus) -> Self {
        self.send_status = status;
        self
    }

    /// Dependency identifier carried by the recorded request
    #[must_use]
    pub fn replay_dependency(&self) -> Option<&str> {
        normalize_identifier(
            self.target_request
                .attributes
                .get(DEPENDENCY_ATTRIBUTE)
                .map(String::as_str),
        )
    }

    /// Context identifier with empty values treated as absent
    #[inline]
    #[must_use]
    pub fn context_dependency(&self) -> Option<&str> {
        normalize_identifier(self.context_identifier.as_deref())
    }

    /// Bind the parent action
    pub fn bind_parent(&mut self, parent: Arc<ReplayActionItem>) {
        self.parent = Some(parent);
    }
}
