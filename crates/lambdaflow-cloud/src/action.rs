//! Action records for planned and applied provisioning steps

use crate::resource::ResourceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A planned or performed action on one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Unique identifier for the action (e.g. "create-role:mcp-role")
    pub id: String,

    /// Type of action
    pub action_type: ActionType,

    /// Resource kind
    pub resource_kind: ResourceKind,

    /// Resource identifier
    pub resource_id: String,

    /// Description of the action
    pub description: String,

    /// Additional details (ARNs, URLs, ...)
    pub details: HashMap<String, serde_json::Value>,
}

impl Action {
    pub fn new(
        action_type: ActionType,
        resource_kind: ResourceKind,
        resource_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let resource_id = resource_id.into();
        Self {
            id: format!("{}-{}:{}", action_type, resource_kind, resource_id),
            action_type,
            resource_kind,
            resource_id,
            description: description.into(),
            details: HashMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

/// Type of action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new resource (or publish a new layer version)
    Create,
    /// Update an existing resource
    Update,
    /// No changes needed
    NoOp,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// Actions performed by a successful run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    /// Performed actions, in execution order
    pub actions: Vec<Action>,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl ApplyResult {
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    pub fn record(&mut self, action: Action) {
        tracing::debug!(action = %action.id, "{}", action.description);
        self.actions.push(action);
    }

    /// Actions of the given type
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    /// Whether any resource of the given kind was created
    pub fn created(&self, kind: ResourceKind) -> bool {
        self.actions
            .iter()
            .any(|a| a.resource_kind == kind && a.action_type == ActionType::Create)
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary::of(&self.actions)
    }
}

impl Default for ApplyResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Plan containing all actions a run would perform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// List of actions to perform
    pub actions: Vec<Action>,

    /// Whether the plan has any changes
    pub has_changes: bool,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        let has_changes = actions.iter().any(|a| a.action_type != ActionType::NoOp);
        Self {
            actions,
            has_changes,
        }
    }

    pub fn empty() -> Self {
        Self {
            actions: Vec::new(),
            has_changes: false,
        }
    }

    /// Get actions by type
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        PlanSummary::of(&self.actions)
    }
}

/// Summary of planned or applied actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub no_change: usize,
}

impl PlanSummary {
    fn of(actions: &[Action]) -> Self {
        let count = |t: ActionType| actions.iter().filter(|a| a.action_type == t).count();
        Self {
            create: count(ActionType::Create),
            update: count(ActionType::Update),
            no_change: count(ActionType::NoOp),
        }
    }
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} unchanged",
            self.create, self.update, self.no_change
        )
    }
}
