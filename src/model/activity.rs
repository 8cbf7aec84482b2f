//! Append-only activity ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who caused an activity event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Agent,
    Manual,
    System,
}

impl TriggeredBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Manual => "manual",
            Self::System => "system",
        }
    }
}

impl std::str::FromStr for TriggeredBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(Self::Agent),
            "manual" => Ok(Self::Manual),
            "system" => Ok(Self::System),
            other => Err(format!("unknown trigger: '{other}'")),
        }
    }
}

/// One ledger entry. Never mutated after insert — this is the audit trail
/// the workflows (and the test suite) assert against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: Uuid,
    pub event_type: String,
    pub prospect_id: Option<Uuid>,
    pub detail: String,
    /// Outcome tag: `success`, `failed`, `pending`, `warning`, `info`.
    pub status: String,
    pub triggered_by: TriggeredBy,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(
        event_type: impl Into<String>,
        detail: impl Into<String>,
        status: impl Into<String>,
        triggered_by: TriggeredBy,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            prospect_id: None,
            detail: detail.into(),
            status: status.into(),
            triggered_by,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    pub fn for_prospect(mut self, prospect_id: Uuid) -> Self {
        self.prospect_id = Some(prospect_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
