//! Prospect record and the pipeline state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a prospect sits in the outreach pipeline.
///
/// Stages move strictly forward: `Discovered → Contacted → Engaged →
/// Onboarding → Converted`. `Churned` is the single backward escape hatch,
/// reachable from any non-terminal stage by explicit operator action only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Discovered,
    Contacted,
    Engaged,
    Onboarding,
    Converted,
    Churned,
}

impl PipelineStage {
    /// Ordinal position in the forward chain. `Churned` sits outside it.
    pub fn ordinal(&self) -> Option<u8> {
        match self {
            Self::Discovered => Some(0),
            Self::Contacted => Some(1),
            Self::Engaged => Some(2),
            Self::Onboarding => Some(3),
            Self::Converted => Some(4),
            Self::Churned => None,
        }
    }

    /// Whether a transition from `self` to `target` is allowed.
    ///
    /// Forward moves only; churn allowed from any non-terminal stage.
    /// Staying put is not a transition.
    pub fn can_transition_to(&self, target: PipelineStage) -> bool {
        match (self.ordinal(), target) {
            // Churn: from any non-terminal forward stage.
            (Some(ord), PipelineStage::Churned) => ord < 4,
            // Churned prospects do not come back via workflows.
            (None, _) => false,
            (Some(from), target) => match target.ordinal() {
                Some(to) => to > from,
                None => unreachable!("churn handled above"),
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Contacted => "contacted",
            Self::Engaged => "engaged",
            Self::Onboarding => "onboarding",
            Self::Converted => "converted",
            Self::Churned => "churned",
        }
    }
}

impl std::str::FromStr for PipelineStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovered" => Ok(Self::Discovered),
            "contacted" => Ok(Self::Contacted),
            "engaged" => Ok(Self::Engaged),
            "onboarding" => Ok(Self::Onboarding),
            "converted" => Ok(Self::Converted),
            "churned" => Ok(Self::Churned),
            other => Err(format!("unknown pipeline stage: '{other}'")),
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A vendor candidate moving through the outreach pipeline.
///
/// Prospects are never physically deleted — churn is a stage, not a
/// deletion. `metadata` is free-form; discovery and referral intake may
/// stash an `origin_vendor_id` back-reference there, which the convergence
/// sweep uses to decide whether a published site triggers the next
/// outreach email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prospect {
    pub id: Uuid,
    pub name: String,
    pub contact_email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    /// Channel-specific identifier (e.g. a maps place id).
    pub place_id: Option<String>,
    pub stage: PipelineStage,
    pub source: String,
    pub metadata: serde_json::Value,
    pub discovered_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Prospect {
    /// Create a freshly discovered prospect.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            contact_email: None,
            phone: None,
            address: None,
            city: None,
            place_id: None,
            stage: PipelineStage::Discovered,
            source: source.into(),
            metadata: serde_json::json!({}),
            discovered_at: now,
            last_activity_at: now,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.contact_email = Some(email.into());
        self
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Back-reference to the originating vendor record, if this prospect
    /// came in through an outreach-intake path.
    pub fn origin_vendor_id(&self) -> Option<&str> {
        self.metadata.get("origin_vendor_id").and_then(|v| v.as_str())
    }
}
