//! Generated site record — one row per build attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a site build attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    Generating,
    PendingReview,
    Published,
    /// Build failed or an operator asked for changes. A fresh attempt is a
    /// new row, never a resurrection of this one.
    RevisionRequested,
    Archived,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generating => "generating",
            Self::PendingReview => "pending_review",
            Self::Published => "published",
            Self::RevisionRequested => "revision_requested",
            Self::Archived => "archived",
        }
    }
}

impl std::str::FromStr for SiteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generating" => Ok(Self::Generating),
            "pending_review" => Ok(Self::PendingReview),
            "published" => Ok(Self::Published),
            "revision_requested" => Ok(Self::RevisionRequested),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown site status: '{other}'")),
        }
    }
}

/// One site build attempt for a prospect.
///
/// Multiple rows may exist per prospect over time (redeploys). The
/// "current" site is the most recently created non-archived row. Failed
/// attempts are marked `revision_requested`, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedSite {
    pub id: Uuid,
    pub prospect_id: Uuid,
    pub status: SiteStatus,
    pub url: Option<String>,
    pub template_type: String,
    pub deployment_id: Option<String>,
    /// Platform project identity — kept stable across redeploys so the
    /// site URL does not change on incremental edits.
    pub project_id: Option<String>,
    /// Last deployment status observed by the convergence sweep.
    pub deployment_status: Option<String>,
    pub build_error: Option<String>,
    /// Free-form metadata: the generation brief, update prompts, etc.
    pub metadata: serde_json::Value,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GeneratedSite {
    /// Create a record for a generation attempt that is about to start.
    pub fn generating(prospect_id: Uuid, template_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            prospect_id,
            status: SiteStatus::Generating,
            url: None,
            template_type: template_type.into(),
            deployment_id: None,
            project_id: None,
            deployment_status: None,
            build_error: None,
            metadata: serde_json::json!({}),
            published_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The generation brief stored at creation time, used for full
    /// regeneration when source fetch fails.
    pub fn brief(&self) -> Option<&str> {
        self.metadata.get("brief").and_then(|v| v.as_str())
    }
}
