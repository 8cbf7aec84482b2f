//! Outbound email log — one row per send attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of an outbound email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    /// Inserted, adapter not yet called.
    Queued,
    /// Accepted by the provider.
    Sent,
    /// Open tracking callback fired.
    Opened,
    /// Inbound reply matched to this log. At most once per log.
    Replied,
    /// Provider reported a bounce.
    Bounced,
    /// Adapter call failed. The prospect stays eligible for retry next pass.
    Failed,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Opened => "opened",
            Self::Replied => "replied",
            Self::Bounced => "bounced",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for EmailStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "sent" => Ok(Self::Sent),
            "opened" => Ok(Self::Opened),
            "replied" => Ok(Self::Replied),
            "bounced" => Ok(Self::Bounced),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown email status: '{other}'")),
        }
    }
}

/// One outbound email attempt for a prospect.
///
/// `message_id`/`thread_id` come back from the provider on send and are the
/// keys the reply matcher correlates inbound messages against. `recipient`
/// records the prospect's real address even when the channel adapter
/// redirected the send to a sandbox inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailLog {
    pub id: Uuid,
    pub prospect_id: Uuid,
    pub template_id: String,
    /// Ordinal position in the outreach cadence, starting at 1.
    pub sequence_step: u32,
    pub recipient: String,
    pub subject: String,
    pub status: EmailStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub replied_at: Option<DateTime<Utc>>,
    pub message_id: Option<String>,
    pub thread_id: Option<String>,
    pub bounce_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EmailLog {
    /// Create a queued log for a send about to be attempted.
    pub fn queued(
        prospect_id: Uuid,
        template_id: impl Into<String>,
        sequence_step: u32,
        recipient: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        debug_assert!(sequence_step >= 1);
        Self {
            id: Uuid::new_v4(),
            prospect_id,
            template_id: template_id.into(),
            sequence_step,
            recipient: recipient.into(),
            subject: subject.into(),
            status: EmailStatus::Queued,
            sent_at: None,
            opened_at: None,
            replied_at: None,
            message_id: None,
            thread_id: None,
            bounce_reason: None,
            created_at: Utc::now(),
        }
    }
}
