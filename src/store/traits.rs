//! Unified `Database` trait — single async interface for all persistence.
//!
//! Cross-invocation coordination happens through store-level guards, not
//! locks: `try_mark_replied` is an atomic check-and-set on `replied_at IS
//! NULL`, `update_prospect_stage` refuses backward moves, and
//! `insert_email_log` surfaces the active-log uniqueness constraint as
//! `DatabaseError::Constraint` so concurrent ticks cannot double-send.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::model::{
    ActivityEvent, AgentTick, EmailLog, GeneratedSite, PipelineStage, Prospect, SiteStatus,
};

/// A prospect due for the next sequence step.
#[derive(Debug, Clone)]
pub struct FollowupCandidate {
    pub prospect: Prospect,
    /// Sequence step of the latest sent-but-unreplied log.
    pub last_step: u32,
    pub last_sent_at: DateTime<Utc>,
}

/// Backend-agnostic database trait covering prospects, email logs, sites,
/// the activity ledger, and agent ticks.
#[async_trait]
pub trait Database: Send + Sync {
    // ── Prospects ───────────────────────────────────────────────────

    async fn insert_prospect(&self, prospect: &Prospect) -> Result<(), DatabaseError>;

    async fn get_prospect(&self, id: Uuid) -> Result<Option<Prospect>, DatabaseError>;

    async fn get_prospect_by_email(&self, email: &str) -> Result<Option<Prospect>, DatabaseError>;

    /// Case-insensitive name match, optionally narrowed to a city.
    /// Discovery uses this to avoid re-inserting known vendors.
    async fn find_prospect_by_name(
        &self,
        name: &str,
        city: Option<&str>,
    ) -> Result<Option<Prospect>, DatabaseError>;

    async fn list_prospects_in_stage(
        &self,
        stage: PipelineStage,
        limit: usize,
    ) -> Result<Vec<Prospect>, DatabaseError>;

    /// Prospects eligible for a step-1 send: contactable, not churned or
    /// converted, and with no email log other than failed attempts (a
    /// failed send leaves the prospect eligible for retry).
    async fn list_prospects_without_email_log(
        &self,
        limit: usize,
    ) -> Result<Vec<Prospect>, DatabaseError>;

    /// Prospects whose most recent log is sent (or opened), unreplied, and
    /// older than `older_than` — due for the next sequence step.
    async fn list_followup_candidates(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<FollowupCandidate>, DatabaseError>;

    /// Prospects stuck in `stage` since before `older_than` (alerting).
    async fn list_stale_prospects(
        &self,
        stage: PipelineStage,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Prospect>, DatabaseError>;

    /// Transition a prospect's stage, enforcing forward-only movement
    /// (churn excepted). Returns `false` without error when the prospect
    /// is already at or past `target` — callers treat that as a no-op.
    async fn update_prospect_stage(
        &self,
        id: Uuid,
        target: PipelineStage,
    ) -> Result<bool, DatabaseError>;

    async fn touch_prospect_activity(&self, id: Uuid) -> Result<(), DatabaseError>;

    async fn count_prospects(&self) -> Result<u64, DatabaseError>;

    // ── Email logs ──────────────────────────────────────────────────

    /// Insert a queued log. Fails with `DatabaseError::Constraint` when an
    /// active (queued or sent) log already exists for the same prospect
    /// and step — the guard that closes the concurrent-tick send race.
    async fn insert_email_log(&self, log: &EmailLog) -> Result<(), DatabaseError>;

    async fn get_email_log(&self, id: Uuid) -> Result<Option<EmailLog>, DatabaseError>;

    async fn mark_email_sent(
        &self,
        id: Uuid,
        message_id: &str,
        thread_id: &str,
    ) -> Result<(), DatabaseError>;

    async fn mark_email_failed(&self, id: Uuid, reason: &str) -> Result<(), DatabaseError>;

    async fn mark_email_opened(&self, id: Uuid) -> Result<(), DatabaseError>;

    async fn mark_email_bounced(&self, id: Uuid, reason: &str) -> Result<(), DatabaseError>;

    /// Atomically claim the reply transition: sets `replied` only where
    /// `replied_at IS NULL` and reports whether this call won the claim.
    /// Duplicate webhook deliveries lose the race and process nothing.
    async fn try_mark_replied(&self, id: Uuid) -> Result<bool, DatabaseError>;

    async fn latest_email_log_for_prospect(
        &self,
        prospect_id: Uuid,
    ) -> Result<Option<EmailLog>, DatabaseError>;

    /// All delivered logs addressed to `email`, most recent first —
    /// the candidate set for reply thread correlation.
    async fn find_logs_by_recipient(&self, email: &str) -> Result<Vec<EmailLog>, DatabaseError>;

    async fn count_bounces_since(&self, since: DateTime<Utc>) -> Result<u64, DatabaseError>;

    // ── Generated sites ─────────────────────────────────────────────

    async fn insert_site(&self, site: &GeneratedSite) -> Result<(), DatabaseError>;

    async fn get_site(&self, id: Uuid) -> Result<Option<GeneratedSite>, DatabaseError>;

    /// Most recently created non-archived site for a prospect.
    async fn current_site_for_prospect(
        &self,
        prospect_id: Uuid,
    ) -> Result<Option<GeneratedSite>, DatabaseError>;

    async fn update_site_status(&self, id: Uuid, status: SiteStatus) -> Result<(), DatabaseError>;

    /// Idempotent upsert of deployment metadata. Passing `None` leaves the
    /// existing value in place, so the convergence sweep can refresh just
    /// the status on every poll.
    async fn update_site_deployment(
        &self,
        id: Uuid,
        deployment_id: Option<&str>,
        project_id: Option<&str>,
        deployment_status: Option<&str>,
        url: Option<&str>,
    ) -> Result<(), DatabaseError>;

    async fn set_site_build_error(&self, id: Uuid, summary: &str) -> Result<(), DatabaseError>;

    async fn set_site_metadata(
        &self,
        id: Uuid,
        metadata: &serde_json::Value,
    ) -> Result<(), DatabaseError>;

    /// Publish a site. `published_at` is set only on the first call, so
    /// re-running the sweep on a published site changes nothing.
    async fn mark_site_published(&self, id: Uuid, url: &str) -> Result<(), DatabaseError>;

    /// Sites carrying a deployment id whose last observed status is not
    /// terminal — the convergence sweep's work list.
    async fn list_sites_pending_deployment(&self) -> Result<Vec<GeneratedSite>, DatabaseError>;

    async fn list_sites_stuck_generating(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<GeneratedSite>, DatabaseError>;

    // ── Activity ledger ─────────────────────────────────────────────

    async fn insert_activity(&self, event: &ActivityEvent) -> Result<(), DatabaseError>;

    async fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityEvent>, DatabaseError>;

    async fn count_activity_errors_since(&self, since: DateTime<Utc>) -> Result<u64, DatabaseError>;

    /// Whether an event with this exact type, prospect, and detail was
    /// already recorded. Backs the at-most-once guards (e.g. one
    /// post-publish follow-up per site URL).
    async fn has_activity(
        &self,
        event_type: &str,
        prospect_id: Uuid,
        detail: &str,
    ) -> Result<bool, DatabaseError>;

    // ── Agent ticks ─────────────────────────────────────────────────

    async fn insert_tick(&self, tick: &AgentTick) -> Result<(), DatabaseError>;

    async fn latest_tick(&self) -> Result<Option<AgentTick>, DatabaseError>;
}
