//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Datetimes are stored as
//! RFC 3339 TEXT; JSON metadata is stored as serialized TEXT columns.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::model::{
    ActivityEvent, AgentTick, EmailLog, EmailStatus, GeneratedSite, PipelineStage, Prospect,
    SiteStatus, TriggeredBy,
};
use crate::store::migrations;
use crate::store::traits::{Database, FollowupCandidate};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Test hook for direct SQL (backdating timestamps and similar).
    #[cfg(test)]
    pub(crate) async fn raw_execute(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<u64, DatabaseError> {
        self.conn
            .execute(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|s| parse_datetime(&s))
}

fn opt_text(value: Option<&str>) -> libsql::Value {
    match value {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_text_owned(value: Option<String>) -> libsql::Value {
    match value {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn parse_json(s: &str) -> serde_json::Value {
    serde_json::from_str(s).unwrap_or_else(|_| serde_json::json!({}))
}

/// Map a libsql error, surfacing uniqueness violations as `Constraint`.
fn map_exec_err(op: &str, e: libsql::Error) -> DatabaseError {
    let text = e.to_string();
    if text.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{op}: {text}"))
    } else {
        DatabaseError::Query(format!("{op}: {text}"))
    }
}

// ── Row mappers ─────────────────────────────────────────────────────

const PROSPECT_COLUMNS: &str = "id, name, contact_email, phone, address, city, place_id, \
     stage, source, metadata, discovered_at, last_activity_at";

fn row_to_prospect(row: &libsql::Row) -> Result<Prospect, libsql::Error> {
    let id: String = row.get(0)?;
    let stage_str: String = row.get(7)?;
    let metadata_str: String = row.get(9)?;
    Ok(Prospect {
        id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
        name: row.get(1)?,
        contact_email: row.get::<String>(2).ok(),
        phone: row.get::<String>(3).ok(),
        address: row.get::<String>(4).ok(),
        city: row.get::<String>(5).ok(),
        place_id: row.get::<String>(6).ok(),
        stage: stage_str.parse().unwrap_or(PipelineStage::Discovered),
        source: row.get(8)?,
        metadata: parse_json(&metadata_str),
        discovered_at: parse_datetime(&row.get::<String>(10)?),
        last_activity_at: parse_datetime(&row.get::<String>(11)?),
    })
}

const EMAIL_LOG_COLUMNS: &str = "id, prospect_id, template_id, sequence_step, recipient, \
     subject, status, sent_at, opened_at, replied_at, message_id, thread_id, bounce_reason, \
     created_at";

fn row_to_email_log(row: &libsql::Row) -> Result<EmailLog, libsql::Error> {
    let id: String = row.get(0)?;
    let prospect_id: String = row.get(1)?;
    let status_str: String = row.get(6)?;
    Ok(EmailLog {
        id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
        prospect_id: Uuid::parse_str(&prospect_id).unwrap_or_else(|_| Uuid::nil()),
        template_id: row.get(2)?,
        sequence_step: row.get::<i64>(3)? as u32,
        recipient: row.get(4)?,
        subject: row.get(5)?,
        status: status_str.parse().unwrap_or(EmailStatus::Queued),
        sent_at: parse_optional_datetime(row.get::<String>(7).ok()),
        opened_at: parse_optional_datetime(row.get::<String>(8).ok()),
        replied_at: parse_optional_datetime(row.get::<String>(9).ok()),
        message_id: row.get::<String>(10).ok(),
        thread_id: row.get::<String>(11).ok(),
        bounce_reason: row.get::<String>(12).ok(),
        created_at: parse_datetime(&row.get::<String>(13)?),
    })
}

const SITE_COLUMNS: &str = "id, prospect_id, status, url, template_type, deployment_id, \
     project_id, deployment_status, build_error, metadata, published_at, created_at, updated_at";

fn row_to_site(row: &libsql::Row) -> Result<GeneratedSite, libsql::Error> {
    let id: String = row.get(0)?;
    let prospect_id: String = row.get(1)?;
    let status_str: String = row.get(2)?;
    let metadata_str: String = row.get(9)?;
    Ok(GeneratedSite {
        id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
        prospect_id: Uuid::parse_str(&prospect_id).unwrap_or_else(|_| Uuid::nil()),
        status: status_str.parse().unwrap_or(SiteStatus::Generating),
        url: row.get::<String>(3).ok(),
        template_type: row.get(4)?,
        deployment_id: row.get::<String>(5).ok(),
        project_id: row.get::<String>(6).ok(),
        deployment_status: row.get::<String>(7).ok(),
        build_error: row.get::<String>(8).ok(),
        metadata: parse_json(&metadata_str),
        published_at: parse_optional_datetime(row.get::<String>(10).ok()),
        created_at: parse_datetime(&row.get::<String>(11)?),
        updated_at: parse_datetime(&row.get::<String>(12)?),
    })
}

const ACTIVITY_COLUMNS: &str =
    "id, event_type, prospect_id, detail, status, triggered_by, metadata, created_at";

fn row_to_activity(row: &libsql::Row) -> Result<ActivityEvent, libsql::Error> {
    let id: String = row.get(0)?;
    let triggered_str: String = row.get(5)?;
    let metadata_str: String = row.get(6)?;
    Ok(ActivityEvent {
        id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
        event_type: row.get(1)?,
        prospect_id: row
            .get::<String>(2)
            .ok()
            .and_then(|s| Uuid::parse_str(&s).ok()),
        detail: row.get(3)?,
        status: row.get(4)?,
        triggered_by: triggered_str.parse().unwrap_or(TriggeredBy::System),
        metadata: parse_json(&metadata_str),
        created_at: parse_datetime(&row.get::<String>(7)?),
    })
}

const TICK_COLUMNS: &str = "id, discovered, emails_sent, followups_sent, input_tokens, \
     output_tokens, cost, spend_tx, detail, created_at";

fn row_to_tick(row: &libsql::Row) -> Result<AgentTick, libsql::Error> {
    let id: String = row.get(0)?;
    let cost_str: String = row.get(6)?;
    Ok(AgentTick {
        id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
        discovered: row.get::<i64>(1)? as u32,
        emails_sent: row.get::<i64>(2)? as u32,
        followups_sent: row.get::<i64>(3)? as u32,
        input_tokens: row.get::<i64>(4)? as u64,
        output_tokens: row.get::<i64>(5)? as u64,
        cost: cost_str.parse::<Decimal>().unwrap_or(Decimal::ZERO),
        spend_tx: row.get::<String>(7).ok(),
        detail: row.get(8)?,
        created_at: parse_datetime(&row.get::<String>(9)?),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn insert_prospect(&self, prospect: &Prospect) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO prospects (id, name, contact_email, phone, address, city, place_id,
                stage, source, metadata, discovered_at, last_activity_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                prospect.id.to_string(),
                prospect.name.clone(),
                opt_text(prospect.contact_email.as_deref()),
                opt_text(prospect.phone.as_deref()),
                opt_text(prospect.address.as_deref()),
                opt_text(prospect.city.as_deref()),
                opt_text(prospect.place_id.as_deref()),
                prospect.stage.as_str(),
                prospect.source.clone(),
                prospect.metadata.to_string(),
                prospect.discovered_at.to_rfc3339(),
                prospect.last_activity_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| map_exec_err("insert_prospect", e))?;

        debug!(id = %prospect.id, name = %prospect.name, "Prospect inserted");
        Ok(())
    }

    async fn get_prospect(&self, id: Uuid) -> Result<Option<Prospect>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PROSPECT_COLUMNS} FROM prospects WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| map_exec_err("get_prospect", e))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_prospect(&row).map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_prospect: {e}"))),
        }
    }

    async fn get_prospect_by_email(&self, email: &str) -> Result<Option<Prospect>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PROSPECT_COLUMNS} FROM prospects
                     WHERE contact_email = ?1 COLLATE NOCASE
                     ORDER BY discovered_at DESC LIMIT 1"
                ),
                params![email],
            )
            .await
            .map_err(|e| map_exec_err("get_prospect_by_email", e))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_prospect(&row).map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_prospect_by_email: {e}"))),
        }
    }

    async fn find_prospect_by_name(
        &self,
        name: &str,
        city: Option<&str>,
    ) -> Result<Option<Prospect>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PROSPECT_COLUMNS} FROM prospects
                     WHERE name = ?1 COLLATE NOCASE
                       AND (?2 IS NULL OR city = ?2 COLLATE NOCASE)
                     LIMIT 1"
                ),
                params![name, opt_text(city)],
            )
            .await
            .map_err(|e| map_exec_err("find_prospect_by_name", e))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_prospect(&row).map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_prospect_by_name: {e}"))),
        }
    }

    async fn list_prospects_in_stage(
        &self,
        stage: PipelineStage,
        limit: usize,
    ) -> Result<Vec<Prospect>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PROSPECT_COLUMNS} FROM prospects WHERE stage = ?1
                     ORDER BY discovered_at ASC LIMIT ?2"
                ),
                params![stage.as_str(), limit as i64],
            )
            .await
            .map_err(|e| map_exec_err("list_prospects_in_stage", e))?;

        collect_prospects(&mut rows).await
    }

    async fn list_prospects_without_email_log(
        &self,
        limit: usize,
    ) -> Result<Vec<Prospect>, DatabaseError> {
        // Failed attempts do not count as an existing log: the absence of a
        // sent log is the retry signal.
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PROSPECT_COLUMNS} FROM prospects p
                     WHERE p.contact_email IS NOT NULL
                       AND p.stage NOT IN ('churned', 'converted')
                       AND NOT EXISTS (
                           SELECT 1 FROM email_logs e
                           WHERE e.prospect_id = p.id AND e.status != 'failed'
                       )
                     ORDER BY p.discovered_at ASC LIMIT ?1"
                ),
                params![limit as i64],
            )
            .await
            .map_err(|e| map_exec_err("list_prospects_without_email_log", e))?;

        collect_prospects(&mut rows).await
    }

    async fn list_followup_candidates(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<FollowupCandidate>, DatabaseError> {
        let sql = format!(
            "SELECT {cols}, e.sequence_step, e.sent_at
             FROM prospects p
             JOIN email_logs e ON e.prospect_id = p.id
             WHERE e.id = (
                     SELECT id FROM email_logs
                     WHERE prospect_id = p.id AND status != 'failed'
                     ORDER BY created_at DESC LIMIT 1
                 )
               AND e.status IN ('sent', 'opened')
               AND e.replied_at IS NULL
               AND e.sent_at IS NOT NULL
               AND e.sent_at < ?1
               AND p.stage NOT IN ('churned', 'converted')
             ORDER BY e.sent_at ASC",
            cols = PROSPECT_COLUMNS
                .split(", ")
                .map(|c| format!("p.{c}"))
                .collect::<Vec<_>>()
                .join(", "),
        );

        let mut rows = self
            .conn()
            .query(&sql, params![older_than.to_rfc3339()])
            .await
            .map_err(|e| map_exec_err("list_followup_candidates", e))?;

        let mut candidates = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let prospect = row_to_prospect(&row)
                .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
            let last_step = row
                .get::<i64>(12)
                .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?
                as u32;
            let last_sent_at = parse_datetime(
                &row.get::<String>(13)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            );
            candidates.push(FollowupCandidate {
                prospect,
                last_step,
                last_sent_at,
            });
        }
        Ok(candidates)
    }

    async fn list_stale_prospects(
        &self,
        stage: PipelineStage,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Prospect>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PROSPECT_COLUMNS} FROM prospects
                     WHERE stage = ?1 AND last_activity_at < ?2
                     ORDER BY last_activity_at ASC"
                ),
                params![stage.as_str(), older_than.to_rfc3339()],
            )
            .await
            .map_err(|e| map_exec_err("list_stale_prospects", e))?;

        collect_prospects(&mut rows).await
    }

    async fn update_prospect_stage(
        &self,
        id: Uuid,
        target: PipelineStage,
    ) -> Result<bool, DatabaseError> {
        let Some(current) = self.get_prospect(id).await? else {
            return Err(DatabaseError::NotFound {
                entity: "prospect".into(),
                id: id.to_string(),
            });
        };

        if !current.stage.can_transition_to(target) {
            debug!(
                id = %id,
                from = %current.stage,
                to = %target,
                "Stage transition refused (monotonic guard)"
            );
            return Ok(false);
        }

        // Optimistic: only applies if nobody moved the stage in between.
        let changed = self
            .conn()
            .execute(
                "UPDATE prospects SET stage = ?1, last_activity_at = ?2
                 WHERE id = ?3 AND stage = ?4",
                params![
                    target.as_str(),
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                    current.stage.as_str(),
                ],
            )
            .await
            .map_err(|e| map_exec_err("update_prospect_stage", e))?;

        if changed > 0 {
            info!(id = %id, from = %current.stage, to = %target, "Prospect stage advanced");
        }
        Ok(changed > 0)
    }

    async fn touch_prospect_activity(&self, id: Uuid) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE prospects SET last_activity_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(|e| map_exec_err("touch_prospect_activity", e))?;
        Ok(())
    }

    async fn count_prospects(&self) -> Result<u64, DatabaseError> {
        count_query(self.conn(), "SELECT COUNT(*) FROM prospects", ()).await
    }

    // ── Email logs ──────────────────────────────────────────────────

    async fn insert_email_log(&self, log: &EmailLog) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO email_logs (id, prospect_id, template_id, sequence_step, recipient,
                    subject, status, sent_at, opened_at, replied_at, message_id, thread_id,
                    bounce_reason, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
                params![
                    log.id.to_string(),
                    log.prospect_id.to_string(),
                    log.template_id.clone(),
                    log.sequence_step as i64,
                    log.recipient.clone(),
                    log.subject.clone(),
                    log.status.as_str(),
                    opt_text_owned(log.sent_at.map(|t| t.to_rfc3339())),
                    opt_text_owned(log.opened_at.map(|t| t.to_rfc3339())),
                    opt_text_owned(log.replied_at.map(|t| t.to_rfc3339())),
                    opt_text(log.message_id.as_deref()),
                    opt_text(log.thread_id.as_deref()),
                    opt_text(log.bounce_reason.as_deref()),
                    now,
                ],
            )
            .await
            .map_err(|e| map_exec_err("insert_email_log", e))?;

        debug!(id = %log.id, prospect = %log.prospect_id, step = log.sequence_step, "Email log inserted");
        Ok(())
    }

    async fn get_email_log(&self, id: Uuid) -> Result<Option<EmailLog>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EMAIL_LOG_COLUMNS} FROM email_logs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| map_exec_err("get_email_log", e))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_email_log(&row)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_email_log: {e}"))),
        }
    }

    async fn mark_email_sent(
        &self,
        id: Uuid,
        message_id: &str,
        thread_id: &str,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE email_logs SET status = 'sent', sent_at = ?1, message_id = ?2,
                    thread_id = ?3, updated_at = ?1 WHERE id = ?4",
                params![now, message_id, thread_id, id.to_string()],
            )
            .await
            .map_err(|e| map_exec_err("mark_email_sent", e))?;
        Ok(())
    }

    async fn mark_email_failed(&self, id: Uuid, reason: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE email_logs SET status = 'failed', bounce_reason = ?1, updated_at = ?2
                 WHERE id = ?3",
                params![reason, now, id.to_string()],
            )
            .await
            .map_err(|e| map_exec_err("mark_email_failed", e))?;
        Ok(())
    }

    async fn mark_email_opened(&self, id: Uuid) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE email_logs SET status = 'opened',
                    opened_at = COALESCE(opened_at, ?1), updated_at = ?1
                 WHERE id = ?2 AND status = 'sent'",
                params![now, id.to_string()],
            )
            .await
            .map_err(|e| map_exec_err("mark_email_opened", e))?;
        Ok(())
    }

    async fn mark_email_bounced(&self, id: Uuid, reason: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE email_logs SET status = 'bounced', bounce_reason = ?1, updated_at = ?2
                 WHERE id = ?3",
                params![reason, now, id.to_string()],
            )
            .await
            .map_err(|e| map_exec_err("mark_email_bounced", e))?;
        Ok(())
    }

    async fn try_mark_replied(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        // Atomic check-and-set: only one caller can claim the transition.
        let changed = self
            .conn()
            .execute(
                "UPDATE email_logs SET status = 'replied', replied_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND replied_at IS NULL",
                params![now, id.to_string()],
            )
            .await
            .map_err(|e| map_exec_err("try_mark_replied", e))?;

        Ok(changed > 0)
    }

    async fn latest_email_log_for_prospect(
        &self,
        prospect_id: Uuid,
    ) -> Result<Option<EmailLog>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EMAIL_LOG_COLUMNS} FROM email_logs
                     WHERE prospect_id = ?1 ORDER BY created_at DESC LIMIT 1"
                ),
                params![prospect_id.to_string()],
            )
            .await
            .map_err(|e| map_exec_err("latest_email_log_for_prospect", e))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_email_log(&row)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!(
                "latest_email_log_for_prospect: {e}"
            ))),
        }
    }

    async fn find_logs_by_recipient(&self, email: &str) -> Result<Vec<EmailLog>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EMAIL_LOG_COLUMNS} FROM email_logs
                     WHERE recipient = ?1 COLLATE NOCASE
                       AND status IN ('sent', 'opened', 'replied')
                     ORDER BY COALESCE(sent_at, created_at) DESC"
                ),
                params![email],
            )
            .await
            .map_err(|e| map_exec_err("find_logs_by_recipient", e))?;

        let mut logs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_email_log(&row) {
                Ok(log) => logs.push(log),
                Err(e) => tracing::warn!("Skipping email log row: {e}"),
            }
        }
        Ok(logs)
    }

    async fn count_bounces_since(&self, since: DateTime<Utc>) -> Result<u64, DatabaseError> {
        count_query(
            self.conn(),
            "SELECT COUNT(*) FROM email_logs WHERE status = 'bounced' AND updated_at >= ?1",
            params![since.to_rfc3339()],
        )
        .await
    }

    // ── Generated sites ─────────────────────────────────────────────

    async fn insert_site(&self, site: &GeneratedSite) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO generated_sites (id, prospect_id, status, url, template_type,
                    deployment_id, project_id, deployment_status, build_error, metadata,
                    published_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    site.id.to_string(),
                    site.prospect_id.to_string(),
                    site.status.as_str(),
                    opt_text(site.url.as_deref()),
                    site.template_type.clone(),
                    opt_text(site.deployment_id.as_deref()),
                    opt_text(site.project_id.as_deref()),
                    opt_text(site.deployment_status.as_deref()),
                    opt_text(site.build_error.as_deref()),
                    site.metadata.to_string(),
                    opt_text_owned(site.published_at.map(|t| t.to_rfc3339())),
                    site.created_at.to_rfc3339(),
                    site.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_exec_err("insert_site", e))?;

        debug!(id = %site.id, prospect = %site.prospect_id, "Site record inserted");
        Ok(())
    }

    async fn get_site(&self, id: Uuid) -> Result<Option<GeneratedSite>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SITE_COLUMNS} FROM generated_sites WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| map_exec_err("get_site", e))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_site(&row).map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_site: {e}"))),
        }
    }

    async fn current_site_for_prospect(
        &self,
        prospect_id: Uuid,
    ) -> Result<Option<GeneratedSite>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {SITE_COLUMNS} FROM generated_sites
                     WHERE prospect_id = ?1 AND status != 'archived'
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![prospect_id.to_string()],
            )
            .await
            .map_err(|e| map_exec_err("current_site_for_prospect", e))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_site(&row).map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("current_site_for_prospect: {e}"))),
        }
    }

    async fn update_site_status(&self, id: Uuid, status: SiteStatus) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE generated_sites SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(|e| map_exec_err("update_site_status", e))?;
        Ok(())
    }

    async fn update_site_deployment(
        &self,
        id: Uuid,
        deployment_id: Option<&str>,
        project_id: Option<&str>,
        deployment_status: Option<&str>,
        url: Option<&str>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE generated_sites SET
                    deployment_id = COALESCE(?1, deployment_id),
                    project_id = COALESCE(?2, project_id),
                    deployment_status = COALESCE(?3, deployment_status),
                    url = COALESCE(?4, url),
                    updated_at = ?5
                 WHERE id = ?6",
                params![
                    opt_text(deployment_id),
                    opt_text(project_id),
                    opt_text(deployment_status),
                    opt_text(url),
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| map_exec_err("update_site_deployment", e))?;
        Ok(())
    }

    async fn set_site_build_error(&self, id: Uuid, summary: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE generated_sites SET build_error = ?1, updated_at = ?2 WHERE id = ?3",
                params![summary, Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(|e| map_exec_err("set_site_build_error", e))?;
        Ok(())
    }

    async fn set_site_metadata(
        &self,
        id: Uuid,
        metadata: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE generated_sites SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
                params![metadata.to_string(), Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(|e| map_exec_err("set_site_metadata", e))?;
        Ok(())
    }

    async fn mark_site_published(&self, id: Uuid, url: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        // published_at is write-once; re-publishing is a no-op in effect.
        self.conn()
            .execute(
                "UPDATE generated_sites SET status = 'published', url = ?1,
                    deployment_status = 'ready',
                    published_at = COALESCE(published_at, ?2), updated_at = ?2
                 WHERE id = ?3",
                params![url, now, id.to_string()],
            )
            .await
            .map_err(|e| map_exec_err("mark_site_published", e))?;
        Ok(())
    }

    async fn list_sites_pending_deployment(&self) -> Result<Vec<GeneratedSite>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {SITE_COLUMNS} FROM generated_sites
                     WHERE deployment_id IS NOT NULL
                       AND status IN ('generating', 'pending_review')
                       AND (deployment_status IS NULL
                            OR deployment_status NOT IN ('ready', 'error', 'canceled'))
                     ORDER BY created_at ASC"
                ),
                (),
            )
            .await
            .map_err(|e| map_exec_err("list_sites_pending_deployment", e))?;

        collect_sites(&mut rows).await
    }

    async fn list_sites_stuck_generating(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<GeneratedSite>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {SITE_COLUMNS} FROM generated_sites
                     WHERE status = 'generating' AND created_at < ?1
                     ORDER BY created_at ASC"
                ),
                params![older_than.to_rfc3339()],
            )
            .await
            .map_err(|e| map_exec_err("list_sites_stuck_generating", e))?;

        collect_sites(&mut rows).await
    }

    // ── Activity ledger ─────────────────────────────────────────────

    async fn insert_activity(&self, event: &ActivityEvent) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO activity_events (id, event_type, prospect_id, detail, status,
                    triggered_by, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    event.id.to_string(),
                    event.event_type.clone(),
                    opt_text_owned(event.prospect_id.map(|id| id.to_string())),
                    event.detail.clone(),
                    event.status.clone(),
                    event.triggered_by.as_str(),
                    event.metadata.to_string(),
                    event.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_exec_err("insert_activity", e))?;
        Ok(())
    }

    async fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityEvent>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ACTIVITY_COLUMNS} FROM activity_events
                     ORDER BY created_at DESC LIMIT ?1"
                ),
                params![limit as i64],
            )
            .await
            .map_err(|e| map_exec_err("recent_activity", e))?;

        let mut events = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_activity(&row) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!("Skipping activity row: {e}"),
            }
        }
        Ok(events)
    }

    async fn count_activity_errors_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        count_query(
            self.conn(),
            "SELECT COUNT(*) FROM activity_events
             WHERE status IN ('failed', 'error') AND created_at >= ?1",
            params![since.to_rfc3339()],
        )
        .await
    }

    async fn has_activity(
        &self,
        event_type: &str,
        prospect_id: Uuid,
        detail: &str,
    ) -> Result<bool, DatabaseError> {
        let count = count_query(
            self.conn(),
            "SELECT COUNT(*) FROM activity_events
             WHERE event_type = ?1 AND prospect_id = ?2 AND detail = ?3",
            params![event_type, prospect_id.to_string(), detail],
        )
        .await?;
        Ok(count > 0)
    }

    // ── Agent ticks ─────────────────────────────────────────────────

    async fn insert_tick(&self, tick: &AgentTick) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO agent_ticks (id, discovered, emails_sent, followups_sent,
                    input_tokens, output_tokens, cost, spend_tx, detail, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    tick.id.to_string(),
                    tick.discovered as i64,
                    tick.emails_sent as i64,
                    tick.followups_sent as i64,
                    tick.input_tokens as i64,
                    tick.output_tokens as i64,
                    tick.cost.to_string(),
                    opt_text(tick.spend_tx.as_deref()),
                    tick.detail.clone(),
                    tick.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_exec_err("insert_tick", e))?;
        Ok(())
    }

    async fn latest_tick(&self) -> Result<Option<AgentTick>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TICK_COLUMNS} FROM agent_ticks ORDER BY created_at DESC LIMIT 1"
                ),
                (),
            )
            .await
            .map_err(|e| map_exec_err("latest_tick", e))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_tick(&row).map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("latest_tick: {e}"))),
        }
    }
}

async fn collect_prospects(rows: &mut libsql::Rows) -> Result<Vec<Prospect>, DatabaseError> {
    let mut prospects = Vec::new();
    while let Ok(Some(row)) = rows.next().await {
        match row_to_prospect(&row) {
            Ok(prospect) => prospects.push(prospect),
            Err(e) => tracing::warn!("Skipping prospect row: {e}"),
        }
    }
    Ok(prospects)
}

async fn collect_sites(rows: &mut libsql::Rows) -> Result<Vec<GeneratedSite>, DatabaseError> {
    let mut sites = Vec::new();
    while let Ok(Some(row)) = rows.next().await {
        match row_to_site(&row) {
            Ok(site) => sites.push(site),
            Err(e) => tracing::warn!("Skipping site row: {e}"),
        }
    }
    Ok(sites)
}

async fn count_query(
    conn: &Connection,
    sql: &str,
    params: impl libsql::params::IntoParams,
) -> Result<u64, DatabaseError> {
    let mut rows = conn
        .query(sql, params)
        .await
        .map_err(|e| DatabaseError::Query(format!("count: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as u64),
        Ok(None) => Ok(0),
        Err(e) => Err(DatabaseError::Query(format!("count: {e}"))),
    }
}
