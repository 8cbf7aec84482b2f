//! Operational alerts, computed once per tick.
//!
//! Each firing check inserts one aggregate `alert` event into the
//! activity ledger. Alerts are informational; nothing downstream gates
//! on them.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::warn;

use crate::config::AgentConfig;
use crate::error::Error;
use crate::model::{ActivityEvent, PipelineStage, TriggeredBy};
use crate::store::Database;

/// Run all alert checks. Returns how many fired.
pub async fn run_alerts(db: &Arc<dyn Database>, config: &AgentConfig) -> Result<u32, Error> {
    let now = Utc::now();
    let mut fired = 0;

    // Prospects sitting in Discovered too long.
    let stale_cutoff = now
        - Duration::from_std(config.stale_prospect_threshold).unwrap_or_else(|_| Duration::days(7));
    let stale = db
        .list_stale_prospects(PipelineStage::Discovered, stale_cutoff)
        .await?;
    if !stale.is_empty() {
        fire(
            db,
            "stale_prospects",
            format!("{} prospects discovered but never progressed", stale.len()),
            serde_json::json!({"count": stale.len()}),
        )
        .await?;
        fired += 1;
    }

    // Bounce spike in the last 24 hours.
    let bounces = db.count_bounces_since(now - Duration::hours(24)).await?;
    if bounces >= u64::from(config.bounce_alert_threshold) {
        fire(
            db,
            "bounce_spike",
            format!("{bounces} bounces in the last 24h"),
            serde_json::json!({"count": bounces}),
        )
        .await?;
        fired += 1;
    }

    // Sites stuck in Generating.
    let stuck_cutoff = now
        - Duration::from_std(config.stuck_site_threshold).unwrap_or_else(|_| Duration::minutes(30));
    let stuck = db.list_sites_stuck_generating(stuck_cutoff).await?;
    if !stuck.is_empty() {
        fire(
            db,
            "stuck_sites",
            format!("{} sites stuck generating", stuck.len()),
            serde_json::json!({
                "count": stuck.len(),
                "site_ids": stuck.iter().map(|s| s.id.to_string()).collect::<Vec<_>>(),
            }),
        )
        .await?;
        fired += 1;
    }

    // Error event volume in the last 24 hours.
    let errors = db
        .count_activity_errors_since(now - Duration::hours(24))
        .await?;
    if errors >= u64::from(config.error_alert_threshold) {
        fire(
            db,
            "error_volume",
            format!("{errors} error events in the last 24h"),
            serde_json::json!({"count": errors}),
        )
        .await?;
        fired += 1;
    }

    Ok(fired)
}

async fn fire(
    db: &Arc<dyn Database>,
    kind: &str,
    detail: String,
    metadata: serde_json::Value,
) -> Result<(), Error> {
    warn!(kind, %detail, "Alert fired");
    let mut meta = metadata;
    meta["kind"] = serde_json::Value::String(kind.to_string());
    let event = ActivityEvent::new("alert", detail, "warning", TriggeredBy::System)
        .with_metadata(meta);
    db.insert_activity(&event).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EmailLog, Prospect};
    use crate::store::LibSqlBackend;

    #[tokio::test]
    async fn quiet_system_fires_nothing() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let fired = run_alerts(&db, &AgentConfig::default()).await.unwrap();
        assert_eq!(fired, 0);
    }

    #[tokio::test]
    async fn bounce_spike_fires_at_threshold() {
        let backend = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let db: Arc<dyn Database> = backend.clone();

        let prospect = Prospect::new("Tony's", "agent_discovery").with_email("t@t.test");
        db.insert_prospect(&prospect).await.unwrap();
        for i in 0..3 {
            let log = EmailLog::queued(prospect.id, "intro", i + 1, "t@t.test", "Hi");
            db.insert_email_log(&log).await.unwrap();
            db.mark_email_bounced(log.id, "mailbox full").await.unwrap();
        }

        let config = AgentConfig {
            bounce_alert_threshold: 3,
            ..Default::default()
        };
        let fired = run_alerts(&db, &config).await.unwrap();
        assert_eq!(fired, 1);

        let events = db.recent_activity(10).await.unwrap();
        let alert = events.iter().find(|e| e.event_type == "alert").unwrap();
        assert_eq!(
            alert.metadata.get("kind").and_then(|v| v.as_str()),
            Some("bounce_spike")
        );
    }

    #[tokio::test]
    async fn stale_prospects_fire_after_threshold() {
        let backend = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let db: Arc<dyn Database> = backend.clone();

        let prospect = Prospect::new("Forgotten Falafel", "agent_discovery");
        db.insert_prospect(&prospect).await.unwrap();
        backend
            .raw_execute(
                "UPDATE prospects SET last_activity_at = ?1 WHERE id = ?2",
                libsql::params![
                    (Utc::now() - Duration::days(10)).to_rfc3339(),
                    prospect.id.to_string()
                ],
            )
            .await
            .unwrap();

        let fired = run_alerts(&db, &AgentConfig::default()).await.unwrap();
        assert_eq!(fired, 1);
    }
}
