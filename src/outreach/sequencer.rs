//! Outreach sequencer — rate-capped template cadence over the pipeline.
//!
//! Two passes per tick: `run()` sends step 1 to prospects with no email
//! history, `run_followups()` advances prospects whose last send went
//! quiet. Every send attempt leaves an email log and an activity event.
//! Failures are isolated per prospect.

use std::sync::Arc;

use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::email::EmailSender;
use crate::error::{DatabaseError, Error, PipelineError};
use crate::llm::{LlmProvider, drafting};
use crate::model::{ActivityEvent, EmailLog, PipelineStage, Prospect, TickUsage, TriggeredBy};
use crate::store::Database;
use crate::templates::{self, TemplateVars};

/// Counters from one sequencer pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequencerReport {
    pub selected: usize,
    pub sent: u32,
    pub failed: u32,
}

/// Outcome of a single send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Another invocation holds the active log for this step.
    Skipped,
}

pub struct OutreachSequencer {
    db: Arc<dyn Database>,
    sender: Arc<dyn EmailSender>,
    /// Optional: personalizes the step-1 opening line.
    llm: Option<Arc<dyn LlmProvider>>,
    config: AgentConfig,
}

impl OutreachSequencer {
    pub fn new(
        db: Arc<dyn Database>,
        sender: Arc<dyn EmailSender>,
        llm: Option<Arc<dyn LlmProvider>>,
        config: AgentConfig,
    ) -> Self {
        Self {
            db,
            sender,
            llm,
            config,
        }
    }

    /// Step-1 pass: pick prospects with no email history, capped by the
    /// prorated rate, and send the intro template.
    pub async fn run(&self, usage: &mut TickUsage) -> Result<SequencerReport, Error> {
        let cap = self.config.sends_per_tick();
        if cap == 0 {
            debug!("Email sending disabled, skipping outreach pass");
            return Ok(SequencerReport::default());
        }

        let prospects = self.db.list_prospects_without_email_log(cap).await?;
        let mut report = SequencerReport {
            selected: prospects.len(),
            ..Default::default()
        };

        for prospect in prospects {
            match self.send_step(&prospect, 1, None, usage).await {
                Ok(SendOutcome::Sent) => report.sent += 1,
                Ok(SendOutcome::Skipped) => {}
                Err(e) => {
                    report.failed += 1;
                    error!(prospect = %prospect.id, error = %e, "Outreach send failed");
                }
            }
        }

        info!(
            selected = report.selected,
            sent = report.sent,
            failed = report.failed,
            "Outreach pass complete"
        );
        Ok(report)
    }

    /// Follow-up pass: advance prospects whose last send is older than the
    /// follow-up interval with no reply. Stops past the end of the cadence.
    pub async fn run_followups(&self, usage: &mut TickUsage) -> Result<SequencerReport, Error> {
        let cap = self.config.sends_per_tick();
        if cap == 0 {
            return Ok(SequencerReport::default());
        }

        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(self.config.followup_interval)
                .unwrap_or_else(|_| chrono::Duration::hours(72));
        let candidates = self.db.list_followup_candidates(cutoff).await?;

        let mut report = SequencerReport::default();
        for candidate in candidates.into_iter().take(cap) {
            let next_step = candidate.last_step + 1;
            if next_step > templates::max_step() {
                debug!(prospect = %candidate.prospect.id, "Cadence exhausted");
                continue;
            }
            report.selected += 1;

            // The site-preview step needs a live URL; without one the
            // prospect waits for the convergence sweep to publish.
            let site_url = self.published_site_url(candidate.prospect.id).await?;
            if templates::by_step(next_step)
                .is_some_and(|t| t.html.contains("{{site_url}}"))
                && site_url.is_none()
            {
                debug!(prospect = %candidate.prospect.id, step = next_step, "No published site yet, deferring");
                continue;
            }

            match self
                .send_step(&candidate.prospect, next_step, site_url.as_deref(), usage)
                .await
            {
                Ok(SendOutcome::Sent) => report.sent += 1,
                Ok(SendOutcome::Skipped) => {}
                Err(e) => {
                    report.failed += 1;
                    error!(prospect = %candidate.prospect.id, error = %e, "Follow-up send failed");
                }
            }
        }

        info!(
            selected = report.selected,
            sent = report.sent,
            failed = report.failed,
            "Follow-up pass complete"
        );
        Ok(report)
    }

    /// Send one sequence step to one prospect.
    ///
    /// Inserts the Queued log first; an active-log constraint violation
    /// means another invocation got there first and the send is skipped.
    /// Also reused by the convergence sweep for the post-publish email.
    pub async fn send_step(
        &self,
        prospect: &Prospect,
        step: u32,
        site_url: Option<&str>,
        usage: &mut TickUsage,
    ) -> Result<SendOutcome, Error> {
        let template =
            templates::by_step(step).ok_or(PipelineError::NoTemplate(step))?;
        let recipient = prospect
            .contact_email
            .as_deref()
            .ok_or(PipelineError::MissingContact(prospect.id))?;

        let opening_line = if step == 1 {
            match &self.llm {
                Some(llm) => drafting::draft_opening_line(llm, prospect, usage).await,
                None => None,
            }
        } else {
            None
        };

        let vars = TemplateVars {
            name: prospect.name.clone(),
            city: prospect
                .city
                .clone()
                .unwrap_or_else(|| self.config.discovery_city.clone()),
            site_url: site_url.map(str::to_string),
            opening_line,
        };
        let (subject, html) = template.render(&vars);

        let log = EmailLog::queued(prospect.id, template.id, step, recipient, &subject);
        match self.db.insert_email_log(&log).await {
            Ok(()) => {}
            Err(DatabaseError::Constraint(_)) => {
                debug!(
                    prospect = %prospect.id,
                    step,
                    "Active log exists for this step, another pass got there first"
                );
                return Ok(SendOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        }

        match self.sender.send(recipient, &subject, &html).await {
            Ok(receipt) => {
                self.db
                    .mark_email_sent(log.id, &receipt.message_id, &receipt.thread_id)
                    .await?;
                // No-op when already past Contacted.
                self.db
                    .update_prospect_stage(prospect.id, PipelineStage::Contacted)
                    .await?;
                self.db.touch_prospect_activity(prospect.id).await?;
                self.record_attempt(prospect.id, template.id, step, "success", None)
                    .await?;
                Ok(SendOutcome::Sent)
            }
            Err(e) => {
                let reason = e.to_string();
                self.db.mark_email_failed(log.id, &reason).await?;
                self.record_attempt(prospect.id, template.id, step, "failed", Some(&reason))
                    .await?;
                Err(e.into())
            }
        }
    }

    async fn record_attempt(
        &self,
        prospect_id: Uuid,
        template_id: &str,
        step: u32,
        status: &str,
        reason: Option<&str>,
    ) -> Result<(), Error> {
        let mut metadata = serde_json::json!({"template": template_id, "step": step});
        if let Some(reason) = reason {
            metadata["reason"] = serde_json::Value::String(reason.to_string());
        }
        let event = ActivityEvent::new("outreach_email", template_id, status, TriggeredBy::Agent)
            .for_prospect(prospect_id)
            .with_metadata(metadata);
        self.db.insert_activity(&event).await?;
        Ok(())
    }

    async fn published_site_url(&self, prospect_id: Uuid) -> Result<Option<String>, Error> {
        let site = self.db.current_site_for_prospect(prospect_id).await?;
        Ok(site
            .filter(|s| s.status == crate::model::SiteStatus::Published)
            .and_then(|s| s.url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::email::{SendReceipt, sender::EmailSender};
    use crate::error::EmailError;
    use crate::model::EmailStatus;
    use crate::store::LibSqlBackend;

    /// Records sends; fails any recipient on the fail list.
    struct MockSender {
        sends: Mutex<Vec<(String, String)>>,
        fail_for: Vec<String>,
    }

    impl MockSender {
        fn new() -> Self {
            Self {
                sends: Mutex::new(Vec::new()),
                fail_for: Vec::new(),
            }
        }

        fn failing_for(recipient: &str) -> Self {
            Self {
                sends: Mutex::new(Vec::new()),
                fail_for: vec![recipient.to_string()],
            }
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sends.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl EmailSender for MockSender {
        async fn send(
            &self,
            to: &str,
            subject: &str,
            _html: &str,
        ) -> Result<SendReceipt, EmailError> {
            if self.fail_for.iter().any(|f| f == to) {
                return Err(EmailError::SendFailed {
                    to: to.to_string(),
                    reason: "mock failure".into(),
                });
            }
            self.sends
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string()));
            Ok(SendReceipt {
                message_id: format!("<{}@mock>", Uuid::new_v4()),
                thread_id: Uuid::new_v4().to_string(),
            })
        }
    }

    async fn setup(sender: MockSender, config: AgentConfig) -> (Arc<LibSqlBackend>, OutreachSequencer) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let sequencer = OutreachSequencer::new(db.clone(), Arc::new(sender), None, config);
        (db, sequencer)
    }

    #[tokio::test]
    async fn intro_pass_sends_and_advances_stage() {
        let (db, sequencer) = setup(MockSender::new(), AgentConfig::default()).await;

        let prospect = Prospect::new("Tony's Pizzeria", "agent_discovery")
            .with_email("tony@pizzeria.test")
            .with_city("Austin");
        db.insert_prospect(&prospect).await.unwrap();

        let mut usage = TickUsage::default();
        let report = sequencer.run(&mut usage).await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 0);

        let fetched = db.get_prospect(prospect.id).await.unwrap().unwrap();
        assert_eq!(fetched.stage, PipelineStage::Contacted);

        let log = db
            .latest_email_log_for_prospect(prospect.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.status, EmailStatus::Sent);
        assert_eq!(log.sequence_step, 1);
        assert!(log.message_id.is_some());

        let events = db.recent_activity(10).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "outreach_email"));
    }

    #[tokio::test]
    async fn rate_cap_limits_selection() {
        let config = AgentConfig {
            email_rate_per_hour: 2,
            tick_interval_secs: 3600,
            ..Default::default()
        };
        let (db, sequencer) = setup(MockSender::new(), config).await;

        for i in 0..5 {
            let p = Prospect::new(format!("Vendor {i}"), "agent_discovery")
                .with_email(format!("v{i}@test.test"));
            db.insert_prospect(&p).await.unwrap();
        }

        let mut usage = TickUsage::default();
        let report = sequencer.run(&mut usage).await.unwrap();
        assert_eq!(report.selected, 2);
        assert_eq!(report.sent, 2);
    }

    #[tokio::test]
    async fn sending_disabled_sends_nothing() {
        let config = AgentConfig {
            email_enabled: false,
            ..Default::default()
        };
        let (db, sequencer) = setup(MockSender::new(), config).await;

        let p = Prospect::new("Tony's", "agent_discovery").with_email("tony@test.test");
        db.insert_prospect(&p).await.unwrap();

        let mut usage = TickUsage::default();
        let report = sequencer.run(&mut usage).await.unwrap();
        assert_eq!(report.sent, 0);
        assert!(db.latest_email_log_for_prospect(p.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failure_is_isolated_and_leaves_retry_open() {
        let (db, sequencer) = setup(
            MockSender::failing_for("bad@test.test"),
            AgentConfig::default(),
        )
        .await;

        let bad = Prospect::new("Bad Address BBQ", "agent_discovery").with_email("bad@test.test");
        let good = Prospect::new("Good Cafe", "agent_discovery").with_email("good@test.test");
        db.insert_prospect(&bad).await.unwrap();
        db.insert_prospect(&good).await.unwrap();

        let mut usage = TickUsage::default();
        let report = sequencer.run(&mut usage).await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 1);

        // Failed prospect stays Discovered with a failed log, so the next
        // pass selects it again.
        let fetched = db.get_prospect(bad.id).await.unwrap().unwrap();
        assert_eq!(fetched.stage, PipelineStage::Discovered);
        let eligible = db.list_prospects_without_email_log(10).await.unwrap();
        assert!(eligible.iter().any(|p| p.id == bad.id));
    }

    #[tokio::test]
    async fn concurrent_pass_skips_on_active_log() {
        let (db, sequencer) = setup(MockSender::new(), AgentConfig::default()).await;

        let prospect = Prospect::new("Tony's", "agent_discovery").with_email("tony@test.test");
        db.insert_prospect(&prospect).await.unwrap();

        // Simulate the other tick's queued log.
        let other = EmailLog::queued(prospect.id, "intro", 1, "tony@test.test", "Hi");
        db.insert_email_log(&other).await.unwrap();

        let mut usage = TickUsage::default();
        let outcome = sequencer
            .send_step(&prospect, 1, None, &mut usage)
            .await
            .unwrap();
        assert_eq!(outcome, SendOutcome::Skipped);
    }

    #[tokio::test]
    async fn followups_advance_the_cadence() {
        let (db, sequencer) = setup(MockSender::new(), AgentConfig::default()).await;

        let prospect = Prospect::new("Tony's", "agent_discovery").with_email("tony@test.test");
        db.insert_prospect(&prospect).await.unwrap();

        let log = EmailLog::queued(prospect.id, "intro", 1, "tony@test.test", "Hi");
        db.insert_email_log(&log).await.unwrap();
        db.mark_email_sent(log.id, "<m@t>", "t1").await.unwrap();
        backdate_sent(&db, log.id, 96).await;

        let mut usage = TickUsage::default();
        let report = sequencer.run_followups(&mut usage).await.unwrap();
        assert_eq!(report.sent, 1);

        let latest = db
            .latest_email_log_for_prospect(prospect.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.sequence_step, 2);
        assert_eq!(latest.template_id, "value_followup");
    }

    #[tokio::test]
    async fn followups_stop_past_final_step() {
        let (db, sequencer) = setup(MockSender::new(), AgentConfig::default()).await;

        let prospect = Prospect::new("Tony's", "agent_discovery").with_email("tony@test.test");
        db.insert_prospect(&prospect).await.unwrap();

        let last_step = crate::templates::max_step();
        let log = EmailLog::queued(prospect.id, "final_nudge", last_step, "tony@test.test", "Hi");
        db.insert_email_log(&log).await.unwrap();
        db.mark_email_sent(log.id, "<m@t>", "t1").await.unwrap();
        backdate_sent(&db, log.id, 96).await;

        let mut usage = TickUsage::default();
        let report = sequencer.run_followups(&mut usage).await.unwrap();
        assert_eq!(report.sent, 0);
        assert_eq!(report.selected, 0);
    }

    #[tokio::test]
    async fn site_preview_step_waits_for_published_site() {
        let (db, sequencer) = setup(MockSender::new(), AgentConfig::default()).await;

        let prospect = Prospect::new("Tony's", "agent_discovery").with_email("tony@test.test");
        db.insert_prospect(&prospect).await.unwrap();

        let log = EmailLog::queued(prospect.id, "value_followup", 2, "tony@test.test", "Hi");
        db.insert_email_log(&log).await.unwrap();
        db.mark_email_sent(log.id, "<m@t>", "t1").await.unwrap();
        backdate_sent(&db, log.id, 96).await;

        // No published site: step 3 is deferred.
        let mut usage = TickUsage::default();
        let report = sequencer.run_followups(&mut usage).await.unwrap();
        assert_eq!(report.sent, 0);

        // Publish a site and the step goes out with the URL in the body.
        let site = crate::model::GeneratedSite::generating(prospect.id, "vendor_site");
        db.insert_site(&site).await.unwrap();
        db.mark_site_published(site.id, "https://tonys.example.test")
            .await
            .unwrap();

        let report = sequencer.run_followups(&mut usage).await.unwrap();
        assert_eq!(report.sent, 1);
        let latest = db
            .latest_email_log_for_prospect(prospect.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.sequence_step, 3);
    }

    async fn backdate_sent(db: &LibSqlBackend, log_id: Uuid, hours: i64) {
        // Backdating goes through a fresh log fetch + direct update because
        // the trait has no test hook for send times.
        let when = (chrono::Utc::now() - chrono::Duration::hours(hours)).to_rfc3339();
        db.raw_execute(
            "UPDATE email_logs SET sent_at = ?1 WHERE id = ?2",
            libsql::params![when, log_id.to_string()],
        )
        .await
        .unwrap();
    }
}
