//! Deployment convergence sweep.
//!
//! Reconciles persisted site rows with the platform's observed state.
//! Pure convergence: every effect is guarded by store state, so running
//! the sweep twice in a row changes nothing the second time.

use tracing::{error, info, warn};

use crate::deploy::DeploymentStatus;
use crate::error::Error;
use crate::model::{ActivityEvent, GeneratedSite, SiteStatus, TickUsage, TriggeredBy};
use crate::sites::SiteGenerator;
use crate::templates;

/// Counters from one sweep pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepReport {
    pub checked: usize,
    pub published: u32,
    pub failed: u32,
}

impl SiteGenerator {
    /// Poll every site with a non-terminal deployment and converge it.
    pub async fn run_convergence_sweep(&self) -> Result<SweepReport, Error> {
        let pending = self.db().list_sites_pending_deployment().await?;
        let mut report = SweepReport {
            checked: pending.len(),
            ..Default::default()
        };

        for site in pending {
            // One bad deployment must not stall the rest of the sweep.
            match self.converge_site(&site).await {
                Ok(Some(DeploymentStatus::Ready)) => report.published += 1,
                Ok(Some(DeploymentStatus::Error | DeploymentStatus::Canceled)) => {
                    report.failed += 1
                }
                Ok(_) => {}
                Err(e) => {
                    error!(site = %site.id, error = %e, "Convergence failed for site");
                }
            }
        }

        if report.checked > 0 {
            info!(
                checked = report.checked,
                published = report.published,
                failed = report.failed,
                "Convergence sweep complete"
            );
        }
        Ok(report)
    }

    async fn converge_site(
        &self,
        site: &GeneratedSite,
    ) -> Result<Option<DeploymentStatus>, Error> {
        let Some(deployment_id) = site.deployment_id.as_deref() else {
            return Ok(None);
        };

        let status = self.platform().status(deployment_id).await?;

        match status {
            DeploymentStatus::Ready => {
                let Some(url) = site.url.clone() else {
                    warn!(site = %site.id, "Deployment ready but no URL recorded, skipping publish");
                    return Ok(None);
                };
                let Some(prospect) = self.db().get_prospect(site.prospect_id).await? else {
                    warn!(site = %site.id, "Prospect missing for published site");
                    return Ok(None);
                };

                self.publish_site(site, &prospect, &url).await?;
                self.send_post_publish_followup(site, &prospect, &url).await?;
            }
            DeploymentStatus::Error | DeploymentStatus::Canceled => {
                let summary = format!("deployment {deployment_id} ended {status}");
                self.db().set_site_build_error(site.id, &summary).await?;
                self.db()
                    .update_site_deployment(site.id, None, None, Some(status.as_str()), None)
                    .await?;
                self.db()
                    .update_site_status(site.id, SiteStatus::RevisionRequested)
                    .await?;

                let event = ActivityEvent::new(
                    "site_build_failed",
                    &summary,
                    "failed",
                    TriggeredBy::Agent,
                )
                .for_prospect(site.prospect_id)
                .with_metadata(serde_json::json!({"site_id": site.id}));
                self.db().insert_activity(&event).await?;
            }
            DeploymentStatus::Queued | DeploymentStatus::Building => {
                self.db()
                    .update_site_deployment(site.id, None, None, Some(status.as_str()), None)
                    .await?;
            }
        }

        Ok(Some(status))
    }

    /// Send the next outreach step with the live URL, at most once per
    /// published URL. Only prospects that came in through the outreach
    /// intake (metadata back-reference) get this email.
    async fn send_post_publish_followup(
        &self,
        site: &GeneratedSite,
        prospect: &crate::model::Prospect,
        url: &str,
    ) -> Result<(), Error> {
        let Some(sequencer) = self.sequencer() else {
            return Ok(());
        };
        if prospect.origin_vendor_id().is_none() {
            return Ok(());
        }
        if self
            .db()
            .has_activity("site_followup_sent", prospect.id, url)
            .await?
        {
            return Ok(());
        }

        let next_step = match self.db().latest_email_log_for_prospect(prospect.id).await? {
            Some(log) => log.sequence_step + 1,
            None => 1,
        };
        if next_step > templates::max_step() {
            return Ok(());
        }

        let mut usage = TickUsage::default();
        match sequencer
            .send_step(prospect, next_step, Some(url), &mut usage)
            .await
        {
            Ok(_) => {
                let event =
                    ActivityEvent::new("site_followup_sent", url, "success", TriggeredBy::Agent)
                        .for_prospect(prospect.id)
                        .with_metadata(serde_json::json!({
                            "site_id": site.id,
                            "step": next_step,
                        }));
                self.db().insert_activity(&event).await?;
            }
            Err(e) => {
                // The publish already happened; a failed follow-up email
                // waits for the regular follow-up pass.
                warn!(prospect = %prospect.id, error = %e, "Post-publish follow-up failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use uuid::Uuid;

    use crate::config::AgentConfig;
    use crate::deploy::{DeployPlatform, Deployment, SiteBrief, SourceFile};
    use crate::email::{EmailSender, SendReceipt};
    use crate::error::{DeployError, EmailError};
    use crate::model::{PipelineStage, Prospect};
    use crate::outreach::OutreachSequencer;
    use crate::store::{Database, LibSqlBackend};

    /// Scripted platform: per-deployment status map, deploys always accept.
    struct MockPlatform {
        statuses: Mutex<HashMap<String, DeploymentStatus>>,
        source: Mutex<Option<Vec<SourceFile>>>,
    }

    impl MockPlatform {
        fn new() -> Self {
            Self {
                statuses: Mutex::new(HashMap::new()),
                source: Mutex::new(None),
            }
        }

        fn set_status(&self, deployment_id: &str, status: DeploymentStatus) {
            self.statuses
                .lock()
                .unwrap()
                .insert(deployment_id.to_string(), status);
        }

        fn set_source(&self, files: Vec<SourceFile>) {
            *self.source.lock().unwrap() = Some(files);
        }
    }

    #[async_trait]
    impl DeployPlatform for MockPlatform {
        async fn deploy(&self, brief: &SiteBrief) -> Result<Deployment, DeployError> {
            let id = format!("dpl_{}", Uuid::new_v4().simple());
            self.set_status(&id, DeploymentStatus::Building);
            Ok(Deployment {
                deployment_id: id,
                project_id: format!("prj_{}", brief.project_name),
                url: Some(format!("https://{}.example.test", brief.project_name)),
                status: DeploymentStatus::Building,
            })
        }

        async fn redeploy(
            &self,
            project_name: &str,
            _files: &[SourceFile],
        ) -> Result<Deployment, DeployError> {
            let id = format!("dpl_{}", Uuid::new_v4().simple());
            self.set_status(&id, DeploymentStatus::Building);
            Ok(Deployment {
                deployment_id: id,
                project_id: format!("prj_{project_name}"),
                url: Some(format!("https://{project_name}.example.test")),
                status: DeploymentStatus::Building,
            })
        }

        async fn status(&self, deployment_id: &str) -> Result<DeploymentStatus, DeployError> {
            Ok(*self
                .statuses
                .lock()
                .unwrap()
                .get(deployment_id)
                .unwrap_or(&DeploymentStatus::Queued))
        }

        async fn fetch_source(
            &self,
            deployment_id: &str,
        ) -> Result<Vec<SourceFile>, DeployError> {
            self.source
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| DeployError::SourceUnavailable(deployment_id.to_string()))
        }
    }

    struct CountingSender {
        sends: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EmailSender for CountingSender {
        async fn send(
            &self,
            to: &str,
            _subject: &str,
            _html: &str,
        ) -> Result<SendReceipt, EmailError> {
            self.sends.lock().unwrap().push(to.to_string());
            Ok(SendReceipt {
                message_id: format!("<{}@mock>", Uuid::new_v4()),
                thread_id: Uuid::new_v4().to_string(),
            })
        }
    }

    struct Harness {
        db: Arc<LibSqlBackend>,
        platform: Arc<MockPlatform>,
        sender: Arc<CountingSender>,
        generator: SiteGenerator,
    }

    async fn harness() -> Harness {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let platform = Arc::new(MockPlatform::new());
        let sender = Arc::new(CountingSender {
            sends: Mutex::new(Vec::new()),
        });
        let sequencer = Arc::new(OutreachSequencer::new(
            db.clone(),
            sender.clone(),
            None,
            AgentConfig::default(),
        ));
        let generator = SiteGenerator::new(db.clone(), platform.clone(), Some(sequencer));
        Harness {
            db,
            platform,
            sender,
            generator,
        }
    }

    async fn seed_prospect(db: &Arc<LibSqlBackend>, with_origin: bool) -> Prospect {
        let mut prospect = Prospect::new("Tony's Pizzeria", "agent_discovery")
            .with_email("tony@pizzeria.test")
            .with_city("Austin");
        if with_origin {
            prospect = prospect
                .with_metadata(serde_json::json!({"origin_vendor_id": "vendor-42"}));
        }
        db.insert_prospect(&prospect).await.unwrap();
        prospect
    }

    #[tokio::test]
    async fn generation_persists_deployment_metadata() {
        let h = harness().await;
        let prospect = seed_prospect(&h.db, false).await;

        let site = h
            .generator
            .generate_site_for_prospect(prospect.id)
            .await
            .unwrap();
        assert_eq!(site.status, SiteStatus::Generating);
        assert!(site.deployment_id.is_some());
        assert!(site.url.is_some());
        assert_eq!(site.deployment_status.as_deref(), Some("building"));
    }

    #[tokio::test]
    async fn sweep_publishes_ready_site_and_advances_prospect() {
        let h = harness().await;
        let prospect = seed_prospect(&h.db, false).await;
        let site = h
            .generator
            .generate_site_for_prospect(prospect.id)
            .await
            .unwrap();

        h.platform
            .set_status(site.deployment_id.as_deref().unwrap(), DeploymentStatus::Ready);

        let report = h.generator.run_convergence_sweep().await.unwrap();
        assert_eq!(report.published, 1);

        let site = h.db.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(site.status, SiteStatus::Published);
        assert!(site.published_at.is_some());

        let prospect = h.db.get_prospect(prospect.id).await.unwrap().unwrap();
        assert_eq!(prospect.stage, PipelineStage::Onboarding);
    }

    #[tokio::test]
    async fn sweep_is_idempotent_no_duplicate_publish_events() {
        let h = harness().await;
        let prospect = seed_prospect(&h.db, false).await;
        let site = h
            .generator
            .generate_site_for_prospect(prospect.id)
            .await
            .unwrap();
        h.platform
            .set_status(site.deployment_id.as_deref().unwrap(), DeploymentStatus::Ready);

        h.generator.run_convergence_sweep().await.unwrap();
        let first = h.db.get_site(site.id).await.unwrap().unwrap();

        // Published sites leave the pending list, so the second sweep
        // checks nothing and the ledger stays unchanged.
        let report = h.generator.run_convergence_sweep().await.unwrap();
        assert_eq!(report.checked, 0);

        let second = h.db.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(second.published_at, first.published_at);

        let events = h.db.recent_activity(50).await.unwrap();
        let publish_events = events
            .iter()
            .filter(|e| e.event_type == "site_published")
            .count();
        assert_eq!(publish_events, 1);
    }

    #[tokio::test]
    async fn sweep_parks_failed_builds_in_revision_requested() {
        let h = harness().await;
        let prospect = seed_prospect(&h.db, false).await;
        let site = h
            .generator
            .generate_site_for_prospect(prospect.id)
            .await
            .unwrap();
        h.platform
            .set_status(site.deployment_id.as_deref().unwrap(), DeploymentStatus::Error);

        let report = h.generator.run_convergence_sweep().await.unwrap();
        assert_eq!(report.failed, 1);

        let site = h.db.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(site.status, SiteStatus::RevisionRequested);
        assert!(site.build_error.is_some());

        let prospect = h.db.get_prospect(prospect.id).await.unwrap().unwrap();
        assert_eq!(prospect.stage, PipelineStage::Discovered);
    }

    #[tokio::test]
    async fn post_publish_followup_goes_out_once_for_intake_prospects() {
        let h = harness().await;
        let prospect = seed_prospect(&h.db, true).await;

        // Outreach history: intro + follow-up already sent.
        let log = crate::model::EmailLog::queued(prospect.id, "value_followup", 2, "tony@pizzeria.test", "Hi");
        h.db.insert_email_log(&log).await.unwrap();
        h.db.mark_email_sent(log.id, "<m@t>", "t1").await.unwrap();

        let site = h
            .generator
            .generate_site_for_prospect(prospect.id)
            .await
            .unwrap();
        h.platform
            .set_status(site.deployment_id.as_deref().unwrap(), DeploymentStatus::Ready);

        h.generator.run_convergence_sweep().await.unwrap();
        assert_eq!(h.sender.sends.lock().unwrap().len(), 1);

        // The site-preview step was sent with the live URL recorded.
        let latest = h
            .db
            .latest_email_log_for_prospect(prospect.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.sequence_step, 3);

        let events = h.db.recent_activity(50).await.unwrap();
        assert_eq!(
            events
                .iter()
                .filter(|e| e.event_type == "site_followup_sent")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn no_followup_without_intake_back_reference() {
        let h = harness().await;
        let prospect = seed_prospect(&h.db, false).await;
        let site = h
            .generator
            .generate_site_for_prospect(prospect.id)
            .await
            .unwrap();
        h.platform
            .set_status(site.deployment_id.as_deref().unwrap(), DeploymentStatus::Ready);

        h.generator.run_convergence_sweep().await.unwrap();
        assert!(h.sender.sends.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_falls_back_to_regen_when_source_unavailable() {
        let h = harness().await;
        let prospect = seed_prospect(&h.db, false).await;
        let site = h
            .generator
            .generate_site_for_prospect(prospect.id)
            .await
            .unwrap();

        h.generator
            .run_site_update(site.id, "add taco tuesday banner")
            .await
            .unwrap();

        let updated = h.db.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(updated.status, SiteStatus::PendingReview);
        assert_ne!(updated.deployment_id, site.deployment_id);

        let events = h.db.recent_activity(50).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "site_update_regen"));
        assert!(!events.iter().any(|e| e.event_type == "site_update_edit"));
    }

    #[tokio::test]
    async fn update_edits_fetched_source_when_available() {
        let h = harness().await;
        let prospect = seed_prospect(&h.db, false).await;
        let site = h
            .generator
            .generate_site_for_prospect(prospect.id)
            .await
            .unwrap();

        h.platform.set_source(vec![SourceFile {
            path: "index.html".into(),
            content: "<html><main><h1>Tony's</h1></main></html>".into(),
        }]);

        h.generator
            .run_site_update(site.id, "update the menu")
            .await
            .unwrap();

        let updated = h.db.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(updated.status, SiteStatus::PendingReview);
        assert_eq!(
            updated.metadata.get("last_update_prompt").and_then(|v| v.as_str()),
            Some("update the menu")
        );

        let events = h.db.recent_activity(50).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "site_update_edit"));
    }
}
