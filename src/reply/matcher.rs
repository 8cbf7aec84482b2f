//! Reply matcher — correlates inbound email to outreach threads and
//! dispatches the classified intent.
//!
//! Matching prefers the `In-Reply-To` thread id; subject correlation is
//! the fallback for clients that drop threading headers. The atomic
//! `try_mark_replied` claim makes the whole operation idempotent:
//! duplicate webhook deliveries lose the claim and dispatch nothing.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::email::{InboundEmail, normalize_subject, strip_quoted_text};
use crate::error::Error;
use crate::llm::{IntentClassifier, ReplyIntent};
use crate::model::{ActivityEvent, EmailLog, PipelineStage, TickUsage, TriggeredBy};
use crate::sites::SiteGenerator;
use crate::store::Database;

/// What a matched reply resolved to.
#[derive(Debug, Clone)]
pub struct ReplyOutcome {
    pub prospect_id: Uuid,
    pub email_log_id: Uuid,
    pub intent: ReplyIntent,
    /// True when a concrete workflow was started or queued.
    pub dispatched: bool,
}

pub struct ReplyMatcher {
    db: Arc<dyn Database>,
    /// Optional: without a classifier every reply is `other`.
    classifier: Option<IntentClassifier>,
    /// Optional: without a generator `website_update` replies are
    /// recorded but no site work starts.
    generator: Option<Arc<SiteGenerator>>,
}

impl ReplyMatcher {
    pub fn new(
        db: Arc<dyn Database>,
        classifier: Option<IntentClassifier>,
        generator: Option<Arc<SiteGenerator>>,
    ) -> Self {
        Self {
            db,
            classifier,
            generator,
        }
    }

    /// Match an inbound email to an outreach log and dispatch its intent.
    ///
    /// `None` means no thread matched, or another delivery of the same
    /// reply already claimed it — both are normal outcomes, not errors.
    pub async fn match_reply(
        &self,
        email: &InboundEmail,
        usage: &mut TickUsage,
    ) -> Result<Option<ReplyOutcome>, Error> {
        let Some(log) = self.find_matching_log(email).await? else {
            debug!(from = %email.from, subject = %email.subject, "No outreach thread matched");
            return Ok(None);
        };

        // Atomic claim: the losing delivery of a duplicate webhook stops here.
        if !self.db.try_mark_replied(log.id).await? {
            debug!(log = %log.id, "Reply already claimed, skipping");
            return Ok(None);
        }

        let prospect_id = log.prospect_id;
        self.db
            .update_prospect_stage(prospect_id, PipelineStage::Engaged)
            .await?;
        self.db.touch_prospect_activity(prospect_id).await?;

        let event = ActivityEvent::new(
            "reply_received",
            &email.from,
            "success",
            TriggeredBy::System,
        )
        .for_prospect(prospect_id)
        .with_metadata(serde_json::json!({
            "email_log_id": log.id,
            "subject": email.subject,
        }));
        self.db.insert_activity(&event).await?;

        let prospect = self.db.get_prospect(prospect_id).await?;
        let vendor_name = prospect.as_ref().map(|p| p.name.as_str()).unwrap_or("");

        // Webhook JSON pushes may carry the full quoted history; only the
        // fresh text goes to the classifier.
        let fresh_body = strip_quoted_text(&email.body);
        let intent = match &self.classifier {
            Some(classifier) => classifier.classify(vendor_name, &fresh_body, usage).await,
            None => ReplyIntent::Other,
        };

        let intent_event = ActivityEvent::new(
            "reply_intent",
            intent.as_str(),
            "success",
            TriggeredBy::Agent,
        )
        .for_prospect(prospect_id)
        .with_metadata(serde_json::json!({"email_log_id": log.id}));
        self.db.insert_activity(&intent_event).await?;

        let dispatched = self.dispatch(prospect_id, intent, &fresh_body).await?;

        info!(
            prospect = %prospect_id,
            log = %log.id,
            intent = %intent,
            dispatched,
            "Reply processed"
        );
        Ok(Some(ReplyOutcome {
            prospect_id,
            email_log_id: log.id,
            intent,
            dispatched,
        }))
    }

    /// Find the outreach log this email answers.
    async fn find_matching_log(
        &self,
        email: &InboundEmail,
    ) -> Result<Option<EmailLog>, Error> {
        let candidates = self.db.find_logs_by_recipient(&email.from).await?;
        if candidates.is_empty() {
            return Ok(None);
        }

        // Thread id first.
        if let Some(in_reply_to) = email.in_reply_to.as_deref() {
            let hit = candidates.iter().find(|log| {
                log.message_id
                    .as_deref()
                    .is_some_and(|mid| ids_match(mid, in_reply_to))
                    || log.thread_id.as_deref() == Some(in_reply_to)
            });
            if let Some(log) = hit {
                return Ok(Some(log.clone()));
            }
        }

        // Subject correlation fallback. Most recent send wins.
        let wanted = normalize_subject(&email.subject);
        if wanted.is_empty() {
            return Ok(None);
        }
        Ok(candidates
            .into_iter()
            .find(|log| normalize_subject(&log.subject) == wanted))
    }

    /// Start the workflow the intent calls for. Returns whether anything
    /// concrete happened.
    async fn dispatch(
        &self,
        prospect_id: Uuid,
        intent: ReplyIntent,
        body: &str,
    ) -> Result<bool, Error> {
        match intent {
            ReplyIntent::WebsiteUpdate => {
                let Some(generator) = self.generator.clone() else {
                    warn!(prospect = %prospect_id, "No site generator configured, website request recorded only");
                    return Ok(false);
                };
                let db = self.db.clone();
                let prompt = body.to_string();

                // Fire and forget: the webhook response must not wait for
                // a deployment. Errors are caught and logged in the task.
                tokio::spawn(async move {
                    let result = match db.current_site_for_prospect(prospect_id).await {
                        Ok(Some(site)) if site.deployment_id.is_some() => {
                            generator.run_site_update(site.id, &prompt).await
                        }
                        Ok(_) => generator
                            .generate_site_for_prospect(prospect_id)
                            .await
                            .map(|_| ()),
                        Err(e) => Err(e.into()),
                    };
                    if let Err(e) = result {
                        error!(prospect = %prospect_id, error = %e, "Site work from reply failed");
                    }
                });
                Ok(true)
            }
            ReplyIntent::MarketingMaterials | ReplyIntent::EventInfluencer => {
                let event_type = match intent {
                    ReplyIntent::MarketingMaterials => "marketing_request",
                    _ => "event_request",
                };
                let preview: String = body.chars().take(200).collect();
                let event =
                    ActivityEvent::new(event_type, preview, "pending", TriggeredBy::Agent)
                        .for_prospect(prospect_id);
                self.db.insert_activity(&event).await?;
                Ok(true)
            }
            ReplyIntent::GeneralPositive | ReplyIntent::Other => Ok(false),
        }
    }
}

/// Message-id comparison ignoring angle brackets.
fn ids_match(a: &str, b: &str) -> bool {
    let strip = |s: &str| s.trim().trim_start_matches('<').trim_end_matches('>').to_string();
    strip(a) == strip(b)
}
