//! End-to-end pipeline scenarios against an in-memory store with mock
//! collaborators: scripted LLM, recording email sender, scripted
//! deployment platform.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use vendora::agent::TickRunner;
use vendora::config::AgentConfig;
use vendora::deploy::{DeployPlatform, Deployment, DeploymentStatus, SiteBrief, SourceFile};
use vendora::email::{EmailSender, InboundEmail, SendReceipt};
use vendora::error::{DeployError, EmailError, LlmError};
use vendora::llm::{
    CompletionRequest, CompletionResponse, FinishReason, IntentClassifier, LlmProvider,
};
use vendora::model::{EmailStatus, PipelineStage, Prospect, SiteStatus, TickUsage};
use vendora::outreach::OutreachSequencer;
use vendora::reply::ReplyMatcher;
use vendora::sites::SiteGenerator;
use vendora::store::{Database, LibSqlBackend};

// ── Mock collaborators ──────────────────────────────────────────────────

struct RecordingSender {
    sends: Mutex<Vec<(String, String)>>,
}

impl RecordingSender {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sends: Mutex::new(Vec::new()),
        })
    }

    fn count(&self) -> usize {
        self.sends.lock().unwrap().len()
    }
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn send(&self, to: &str, subject: &str, _html: &str) -> Result<SendReceipt, EmailError> {
        self.sends
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string()));
        Ok(SendReceipt {
            message_id: format!("<{}@vendora.test>", Uuid::new_v4()),
            thread_id: Uuid::new_v4().to_string(),
        })
    }
}

/// Answers discovery prompts with a fixed vendor list and everything else
/// with a fixed intent.
struct ScriptedLlm {
    discovery: String,
    intent: String,
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "mock-scripted"
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        (Decimal::ZERO, Decimal::ZERO)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let is_discovery = request
            .messages
            .iter()
            .any(|m| m.content.contains("Suggest up to"));
        Ok(CompletionResponse {
            content: if is_discovery {
                self.discovery.clone()
            } else {
                self.intent.clone()
            },
            input_tokens: 30,
            output_tokens: 15,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}

struct ScriptedPlatform {
    statuses: Mutex<HashMap<String, DeploymentStatus>>,
}

impl ScriptedPlatform {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(HashMap::new()),
        })
    }

    fn set_status(&self, deployment_id: &str, status: DeploymentStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(deployment_id.to_string(), status);
    }
}

#[async_trait]
impl DeployPlatform for ScriptedPlatform {
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

    async fn fetch_source(&self, deployment_id: &str) -> Result<Vec<SourceFile>, DeployError> {
        Err(DeployError::SourceUnavailable(deployment_id.to_string()))
    }
}

// ── Harness ─────────────────────────────────────────────────────────────

struct Pipeline {
    db: Arc<LibSqlBackend>,
    sender: Arc<RecordingSender>,
    platform: Arc<ScriptedPlatform>,
    sequencer: Arc<OutreachSequencer>,
    generator: Arc<SiteGenerator>,
    matcher: ReplyMatcher,
    runner: TickRunner,
}

/// Full pipeline wiring. `followup_interval` is zero so follow-up tests
/// need no clock manipulation.
async fn pipeline(llm: Option<Arc<dyn LlmProvider>>) -> Pipeline {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let sender = RecordingSender::new();
    let platform = ScriptedPlatform::new();

    let config = AgentConfig {
        followup_interval: Duration::ZERO,
        ..Default::default()
    };
    let sequencer = Arc::new(OutreachSequencer::new(
        db.clone(),
        sender.clone(),
        None,
        config.clone(),
    ));
    let generator = Arc::new(SiteGenerator::new(
        db.clone(),
        platform.clone(),
        Some(sequencer.clone()),
    ));
    let matcher = ReplyMatcher::new(
        db.clone(),
        llm.clone().map(IntentClassifier::new),
        Some(generator.clone()),
    );
    let runner = TickRunner::new(
        db.clone(),
        sequencer.clone(),
        Some(generator.clone()),
        llm,
        config,
    );

    Pipeline {
        db,
        sender,
        platform,
        sequencer,
        generator,
        matcher,
        runner,
    }
}

fn scripted_llm(intent: &str) -> Arc<dyn LlmProvider> {
    Arc::new(ScriptedLlm {
        discovery: r#"{"vendors": [
            {"name": "Tony's Pizzeria", "email": "tony@pizzeria.test", "cuisine": "pizza"}
        ]}"#
        .to_string(),
        intent: intent.to_string(),
    })
}

fn reply_from(log_message_id: &str, from: &str, body: &str) -> InboundEmail {
    InboundEmail {
        from: from.to_string(),
        to: "hello@vendora.test".to_string(),
        subject: "Re: whatever".to_string(),
        body: body.to_string(),
        message_id: Some(format!("reply-{}@pizzeria.test", Uuid::new_v4())),
        in_reply_to: Some(
            log_message_id
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string(),
        ),
    }
}

async fn wait_for_site(db: &Arc<LibSqlBackend>, prospect_id: Uuid) -> vendora::model::GeneratedSite {
    for _ in 0..40 {
        if let Some(site) = db.current_site_for_prospect(prospect_id).await.unwrap() {
            return site;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("spawned site generation never inserted a row");
}

// ── Scenarios ───────────────────────────────────────────────────────────

/// The full Tony's Pizzeria chain: discovery, intro email, website_update
/// reply, spawned generation, convergence publish.
#[tokio::test]
async fn tonys_pizzeria_end_to_end() {
    let p = pipeline(Some(scripted_llm(r#"{"intent": "website_update"}"#))).await;

    // Tick 1: discovery finds Tony, the intro goes out.
    let tick = p.runner.run_full_tick().await.unwrap();
    assert_eq!(tick.discovered, 1);
    assert_eq!(tick.emails_sent, 1);

    let tony = p
        .db
        .get_prospect_by_email("tony@pizzeria.test")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tony.stage, PipelineStage::Contacted);

    // Tony replies asking for a website.
    let intro = p
        .db
        .latest_email_log_for_prospect(tony.id)
        .await
        .unwrap()
        .unwrap();
    let mut usage = TickUsage::default();
    let outcome = p
        .matcher
        .match_reply(
            &reply_from(
                intro.message_id.as_deref().unwrap(),
                "tony@pizzeria.test",
                "Yes! Please build us a website",
            ),
            &mut usage,
        )
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.dispatched);

    let tony = p.db.get_prospect(tony.id).await.unwrap().unwrap();
    assert_eq!(tony.stage, PipelineStage::Engaged);

    // The site generation was spawned; wait for the row, then let the
    // deployment finish and converge.
    let site = wait_for_site(&p.db, tony.id).await;
    p.platform
        .set_status(site.deployment_id.as_deref().unwrap(), DeploymentStatus::Ready);

    let report = p.generator.run_convergence_sweep().await.unwrap();
    assert_eq!(report.published, 1);

    let site = p.db.get_site(site.id).await.unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Published);
    assert!(site.url.is_some());

    let tony = p.db.get_prospect(tony.id).await.unwrap().unwrap();
    assert_eq!(tony.stage, PipelineStage::Onboarding);
}

/// A queued-or-sent log for a step blocks a second send of the same step,
/// whichever tick tries it.
#[tokio::test]
async fn no_double_send_for_the_same_step() {
    let p = pipeline(None).await;
    let prospect = Prospect::new("Tony's", "agent_discovery").with_email("tony@pizzeria.test");
    p.db.insert_prospect(&prospect).await.unwrap();

    let mut usage = TickUsage::default();
    p.sequencer.run(&mut usage).await.unwrap();
    assert_eq!(p.sender.count(), 1);

    // A second intro pass finds no eligible prospects.
    p.sequencer.run(&mut usage).await.unwrap();
    assert_eq!(p.sender.count(), 1);
}

/// Unreplied prospects advance one step per follow-up pass and the
/// cadence halts once a reply arrives.
#[tokio::test]
async fn followups_advance_until_reply() {
    let p = pipeline(None).await;
    let prospect = Prospect::new("Tony's", "agent_discovery").with_email("tony@pizzeria.test");
    p.db.insert_prospect(&prospect).await.unwrap();

    let mut usage = TickUsage::default();
    p.sequencer.run(&mut usage).await.unwrap();
    p.sequencer.run_followups(&mut usage).await.unwrap();
    assert_eq!(p.sender.count(), 2);

    let latest = p
        .db
        .latest_email_log_for_prospect(prospect.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.sequence_step, 2);

    // Tony replies; the cadence stops.
    p.matcher
        .match_reply(
            &reply_from(
                latest.message_id.as_deref().unwrap(),
                "tony@pizzeria.test",
                "thanks, thinking about it",
            ),
            &mut usage,
        )
        .await
        .unwrap()
        .unwrap();

    p.sequencer.run_followups(&mut usage).await.unwrap();
    assert_eq!(p.sender.count(), 2);
}

/// A duplicate webhook delivery of the same reply matches nothing and
/// leaves a single reply_received event.
#[tokio::test]
async fn duplicate_reply_delivery_is_idempotent() {
    let p = pipeline(None).await;
    let prospect = Prospect::new("Tony's", "agent_discovery").with_email("tony@pizzeria.test");
    p.db.insert_prospect(&prospect).await.unwrap();

    let mut usage = TickUsage::default();
    p.sequencer.run(&mut usage).await.unwrap();
    let log = p
        .db
        .latest_email_log_for_prospect(prospect.id)
        .await
        .unwrap()
        .unwrap();

    let email = reply_from(
        log.message_id.as_deref().unwrap(),
        "tony@pizzeria.test",
        "yes",
    );
    assert!(p.matcher.match_reply(&email, &mut usage).await.unwrap().is_some());
    assert!(p.matcher.match_reply(&email, &mut usage).await.unwrap().is_none());

    let events = p.db.recent_activity(50).await.unwrap();
    assert_eq!(
        events
            .iter()
            .filter(|e| e.event_type == "reply_received")
            .count(),
        1
    );

    let log = p.db.get_email_log(log.id).await.unwrap().unwrap();
    assert_eq!(log.status, EmailStatus::Replied);
}

/// Stage changes only move forward; a reply cannot demote an onboarding
/// prospect and churn is the one backward escape.
#[tokio::test]
async fn stages_are_monotonic() {
    let p = pipeline(None).await;
    let prospect = Prospect::new("Tony's", "agent_discovery").with_email("tony@pizzeria.test");
    p.db.insert_prospect(&prospect).await.unwrap();

    assert!(
        p.db.update_prospect_stage(prospect.id, PipelineStage::Onboarding)
            .await
            .unwrap()
    );
    // Backward and same-stage writes are refused without error.
    assert!(
        !p.db
            .update_prospect_stage(prospect.id, PipelineStage::Contacted)
            .await
            .unwrap()
    );
    assert!(
        !p.db
            .update_prospect_stage(prospect.id, PipelineStage::Onboarding)
            .await
            .unwrap()
    );

    let fetched = p.db.get_prospect(prospect.id).await.unwrap().unwrap();
    assert_eq!(fetched.stage, PipelineStage::Onboarding);

    assert!(
        p.db.update_prospect_stage(prospect.id, PipelineStage::Churned)
            .await
            .unwrap()
    );
}

/// Running the sweep twice over a published site changes nothing.
#[tokio::test]
async fn convergence_sweep_is_idempotent() {
    let p = pipeline(None).await;
    let prospect = Prospect::new("Tony's", "agent_discovery").with_email("tony@pizzeria.test");
    p.db.insert_prospect(&prospect).await.unwrap();

    let site = p
        .generator
        .generate_site_for_prospect(prospect.id)
        .await
        .unwrap();
    p.platform
        .set_status(site.deployment_id.as_deref().unwrap(), DeploymentStatus::Ready);

    p.generator.run_convergence_sweep().await.unwrap();
    let first = p.db.get_site(site.id).await.unwrap().unwrap();

    let report = p.generator.run_convergence_sweep().await.unwrap();
    assert_eq!(report.checked, 0);
    let second = p.db.get_site(site.id).await.unwrap().unwrap();
    assert_eq!(second.published_at, first.published_at);

    let events = p.db.recent_activity(50).await.unwrap();
    assert_eq!(
        events
            .iter()
            .filter(|e| e.event_type == "site_published")
            .count(),
        1
    );
}

/// A classifier that returns garbage degrades to `other`: the reply is
/// still recorded and the prospect still advances.
#[tokio::test]
async fn classifier_garbage_fails_open() {
    let p = pipeline(Some(scripted_llm("no json to be found here"))).await;
    let prospect = Prospect::new("Tony's", "agent_discovery").with_email("tony@pizzeria.test");
    p.db.insert_prospect(&prospect).await.unwrap();

    let mut usage = TickUsage::default();
    p.sequencer.run(&mut usage).await.unwrap();
    let log = p
        .db
        .latest_email_log_for_prospect(prospect.id)
        .await
        .unwrap()
        .unwrap();

    let outcome = p
        .matcher
        .match_reply(
            &reply_from(log.message_id.as_deref().unwrap(), "tony@pizzeria.test", "??"),
            &mut usage,
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.intent.as_str(), "other");
    assert!(!outcome.dispatched);
    // The failed parse still consumed tokens.
    assert!(usage.total_tokens() > 0);

    let fetched = p.db.get_prospect(prospect.id).await.unwrap().unwrap();
    assert_eq!(fetched.stage, PipelineStage::Engaged);
}

/// A send failure is isolated: the log records the failure, other
/// prospects still get their email, and the failed one stays eligible.
#[tokio::test]
async fn send_failure_leaves_prospect_retryable() {
    struct FlakySender {
        fail_next: Mutex<bool>,
    }

    #[async_trait]
    impl EmailSender for FlakySender {
        async fn send(
            &self,
            to: &str,
            _subject: &str,
            _html: &str,
        ) -> Result<SendReceipt, EmailError> {
            let mut fail = self.fail_next.lock().unwrap();
            if *fail {
                *fail = false;
                return Err(EmailError::SendFailed {
                    to: to.to_string(),
                    reason: "connection reset".into(),
                });
            }
            Ok(SendReceipt {
                message_id: format!("<{}@vendora.test>", Uuid::new_v4()),
                thread_id: Uuid::new_v4().to_string(),
            })
        }
    }

    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let sequencer = OutreachSequencer::new(
        db.clone(),
        Arc::new(FlakySender {
            fail_next: Mutex::new(true),
        }),
        None,
        AgentConfig::default(),
    );

    let prospect = Prospect::new("Tony's", "agent_discovery").with_email("tony@pizzeria.test");
    db.insert_prospect(&prospect).await.unwrap();

    let mut usage = TickUsage::default();
    let report = sequencer.run(&mut usage).await.unwrap();
    assert_eq!(report.failed, 1);

    let log = db
        .latest_email_log_for_prospect(prospect.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(log.status, EmailStatus::Failed);
    assert!(log.bounce_reason.is_some());

    // Next pass retries and succeeds.
    let report = sequencer.run(&mut usage).await.unwrap();
    assert_eq!(report.sent, 1);
    let log = db
        .latest_email_log_for_prospect(prospect.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(log.status, EmailStatus::Sent);
}
