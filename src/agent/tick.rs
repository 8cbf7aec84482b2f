//! The tick orchestrator.
//!
//! One tick runs the whole pipeline once: discover new prospects, send
//! intro emails, converge pending deployments, advance follow-ups, check
//! alerts, and persist a ledger row. Each phase is fallible on its own;
//! a phase error is recorded and the remaining phases still run.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::agent::alerts;
use crate::config::AgentConfig;
use crate::error::Error;
use crate::llm::{LlmProvider, drafting};
use crate::model::{AgentTick, Prospect, TickUsage};
use crate::outreach::OutreachSequencer;
use crate::sites::SiteGenerator;
use crate::store::Database;

/// Counters from one orchestrator pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickReport {
    pub discovered: u32,
    pub emails_sent: u32,
    pub followups_sent: u32,
    pub sites_published: u32,
    pub alerts_fired: u32,
}

pub struct TickRunner {
    db: Arc<dyn Database>,
    sequencer: Arc<OutreachSequencer>,
    /// Optional: ticks still run without a deployment platform configured.
    generator: Option<Arc<SiteGenerator>>,
    /// Optional: no LLM means no discovery, the rest of the tick runs.
    llm: Option<Arc<dyn LlmProvider>>,
    config: AgentConfig,
}

impl TickRunner {
    pub fn new(
        db: Arc<dyn Database>,
        sequencer: Arc<OutreachSequencer>,
        generator: Option<Arc<SiteGenerator>>,
        llm: Option<Arc<dyn LlmProvider>>,
        config: AgentConfig,
    ) -> Self {
        Self {
            db,
            sequencer,
            generator,
            llm,
            config,
        }
    }

    /// Run one full tick and persist its ledger row.
    pub async fn run_full_tick(&self) -> Result<AgentTick, Error> {
        let mut usage = TickUsage::default();
        let mut report = TickReport::default();
        let mut phase_errors: Vec<String> = Vec::new();

        match self.discover_prospects(&mut usage).await {
            Ok(n) => report.discovered = n,
            Err(e) => {
                error!(error = %e, "Discovery phase failed");
                phase_errors.push(format!("discovery: {e}"));
            }
        }

        match self.sequencer.run(&mut usage).await {
            Ok(r) => report.emails_sent = r.sent,
            Err(e) => {
                error!(error = %e, "Outreach phase failed");
                phase_errors.push(format!("outreach: {e}"));
            }
        }

        // Converge before follow-ups so a freshly published site can carry
        // its URL into this tick's site-preview step.
        if let Some(generator) = &self.generator {
            match generator.run_convergence_sweep().await {
                Ok(r) => report.sites_published = r.published,
                Err(e) => {
                    error!(error = %e, "Convergence phase failed");
                    phase_errors.push(format!("convergence: {e}"));
                }
            }
        }

        match self.sequencer.run_followups(&mut usage).await {
            Ok(r) => report.followups_sent = r.sent,
            Err(e) => {
                error!(error = %e, "Follow-up phase failed");
                phase_errors.push(format!("followups: {e}"));
            }
        }

        match alerts::run_alerts(&self.db, &self.config).await {
            Ok(n) => report.alerts_fired = n,
            Err(e) => {
                error!(error = %e, "Alert phase failed");
                phase_errors.push(format!("alerts: {e}"));
            }
        }

        let detail = if phase_errors.is_empty() {
            format!(
                "discovered {}, sent {}, followups {}, published {}, alerts {}",
                report.discovered,
                report.emails_sent,
                report.followups_sent,
                report.sites_published,
                report.alerts_fired
            )
        } else {
            format!("errors: {}", phase_errors.join("; "))
        };

        let tick = AgentTick::new(
            report.discovered,
            report.emails_sent,
            report.followups_sent,
            &usage,
        )
        .with_detail(detail);
        self.db.insert_tick(&tick).await?;

        info!(
            tick = %tick.id,
            discovered = report.discovered,
            emails_sent = report.emails_sent,
            followups_sent = report.followups_sent,
            sites_published = report.sites_published,
            tokens = usage.total_tokens(),
            "Tick complete"
        );
        Ok(tick)
    }

    /// Discovery phase: ask the LLM for vendor leads, dedupe against the
    /// store, insert the new ones. Returns the insert count.
    pub async fn discover_prospects(&self, usage: &mut TickUsage) -> Result<u32, Error> {
        let Some(llm) = &self.llm else {
            return Ok(0);
        };
        let limit = self.config.max_prospects_per_tick;
        if limit == 0 {
            return Ok(0);
        }

        let city = self.config.discovery_city.clone();
        let leads = drafting::infer_vendors(llm, &city, limit, usage).await?;

        let mut inserted = 0;
        for lead in leads {
            if self.lead_is_known(&lead, &city).await? {
                continue;
            }

            let mut prospect = Prospect::new(&lead.name, "agent_discovery").with_city(&city);
            if let Some(email) = &lead.email {
                prospect = prospect.with_email(email);
            }
            if let Some(address) = &lead.address {
                prospect.address = Some(address.clone());
            }
            if let Some(cuisine) = &lead.cuisine {
                prospect = prospect.with_metadata(serde_json::json!({"cuisine": cuisine}));
            }

            self.db.insert_prospect(&prospect).await?;
            inserted += 1;
            info!(prospect = %prospect.id, name = %prospect.name, "Discovered prospect");
        }

        Ok(inserted)
    }

    /// A lead already in the store, by email or by name within the city.
    async fn lead_is_known(
        &self,
        lead: &drafting::VendorLead,
        city: &str,
    ) -> Result<bool, Error> {
        if let Some(email) = &lead.email
            && self.db.get_prospect_by_email(email).await?.is_some()
        {
            return Ok(true);
        }
        if self
            .db
            .find_prospect_by_name(&lead.name, Some(city))
            .await?
            .is_some()
        {
            warn!(name = %lead.name, "Discovery repeated a known vendor, skipping");
            return Ok(true);
        }
        Ok(false)
    }
}
