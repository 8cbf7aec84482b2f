//! Site generation and update workflows.

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::deploy::{SiteBrief, SourceFile};
use crate::error::{Error, PipelineError};
use crate::model::{ActivityEvent, GeneratedSite, PipelineStage, Prospect, SiteStatus, TriggeredBy};
use crate::sites::SiteGenerator;

const SITE_TEMPLATE_TYPE: &str = "vendor_site";

impl SiteGenerator {
    /// Generate and deploy a site for a prospect.
    ///
    /// Inserts the Generating row first so the workflow survives a crash,
    /// then hands the brief to the platform without waiting for the build.
    /// The convergence sweep picks it up from there. If the platform
    /// already reports READY on creation, the site publishes immediately.
    pub async fn generate_site_for_prospect(
        &self,
        prospect_id: Uuid,
    ) -> Result<GeneratedSite, Error> {
        let prospect = self
            .db()
            .get_prospect(prospect_id)
            .await?
            .ok_or(PipelineError::ProspectNotFound(prospect_id))?;

        let project_name = project_name_for(&prospect);
        let mut site = GeneratedSite::generating(prospect_id, SITE_TEMPLATE_TYPE);
        site.metadata = serde_json::json!({
            "brief": brief_text(&prospect),
            "project_name": project_name,
        });
        self.db().insert_site(&site).await?;

        let brief = SiteBrief {
            project_name: project_name.clone(),
            files: render_site_files(&prospect, None),
        };

        match self.platform().deploy(&brief).await {
            Ok(deployment) => {
                self.db()
                    .update_site_deployment(
                        site.id,
                        Some(&deployment.deployment_id),
                        Some(&deployment.project_id),
                        Some(deployment.status.as_str()),
                        deployment.url.as_deref(),
                    )
                    .await?;

                info!(
                    site = %site.id,
                    prospect = %prospect.id,
                    deployment = %deployment.deployment_id,
                    status = %deployment.status,
                    "Deployment created"
                );

                // Fast path: some platforms report READY synchronously for
                // static uploads.
                if deployment.status == crate::deploy::DeploymentStatus::Ready
                    && let Some(url) = deployment.url.as_deref()
                {
                    self.publish_site(&site, &prospect, url).await?;
                }

                let site = self
                    .db()
                    .get_site(site.id)
                    .await?
                    .ok_or(PipelineError::SiteNotFound(site.id))?;
                Ok(site)
            }
            Err(e) => {
                let summary = e.to_string();
                error!(site = %site.id, error = %summary, "Deployment failed");
                self.db().set_site_build_error(site.id, &summary).await?;
                self.db()
                    .update_site_status(site.id, SiteStatus::RevisionRequested)
                    .await?;
                let event = ActivityEvent::new(
                    "site_generation",
                    &prospect.name,
                    "failed",
                    TriggeredBy::Agent,
                )
                .for_prospect(prospect.id)
                .with_metadata(serde_json::json!({"site_id": site.id, "error": summary}));
                self.db().insert_activity(&event).await?;
                Err(e.into())
            }
        }
    }

    /// Apply an update request to an existing site.
    ///
    /// Preferred path edits the deployed source and redeploys into the
    /// same project. When the source cannot be fetched, falls back to a
    /// full regeneration from the stored brief — the project name is
    /// reused either way so the URL stays stable.
    pub async fn run_site_update(&self, site_id: Uuid, prompt: &str) -> Result<(), Error> {
        let site = self
            .db()
            .get_site(site_id)
            .await?
            .ok_or(PipelineError::SiteNotFound(site_id))?;
        let deployment_id = site
            .deployment_id
            .as_deref()
            .ok_or(PipelineError::NoDeployment(site_id))?;
        let prospect = self
            .db()
            .get_prospect(site.prospect_id)
            .await?
            .ok_or(PipelineError::ProspectNotFound(site.prospect_id))?;

        let project_name = site
            .metadata
            .get("project_name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| project_name_for(&prospect));

        let (files, path) = match self.platform().fetch_source(deployment_id).await {
            Ok(source) => (apply_update(source, prompt), "site_update_edit"),
            Err(e) => {
                warn!(
                    site = %site_id,
                    error = %e,
                    "Source fetch failed, regenerating from brief"
                );
                (render_site_files(&prospect, Some(prompt)), "site_update_regen")
            }
        };

        let deployment = self.platform().redeploy(&project_name, &files).await?;
        self.db()
            .update_site_deployment(
                site.id,
                Some(&deployment.deployment_id),
                None,
                Some(deployment.status.as_str()),
                deployment.url.as_deref(),
            )
            .await?;
        self.db()
            .update_site_status(site.id, SiteStatus::PendingReview)
            .await?;

        let mut metadata = site.metadata.clone();
        metadata["last_update_prompt"] = serde_json::Value::String(prompt.to_string());
        self.db().set_site_metadata(site.id, &metadata).await?;

        let event = ActivityEvent::new(path, prompt, "success", TriggeredBy::Agent)
            .for_prospect(site.prospect_id)
            .with_metadata(serde_json::json!({
                "site_id": site.id,
                "deployment_id": deployment.deployment_id,
            }));
        self.db().insert_activity(&event).await?;

        info!(site = %site_id, path, "Site update deployed");
        Ok(())
    }

    /// Publish a site and advance its prospect. Guarded so re-running
    /// never duplicates the ledger entry.
    pub(crate) async fn publish_site(
        &self,
        site: &GeneratedSite,
        prospect: &Prospect,
        url: &str,
    ) -> Result<(), Error> {
        self.db().mark_site_published(site.id, url).await?;
        self.db()
            .update_prospect_stage(prospect.id, PipelineStage::Onboarding)
            .await?;

        if !self
            .db()
            .has_activity("site_published", prospect.id, url)
            .await?
        {
            let event = ActivityEvent::new("site_published", url, "success", TriggeredBy::Agent)
                .for_prospect(prospect.id)
                .with_metadata(serde_json::json!({"site_id": site.id}));
            self.db().insert_activity(&event).await?;
            info!(site = %site.id, url, "Site published");
        }
        Ok(())
    }
}

/// Stable, URL-safe platform project name for a prospect.
fn project_name_for(prospect: &Prospect) -> String {
    let slug: String = prospect
        .name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-').to_string();
    let id = prospect.id.simple().to_string();
    format!("{slug}-{}", &id[..8])
}

/// One-paragraph generation brief from prospect fields.
fn brief_text(prospect: &Prospect) -> String {
    let mut brief = format!("Single-page site for {}", prospect.name);
    if let Some(city) = &prospect.city {
        brief.push_str(&format!(" in {city}"));
    }
    if let Some(address) = &prospect.address {
        brief.push_str(&format!(", located at {address}"));
    }
    brief.push_str(". Warm, simple, mobile-first.");
    brief
}

/// Render the static site files for a prospect.
fn render_site_files(prospect: &Prospect, update_note: Option<&str>) -> Vec<SourceFile> {
    let city = prospect.city.as_deref().unwrap_or("");
    let address = prospect.address.as_deref().unwrap_or("");
    let note = update_note
        .map(|n| format!("<section class=\"update\"><p>{n}</p></section>\n"))
        .unwrap_or_default();

    let html = format!(
        "<!doctype html>\n<html lang=\"en\">\n<head>\n\
         <meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{name}</title>\n</head>\n<body>\n\
         <header><h1>{name}</h1><p>{city}</p></header>\n\
         <main>\n<section><p>Find us at {address}</p></section>\n{note}</main>\n\
         <footer><p>&copy; {name}</p></footer>\n</body>\n</html>\n",
        name = prospect.name,
    );

    vec![SourceFile {
        path: "index.html".into(),
        content: html,
    }]
}

/// Apply an update request to fetched source. The request is injected as
/// a visible update section in the main page for operator review.
fn apply_update(mut files: Vec<SourceFile>, prompt: &str) -> Vec<SourceFile> {
    let note = format!("<section class=\"update\"><p>{prompt}</p></section>\n</main>");
    for file in &mut files {
        if file.path.ends_with("index.html") && file.content.contains("</main>") {
            file.content = file.content.replacen("</main>", &note, 1);
            return files;
        }
    }
    // No main landmark found: append to the first HTML file.
    if let Some(file) = files.iter_mut().find(|f| f.path.ends_with(".html")) {
        file.content
            .push_str(&format!("<section class=\"update\"><p>{prompt}</p></section>\n"));
    }
    files
}
