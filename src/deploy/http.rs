//! HTTP deployment platform client (Vercel-style API, bearer auth).

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::config::DeployConfig;
use crate::deploy::{Deployment, DeploymentStatus, DeployPlatform, SiteBrief, SourceFile};
use crate::error::DeployError;

pub struct HttpDeployPlatform {
    client: reqwest::Client,
    config: DeployConfig,
}

impl HttpDeployPlatform {
    pub fn new(config: DeployConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.bearer_auth(self.config.api_token.expose_secret())
    }

    async fn create_deployment(
        &self,
        project_name: &str,
        files: &[SourceFile],
    ) -> Result<Deployment, DeployError> {
        let body = serde_json::json!({
            "name": project_name,
            "target": "production",
            "files": files
                .iter()
                .map(|f| serde_json::json!({"file": f.path, "data": f.content}))
                .collect::<Vec<_>>(),
            "projectSettings": {"framework": null},
        });

        let response = self
            .auth(
                self.client
                    .post(format!("{}/v13/deployments", self.config.api_base)),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| DeployError::RequestFailed(e.to_string()))?;

        let response = check_status(response).await?;
        let created: DeploymentResponse = response
            .json()
            .await
            .map_err(|e| DeployError::InvalidResponse(e.to_string()))?;

        Ok(created.into_deployment())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, DeployError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(DeployError::Http {
        status: status.as_u16(),
        body,
    })
}

#[derive(Debug, Deserialize)]
struct DeploymentResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(rename = "readyState", default)]
    ready_state: Option<String>,
    #[serde(rename = "projectId", default)]
    project_id: Option<String>,
}

impl DeploymentResponse {
    fn into_deployment(self) -> Deployment {
        Deployment {
            deployment_id: self.id,
            project_id: self.project_id.unwrap_or_default(),
            // The platform returns a bare host; store a full URL.
            url: self.url.map(|u| {
                if u.starts_with("http") {
                    u
                } else {
                    format!("https://{u}")
                }
            }),
            status: DeploymentStatus::parse(self.ready_state.as_deref().unwrap_or("queued")),
        }
    }

    fn status_only(&self) -> DeploymentStatus {
        DeploymentStatus::parse(self.ready_state.as_deref().unwrap_or("queued"))
    }
}

#[derive(Debug, Deserialize)]
struct FileListEntry {
    name: String,
    #[serde(default)]
    uid: Option<String>,
    #[serde(rename = "type", default)]
    entry_type: Option<String>,
}

#[async_trait]
impl DeployPlatform for HttpDeployPlatform {
    async fn deploy(&self, brief: &SiteBrief) -> Result<Deployment, DeployError> {
        tracing::info!(project = %brief.project_name, files = brief.files.len(), "Creating deployment");
        self.create_deployment(&brief.project_name, &brief.files)
            .await
    }

    async fn redeploy(
        &self,
        project_name: &str,
        files: &[SourceFile],
    ) -> Result<Deployment, DeployError> {
        tracing::info!(project = %project_name, files = files.len(), "Redeploying project");
        self.create_deployment(project_name, files).await
    }

    async fn status(&self, deployment_id: &str) -> Result<DeploymentStatus, DeployError> {
        let response = self
            .auth(self.client.get(format!(
                "{}/v13/deployments/{deployment_id}",
                self.config.api_base
            )))
            .send()
            .await
            .map_err(|e| DeployError::RequestFailed(e.to_string()))?;

        let response = check_status(response).await?;
        let observed: DeploymentResponse = response
            .json()
            .await
            .map_err(|e| DeployError::InvalidResponse(e.to_string()))?;

        Ok(observed.status_only())
    }

    async fn fetch_source(&self, deployment_id: &str) -> Result<Vec<SourceFile>, DeployError> {
        let response = self
            .auth(self.client.get(format!(
                "{}/v7/deployments/{deployment_id}/files",
                self.config.api_base
            )))
            .send()
            .await
            .map_err(|e| DeployError::RequestFailed(e.to_string()))?;

        if response.status().as_u16() == 404 {
            return Err(DeployError::SourceUnavailable(deployment_id.to_string()));
        }
        let response = check_status(response).await?;
        let entries: Vec<FileListEntry> = response
            .json()
            .await
            .map_err(|e| DeployError::InvalidResponse(e.to_string()))?;

        let mut files = Vec::new();
        for entry in entries
            .into_iter()
            .filter(|e| e.entry_type.as_deref() != Some("directory"))
        {
            let Some(uid) = entry.uid else { continue };
            let content_resp = self
                .auth(self.client.get(format!(
                    "{}/v7/deployments/{deployment_id}/files/{uid}",
                    self.config.api_base
                )))
                .send()
                .await
                .map_err(|e| DeployError::RequestFailed(e.to_string()))?;

            let content_resp = check_status(content_resp).await?;
            let content = content_resp
                .text()
                .await
                .map_err(|e| DeployError::InvalidResponse(e.to_string()))?;

            files.push(SourceFile {
                path: entry.name,
                content,
            });
        }

        if files.is_empty() {
            return Err(DeployError::SourceUnavailable(deployment_id.to_string()));
        }
        Ok(files)
    }
}
