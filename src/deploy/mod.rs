//! Deployment platform abstraction.
//!
//! The engine treats site hosting as an external platform behind the
//! `DeployPlatform` trait: create a deployment from a brief, poll its
//! status, fetch its source for edits, and redeploy. The HTTP
//! implementation targets a Vercel-style API.

pub mod http;

use async_trait::async_trait;

use crate::error::DeployError;

pub use http::HttpDeployPlatform;

/// Observed deployment state on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentStatus {
    Queued,
    Building,
    Ready,
    Error,
    Canceled,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Building => "building",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::Canceled => "canceled",
        }
    }

    /// Terminal states: the sweep stops polling these.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Error | Self::Canceled)
    }

    /// Parse a platform state string (Vercel uses uppercase readyState).
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "queued" | "initializing" => Self::Queued,
            "building" => Self::Building,
            "ready" => Self::Ready,
            "error" => Self::Error,
            "canceled" | "cancelled" => Self::Canceled,
            _ => Self::Queued,
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file in a deployment.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}

/// Everything the platform needs to create a site.
#[derive(Debug, Clone)]
pub struct SiteBrief {
    /// Platform project name. Stable across redeploys so the URL is too.
    pub project_name: String,
    pub files: Vec<SourceFile>,
}

/// A created or observed deployment.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub deployment_id: String,
    pub project_id: String,
    pub url: Option<String>,
    pub status: DeploymentStatus,
}

/// Site hosting platform.
#[async_trait]
pub trait DeployPlatform: Send + Sync {
    /// Create a new project and deployment from a brief. Non-blocking:
    /// returns as soon as the platform accepts the upload.
    async fn deploy(&self, brief: &SiteBrief) -> Result<Deployment, DeployError>;

    /// Deploy new files into an existing project, keeping its URL.
    async fn redeploy(
        &self,
        project_name: &str,
        files: &[SourceFile],
    ) -> Result<Deployment, DeployError>;

    async fn status(&self, deployment_id: &str) -> Result<DeploymentStatus, DeployError>;

    /// Download the deployed source for editing.
    async fn fetch_source(&self, deployment_id: &str) -> Result<Vec<SourceFile>, DeployError>;
}
