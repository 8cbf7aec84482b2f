//! Site generation and deployment convergence.
//!
//! `SiteGenerator` owns the whole site lifecycle: create a deployment
//! from a prospect brief (generator.rs), apply update requests
//! (generator.rs), and converge persisted rows with the platform's
//! observed state (convergence.rs). All operations are idempotent; the
//! sweep can run arbitrarily often.

pub mod convergence;
pub mod generator;

use std::sync::Arc;

use crate::deploy::DeployPlatform;
use crate::outreach::OutreachSequencer;
use crate::store::Database;

pub use convergence::SweepReport;

pub struct SiteGenerator {
    db: Arc<dyn Database>,
    platform: Arc<dyn DeployPlatform>,
    /// Optional: lets the convergence sweep send the post-publish
    /// outreach email.
    sequencer: Option<Arc<OutreachSequencer>>,
}

impl SiteGenerator {
    pub fn new(
        db: Arc<dyn Database>,
        platform: Arc<dyn DeployPlatform>,
        sequencer: Option<Arc<OutreachSequencer>>,
    ) -> Self {
        Self {
            db,
            platform,
            sequencer,
        }
    }

    pub(crate) fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    pub(crate) fn platform(&self) -> &Arc<dyn DeployPlatform> {
        &self.platform
    }

    pub(crate) fn sequencer(&self) -> Option<&Arc<OutreachSequencer>> {
        self.sequencer.as_ref()
    }
}
