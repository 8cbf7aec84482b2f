//! Domain model: prospects, email logs, generated sites, the activity
//! ledger, and per-tick accounting.

pub mod activity;
pub mod email_log;
pub mod prospect;
pub mod site;
pub mod tick;

pub use activity::{ActivityEvent, TriggeredBy};
pub use email_log::{EmailLog, EmailStatus};
pub use prospect::{PipelineStage, Prospect};
pub use site::{GeneratedSite, SiteStatus};
pub use tick::{AgentTick, TickUsage};
