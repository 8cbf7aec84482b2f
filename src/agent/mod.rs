//! Agent orchestration — the periodic tick and operational alerts.

pub mod alerts;
pub mod tick;

pub use tick::{TickReport, TickRunner};
