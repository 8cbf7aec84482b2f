//! HTTP surface — manual triggers, site status, and the inbound email
//! webhook.

pub mod routes;

pub use routes::{ApiState, api_routes};
