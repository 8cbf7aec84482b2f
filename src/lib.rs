//! Vendora — outreach & site-generation engine for local food vendors.

pub mod agent;
pub mod api;
pub mod config;
pub mod deploy;
pub mod email;
pub mod error;
pub mod llm;
pub mod model;
pub mod outreach;
pub mod reply;
pub mod sites;
pub mod store;
pub mod templates;
