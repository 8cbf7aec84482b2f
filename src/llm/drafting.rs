//! LLM drafting helpers — vendor discovery and outreach personalization.

use std::sync::Arc;

use tracing::warn;

use crate::error::LlmError;
use crate::llm::classifier::extract_json_object;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::model::{Prospect, TickUsage};

const DISCOVERY_TEMPERATURE: f32 = 0.7;
const DISCOVERY_MAX_TOKENS: u32 = 1024;
const OPENING_LINE_MAX_TOKENS: u32 = 128;

/// A vendor lead proposed by the discovery prompt.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct VendorLead {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub cuisine: Option<String>,
}

/// Ask the LLM for up to `limit` plausible local food vendors in `city`.
///
/// The orchestrator dedupes the result against the store before inserting,
/// so repeats across ticks are harmless.
pub async fn infer_vendors(
    llm: &Arc<dyn LlmProvider>,
    city: &str,
    limit: usize,
    usage: &mut TickUsage,
) -> Result<Vec<VendorLead>, LlmError> {
    let request = CompletionRequest::new(vec![
        ChatMessage::system(
            "You suggest small local food vendors (food trucks, taquerias, \
             bakeries, family restaurants) that likely have no website.\n\n\
             Respond with ONLY a JSON object:\n\
             {\"vendors\": [{\"name\": \"...\", \"email\": \"...\", \"address\": \"...\", \"cuisine\": \"...\"}]}\n\n\
             Rules:\n\
             - Omit email when you would have to guess it\n\
             - Real-sounding, specific names, not chains"
                .to_string(),
        ),
        ChatMessage::user(format!("Suggest up to {limit} vendors in {city}.")),
    ])
    .with_temperature(DISCOVERY_TEMPERATURE)
    .with_max_tokens(DISCOVERY_MAX_TOKENS);

    let response = llm.complete(request).await?;
    usage.record(
        response.input_tokens,
        response.output_tokens,
        llm.cost_per_token(),
    );

    #[derive(serde::Deserialize)]
    struct DiscoveryResponse {
        #[serde(default)]
        vendors: Vec<VendorLead>,
    }

    let json_str = extract_json_object(&response.content);
    let parsed: DiscoveryResponse = serde_json::from_str(&json_str)?;

    let mut vendors = parsed.vendors;
    vendors.retain(|v| !v.name.trim().is_empty());
    vendors.truncate(limit);
    Ok(vendors)
}

/// Draft a one-line personalized opener for an outreach email.
///
/// Fail-soft: any error returns `None` and the template's stock opening
/// is used instead.
pub async fn draft_opening_line(
    llm: &Arc<dyn LlmProvider>,
    prospect: &Prospect,
    usage: &mut TickUsage,
) -> Option<String> {
    let city = prospect.city.as_deref().unwrap_or("town");
    let request = CompletionRequest::new(vec![
        ChatMessage::system(
            "Write one warm, specific opening sentence for a cold email to a \
             local food vendor. No greeting, no pitch, under 25 words. \
             Respond with the sentence only."
                .to_string(),
        ),
        ChatMessage::user(format!("Vendor: {} in {city}", prospect.name)),
    ])
    .with_temperature(0.8)
    .with_max_tokens(OPENING_LINE_MAX_TOKENS);

    match llm.complete(request).await {
        Ok(response) => {
            usage.record(
                response.input_tokens,
                response.output_tokens,
                llm.cost_per_token(),
            );
            let line = response.content.trim().trim_matches('"').to_string();
            (!line.is_empty()).then_some(line)
        }
        Err(e) => {
            warn!(prospect = %prospect.name, error = %e, "Opening line draft failed, using template");
            None
        }
    }
}
