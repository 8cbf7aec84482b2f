//! Reply intent classification.
//!
//! Classifies a prospect's reply into one of five intents so the reply
//! matcher can dispatch the right workflow. Classification fails open:
//! any LLM or parse failure yields `ReplyIntent::Other`, which dispatches
//! nothing but still records the reply.

use std::sync::Arc;

use tracing::warn;

use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::model::TickUsage;

const CLASSIFY_TEMPERATURE: f32 = 0.0;
const CLASSIFY_MAX_TOKENS: u32 = 256;

/// What a prospect's reply is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyIntent {
    /// Requests a change to their generated site.
    WebsiteUpdate,
    /// Asks about flyers, menus, or other marketing collateral.
    MarketingMaterials,
    /// Asks about events or influencer promotion.
    EventInfluencer,
    /// Positive but with no actionable request.
    GeneralPositive,
    /// Anything else, including unclassifiable replies.
    Other,
}

impl ReplyIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebsiteUpdate => "website_update",
            Self::MarketingMaterials => "marketing_materials",
            Self::EventInfluencer => "event_influencer",
            Self::GeneralPositive => "general_positive",
            Self::Other => "other",
        }
    }
}

impl std::str::FromStr for ReplyIntent {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "website_update" => Ok(Self::WebsiteUpdate),
            "marketing_materials" => Ok(Self::MarketingMaterials),
            "event_influencer" => Ok(Self::EventInfluencer),
            "general_positive" => Ok(Self::GeneralPositive),
            "other" => Ok(Self::Other),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ReplyIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// LLM-backed intent classifier.
pub struct IntentClassifier {
    llm: Arc<dyn LlmProvider>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Classify a reply body. Never errors: failures fall back to `Other`.
    pub async fn classify(
        &self,
        vendor_name: &str,
        reply_body: &str,
        usage: &mut TickUsage,
    ) -> ReplyIntent {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_classify_system_prompt()),
            ChatMessage::user(build_classify_user_prompt(vendor_name, reply_body)),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response = match self.llm.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Intent classification failed, falling back to other");
                return ReplyIntent::Other;
            }
        };

        usage.record(
            response.input_tokens,
            response.output_tokens,
            self.llm.cost_per_token(),
        );

        match parse_intent_response(&response.content) {
            Ok(intent) => intent,
            Err(e) => {
                warn!(
                    raw_response = %response.content,
                    error = %e,
                    "Failed to parse intent response, falling back to other"
                );
                ReplyIntent::Other
            }
        }
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_classify_system_prompt() -> String {
    "You classify replies from small food vendors to our outreach emails about \
     a free website we built for them.\n\n\
     Intents:\n\
     - \"website_update\": they want something on the site changed (menu, hours, photos, text).\n\
     - \"marketing_materials\": they ask about flyers, menus, cards, or other print/digital collateral.\n\
     - \"event_influencer\": they ask about events, markets, or influencer promotion.\n\
     - \"general_positive\": interested or thankful, but no concrete request.\n\
     - \"other\": anything else, including refusals and unclear replies.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"intent\": \"...\", \"summary\": \"...\"}\n\n\
     Rules:\n\
     - One-sentence summary of what they asked for\n\
     - When in doubt, choose \"other\""
        .to_string()
}

fn build_classify_user_prompt(vendor_name: &str, reply_body: &str) -> String {
    let body_preview: String = reply_body.chars().take(1500).collect();
    format!("Vendor: {vendor_name}\n\nReply:\n{body_preview}")
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct IntentResponse {
    intent: String,
    #[serde(default)]
    #[allow(dead_code)]
    summary: String,
}

fn parse_intent_response(raw: &str) -> Result<ReplyIntent, String> {
    let json_str = extract_json_object(raw);
    let response: IntentResponse =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;

    response
        .intent
        .parse()
        .map_err(|()| format!("unknown intent: '{}'", response.intent))
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
pub(crate) fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
