//! Outreach template catalog — static library keyed by sequence step.

/// Variables substituted into a template at render time.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    /// Vendor name, e.g. "Tony's Pizzeria".
    pub name: String,
    pub city: String,
    /// Live site URL, known only after a deployment publishes.
    pub site_url: Option<String>,
    /// Optional LLM-personalized first line. Falls back to template text.
    pub opening_line: Option<String>,
}

/// A single outreach email template.
#[derive(Debug, Clone)]
pub struct EmailTemplate {
    pub id: &'static str,
    pub sequence_step: u32,
    pub subject: &'static str,
    pub html: &'static str,
}

impl EmailTemplate {
    /// Render subject and body with `{{var}}` substitution.
    pub fn render(&self, vars: &TemplateVars) -> (String, String) {
        (substitute(self.subject, vars), substitute(self.html, vars))
    }
}

fn substitute(text: &str, vars: &TemplateVars) -> String {
    text.replace("{{name}}", &vars.name)
        .replace("{{city}}", &vars.city)
        .replace("{{site_url}}", vars.site_url.as_deref().unwrap_or(""))
        .replace(
            "{{opening_line}}",
            vars.opening_line.as_deref().unwrap_or(""),
        )
}

/// The full cadence, steps 1..=4.
static TEMPLATES: &[EmailTemplate] = &[
    EmailTemplate {
        id: "intro",
        sequence_step: 1,
        subject: "A quick idea for {{name}}",
        html: "<p>Hi there,</p>\
               <p>{{opening_line}}</p>\
               <p>I help food vendors in {{city}} get found online. I'd love to \
               put together a free website for {{name}} — no strings attached, \
               you only keep it if you like it.</p>\
               <p>Interested? Just reply to this email.</p>",
    },
    EmailTemplate {
        id: "value_followup",
        sequence_step: 2,
        subject: "Re: A quick idea for {{name}}",
        html: "<p>Hi again,</p>\
               <p>Following up on my note about a website for {{name}}. Most \
               vendors we work with in {{city}} see more weekday foot traffic \
               within a month of going live.</p>\
               <p>Happy to show you a mockup first — just say the word.</p>",
    },
    EmailTemplate {
        id: "site_preview",
        sequence_step: 3,
        subject: "We built something for {{name}}",
        html: "<p>Hi,</p>\
               <p>We went ahead and drafted a site for {{name}}. You can see \
               it live here: <a href=\"{{site_url}}\">{{site_url}}</a></p>\
               <p>If you'd like any changes — menu, photos, hours — reply and \
               we'll sort it out.</p>",
    },
    EmailTemplate {
        id: "final_nudge",
        sequence_step: 4,
        subject: "Last note from us, {{name}}",
        html: "<p>Hi,</p>\
               <p>Closing the loop — if a website for {{name}} isn't useful \
               right now, no worries at all. We'll leave it here in case that \
               changes.</p>\
               <p>All the best from the {{city}} team.</p>",
    },
];

/// Look up the template for a sequence step. `None` past the end of the
/// cadence — the sequencer stops following up at that point.
pub fn by_step(step: u32) -> Option<&'static EmailTemplate> {
    TEMPLATES.iter().find(|t| t.sequence_step == step)
}

/// Highest sequence step in the catalog.
pub fn max_step() -> u32 {
    TEMPLATES.iter().map(|t| t.sequence_step).max().unwrap_or(0)
}
