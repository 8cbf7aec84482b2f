//! Inbound reply parsing — RFC 822 extraction, quote stripping, and
//! subject normalization for thread correlation.

use std::sync::LazyLock;

use mail_parser::MessageParser;
use regex::Regex;

use crate::error::EmailError;

/// A parsed inbound email, ready for reply matching.
#[derive(Debug, Clone)]
pub struct InboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    /// Body with quoted history stripped.
    pub body: String,
    pub message_id: Option<String>,
    /// `In-Reply-To` header, the strongest thread signal when present.
    pub in_reply_to: Option<String>,
}

/// Parse a raw RFC 822 message into an `InboundEmail`.
pub fn parse_rfc822(raw: &[u8]) -> Result<InboundEmail, EmailError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| EmailError::ParseFailed("unparseable RFC 822 message".into()))?;

    let from = first_address(parsed.from())
        .ok_or_else(|| EmailError::ParseFailed("missing From address".into()))?;
    let to = first_address(parsed.to()).unwrap_or_default();
    let subject = parsed.subject().unwrap_or("").to_string();

    let body = parsed
        .body_text(0)
        .map(|t| t.to_string())
        .or_else(|| parsed.body_html(0).map(|h| strip_html(h.as_ref())))
        .unwrap_or_default();

    let header = parsed.in_reply_to();
    let in_reply_to = header
        .as_text()
        .map(str::to_string)
        .or_else(|| {
            header
                .as_text_list()
                .and_then(|ids| ids.first().map(|s| s.to_string()))
        })
        .map(|s| normalize_message_id(&s))
        .filter(|s| !s.is_empty());

    Ok(InboundEmail {
        from,
        to,
        subject,
        body: strip_quoted_text(&body),
        message_id: parsed.message_id().map(normalize_message_id),
        in_reply_to,
    })
}

fn first_address(addr: Option<&mail_parser::Address<'_>>) -> Option<String> {
    addr.and_then(|a| a.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
}

/// Message-ids are compared without angle brackets.
fn normalize_message_id(id: &str) -> String {
    id.trim().trim_start_matches('<').trim_end_matches('>').to_string()
}

static REPLY_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\s*(re|fwd?)\s*:\s*)+").unwrap());

static QUOTE_INTRO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^on .{0,200} wrote:\s*$").unwrap());

/// Strip `Re:`/`Fwd:` prefixes and fold whitespace so reply subjects
/// compare equal to the subject originally sent.
pub fn normalize_subject(subject: &str) -> String {
    let stripped = REPLY_PREFIX.replace(subject, "");
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Drop quoted reply history: `>` lines, "On ... wrote:" intros, and
/// everything after an original-message separator.
pub fn strip_quoted_text(body: &str) -> String {
    let mut kept = Vec::new();
    for line in body.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('>') {
            continue;
        }
        if QUOTE_INTRO.is_match(trimmed) || trimmed.starts_with("-----Original Message-----") {
            break;
        }
        kept.push(line);
    }
    kept.join("\n").trim().to_string()
}

/// Basic HTML tag stripping for replies that arrive HTML-only.
fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_subject_strips_stacked_prefixes() {
        assert_eq!(
            normalize_subject("Re: RE: Fwd: A quick idea for Tony's"),
            "a quick idea for tony's"
        );
        assert_eq!(normalize_subject("A quick idea"), "a quick idea");
        assert_eq!(normalize_subject("  Re:   spaced   out  "), "spaced out");
    }

    #[test]
    fn normalize_subject_keeps_inner_re() {
        // "re" inside a word is not a prefix.
        assert_eq!(normalize_subject("Rebuild plans"), "rebuild plans");
    }

    #[test]
    fn strip_quoted_drops_angle_quotes() {
        let body = "Yes, we'd love a website!\n\n> I help food vendors\n> get found online.";
        assert_eq!(strip_quoted_text(body), "Yes, we'd love a website!");
    }

    #[test]
    fn strip_quoted_stops_at_wrote_intro() {
        let body = "Sounds good.\n\nOn Mon, Aug 4, 2025 at 9:00 AM Sam wrote:\nold text here";
        assert_eq!(strip_quoted_text(body), "Sounds good.");
    }

    #[test]
    fn strip_quoted_stops_at_original_message_separator() {
        let body = "Please change the hours.\n-----Original Message-----\nFrom: us";
        assert_eq!(strip_quoted_text(body), "Please change the hours.");
    }

    #[test]
    fn parse_rfc822_extracts_headers_and_body() {
        let raw = b"From: Tony <tony@pizzeria.test>\r\n\
            To: hello@vendora.test\r\n\
            Subject: Re: A quick idea for Tony's Pizzeria\r\n\
            Message-ID: <reply-1@pizzeria.test>\r\n\
            In-Reply-To: <abc123@vendora.test>\r\n\
            Content-Type: text/plain\r\n\r\n\
            Yes please!\r\n\r\n> original text\r\n";

        let email = parse_rfc822(raw).unwrap();
        assert_eq!(email.from, "tony@pizzeria.test");
        assert_eq!(email.to, "hello@vendora.test");
        assert_eq!(email.in_reply_to.as_deref(), Some("abc123@vendora.test"));
        assert_eq!(email.message_id.as_deref(), Some("reply-1@pizzeria.test"));
        assert_eq!(email.body, "Yes please!");
    }

    #[test]
    fn parse_rfc822_rejects_garbage() {
        assert!(parse_rfc822(b"").is_err());
    }
}
