//! Email I/O — outbound SMTP sending and inbound reply parsing.

pub mod inbound;
pub mod sender;

pub use inbound::{InboundEmail, normalize_subject, parse_rfc822, strip_quoted_text};
pub use sender::{DisabledSender, EmailSender, SendReceipt, SmtpEmailSender};
