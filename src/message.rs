//! The single-recipient message handed to a [`Transport`](crate::Transport).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::address::{Address, ToAddress};
use crate::attachment::Attachment;

/// One outgoing message addressed to exactly one recipient.
///
/// The engine builds one of these per recipient from the bulk email's
/// subject/body snapshot:
///
/// ```
/// use mailshot::OutgoingMessage;
///
/// let msg = OutgoingMessage::new("parent@example.com")
///     .from(("Riverside FC", "noreply@riverside.example"))
///     .subject("Training cancelled")
///     .html_body("<p>No training <b>tonight</b>.</p>");
///
/// assert_eq!(msg.to.email, "parent@example.com");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Sender address
    pub from: Option<Address>,
    /// The single recipient
    pub to: Address,
    /// Optional reply-to address
    pub reply_to: Option<Address>,
    /// Subject line
    pub subject: String,
    /// Plain text body
    pub text_body: Option<String>,
    /// HTML body
    pub html_body: Option<String>,
    /// Attachments (payloads shared between messages)
    pub attachments: Vec<Attachment>,
    /// Custom headers
    pub headers: HashMap<String, String>,
}

impl OutgoingMessage {
    /// Create a message to one recipient.
    pub fn new(to: impl ToAddress) -> Self {
        Self {
            from: None,
            to: to.to_address(),
            reply_to: None,
            subject: String::new(),
            text_body: None,
            html_body: None,
            attachments: Vec::new(),
            headers: HashMap::new(),
        }
    }

    /// Set the sender address.
    pub fn from(mut self, addr: impl ToAddress) -> Self {
        self.from = Some(addr.to_address());
        self
    }

    /// Set the reply-to address.
    pub fn reply_to(mut self, addr: impl ToAddress) -> Self {
        self.reply_to = Some(addr.to_address());
        self
    }

    /// Set the subject line.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Set the plain text body.
    pub fn text_body(mut self, body: impl Into<String>) -> Self {
        self.text_body = Some(body.into());
        self
    }

    /// Set the HTML body.
    pub fn html_body(mut self, body: impl Into<String>) -> Self {
        self.html_body = Some(body.into());
        self
    }

    /// Replace the attachment list.
    pub fn attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Add a custom header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Derive a plain-text body from HTML.
///
/// Block-level closing tags and `<br>` become line breaks, every other tag is
/// dropped, common entities are decoded and runs of blank lines collapse to one.
///
/// ```
/// use mailshot::html_to_text;
///
/// assert_eq!(
///     html_to_text("<h1>Hi</h1><p>Game at <b>10&nbsp;am</b></p>"),
///     "Hi\n\nGame at 10 am"
/// );
/// ```
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut chars = html.chars();

    while let Some(c) = chars.next() {
        if c != '<' {
            out.push(c);
            continue;
        }
        let mut tag = String::new();
        for t in chars.by_ref() {
            if t == '>' {
                break;
            }
            tag.push(t);
        }
        let name: String = tag
            .trim_start_matches('/')
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        let closing = tag.starts_with('/');
        match name.as_str() {
            "br" => out.push('\n'),
            "p" | "div" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "tr" | "table" | "ul"
            | "ol"
                if closing =>
            {
                out.push_str("\n\n")
            }
            "li" if closing => out.push('\n'),
            "li" => out.push_str("- "),
            _ => {}
        }
    }

    let decoded = decode_entities(&out);

    let mut text = String::with_capacity(decoded.len());
    let mut blank_run = 0;
    for line in decoded.lines().map(str::trim_end) {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 || text.is_empty() {
                continue;
            }
        } else {
            blank_run = 0;
        }
        text.push_str(line.trim_start());
        text.push('\n');
    }
    text.trim_end().to_string()
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
