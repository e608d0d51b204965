//! SMTP transport using lettre.
//!
//! ```rust,ignore
//! use mailshot::providers::SmtpTransport;
//!
//! let transport = SmtpTransport::new("smtp.example.com", 587)
//!     .credentials("username", "password")
//!     .build();
//! ```
//!
//! Reply codes from the server (4xx/5xx) are per-recipient failures. Errors
//! without a reply code (DNS, TCP, TLS, timeouts) are reported as
//! [`MailError::Unreachable`] so the engine retries the batch.

use async_trait::async_trait;
use lettre::{
    message::{
        header::ContentType, Attachment as LettreAttachment, Mailbox, MultiPart, SinglePart,
    },
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::address::Address;
use crate::attachment::AttachmentType;
use crate::error::MailError;
use crate::message::OutgoingMessage;
use crate::transport::{SendReceipt, Transport, TransportExt};

/// SMTP transport.
pub struct SmtpTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    /// Create a builder with STARTTLS (port 587 style).
    pub fn new(host: &str, port: u16) -> SmtpBuilder {
        SmtpBuilder {
            host: host.to_string(),
            port,
            credentials: None,
            tls: TlsMode::StartTls,
        }
    }

    /// Create a transport for a local relay (no TLS, no auth).
    pub fn localhost() -> Self {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous("localhost")
            .port(25)
            .build();

        Self { transport }
    }

    fn build_message(&self, message: &OutgoingMessage) -> Result<Message, MailError> {
        self.validate(message)?;
        let from = message
            .from
            .as_ref()
            .ok_or(MailError::MissingField("from"))?;

        let mut builder = Message::builder()
            .from(to_mailbox(from)?)
            .to(to_mailbox(&message.to)?)
            .subject(&message.subject);

        if let Some(ref reply_to) = message.reply_to {
            builder = builder.reply_to(to_mailbox(reply_to)?);
        }

        let text = message.text_body.clone();
        let html = message.html_body.clone();

        let body = match (html, text) {
            (Some(html), Some(text)) => MultiPart::alternative_plain_html(text, html),
            (Some(html), None) => MultiPart::mixed().singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_HTML)
                    .body(html),
            ),
            (None, text) => MultiPart::mixed().singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_PLAIN)
                    .body(text.unwrap_or_default()),
            ),
        };

        if message.attachments.is_empty() {
            return Ok(builder.multipart(body)?);
        }

        let mut multipart = MultiPart::mixed().multipart(body);
        for attachment in &message.attachments {
            let content_type: ContentType = attachment
                .content_type
                .parse()
                .unwrap_or(ContentType::TEXT_PLAIN);
            let data = attachment.bytes()?.to_vec();

            let part = match attachment.disposition {
                AttachmentType::Inline => {
                    let cid = attachment
                        .content_id
                        .clone()
                        .unwrap_or_else(|| attachment.filename.clone());
                    LettreAttachment::new_inline(cid).body(data, content_type)
                }
                AttachmentType::Attachment => {
                    LettreAttachment::new(attachment.filename.clone()).body(data, content_type)
                }
            };
            multipart = multipart.singlepart(part);
        }

        Ok(builder.multipart(multipart)?)
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<SendReceipt, MailError> {
        let built = self.build_message(message)?;
        let response = self.transport.send(built).await?;

        let message_id = response
            .message()
            .next()
            .and_then(|m| m.lines().next())
            .map(|s| s.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(SendReceipt::new(message_id))
    }

    fn provider_name(&self) -> &'static str {
        "smtp"
    }
}

/// TLS mode for the SMTP connection.
#[derive(Debug, Clone, Copy)]
pub enum TlsMode {
    /// No TLS (local relays only)
    None,
    /// STARTTLS - upgrade after connecting (port 587)
    StartTls,
    /// Implicit TLS (port 465)
    Tls,
}

/// Builder for [`SmtpTransport`].
pub struct SmtpBuilder {
    host: String,
    port: u16,
    credentials: Option<Credentials>,
    tls: TlsMode,
}

impl SmtpBuilder {
    /// Set SMTP credentials.
    pub fn credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some(Credentials::new(username.to_string(), password.to_string()));
        self
    }

    /// Set TLS mode.
    pub fn tls(mut self, mode: TlsMode) -> Self {
        self.tls = mode;
        self
    }

    /// Build the transport.
    pub fn build(self) -> SmtpTransport {
        let builder = match self.tls {
            TlsMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.host),
            TlsMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)
                .unwrap_or_else(|_| {
                    AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.host)
                }),
            TlsMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&self.host)
                .unwrap_or_else(|_| {
                    AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.host)
                }),
        };

        let mut builder = builder.port(self.port);
        if let Some(creds) = self.credentials {
            builder = builder.credentials(creds);
        }

        SmtpTransport {
            transport: builder.build(),
        }
    }
}

fn to_mailbox(addr: &Address) -> Result<Mailbox, MailError> {
    let email = addr.to_ascii()?.parse()?;
    Ok(Mailbox::new(addr.name.clone(), email))
}
