//! Attachments included on every send of a bulk email.
//!
//! Attachment payloads are reference counted: a bulk email to hundreds of
//! recipients shares one copy of each blob across all outgoing messages.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::error::MailError;

/// Type of attachment disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AttachmentType {
    /// Regular attachment (shown as downloadable file)
    #[default]
    Attachment,
    /// Inline attachment (embedded in HTML via cid:)
    Inline,
}

/// An email attachment.
///
/// ```
/// use mailshot::Attachment;
///
/// let schedule = Attachment::from_bytes("fixtures.pdf", b"%PDF-1.4".to_vec());
/// assert_eq!(schedule.content_type, "application/pdf");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// Filename for the attachment
    pub filename: String,
    /// MIME content type (e.g., "application/pdf", "image/png")
    pub content_type: String,
    /// Raw attachment data
    pub data: Arc<[u8]>,
    /// Whether this is an inline or regular attachment
    pub disposition: AttachmentType,
    /// Content-ID for inline attachments (used as cid: reference)
    pub content_id: Option<String>,
}

impl Attachment {
    /// Create an attachment from raw bytes, guessing the content type from the filename.
    pub fn from_bytes(filename: impl Into<String>, data: Vec<u8>) -> Self {
        let filename = filename.into();
        let content_type = mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .to_string();

        Self {
            filename,
            content_type,
            data: data.into(),
            disposition: AttachmentType::Attachment,
            content_id: None,
        }
    }

    /// Read an attachment from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, MailError> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment")
            .to_string();

        let data = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MailError::AttachmentFileNotFound(path.display().to_string())
            } else {
                MailError::AttachmentReadError(format!("{}: {}", path.display(), e))
            }
        })?;

        Ok(Self::from_bytes(filename, data))
    }

    /// Set the content type explicitly.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Mark as inline, defaulting the Content-ID to the filename.
    pub fn inline(mut self) -> Self {
        self.disposition = AttachmentType::Inline;
        if self.content_id.is_none() {
            self.content_id = Some(self.filename.clone());
        }
        self
    }

    /// Set the Content-ID referenced from HTML as `cid:<id>`.
    pub fn content_id(mut self, cid: impl Into<String>) -> Self {
        self.content_id = Some(cid.into());
        self
    }

    /// Attachment bytes, or an error when the attachment is empty.
    pub fn bytes(&self) -> Result<&[u8], MailError> {
        if self.data.is_empty() {
            return Err(MailError::AttachmentMissingContent(self.filename.clone()));
        }
        Ok(&self.data)
    }

    /// Attachment data as a base64 string.
    pub fn base64_data(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Check if this is an inline attachment.
    pub fn is_inline(&self) -> bool {
        self.disposition == AttachmentType::Inline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes() {
        let attachment = Attachment::from_bytes("roster.txt", b"Hello".to_vec());
        assert_eq!(attachment.filename, "roster.txt");
        assert_eq!(attachment.content_type, "text/plain");
        assert_eq!(&*attachment.data, b"Hello");
        assert_eq!(attachment.disposition, AttachmentType::Attachment);
    }

    #[test]
    fn test_clone_shares_payload() {
        let attachment = Attachment::from_bytes("photo.png", vec![0u8; 1024]);
        let copy = attachment.clone();
        assert!(Arc::ptr_eq(&attachment.data, &copy.data));
    }

    #[test]
    fn test_inline_defaults_content_id() {
        let attachment = Attachment::from_bytes("crest.png", vec![1, 2, 3]).inline();
        assert!(attachment.is_inline());
        assert_eq!(attachment.content_id.as_deref(), Some("crest.png"));
    }

    #[test]
    fn test_empty_attachment_has_no_bytes() {
        let attachment = Attachment::from_bytes("empty.bin", vec![]);
        assert!(matches!(
            attachment.bytes(),
            Err(MailError::AttachmentMissingContent(_))
        ));
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = Attachment::from_path("/definitely/not/here.pdf").unwrap_err();
        assert!(matches!(err, MailError::AttachmentFileNotFound(_)));
    }

    #[test]
    fn test_base64() {
        let attachment = Attachment::from_bytes("test.txt", b"Hello".to_vec());
        assert_eq!(attachment.base64_data(), "SGVsbG8=");
        assert_eq!(attachment.size(), 5);
    }
}
