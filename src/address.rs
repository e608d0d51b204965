//! Mailbox addresses for senders, reply-to and resolved recipients.

use crate::error::MailError;
use email_address::EmailAddress;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An email address with an optional display name.
///
/// ```
/// use mailshot::Address;
///
/// let addr: Address = ("Coach Carter", "carter@example.com").into();
/// assert_eq!(addr.formatted(), "Coach Carter <carter@example.com>");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Optional display name (e.g., "Alice Smith")
    pub name: Option<String>,
    /// Email address (e.g., "alice@example.com")
    pub email: String,
}

impl Address {
    /// Create an address without validation.
    ///
    /// Logs a warning when the value is obviously not an address. Use
    /// [`Address::parse`] for strict validation.
    pub fn new(email: impl Into<String>) -> Self {
        let email = email.into();
        if !looks_like_address(&email) {
            tracing::warn!(email = %email, "Creating address with potentially invalid email");
        }
        Self { name: None, email }
    }

    /// Create an address with a display name, without validation.
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(email)
        }
    }

    /// Parse and validate an address (RFC 5321/5322).
    ///
    /// ```
    /// use mailshot::Address;
    ///
    /// assert!(Address::parse("parent@example.com").is_ok());
    /// assert!(Address::parse("not-an-email").is_err());
    /// ```
    pub fn parse(email: &str) -> Result<Self, MailError> {
        if !EmailAddress::is_valid(email) {
            return Err(MailError::InvalidAddress(format!(
                "'{}' is not a valid email address",
                email
            )));
        }
        Ok(Self {
            name: None,
            email: email.to_string(),
        })
    }

    /// Parse and validate an address, attaching a display name.
    ///
    /// An empty name is stored as `None`.
    pub fn parse_with_name(name: &str, email: &str) -> Result<Self, MailError> {
        let mut addr = Self::parse(email)?;
        if !name.is_empty() {
            addr.name = Some(name.to_string());
        }
        Ok(addr)
    }

    /// Case-insensitive key used to detect the same mailbox resolved twice.
    pub fn dedup_key(&self) -> String {
        self.email.trim().to_ascii_lowercase()
    }

    /// Email with the domain converted to ASCII (Punycode for IDN).
    ///
    /// ```
    /// use mailshot::Address;
    ///
    /// let addr = Address::new("fan@例え.jp");
    /// assert_eq!(addr.to_ascii().unwrap(), "fan@xn--r8jz45g.jp");
    /// ```
    pub fn to_ascii(&self) -> Result<String, MailError> {
        let (local, domain) = self.email.split_once('@').ok_or_else(|| {
            MailError::InvalidAddress(format!("'{}' is missing @ symbol", self.email))
        })?;

        let ascii_domain = idna::domain_to_ascii(domain).map_err(|e| {
            MailError::InvalidAddress(format!(
                "Failed to convert domain '{}' to ASCII: {:?}",
                domain, e
            ))
        })?;

        Ok(format!("{}@{}", local, ascii_domain))
    }

    /// Format as "Name <email>" or just "email" if no name.
    pub fn formatted(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => format!("{} <{}>", name, self.email),
            _ => self.email.clone(),
        }
    }

    /// Format for a header, quoting and escaping the display name.
    pub fn formatted_rfc5322(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => {
                let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
                format!("\"{}\" <{}>", escaped, self.email)
            }
            _ => self.email.clone(),
        }
    }
}

fn looks_like_address(email: &str) -> bool {
    !email.is_empty() && email.contains('@')
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.formatted())
    }
}

impl From<&str> for Address {
    fn from(email: &str) -> Self {
        Self::new(email)
    }
}

impl From<String> for Address {
    fn from(email: String) -> Self {
        Self::new(email)
    }
}

impl<N: Into<String>, E: Into<String>> From<(N, E)> for Address {
    fn from((name, email): (N, E)) -> Self {
        Self::with_name(name, email)
    }
}

/// Types that can stand in for an address in builder methods.
pub trait ToAddress {
    fn to_address(&self) -> Address;
}

impl<T: ToAddress + ?Sized> ToAddress for &T {
    fn to_address(&self) -> Address {
        (*self).to_address()
    }
}

impl ToAddress for Address {
    fn to_address(&self) -> Address {
        self.clone()
    }
}

impl ToAddress for str {
    fn to_address(&self) -> Address {
        Address::new(self)
    }
}

impl ToAddress for String {
    fn to_address(&self) -> Address {
        Address::new(self)
    }
}

impl<N: AsRef<str>, E: AsRef<str>> ToAddress for (N, E) {
    fn to_address(&self) -> Address {
        Address::with_name(self.0.as_ref(), self.1.as_ref())
    }
}
