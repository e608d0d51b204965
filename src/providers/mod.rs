//! Transport implementations.
//!
//! Each provider implements the [`Transport`](crate::Transport) trait.
//!
//! | Provider | Feature Flag | Profile | Description |
//! |----------|-------------|---------|-------------|
//! | [`SmtpTransport`] | `smtp` | conservative | SMTP via lettre |
//! | [`LocalTransport`] | `local` | permissive | In-memory capture for dev/testing |
//! | [`LoggerTransport`] | (none) | permissive | Logs messages without sending |

#[cfg(feature = "smtp")]
mod smtp;
#[cfg(feature = "smtp")]
pub use smtp::{SmtpBuilder, SmtpTransport, TlsMode};

#[cfg(feature = "local")]
mod local;
#[cfg(feature = "local")]
pub use local::{CapturedMessage, LocalTransport};

mod logger;
pub use logger::LoggerTransport;
