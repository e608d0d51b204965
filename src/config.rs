//! Engine configuration and environment-based transport selection.
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `EMAIL_PROVIDER` | `smtp`, `local`, `logger`, `logger_full` |
//! | `EMAIL_FROM` | Sender email |
//! | `EMAIL_FROM_NAME` | Sender display name |
//! | `EMAIL_REPLY_TO` | Default reply-to address |
//! | `SMTP_HOST` | SMTP server host |
//! | `SMTP_PORT` | SMTP server port (default: 587) |
//! | `SMTP_USERNAME` | SMTP username |
//! | `SMTP_PASSWORD` | SMTP password |
//! | `MAILSHOT_BATCH_SIZE` | Recipients per batch (default: 100) |
//! | `MAILSHOT_SWEEP_INTERVAL_SECS` | Scheduled-email sweep interval (default: 60) |
//! | `MAILSHOT_TICK_BUDGET_SECS` | Max seconds spent sending per tick (default: 30) |

use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::address::Address;
use crate::error::MailError;
use crate::queue::DEFAULT_BATCH_SIZE;
use crate::retry::RetryPolicy;
use crate::providers;
use crate::transport::Transport;

/// Tunables of a [`BulkMailer`](crate::BulkMailer).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Sender identity for every outgoing message.
    pub from: Option<Address>,
    /// Reply-to used when the compose request has none.
    pub reply_to: Option<Address>,
    /// Recipients per batch job.
    pub batch_size: usize,
    /// How often due scheduled emails are promoted.
    pub sweep_interval: Duration,
    /// Max wall time spent sending within one processor tick.
    pub tick_budget: Duration,
    /// Retry/backoff for batch-level failures.
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            from: None,
            reply_to: None,
            batch_size: DEFAULT_BATCH_SIZE,
            sweep_interval: Duration::from_secs(60),
            tick_budget: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read settings from the environment, keeping defaults for anything unset.
    pub fn from_env() -> Result<Self, MailError> {
        let mut config = Self {
            from: default_from(),
            reply_to: env::var("EMAIL_REPLY_TO").ok().map(Address::new),
            ..Self::default()
        };

        if let Some(size) = parse_var::<usize>("MAILSHOT_BATCH_SIZE")? {
            config.batch_size = size;
        }
        if let Some(secs) = parse_var::<u64>("MAILSHOT_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>("MAILSHOT_TICK_BUDGET_SECS")? {
            config.tick_budget = Duration::from_secs(secs);
        }
        Ok(config)
    }

    /// Set the sender address.
    pub fn from(mut self, addr: impl Into<Address>) -> Self {
        self.from = Some(addr.into());
        self
    }

    /// Set the default reply-to address.
    pub fn reply_to(mut self, addr: impl Into<Address>) -> Self {
        self.reply_to = Some(addr.into());
        self
    }

    /// Set the batch size (minimum 1).
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn tick_budget(mut self, budget: Duration) -> Self {
        self.tick_budget = budget;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }
}

/// Sender address from `EMAIL_FROM` / `EMAIL_FROM_NAME`.
pub fn default_from() -> Option<Address> {
    let email = env::var("EMAIL_FROM").ok()?;
    match env::var("EMAIL_FROM_NAME").ok() {
        Some(name) => Some(Address::with_name(name, email)),
        None => Some(Address::new(email)),
    }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>, MailError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| MailError::Configuration(format!("{} has invalid value '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}

/// Build the transport named by `EMAIL_PROVIDER`.
///
/// Without `EMAIL_PROVIDER`, picks `smtp` when `SMTP_HOST` is set and the
/// feature is enabled, then `local` when that feature is enabled.
pub fn transport_from_env() -> Result<Arc<dyn Transport>, MailError> {
    let provider = match env::var("EMAIL_PROVIDER") {
        Ok(p) => p.to_lowercase(),
        Err(_) => match detect_provider() {
            Some(p) => {
                tracing::debug!(provider = p, "Auto-detected email provider");
                p.to_string()
            }
            None => {
                return Err(MailError::Configuration(
                    "EMAIL_PROVIDER not set and could not auto-detect".into(),
                ))
            }
        },
    };

    match provider.as_str() {
        #[cfg(feature = "smtp")]
        "smtp" => {
            let host = env::var("SMTP_HOST")
                .map_err(|_| MailError::Configuration("SMTP_HOST not set".into()))?;
            let port = parse_var::<u16>("SMTP_PORT")?.unwrap_or(587);
            let username = env::var("SMTP_USERNAME").unwrap_or_default();
            let password = env::var("SMTP_PASSWORD").unwrap_or_default();

            let mut builder = providers::SmtpTransport::new(&host, port);
            if !username.is_empty() {
                builder = builder.credentials(&username, &password);
            }
            Ok(Arc::new(builder.build()))
        }
        #[cfg(not(feature = "smtp"))]
        "smtp" => Err(MailError::Configuration(
            "EMAIL_PROVIDER=smtp but 'smtp' feature is not enabled".into(),
        )),

        #[cfg(feature = "local")]
        "local" => Ok(Arc::new(providers::LocalTransport::new())),
        #[cfg(not(feature = "local"))]
        "local" => Err(MailError::Configuration(
            "EMAIL_PROVIDER=local but 'local' feature is not enabled".into(),
        )),

        "logger" => Ok(Arc::new(providers::LoggerTransport::new())),
        "logger_full" => Ok(Arc::new(providers::LoggerTransport::full())),

        other => Err(MailError::Configuration(format!(
            "Unknown EMAIL_PROVIDER: {}. Valid providers are: smtp, local, logger, logger_full",
            other
        ))),
    }
}

fn detect_provider() -> Option<&'static str> {
    #[cfg(feature = "smtp")]
    if env::var("SMTP_HOST").is_ok() {
        return Some("smtp");
    }
    if cfg!(feature = "local") {
        Some("local")
    } else {
        None
    }
}
