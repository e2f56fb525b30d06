//! Transactional email
//!
//! [`SmtpMailer`] relays through an SMTP server with STARTTLS. When no relay
//! is configured [`LogMailer`] records the message in the logs instead.
//! Handlers send through [`send_logged`], so a mail failure never fails the
//! request that triggered it.

pub mod templates;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SmtpArgs;
use crate::metrics::Metrics;
use crate::types::{AppError, Result};

/// A rendered email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, email: &Email) -> Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(args: &SmtpArgs, host: &str) -> Result<Self> {
        let from: Mailbox = args.mail_from.parse()?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
            .port(args.smtp_port);
        if let (Some(user), Some(password)) = (&args.smtp_user, &args.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        info!(host, port = args.smtp_port, "SMTP mailer configured");
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, email: &Email) -> Result<()> {
        let to: Mailbox = email.to.parse()?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(email.html.clone())?;

        self.transport.send(message).await?;
        debug!(to = %email.to, subject = %email.subject, "Email sent");
        Ok(())
    }
}

/// Mailer used when SMTP is not configured
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, email: &Email) -> Result<()> {
        if email.to.parse::<Mailbox>().is_err() {
            return Err(AppError::Mail(format!("Invalid recipient: {}", email.to)));
        }
        info!(to = %email.to, subject = %email.subject, "Email not sent (SMTP not configured)");
        Ok(())
    }
}

/// Pick the mailer for this configuration
pub fn from_args(args: &SmtpArgs) -> Result<Arc<dyn Mailer>> {
    match args.smtp_host.as_deref() {
        Some(host) => Ok(Arc::new(SmtpMailer::new(args, host)?)),
        None => Ok(Arc::new(LogMailer)),
    }
}

/// Send, counting and logging the outcome. Returns whether it was sent.
pub async fn send_logged(mailer: &dyn Mailer, metrics: &Metrics, email: &Email) -> bool {
    match mailer.send(email).await {
        Ok(()) => {
            Metrics::incr(&metrics.emails_sent);
            true
        }
        Err(e) => {
            Metrics::incr(&metrics.emails_failed);
            warn!(mailer = mailer.name(), to = %email.to, subject = %email.subject, error = %e, "Email delivery failed");
            false
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Mailer that records what it was asked to send
    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<Email>>,
        pub fail: bool,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send(&self, email: &Email) -> Result<()> {
            if self.fail {
                return Err(AppError::Mail("relay refused".into()));
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }
}
