use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Message, SmtpTransport, Transport};
use thiserror::Error;

use crate::config::SmtpConfig;

/// Subject line of the report email
pub const REPORT_SUBJECT: &str = "Account diagnostic report";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("could not build the email: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Anything that can deliver a finished report
pub trait ReportSender: Send + Sync {
    fn send_report(&self, to_email: &str, report: &str) -> Result<(), MailError>;
}

pub struct Mailer {
    smtp: SmtpTransport,
    from: String,
}

impl Mailer {
    /// Build an SMTP relay with implicit TLS
    ///
    /// Credentials are trimmed; app passwords pasted with surrounding
    /// whitespace were the usual cause of authentication failures.
    pub fn from_config(config: &SmtpConfig) -> Result<Self, MailError> {
        let creds = Credentials::new(
            config.user.trim().to_string(),
            config.password.trim().to_string(),
        );

        let tls_parameters = TlsParameters::new(config.server.clone())?;

        let smtp = SmtpTransport::relay(&config.server)?
            .credentials(creds)
            .port(config.port)
            .tls(Tls::Wrapper(tls_parameters))
            .build();

        Ok(Mailer {
            smtp,
            from: config.from.clone(),
        })
    }
}

impl ReportSender for Mailer {
    /// Send a report as a plain-text Markdown email
    ///
    /// Blocking; call through `tokio::task::spawn_blocking` from handlers.
    fn send_report(&self, to_email: &str, report: &str) -> Result<(), MailError> {
        let email = report_message(&self.from, to_email, report)?;
        self.smtp.send(&email)?;
        Ok(())
    }
}

/// Build the report email without sending it
pub fn report_message(from: &str, to_email: &str, report: &str) -> Result<Message, MailError> {
    let message = Message::builder()
        .from(from.parse()?)
        .to(to_email.trim().parse()?)
        .subject(REPORT_SUBJECT)
        .header(ContentType::TEXT_PLAIN)
        .body(report.to_string())?;
    Ok(message)
}

/// Cheap sanity check for the form's email field
pub fn looks_like_email(email: &str) -> bool {
    email.trim().parse::<lettre::Address>().is_ok()
}
