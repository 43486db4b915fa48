use std::time::Duration;

use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Message, SmtpTransport, Transport};
use log::{error, info};
use thiserror::Error;

use crate::config::{MailSettings, SmtpSecurity};

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

pub const APP_PASSWORD_HINT: &str = "Authentication failed with the mail server. This is likely because:\n\
1. You need to use an App Password instead of your regular password\n\
2. Your account has 2-factor authentication enabled which requires an App Password\n\
3. Your password may be incorrect\n\n\
To create an App Password:\n\
1. Go to your Google Account settings\n\
2. Search for 'App Passwords'\n\
3. Generate a new app password for 'Mail'\n\
4. Store it as EMAIL_PASSWORD";

#[derive(Error, Debug)]
pub enum MailError {
    #[error("Email credentials not configured. Set EMAIL_ADDRESS and EMAIL_PASSWORD.")]
    NotConfigured,

    #[error("No recipient email provided")]
    NoRecipient,

    #[error("Invalid email address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("{0}")]
    Authentication(String),

    #[error("Sender refused: {0}. This may be due to restrictions on the sending account.")]
    SenderRefused(String),

    #[error("Recipient(s) refused: {0}. Please check the recipient email address.")]
    RecipientRefused(String),

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("Failed to build message: {0}")]
    Build(String),
}

/// Maps an SMTP reply code to the failure the operator is shown.
pub fn classify_smtp_failure(code: Option<u16>, detail: &str) -> MailError {
    match code {
        Some(535) => MailError::Authentication(APP_PASSWORD_HINT.to_string()),
        Some(530) | Some(534) => MailError::Authentication(format!(
            "Authentication failed: {}. Please check your email credentials.",
            detail
        )),
        Some(553) | Some(555) => MailError::SenderRefused(detail.to_string()),
        Some(550) | Some(551) => MailError::RecipientRefused(detail.to_string()),
        _ => MailError::Smtp(detail.to_string()),
    }
}

impl From<lettre::transport::smtp::Error> for MailError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        let code = err.status().and_then(|c| c.to_string().parse::<u16>().ok());
        classify_smtp_failure(code, &err.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl OutgoingEmail {
    /// Splits a comma-separated CC field into addresses.
    pub fn parse_cc(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.trim().parse::<Mailbox>().map_err(|e| MailError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

pub struct Mailer {
    settings: MailSettings,
}

impl Mailer {
    pub fn new(settings: MailSettings) -> Self {
        Self { settings }
    }

    pub fn is_configured(&self) -> bool {
        self.settings.is_configured()
    }

    pub fn sender(&self) -> &str {
        &self.settings.address
    }

    pub fn build_message(&self, email: &OutgoingEmail) -> Result<Message, MailError> {
        if email.to.trim().is_empty() {
            return Err(MailError::NoRecipient);
        }

        let mut builder = Message::builder()
            .from(parse_mailbox(&self.settings.address)?)
            .to(parse_mailbox(&email.to)?)
            .subject(&email.subject);

        for cc in &email.cc {
            builder = builder.cc(parse_mailbox(cc)?);
        }

        builder
            .multipart(MultiPart::mixed().singlepart(SinglePart::plain(email.body.clone())))
            .map_err(|e| MailError::Build(e.to_string()))
    }

    fn transport(&self) -> Result<SmtpTransport, MailError> {
        let creds = Credentials::new(self.settings.address.clone(), self.settings.password.clone());
        let server = &self.settings.smtp_server;

        let mailer = match self.settings.smtp_security {
            SmtpSecurity::SSL => {
                let tls_params = TlsParameters::new(server.clone())?;
                SmtpTransport::relay(server)?
                    .credentials(creds)
                    .port(self.settings.smtp_port)
                    .tls(Tls::Wrapper(tls_params))
                    .timeout(Some(SMTP_TIMEOUT))
                    .build()
            }
            SmtpSecurity::StartTLS => {
                let tls_params = TlsParameters::new(server.clone())?;
                SmtpTransport::relay(server)?
                    .credentials(creds)
                    .port(self.settings.smtp_port)
                    .tls(Tls::Required(tls_params))
                    .timeout(Some(SMTP_TIMEOUT))
                    .build()
            }
            SmtpSecurity::None => SmtpTransport::builder_dangerous(server)
                .credentials(creds)
                .port(self.settings.smtp_port)
                .timeout(Some(SMTP_TIMEOUT))
                .build(),
        };

        Ok(mailer)
    }

    /// Connects, upgrades to TLS per the security setting, logs in and quits.
    pub fn test_connection(&self) -> Result<String, MailError> {
        if !self.is_configured() {
            return Err(MailError::NotConfigured);
        }

        info!(
            "Attempting to connect to {}:{}",
            self.settings.smtp_server, self.settings.smtp_port
        );
        match self.transport()?.test_connection() {
            Ok(true) => Ok("Email connection successful!".to_string()),
            Ok(false) => Err(MailError::Smtp("Server did not accept the connection".to_string())),
            Err(e) => {
                let err = MailError::from(e);
                error!("Email connection test failed: {}", err);
                Err(err)
            }
        }
    }

    pub fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        if !self.is_configured() {
            error!("{}", MailError::NotConfigured);
            return Err(MailError::NotConfigured);
        }

        info!("Attempting to send email to: {}", email.to);
        if !email.cc.is_empty() {
            info!("CC: {}", email.cc.join(", "));
        }
        info!("Email subject: {}", email.subject);

        let message = self.build_message(email)?;
        match self.transport()?.send(&message) {
            Ok(_) => {
                info!("Email sent successfully from {} to {}", self.settings.address, email.to);
                Ok(())
            }
            Err(e) => {
                let err = MailError::from(e);
                error!("{}", err);
                Err(err)
            }
        }
    }
}
