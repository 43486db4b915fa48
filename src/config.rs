use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{info, warn};
use thiserror::Error;

use crate::credentials::SecretStore;

pub const DEFAULT_CRM_API_URL: &str = "https://api.copper.com/developer_api/v1";
pub const DEFAULT_SMTP_SERVER: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const DEFAULT_ORGANIZATION: &str = "Active Impact";

pub const LOG_FILE_NAME: &str = "leadpass.log";

/// Keys resolved through the secret store rather than plain environment lookup.
pub const SECRET_KEYS: [&str; 2] = ["COPPER_API_TOKEN", "EMAIL_PASSWORD"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    None,
    StartTLS,
    SSL,
}

impl FromStr for SmtpSecurity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(SmtpSecurity::None),
            "starttls" => Ok(SmtpSecurity::StartTLS),
            "ssl" | "tls" => Ok(SmtpSecurity::SSL),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrmSettings {
    pub api_url: String,
    pub api_token: String,
    pub user_email: String,
}

impl CrmSettings {
    pub fn is_configured(&self) -> bool {
        !self.api_token.is_empty() && !self.user_email.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MailSettings {
    pub address: String,
    pub password: String,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_security: SmtpSecurity,
}

impl MailSettings {
    pub fn is_configured(&self) -> bool {
        !self.address.is_empty() && !self.password.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub crm: CrmSettings,
    pub mail: MailSettings,
    pub templates_path: Option<PathBuf>,
    pub organization: String,
}

impl Config {
    /// Reads configuration from the process environment, with secrets
    /// falling back to the system keyring.
    pub fn from_env(secrets: &SecretStore) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| {
            if SECRET_KEYS.contains(&key) {
                match secrets.get(key) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("Secret store not available for {}: {}. Using defaults.", key, e);
                        None
                    }
                }
            } else {
                std::env::var(key).ok()
            }
        })
    }

    /// Builds the configuration from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let smtp_port = match get("SMTP_PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                key: "SMTP_PORT",
                value: raw.clone(),
            })?,
            None => DEFAULT_SMTP_PORT,
        };

        let smtp_security = match get("SMTP_SECURITY") {
            Some(raw) => raw.parse::<SmtpSecurity>().map_err(|_| ConfigError::InvalidValue {
                key: "SMTP_SECURITY",
                value: raw.clone(),
            })?,
            None => SmtpSecurity::StartTLS,
        };

        Ok(Self {
            crm: CrmSettings {
                api_url: get("COPPER_API_URL").unwrap_or_else(|| DEFAULT_CRM_API_URL.to_string()),
                api_token: get("COPPER_API_TOKEN").unwrap_or_default(),
                user_email: get("COPPER_EMAIL").unwrap_or_default(),
            },
            mail: MailSettings {
                address: get("EMAIL_ADDRESS").unwrap_or_default(),
                password: get("EMAIL_PASSWORD").unwrap_or_default(),
                smtp_server: get("SMTP_SERVER").unwrap_or_else(|| DEFAULT_SMTP_SERVER.to_string()),
                smtp_port,
                smtp_security,
            },
            templates_path: get("EMAIL_TEMPLATES")
                .map(|p| PathBuf::from(shellexpand::tilde(&p).into_owned())),
            organization: get("ORGANIZATION_NAME")
                .unwrap_or_else(|| DEFAULT_ORGANIZATION.to_string()),
        })
    }

    pub fn crm_configured(&self) -> bool {
        self.crm.is_configured()
    }

    pub fn mail_configured(&self) -> bool {
        self.mail.is_configured()
    }

    /// Logs the effective configuration. Secrets are masked.
    pub fn log_summary(&self) {
        info!("=== CRM API Configuration ===");
        info!("CRM user email: {}", self.crm.user_email);
        if self.crm.api_token.is_empty() {
            warn!("CRM API token is not set");
        } else {
            info!("CRM API token (masked): {}", mask_secret(&self.crm.api_token));
            info!("CRM API token length: {} characters", self.crm.api_token.len());
        }
        info!("CRM API URL: {}", self.crm.api_url);

        info!(
            "Email configuration: Address={}, Server={}, Port={}, Security={:?}",
            self.mail.address, self.mail.smtp_server, self.mail.smtp_port, self.mail.smtp_security
        );
        if self.mail.password.is_empty() {
            warn!("Email password is not set");
        } else {
            info!("Email password length: {} characters", self.mail.password.len());
        }
    }
}

/// First and last four characters around `...`; short secrets are fully hidden.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        "***".to_string()
    }
}

/// Where the dashboard writes its log, since stderr shares the terminal.
pub fn log_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("leadpass"))
}

/// Opens `dir/leadpass.log` for appending, creating the directory if needed.
pub fn open_log_file(dir: &Path) -> io::Result<(PathBuf, File)> {
    fs::create_dir_all(dir)?;
    let path = dir.join(LOG_FILE_NAME);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((path, file))
}
