use anyhow::{Context, Result};
use keyring::{Entry, Error as KeyringError};

pub const KEYRING_SERVICE: &str = "leadpass";

/// Secret lookup: environment variable first, then the system keyring.
#[derive(Clone)]
pub struct SecretStore {
    service: String,
}

impl Default for SecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore {
    pub fn new() -> Self {
        Self {
            service: KEYRING_SERVICE.to_string(),
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        if let Ok(value) = std::env::var(key) {
            if !value.is_empty() {
                return Ok(Some(value));
            }
        }

        let entry = Entry::new(&self.service, key).context("Failed to create keyring entry")?;

        match entry.get_password() {
            Ok(password) => {
                log::debug!("Loaded {} from the system keyring", key);
                Ok(Some(password))
            }
            Err(KeyringError::NoEntry) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("Failed to retrieve {}: {}", key, e)),
        }
    }

    /// Store a secret in the system keyring
    pub fn store(&self, key: &str, value: &str) -> Result<()> {
        let entry = Entry::new(&self.service, key).context("Failed to create keyring entry")?;

        entry
            .set_password(value)
            .context("Failed to store secret in keyring")?;

        log::debug!("Secret stored securely for {}", key);
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        let entry = Entry::new(&self.service, key).context("Failed to create keyring entry")?;

        match entry.delete_password() {
            Ok(()) => {
                log::debug!("Secret deleted for {}", key);
                Ok(())
            }
            // Nothing stored, nothing to delete
            Err(KeyringError::NoEntry) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("Failed to delete {}: {}", key, e)),
        }
    }
}
