//! One-time registration secrets.

use std::collections::HashSet;
use std::path::Path;

use parking_lot::Mutex;
use tracing::{info, instrument};

use super::CredentialError;

/// Secrets that each allow exactly one registration.
#[derive(Debug, Default)]
pub struct RegistrationSecrets {
    secrets: Mutex<HashSet<String>>,
}

impl RegistrationSecrets {
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            secrets: Mutex::new(secrets.into_iter().map(Into::into).collect()),
        }
    }

    /// One secret per line; surrounding whitespace and blank lines are ignored.
    pub fn parse(contents: &str) -> Self {
        Self::new(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty()),
        )
    }

    /// Load secrets from a file.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CredentialError::SecretsFile(e.to_string()))?;
        let secrets = Self::parse(&contents);
        info!(count = secrets.len(), "Loaded registration secrets");
        Ok(secrets)
    }

    pub fn is_valid(&self, secret: &str) -> bool {
        self.secrets.lock().contains(secret)
    }

    /// Remove `secret`, returning whether it was still available.
    pub fn consume(&self, secret: &str) -> bool {
        self.secrets.lock().remove(secret)
    }

    /// Put a consumed secret back after a failed registration.
    pub fn restore(&self, secret: &str) {
        self.secrets.lock().insert(secret.to_string());
    }

    pub fn len(&self) -> usize {
        self.secrets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
