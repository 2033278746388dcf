//! Credential storage backed by platform keyrings.
//!
//! The API key lives in the system credential manager:
//! - Linux: Secret Service (GNOME Keyring, KWallet)
//! - macOS: Keychain
//! - Windows: Credential Manager
//!
//! `CCAI_API_KEY` overrides the keyring, which is handy for CI and headless
//! sessions without a Secret Service.

use keyring::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Service name for keyring entries
pub const SERVICE_NAME: &str = "ccai";

/// Account under which the provider API key is stored
pub const API_KEY_ACCOUNT: &str = "api-key";

/// Environment variable that takes precedence over the keyring
pub const API_KEY_ENV: &str = "CCAI_API_KEY";

/// Errors that can occur during secret operations.
#[derive(Error, Debug)]
pub enum SecretError {
    #[error("Secret '{0}' not found")]
    NotFound(String),

    #[error("Secret cannot be empty")]
    Empty,

    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Secret store collaborator keyed by (service, account).
///
/// `get` returns `Ok(None)` for a missing secret; `delete` of a missing
/// secret succeeds.
pub trait SecretBackend: Send + Sync {
    fn get(&self, service: &str, account: &str) -> Result<Option<String>, SecretError>;
    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), SecretError>;
    fn delete(&self, service: &str, account: &str) -> Result<(), SecretError>;
}

/// System keyring backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringBackend;

impl KeyringBackend {
    fn entry(service: &str, account: &str) -> Result<Entry, SecretError> {
        Entry::new(service, account).map_err(|e| SecretError::Keyring(e.to_string()))
    }

    /// Check if the keyring is reachable on this system.
    pub fn is_available() -> bool {
        match Self::entry(SERVICE_NAME, "__availability_check__") {
            Ok(entry) => matches!(
                entry.get_password(),
                Ok(_) | Err(keyring::Error::NoEntry)
            ),
            Err(_) => false,
        }
    }
}

impl SecretBackend for KeyringBackend {
    fn get(&self, service: &str, account: &str) -> Result<Option<String>, SecretError> {
        match Self::entry(service, account)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(SecretError::Keyring(e.to_string())),
        }
    }

    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), SecretError> {
        Self::entry(service, account)?
            .set_password(secret)
            .map_err(|e| SecretError::Keyring(e.to_string()))?;
        info!("Secret '{}' stored in keyring", account);
        Ok(())
    }

    fn delete(&self, service: &str, account: &str) -> Result<(), SecretError> {
        match Self::entry(service, account)?.delete_credential() {
            Ok(()) => {
                info!("Secret '{}' deleted from keyring", account);
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(SecretError::Keyring(e.to_string())),
        }
    }
}

/// In-process backend for tests and keyring-less sessions.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    entries: Arc<Mutex<HashMap<(String, String), String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<(String, String), String>>, SecretError> {
        self.entries
            .lock()
            .map_err(|_| SecretError::Keyring("memory store poisoned".to_string()))
    }
}

impl SecretBackend for MemoryBackend {
    fn get(&self, service: &str, account: &str) -> Result<Option<String>, SecretError> {
        Ok(self
            .lock()?
            .get(&(service.to_string(), account.to_string()))
            .cloned())
    }

    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), SecretError> {
        self.lock()?
            .insert((service.to_string(), account.to_string()), secret.to_string());
        Ok(())
    }

    fn delete(&self, service: &str, account: &str) -> Result<(), SecretError> {
        self.lock()?
            .remove(&(service.to_string(), account.to_string()));
        Ok(())
    }
}

/// API key access on top of a [`SecretBackend`].
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn SecretBackend>,
    service: String,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn SecretBackend>) -> Self {
        Self {
            backend,
            service: SERVICE_NAME.to_string(),
        }
    }

    /// Store backed by the system keyring.
    pub fn system() -> Self {
        Self::new(Arc::new(KeyringBackend))
    }

    pub fn api_key(&self) -> Result<Option<String>, SecretError> {
        Ok(self
            .backend
            .get(&self.service, API_KEY_ACCOUNT)?
            .filter(|key| !key.trim().is_empty()))
    }

    pub fn set_api_key(&self, key: &str) -> Result<(), SecretError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(SecretError::Empty);
        }
        self.backend.set(&self.service, API_KEY_ACCOUNT, key)
    }

    pub fn delete_api_key(&self) -> Result<(), SecretError> {
        self.backend.delete(&self.service, API_KEY_ACCOUNT)
    }

    /// API key from `CCAI_API_KEY`, falling back to the store.
    ///
    /// Keyring failures are logged and treated as "no key" so a broken
    /// Secret Service leaves the app unconfigured instead of failing.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                debug!("Using API key from {}", API_KEY_ENV);
                return Some(key.trim().to_string());
            }
        }
        match self.api_key() {
            Ok(key) => key,
            Err(e) => {
                warn!("Could not read API key from keyring: {}", e);
                None
            }
        }
    }
}

/// Prompt user for a secret value (hidden input).
pub fn prompt_secret(prompt: &str) -> Result<String, SecretError> {
    rpassword::prompt_password(prompt).map_err(SecretError::from)
}

/// CLI handlers for secret management commands.
pub mod cli {
    use super::*;

    /// Handle `ccai secret set`.
    pub fn handle_set() -> Result<(), SecretError> {
        let secret = prompt_secret("Enter API key: ")?;
        CredentialStore::system().set_api_key(&secret)?;
        println!("API key stored securely.");
        Ok(())
    }

    /// Handle `ccai secret delete`.
    pub fn handle_delete() -> Result<(), SecretError> {
        CredentialStore::system().delete_api_key()?;
        println!("API key deleted.");
        Ok(())
    }

    /// Handle `ccai secret check`: keyring availability and key presence.
    pub fn handle_check() {
        if KeyringBackend::is_available() {
            println!("Keyring is available and working.");

            #[cfg(target_os = "linux")]
            println!("Backend: Secret Service (GNOME Keyring / KWallet)");

            #[cfg(target_os = "macos")]
            println!("Backend: macOS Keychain");

            #[cfg(target_os = "windows")]
            println!("Backend: Windows Credential Manager");

            match CredentialStore::system().api_key() {
                Ok(Some(_)) => println!("API key: stored"),
                Ok(None) => println!("API key: not set (run `ccai secret set`)"),
                Err(e) => println!("API key: unreadable ({})", e),
            }
        } else {
            eprintln!("Keyring is NOT available on this system.");
            eprintln!();
            eprintln!("Possible causes:");

            #[cfg(target_os = "linux")]
            {
                eprintln!(
                    "  - No Secret Service daemon running (install gnome-keyring or kwallet)"
                );
                eprintln!("  - D-Bus session not available");
            }

            #[cfg(target_os = "macos")]
            eprintln!("  - Keychain access denied");

            #[cfg(target_os = "windows")]
            eprintln!("  - Credential Manager service not running");

            eprintln!();
            eprintln!("Set {} to supply the key without a keyring.", API_KEY_ENV);
            std::process::exit(1);
        }
    }
}
