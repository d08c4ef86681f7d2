//! OS keychain access, modeled as a best-effort blob store.
//!
//! The vault queries `available()` once per run and branches; a missing or
//! locked keychain is never fatal. Service names take the form
//! `pass-cli:<absolute vault path>` so multiple vaults stay distinct.

use std::path::Path;

use tracing::debug;

/// Capability trait over the platform secret store.
pub trait SecretStore: Send + Sync {
    fn available(&self) -> bool;
    fn get(&self, key: &str) -> Option<String>;
    /// Returns `false` when the store refused the write.
    fn set(&self, key: &str, value: &str) -> bool;
    fn delete(&self, key: &str) -> bool;
}

/// Keychain service name for a vault.
pub fn service_name(vault_path: &Path) -> String {
    format!("pass-cli:{}", vault_path.display())
}

/// `keyring`-backed store.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn for_vault(vault_path: &Path) -> Self {
        Self {
            service: service_name(vault_path),
        }
    }

    fn entry(&self, key: &str) -> Option<keyring::Entry> {
        keyring::Entry::new(&self.service, key).ok()
    }
}

impl SecretStore for KeyringStore {
    fn available(&self) -> bool {
        // A probe read distinguishes "no such entry" (store works) from a
        // platform failure (no store at all).
        match self.entry("availability-probe") {
            Some(entry) => match entry.get_password() {
                Ok(_) | Err(keyring::Error::NoEntry) => true,
                Err(err) => {
                    debug!(%err, "keychain unavailable");
                    false
                }
            },
            None => false,
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        self.entry(key)?.get_password().ok()
    }

    fn set(&self, key: &str, value: &str) -> bool {
        self.entry(key)
            .map(|e| e.set_password(value).is_ok())
            .unwrap_or(false)
    }

    fn delete(&self, key: &str) -> bool {
        self.entry(key)
            .map(|e| e.delete_credential().is_ok())
            .unwrap_or(false)
    }
}

/// Store used when the platform has no keychain (or tests want none).
pub struct NoopStore;

impl SecretStore for NoopStore {
    fn available(&self) -> bool {
        false
    }

    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&self, _key: &str, _value: &str) -> bool {
        false
    }

    fn delete(&self, _key: &str) -> bool {
        false
    }
}

/// Pick the store for this run. `PASS_CLI_TEST` forces the no-op store so
/// test suites never touch a real keychain.
pub fn platform_store(vault_path: &Path) -> Box<dyn SecretStore> {
    if std::env::var_os("PASS_CLI_TEST").is_some() {
        return Box::new(NoopStore);
    }
    Box::new(KeyringStore::for_vault(vault_path))
}
