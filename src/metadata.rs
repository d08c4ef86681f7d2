//! Sidecar metadata: `vault.meta` next to `vault.enc`.
//!
//! Plain JSON, rewritten through the same atomic-save protocol as the vault
//! itself. Holds the stable vault id (the directory basename, which salts
//! the audit HMAC chain), keychain references, and the manual-backup index.
//! With base64 inflation the file runs to roughly 1 KiB.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{VaultError, VaultResult};
use crate::storage::Storage;

/// Sidecar file name.
pub const METADATA_FILE: &str = "vault.meta";

/// Current sidecar schema version.
const METADATA_VERSION: u16 = 2;

/// One entry in the manual-backup index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub filename: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub size: u64,
    /// hex-lowercase SHA-256 of the backup file.
    pub sha256: String,
}

/// The sidecar document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultMetadata {
    /// Directory basename of the vault file. Stable across sessions; the
    /// audit chain binds to it.
    pub vault_id: String,
    pub format_version: u16,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub keychain_audit_key_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub keychain_master_password_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backup_index: Vec<BackupEntry>,
}

impl VaultMetadata {
    pub fn new(vault_id: String, format_version: u16) -> Self {
        Self {
            vault_id,
            format_version,
            keychain_audit_key_ref: None,
            keychain_master_password_ref: None,
            backup_index: Vec::new(),
        }
    }

    /// Record a manual backup in the index.
    pub fn push_backup(&mut self, path: &Path, size: u64, sha256: String) {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.backup_index.push(BackupEntry {
            filename,
            created_at: chrono::Utc::now(),
            size,
            sha256,
        });
    }
}

/// Load/store handle for one vault's sidecar.
pub struct MetadataStore {
    path: PathBuf,
    storage: Storage,
}

impl MetadataStore {
    pub fn new(vault_path: &Path, storage: Storage) -> Self {
        Self {
            path: sidecar_path(vault_path),
            storage,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.storage.fs().exists(&self.path)
    }

    pub fn load(&self) -> VaultResult<VaultMetadata> {
        let bytes = self.storage.read(&self.path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| VaultError::Corrupted(format!("sidecar decode: {e}")))
    }

    /// Load when present, otherwise a fresh document for this vault.
    pub fn load_or_default(&self, vault_path: &Path, format_version: u16) -> VaultResult<VaultMetadata> {
        if self.exists() {
            self.load()
        } else {
            Ok(VaultMetadata::new(vault_id_for(vault_path), format_version))
        }
    }

    /// Atomic rewrite; the verify step proves the bytes parse back.
    pub fn store(&self, metadata: &VaultMetadata) -> VaultResult<()> {
        let bytes = serde_json::to_vec_pretty(metadata)
            .map_err(|e| VaultError::Corrupted(format!("sidecar serialization: {e}")))?;
        self.storage.atomic_write(&self.path, &bytes, &|candidate| {
            let parsed: VaultMetadata = serde_json::from_slice(candidate)
                .map_err(|_| VaultError::SaveVerificationFailed)?;
            if &parsed == metadata {
                Ok(())
            } else {
                Err(VaultError::SaveVerificationFailed)
            }
        })
    }

    pub fn remove(&self) -> VaultResult<()> {
        if self.exists() {
            self.storage
                .fs()
                .remove(&self.path)
                .map_err(|e| VaultError::from_io(e, &self.path))?;
        }
        // The rolling backup of the sidecar goes with it.
        let backup = crate::storage::backup_path(&self.path);
        if self.storage.fs().exists(&backup) {
            let _ = self.storage.fs().remove(&backup);
        }
        Ok(())
    }
}

/// The stable vault id: directory basename of the vault file.
pub fn vault_id_for(vault_path: &Path) -> String {
    vault_path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "vault".to_string())
}

/// `vault.meta` sibling of the vault file.
pub fn sidecar_path(vault_path: &Path) -> PathBuf {
    vault_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(METADATA_FILE)
}

/// Sidecar schema version for new vaults.
pub fn current_version() -> u16 {
    METADATA_VERSION
}

/// hex-lowercase SHA-256, used for the backup index.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn vault_id_is_the_directory_basename() {
        assert_eq!(
            vault_id_for(Path::new("/home/u/.pass-cli/vault.enc")),
            ".pass-cli"
        );
        assert_eq!(vault_id_for(Path::new("/work/team-vault/vault.enc")), "team-vault");
    }

    #[test]
    fn store_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let vault_path = dir.path().join("vault.enc");
        let store = MetadataStore::new(&vault_path, Storage::os());
        assert!(!store.exists());

        let mut meta = VaultMetadata::new(vault_id_for(&vault_path), 2);
        meta.keychain_audit_key_ref = Some("audit-key".into());
        meta.push_backup(Path::new("vault.enc.20260801-120000.manual.backup"), 512, sha256_hex(b"x"));

        store.store(&meta).unwrap();
        assert!(store.exists());
        assert_eq!(store.load().unwrap(), meta);

        // Rewrite rotates the sidecar's own backup.
        meta.backup_index.clear();
        store.store(&meta).unwrap();
        assert_eq!(store.load().unwrap(), meta);
    }

    #[test]
    fn load_or_default_mints_a_fresh_document() {
        let dir = TempDir::new().unwrap();
        let vault_path = dir.path().join("vault.enc");
        let store = MetadataStore::new(&vault_path, Storage::os());
        let meta = store.load_or_default(&vault_path, 2).unwrap();
        assert_eq!(meta.format_version, 2);
        assert!(meta.backup_index.is_empty());
    }

    #[test]
    fn remove_clears_sidecar_and_its_backup() {
        let dir = TempDir::new().unwrap();
        let vault_path = dir.path().join("vault.enc");
        let store = MetadataStore::new(&vault_path, Storage::os());
        let meta = VaultMetadata::new("dir".into(), 2);
        store.store(&meta).unwrap();
        store.store(&meta).unwrap();
        store.remove().unwrap();
        assert!(!store.exists());
    }
}
