//! Append-only, HMAC-chained audit log.
//!
//! One JSON line per event in a sibling `audit.log`:
//! `{ seq, ts, vault_id, kind, detail, hmac }` with `hmac` hex-lowercase.
//! Each HMAC covers the entry's canonical bytes plus the previous entry's
//! HMAC, so truncation, reordering, and edits anywhere in the file all
//! surface during verification as the first broken sequence number.
//!
//! Detail maps may name services and locations; they never carry passwords,
//! mnemonic words, or key material.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use crate::error::{VaultError, VaultResult};
use crate::keychain::SecretStore;
use crate::keys::SecretKey;

type HmacSha256 = Hmac<Sha256>;

/// HMAC input for the first entry in a chain.
const GENESIS_HMAC: [u8; 32] = [0u8; 32];

/// Keychain account under which the audit key is stored.
pub const AUDIT_KEY_ACCOUNT: &str = "audit-key";

/// Sibling file fallback when no keychain is available.
pub const AUDIT_KEY_FILE: &str = "audit.key";

/// Audit log file name, sibling to the vault file.
pub const AUDIT_LOG_FILE: &str = "audit.log";

/// What happened. Serialized snake_case into the log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Init,
    Unlock,
    UnlockRecovery,
    Lock,
    Add,
    Update,
    Delete,
    Get,
    FieldAccess,
    ChangePassword,
    PasswordReset,
    Migrate,
    BackupCreate,
    BackupRestore,
    Remove,
}

impl EventKind {
    fn as_str(&self) -> &'static str {
        match self {
            EventKind::Init => "init",
            EventKind::Unlock => "unlock",
            EventKind::UnlockRecovery => "unlock_recovery",
            EventKind::Lock => "lock",
            EventKind::Add => "add",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
            EventKind::Get => "get",
            EventKind::FieldAccess => "field_access",
            EventKind::ChangePassword => "change_password",
            EventKind::PasswordReset => "password_reset",
            EventKind::Migrate => "migrate",
            EventKind::BackupCreate => "backup_create",
            EventKind::BackupRestore => "backup_restore",
            EventKind::Remove => "remove",
        }
    }
}

/// One log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    /// UTC, RFC 3339.
    pub ts: String,
    pub vault_id: String,
    pub kind: EventKind,
    #[serde(default)]
    pub detail: BTreeMap<String, String>,
    /// hex-lowercase HMAC-SHA256.
    pub hmac: String,
}

impl AuditEntry {
    /// Canonical bytes covered by the HMAC, before the previous HMAC is
    /// appended. The detail map is a `BTreeMap`, so serialization order is
    /// stable.
    fn canonical_bytes(&self) -> VaultResult<Vec<u8>> {
        let detail_json = serde_json::to_string(&self.detail)
            .map_err(|e| VaultError::Corrupted(format!("audit detail serialization: {e}")))?;
        Ok(format!(
            "{}\n{}\n{}\n{}\n{}",
            self.seq,
            self.ts,
            self.vault_id,
            self.kind.as_str(),
            detail_json
        )
        .into_bytes())
    }
}

/// Handle on one vault's audit chain.
pub struct AuditLog {
    path: PathBuf,
    vault_id: String,
    key: SecretKey,
}

impl AuditLog {
    pub fn new(path: PathBuf, vault_id: String, key: SecretKey) -> Self {
        Self {
            path,
            vault_id,
            key,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event and fsync. Returns the sequence number written.
    pub fn append(
        &self,
        kind: EventKind,
        detail: BTreeMap<String, String>,
    ) -> VaultResult<u64> {
        let (prev_seq, prev_hmac) = self.tail()?;
        let mut entry = AuditEntry {
            seq: prev_seq + 1,
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            vault_id: self.vault_id.clone(),
            kind,
            detail,
            hmac: String::new(),
        };
        entry.hmac = hex::encode(compute_hmac(&self.key, &entry, &prev_hmac)?);

        let line = serde_json::to_string(&entry)
            .map_err(|e| VaultError::Corrupted(format!("audit entry serialization: {e}")))?;

        let mut options = std::fs::OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(&self.path)
            .map_err(|e| VaultError::from_io(e, &self.path))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.sync_all())
            .map_err(|e| VaultError::from_io(e, &self.path))?;

        debug!(seq = entry.seq, kind = kind.as_str(), "audit event appended");
        Ok(entry.seq)
    }

    /// Walk the chain from sequence 1, recomputing every HMAC. Returns the
    /// number of verified entries, or the first broken sequence.
    pub fn verify(&self) -> VaultResult<u64> {
        verify_chain(&self.path, &self.vault_id, &self.key)
    }

    /// Last `(seq, hmac_bytes)` in the file, or the genesis pair.
    fn tail(&self) -> VaultResult<(u64, Vec<u8>)> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((0, GENESIS_HMAC.to_vec()))
            }
            Err(e) => return Err(VaultError::from_io(e, &self.path)),
        };
        let Some(last_line) = content.lines().filter(|l| !l.trim().is_empty()).last() else {
            return Ok((0, GENESIS_HMAC.to_vec()));
        };
        let entry: AuditEntry = serde_json::from_str(last_line)
            .map_err(|e| VaultError::Corrupted(format!("audit tail decode: {e}")))?;
        let hmac = hex::decode(&entry.hmac)
            .map_err(|_| VaultError::Corrupted("audit tail hmac is not hex".into()))?;
        Ok((entry.seq, hmac))
    }
}

/// Stateless verification pass over an audit file.
pub fn verify_chain(path: &Path, vault_id: &str, key: &SecretKey) -> VaultResult<u64> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(VaultError::from_io(e, path)),
    };

    let mut prev_hmac = GENESIS_HMAC.to_vec();
    let mut expected_seq = 1u64;
    let mut verified = 0u64;

    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let entry: AuditEntry = serde_json::from_str(line)
            .map_err(|_| VaultError::AuditChainBroken { seq: expected_seq })?;
        if entry.seq != expected_seq || entry.vault_id != vault_id {
            return Err(VaultError::AuditChainBroken { seq: expected_seq });
        }
        let computed = compute_hmac(key, &entry, &prev_hmac)?;
        let claimed = hex::decode(&entry.hmac)
            .map_err(|_| VaultError::AuditChainBroken { seq: entry.seq })?;
        if !crate::crypto::ct_eq(&computed, &claimed) {
            return Err(VaultError::AuditChainBroken { seq: entry.seq });
        }
        prev_hmac = claimed;
        expected_seq += 1;
        verified += 1;
    }
    Ok(verified)
}

fn compute_hmac(key: &SecretKey, entry: &AuditEntry, prev_hmac: &[u8]) -> VaultResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|_| VaultError::Corrupted("audit key has an invalid length".into()))?;
    mac.update(&entry.canonical_bytes()?);
    mac.update(prev_hmac);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Fetch or mint the per-vault audit key.
///
/// Preference order: OS keychain (when available), then a 0600 sibling file
/// `audit.key`. Returns the key and the keychain ref to record in the
/// sidecar (`None` when the file fallback was used).
pub fn load_or_create_audit_key(
    vault_dir: &Path,
    store: &dyn SecretStore,
) -> VaultResult<(SecretKey, Option<String>)> {
    if store.available() {
        if let Some(hex_key) = store.get(AUDIT_KEY_ACCOUNT) {
            let bytes = hex::decode(hex_key.trim())
                .map_err(|_| VaultError::Corrupted("keychain audit key is not hex".into()))?;
            let key = SecretKey::try_from_slice(&bytes)
                .map_err(|_| VaultError::Corrupted("keychain audit key has a bad length".into()))?;
            return Ok((key, Some(AUDIT_KEY_ACCOUNT.to_string())));
        }
        let key = SecretKey::random();
        if store.set(AUDIT_KEY_ACCOUNT, &hex::encode(key.as_bytes())) {
            return Ok((key, Some(AUDIT_KEY_ACCOUNT.to_string())));
        }
        // Keychain refused the write; fall through to the file.
    }

    let key_path = vault_dir.join(AUDIT_KEY_FILE);
    match std::fs::read_to_string(&key_path) {
        Ok(hex_key) => {
            let bytes = hex::decode(hex_key.trim())
                .map_err(|_| VaultError::Corrupted("audit key file is not hex".into()))?;
            let key = SecretKey::try_from_slice(&bytes)
                .map_err(|_| VaultError::Corrupted("audit key file has a bad length".into()))?;
            Ok((key, None))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let key = SecretKey::random();
            write_restrictive(&key_path, hex::encode(key.as_bytes()).as_bytes())?;
            Ok((key, None))
        }
        Err(e) => Err(VaultError::from_io(e, &key_path)),
    }
}

fn write_restrictive(path: &Path, bytes: &[u8]) -> VaultResult<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(|e| VaultError::from_io(e, path))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| VaultError::from_io(e, path))
}

/// Small helper for call sites building detail maps.
pub fn detail(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
