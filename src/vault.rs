//! The vault service: lifecycle, credential CRUD, and usage tracking.
//!
//! One `VaultService` value owns one vault file. While unlocked it holds the
//! DEK and the decrypted credential map behind an exclusive lock; callers
//! get clones, never references. Locking (or dropping the service) zeroes
//! the DEK and every secret buffer.
//!
//! The core is synchronous. Every mutation persists through the atomic-save
//! protocol before the call returns, and the audit event is appended after
//! the mutation commits. A crash between the two leaves a valid vault with
//! one missing log line, which verification tolerates by construction.
//!
//! Two processes opening the same vault concurrently is unsupported; the
//! exclusive lock is per-process only.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::audit::{self, AuditLog, EventKind};
use crate::crypto::{self, Argon2Params};
use crate::envelope::{
    EnvelopeHeader, KdfParams, VaultEnvelope, VAULT_UUID_LEN, VERSION_V1, VERSION_V2,
};
use crate::error::{VaultError, VaultResult};
use crate::keychain::SecretStore;
use crate::keys::{self, SecretKey, SLOT_PASSWORD, SLOT_RECOVERY};
use crate::metadata::{self, MetadataStore, VaultMetadata};
use crate::model::{Credential, CredentialMap, CredentialMetadata, CredentialPatch, UsageRecord};
use crate::policy::{self, StrengthTier};
use crate::recovery::{self, RecoveryHandout};
use crate::storage::{self, Storage};

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultStatus {
    /// No vault file on disk.
    Absent,
    Locked,
    Unlocked,
    /// Unlocked via mnemonic; mutations are gated until
    /// [`VaultService::set_password_after_recovery`].
    UnlockedViaRecovery,
}

impl std::fmt::Display for VaultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultStatus::Absent => write!(f, "absent"),
            VaultStatus::Locked => write!(f, "locked"),
            VaultStatus::Unlocked => write!(f, "unlocked"),
            VaultStatus::UnlockedViaRecovery => write!(f, "unlocked (via recovery)"),
        }
    }
}

/// Options for [`VaultService::init`].
pub struct InitOptions {
    pub with_recovery: bool,
    pub overwrite: bool,
    pub audit: bool,
    /// Optional BIP-39 passphrase ("25th word") for the mnemonic.
    pub recovery_passphrase: Option<String>,
    /// Argon2 cost for recovery derivations. Tests reduce this.
    pub argon2: Argon2Params,
    /// PBKDF2 iteration override. `None` uses the environment-adjusted
    /// default (floor 600 000). Tests reduce this.
    pub kdf_iterations: Option<u32>,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            with_recovery: false,
            overwrite: false,
            audit: true,
            recovery_passphrase: None,
            argon2: Argon2Params::default(),
            kdf_iterations: None,
        }
    }
}

/// What `init` hands back, exactly once.
pub struct InitOutcome {
    pub strength: StrengthTier,
    pub recovery: Option<RecoveryHandout>,
}

struct UnlockedState {
    dek: SecretKey,
    version: u16,
    header: EnvelopeHeader,
    credentials: CredentialMap,
    via_recovery: bool,
}

enum SessionState {
    Locked,
    Unlocked(Box<UnlockedState>),
}

/// The vault core. See the module docs for the ownership model.
pub struct VaultService {
    path: PathBuf,
    storage: Storage,
    keychain: Box<dyn SecretStore>,
    state: Mutex<SessionState>,
}

impl VaultService {
    /// Open a service over the OS filesystem and platform keychain. Sweeps
    /// orphaned temp files and probes rename atomicity (a failed probe is a
    /// warning, not an error).
    pub fn open(path: PathBuf) -> VaultResult<Self> {
        let keychain = crate::keychain::platform_store(&path);
        Self::with_parts(path, Storage::os(), keychain)
    }

    /// Open with injected collaborators (tests use a fault-injecting
    /// filesystem and the no-op keychain).
    pub fn with_parts(
        path: PathBuf,
        storage: Storage,
        keychain: Box<dyn SecretStore>,
    ) -> VaultResult<Self> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if storage.fs().exists(dir) {
                storage.cleanup_orphans(dir)?;
                if !storage.probe_atomic_rename(dir) {
                    warn!(
                        dir = %dir.display(),
                        "filesystem failed the atomic-rename probe; saves may not be crash-safe"
                    );
                }
            }
        }
        Ok(Self {
            path,
            storage,
            keychain,
            state: Mutex::new(SessionState::Locked),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status(&self) -> VaultStatus {
        match &*self.guard() {
            SessionState::Unlocked(s) if s.via_recovery => VaultStatus::UnlockedViaRecovery,
            SessionState::Unlocked(_) => VaultStatus::Unlocked,
            SessionState::Locked if self.storage.fs().exists(&self.path) => VaultStatus::Locked,
            SessionState::Locked => VaultStatus::Absent,
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Create a new vault. Leaves the service unlocked with an empty map.
    /// The mnemonic (when requested) is returned exactly once and never
    /// persisted in plain form.
    pub fn init(&self, password: &str, opts: InitOptions) -> VaultResult<InitOutcome> {
        let mut state = self.guard();

        if self.storage.fs().exists(&self.path) && !opts.overwrite {
            return Err(VaultError::State(format!(
                "a vault already exists at {} (pass --overwrite to replace it)",
                self.path.display()
            )));
        }
        let strength = policy::validate_master_password(password)?;

        let uuid = crypto::random_bytes(VAULT_UUID_LEN);
        let salt = crypto::random_bytes(crypto::SALT_LEN);
        let iterations = opts
            .kdf_iterations
            .unwrap_or_else(crypto::effective_pbkdf2_iterations);
        let password_kek = keys::derive_password_kek(password.as_bytes(), &salt, iterations);

        let mut header = EnvelopeHeader {
            vault_uuid: BASE64.encode(&uuid),
            kdf: KdfParams::pbkdf2(iterations, &salt),
            wrapped_dek: String::new(),
            wrapped_dek_nonce: String::new(),
            recovery_wrapped_dek: None,
            recovery_wrapped_dek_nonce: None,
            recovery: None,
        };

        let (version, dek, recovery_handout) = if opts.with_recovery {
            let (handout, recovery_kek, recovery_meta) = recovery::setup_with_params(
                opts.recovery_passphrase.as_deref(),
                opts.argon2,
            )?;
            let (dek, by_password, by_recovery) =
                keys::generate_and_dual_wrap(&password_kek, &recovery_kek, &uuid)
                    .map_err(|e| VaultError::Corrupted(format!("DEK wrapping: {e}")))?;
            header.set_password_wrapping(&by_password);
            header.set_recovery_wrapping(&by_recovery, recovery_meta);
            (VERSION_V2, dek, Some(handout))
        } else {
            let dek = SecretKey::random();
            let by_password = keys::wrap(&dek, &password_kek, &uuid, SLOT_PASSWORD)
                .map_err(|e| VaultError::Corrupted(format!("DEK wrapping: {e}")))?;
            header.set_password_wrapping(&by_password);
            (VERSION_V1, dek, None)
        };

        let credentials = CredentialMap::new();
        self.write_envelope(version, &header, &dek, &credentials)?;

        let mut meta = VaultMetadata::new(metadata::vault_id_for(&self.path), version);
        if opts.audit {
            let (_, key_ref) = self.ensure_audit_key()?;
            meta.keychain_audit_key_ref = key_ref;
        }
        self.metadata_store().store(&meta)?;

        *state = SessionState::Unlocked(Box::new(UnlockedState {
            dek,
            version,
            header,
            credentials,
            via_recovery: false,
        }));
        drop(state);

        self.append_audit(
            EventKind::Init,
            audit::detail(&[
                ("format_version", &version.to_string()),
                ("recovery", if opts.with_recovery { "enabled" } else { "disabled" }),
            ]),
        );
        info!(path = %self.path.display(), version, "vault initialized");
        Ok(InitOutcome {
            strength,
            recovery: recovery_handout,
        })
    }

    /// Unlock with the master password.
    pub fn unlock(&self, password: &str) -> VaultResult<()> {
        let mut state = self.guard();
        let env = self.read_envelope()?;

        let salt = env.header.kdf.salt_bytes()?;
        let kek = keys::derive_password_kek(password.as_bytes(), &salt, env.header.kdf.iterations);
        let uuid = env.header.uuid_bytes()?;
        let wrapped = env.header.password_wrapping()?;
        let dek = keys::unwrap(&wrapped, &kek, &uuid, SLOT_PASSWORD)
            .map_err(|_| VaultError::WrongCredentials)?;
        let credentials = env.open_payload(&dek)?;

        // The previous good file served its purpose; N-1 retention. When the
        // backup itself is what we just read (crashed save), it stays.
        if self.storage.fs().exists(&self.path) {
            if let Err(err) = self.storage.remove_backup(&self.path) {
                warn!(%err, "could not remove rolling backup after unlock");
            }
        }

        *state = SessionState::Unlocked(Box::new(UnlockedState {
            dek,
            version: env.version,
            header: env.header,
            credentials,
            via_recovery: false,
        }));
        drop(state);

        self.append_audit(EventKind::Unlock, audit::detail(&[]));
        Ok(())
    }

    /// Unlock with the 6 challenge words. Until
    /// [`Self::set_password_after_recovery`] runs, every mutation is
    /// rejected.
    pub fn unlock_with_mnemonic(
        &self,
        words: &[String],
        passphrase: Option<&str>,
    ) -> VaultResult<()> {
        let mut state = self.guard();
        let env = self.read_envelope()?;

        let recovery_meta = env
            .header
            .recovery
            .as_ref()
            .ok_or(VaultError::RecoveryDisabled)?;
        let recovery_kek = recovery::perform(words, passphrase, recovery_meta)?;

        let uuid = env.header.uuid_bytes()?;
        let wrapped = env
            .header
            .recovery_wrapping()?
            .ok_or(VaultError::RecoveryDisabled)?;
        let dek = keys::unwrap(&wrapped, &recovery_kek, &uuid, SLOT_RECOVERY)
            .map_err(|_| VaultError::WrongCredentials)?;
        let credentials = env.open_payload(&dek)?;

        *state = SessionState::Unlocked(Box::new(UnlockedState {
            dek,
            version: env.version,
            header: env.header,
            credentials,
            via_recovery: true,
        }));
        drop(state);

        self.append_audit(EventKind::UnlockRecovery, audit::detail(&[]));
        Ok(())
    }

    /// Drop the DEK and all decrypted credentials. Zeroing happens in the
    /// buffers' destructors.
    pub fn lock(&self) {
        let mut state = self.guard();
        let was_unlocked = matches!(&*state, SessionState::Unlocked(_));
        *state = SessionState::Locked;
        drop(state);
        if was_unlocked {
            self.append_audit(EventKind::Lock, audit::detail(&[]));
        }
    }

    /// Re-wrap the DEK under a KEK derived from `new`. The recovery
    /// wrapping is untouched.
    pub fn change_password(&self, old: &str, new: &str) -> VaultResult<()> {
        let mut state = self.guard();
        let session = unlocked_mut(&mut state)?;
        if session.via_recovery {
            return Err(VaultError::State(
                "unlocked via recovery; use set-password instead of change-password".into(),
            ));
        }

        // Verify the old password against the live wrapping.
        let salt = session.header.kdf.salt_bytes()?;
        let old_kek =
            keys::derive_password_kek(old.as_bytes(), &salt, session.header.kdf.iterations);
        let uuid = session.header.uuid_bytes()?;
        let wrapped = session.header.password_wrapping()?;
        let unwrapped = keys::unwrap(&wrapped, &old_kek, &uuid, SLOT_PASSWORD)
            .map_err(|_| VaultError::WrongCredentials)?;
        if unwrapped != session.dek {
            return Err(VaultError::WrongCredentials);
        }

        self.rewrap_password(session, new)?;
        drop(state);
        self.append_audit(EventKind::ChangePassword, audit::detail(&[]));
        Ok(())
    }

    /// The only mutation allowed after a mnemonic unlock: set a fresh
    /// master password, then lift the gate.
    pub fn set_password_after_recovery(&self, new: &str) -> VaultResult<()> {
        let mut state = self.guard();
        let session = unlocked_mut(&mut state)?;
        if !session.via_recovery {
            return Err(VaultError::State(
                "vault was unlocked with the master password; use change-password".into(),
            ));
        }
        self.rewrap_password(session, new)?;
        session.via_recovery = false;
        drop(state);
        self.append_audit(EventKind::PasswordReset, audit::detail(&[]));
        Ok(())
    }

    /// Upgrade a v1 vault to v2, enabling recovery. The DEK and the payload
    /// ciphertext are preserved; only the wrapping envelope changes.
    pub fn migrate(&self, passphrase: Option<&str>) -> VaultResult<RecoveryHandout> {
        self.migrate_with_params(passphrase, Argon2Params::default())
    }

    pub fn migrate_with_params(
        &self,
        passphrase: Option<&str>,
        argon2: Argon2Params,
    ) -> VaultResult<RecoveryHandout> {
        let mut state = self.guard();
        let session = unlocked_mut(&mut state)?;
        if session.via_recovery {
            return Err(VaultError::State(
                "set a new master password before migrating".into(),
            ));
        }
        if session.version != VERSION_V1 {
            return Err(VaultError::State(format!(
                "vault is already format version {}",
                session.version
            )));
        }

        let on_disk = self.read_envelope()?;
        let uuid = on_disk.header.uuid_bytes()?;
        let (handout, recovery_kek, recovery_meta) =
            recovery::setup_with_params(passphrase, argon2)?;
        let by_recovery = keys::wrap(&session.dek, &recovery_kek, &uuid, SLOT_RECOVERY)
            .map_err(|e| VaultError::Corrupted(format!("DEK wrapping: {e}")))?;

        let migrated = on_disk.migrate_v1_to_v2(&by_recovery, recovery_meta)?;
        let bytes = migrated.encode()?;
        let dek = session.dek.clone();
        let expected = session.credentials.clone();
        self.storage.atomic_write(&self.path, &bytes, &|candidate| {
            if VaultEnvelope::verify_roundtrip(candidate, &dek, &expected) {
                Ok(())
            } else {
                Err(VaultError::SaveVerificationFailed)
            }
        })?;

        session.version = migrated.version;
        session.header = migrated.header;
        drop(state);

        let store = self.metadata_store();
        let mut meta = store.load_or_default(&self.path, VERSION_V2)?;
        meta.format_version = VERSION_V2;
        store.store(&meta)?;

        self.append_audit(EventKind::Migrate, audit::detail(&[("to_version", "2")]));
        info!(path = %self.path.display(), "vault migrated to format v2");
        Ok(handout)
    }

    // ------------------------------------------------------------------
    // Credential CRUD
    // ------------------------------------------------------------------

    /// Clone out a credential. With `track_usage` the caller's working
    /// directory (and enclosing git repository, if any) is recorded and the
    /// vault saves before returning.
    pub fn get(&self, service: &str, track_usage: bool) -> VaultResult<Credential> {
        let mut state = self.guard();
        let session = unlocked_mut(&mut state)?;
        if !session.credentials.contains_key(service) {
            return Err(VaultError::NotFound(service.to_string()));
        }

        let mut location_detail: Option<String> = None;
        if track_usage {
            let location = current_location();
            let git_repo = discover_git_root(Path::new(&location))
                .map(|p| p.display().to_string());
            // Mutate a snapshot and commit it only after the save lands, so
            // a failed save leaves memory matching disk.
            let mut next = session.credentials.clone();
            next.get_mut(service)
                .expect("presence checked above")
                .usage
                .entry(location.clone())
                .or_insert_with(|| UsageRecord::new(location.clone(), git_repo))
                .record_access();
            self.write_envelope(session.version, &session.header, &session.dek, &next)?;
            session.credentials = next;
            location_detail = Some(location);
        }

        let cred = session
            .credentials
            .get(service)
            .expect("presence checked above")
            .clone();
        drop(state);

        let mut detail = vec![("service", service.to_string())];
        if let Some(loc) = location_detail {
            detail.push(("location", loc));
        }
        self.append_audit(EventKind::Get, to_detail(detail));
        Ok(cred)
    }

    /// Bump the per-field counter for one credential (used for individual
    /// clipboard copies). Always records usage.
    pub fn record_field_access(&self, service: &str, field: &str) -> VaultResult<()> {
        let mut state = self.guard();
        let session = unlocked_mut(&mut state)?;
        let location = current_location();
        let git_repo = discover_git_root(Path::new(&location)).map(|p| p.display().to_string());
        let mut next = session.credentials.clone();
        next.get_mut(service)
            .ok_or_else(|| VaultError::NotFound(service.to_string()))?
            .usage
            .entry(location.clone())
            .or_insert_with(|| UsageRecord::new(location.clone(), git_repo))
            .record_field(field);
        self.write_envelope(session.version, &session.header, &session.dek, &next)?;
        session.credentials = next;
        drop(state);

        self.append_audit(
            EventKind::FieldAccess,
            to_detail(vec![
                ("service", service.to_string()),
                ("field", field.to_string()),
                ("location", location),
            ]),
        );
        Ok(())
    }

    /// Store a new credential. The service name is the unique key.
    pub fn add(&self, credential: Credential) -> VaultResult<()> {
        if credential.service.trim().is_empty() {
            return Err(VaultError::InputInvalid("service must not be empty".into()));
        }
        if credential.username.trim().is_empty() {
            return Err(VaultError::InputInvalid("username must not be empty".into()));
        }
        if credential.password.is_empty() {
            return Err(VaultError::InputInvalid("password must not be empty".into()));
        }

        let mut state = self.guard();
        let session = mutable(&mut state)?;
        if session.credentials.contains_key(&credential.service) {
            return Err(VaultError::AlreadyExists(credential.service));
        }
        let service = credential.service.clone();
        let mut next = session.credentials.clone();
        next.insert(service.clone(), credential);
        self.write_envelope(session.version, &session.header, &session.dek, &next)?;
        session.credentials = next;
        drop(state);

        self.append_audit(EventKind::Add, to_detail(vec![("service", service)]));
        Ok(())
    }

    /// Partial update. Bumps `modified_count` and `updated_at` when any
    /// field actually changes.
    pub fn update(&self, service: &str, patch: CredentialPatch) -> VaultResult<()> {
        if patch.is_empty() {
            return Err(VaultError::InputInvalid("nothing to update".into()));
        }
        if let Some(password) = &patch.password {
            if password.is_empty() {
                return Err(VaultError::InputInvalid("password must not be empty".into()));
            }
        }
        if let Some(username) = &patch.username {
            if username.trim().is_empty() {
                return Err(VaultError::InputInvalid("username must not be empty".into()));
            }
        }

        let mut state = self.guard();
        let session = mutable(&mut state)?;
        let mut next = session.credentials.clone();
        let cred = next
            .get_mut(service)
            .ok_or_else(|| VaultError::NotFound(service.to_string()))?;

        if let Some(username) = patch.username {
            cred.username = username;
        }
        if let Some(password) = patch.password {
            cred.password = password;
        }
        if let Some(url) = patch.url {
            cred.url = url;
        }
        if let Some(notes) = patch.notes {
            cred.notes = notes;
        }
        if let Some(category) = patch.category {
            cred.category = category;
        }
        if let Some(totp) = patch.totp_secret {
            cred.totp_secret = totp;
        }
        cred.touch_modified();
        self.write_envelope(session.version, &session.header, &session.dek, &next)?;
        session.credentials = next;
        drop(state);

        self.append_audit(
            EventKind::Update,
            to_detail(vec![("service", service.to_string())]),
        );
        Ok(())
    }

    /// Remove a credential.
    pub fn delete(&self, service: &str) -> VaultResult<()> {
        let mut state = self.guard();
        let session = mutable(&mut state)?;
        let mut next = session.credentials.clone();
        if next.remove(service).is_none() {
            return Err(VaultError::NotFound(service.to_string()));
        }
        self.write_envelope(session.version, &session.header, &session.dek, &next)?;
        session.credentials = next;
        drop(state);

        self.append_audit(
            EventKind::Delete,
            to_detail(vec![("service", service.to_string())]),
        );
        Ok(())
    }

    /// Projected listing, sorted by service name. No secret bytes.
    pub fn list(&self) -> VaultResult<Vec<CredentialMetadata>> {
        let mut state = self.guard();
        let session = unlocked_mut(&mut state)?;
        Ok(session.credentials.values().map(CredentialMetadata::from).collect())
    }

    // ------------------------------------------------------------------
    // Backups
    // ------------------------------------------------------------------

    /// Timestamped manual snapshot, recorded in the sidecar index.
    pub fn create_backup(&self) -> VaultResult<PathBuf> {
        if !self.storage.fs().exists(&self.path) {
            return Err(VaultError::State(format!(
                "no vault at {}",
                self.path.display()
            )));
        }
        let target = self.storage.create_manual_backup(&self.path)?;
        let bytes = self.storage.read(&target)?;

        let store = self.metadata_store();
        let mut meta = store.load_or_default(&self.path, VERSION_V2)?;
        meta.push_backup(&target, bytes.len() as u64, metadata::sha256_hex(&bytes));
        store.store(&meta)?;

        self.append_audit(
            EventKind::BackupCreate,
            to_detail(vec![("file", target.display().to_string())]),
        );
        Ok(target)
    }

    /// All backups, newest first.
    pub fn list_backups(&self) -> VaultResult<Vec<PathBuf>> {
        self.storage.list_backups(&self.path)
    }

    /// Restore from `file`, or from the newest backup that both decodes and
    /// unlocks with `password`, falling back to older ones on integrity
    /// failure. Returns the backup that was restored.
    pub fn restore_backup(
        &self,
        password: &str,
        file: Option<&Path>,
        dry_run: bool,
    ) -> VaultResult<PathBuf> {
        let candidates: Vec<PathBuf> = match file {
            Some(f) => vec![f.to_path_buf()],
            None => self.list_backups()?,
        };
        if candidates.is_empty() {
            return Err(VaultError::State("no backups found".into()));
        }

        for candidate in &candidates {
            match self.check_backup(candidate, password) {
                Ok((env, dek, credentials)) => {
                    if dry_run {
                        return Ok(candidate.clone());
                    }
                    let bytes = env.encode()?;
                    self.storage.atomic_write(&self.path, &bytes, &|b| {
                        if VaultEnvelope::verify_roundtrip(b, &dek, &credentials) {
                            Ok(())
                        } else {
                            Err(VaultError::SaveVerificationFailed)
                        }
                    })?;
                    self.lock();
                    self.append_audit(
                        EventKind::BackupRestore,
                        to_detail(vec![("file", candidate.display().to_string())]),
                    );
                    return Ok(candidate.clone());
                }
                Err(VaultError::WrongCredentials) => return Err(VaultError::WrongCredentials),
                Err(err) => {
                    warn!(file = %candidate.display(), %err, "backup failed verification, trying older");
                }
            }
        }
        Err(VaultError::Corrupted("no backup passed verification".into()))
    }

    /// Peek inside a backup without touching the vault file.
    pub fn preview_backup(
        &self,
        password: &str,
        file: Option<&Path>,
    ) -> VaultResult<(PathBuf, Vec<CredentialMetadata>)> {
        let candidates: Vec<PathBuf> = match file {
            Some(f) => vec![f.to_path_buf()],
            None => self.list_backups()?,
        };
        for candidate in &candidates {
            match self.check_backup(candidate, password) {
                Ok((_env, _dek, credentials)) => {
                    let listing = credentials.values().map(CredentialMetadata::from).collect();
                    return Ok((candidate.clone(), listing));
                }
                Err(VaultError::WrongCredentials) => return Err(VaultError::WrongCredentials),
                Err(_) => continue,
            }
        }
        Err(VaultError::Corrupted("no backup passed verification".into()))
    }

    /// Delete the vault file and its artifacts: rolling backup, sidecar,
    /// audit log and key. Manual snapshots are kept.
    pub fn remove(&self) -> VaultResult<()> {
        self.append_audit(EventKind::Remove, audit::detail(&[]));
        self.lock();

        let fs = self.storage.fs();
        for path in [
            self.path.clone(),
            storage::backup_path(&self.path),
            self.metadata_store().path().to_path_buf(),
            self.vault_dir().join(audit::AUDIT_LOG_FILE),
            self.vault_dir().join(audit::AUDIT_KEY_FILE),
        ] {
            if fs.exists(&path) {
                fs.remove(&path).map_err(|e| VaultError::from_io(e, &path))?;
            }
        }
        self.keychain.delete(audit::AUDIT_KEY_ACCOUNT);
        let _ = self.metadata_store().remove();
        info!(path = %self.path.display(), "vault removed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Audit
    // ------------------------------------------------------------------

    /// Verify the audit chain. Returns the number of valid entries.
    pub fn verify_audit(&self) -> VaultResult<u64> {
        match self.audit_log()? {
            Some(log) => log.verify(),
            None => Err(VaultError::State("audit logging is not enabled for this vault".into())),
        }
    }

    fn audit_log(&self) -> VaultResult<Option<AuditLog>> {
        let dir = self.vault_dir();
        let meta_store = self.metadata_store();
        let has_keychain_ref = meta_store
            .exists()
            .then(|| meta_store.load().ok())
            .flatten()
            .and_then(|m| m.keychain_audit_key_ref)
            .is_some();
        let has_key_file = dir.join(audit::AUDIT_KEY_FILE).exists();
        let has_log = dir.join(audit::AUDIT_LOG_FILE).exists();
        if !has_keychain_ref && !has_key_file && !has_log {
            return Ok(None);
        }

        let (key, _) = audit::load_or_create_audit_key(&dir, self.keychain.as_ref())?;
        Ok(Some(AuditLog::new(
            dir.join(audit::AUDIT_LOG_FILE),
            metadata::vault_id_for(&self.path),
            key,
        )))
    }

    fn ensure_audit_key(&self) -> VaultResult<(SecretKey, Option<String>)> {
        audit::load_or_create_audit_key(&self.vault_dir(), self.keychain.as_ref())
    }

    /// Best-effort append; an audit failure never rolls back the mutation
    /// it describes.
    fn append_audit(&self, kind: EventKind, detail: BTreeMap<String, String>) {
        match self.audit_log() {
            Ok(Some(log)) => {
                if let Err(err) = log.append(kind, detail) {
                    warn!(%err, "audit append failed");
                }
            }
            Ok(None) => {}
            Err(err) => warn!(%err, "audit log unavailable"),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn guard(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn vault_dir(&self) -> PathBuf {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf()
    }

    fn metadata_store(&self) -> MetadataStore {
        MetadataStore::new(&self.path, self.storage.clone())
    }

    /// Read the envelope, falling back to the rolling backup when a crashed
    /// save left no main file. The backup is read in place, not promoted.
    fn read_envelope(&self) -> VaultResult<VaultEnvelope> {
        let bytes = match self.storage.read(&self.path) {
            Ok(bytes) => bytes,
            Err(VaultError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                let backup = storage::backup_path(&self.path);
                if self.storage.fs().exists(&backup) {
                    warn!(
                        backup = %backup.display(),
                        "vault file missing; reading the rolling backup"
                    );
                    self.storage.read(&backup)?
                } else {
                    return Err(VaultError::State(format!(
                        "no vault found at {} (run `pass init` first)",
                        self.path.display()
                    )));
                }
            }
            Err(e) => return Err(e),
        };
        if bytes.is_empty() {
            return Err(VaultError::Corrupted("vault file is empty".into()));
        }
        VaultEnvelope::decode(&bytes)
    }

    fn write_envelope(
        &self,
        version: u16,
        header: &EnvelopeHeader,
        dek: &SecretKey,
        credentials: &CredentialMap,
    ) -> VaultResult<()> {
        let env = VaultEnvelope::seal(version, header.clone(), dek, credentials)?;
        let bytes = env.encode()?;
        let dek = dek.clone();
        let expected = credentials.clone();
        self.storage.atomic_write(&self.path, &bytes, &|candidate| {
            if VaultEnvelope::verify_roundtrip(candidate, &dek, &expected) {
                Ok(())
            } else {
                Err(VaultError::SaveVerificationFailed)
            }
        })?;
        self.storage.ensure_permissions(&self.path)
    }

    fn persist(&self, session: &UnlockedState) -> VaultResult<()> {
        self.write_envelope(
            session.version,
            &session.header,
            &session.dek,
            &session.credentials,
        )
    }

    fn rewrap_password(&self, session: &mut UnlockedState, new: &str) -> VaultResult<()> {
        policy::validate_master_password(new)?;
        let uuid = session.header.uuid_bytes()?;
        let salt = crypto::random_bytes(crypto::SALT_LEN);
        let iterations = session.header.kdf.iterations;
        let new_kek = keys::derive_password_kek(new.as_bytes(), &salt, iterations);
        let by_password = keys::wrap(&session.dek, &new_kek, &uuid, SLOT_PASSWORD)
            .map_err(|e| VaultError::Corrupted(format!("DEK wrapping: {e}")))?;
        session.header.kdf = KdfParams::pbkdf2(iterations, &salt);
        session.header.set_password_wrapping(&by_password);
        self.persist(session)
    }

    fn check_backup(
        &self,
        file: &Path,
        password: &str,
    ) -> VaultResult<(VaultEnvelope, SecretKey, CredentialMap)> {
        let bytes = self.storage.read(file)?;
        let env = VaultEnvelope::decode(&bytes)?;
        let salt = env.header.kdf.salt_bytes()?;
        let kek = keys::derive_password_kek(password.as_bytes(), &salt, env.header.kdf.iterations);
        let uuid = env.header.uuid_bytes()?;
        let wrapped = env.header.password_wrapping()?;
        let dek = keys::unwrap(&wrapped, &kek, &uuid, SLOT_PASSWORD)
            .map_err(|_| VaultError::WrongCredentials)?;
        // The password already unwrapped the DEK, so a payload failure here
        // is damage to the backup, not a wrong password.
        let credentials = env.open_payload(&dek).map_err(|e| match e {
            VaultError::WrongCredentials => {
                VaultError::Corrupted("backup payload failed authentication".into())
            }
            other => other,
        })?;
        Ok((env, dek, credentials))
    }
}

fn unlocked_mut<'a>(
    state: &'a mut MutexGuard<'_, SessionState>,
) -> VaultResult<&'a mut UnlockedState> {
    match &mut **state {
        SessionState::Unlocked(s) => Ok(s.as_mut()),
        SessionState::Locked => Err(VaultError::State("vault is locked".into())),
    }
}

/// Like [`unlocked_mut`], but also enforces the post-recovery gate.
fn mutable<'a>(
    state: &'a mut MutexGuard<'_, SessionState>,
) -> VaultResult<&'a mut UnlockedState> {
    let session = unlocked_mut(state)?;
    if session.via_recovery {
        return Err(VaultError::State(
            "unlocked via recovery; set a new master password before making changes".into(),
        ));
    }
    Ok(session)
}

fn to_detail(pairs: Vec<(&str, String)>) -> BTreeMap<String, String> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn current_location() -> String {
    std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "<unknown>".to_string())
}

/// Walk up from `start` looking for a `.git` entry.
fn discover_git_root(start: &Path) -> Option<PathBuf> {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir.join(".git").exists() {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    None
}

/// Read a secret out of a credential by field name, for clipboard copies.
pub fn credential_field(cred: &Credential, field: &str) -> VaultResult<Zeroizing<String>> {
    match field {
        "password" => Ok(Zeroizing::new(cred.password.expose_lossy())),
        "username" => Ok(Zeroizing::new(cred.username.clone())),
        "url" => Ok(Zeroizing::new(cred.url.clone().unwrap_or_default())),
        "notes" => Ok(Zeroizing::new(cred.notes.clone().unwrap_or_default())),
        "totp" => cred
            .totp_secret
            .as_ref()
            .map(|t| Zeroizing::new(t.expose_lossy()))
            .ok_or_else(|| VaultError::NotFound(format!("{}: no TOTP secret", cred.service))),
        other => Err(VaultError::InputInvalid(format!("unknown field '{other}'"))),
    }
}
