//! Durable storage: atomic writes, backups, and orphan cleanup.
//!
//! Every vault mutation goes through [`Storage::atomic_write`]:
//!
//! 1. the caller serializes the new envelope to a buffer,
//! 2. a verification callback proves the buffer round-trips,
//! 3. the buffer lands in `<path>.tmp.<random>` with owner-only permissions,
//! 4. the temp file is fsynced,
//! 5. an existing `<path>` is renamed to `<path>.backup`,
//! 6. the temp file is renamed over `<path>`,
//! 7. the directory is fsynced.
//!
//! A crash at any point leaves either the old file, the backup, or both; a
//! partially-written temp file is never promoted. Orphaned temp files older
//! than 60 seconds are swept on open.
//!
//! All I/O goes through the narrow [`FileSystem`] trait so tests can inject
//! faults at exact protocol steps.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{VaultError, VaultResult};

/// Orphaned temp files younger than this are assumed to belong to a
/// save still in flight.
const ORPHAN_MAX_AGE: Duration = Duration::from_secs(60);

/// Marker segment in temp file names.
const TMP_MARKER: &str = ".tmp.";

/// File metadata the storage layer cares about.
#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub len: u64,
    pub modified: SystemTime,
}

/// The filesystem surface the vault core touches. Production hits the OS;
/// tests inject a fault-injecting fake.
pub trait FileSystem: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    /// Create-or-truncate write with owner-only permissions.
    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn fsync_file(&self, path: &Path) -> io::Result<()>;
    fn fsync_dir(&self, path: &Path) -> io::Result<()>;
    fn remove(&self, path: &Path) -> io::Result<()>;
    fn stat(&self, path: &Path) -> io::Result<FileStat>;
    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;
    fn exists(&self, path: &Path) -> bool;
    fn set_restrictive_permissions(&self, path: &Path) -> io::Result<()>;
}

/// OS-backed [`FileSystem`].
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        use std::io::Write;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(bytes)?;
        // Pre-existing files keep their old mode; enforce it again.
        self.set_restrictive_permissions(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }

    fn fsync_file(&self, path: &Path) -> io::Result<()> {
        std::fs::File::open(path)?.sync_all()
    }

    fn fsync_dir(&self, path: &Path) -> io::Result<()> {
        #[cfg(unix)]
        {
            std::fs::File::open(path)?.sync_all()
        }
        #[cfg(not(unix))]
        {
            // Directory handles cannot be fsynced portably; the rename is
            // still atomic on NTFS.
            let _ = path;
            Ok(())
        }
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let meta = std::fs::metadata(path)?;
        Ok(FileStat {
            len: meta.len(),
            modified: meta.modified()?,
        })
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            entries.push(entry?.path());
        }
        Ok(entries)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn set_restrictive_permissions(&self, path: &Path) -> io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        }
        #[cfg(not(unix))]
        {
            // Windows ACLs default to the owning user for files created in
            // the user profile; nothing portable to tighten here.
            let _ = path;
            Ok(())
        }
    }
}

/// Storage engine bound to a [`FileSystem`].
#[derive(Clone)]
pub struct Storage {
    fs: Arc<dyn FileSystem>,
}

impl Storage {
    pub fn os() -> Self {
        Self {
            fs: Arc::new(OsFileSystem),
        }
    }

    pub fn with_fs(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    pub fn fs(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    /// Read a file whole.
    pub fn read(&self, path: &Path) -> VaultResult<Vec<u8>> {
        self.fs
            .read(path)
            .map_err(|e| VaultError::from_io(e, path))
    }

    /// The verify-then-rename save protocol. `verify` receives the exact
    /// bytes about to be committed and must prove they decode back to the
    /// intended state.
    pub fn atomic_write(
        &self,
        path: &Path,
        bytes: &[u8],
        verify: &dyn Fn(&[u8]) -> VaultResult<()>,
    ) -> VaultResult<()> {
        verify(bytes)?;

        let dir = parent_dir(path);
        let tmp = temp_path(path);
        let backup = backup_path(path);

        self.fs
            .write(&tmp, bytes)
            .map_err(|e| VaultError::from_io(e, &tmp))?;
        self.fs
            .fsync_file(&tmp)
            .map_err(|e| VaultError::from_io(e, &tmp))?;

        if self.fs.exists(path) {
            self.fs
                .rename(path, &backup)
                .map_err(|e| VaultError::from_io(e, path))?;
        }
        self.fs
            .rename(&tmp, path)
            .map_err(|e| VaultError::from_io(e, path))?;
        self.fs
            .fsync_dir(&dir)
            .map_err(|e| VaultError::from_io(e, &dir))?;

        debug!(path = %path.display(), bytes = bytes.len(), "atomic write committed");
        Ok(())
    }

    /// Timestamped manual backup: `<vault>.YYYYMMDD-HHMMSS.manual.backup`.
    pub fn create_manual_backup(&self, path: &Path) -> VaultResult<PathBuf> {
        let bytes = self.read(path)?;
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let target = PathBuf::from(format!("{}.{stamp}.manual.backup", path.display()));
        self.fs
            .write(&target, &bytes)
            .map_err(|e| VaultError::from_io(e, &target))?;
        self.fs
            .fsync_file(&target)
            .map_err(|e| VaultError::from_io(e, &target))?;
        Ok(target)
    }

    /// All backups of `path`, newest first: the rolling `.backup` plus any
    /// manual snapshots.
    pub fn list_backups(&self, path: &Path) -> VaultResult<Vec<PathBuf>> {
        let dir = parent_dir(path);
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => return Ok(Vec::new()),
        };

        let mut backups: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in self.fs.list(&dir).map_err(|e| VaultError::from_io(e, &dir))? {
            let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let is_backup = name == format!("{file_name}.backup")
                || (name.starts_with(&format!("{file_name}.")) && name.ends_with(".manual.backup"));
            if !is_backup {
                continue;
            }
            if let Ok(stat) = self.fs.stat(&entry) {
                backups.push((stat.modified, entry));
            }
        }
        backups.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(backups.into_iter().map(|(_, p)| p).collect())
    }

    /// Sweep `*.tmp.*` siblings left behind by crashed saves.
    pub fn cleanup_orphans(&self, dir: &Path) -> VaultResult<usize> {
        self.cleanup_orphans_older_than(dir, ORPHAN_MAX_AGE)
    }

    /// [`Self::cleanup_orphans`] with an explicit age threshold. Crash
    /// tests sweep with `Duration::ZERO`.
    pub fn cleanup_orphans_older_than(
        &self,
        dir: &Path,
        max_age: Duration,
    ) -> VaultResult<usize> {
        let mut removed = 0;
        let entries = match self.fs.list(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(VaultError::from_io(e, dir)),
        };
        for entry in entries {
            let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.contains(TMP_MARKER) {
                continue;
            }
            let stale = self
                .fs
                .stat(&entry)
                .ok()
                .and_then(|s| s.modified.elapsed().ok())
                .is_some_and(|age| age >= max_age);
            if stale && self.fs.remove(&entry).is_ok() {
                warn!(path = %entry.display(), "removed orphaned temp file");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Owner-only permissions on an existing file.
    pub fn ensure_permissions(&self, path: &Path) -> VaultResult<()> {
        self.fs
            .set_restrictive_permissions(path)
            .map_err(|e| VaultError::from_io(e, path))
    }

    /// One-shot startup probe: can this directory do same-directory
    /// renames? A `false` is a warning to the operator, not a hard error.
    pub fn probe_atomic_rename(&self, dir: &Path) -> bool {
        let from = dir.join(format!(".probe{TMP_MARKER}{}", random_suffix()));
        let to = dir.join(format!(".probe{TMP_MARKER}{}", random_suffix()));
        let ok = self.fs.write(&from, b"probe").is_ok()
            && self.fs.rename(&from, &to).is_ok()
            && self.fs.read(&to).map(|b| b == b"probe").unwrap_or(false);
        let _ = self.fs.remove(&from);
        let _ = self.fs.remove(&to);
        ok
    }

    /// Drop the rolling backup after a successful unlock (N-1 retention).
    pub fn remove_backup(&self, path: &Path) -> VaultResult<()> {
        let backup = backup_path(path);
        match self.fs.remove(&backup) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VaultError::from_io(e, &backup)),
        }
    }
}

/// `<vault>.backup` sibling path.
pub fn backup_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.backup", path.display()))
}

fn temp_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}{TMP_MARKER}{}", path.display(), random_suffix()))
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf()
}

fn random_suffix() -> String {
    hex::encode(crate::crypto::random_bytes(4))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_verify(_: &[u8]) -> VaultResult<()> {
        Ok(())
    }

    #[test]
    fn atomic_write_creates_and_rotates_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.enc");
        let storage = Storage::os();

        storage.atomic_write(&path, b"v1", &no_verify).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"v1");
        assert!(!backup_path(&path).exists(), "no backup on first write");

        storage.atomic_write(&path, b"v2", &no_verify).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"v2");
        assert_eq!(std::fs::read(backup_path(&path)).unwrap(), b"v1");

        storage.atomic_write(&path, b"v3", &no_verify).unwrap();
        assert_eq!(std::fs::read(backup_path(&path)).unwrap(), b"v2", "backup replaced");
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.enc");
        Storage::os().atomic_write(&path, b"data", &no_verify).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(TMP_MARKER))
            .collect();
        assert!(leftovers.is_empty(), "temp files left: {leftovers:?}");
    }

    #[test]
    fn failed_verification_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.enc");
        let storage = Storage::os();
        storage.atomic_write(&path, b"good", &no_verify).unwrap();

        let err = storage
            .atomic_write(&path, b"bad", &|_| Err(VaultError::SaveVerificationFailed))
            .unwrap_err();
        assert!(matches!(err, VaultError::SaveVerificationFailed));
        assert_eq!(std::fs::read(&path).unwrap(), b"good");
        assert!(!backup_path(&path).exists());
    }

    #[cfg(unix)]
    #[test]
    fn written_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.enc");
        Storage::os().atomic_write(&path, b"data", &no_verify).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn orphan_cleanup_removes_stale_temp_files() {
        let dir = TempDir::new().unwrap();
        let stale = dir.path().join("vault.enc.tmp.deadbeef");
        let unrelated = dir.path().join("vault.enc");
        std::fs::write(&stale, b"junk").unwrap();
        std::fs::write(&unrelated, b"keep").unwrap();

        let storage = Storage::os();
        // Everything is younger than 60s, so the default sweep keeps it.
        assert_eq!(storage.cleanup_orphans(dir.path()).unwrap(), 0);
        assert!(stale.exists());

        // With a zero threshold the orphan goes, the vault stays.
        assert_eq!(
            storage
                .cleanup_orphans_older_than(dir.path(), Duration::ZERO)
                .unwrap(),
            1
        );
        assert!(!stale.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn list_backups_newest_first() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.enc");
        let storage = Storage::os();
        std::fs::write(&path, b"current").unwrap();

        std::fs::write(backup_path(&path), b"rolling").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let manual = storage.create_manual_backup(&path).unwrap();

        let backups = storage.list_backups(&path).unwrap();
        assert_eq!(backups.len(), 2);
        assert_eq!(backups[0], manual, "manual snapshot is newest");
        assert_eq!(backups[1], backup_path(&path));
    }

    #[test]
    fn probe_atomic_rename_on_tmpdir() {
        let dir = TempDir::new().unwrap();
        assert!(Storage::os().probe_atomic_rename(dir.path()));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn remove_backup_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.enc");
        let storage = Storage::os();
        storage.remove_backup(&path).unwrap();
        std::fs::write(backup_path(&path), b"old").unwrap();
        storage.remove_backup(&path).unwrap();
        assert!(!backup_path(&path).exists());
    }
}
