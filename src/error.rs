//! Error taxonomy for the vault core.
//!
//! The core surfaces typed errors; the CLI maps them to exit codes and
//! user-facing messages. Nothing in here retries.

use std::path::PathBuf;
use thiserror::Error;

/// Low-level cryptographic failures.
///
/// `DecryptionFailed` deliberately carries no detail: a wrong key and a
/// corrupted tag are indistinguishable to callers.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid nonce length: expected {expected} bytes, got {actual}")]
    InvalidNonceLength { expected: usize, actual: usize },

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("invalid length: {0}")]
    InvalidLength(String),
}

/// Errors surfaced by the vault core.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("invalid input: {0}")]
    InputInvalid(String),

    #[error("no credential stored for service '{0}'")]
    NotFound(String),

    #[error("a credential for service '{0}' already exists")]
    AlreadyExists(String),

    /// Wrong password or wrong mnemonic words. Mapped from
    /// `CryptoError::DecryptionFailed`; the two causes are never
    /// distinguished to the user.
    #[error("wrong password or corrupted vault (vault on disk is unchanged)")]
    WrongCredentials,

    #[error("vault is corrupted: {0}")]
    Corrupted(String),

    #[error("vault file format version {0} is not supported by this build")]
    UnsupportedVersion(u16),

    #[error("operation not valid in the current state: {0}")]
    State(String),

    #[error("recovery is not enabled for this vault")]
    RecoveryDisabled,

    #[error("'{0}' is not a word from the BIP-39 English word list")]
    InvalidWord(String),

    #[error("expected {expected} recovery words, got {actual}")]
    InvalidWordCount { expected: usize, actual: usize },

    #[error("recovery phrase verification failed")]
    VerificationFailed,

    #[error("pre-commit verification failed; the previous vault file was left untouched")]
    SaveVerificationFailed,

    #[error("audit log chain broken at sequence {seq}")]
    AuditChainBroken { seq: u64 },

    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("disk full while writing {0}")]
    DiskFull(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Exit code contract: 0 success, 1 user error, 2 system error,
    /// 3 security-related.
    pub fn exit_code(&self) -> i32 {
        match self {
            VaultError::InputInvalid(_)
            | VaultError::NotFound(_)
            | VaultError::AlreadyExists(_)
            | VaultError::State(_)
            | VaultError::RecoveryDisabled
            | VaultError::InvalidWord(_)
            | VaultError::InvalidWordCount { .. } => 1,
            VaultError::WrongCredentials
            | VaultError::VerificationFailed
            | VaultError::AuditChainBroken { .. } => 3,
            VaultError::Corrupted(_)
            | VaultError::UnsupportedVersion(_)
            | VaultError::SaveVerificationFailed
            | VaultError::PermissionDenied(_)
            | VaultError::DiskFull(_)
            | VaultError::Io(_) => 2,
        }
    }

    /// Classify an I/O error into the more specific storage variants where
    /// the kind is unambiguous.
    pub fn from_io(err: std::io::Error, path: &std::path::Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                VaultError::PermissionDenied(path.to_path_buf())
            }
            _ if err.raw_os_error() == Some(ENOSPC) => VaultError::DiskFull(path.to_path_buf()),
            _ => VaultError::Io(err),
        }
    }
}

#[cfg(unix)]
const ENOSPC: i32 = 28;
#[cfg(not(unix))]
const ENOSPC: i32 = 112; // ERROR_DISK_FULL

pub type VaultResult<T> = Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_contract() {
        assert_eq!(VaultError::NotFound("x".into()).exit_code(), 1);
        assert_eq!(VaultError::WrongCredentials.exit_code(), 3);
        assert_eq!(VaultError::AuditChainBroken { seq: 4 }.exit_code(), 3);
        assert_eq!(VaultError::UnsupportedVersion(9).exit_code(), 2);
        assert_eq!(
            VaultError::Io(std::io::Error::new(std::io::ErrorKind::Other, "boom")).exit_code(),
            2
        );
    }

    #[test]
    fn wrong_credentials_message_never_distinguishes() {
        let msg = VaultError::WrongCredentials.to_string();
        assert!(msg.contains("wrong password or corrupted vault"));
        assert!(msg.contains("unchanged"));
    }

    #[test]
    fn io_classification() {
        let path = std::path::Path::new("/tmp/vault.enc");
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(
            VaultError::from_io(denied, path),
            VaultError::PermissionDenied(_)
        ));
        let generic = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(
            VaultError::from_io(generic, path),
            VaultError::Io(_)
        ));
    }
}
