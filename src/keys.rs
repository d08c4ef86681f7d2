//! Key hierarchy: KEK derivation and DEK wrapping.
//!
//! The vault uses envelope encryption. A random Data Encryption Key (DEK)
//! encrypts the credential payload; Key Encryption Keys (KEKs) derived from
//! the master password (PBKDF2-SHA256) or the recovery mnemonic (Argon2id
//! over the BIP-39 seed) wrap the DEK. A v2 vault carries the same DEK
//! wrapped twice, under independent nonces.

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{self, Argon2Params, KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::error::CryptoError;

/// Wrapped DEK length: 32-byte ciphertext plus 16-byte tag.
pub const WRAPPED_KEY_LEN: usize = KEY_LEN + TAG_LEN;

/// AAD slot tags binding each wrapping to its role.
pub const SLOT_PASSWORD: u8 = 0x01;
pub const SLOT_RECOVERY: u8 = 0x02;

/// 256-bit key material that zeros on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    pub fn random() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Build from a slice, rejecting anything that is not exactly 32 bytes.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: bytes.len(),
            });
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl PartialEq for SecretKey {
    fn eq(&self, other: &Self) -> bool {
        crypto::ct_eq(&self.0, &other.0)
    }
}

impl Eq for SecretKey {}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey(<redacted>)")
    }
}

/// A DEK wrapped under a KEK: AES-256-GCM ciphertext plus the nonce used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
}

impl WrappedKey {
    /// Reassemble from decoded header fields, validating lengths up front
    /// so corruption fails loudly instead of as a tag mismatch.
    pub fn from_parts(ciphertext: Vec<u8>, nonce: &[u8]) -> Result<Self, CryptoError> {
        if ciphertext.len() != WRAPPED_KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: WRAPPED_KEY_LEN,
                actual: ciphertext.len(),
            });
        }
        if nonce.len() != NONCE_LEN {
            return Err(CryptoError::InvalidNonceLength {
                expected: NONCE_LEN,
                actual: nonce.len(),
            });
        }
        let mut n = [0u8; NONCE_LEN];
        n.copy_from_slice(nonce);
        Ok(Self {
            ciphertext,
            nonce: n,
        })
    }
}

/// Derive the password KEK with PBKDF2-SHA256.
pub fn derive_password_kek(password: &[u8], salt: &[u8], iterations: u32) -> SecretKey {
    let mut okm = crypto::pbkdf2_sha256(password, salt, iterations, KEY_LEN);
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&okm);
    okm.zeroize();
    SecretKey::from_bytes(key)
}

/// Derive the recovery KEK with Argon2id over a BIP-39 seed.
pub fn derive_recovery_kek(
    seed: &[u8],
    salt: &[u8],
    params: &Argon2Params,
) -> Result<SecretKey, CryptoError> {
    let mut okm = crypto::argon2id(seed, salt, params, KEY_LEN)?;
    let key = SecretKey::try_from_slice(&okm)?;
    okm.zeroize();
    Ok(key)
}

/// AAD for a DEK wrapping: vault UUID plus a slot tag, so a wrapping cannot
/// be transplanted between vaults or swapped between slots.
fn wrap_aad(vault_uuid: &[u8], slot: u8) -> Vec<u8> {
    let mut aad = Vec::with_capacity(vault_uuid.len() + 1);
    aad.extend_from_slice(vault_uuid);
    aad.push(slot);
    aad
}

/// Wrap a DEK under a KEK with a fresh random nonce.
pub fn wrap(
    dek: &SecretKey,
    kek: &SecretKey,
    vault_uuid: &[u8],
    slot: u8,
) -> Result<WrappedKey, CryptoError> {
    let nonce = crypto::random_array::<NONCE_LEN>();
    let ciphertext = crypto::seal(
        kek.as_bytes(),
        &nonce,
        dek.as_bytes(),
        &wrap_aad(vault_uuid, slot),
    )?;
    Ok(WrappedKey { ciphertext, nonce })
}

/// Unwrap a DEK. A wrong KEK surfaces as `DecryptionFailed` with no
/// further detail. The returned key is a fresh allocation the caller owns.
pub fn unwrap(
    wrapped: &WrappedKey,
    kek: &SecretKey,
    vault_uuid: &[u8],
    slot: u8,
) -> Result<SecretKey, CryptoError> {
    let mut plaintext = crypto::open(
        kek.as_bytes(),
        &wrapped.nonce,
        &wrapped.ciphertext,
        &wrap_aad(vault_uuid, slot),
    )?;
    let key = SecretKey::try_from_slice(&plaintext).map_err(|_| CryptoError::DecryptionFailed);
    plaintext.zeroize();
    key
}

/// Generate a fresh DEK and wrap it under both KEKs. The two wrappings use
/// independent nonces; a collision would void the GCM guarantees, so it is
/// rejected outright.
pub fn generate_and_dual_wrap(
    password_kek: &SecretKey,
    recovery_kek: &SecretKey,
    vault_uuid: &[u8],
) -> Result<(SecretKey, WrappedKey, WrappedKey), CryptoError> {
    let dek = SecretKey::random();
    let by_password = wrap(&dek, password_kek, vault_uuid, SLOT_PASSWORD)?;
    let by_recovery = wrap(&dek, recovery_kek, vault_uuid, SLOT_RECOVERY)?;
    if by_password.nonce == by_recovery.nonce {
        return Err(CryptoError::InvalidNonceLength {
            expected: NONCE_LEN,
            actual: NONCE_LEN,
        });
    }
    Ok((dek, by_password, by_recovery))
}
