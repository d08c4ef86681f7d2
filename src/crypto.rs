//! Cryptographic primitives for the vault.
//!
//! Everything here is a thin, length-checked wrapper over the RustCrypto
//! stack:
//! - AES-256-GCM authenticated encryption (ciphertext with tag appended)
//! - PBKDF2-SHA256 for the password KEK
//! - Argon2id for the recovery KEK
//! - HKDF-SHA256 expansion
//! - OS-backed secure randomness
//!
//! Key material moves through [`zeroize`]-backed buffers; see
//! [`crate::model::SecretBytes`] and [`crate::keys::SecretKey`].

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::CryptoError;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;
/// AES-GCM nonce length in bytes. Randomly generated per encryption,
/// never reused under the same key.
pub const NONCE_LEN: usize = 12;
/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;
/// Salt length for both KDFs (256 bits).
pub const SALT_LEN: usize = 32;

/// PBKDF2-SHA256 iteration floor. The default equals the floor; the
/// `PASS_CLI_ITERATIONS` environment variable can only raise it.
pub const PBKDF2_MIN_ITERATIONS: u32 = 600_000;

/// BIP-39 seed derivation iteration count (fixed by the standard).
const BIP39_PBKDF2_ROUNDS: u32 = 2048;

/// Argon2id parameters as stored in the vault header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argon2Params {
    pub memory_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self {
            memory_kib: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }
}

fn check_len(actual: usize, expected: usize, nonce: bool) -> Result<(), CryptoError> {
    if actual == expected {
        Ok(())
    } else if nonce {
        Err(CryptoError::InvalidNonceLength { expected, actual })
    } else {
        Err(CryptoError::InvalidKeyLength { expected, actual })
    }
}

/// AES-256-GCM encrypt. Returns ciphertext with the 16-byte tag appended.
pub fn seal(key: &[u8], nonce: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    check_len(key.len(), KEY_LEN, false)?;
    check_len(nonce.len(), NONCE_LEN, true)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::InvalidLength("plaintext too long for AES-GCM".into()))
}

/// AES-256-GCM decrypt of ciphertext-with-tag.
///
/// A wrong key and a corrupted tag both surface as
/// [`CryptoError::DecryptionFailed`].
pub fn open(
    key: &[u8],
    nonce: &[u8],
    ciphertext_and_tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    check_len(key.len(), KEY_LEN, false)?;
    check_len(nonce.len(), NONCE_LEN, true)?;
    if ciphertext_and_tag.len() < TAG_LEN {
        return Err(CryptoError::InvalidLength(format!(
            "ciphertext too short: {} bytes",
            ciphertext_and_tag.len()
        )));
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext_and_tag,
                aad,
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// PBKDF2-SHA256. Caller owns (and zeroes) the output.
pub fn pbkdf2_sha256(password: &[u8], salt: &[u8], iterations: u32, out_len: usize) -> Vec<u8> {
    let mut out = vec![0u8; out_len];
    pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
    out
}

/// Argon2id with explicit parameters. Caller owns (and zeroes) the output.
pub fn argon2id(
    password: &[u8],
    salt: &[u8],
    params: &Argon2Params,
    out_len: usize,
) -> Result<Vec<u8>, CryptoError> {
    let argon_params = argon2::Params::new(
        params.memory_kib,
        params.time_cost,
        params.parallelism,
        Some(out_len),
    )
    .map_err(|e| CryptoError::InvalidLength(format!("argon2 params: {e}")))?;
    let argon2 = argon2::Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon_params,
    );

    let mut out = vec![0u8; out_len];
    argon2
        .hash_password_into(password, salt, &mut out)
        .map_err(|e| CryptoError::InvalidLength(format!("argon2: {e}")))?;
    Ok(out)
}

/// HKDF-SHA256 expand.
pub fn hkdf_expand(prk: &[u8], info: &[u8], len: usize) -> Result<Vec<u8>, CryptoError> {
    let hk = Hkdf::<Sha256>::from_prk(prk)
        .map_err(|_| CryptoError::InvalidLength("hkdf prk too short".into()))?;
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .map_err(|_| CryptoError::InvalidLength(format!("hkdf output length {len}")))?;
    Ok(okm)
}

/// BIP-39 seed derivation: PBKDF2-HMAC-SHA512 over the sentence with the
/// `"mnemonic" + passphrase` salt and 2048 rounds, per the standard. Used
/// both for the full 24-word phrase and for the 6-word challenge subset.
pub fn bip39_seed(sentence: &str, passphrase: &str) -> [u8; 64] {
    let mut salt = format!("mnemonic{passphrase}");
    let mut seed = [0u8; 64];
    pbkdf2_hmac::<Sha512>(
        sentence.as_bytes(),
        salt.as_bytes(),
        BIP39_PBKDF2_ROUNDS,
        &mut seed,
    );
    salt.zeroize();
    seed
}

/// Fill a fresh buffer with OS randomness.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// Fixed-size variant of [`random_bytes`].
pub fn random_array<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// Constant-time equality.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    bool::from(a.ct_eq(b))
}

/// Overwrite a buffer in place. The zeroize crate guarantees the writes
/// survive the optimizer.
pub fn zero(buf: &mut [u8]) {
    buf.zeroize();
}

/// Effective PBKDF2 iteration count: `PASS_CLI_ITERATIONS` may only raise
/// the floor; anything lower (or unparseable) is ignored.
pub fn effective_pbkdf2_iterations() -> u32 {
    match std::env::var("PASS_CLI_ITERATIONS") {
        Ok(v) => match v.trim().parse::<u32>() {
            Ok(n) if n >= PBKDF2_MIN_ITERATIONS => n,
            _ => PBKDF2_MIN_ITERATIONS,
        },
        Err(_) => PBKDF2_MIN_ITERATIONS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let key = random_array::<KEY_LEN>();
        let nonce = random_array::<NONCE_LEN>();
        let sealed = seal(&key, &nonce, b"attack at dawn", b"hdr").unwrap();
        assert_eq!(sealed.len(), b"attack at dawn".len() + TAG_LEN);
        let opened = open(&key, &nonce, &sealed, b"hdr").unwrap();
        assert_eq!(opened, b"attack at dawn");
    }

    #[test]
    fn open_rejects_wrong_key_and_wrong_aad() {
        let key = random_array::<KEY_LEN>();
        let nonce = random_array::<NONCE_LEN>();
        let sealed = seal(&key, &nonce, b"secret", b"aad").unwrap();

        let other = random_array::<KEY_LEN>();
        assert!(matches!(
            open(&other, &nonce, &sealed, b"aad"),
            Err(CryptoError::DecryptionFailed)
        ));
        assert!(matches!(
            open(&key, &nonce, &sealed, b"tampered"),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn open_rejects_flipped_tag_bit() {
        let key = random_array::<KEY_LEN>();
        let nonce = random_array::<NONCE_LEN>();
        let mut sealed = seal(&key, &nonce, b"secret", b"").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            open(&key, &nonce, &sealed, b""),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn length_validation() {
        let short_key = [0u8; 16];
        let nonce = [0u8; NONCE_LEN];
        assert!(matches!(
            seal(&short_key, &nonce, b"x", b""),
            Err(CryptoError::InvalidKeyLength { expected: 32, .. })
        ));
        let key = [0u8; KEY_LEN];
        assert!(matches!(
            seal(&key, &[0u8; 8], b"x", b""),
            Err(CryptoError::InvalidNonceLength { expected: 12, .. })
        ));
        assert!(matches!(
            open(&key, &nonce, &[0u8; 4], b""),
            Err(CryptoError::InvalidLength(_))
        ));
    }

    #[test]
    fn pbkdf2_is_deterministic_and_iteration_sensitive() {
        let a = pbkdf2_sha256(b"pw", b"salt", 1000, 32);
        let b = pbkdf2_sha256(b"pw", b"salt", 1000, 32);
        let c = pbkdf2_sha256(b"pw", b"salt", 1001, 32);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn argon2id_known_params() {
        let params = Argon2Params {
            memory_kib: 8,
            time_cost: 1,
            parallelism: 1,
        };
        let a = argon2id(b"pw", &[7u8; SALT_LEN], &params, 32).unwrap();
        let b = argon2id(b"pw", &[7u8; SALT_LEN], &params, 32).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        let c = argon2id(b"pw", &[8u8; SALT_LEN], &params, 32).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn bip39_seed_matches_reference_vector() {
        // Trezor reference vector: entropy 0x00*16, TREZOR passphrase.
        let seed = bip39_seed(
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about",
            "TREZOR",
        );
        assert_eq!(
            hex::encode(&seed[..32]),
            "c55257c360c07c72029aebc1b53c05ed0362ada38ead3e3e9efa3708e5349553"
        );
    }

    #[test]
    fn hkdf_expand_is_deterministic_and_info_sensitive() {
        let prk = [0x42u8; 32];
        let a = hkdf_expand(&prk, b"vault", 32).unwrap();
        let b = hkdf_expand(&prk, b"vault", 32).unwrap();
        let c = hkdf_expand(&prk, b"other", 32).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(hkdf_expand(&prk, b"vault", 64).unwrap().len(), 64);
    }

    #[test]
    fn pbkdf2_env_override_only_raises() {
        std::env::remove_var("PASS_CLI_ITERATIONS");
        assert_eq!(effective_pbkdf2_iterations(), PBKDF2_MIN_ITERATIONS);

        std::env::set_var("PASS_CLI_ITERATIONS", "100");
        assert_eq!(effective_pbkdf2_iterations(), PBKDF2_MIN_ITERATIONS);

        std::env::set_var("PASS_CLI_ITERATIONS", "900000");
        assert_eq!(effective_pbkdf2_iterations(), 900_000);

        std::env::set_var("PASS_CLI_ITERATIONS", "not-a-number");
        assert_eq!(effective_pbkdf2_iterations(), PBKDF2_MIN_ITERATIONS);
        std::env::remove_var("PASS_CLI_ITERATIONS");
    }

    #[test]
    fn ct_eq_handles_length_mismatch() {
        assert!(ct_eq(b"abc", b"abc"));
        assert!(!ct_eq(b"abc", b"abd"));
        assert!(!ct_eq(b"abc", b"abcd"));
    }

    #[test]
    fn zero_overwrites() {
        let mut buf = vec![0xAAu8; 64];
        zero(&mut buf);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn random_bytes_are_distinct() {
        assert_ne!(random_bytes(32), random_bytes(32));
    }
}
