//! Mnemonic recovery scheme.
//!
//! `init --with-recovery` hands the user a 24-word BIP-39 mnemonic and picks
//! 6 challenge positions. The 18 remaining words are encrypted into the vault
//! under a key derived from the 6 challenge words, so recovery needs only the
//! words the user was quizzed on: supply the 6, decrypt the 18, reassemble
//! the full phrase, and re-derive the recovery KEK from its BIP-39 seed.
//!
//! # Security
//!
//! - 256-bit entropy, standard checksum, English word list.
//! - An optional BIP-39 passphrase ("25th word") folds into both seed
//!   derivations; without it the stored words do not decrypt.
//! - Wrong challenge words and a wrong passphrase are indistinguishable.
//! - All intermediate seeds and sentences are zeroed before return.

use bip39::{Language, Mnemonic};
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::crypto::{self, Argon2Params, NONCE_LEN, SALT_LEN};
use crate::error::{VaultError, VaultResult};
use crate::keys::{self, SecretKey};

/// Total words in the recovery mnemonic (256-bit entropy).
pub const MNEMONIC_WORDS: usize = 24;
/// Words the user must supply during recovery.
pub const CHALLENGE_WORDS: usize = 6;
/// Words encrypted into the vault.
pub const STORED_WORDS: usize = MNEMONIC_WORDS - CHALLENGE_WORDS;

/// AAD binding the stored-words ciphertext to its role.
const STORED_WORDS_AAD: &[u8] = b"pass-cli.recovery.stored-words.v1";

/// Current recovery metadata version.
const RECOVERY_VERSION: u8 = 1;

/// KDF parameters for the two recovery derivations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryKdfParams {
    pub algo: String,
    #[serde(flatten)]
    pub argon2: Argon2Params,
    /// Salt for the challenge-key derivation (base64, 32 bytes).
    pub salt_challenge: String,
    /// Salt for the recovery-KEK derivation (base64, 32 bytes).
    pub salt_recovery: String,
}

/// Recovery state stored in the vault header (v2 only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryMetadata {
    pub enabled: bool,
    pub passphrase_required: bool,
    /// 6 unique indices in [0, 23], sorted ascending.
    pub challenge_positions: Vec<u8>,
    /// AES-256-GCM ciphertext (tag appended) of the 18 space-joined
    /// non-challenge words, base64.
    pub encrypted_stored_words: String,
    /// Nonce for the stored-words encryption, base64.
    pub stored_words_nonce: String,
    pub kdf: RecoveryKdfParams,
    pub version: u8,
}

/// What `setup` hands back: shown to the user exactly once.
pub struct RecoveryHandout {
    /// The full 24-word phrase, zeroed on drop.
    pub mnemonic: Zeroizing<String>,
    /// The positions the user will be asked for (0-based, sorted).
    pub challenge_positions: Vec<u8>,
}

/// Generate a mnemonic and the recovery state for a new (or migrating)
/// vault. Returns the handout, the recovery KEK, and the metadata to embed
/// in the envelope.
pub fn setup(passphrase: Option<&str>) -> VaultResult<(RecoveryHandout, SecretKey, RecoveryMetadata)> {
    setup_with_params(passphrase, Argon2Params::default())
}

/// [`setup`] with explicit Argon2 parameters. Tests use reduced costs.
pub fn setup_with_params(
    passphrase: Option<&str>,
    argon2: Argon2Params,
) -> VaultResult<(RecoveryHandout, SecretKey, RecoveryMetadata)> {
    let mut entropy = crypto::random_array::<32>();
    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|e| VaultError::Corrupted(format!("mnemonic generation: {e}")))?;
    entropy.zeroize();

    let phrase = Zeroizing::new(mnemonic.to_string());
    let words: Vec<&str> = phrase.split_whitespace().collect();
    debug_assert_eq!(words.len(), MNEMONIC_WORDS);

    let positions = select_verify_positions(CHALLENGE_WORDS);
    let pass = passphrase.unwrap_or("");

    // Challenge key: BIP-39 seed of the 6 challenge words (ascending
    // position order), then Argon2id.
    let challenge_sentence = Zeroizing::new(join_positions(&words, &positions, true));
    let mut challenge_seed = crypto::bip39_seed(&challenge_sentence, pass);
    let salt_challenge = crypto::random_bytes(SALT_LEN);
    let challenge_key = keys::derive_recovery_kek(&challenge_seed, &salt_challenge, &argon2)
        .map_err(|e| VaultError::Corrupted(format!("challenge key derivation: {e}")))?;
    challenge_seed.zeroize();

    // Encrypt the 18 non-challenge words under the challenge key.
    let stored_sentence = Zeroizing::new(join_positions(&words, &positions, false));
    let nonce = crypto::random_array::<NONCE_LEN>();
    let encrypted = crypto::seal(
        challenge_key.as_bytes(),
        &nonce,
        stored_sentence.as_bytes(),
        STORED_WORDS_AAD,
    )
    .map_err(|e| VaultError::Corrupted(format!("stored-words encryption: {e}")))?;

    // Recovery KEK: BIP-39 seed of the full phrase, then Argon2id.
    let mut full_seed = crypto::bip39_seed(&phrase, pass);
    let salt_recovery = crypto::random_bytes(SALT_LEN);
    let recovery_kek = keys::derive_recovery_kek(&full_seed, &salt_recovery, &argon2)
        .map_err(|e| VaultError::Corrupted(format!("recovery KEK derivation: {e}")))?;
    full_seed.zeroize();

    let metadata = RecoveryMetadata {
        enabled: true,
        passphrase_required: passphrase.is_some_and(|p| !p.is_empty()),
        challenge_positions: positions.clone(),
        encrypted_stored_words: BASE64.encode(&encrypted),
        stored_words_nonce: BASE64.encode(nonce),
        kdf: RecoveryKdfParams {
            algo: "argon2id".to_string(),
            argon2,
            salt_challenge: BASE64.encode(&salt_challenge),
            salt_recovery: BASE64.encode(&salt_recovery),
        },
        version: RECOVERY_VERSION,
    };

    let handout = RecoveryHandout {
        mnemonic: phrase,
        challenge_positions: positions,
    };
    Ok((handout, recovery_kek, metadata))
}

/// Recover the recovery KEK from the 6 challenge words.
///
/// Wrong words, a wrong passphrase, and tampered ciphertext are all
/// reported as [`VaultError::WrongCredentials`]; only words missing from
/// the BIP-39 word list get a more specific error.
pub fn perform(
    user_words: &[String],
    passphrase: Option<&str>,
    metadata: &RecoveryMetadata,
) -> VaultResult<SecretKey> {
    if !metadata.enabled {
        return Err(VaultError::RecoveryDisabled);
    }
    if user_words.len() != CHALLENGE_WORDS {
        return Err(VaultError::InvalidWordCount {
            expected: CHALLENGE_WORDS,
            actual: user_words.len(),
        });
    }
    if metadata.challenge_positions.len() != CHALLENGE_WORDS {
        return Err(VaultError::Corrupted(
            "recovery metadata has a malformed challenge position set".into(),
        ));
    }

    let normalized: Vec<Zeroizing<String>> = user_words
        .iter()
        .map(|w| Zeroizing::new(w.trim().to_lowercase()))
        .collect();
    for word in &normalized {
        if !is_bip39_word(word) {
            return Err(VaultError::InvalidWord(word.to_string()));
        }
    }

    let pass = passphrase.unwrap_or("");
    let salt_challenge = decode_b64(&metadata.kdf.salt_challenge, "salt_challenge")?;
    let salt_recovery = decode_b64(&metadata.kdf.salt_recovery, "salt_recovery")?;
    let nonce = decode_b64(&metadata.stored_words_nonce, "stored_words_nonce")?;
    let encrypted = decode_b64(&metadata.encrypted_stored_words, "encrypted_stored_words")?;

    // Re-derive the challenge key from the user's words.
    let challenge_sentence = Zeroizing::new(
        normalized
            .iter()
            .map(|w| w.as_str())
            .collect::<Vec<_>>()
            .join(" "),
    );
    let mut challenge_seed = crypto::bip39_seed(&challenge_sentence, pass);
    let challenge_key =
        keys::derive_recovery_kek(&challenge_seed, &salt_challenge, &metadata.kdf.argon2)
            .map_err(|e| VaultError::Corrupted(format!("challenge key derivation: {e}")))?;
    challenge_seed.zeroize();

    // Decrypt the stored 18 words. Failure says nothing about which input
    // was wrong.
    let mut stored_plain = crypto::open(
        challenge_key.as_bytes(),
        &nonce,
        &encrypted,
        STORED_WORDS_AAD,
    )
    .map_err(|_| VaultError::WrongCredentials)?;
    let stored_sentence = Zeroizing::new(
        String::from_utf8(stored_plain.clone()).map_err(|_| VaultError::WrongCredentials)?,
    );
    stored_plain.zeroize();

    let stored_words: Vec<&str> = stored_sentence.split_whitespace().collect();
    if stored_words.len() != STORED_WORDS {
        return Err(VaultError::WrongCredentials);
    }

    // Interleave user words at the challenge positions.
    let mut full_words: Vec<&str> = Vec::with_capacity(MNEMONIC_WORDS);
    let mut user_iter = normalized.iter();
    let mut stored_iter = stored_words.iter();
    for pos in 0..MNEMONIC_WORDS as u8 {
        if metadata.challenge_positions.contains(&pos) {
            full_words.push(user_iter.next().map(|w| w.as_str()).unwrap_or_default());
        } else {
            full_words.push(stored_iter.next().copied().unwrap_or_default());
        }
    }
    let full_phrase = Zeroizing::new(full_words.join(" "));

    // Checksum validation catches a reassembly that cannot be the original
    // mnemonic; the failure stays opaque.
    Mnemonic::parse_in_normalized(Language::English, &full_phrase)
        .map_err(|_| VaultError::WrongCredentials)?;

    let mut full_seed = crypto::bip39_seed(&full_phrase, pass);
    let kek = keys::derive_recovery_kek(&full_seed, &salt_recovery, &metadata.kdf.argon2)
        .map_err(|e| VaultError::Corrupted(format!("recovery KEK derivation: {e}")))?;
    full_seed.zeroize();
    Ok(kek)
}

/// Choose `n` unique challenge positions uniformly from [0, 23], sorted.
pub fn select_verify_positions(n: usize) -> Vec<u8> {
    let mut positions: Vec<u8> =
        rand::seq::index::sample(&mut OsRng, MNEMONIC_WORDS, n.min(MNEMONIC_WORDS))
            .into_iter()
            .map(|i| i as u8)
            .collect();
    positions.sort_unstable();
    positions
}

/// Non-destructive shuffle, for quizzing the user in a random order.
pub fn shuffle_verify_positions(positions: &[u8]) -> Vec<u8> {
    let mut shuffled = positions.to_vec();
    shuffled.shuffle(&mut OsRng);
    shuffled
}

/// Post-setup backup check: the user re-enters the words at `positions`
/// and we compare against the real phrase in constant time.
pub fn verify_backup(mnemonic: &str, positions: &[u8], user_words: &[String]) -> VaultResult<()> {
    if user_words.len() != positions.len() {
        return Err(VaultError::InvalidWordCount {
            expected: positions.len(),
            actual: user_words.len(),
        });
    }
    let words: Vec<&str> = mnemonic.split_whitespace().collect();
    let mut ok = true;
    for (pos, supplied) in positions.iter().zip(user_words) {
        let expected = words.get(*pos as usize).copied().unwrap_or_default();
        let given = Zeroizing::new(supplied.trim().to_lowercase());
        ok &= crypto::ct_eq(expected.as_bytes(), given.as_bytes());
    }
    if ok {
        Ok(())
    } else {
        Err(VaultError::VerificationFailed)
    }
}

fn is_bip39_word(word: &str) -> bool {
    Language::English.word_list().iter().any(|w| *w == word)
}

fn join_positions(words: &[&str], positions: &[u8], at_positions: bool) -> String {
    words
        .iter()
        .enumerate()
        .filter(|(i, _)| positions.contains(&(*i as u8)) == at_positions)
        .map(|(_, w)| *w)
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_b64(value: &str, field: &str) -> VaultResult<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|_| VaultError::Corrupted(format!("recovery metadata field '{field}' is not valid base64")))
}
