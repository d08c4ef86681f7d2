//! Master-password policy, strength estimation, and password generation.
//!
//! The strength estimator is an opaque collaborator behind a trait; the
//! built-in heuristic scores length and character-class spread. The policy
//! itself is hard: minimum 12 characters, no empty passwords, full stop.

use rand::rngs::OsRng;
use rand::Rng;
use zeroize::Zeroizing;

use crate::error::{VaultError, VaultResult};

/// Hard floor for the master password.
pub const MIN_MASTER_PASSWORD_LEN: usize = 12;

/// Default length for generated passwords.
pub const DEFAULT_GENERATED_LEN: usize = 20;

const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";
const SYMBOLS: &str = "!@#$%^&*()-_=+[]{};:,.<>?";

/// Strength tiers reported back to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StrengthTier {
    Weak,
    Medium,
    Strong,
}

impl std::fmt::Display for StrengthTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrengthTier::Weak => write!(f, "weak"),
            StrengthTier::Medium => write!(f, "medium"),
            StrengthTier::Strong => write!(f, "strong"),
        }
    }
}

/// Opaque strength estimator seam.
pub trait StrengthEstimator: Send + Sync {
    fn estimate(&self, password: &str) -> StrengthTier;
}

/// Built-in heuristic: character-class spread plus length.
pub struct HeuristicEstimator;

impl StrengthEstimator for HeuristicEstimator {
    fn estimate(&self, password: &str) -> StrengthTier {
        let classes = [
            password.chars().any(|c| c.is_ascii_lowercase()),
            password.chars().any(|c| c.is_ascii_uppercase()),
            password.chars().any(|c| c.is_ascii_digit()),
            password.chars().any(|c| !c.is_ascii_alphanumeric()),
        ]
        .iter()
        .filter(|&&b| b)
        .count();

        let len = password.chars().count();
        match (len, classes) {
            (l, c) if l >= 16 && c >= 3 => StrengthTier::Strong,
            (l, c) if l >= 12 && c >= 2 => StrengthTier::Medium,
            _ => StrengthTier::Weak,
        }
    }
}

/// Enforce the master-password policy. Strength is advisory; length is not.
pub fn validate_master_password(password: &str) -> VaultResult<StrengthTier> {
    if password.is_empty() {
        return Err(VaultError::InputInvalid("password must not be empty".into()));
    }
    if password.chars().count() < MIN_MASTER_PASSWORD_LEN {
        return Err(VaultError::InputInvalid(format!(
            "password must be at least {MIN_MASTER_PASSWORD_LEN} characters"
        )));
    }
    Ok(HeuristicEstimator.estimate(password))
}

/// Generate a random password. Guarantees at least one character from each
/// selected class when the length allows it.
pub fn generate_password(length: usize, symbols: bool) -> Zeroizing<String> {
    let mut charset = String::new();
    charset.push_str(LOWER);
    charset.push_str(UPPER);
    charset.push_str(DIGITS);
    if symbols {
        charset.push_str(SYMBOLS);
    }
    let chars: Vec<char> = charset.chars().collect();

    let mut classes: Vec<&str> = vec![LOWER, UPPER, DIGITS];
    if symbols {
        classes.push(SYMBOLS);
    }

    let mut out: Vec<char> = Vec::with_capacity(length);
    // Seed one character per class first so short passwords still mix.
    for class in classes.iter().take(length) {
        let class_chars: Vec<char> = class.chars().collect();
        out.push(class_chars[OsRng.gen_range(0..class_chars.len())]);
    }
    while out.len() < length {
        out.push(chars[OsRng.gen_range(0..chars.len())]);
    }
    // Shuffle so the class-seeded prefix is not predictable.
    for i in (1..out.len()).rev() {
        out.swap(i, OsRng.gen_range(0..=i));
    }
    Zeroizing::new(out.into_iter().collect())
}
