//! Data model: credentials, usage records, and zeroing secret buffers.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto;

/// A secret byte buffer that overwrites its memory on drop.
///
/// Secrets live in these buffers for their whole in-memory lifetime.
/// Conversion to an immutable `String` happens only at the clipboard and
/// keychain boundaries and is a documented leakable copy.
///
/// Inside the encrypted payload the buffer serializes as base64; the
/// plaintext never reaches an unencrypted file.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// View as UTF-8 for display or clipboard. Lossy conversion is fine
    /// here: stored passwords come in through UTF-8 terminal input.
    pub fn expose_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl PartialEq for SecretBytes {
    fn eq(&self, other: &Self) -> bool {
        crypto::ct_eq(&self.0, &other.0)
    }
}

impl Eq for SecretBytes {}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes(<{} bytes redacted>)", self.0.len())
    }
}

impl Serialize for SecretBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for SecretBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut encoded = String::deserialize(deserializer)?;
        let decoded = BASE64.decode(&encoded).map_err(D::Error::custom)?;
        encoded.zeroize();
        Ok(Self(decoded))
    }
}

/// Where (and how often) a credential was read.
///
/// Keyed by `location` in [`Credential::usage`]. Updated only by `get` and
/// field access, never by writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Directory the reading process ran from.
    pub location: String,
    /// Git repository root containing `location`, when one exists.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub git_repo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub line_number: Option<u32>,
    /// Most recent access.
    pub timestamp: DateTime<Utc>,
    pub access_count: u64,
    /// Per-field access counts (e.g. "password", "username", "totp").
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_counts: BTreeMap<String, u64>,
}

impl UsageRecord {
    pub fn new(location: String, git_repo: Option<String>) -> Self {
        Self {
            location,
            git_repo,
            line_number: None,
            timestamp: Utc::now(),
            access_count: 0,
            field_counts: BTreeMap::new(),
        }
    }

    pub fn record_access(&mut self) {
        self.access_count += 1;
        self.timestamp = Utc::now();
    }

    pub fn record_field(&mut self, field: &str) {
        *self.field_counts.entry(field.to_string()).or_insert(0) += 1;
        self.record_access();
    }
}

/// One stored secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Unique key within the vault. Non-empty.
    pub service: String,
    pub username: String,
    pub password: SecretBytes,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub totp_secret: Option<SecretBytes>,
    pub created_at: DateTime<Utc>,
    /// Always >= `created_at`.
    pub updated_at: DateTime<Utc>,
    /// Incremented on any field change.
    pub modified_count: u64,
    /// Usage records keyed by location path.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub usage: BTreeMap<String, UsageRecord>,
}

impl Credential {
    pub fn new(service: impl Into<String>, username: impl Into<String>, password: SecretBytes) -> Self {
        let now = Utc::now();
        Self {
            service: service.into(),
            username: username.into(),
            password,
            url: None,
            notes: None,
            category: None,
            totp_secret: None,
            created_at: now,
            updated_at: now,
            modified_count: 0,
            usage: BTreeMap::new(),
        }
    }

    pub fn touch_modified(&mut self) {
        self.updated_at = Utc::now();
        self.modified_count += 1;
    }
}

/// Partial update applied by `update`. `None` leaves a field untouched;
/// the double-`Option` clears an optional field with `Some(None)`.
#[derive(Debug, Default, Clone)]
pub struct CredentialPatch {
    pub username: Option<String>,
    pub password: Option<SecretBytes>,
    pub url: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub category: Option<Option<String>>,
    pub totp_secret: Option<Option<SecretBytes>>,
}

impl CredentialPatch {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.password.is_none()
            && self.url.is_none()
            && self.notes.is_none()
            && self.category.is_none()
            && self.totp_secret.is_none()
    }
}

/// Projected view returned by `list`: everything except secret bytes.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialMetadata {
    pub service: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub modified_count: u64,
    pub has_totp: bool,
    pub usage: BTreeMap<String, UsageRecord>,
}

impl From<&Credential> for CredentialMetadata {
    fn from(c: &Credential) -> Self {
        Self {
            service: c.service.clone(),
            username: c.username.clone(),
            url: c.url.clone(),
            category: c.category.clone(),
            created_at: c.created_at,
            updated_at: c.updated_at,
            modified_count: c.modified_count,
            has_totp: c.totp_secret.is_some(),
            usage: c.usage.clone(),
        }
    }
}

/// The decrypted payload: `service -> Credential`, ordered for stable
/// serialization.
pub type CredentialMap = BTreeMap<String, Credential>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_bytes_round_trips_through_json() {
        let secret = SecretBytes::from_str("hunter2!");
        let json = serde_json::to_string(&secret).unwrap();
        assert!(!json.contains("hunter2"), "plaintext leaked into JSON");
        let back: SecretBytes = serde_json::from_str(&json).unwrap();
        assert_eq!(secret, back);
    }

    #[test]
    fn secret_bytes_debug_is_redacted() {
        let secret = SecretBytes::from_str("topsecret");
        let debug = format!("{secret:?}");
        assert!(!debug.contains("topsecret"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn credential_map_round_trips() {
        let mut map = CredentialMap::new();
        let mut cred = Credential::new("github", "octocat", SecretBytes::from_str("p@ss"));
        cred.url = Some("https://github.com".into());
        map.insert(cred.service.clone(), cred);

        let json = serde_json::to_vec(&map).unwrap();
        let back: CredentialMap = serde_json::from_slice(&json).unwrap();
        assert_eq!(map, back);
    }

    #[test]
    fn usage_record_counts() {
        let mut rec = UsageRecord::new("/home/u/project".into(), None);
        rec.record_access();
        rec.record_access();
        assert_eq!(rec.access_count, 2);
        rec.record_field("password");
        rec.record_field("password");
        rec.record_field("username");
        assert_eq!(rec.field_counts["password"], 2);
        assert_eq!(rec.field_counts["username"], 1);
        assert_eq!(rec.access_count, 5);
    }

    #[test]
    fn touch_modified_moves_updated_at_forward() {
        let mut cred = Credential::new("svc", "user", SecretBytes::from_str("x"));
        let before = cred.updated_at;
        cred.touch_modified();
        assert!(cred.updated_at >= before);
        assert_eq!(cred.modified_count, 1);
        assert!(cred.updated_at >= cred.created_at);
    }

    #[test]
    fn metadata_projection_has_no_secret() {
        let mut cred = Credential::new("svc", "user", SecretBytes::from_str("sekrit"));
        cred.totp_secret = Some(SecretBytes::from_str("JBSWY3DP"));
        let meta = CredentialMetadata::from(&cred);
        let json = serde_json::to_string(&meta).unwrap();
        assert!(!json.contains("sekrit"));
        assert!(!json.contains("JBSWY3DP"));
        assert!(meta.has_totp);
    }
}
