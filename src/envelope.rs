//! On-disk vault envelope.
//!
//! Layout:
//!
//! ```text
//! magic "PVLT" (4B) | format_version (u16 BE) | header_len (u32 BE)
//!   | header JSON | payload_nonce (12B) | payload ciphertext + tag
//! ```
//!
//! The header is JSON with binary fields base64-encoded. Version 1 carries a
//! single password wrapping of the DEK; version 2 adds the recovery wrapping
//! and its metadata. The payload is the AES-256-GCM encryption, under the
//! DEK, of the JSON credential map.
//!
//! The payload AAD binds the magic tag and the per-vault UUID but none of
//! the mutable header fields, so re-wrapping the DEK (change-password,
//! v1 -> v2 migration) never re-encrypts the payload.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::crypto::{self, NONCE_LEN, TAG_LEN};
use crate::error::{VaultError, VaultResult};
use crate::keys::{SecretKey, WrappedKey};
use crate::model::CredentialMap;
use crate::recovery::RecoveryMetadata;

/// File magic. Distinguishes the vault unambiguously from other formats.
pub const MAGIC: [u8; 4] = *b"PVLT";

/// Original format: password wrapping only.
pub const VERSION_V1: u16 = 1;
/// Current format: dual wrapping with recovery metadata.
pub const VERSION_V2: u16 = 2;

/// Per-vault UUID length (the AAD anchor for payload and wrappings).
pub const VAULT_UUID_LEN: usize = 16;

/// Fixed prefix: magic + version + header_len.
const PREFIX_LEN: usize = 4 + 2 + 4;

/// Upper bound on the JSON header; anything bigger is corruption.
const MAX_HEADER_LEN: usize = 64 * 1024;

/// Password-KDF parameters as stored in the header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KdfParams {
    pub algo: String,
    pub iterations: u32,
    /// base64, 32 bytes.
    pub salt: String,
}

impl KdfParams {
    pub fn pbkdf2(iterations: u32, salt: &[u8]) -> Self {
        Self {
            algo: "pbkdf2-sha256".to_string(),
            iterations,
            salt: BASE64.encode(salt),
        }
    }

    pub fn salt_bytes(&self) -> VaultResult<Vec<u8>> {
        decode_b64(&self.salt, "kdf.salt")
    }
}

/// JSON header of the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    /// base64, 16 random bytes minted at init; stable for the vault's life.
    pub vault_uuid: String,
    pub kdf: KdfParams,
    /// base64, 48 bytes (DEK ciphertext + tag) under the password KEK.
    pub wrapped_dek: String,
    /// base64, 12 bytes.
    pub wrapped_dek_nonce: String,
    /// v2 only: the same DEK under the recovery KEK.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub recovery_wrapped_dek: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub recovery_wrapped_dek_nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub recovery: Option<RecoveryMetadata>,
}

impl EnvelopeHeader {
    pub fn uuid_bytes(&self) -> VaultResult<Vec<u8>> {
        let uuid = decode_b64(&self.vault_uuid, "vault_uuid")?;
        if uuid.len() != VAULT_UUID_LEN {
            return Err(VaultError::Corrupted(format!(
                "vault UUID has {} bytes, expected {VAULT_UUID_LEN}",
                uuid.len()
            )));
        }
        Ok(uuid)
    }

    pub fn password_wrapping(&self) -> VaultResult<WrappedKey> {
        let ciphertext = decode_b64(&self.wrapped_dek, "wrapped_dek")?;
        let nonce = decode_b64(&self.wrapped_dek_nonce, "wrapped_dek_nonce")?;
        WrappedKey::from_parts(ciphertext, &nonce)
            .map_err(|e| VaultError::Corrupted(format!("password wrapping: {e}")))
    }

    pub fn recovery_wrapping(&self) -> VaultResult<Option<WrappedKey>> {
        let (Some(ct), Some(nonce)) = (&self.recovery_wrapped_dek, &self.recovery_wrapped_dek_nonce)
        else {
            return Ok(None);
        };
        let ciphertext = decode_b64(ct, "recovery_wrapped_dek")?;
        let nonce = decode_b64(nonce, "recovery_wrapped_dek_nonce")?;
        Ok(Some(
            WrappedKey::from_parts(ciphertext, &nonce)
                .map_err(|e| VaultError::Corrupted(format!("recovery wrapping: {e}")))?,
        ))
    }

    pub fn set_password_wrapping(&mut self, wrapped: &WrappedKey) {
        self.wrapped_dek = BASE64.encode(&wrapped.ciphertext);
        self.wrapped_dek_nonce = BASE64.encode(wrapped.nonce);
    }

    pub fn set_recovery_wrapping(&mut self, wrapped: &WrappedKey, metadata: RecoveryMetadata) {
        self.recovery_wrapped_dek = Some(BASE64.encode(&wrapped.ciphertext));
        self.recovery_wrapped_dek_nonce = Some(BASE64.encode(wrapped.nonce));
        self.recovery = Some(metadata);
    }
}

/// A decoded vault file.
#[derive(Debug, Clone, PartialEq)]
pub struct VaultEnvelope {
    pub version: u16,
    pub header: EnvelopeHeader,
    pub payload_nonce: [u8; NONCE_LEN],
    pub payload_ciphertext: Vec<u8>,
}

impl VaultEnvelope {
    /// Seal a credential map into a fresh envelope.
    pub fn seal(
        version: u16,
        header: EnvelopeHeader,
        dek: &SecretKey,
        credentials: &CredentialMap,
    ) -> VaultResult<Self> {
        let uuid = header.uuid_bytes()?;
        let mut plaintext = serde_json::to_vec(credentials)
            .map_err(|e| VaultError::Corrupted(format!("payload serialization: {e}")))?;
        let nonce = crypto::random_array::<NONCE_LEN>();
        let ciphertext = crypto::seal(dek.as_bytes(), &nonce, &plaintext, &payload_aad(&uuid))
            .map_err(|e| VaultError::Corrupted(format!("payload encryption: {e}")))?;
        plaintext.zeroize();
        Ok(Self {
            version,
            header,
            payload_nonce: nonce,
            payload_ciphertext: ciphertext,
        })
    }

    /// Decrypt the credential map. A wrong DEK surfaces as
    /// [`VaultError::WrongCredentials`], undecodable plaintext as
    /// [`VaultError::Corrupted`].
    pub fn open_payload(&self, dek: &SecretKey) -> VaultResult<CredentialMap> {
        let uuid = self.header.uuid_bytes()?;
        let mut plaintext = crypto::open(
            dek.as_bytes(),
            &self.payload_nonce,
            &self.payload_ciphertext,
            &payload_aad(&uuid),
        )
        .map_err(|_| VaultError::WrongCredentials)?;
        let map = serde_json::from_slice(&plaintext)
            .map_err(|e| VaultError::Corrupted(format!("payload decode: {e}")));
        plaintext.zeroize();
        map
    }

    /// Serialize to the on-disk byte layout.
    pub fn encode(&self) -> VaultResult<Vec<u8>> {
        let header_json = serde_json::to_vec(&self.header)
            .map_err(|e| VaultError::Corrupted(format!("header serialization: {e}")))?;
        if header_json.len() > MAX_HEADER_LEN {
            return Err(VaultError::Corrupted(format!(
                "header length {} exceeds the format bound",
                header_json.len()
            )));
        }

        let mut out = Vec::with_capacity(
            PREFIX_LEN + header_json.len() + NONCE_LEN + self.payload_ciphertext.len(),
        );
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&(header_json.len() as u32).to_be_bytes());
        out.extend_from_slice(&header_json);
        out.extend_from_slice(&self.payload_nonce);
        out.extend_from_slice(&self.payload_ciphertext);
        Ok(out)
    }

    /// Parse the on-disk layout. Refuses unknown versions before touching
    /// the header.
    pub fn decode(bytes: &[u8]) -> VaultResult<Self> {
        if bytes.len() < PREFIX_LEN {
            return Err(VaultError::Corrupted("file shorter than the fixed prefix".into()));
        }
        if bytes[..4] != MAGIC {
            return Err(VaultError::Corrupted("bad magic: not a vault file".into()));
        }
        let version = u16::from_be_bytes([bytes[4], bytes[5]]);
        if version != VERSION_V1 && version != VERSION_V2 {
            return Err(VaultError::UnsupportedVersion(version));
        }
        let header_len = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
        if header_len > MAX_HEADER_LEN {
            return Err(VaultError::Corrupted(format!(
                "declared header length {header_len} exceeds the format bound"
            )));
        }

        let header_end = PREFIX_LEN + header_len;
        let payload_start = header_end + NONCE_LEN;
        if bytes.len() < payload_start + TAG_LEN {
            return Err(VaultError::Corrupted("file truncated".into()));
        }

        let header: EnvelopeHeader = serde_json::from_slice(&bytes[PREFIX_LEN..header_end])
            .map_err(|e| VaultError::Corrupted(format!("header decode: {e}")))?;

        if version == VERSION_V2 && header.recovery_wrapped_dek.is_none() {
            return Err(VaultError::Corrupted(
                "v2 envelope is missing the recovery wrapping".into(),
            ));
        }

        let mut payload_nonce = [0u8; NONCE_LEN];
        payload_nonce.copy_from_slice(&bytes[header_end..payload_start]);
        Ok(Self {
            version,
            header,
            payload_nonce,
            payload_ciphertext: bytes[payload_start..].to_vec(),
        })
    }

    /// Decode freshly encoded bytes with the live DEK and compare the
    /// recovered map against the intended one. Gates the atomic rename.
    pub fn verify_roundtrip(encoded: &[u8], dek: &SecretKey, expected: &CredentialMap) -> bool {
        match Self::decode(encoded).and_then(|env| env.open_payload(dek)) {
            Ok(recovered) => &recovered == expected,
            Err(_) => false,
        }
    }

    /// v1 -> v2 upgrade: same DEK, same payload bytes, new dual wrapping.
    ///
    /// The caller has already unwrapped the DEK with the password KEK and
    /// run recovery setup; this only rebuilds the envelope around the
    /// existing ciphertext.
    pub fn migrate_v1_to_v2(
        &self,
        recovery_wrapping: &WrappedKey,
        recovery_metadata: RecoveryMetadata,
    ) -> VaultResult<Self> {
        if self.version != VERSION_V1 {
            return Err(VaultError::State(format!(
                "vault is already format version {}",
                self.version
            )));
        }
        let mut header = self.header.clone();
        header.set_recovery_wrapping(recovery_wrapping, recovery_metadata);
        Ok(Self {
            version: VERSION_V2,
            header,
            payload_nonce: self.payload_nonce,
            payload_ciphertext: self.payload_ciphertext.clone(),
        })
    }
}

/// AAD for the payload: magic plus vault UUID.
pub fn payload_aad(vault_uuid: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(MAGIC.len() + vault_uuid.len());
    aad.extend_from_slice(&MAGIC);
    aad.extend_from_slice(vault_uuid);
    aad
}

fn decode_b64(value: &str, field: &str) -> VaultResult<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|_| VaultError::Corrupted(format!("header field '{field}' is not valid base64")))
}
