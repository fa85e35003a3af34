//! Filename codec.
//!
//! Cleartext names are encrypted per path component with AES-SIV, using the
//! parent directory id (and the optional vault pepper) as associated data.
//! SIV is deterministic, so the same name under the same parent always maps
//! to the same ciphertext name, which is what makes lookups possible without
//! enumerating the directory. Binding the name to its parent means a
//! ciphertext entry moved to another directory no longer decrypts, which
//! frustrates relocation attacks.
//!
//! The codec works on the bare name; `.c9r`/`.c9s` suffixes are appended and
//! stripped by callers.

use aes_siv::{siv::Aes256Siv, KeyInit};
use base64::{engine::general_purpose, Engine as _};
use data_encoding::BASE32;
use ring::digest;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

use crate::crypto::keys::MasterKey;
use crate::error::VaultError;

/// Errors of the filename codec.
#[derive(Debug, Error)]
pub enum NameError {
    /// The cleartext name cannot be encoded (empty or contains a separator).
    #[error("invalid cleartext name: {reason}")]
    InvalidName { reason: String },

    /// SIV decryption failed: tampering, wrong key, or a relocated entry.
    #[error("failed to authenticate name '{encrypted_name}' under directory {dir_id}")]
    AuthenticationFailed { encrypted_name: String, dir_id: String },

    /// The encoded name is not valid base64url.
    #[error("malformed base64 in encrypted name: {reason}")]
    Base64Decode { reason: String },

    /// The decrypted bytes are not UTF-8.
    #[error("decrypted name is not valid utf-8")]
    Utf8Decode,

    /// SIV encryption failed unexpectedly.
    #[error("name encryption failed")]
    EncryptionFailed,
}

impl From<NameError> for VaultError {
    fn from(e: NameError) -> Self {
        match e {
            NameError::InvalidName { reason } => VaultError::InvalidName { reason },
            NameError::AuthenticationFailed { encrypted_name, dir_id } => {
                VaultError::authentication_failed(format!(
                    "filename '{encrypted_name}' in directory {dir_id}"
                ))
            }
            NameError::Base64Decode { reason } => {
                VaultError::corrupted(format!("malformed encrypted name: {reason}"))
            }
            NameError::Utf8Decode => VaultError::corrupted("decrypted name is not utf-8"),
            NameError::EncryptionFailed => VaultError::corrupted("name encryption failed"),
        }
    }
}

fn check_cleartext_name(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::InvalidName { reason: "name is empty".into() });
    }
    if name.contains('/') || name.contains('\\') {
        return Err(NameError::InvalidName { reason: format!("name '{name}' contains a path separator") });
    }
    Ok(())
}

/// Encrypt a cleartext name under its parent directory id.
///
/// The name is NFC-normalized first so that platforms with differing
/// composition conventions agree on the ciphertext. Returns base64url with
/// padding, without any suffix.
pub fn encrypt_filename(
    name: &str,
    parent_dir_id: &str,
    pepper: Option<&[u8]>,
    master_key: &MasterKey,
) -> Result<String, NameError> {
    check_cleartext_name(name)?;
    let normalized: String = name.nfc().collect();

    master_key.with_siv_key(|key| {
        let mut cipher = Aes256Siv::new(key);
        let mut associated_data: Vec<&[u8]> = vec![parent_dir_id.as_bytes()];
        if let Some(pepper) = pepper {
            associated_data.push(pepper);
        }
        let encrypted = cipher
            .encrypt(&associated_data, normalized.as_bytes())
            .map_err(|_| NameError::EncryptionFailed)?;
        Ok(general_purpose::URL_SAFE.encode(&encrypted))
    })
}

/// Decrypt an encoded name under its parent directory id.
///
/// Accepts both padded and unpadded base64url and tolerates a trailing
/// `.c9r` suffix.
pub fn decrypt_filename(
    encrypted_name: &str,
    parent_dir_id: &str,
    pepper: Option<&[u8]>,
    master_key: &MasterKey,
) -> Result<String, NameError> {
    let base = encrypted_name.trim_end_matches(".c9r");

    let decoded = general_purpose::URL_SAFE
        .decode(base.as_bytes())
        .or_else(|_| general_purpose::URL_SAFE_NO_PAD.decode(base.as_bytes()))
        .map_err(|e| NameError::Base64Decode { reason: e.to_string() })?;

    master_key.with_siv_key(|key| {
        let mut cipher = Aes256Siv::new(key);
        let mut associated_data: Vec<&[u8]> = vec![parent_dir_id.as_bytes()];
        if let Some(pepper) = pepper {
            associated_data.push(pepper);
        }
        let decrypted = cipher.decrypt(&associated_data, &decoded).map_err(|_| {
            NameError::AuthenticationFailed {
                encrypted_name: encrypted_name.to_string(),
                dir_id: if parent_dir_id.is_empty() { "<root>".into() } else { parent_dir_id.into() },
            }
        })?;
        String::from_utf8(decrypted).map_err(|_| NameError::Utf8Decode)
    })
}

/// Hash a directory id into its storage location name.
///
/// The id is SIV-encrypted (with the pepper as the only associated data, if
/// configured), SHA-1 hashed, and BASE32-encoded, yielding 32 characters that
/// split into the `d/<2>/<30>` layout.
pub fn hash_dir_id(
    dir_id: &str,
    pepper: Option<&[u8]>,
    master_key: &MasterKey,
) -> Result<String, NameError> {
    master_key.with_siv_key(|key| {
        let mut cipher = Aes256Siv::new(key);
        let associated_data: Vec<&[u8]> = match pepper {
            Some(pepper) => vec![pepper],
            None => vec![],
        };
        let encrypted = cipher
            .encrypt(&associated_data, dir_id.as_bytes())
            .map_err(|_| NameError::EncryptionFailed)?;
        let hashed = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &encrypted);
        Ok(BASE32.encode(hashed.as_ref()))
    })
}

/// Hash a full encoded name for the shortened (`.c9s`) representation.
///
/// Base64url over the full 20-byte SHA-1, without the `.c9s` suffix.
pub fn create_c9s_name(full_encrypted_name: &str) -> String {
    let hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, full_encrypted_name.as_bytes());
    general_purpose::URL_SAFE.encode(hash.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> MasterKey {
        MasterKey::new([0x01; 32], [0x02; 32])
    }

    #[test]
    fn encryption_is_deterministic() {
        let key = test_key();
        let a = encrypt_filename("test.txt", "", None, &key).unwrap();
        let b = encrypt_filename("test.txt", "", None, &key).unwrap();
        assert_eq!(a, b);
        assert_eq!(decrypt_filename(&a, "", None, &key).unwrap(), "test.txt");
    }

    #[test]
    fn roundtrip_assorted_names() {
        let key = test_key();
        for name in [
            "simple.txt",
            "file with spaces.doc",
            "unicode-café.txt",
            ".hidden",
            "file.with.multiple.dots",
            "special!@#$%^&*()_+-=[]{};'",
        ] {
            let encrypted = encrypt_filename(name, "some-dir", None, &key).unwrap();
            let decrypted = decrypt_filename(&encrypted, "some-dir", None, &key).unwrap();
            assert_eq!(decrypted, name, "roundtrip failed for {name}");
        }
    }

    #[test]
    fn empty_name_is_invalid() {
        assert!(matches!(
            encrypt_filename("", "", None, &test_key()),
            Err(NameError::InvalidName { .. })
        ));
    }

    #[test]
    fn separators_are_invalid() {
        let key = test_key();
        assert!(matches!(
            encrypt_filename("a/b", "", None, &key),
            Err(NameError::InvalidName { .. })
        ));
        assert!(matches!(
            encrypt_filename("a\\b", "", None, &key),
            Err(NameError::InvalidName { .. })
        ));
    }

    #[test]
    fn parent_binding_is_enforced() {
        let key = test_key();
        let encrypted = encrypt_filename("test.txt", "parent-a", None, &key).unwrap();
        assert!(matches!(
            decrypt_filename(&encrypted, "parent-b", None, &key),
            Err(NameError::AuthenticationFailed { .. })
        ));
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let encrypted = encrypt_filename("test.txt", "", None, &test_key()).unwrap();
        let other = MasterKey::new([0x0E; 32], [0x0F; 32]);
        assert!(matches!(
            decrypt_filename(&encrypted, "", None, &other),
            Err(NameError::AuthenticationFailed { .. })
        ));
    }

    #[test]
    fn pepper_changes_ciphertext_and_binds() {
        let key = test_key();
        let plain = encrypt_filename("x.txt", "d", None, &key).unwrap();
        let peppered = encrypt_filename("x.txt", "d", Some(b"pepper"), &key).unwrap();
        assert_ne!(plain, peppered);
        assert_eq!(
            decrypt_filename(&peppered, "d", Some(b"pepper"), &key).unwrap(),
            "x.txt"
        );
        assert!(decrypt_filename(&peppered, "d", None, &key).is_err());
    }

    #[test]
    fn suffix_and_padding_are_tolerated() {
        let key = test_key();
        let encrypted = encrypt_filename("doc.pdf", "", None, &key).unwrap();
        let with_suffix = format!("{encrypted}.c9r");
        assert_eq!(decrypt_filename(&with_suffix, "", None, &key).unwrap(), "doc.pdf");
        let unpadded = encrypted.trim_end_matches('=');
        assert_eq!(decrypt_filename(unpadded, "", None, &key).unwrap(), "doc.pdf");
    }

    #[test]
    fn invalid_base64_is_reported() {
        assert!(matches!(
            decrypt_filename("spaces in base64.c9r", "", None, &test_key()),
            Err(NameError::Base64Decode { .. })
        ));
    }

    #[test]
    fn nfd_input_normalizes_to_nfc() {
        let key = test_key();
        let nfd = "cafe\u{0301}.txt";
        let nfc = "caf\u{00E9}.txt";
        let from_nfd = encrypt_filename(nfd, "", None, &key).unwrap();
        let from_nfc = encrypt_filename(nfc, "", None, &key).unwrap();
        assert_eq!(from_nfd, from_nfc);
        assert_eq!(decrypt_filename(&from_nfd, "", None, &key).unwrap(), nfc);
    }

    #[test]
    fn dir_id_hash_is_32_base32_chars() {
        let key = test_key();
        let hash = hash_dir_id("", None, &key).unwrap();
        assert_eq!(hash.len(), 32);
        for ch in hash.chars() {
            assert!(ch.is_ascii_uppercase() || ('2'..='7').contains(&ch), "bad char {ch}");
        }
    }

    #[test]
    fn dir_id_hash_distinguishes_ids_and_keys() {
        let key = test_key();
        let root = hash_dir_id("", None, &key).unwrap();
        let child = hash_dir_id("e9250eb8-078d-4fc0-8835-be92a313360c", None, &key).unwrap();
        assert_ne!(root, child);

        let other = MasterKey::new([0x0C; 32], [0x0D; 32]);
        assert_ne!(root, hash_dir_id("", None, &other).unwrap());
    }

    #[test]
    fn c9s_name_known_vectors() {
        // sha1 digests encoded as base64url with padding
        assert_eq!(create_c9s_name(""), "2jmj7l5rSw0yVb_vlWAYkK_YBwk=");
        assert_eq!(create_c9s_name("a"), "hvfkN_qlp_zhXR3cuerq6jd2Z7g=");
    }

    #[test]
    fn c9s_name_is_deterministic_and_short() {
        let a = create_c9s_name("very_long_encrypted_name.c9r");
        let b = create_c9s_name("very_long_encrypted_name.c9r");
        assert_eq!(a, b);
        assert_eq!(a.len(), 28);
    }
}
