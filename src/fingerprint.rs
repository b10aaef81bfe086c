use sha2::{Digest, Sha256};
use std::fmt::{Display, Write as _};
use std::ops::Deref;

use crate::normalize::fingerprint_text;

/// Bytes of the SHA-256 digest kept in a key (128 bits)
const KEY_BYTES: usize = 16;

/// Content fingerprint of a description: 32 lowercase hex characters.
///
/// Stable across runs, so it doubles as the downstream document id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey(String);

impl Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Deref for DedupKey {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DedupKey {
    /// Hash already-normalized text.
    pub fn from_normalized(normalized: &str) -> Self {
        let digest = Sha256::digest(normalized.as_bytes());

        let mut hex = String::with_capacity(KEY_BYTES * 2);
        for byte in &digest[..KEY_BYTES] {
            let _ = write!(hex, "{byte:02x}");
        }
        DedupKey(hex)
    }

    /// Normalize a raw description and hash it.
    pub fn for_description(description: &str, max_tokens: usize) -> Self {
        Self::from_normalized(&fingerprint_text(description, max_tokens))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_fixed_width_hex() {
        for text in ["", "a", "a much longer description of a wine"] {
            let key = DedupKey::for_description(text, 128);
            assert_eq!(key.len(), 32);
            assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn key_is_stable() {
        // first 16 bytes of sha256("")
        assert_eq!(
            DedupKey::from_normalized("").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb924"
        );
    }

    #[test]
    fn near_duplicates_share_a_key() {
        assert_eq!(
            DedupKey::for_description("A fine red wine", 128),
            DedupKey::for_description("  a   FINE red\twine ", 128)
        );
    }

    #[test]
    fn distinct_descriptions_differ() {
        assert_ne!(
            DedupKey::for_description("A fine red wine", 128),
            DedupKey::for_description("A fine white wine", 128)
        );
    }
}
