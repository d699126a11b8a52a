//! Fixed-width content hash used as the cache key.

use std::fmt;

/// Width of a content hash in bytes.
pub const KEY_LEN: usize = 20;

/// A content hash: the fixed-width digest of a blob, used as its cache key.
///
/// The all-zero digest is reserved as the empty-slot sentinel in the hash
/// index and is rejected at insert. This assumes the digest function never
/// legitimately produces zero; see DESIGN.md.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; KEY_LEN]);

impl CacheKey {
    pub const ZERO: CacheKey = CacheKey([0; KEY_LEN]);

    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a key from a slice; `None` unless it is exactly [`KEY_LEN`]
    /// bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        Some(Self(bytes.try_into().ok()?))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// The digest split into three words for atomic slot storage. The third
    /// word only carries 32 significant bits.
    pub(crate) fn to_words(self) -> [u64; 3] {
        let b = &self.0;
        [
            u64::from_le_bytes(b[0..8].try_into().unwrap()),
            u64::from_le_bytes(b[8..16].try_into().unwrap()),
            u64::from(u32::from_le_bytes(b[16..20].try_into().unwrap())),
        ]
    }

    pub(crate) fn from_words(words: [u64; 3]) -> Self {
        let mut bytes = [0u8; KEY_LEN];
        bytes[0..8].copy_from_slice(&words[0].to_le_bytes());
        bytes[8..16].copy_from_slice(&words[1].to_le_bytes());
        bytes[16..20].copy_from_slice(&(words[2] as u32).to_le_bytes());
        Self(bytes)
    }

    /// 64-bit reduction fed to the multiplicative slot hash. Content hashes
    /// are uniform, so the leading word is enough.
    pub(crate) fn probe_seed(self) -> u64 {
        u64::from_le_bytes(self.0[0..8].try_into().unwrap())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_round_trip() {
        let mut bytes = [0u8; KEY_LEN];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(37).wrapping_add(1);
        }
        let key = CacheKey::new(bytes);
        assert_eq!(CacheKey::from_words(key.to_words()), key);
    }

    #[test]
    fn test_zero_sentinel() {
        assert!(CacheKey::ZERO.is_zero());
        assert!(!CacheKey::new([1; KEY_LEN]).is_zero());
        assert_eq!(CacheKey::from_words([0, 0, 0]), CacheKey::ZERO);
    }

    #[test]
    fn test_from_slice_length_check() {
        assert!(CacheKey::from_slice(&[0u8; 19]).is_none());
        assert!(CacheKey::from_slice(&[1u8; 20]).is_some());
        assert!(CacheKey::from_slice(&[0u8; 21]).is_none());
    }

    #[test]
    fn test_display_is_hex() {
        let key = CacheKey::new([0xab; KEY_LEN]);
        assert_eq!(key.to_string(), "ab".repeat(KEY_LEN));
    }
}
