//! Hashlock digests
//!
//! A hashlock is the keccak-256 digest of the maker's secret, carried as a
//! `0x`-prefixed 32-byte hex string. Secrets given as `0x` hex are hashed over
//! their decoded bytes, anything else over its UTF-8 bytes.

use sha3::{Digest, Keccak256};

pub const DIGEST_LEN: usize = 32;

/// Parse a `0x`-prefixed 32-byte hex digest
pub fn parse_digest(value: &str) -> Option<[u8; DIGEST_LEN]> {
    let hex_part = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X"))?;
    if hex_part.len() != DIGEST_LEN * 2 {
        return None;
    }

    let mut digest = [0u8; DIGEST_LEN];
    hex::decode_to_slice(hex_part, &mut digest).ok()?;
    Some(digest)
}

/// Canonical lowercase form of a digest string
pub fn normalize(value: &str) -> Option<String> {
    parse_digest(value).map(|d| format!("0x{}", hex::encode(d)))
}

/// Bytes that a secret commits to
fn secret_preimage(secret: &str) -> Vec<u8> {
    secret
        .strip_prefix("0x")
        .filter(|h| !h.is_empty() && h.len() % 2 == 0)
        .and_then(|h| hex::decode(h).ok())
        .unwrap_or_else(|| secret.as_bytes().to_vec())
}

pub fn hash_secret(secret: &str) -> [u8; DIGEST_LEN] {
    Keccak256::digest(secret_preimage(secret)).into()
}

/// Hashlock string for a secret
pub fn hashlock_for(secret: &str) -> String {
    format!("0x{}", hex::encode(hash_secret(secret)))
}

/// True iff `hash(secret) == hashlock`
pub fn verify(secret: &str, hashlock: &str) -> bool {
    match parse_digest(hashlock) {
        Some(expected) => hash_secret(secret) == expected,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak_of_empty_string() {
        assert_eq!(
            hashlock_for(""),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_hex_secret_hashes_decoded_bytes() {
        let secret = format!("0x{}", hex::encode(b"swap-secret"));
        assert_eq!(hash_secret(&secret), hash_secret("swap-secret"));
    }

    #[test]
    fn test_verify_is_case_insensitive_on_hashlock() {
        let lock = hashlock_for("s3cr3t").to_uppercase().replacen("0X", "0x", 1);
        assert!(verify("s3cr3t", &lock));
        assert!(!verify("wrong", &lock));
    }

    #[test]
    fn test_parse_digest_rejects_bad_lengths() {
        assert!(parse_digest("0x1234").is_none());
        assert!(parse_digest(&"a".repeat(64)).is_none());
        assert!(parse_digest(&format!("0x{}", "g".repeat(64))).is_none());
        assert!(parse_digest(&format!("0x{}", "ab".repeat(32))).is_some());
    }
}
