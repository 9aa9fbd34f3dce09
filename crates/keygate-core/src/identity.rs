//! Public key fingerprints for log lines.
//!
//! fingerprint = SHA-256 over the key's SSH wire encoding, hex encoded.
//! Logs carry the short form; the full form is only needed to correlate
//! with out-of-band tooling.

use sha2::{Digest, Sha256};

/// Number of hex characters kept by [`short_fingerprint`].
pub const SHORT_FINGERPRINT_LEN: usize = 16;

/// Compute the full hex-encoded SHA-256 fingerprint of a wire-encoded public key.
pub fn fingerprint(wire: &[u8]) -> String {
    let hash = Sha256::digest(wire);
    hex::encode(hash)
}

/// Truncate a full fingerprint for display.
pub fn short_fingerprint(fp: &str) -> &str {
    match fp.char_indices().nth(SHORT_FINGERPRINT_LEN) {
        Some((idx, _)) => &fp[..idx],
        None => fp,
    }
}
