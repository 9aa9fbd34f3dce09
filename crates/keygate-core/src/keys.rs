//! SSH public key encodings.
//!
//! Identity lookups compare keys by their exact SSH wire encoding
//! (`string algorithm || key-specific fields`), never by fingerprint.
//! This module converts OpenSSH text lines (`ssh-ed25519 AAAA... comment`)
//! into that encoding.

use crate::error::{GateError, GateResult};
use ssh_key::PublicKey;

/// A parsed OpenSSH public key line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyLine {
    /// Key algorithm (e.g., "ssh-ed25519").
    pub algorithm: String,
    /// SSH wire encoding of the key.
    pub wire: Vec<u8>,
}

/// Parse a single OpenSSH public key line into its wire encoding.
pub fn parse_public_key_line(line: &str) -> GateResult<PublicKeyLine> {
    let line = line.trim();
    if line.is_empty() {
        return Err(GateError::InvalidKey("empty key line".into()));
    }

    let key = PublicKey::from_openssh(line)?;
    let wire = key.to_bytes()?;

    Ok(PublicKeyLine {
        algorithm: key.algorithm().to_string(),
        wire,
    })
}

/// Read the algorithm name from the head of a wire-encoded key.
///
/// SSH wire format: `[4-byte len][algorithm][...key fields]`
pub fn algorithm_of(wire: &[u8]) -> Option<&str> {
    if wire.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes([wire[0], wire[1], wire[2], wire[3]]) as usize;
    let name = wire.get(4..4 + len)?;
    std::str::from_utf8(name).ok()
}
