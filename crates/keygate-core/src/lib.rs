//! keygate-core: shared library for the keygate SSH front end.
//!
//! Provides the error taxonomy, SSH public key wire-encoding helpers,
//! and key fingerprints used in logs.

pub mod error;
pub mod identity;
pub mod keys;

// Re-export commonly used items at crate root.
pub use error::{GateError, GateResult};
pub use identity::{fingerprint, short_fingerprint};
pub use keys::{algorithm_of, parse_public_key_line, PublicKeyLine};
