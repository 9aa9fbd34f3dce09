//! Authentication: the gate that decides each credential, and the rate
//! limits guarding the interactive path.

pub mod gate;
pub mod rate_limit;

pub use gate::{AuthenticationGate, Credential, Verdict};
pub use rate_limit::ServerRateLimits;
