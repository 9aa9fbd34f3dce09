//! Per-connection session state and the registry that holds it.

pub mod registry;

pub use registry::{
    AuthMethod, ConnectionKey, MemoryRegistry, SessionGuard, SessionRegistry, SessionState,
};
