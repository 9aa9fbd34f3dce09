//! In-memory doubles for the identity store and verifier.

use crate::store::IdentityStore;
use crate::verifier::IdentityVerifier;
use keygate_core::{GateError, GateResult};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Key → login map with a switchable outage.
#[derive(Default)]
pub struct MockStore {
    keys: HashMap<Vec<u8>, String>,
    failing: AtomicBool,
    lookups: AtomicUsize,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: &[u8], login: &str) -> Self {
        self.keys.insert(key.to_vec(), login.to_string());
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl IdentityStore for MockStore {
    fn lookup<'a>(
        &'a self,
        public_key: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = GateResult<Option<String>>> + Send + 'a>> {
        Box::pin(async move {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(GateError::Store("connection refused".into()));
            }
            Ok(self.keys.get(public_key).cloned())
        })
    }
}

/// Login → owned keys map with a switchable outage.
#[derive(Default)]
pub struct MockVerifier {
    owners: HashMap<String, Vec<Vec<u8>>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_owner(mut self, login: &str, key: &[u8]) -> Self {
        self.owners
            .entry(login.to_string())
            .or_default()
            .push(key.to_vec());
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl IdentityVerifier for MockVerifier {
    fn verify<'a>(
        &'a self,
        login: &'a str,
        public_keys: &'a [Vec<u8>],
    ) -> Pin<Box<dyn Future<Output = GateResult<bool>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(GateError::Verifier("upstream unavailable".into()));
            }
            Ok(self
                .owners
                .get(login)
                .map(|owned| public_keys.iter().any(|k| owned.contains(k)))
                .unwrap_or(false))
        })
    }
}
