//! Application state module
//!
//! Defines shared state accessible across all request handlers.

use std::sync::Arc;

use passkey_core::{KeyValueStore, RelyingParty, RelyingPartyConfig};

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    /// Relying-party protocol engine; its store also backs sessions
    pub rp: RelyingParty,
}

impl AppState {
    pub fn new(rp_config: RelyingPartyConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            rp: RelyingParty::new(rp_config, store),
        }
    }

    /// Key-value backend shared by the engine and the session layer.
    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        self.rp.store().clone()
    }
}
