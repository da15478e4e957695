use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Routes cancellation requests to running jobs.
///
/// Keys are job ids (custom id or remote upload id) plus the transfer id of
/// the part currently in flight, so a caller can cancel with either.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    /// Register `id` and return its job token; `None` while `id` is still live
    pub fn register(&self, id: &str) -> Option<CancellationToken> {
        let mut map = self.lock();
        if map.contains_key(id) {
            return None;
        }
        let token = CancellationToken::new();
        map.insert(id.to_string(), token.clone());
        Some(token)
    }

    /// Route `alias` to an existing token
    pub fn alias(&self, alias: &str, token: &CancellationToken) {
        self.lock().insert(alias.to_string(), token.clone());
    }

    pub fn remove(&self, id: &str) {
        if self.lock().remove(id).is_some() {
            debug!("Unregistered {}", id);
        }
    }

    /// Cancel the job behind `id`; false when nothing is registered under it
    pub fn cancel(&self, id: &str) -> bool {
        let token = self.lock().get(id).cloned();
        match token {
            Some(token) => {
                info!("Cancellation requested for {}", id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        // Entries are plain tokens, a poisoned map is still consistent
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
