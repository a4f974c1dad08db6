//! Ownership of the live context.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::error::{HeError, Result};
use crate::params::HeConfig;
use crate::store::CiphertextStore;

use super::Context;

/// Owns the current [`Context`] and keeps the store's active generation in
/// step with it.
///
/// Readers clone the `Arc` under a brief read lock and then work without
/// holding it. Installing a new context takes the write lock only for the
/// swap; key generation happens before.
pub struct ContextManager {
    current: RwLock<Option<Arc<Context>>>,
    store: Arc<CiphertextStore>,
}

impl ContextManager {
    pub fn new(store: Arc<CiphertextStore>) -> Self {
        Self {
            current: RwLock::new(None),
            store,
        }
    }

    /// Build a context from `config` and make it current.
    ///
    /// A previous context is torn down once the new one is ready, so a failed
    /// build leaves the old context in place.
    pub fn initialize(&self, config: HeConfig, required_depth: usize) -> Result<Arc<Context>> {
        let ctx = Arc::new(Context::new(config, required_depth)?);

        let mut current = self.current.write();
        if let Some(old) = current.take() {
            self.store.deactivate(old.id());
            info!(context = %old.id(), "replaced HE context");
        }
        self.store.activate(ctx.id());
        *current = Some(Arc::clone(&ctx));
        Ok(ctx)
    }

    /// The live context, or `NotInitialized`.
    pub fn current(&self) -> Result<Arc<Context>> {
        self.current.read().clone().ok_or(HeError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.current.read().is_some()
    }

    /// Drop the current context. Every handle created under it turns stale.
    pub fn teardown(&self) {
        let mut current = self.current.write();
        if let Some(old) = current.take() {
            self.store.deactivate(old.id());
            info!(context = %old.id(), "tore down HE context");
        }
    }

    pub fn store(&self) -> &Arc<CiphertextStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ContextManager {
        ContextManager::new(Arc::new(CiphertextStore::new()))
    }

    fn config() -> HeConfig {
        HeConfig {
            seed: Some(3),
            ..HeConfig::insecure_test(128)
        }
    }

    #[test]
    fn test_not_initialized() {
        let m = manager();
        assert!(!m.is_initialized());
        assert!(matches!(m.current(), Err(HeError::NotInitialized)));
    }

    #[test]
    fn test_initialize_and_teardown() {
        let m = manager();
        let ctx = m.initialize(config(), 2).unwrap();
        assert_eq!(m.current().unwrap().id(), ctx.id());
        assert_eq!(m.store().active(), Some(ctx.id()));

        m.teardown();
        assert!(matches!(m.current(), Err(HeError::NotInitialized)));
        assert_eq!(m.store().active(), None);
    }

    #[test]
    fn test_failed_reinit_keeps_old_context() {
        let m = manager();
        let ctx = m.initialize(config(), 0).unwrap();
        let bad = HeConfig {
            poly_degree: 100,
            ..config()
        };
        assert!(m.initialize(bad, 0).is_err());
        assert_eq!(m.current().unwrap().id(), ctx.id());
    }

    #[test]
    fn test_reinit_replaces_generation() {
        let m = manager();
        let first = m.initialize(config(), 0).unwrap();
        let handle = m.store().put(first.encrypt_values(&[1.0]).unwrap()).unwrap();

        let second = m.initialize(config(), 0).unwrap();
        assert_ne!(first.id(), second.id());
        assert!(matches!(m.store().get(&handle), Err(HeError::StaleContext(_))));
        assert!(m.store().is_empty());
    }
}
