use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::key::MetricKey;
use crate::registry::{Registry, RegistryBuilder, RegistryError};

/// A registry of [`Registry`] instances, shared by identity.
///
/// Call sites that build a registry with the same prefix and default tags converge on one shared
/// instance, and with it on one set of listeners and background workers. Use [`Registries::global`]
/// for the process-wide instance, or create a dedicated one to isolate tests.
///
/// # Example
///
/// ```
/// use tally_metrics::{Registries, RegistryBuilder};
///
/// let registries = Registries::new();
/// let a = registries.get_or_build(RegistryBuilder::new("shop", "web", "prod")).unwrap();
/// let b = registries.get_or_build(RegistryBuilder::new("SHOP", "Web", "prod")).unwrap();
/// assert!(a.ptr_eq(&b));
/// ```
pub struct Registries {
    caching: AtomicBool,
    registries: papaya::HashMap<MetricKey, Registry>,
}

impl Registries {
    /// Creates an empty set with caching enabled.
    pub fn new() -> Self {
        Self {
            caching: AtomicBool::new(true),
            registries: papaya::HashMap::new(),
        }
    }

    /// The process-wide instance.
    pub fn global() -> &'static Registries {
        static GLOBAL: OnceLock<Registries> = OnceLock::new();
        GLOBAL.get_or_init(Registries::new)
    }

    /// Returns the registry with the builder's identity, building it if absent.
    ///
    /// When a registry with the same prefix and default tags already exists, it is returned as
    /// is and the rest of the builder's settings are ignored. With caching disabled, every call
    /// builds a fresh registry.
    pub fn get_or_build(&self, builder: RegistryBuilder) -> Result<Registry, RegistryError> {
        let identity = builder.identity()?;
        if !self.caching_enabled() {
            return builder.build();
        }

        let registries = self.registries.pin();
        if let Some(registry) = registries.get(&identity) {
            return Ok(registry.clone());
        }

        let registry = builder.build()?;
        Ok(match registries.try_insert(identity, registry) {
            Ok(inserted) => inserted.clone(),
            Err(occupied) => occupied.current.clone(),
        })
    }

    /// Returns the cached registry with the given identity.
    pub fn get(&self, identity: &MetricKey) -> Option<Registry> {
        self.registries.pin().get(identity).cloned()
    }

    /// Returns any cached registry with the given prefix.
    pub fn find_by_prefix(&self, prefix: &str) -> Option<Registry> {
        self.registries
            .pin()
            .iter()
            .find(|(identity, _)| identity.name() == prefix)
            .map(|(_, registry)| registry.clone())
    }

    /// Enables or disables sharing of registries.
    ///
    /// Disabling does not evict registries that are already cached.
    pub fn set_caching_enabled(&self, enabled: bool) {
        self.caching.store(enabled, Ordering::Relaxed);
    }

    /// Returns `true` if registries are shared.
    pub fn caching_enabled(&self) -> bool {
        self.caching.load(Ordering::Relaxed)
    }

    /// Stops the listeners of all cached registries and forgets them.
    pub fn reset(&self) {
        let registries = self.registries.pin();
        for (_, registry) in registries.iter() {
            registry.remove_all_listeners();
        }
        registries.clear();
    }

    /// Number of cached registries.
    pub fn len(&self) -> usize {
        self.registries.len()
    }

    /// Returns `true` if no registry is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registries")
            .field("caching", &self.caching_enabled())
            .field("num_registries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::testutils::CapturingListener;

    use super::*;

    #[test]
    fn test_same_identity_is_shared() {
        let registries = Registries::new();
        let a = registries
            .get_or_build(RegistryBuilder::new("shop", "web", "prod").host("a"))
            .unwrap();
        let b = registries
            .get_or_build(RegistryBuilder::new("shop", "web", "prod").host("A"))
            .unwrap();
        let other = registries
            .get_or_build(RegistryBuilder::new("shop", "web", "prod").host("b"))
            .unwrap();

        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&other));
        assert_eq!(registries.len(), 2);

        // Listeners added through one call site are seen through the other.
        let listener = CapturingListener::new();
        a.add_listener(listener.clone());
        b.event("x");
        assert_eq!(listener.len(), 1);
    }

    #[test]
    fn test_lookup() {
        let registries = Registries::new();
        let registry = registries
            .get_or_build(RegistryBuilder::new("shop", "web", "prod"))
            .unwrap();

        let found = registries.get(&registry.identity()).unwrap();
        assert!(found.ptr_eq(&registry));

        let found = registries.find_by_prefix("shop.web.prod.").unwrap();
        assert!(found.ptr_eq(&registry));
        assert!(registries.find_by_prefix("shop.web.dev.").is_none());
    }

    #[test]
    fn test_caching_disabled() {
        let registries = Registries::new();
        registries.set_caching_enabled(false);

        let a = registries
            .get_or_build(RegistryBuilder::new("shop", "web", "prod"))
            .unwrap();
        let b = registries
            .get_or_build(RegistryBuilder::new("shop", "web", "prod"))
            .unwrap();

        assert!(!a.ptr_eq(&b));
        assert!(registries.is_empty());
    }

    #[test]
    fn test_invalid_identity_is_not_cached() {
        let registries = Registries::new();
        let result = registries.get_or_build(RegistryBuilder::new("shop.eu", "web", "prod"));
        assert!(result.is_err());
        assert!(registries.is_empty());
    }

    #[test]
    fn test_reset() {
        let registries = Registries::new();
        let registry = registries
            .get_or_build(RegistryBuilder::new("shop", "web", "prod"))
            .unwrap();
        let listener = CapturingListener::new();
        registry.add_listener(listener.clone());

        registries.reset();
        assert!(registries.is_empty());
        assert!(listener.is_stopped());

        let fresh = registries
            .get_or_build(RegistryBuilder::new("shop", "web", "prod"))
            .unwrap();
        assert!(!fresh.ptr_eq(&registry));
    }

    #[test]
    fn test_concurrent_get_or_build() {
        let registries = Arc::new(Registries::new());

        let built: Vec<Registry> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        registries
                            .get_or_build(RegistryBuilder::new("shop", "web", "prod"))
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for registry in &built {
            assert!(registry.ptr_eq(&built[0]));
        }
    }
}
