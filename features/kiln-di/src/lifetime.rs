use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

use crate::{
    errors::{BuildError, ResolveError},
    kernel::Kernel,
    params::OverrideParameters,
    types::{Injectable, Instance, TypeInfo},
};

/// How long a built instance lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifetime {
    /// A fresh instance per resolution
    #[default]
    Transient,
    /// One instance per scope; nested scopes build their own
    Scoped,
    /// One instance per kernel, cached on the root scope
    Container,
}

/// Instance cache backing Scoped and Container lifetimes, keyed by
/// description id.
pub struct LifetimeScope {
    cache: Mutex<HashMap<u64, Instance>>,
    root: Option<Arc<LifetimeScope>>,
    /// Live descendant scopes, tracked on the root for cross-scope eviction
    children: Mutex<Vec<Weak<LifetimeScope>>>,
}

impl LifetimeScope {
    pub(crate) fn root_scope() -> Arc<Self> {
        Arc::new(LifetimeScope {
            cache: Mutex::new(HashMap::new()),
            root: None,
            children: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn nested(root: Arc<LifetimeScope>) -> Arc<Self> {
        // Nested scopes chain straight to the root; Container instances are
        // shared across every scope of the kernel.
        let root = root.root.clone().unwrap_or(root);
        let scope = Arc::new(LifetimeScope {
            cache: Mutex::new(HashMap::new()),
            root: Some(root.clone()),
            children: Mutex::new(Vec::new()),
        });
        root.children.lock().push(Arc::downgrade(&scope));
        scope
    }

    /// The scope holding Container instances
    pub(crate) fn container_scope(&self) -> &LifetimeScope {
        self.root.as_deref().unwrap_or(self)
    }

    /// Return the cached instance for the key, building and caching it on a
    /// miss. The build runs outside the cache lock; a racing build for the
    /// same key keeps the first insert.
    pub(crate) fn get_or_build(
        &self,
        key: u64,
        build: impl FnOnce() -> Result<Instance, BuildError>,
    ) -> Result<Instance, BuildError> {
        if let Some(cached) = self.cache.lock().get(&key) {
            return Ok(cached.clone());
        }

        let built = build()?;
        let mut cache = self.cache.lock();
        Ok(cache.entry(key).or_insert(built).clone())
    }

    pub(crate) fn evict(&self, key: u64) {
        self.cache.lock().remove(&key);
    }

    /// Evict the key from this scope and every live descendant scope,
    /// pruning dropped scopes along the way.
    pub(crate) fn evict_everywhere(&self, key: u64) {
        self.evict(key);
        self.children.lock().retain(|weak| match weak.upgrade() {
            Some(child) => {
                child.evict(key);
                true
            }
            None => false,
        });
    }

    pub(crate) fn clear(&self) {
        self.cache.lock().clear();
    }
}

/// A resolution scope: resolves against the kernel's catalog while caching
/// Scoped instances locally. Dropping the scope releases its cache.
pub struct Scope {
    kernel: Kernel,
    scope: Arc<LifetimeScope>,
}

impl Scope {
    pub(crate) fn new(kernel: Kernel, scope: Arc<LifetimeScope>) -> Self {
        Scope { kernel, scope }
    }

    pub fn resolve<T: Injectable>(&self) -> Result<Arc<T>, ResolveError> {
        self.resolve_with(&OverrideParameters::None)
    }

    pub fn resolve_with<T: Injectable>(
        &self,
        overrides: &OverrideParameters,
    ) -> Result<Arc<T>, ResolveError> {
        let instance = self
            .kernel
            .resolve_in(&self.scope, TypeInfo::of::<T>(), overrides)?;
        self.kernel.downcast(instance)
    }

    /// Like [`resolve`](Self::resolve) but an empty catalog is `Ok(None)`;
    /// every other failure still surfaces.
    pub fn try_resolve<T: Injectable>(&self) -> Result<Option<Arc<T>>, ResolveError> {
        match self.resolve::<T>() {
            Ok(instance) => Ok(Some(instance)),
            Err(ResolveError::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    pub fn resolve_all<T: Injectable>(&self) -> Result<Vec<Arc<T>>, ResolveError> {
        let instances = self.kernel.resolve_all_in(&self.scope, TypeInfo::of::<T>())?;
        instances
            .into_iter()
            .map(|instance| self.kernel.downcast(instance))
            .collect()
    }

    /// A fresh nested scope with its own Scoped cache
    pub fn begin_scope(&self) -> Scope {
        Scope::new(self.kernel.clone(), LifetimeScope::nested(self.scope.clone()))
    }

    /// Drop the scope's cached instances eagerly
    pub fn dispose(self) {
        self.scope.clear();
    }
}
