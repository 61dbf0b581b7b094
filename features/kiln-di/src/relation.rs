use std::{any::TypeId, sync::Arc};

use parking_lot::Mutex;

use crate::provider::DependencyProvider;

/// Slab index of a builder inside the registry arena
pub(crate) type BuilderId = usize;

/// Registration lifecycle of one builder.
///
/// Only Registered and Activated builders are visible to lookups; the other
/// states exist so the cascade can reason about in-flight transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
    Activating,
    Activated,
    Deactivating,
    Deactivated,
    Unregistering,
}

impl RegistrationState {
    /// Whether lookups may hand this builder out
    pub fn is_usable(self) -> bool {
        matches!(self, RegistrationState::Registered | RegistrationState::Activated)
    }
}

impl std::fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RegistrationState::Unregistered => "unregistered",
            RegistrationState::Registering => "registering",
            RegistrationState::Registered => "registered",
            RegistrationState::Activating => "activating",
            RegistrationState::Activated => "activated",
            RegistrationState::Deactivating => "deactivating",
            RegistrationState::Deactivated => "deactivated",
            RegistrationState::Unregistering => "unregistering",
        };
        f.write_str(name)
    }
}

/// Per-builder bookkeeping for the registration cascade: lifecycle state,
/// reverse dependency edges, and the compiled providers.
pub(crate) struct ObjectRelation {
    state: Mutex<RegistrationState>,
    /// Builders whose providers depend on this builder's contract
    parents: Mutex<Vec<BuilderId>>,
    providers: Mutex<Vec<Arc<DependencyProvider>>>,
}

impl ObjectRelation {
    pub(crate) fn new(providers: Vec<Arc<DependencyProvider>>) -> Self {
        ObjectRelation {
            state: Mutex::new(RegistrationState::Registering),
            parents: Mutex::new(Vec::new()),
            providers: Mutex::new(providers),
        }
    }

    pub(crate) fn state(&self) -> RegistrationState {
        *self.state.lock()
    }

    pub(crate) fn transition(&self, to: RegistrationState) {
        let mut state = self.state.lock();
        tracing::trace!("registration state {} -> {}", *state, to);
        *state = to;
    }

    pub(crate) fn add_parent(&self, parent: BuilderId) {
        let mut parents = self.parents.lock();
        if !parents.contains(&parent) {
            parents.push(parent);
        }
    }

    pub(crate) fn remove_parent(&self, parent: BuilderId) {
        self.parents.lock().retain(|id| *id != parent);
    }

    pub(crate) fn parents(&self) -> Vec<BuilderId> {
        self.parents.lock().clone()
    }

    pub(crate) fn set_providers(&self, providers: Vec<Arc<DependencyProvider>>) {
        *self.providers.lock() = providers;
    }

    pub(crate) fn providers(&self) -> Vec<Arc<DependencyProvider>> {
        self.providers.lock().clone()
    }

    /// Flag every provider targeting the given contract as stale; they stay
    /// stale until a recompilation regenerates them.
    pub(crate) fn mark_obsolete_for(&self, target: TypeId) {
        for provider in self.providers.lock().iter() {
            if provider.target().type_id == target {
                provider.mark_obsolete();
            }
        }
    }
}
