use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::{
    builder::ObjectBuilder,
    description::ObjectDescription,
    errors::ResolveError,
    kernel::Kernel,
    types::{Injectable, TypeInfo},
};

/// What happened to the usable candidate list of an observed contract.
///
/// Deltas track usability, not raw catalog membership: a dormant
/// registration emits nothing until it activates, and a cascade
/// deactivation counts as a removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverChange {
    /// A candidate became usable at the given rank position
    Added { position: usize },
    /// A candidate stopped being usable; position is where it used to sit
    Removed { position: usize },
}

/// One change notification delivered to contract observers
#[derive(Clone)]
pub struct ObserverEvent {
    pub description: Arc<ObjectDescription>,
    pub change: ObserverChange,
}

pub(crate) struct ObserverEntry {
    callback: Box<dyn Fn(&ObserverEvent) + Send + Sync>,
}

impl ObserverEntry {
    pub(crate) fn new(callback: impl Fn(&ObserverEvent) + Send + Sync + 'static) -> Self {
        ObserverEntry {
            callback: Box::new(callback),
        }
    }
}

pub(crate) type ObserverList = Arc<Mutex<Vec<Weak<ObserverEntry>>>>;

/// Deliver an event to every live observer of a contract.
///
/// Callbacks run outside the list lock so they may re-enter the kernel.
pub(crate) fn notify(observers: &ObserverList, event: &ObserverEvent) {
    let live: Vec<Arc<ObserverEntry>> = {
        let mut list = observers.lock();
        list.retain(|weak| weak.strong_count() > 0);
        list.iter().filter_map(Weak::upgrade).collect()
    };
    for entry in live {
        (entry.callback)(event);
    }
}

/// Subscription to candidate changes of one contract. Dropping the handle
/// ends the subscription.
pub struct ObserverHandle {
    kernel: Kernel,
    contract: TypeInfo,
    // Keeps the weak entry in the registry alive
    _entry: Arc<ObserverEntry>,
}

impl ObserverHandle {
    pub(crate) fn new(kernel: Kernel, contract: TypeInfo, entry: Arc<ObserverEntry>) -> Self {
        ObserverHandle {
            kernel,
            contract,
            _entry: entry,
        }
    }

    pub fn contract(&self) -> TypeInfo {
        self.contract
    }

    /// Snapshot of the currently usable candidates, in ranking order
    pub fn current(&self) -> Vec<BuilderRef> {
        self.kernel
            .builders_for(self.contract)
            .into_iter()
            .map(|builder| BuilderRef {
                kernel: self.kernel.clone(),
                builder,
            })
            .collect()
    }
}

/// Reference to one catalog candidate, resolvable for as long as the
/// registration stays valid.
pub struct BuilderRef {
    kernel: Kernel,
    builder: Arc<ObjectBuilder>,
}

impl BuilderRef {
    pub fn description(&self) -> &Arc<ObjectDescription> {
        self.builder.description()
    }

    /// Build through the captured builder; fails once the registration has
    /// been deactivated or removed.
    pub fn resolve<T: Injectable>(&self) -> Result<Arc<T>, ResolveError> {
        if !self.builder.relation().state().is_usable() {
            return Err(ResolveError::Obsolete(self.builder.description().contract()));
        }
        let instance = self.kernel.build_root(&self.builder)?;
        self.kernel.downcast(instance)
    }
}
