use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
};

use parking_lot::Mutex;

use crate::{
    description::ObjectDescription,
    errors::{BuildError, ResolveError},
    kernel::Kernel,
    lifetime::LifetimeScope,
    params::OverrideParameters,
    types::{Injectable, Instance, TypeInfo},
};

/// Member fix-up queued on an in-flight ancestor, run once its instance exists
pub(crate) type DeferredInjection = Box<dyn FnOnce(&Instance) -> Result<(), BuildError> + Send>;

/// Instances completed anywhere in one logical build, keyed by description
/// id. Viral contexts record into it so a later sibling request for the same
/// description reuses the instance instead of building a second one.
type SharedInstances = Arc<Mutex<HashMap<u64, Instance>>>;

/// One node of the in-flight build stack.
///
/// Contexts form a singly linked list rooted at a lifetime scope; the chain
/// is owned by the call stack that created it and never persisted. The walk
/// over the chain doubles as cycle detection and instance sharing.
pub struct InjectionContext<'a> {
    kernel: &'a Kernel,
    scope: &'a LifetimeScope,
    parent: Option<&'a InjectionContext<'a>>,
    description: Arc<ObjectDescription>,
    overrides: &'a OverrideParameters,
    viral: bool,
    shared: SharedInstances,
    instance: OnceLock<Instance>,
    deferred: Mutex<Vec<DeferredInjection>>,
}

impl<'a> InjectionContext<'a> {
    pub(crate) fn root(
        kernel: &'a Kernel,
        scope: &'a LifetimeScope,
        description: Arc<ObjectDescription>,
        overrides: &'a OverrideParameters,
        viral: bool,
    ) -> Self {
        InjectionContext {
            kernel,
            scope,
            parent: None,
            description,
            overrides,
            viral,
            shared: Arc::new(Mutex::new(HashMap::new())),
            instance: OnceLock::new(),
            deferred: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn child<'b>(
        &'b self,
        description: Arc<ObjectDescription>,
        overrides: &'b OverrideParameters,
        viral: bool,
    ) -> InjectionContext<'b> {
        InjectionContext {
            kernel: self.kernel,
            scope: self.scope,
            parent: Some(self),
            description,
            overrides,
            viral,
            shared: self.shared.clone(),
            instance: OnceLock::new(),
            deferred: Mutex::new(Vec::new()),
        }
    }

    pub fn kernel(&self) -> &Kernel {
        self.kernel
    }

    pub fn scope(&self) -> &LifetimeScope {
        self.scope
    }

    pub fn description(&self) -> &Arc<ObjectDescription> {
        &self.description
    }

    pub fn overrides(&self) -> &OverrideParameters {
        self.overrides
    }

    /// Whether this context keeps propagating shareability up the chain
    pub fn is_viral(&self) -> bool {
        self.viral
    }

    /// The instance once the constructor has finished; member injection may
    /// still be pending.
    pub fn instance(&self) -> Option<Instance> {
        self.instance.get().cloned()
    }

    /// An instance already completed for this description anywhere in the
    /// current logical build.
    pub(crate) fn shared_instance(&self, description_id: u64) -> Option<Instance> {
        self.shared.lock().get(&description_id).cloned()
    }

    /// Walk this context and its ancestors for one already building the
    /// given description.
    pub fn find_ancestor(&self, description_id: u64) -> Option<&InjectionContext<'a>> {
        let mut current = Some(self);
        while let Some(node) = current {
            if node.description.id() == description_id {
                return Some(node);
            }
            current = node.parent;
        }
        None
    }

    /// Assign the constructed instance (at most once) and run any member
    /// fix-ups that were waiting for it.
    pub(crate) fn assign(&self, instance: Instance) -> Result<(), BuildError> {
        if self.viral {
            self.shared
                .lock()
                .insert(self.description.id(), instance.clone());
        }
        if self.instance.set(instance).is_err() {
            tracing::warn!(
                "instance of '{}' was assigned twice; keeping the first",
                self.description
            );
        }

        let pending = std::mem::take(&mut *self.deferred.lock());
        if !pending.is_empty() {
            tracing::trace!(
                "running {} deferred injections against '{}'",
                pending.len(),
                self.description
            );
        }
        // The slot was just filled; read it back so late assigns stay benign.
        let assigned = match self.instance.get() {
            Some(instance) => instance.clone(),
            None => return Ok(()),
        };
        for fixup in pending {
            fixup(&assigned)?;
        }
        Ok(())
    }

    /// Queue a fix-up for when this context's instance is assigned; runs
    /// immediately if it already is.
    pub(crate) fn defer(&self, fixup: DeferredInjection) -> Result<(), BuildError> {
        let mut pending = self.deferred.lock();
        match self.instance.get() {
            Some(instance) => {
                let instance = instance.clone();
                drop(pending);
                fixup(&instance)
            }
            None => {
                pending.push(fixup);
                Ok(())
            }
        }
    }

    /// Resolve a dependency as part of this build; the resulting instance
    /// participates in the chain's cycle detection and sharing.
    pub fn resolve<T: Injectable>(&self) -> Result<Arc<T>, BuildError> {
        let target = TypeInfo::of::<T>();
        let instance = self.kernel.build_dependency(self, target)?;
        instance.downcast::<T>().map_err(|actual| BuildError::Dependency {
            parent: self.description.contract(),
            target,
            source: Box::new(ResolveError::DowncastFailed {
                required_type: std::any::type_name::<T>(),
                actual_type: actual,
            }),
        })
    }

    /// Resolve every valid candidate of a contract, possibly none
    pub fn resolve_all<T: Injectable>(&self) -> Result<Vec<Arc<T>>, BuildError> {
        let target = TypeInfo::of::<T>();
        let instances = self.kernel.build_all_for(self, target)?;
        instances
            .into_iter()
            .map(|instance| {
                instance.downcast::<T>().map_err(|actual| BuildError::Dependency {
                    parent: self.description.contract(),
                    target,
                    source: Box::new(ResolveError::DowncastFailed {
                        required_type: std::any::type_name::<T>(),
                        actual_type: actual,
                    }),
                })
            })
            .collect()
    }

    /// Concrete types from the root of the chain down to this node,
    /// for cycle diagnostics.
    pub fn chain(&self) -> Vec<TypeInfo> {
        let mut chain = Vec::new();
        let mut current = Some(self);
        while let Some(node) = current {
            chain.push(node.description.concrete());
            current = node.parent;
        }
        chain.reverse();
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeInfo;

    struct A;
    struct B;
    struct C;

    fn harness() -> Kernel {
        Kernel::new()
    }

    #[test]
    fn ancestor_walk_finds_the_matching_description() {
        let kernel = harness();
        let scope = LifetimeScope::root_scope();
        let a = Arc::new(ObjectDescription::of::<A>());
        let b = Arc::new(ObjectDescription::of::<B>());
        let c = Arc::new(ObjectDescription::of::<C>());

        let none = OverrideParameters::None;
        let root = InjectionContext::root(&kernel, &scope, a.clone(), &none, true);
        let mid = root.child(b.clone(), &none, true);
        let leaf = mid.child(c.clone(), &none, true);

        let found = leaf.find_ancestor(a.id()).expect("root must be found");
        assert!(found.description().same(&a));
        assert!(leaf.find_ancestor(9_999_999).is_none());

        assert_eq!(
            leaf.chain(),
            vec![TypeInfo::of::<A>(), TypeInfo::of::<B>(), TypeInfo::of::<C>()]
        );
    }

    #[test]
    fn assign_runs_pending_fixups_once() {
        let kernel = harness();
        let scope = LifetimeScope::root_scope();
        let a = Arc::new(ObjectDescription::of::<A>());
        let none = OverrideParameters::None;
        let cx = InjectionContext::root(&kernel, &scope, a, &none, true);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        cx.defer(Box::new(move |instance| {
            sink.lock().push(instance.info().type_name);
            Ok(())
        }))
        .unwrap();
        assert!(seen.lock().is_empty());

        cx.assign(Instance::new(A)).unwrap();
        assert_eq!(seen.lock().len(), 1);

        // After assignment a deferral runs immediately
        let sink = seen.clone();
        cx.defer(Box::new(move |instance| {
            sink.lock().push(instance.info().type_name);
            Ok(())
        }))
        .unwrap();
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn viral_assignment_is_visible_to_siblings() {
        let kernel = harness();
        let scope = LifetimeScope::root_scope();
        let root = Arc::new(ObjectDescription::of::<A>());
        let dep = Arc::new(ObjectDescription::of::<B>());
        let none = OverrideParameters::None;

        let cx = InjectionContext::root(&kernel, &scope, root, &none, true);
        {
            let first = cx.child(dep.clone(), &none, true);
            first.assign(Instance::new(B)).unwrap();
        }
        // A later sibling of the dropped child still sees the instance
        let second = cx.child(dep.clone(), &none, true);
        assert!(second.shared_instance(dep.id()).is_some());

        // Non-viral assignments stay private to their own context
        let quiet = Arc::new(ObjectDescription::of::<C>());
        let third = cx.child(quiet.clone(), &none, false);
        third.assign(Instance::new(C)).unwrap();
        assert!(cx.shared_instance(quiet.id()).is_none());
    }

    #[test]
    fn instance_slot_is_monotonic() {
        let kernel = harness();
        let scope = LifetimeScope::root_scope();
        let a = Arc::new(ObjectDescription::of::<A>());
        let none = OverrideParameters::None;
        let cx = InjectionContext::root(&kernel, &scope, a, &none, false);

        assert!(cx.instance().is_none());
        let first = Instance::new(A);
        cx.assign(first.clone()).unwrap();
        cx.assign(Instance::new(A)).unwrap();

        let kept = cx.instance().expect("assigned");
        assert!(kept.ptr_eq(&first));
    }
}
