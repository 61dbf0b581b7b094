use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    builder::ObjectBuilder,
    context::InjectionContext,
    description::ObjectDescription,
    errors::{BuildError, ResolveError},
    lifetime::{Lifetime, LifetimeScope, Scope},
    observer::{self, ObserverEntry, ObserverEvent, ObserverHandle},
    params::OverrideParameters,
    registry::{CascadeAction, CascadePlan, ObjectBuilderRegistry},
    relation::{BuilderId, RegistrationState},
    selection::CatalogProbe,
    strategy::ConstructionStrategy,
    types::{Injectable, Instance, TypeInfo},
};

type LifecycleCallback = dyn Fn(&Arc<ObjectDescription>) + Send + Sync;
type RequestCallback = dyn Fn(&Kernel, TypeInfo) + Send + Sync;

/// One registration to submit, see [`Kernel::register_batch`]
pub struct RegistrationRequest {
    description: ObjectDescription,
    strategy: Arc<dyn ConstructionStrategy>,
    lifetime: Lifetime,
}

impl RegistrationRequest {
    pub fn new(
        description: ObjectDescription,
        strategy: impl ConstructionStrategy + 'static,
        lifetime: Lifetime,
    ) -> Self {
        RegistrationRequest {
            description,
            strategy: Arc::new(strategy),
            lifetime,
        }
    }
}

/// Handle to one registration; pass it back to [`Kernel::unregister`]
pub struct Registration {
    id: BuilderId,
    description: Arc<ObjectDescription>,
}

impl Registration {
    pub fn description(&self) -> &Arc<ObjectDescription> {
        &self.description
    }
}

struct KernelInner {
    registry: ObjectBuilderRegistry,
    root_scope: Arc<LifetimeScope>,
    registered: Mutex<Vec<Arc<LifecycleCallback>>>,
    unregistering: Mutex<Vec<Arc<LifecycleCallback>>>,
    requested: Mutex<Vec<Arc<RequestCallback>>>,
}

/// The injection kernel: a catalog of object builders plus the machinery to
/// construct object graphs on demand.
///
/// Cloning is cheap and shares the same catalog.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl Kernel {
    pub fn new() -> Self {
        Kernel {
            inner: Arc::new(KernelInner {
                registry: ObjectBuilderRegistry::new(),
                root_scope: LifetimeScope::root_scope(),
                registered: Mutex::new(Vec::new()),
                unregistering: Mutex::new(Vec::new()),
                requested: Mutex::new(Vec::new()),
            }),
        }
    }

    // ---- registration ----------------------------------------------------

    pub fn register(
        &self,
        description: ObjectDescription,
        strategy: impl ConstructionStrategy + 'static,
        lifetime: Lifetime,
    ) -> Registration {
        let mut registrations =
            self.register_batch(vec![RegistrationRequest::new(description, strategy, lifetime)]);
        // One request in, one registration out
        registrations.remove(0)
    }

    /// Register several builders as one unit; members of the batch may
    /// depend on each other in any order.
    pub fn register_batch(&self, requests: Vec<RegistrationRequest>) -> Vec<Registration> {
        let builders: Vec<Arc<ObjectBuilder>> = requests
            .into_iter()
            .map(|request| {
                Arc::new(ObjectBuilder::new(
                    Arc::new(request.description),
                    request.strategy,
                    request.lifetime,
                ))
            })
            .collect();

        let plan = self.inner.registry.insert_batch(builders.clone());
        self.run_plan(plan);

        let registrations: Vec<Registration> = builders
            .iter()
            .map(|builder| Registration {
                id: builder.id(),
                description: builder.description().clone(),
            })
            .collect();

        let callbacks: Vec<Arc<LifecycleCallback>> = self.inner.registered.lock().clone();
        for registration in &registrations {
            for callback in &callbacks {
                callback(&registration.description);
            }
        }
        registrations
    }

    /// Remove a registration and deactivate everything that depended on it.
    pub fn unregister(&self, registration: Registration) {
        let callbacks: Vec<Arc<LifecycleCallback>> = self.inner.unregistering.lock().clone();
        for callback in &callbacks {
            callback(&registration.description);
        }

        if let Some((builder, plan)) = self.inner.registry.remove(registration.id) {
            // Drop cached Scoped/Container instances of the removed builder
            // from every live scope; Arcs held by callers stay alive.
            self.inner.root_scope.evict_everywhere(builder.description().id());
            self.run_plan(plan);
            builder.relation().transition(RegistrationState::Unregistered);
            tracing::debug!("unregistered {}", builder.description());
        }
    }

    // ---- resolution ------------------------------------------------------

    /// Resolve the single builder for `T` and build its object graph.
    pub fn resolve<T: Injectable>(&self) -> Result<Arc<T>, ResolveError> {
        self.resolve_with(&OverrideParameters::None)
    }

    /// Resolve with caller-supplied parameters applied to the root object
    /// of the graph only.
    pub fn resolve_with<T: Injectable>(
        &self,
        overrides: &OverrideParameters,
    ) -> Result<Arc<T>, ResolveError> {
        let instance =
            self.resolve_in(&self.inner.root_scope, TypeInfo::of::<T>(), overrides)?;
        self.downcast(instance)
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

    /// Build through one specific registration, bypassing candidate
    /// selection for its contract. Fails with [`ResolveError::Obsolete`]
    /// once the registration has been deactivated or removed.
    pub fn resolve_registration<T: Injectable>(
        &self,
        registration: &Registration,
    ) -> Result<Arc<T>, ResolveError> {
        let contract = registration.description.contract();
        let builder = self
            .inner
            .registry
            .get(registration.id)
            // Arena slots are reused; the description id pins the identity
            .filter(|builder| builder.description().id() == registration.description.id())
            .ok_or(ResolveError::Obsolete(contract))?;
        if !builder.relation().state().is_usable() {
            return Err(ResolveError::Obsolete(contract));
        }
        let instance = self.build_root(&builder)?;
        self.downcast(instance)
    }

    /// Build every valid candidate for `T`, in ascending ranking order.
    /// An empty catalog yields an empty vector.
    pub fn resolve_all<T: Injectable>(&self) -> Result<Vec<Arc<T>>, ResolveError> {
        let instances = self.resolve_all_in(&self.inner.root_scope, TypeInfo::of::<T>())?;
        instances
            .into_iter()
            .map(|instance| self.downcast(instance))
            .collect()
    }

    /// A nested resolution scope with its own Scoped instance cache
    pub fn begin_scope(&self) -> Scope {
        Scope::new(
            self.clone(),
            LifetimeScope::nested(self.inner.root_scope.clone()),
        )
    }

    // ---- events and observers -------------------------------------------

    /// Called after each registration has been activated
    pub fn on_registered(&self, callback: impl Fn(&Arc<ObjectDescription>) + Send + Sync + 'static) {
        self.inner.registered.lock().push(Arc::new(callback));
    }

    /// Called before a registration is removed from the catalog
    pub fn on_unregistering(
        &self,
        callback: impl Fn(&Arc<ObjectDescription>) + Send + Sync + 'static,
    ) {
        self.inner.unregistering.lock().push(Arc::new(callback));
    }

    /// Called when a lookup misses; the hook may register the missing
    /// contract on the spot and the lookup retries once.
    pub fn on_requested(&self, callback: impl Fn(&Kernel, TypeInfo) + Send + Sync + 'static) {
        self.inner.requested.lock().push(Arc::new(callback));
    }

    /// Observe candidate changes for the contract `T`. The subscription ends
    /// when the returned handle is dropped.
    pub fn observe<T: 'static + ?Sized>(
        &self,
        callback: impl Fn(&ObserverEvent) + Send + Sync + 'static,
    ) -> ObserverHandle {
        let contract = TypeInfo::of::<T>();
        let entry = Arc::new(ObserverEntry::new(callback));
        self.inner.registry.attach_observer(contract, &entry);
        ObserverHandle::new(self.clone(), contract, entry)
    }

    // ---- internal plumbing -----------------------------------------------

    pub(crate) fn resolve_in(
        &self,
        scope: &LifetimeScope,
        contract: TypeInfo,
        overrides: &OverrideParameters,
    ) -> Result<Instance, ResolveError> {
        let builder = self.lookup_single(contract)?;
        let instance = builder.build(self, scope, None, overrides)?;
        Ok(instance)
    }

    pub(crate) fn resolve_all_in(
        &self,
        scope: &LifetimeScope,
        contract: TypeInfo,
    ) -> Result<Vec<Instance>, ResolveError> {
        let builders = self.inner.registry.lookup_all(contract);
        let mut instances = Vec::with_capacity(builders.len());
        for builder in builders {
            instances.push(builder.build(self, scope, None, &OverrideParameters::None)?);
        }
        Ok(instances)
    }

    /// Build a dependency as a child of an in-flight construction.
    pub(crate) fn build_dependency(
        &self,
        cx: &InjectionContext<'_>,
        target: TypeInfo,
    ) -> Result<Instance, BuildError> {
        let builder = self.lookup_single(target).map_err(|error| {
            BuildError::Dependency {
                parent: cx.description().contract(),
                target,
                source: Box::new(error),
            }
        })?;
        builder.build(self, cx.scope(), Some(cx), &OverrideParameters::None)
    }

    pub(crate) fn build_all_for(
        &self,
        cx: &InjectionContext<'_>,
        target: TypeInfo,
    ) -> Result<Vec<Instance>, BuildError> {
        let builders = self.inner.registry.lookup_all(target);
        let mut instances = Vec::with_capacity(builders.len());
        for builder in builders {
            instances.push(builder.build(self, cx.scope(), Some(cx), &OverrideParameters::None)?);
        }
        Ok(instances)
    }

    /// The current single valid builder for a contract, if any
    pub(crate) fn lookup_valid(&self, target: TypeInfo) -> Option<Arc<ObjectBuilder>> {
        self.inner.registry.lookup_one(target).ok().flatten()
    }

    pub(crate) fn builders_for(&self, contract: TypeInfo) -> Vec<Arc<ObjectBuilder>> {
        self.inner.registry.lookup_all(contract)
    }

    /// Root-scope build through an explicit builder, for captured references
    pub(crate) fn build_root(&self, builder: &Arc<ObjectBuilder>) -> Result<Instance, ResolveError> {
        let instance = builder.build(
            self,
            &self.inner.root_scope,
            None,
            &OverrideParameters::None,
        )?;
        Ok(instance)
    }

    pub(crate) fn downcast<T: Injectable>(&self, instance: Instance) -> Result<Arc<T>, ResolveError> {
        instance
            .downcast::<T>()
            .map_err(|actual| ResolveError::DowncastFailed {
                required_type: std::any::type_name::<T>(),
                actual_type: actual,
            })
    }

    fn lookup_single(&self, contract: TypeInfo) -> Result<Arc<ObjectBuilder>, ResolveError> {
        if let Some(builder) = self.inner.registry.lookup_one(contract)? {
            return Ok(builder);
        }

        // Give late-registration hooks one chance to fill the gap
        let hooks: Vec<Arc<RequestCallback>> = self.inner.requested.lock().clone();
        if !hooks.is_empty() {
            tracing::debug!("no builder for '{contract}', invoking request hooks");
            for hook in hooks {
                hook(self, contract);
            }
            if let Some(builder) = self.inner.registry.lookup_one(contract)? {
                return Ok(builder);
            }
        }
        Err(ResolveError::NotFound(contract))
    }

    /// Execute a cascade plan computed by the registry. Runs outside the
    /// catalog lock so recompilation and callbacks may re-enter the kernel.
    fn run_plan(&self, plan: CascadePlan) {
        for action in plan.actions {
            match action {
                CascadeAction::Activate(builder) => {
                    builder.relation().transition(RegistrationState::Activating);
                    builder.recompile();
                    builder.relation().transition(RegistrationState::Activated);
                }
                CascadeAction::Deactivate(builder) => {
                    self.inner.root_scope.evict_everywhere(builder.description().id());
                    builder.relation().transition(RegistrationState::Deactivated);
                }
                CascadeAction::Refresh(builder) => {
                    builder.recompile();
                }
            }
        }
        for (observers, event) in plan.notifications {
            observer::notify(&observers, &event);
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel::new()
    }
}

impl CatalogProbe for Kernel {
    fn can_autowire(&self, target: TypeInfo) -> bool {
        self.inner.registry.can_autowire(target)
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_struct("Kernel");
        for (description, state) in self.inner.registry.snapshot() {
            map.field(&description, &state.to_string());
        }
        map.finish()
    }
}
