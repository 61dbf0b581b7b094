use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::{
    builder::ObjectBuilder,
    context::InjectionContext,
    errors::BuildError,
    injector::Injector,
    kernel::Kernel,
    lifetime::LifetimeScope,
    params::OverrideParameters,
    types::Instance,
};

/// Per-builder construction stage.
///
/// Transitions are one-directional: Unready -> OneOff -> {NonShared | Shared},
/// with NonShared -> Shared as the only lateral upgrade. Shared never
/// downgrades.
#[derive(Clone)]
pub(crate) enum Operator {
    /// No injector compiled yet
    Unready,
    /// Compiled but not yet classified; the next build decides
    OneOff(Arc<Injector>),
    /// Proven not to participate in cross-object sharing
    NonShared(Arc<Injector>),
    /// Known participant in shared/viral construction graphs
    Shared(Arc<Injector>),
}

impl Operator {
    fn stage(&self) -> u8 {
        match self {
            Operator::Unready => 0,
            Operator::OneOff(_) => 1,
            Operator::NonShared(_) => 2,
            Operator::Shared(_) => 3,
        }
    }

    fn injector(&self) -> Option<&Arc<Injector>> {
        match self {
            Operator::Unready => None,
            Operator::OneOff(injector)
            | Operator::NonShared(injector)
            | Operator::Shared(injector) => Some(injector),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Operator::Unready => "unready",
            Operator::OneOff(_) => "one-off",
            Operator::NonShared(_) => "non-shared",
            Operator::Shared(_) => "shared",
        }
    }
}

/// Holds the builder's current operator: lock-free reads on the fast path,
/// replacements under the per-builder lock, strictly stage-monotonic.
pub(crate) struct OperatorCell {
    current: ArcSwap<Operator>,
    compile_lock: Mutex<()>,
}

impl OperatorCell {
    pub(crate) fn new() -> Self {
        OperatorCell {
            current: ArcSwap::from_pointee(Operator::Unready),
            compile_lock: Mutex::new(()),
        }
    }

    /// Full recompilation entry: next build compiles afresh
    pub(crate) fn reset(&self) {
        let _guard = self.compile_lock.lock();
        self.current.store(Arc::new(Operator::Unready));
    }

    pub(crate) fn stage_name(&self) -> &'static str {
        self.current.load().name()
    }

    pub(crate) fn build(
        &self,
        builder: &ObjectBuilder,
        kernel: &Kernel,
        scope: &LifetimeScope,
        parent: Option<&InjectionContext<'_>>,
        overrides: &OverrideParameters,
    ) -> Result<Instance, BuildError> {
        loop {
            let operator = self.current.load_full();
            match &*operator {
                Operator::Unready => {
                    self.compile(builder, kernel)?;
                    // Re-read; another thread may have won the compile
                }
                Operator::OneOff(injector) => {
                    if let Some(shared) = self.shared_ancestor(builder, parent)? {
                        return Ok(shared);
                    }
                    let built = Self::run(injector, builder, kernel, scope, parent, overrides, true)?;
                    // First real build done: classify. A sharing hit during
                    // the build has already upgraded us to Shared and this
                    // request then loses by monotonicity.
                    self.upgrade(Operator::NonShared(injector.clone()));
                    return Ok(built);
                }
                Operator::NonShared(injector) => {
                    // The walk stays mandatory: it is also the cycle check.
                    // Finding an ancestor anyway re-classifies to Shared.
                    if let Some(shared) = self.shared_ancestor(builder, parent)? {
                        return Ok(shared);
                    }
                    return Self::run(injector, builder, kernel, scope, parent, overrides, false);
                }
                Operator::Shared(injector) => {
                    if let Some(shared) = self.shared_ancestor(builder, parent)? {
                        return Ok(shared);
                    }
                    return Self::run(injector, builder, kernel, scope, parent, overrides, true);
                }
            }
        }
    }

    /// Double-checked compile under the per-builder lock: losers of the race
    /// block here, then delegate to the winner's result.
    fn compile(&self, builder: &ObjectBuilder, kernel: &Kernel) -> Result<(), BuildError> {
        let _guard = self.compile_lock.lock();
        if !matches!(**self.current.load(), Operator::Unready) {
            return Ok(());
        }
        let injector = builder.compile(kernel)?;
        tracing::debug!("compiled injector for {}", builder.description());
        self.current.store(Arc::new(Operator::OneOff(Arc::new(injector))));
        Ok(())
    }

    /// Look for an instance of this description already produced inside the
    /// caller's logical build, or an in-flight ancestor constructing it.
    ///
    /// A completed instance is reused and marks this builder as a sharing
    /// participant. An ancestor with no instance yet is a genuine cycle.
    fn shared_ancestor(
        &self,
        builder: &ObjectBuilder,
        parent: Option<&InjectionContext<'_>>,
    ) -> Result<Option<Instance>, BuildError> {
        let Some(parent) = parent else {
            return Ok(None);
        };
        let id = builder.description().id();

        if let Some(instance) = parent.shared_instance(id) {
            self.mark_shared();
            tracing::trace!("reusing shared instance of {}", builder.description());
            return Ok(Some(instance));
        }

        let Some(ancestor) = parent.find_ancestor(id) else {
            return Ok(None);
        };
        match ancestor.instance() {
            Some(instance) => {
                // Assigned but not recorded in the shared map; the ancestor
                // was built non-virally.
                self.mark_shared();
                tracing::trace!("reusing in-flight instance of {}", builder.description());
                Ok(Some(instance))
            }
            None => {
                let mut chain = parent.chain();
                chain.push(builder.description().concrete());
                Err(BuildError::Cyclic { chain })
            }
        }
    }

    fn mark_shared(&self) {
        if let Some(injector) = self.current.load().injector() {
            self.upgrade(Operator::Shared(injector.clone()));
        }
    }

    fn run(
        injector: &Arc<Injector>,
        builder: &ObjectBuilder,
        kernel: &Kernel,
        scope: &LifetimeScope,
        parent: Option<&InjectionContext<'_>>,
        overrides: &OverrideParameters,
        viral: bool,
    ) -> Result<Instance, BuildError> {
        match parent {
            Some(parent) => {
                let cx = parent.child(builder.description().clone(), overrides, viral);
                injector.build(&cx, overrides)
            }
            None => {
                let cx = InjectionContext::root(
                    kernel,
                    scope,
                    builder.description().clone(),
                    overrides,
                    viral,
                );
                injector.build(&cx, overrides)
            }
        }
    }

    /// Replace the operator only if the stage strictly advances; racing
    /// upgrades never regress a more specific classification.
    fn upgrade(&self, next: Operator) {
        let _guard = self.compile_lock.lock();
        let current = self.current.load();
        if current.stage() < next.stage() {
            tracing::trace!("operator {} -> {}", current.name(), next.name());
            self.current.store(Arc::new(next));
        }
    }
}
