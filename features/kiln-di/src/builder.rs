use std::sync::{Arc, OnceLock};

use crate::{
    context::InjectionContext,
    description::ObjectDescription,
    errors::BuildError,
    injector::Injector,
    kernel::Kernel,
    lifetime::{Lifetime, LifetimeScope},
    operator::OperatorCell,
    params::OverrideParameters,
    relation::{BuilderId, ObjectRelation},
    strategy::ConstructionStrategy,
    types::Instance,
};

/// One catalog entry: a description, the strategy that compiles it, and the
/// runtime state (operator, relation) the kernel maintains for it.
pub struct ObjectBuilder {
    description: Arc<ObjectDescription>,
    strategy: Arc<dyn ConstructionStrategy>,
    lifetime: Lifetime,
    operator: OperatorCell,
    relation: ObjectRelation,
    id: OnceLock<BuilderId>,
}

impl ObjectBuilder {
    pub(crate) fn new(
        description: Arc<ObjectDescription>,
        strategy: Arc<dyn ConstructionStrategy>,
        lifetime: Lifetime,
    ) -> Self {
        let providers = strategy.declared_providers();
        ObjectBuilder {
            description,
            strategy,
            lifetime,
            operator: OperatorCell::new(),
            relation: ObjectRelation::new(providers),
            id: OnceLock::new(),
        }
    }

    pub(crate) fn assign_id(&self, id: BuilderId) {
        let _ = self.id.set(id);
    }

    pub(crate) fn id(&self) -> BuilderId {
        self.id.get().copied().unwrap_or(usize::MAX)
    }

    pub fn description(&self) -> &Arc<ObjectDescription> {
        &self.description
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    pub(crate) fn relation(&self) -> &ObjectRelation {
        &self.relation
    }

    pub(crate) fn compile(&self, kernel: &Kernel) -> Result<Injector, BuildError> {
        let injector =
            self.strategy
                .compile(kernel, &self.description, &self.relation.providers())?;
        Ok(injector)
    }

    /// Build an instance under the given scope, honoring the lifetime.
    pub(crate) fn build(
        &self,
        kernel: &Kernel,
        scope: &LifetimeScope,
        parent: Option<&InjectionContext<'_>>,
        overrides: &OverrideParameters,
    ) -> Result<Instance, BuildError> {
        match self.lifetime {
            Lifetime::Transient => self
                .operator
                .build(self, kernel, scope, parent, overrides),
            Lifetime::Scoped => scope.get_or_build(self.description.id(), || {
                self.operator.build(self, kernel, scope, parent, overrides)
            }),
            Lifetime::Container => {
                let container = scope.container_scope();
                container.get_or_build(self.description.id(), || {
                    self.operator.build(self, kernel, container, parent, overrides)
                })
            }
        }
    }

    /// Discard the compiled injector and regenerate providers; the next build
    /// recompiles against the current catalog.
    pub(crate) fn recompile(&self) {
        let fresh = self
            .relation
            .providers()
            .iter()
            .map(|provider| Arc::new(provider.regenerate()))
            .collect();
        self.relation.set_providers(fresh);
        self.operator.reset();
        tracing::debug!("scheduled recompilation of {}", self.description);
    }

    #[cfg(test)]
    pub(crate) fn stage_name(&self) -> &'static str {
        self.operator.stage_name()
    }
}

impl std::fmt::Debug for ObjectBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBuilder")
            .field("description", &self.description.to_string())
            .field("lifetime", &self.lifetime)
            .field("state", &self.relation.state().to_string())
            .field("operator", &self.operator.stage_name())
            .finish()
    }
}
