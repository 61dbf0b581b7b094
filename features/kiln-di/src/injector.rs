use std::sync::Arc;

use crate::{
    context::InjectionContext,
    description::ObjectDescription,
    errors::{BuildError, ResolveError},
    params::OverrideParameters,
    provider::{DependencyProvider, FactoryFn},
    recipe::MemberSpec,
    types::{Instance, Resolved},
};

pub type InvokeFn = dyn Fn(&[Resolved]) -> Result<Instance, BuildError> + Send + Sync;

/// How the compiled injector produces the raw instance
pub enum Construction {
    /// Selected constructor: merge providers and overrides into an argument
    /// list, then invoke
    Invoke {
        invoke: Arc<InvokeFn>,
        providers: Vec<Arc<DependencyProvider>>,
    },
    /// Pure `(context) -> T` construction callback
    Direct { construct: Arc<FactoryFn> },
}

/// A member injection slot paired with the provider feeding it
pub struct CompiledMember {
    pub spec: Arc<MemberSpec>,
    pub provider: Arc<DependencyProvider>,
}

/// Compiled construction plan for one builder: executes construction of an
/// instance given a context, merging provider values with caller overrides.
pub struct Injector {
    description: Arc<ObjectDescription>,
    construction: Construction,
    members: Vec<CompiledMember>,
}

impl Injector {
    pub fn new(
        description: Arc<ObjectDescription>,
        construction: Construction,
        members: Vec<CompiledMember>,
    ) -> Self {
        Injector {
            description,
            construction,
            members,
        }
    }

    pub fn description(&self) -> &Arc<ObjectDescription> {
        &self.description
    }

    pub(crate) fn build(
        &self,
        cx: &InjectionContext<'_>,
        overrides: &OverrideParameters,
    ) -> Result<Instance, BuildError> {
        let instance = match &self.construction {
            Construction::Invoke { invoke, providers } => {
                overrides.check_arity(providers.len())?;

                let mut args = Vec::with_capacity(providers.len());
                for (position, provider) in providers.iter().enumerate() {
                    // A caller override for the slot wins over the compiled provider
                    let value = match overrides.match_slot(position, provider.name(), provider.target())
                    {
                        Some(value) => Resolved::One(value),
                        None => provider.resolve(cx)?,
                    };
                    args.push(value);
                }
                invoke(&args)?
            }
            Construction::Direct { construct } => construct(cx)?,
        };

        // Constructor finished: share the instance with the chain before
        // member injection so back-references can observe it.
        cx.assign(instance.clone())?;
        self.inject_members(cx, &instance)?;

        tracing::trace!("constructed instance of {}", self.description.concrete());
        Ok(instance)
    }

    fn inject_members(
        &self,
        cx: &InjectionContext<'_>,
        owner: &Instance,
    ) -> Result<(), BuildError> {
        for member in &self.members {
            let provider = &member.provider;

            // A member resolving to an in-flight, instance-less ancestor is
            // not a cycle: queue the fix-up on that ancestor instead.
            if provider.is_autowired() && !provider.is_collection() && !provider.is_obsolete() {
                if let Some(target) = cx.kernel().lookup_valid(provider.target()) {
                    if let Some(ancestor) = cx.find_ancestor(target.description().id()) {
                        match ancestor.instance() {
                            Some(instance) => {
                                member.spec.inject(owner, Resolved::One(instance))?;
                            }
                            None => {
                                let spec = member.spec.clone();
                                let owner = owner.clone();
                                ancestor.defer(Box::new(move |instance| {
                                    spec.inject(&owner, Resolved::One(instance.clone()))
                                }))?;
                                tracing::trace!(
                                    "deferred member '{}' of {} onto the in-flight ancestor",
                                    member.spec.name,
                                    self.description.concrete()
                                );
                            }
                        }
                        continue;
                    }
                }
            }

            match provider.resolve(cx) {
                Ok(value) => member.spec.inject(owner, value)?,
                Err(BuildError::Dependency { source, .. })
                    if !member.spec.required
                        && matches!(*source, ResolveError::NotFound(_)) =>
                {
                    // Optional member, nothing registered: leave it untouched
                }
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }
}
