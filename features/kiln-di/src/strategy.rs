use std::any::{type_name, TypeId};
use std::sync::Arc;

use crate::{
    context::InjectionContext,
    description::ObjectDescription,
    errors::{BuildError, ConfigError},
    injector::{CompiledMember, Construction, Injector},
    kernel::Kernel,
    params::OverrideParameters,
    provider::{DependencyProvider, FactoryFn},
    recipe::TypeRecipe,
    selection::{CatalogProbe, ConstructorSelector},
    types::{DynError, Injectable, Instance},
};

/// Compiles a description into an executable injector.
///
/// `declared_providers` is called once at registration time and drives the
/// relation graph; `compile` runs lazily on first build and again after every
/// recompilation.
pub trait ConstructionStrategy: Send + Sync {
    fn declared_providers(&self) -> Vec<Arc<DependencyProvider>>;

    fn compile(
        &self,
        kernel: &Kernel,
        description: &Arc<ObjectDescription>,
        providers: &[Arc<DependencyProvider>],
    ) -> Result<Injector, ConfigError>;
}

/// Strategy driven by a declared [`TypeRecipe`]: selects a constructor,
/// wires its parameters and the recipe's members to providers.
pub struct RecipeStrategy {
    recipe: Arc<TypeRecipe>,
    parameters: OverrideParameters,
    selector: ConstructorSelector,
    custom: Vec<Arc<DependencyProvider>>,
}

impl RecipeStrategy {
    pub fn new(recipe: TypeRecipe) -> Self {
        RecipeStrategy {
            recipe: Arc::new(recipe),
            parameters: OverrideParameters::None,
            selector: ConstructorSelector::default(),
            custom: Vec::new(),
        }
    }

    /// Configuration-time parameters, folded into constant providers
    pub fn with_parameters(mut self, parameters: OverrideParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_selector(mut self, selector: ConstructorSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Replace the provider for a matching slot, by name and type
    pub fn with_provider(mut self, provider: DependencyProvider) -> Self {
        self.custom.push(Arc::new(provider));
        self
    }
}

impl ConstructionStrategy for RecipeStrategy {
    fn declared_providers(&self) -> Vec<Arc<DependencyProvider>> {
        let mut providers: Vec<Arc<DependencyProvider>> = self.custom.clone();
        let mut seen: Vec<(&'static str, TypeId)> = providers
            .iter()
            .map(|provider| (provider.name(), provider.target().type_id))
            .collect();

        // Union over every declared constructor; selection happens later.
        for constructor in &self.recipe.constructors {
            for (position, param) in constructor.params().iter().enumerate() {
                let key = (param.name, param.target.type_id);
                if seen.contains(&key) {
                    continue;
                }
                seen.push(key);
                providers.push(Arc::new(DependencyProvider::from_parameter(
                    param,
                    position,
                    &self.parameters,
                )));
            }
        }
        for member in &self.recipe.members {
            let key = (member.name, member.target.type_id);
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            providers.push(Arc::new(DependencyProvider::from_member(member)));
        }
        providers
    }

    fn compile(
        &self,
        kernel: &Kernel,
        description: &Arc<ObjectDescription>,
        providers: &[Arc<DependencyProvider>],
    ) -> Result<Injector, ConfigError> {
        let selected = self.selector.select(&self.recipe, &self.parameters, kernel)?;

        let mut slots = Vec::with_capacity(selected.arity());
        for (position, param) in selected.params().iter().enumerate() {
            let provider = find_provider(providers, param.name, param.target.type_id)
                .unwrap_or_else(|| {
                    Arc::new(DependencyProvider::from_parameter(
                        param,
                        position,
                        &self.parameters,
                    ))
                });
            slots.push(provider);
        }

        let mut members = Vec::with_capacity(self.recipe.members.len());
        for member in &self.recipe.members {
            let provider = find_provider(providers, member.name, member.target.type_id)
                .unwrap_or_else(|| Arc::new(DependencyProvider::from_member(member)));
            if member.required
                && !member.collection
                && provider.is_autowired()
                && !kernel.can_autowire(member.target)
            {
                return Err(ConfigError::MemberUnsatisfied {
                    concrete: self.recipe.info,
                    member: member.name,
                });
            }
            members.push(CompiledMember {
                spec: Arc::new(member.clone()),
                provider,
            });
        }

        Ok(Injector::new(
            description.clone(),
            Construction::Invoke {
                invoke: selected.invoke_fn(),
                providers: slots,
            },
            members,
        ))
    }
}

/// Strategy wrapping a plain construction callback.
///
/// Providers added with [`with_provider`](Self::with_provider) declare what
/// the callback resolves through its context, so the registration cascade
/// can track those edges.
pub struct DirectStrategy {
    construct: Arc<FactoryFn>,
    declared: Vec<Arc<DependencyProvider>>,
}

impl DirectStrategy {
    pub fn new<T: Injectable>(
        factory: impl for<'a> Fn(&InjectionContext<'a>) -> Result<T, DynError> + Send + Sync + 'static,
    ) -> Self {
        DirectStrategy {
            construct: Arc::new(move |cx| match factory(cx) {
                Ok(value) => Ok(Instance::new(value)),
                Err(error) => Err(BuildError::Construction {
                    product: type_name::<T>(),
                    error: Arc::new(error),
                }),
            }),
            declared: Vec::new(),
        }
    }

    /// Factory that cannot fail
    pub fn infallible<T: Injectable>(
        factory: impl for<'a> Fn(&InjectionContext<'a>) -> T + Send + Sync + 'static,
    ) -> Self {
        Self::new(move |cx| Ok(factory(cx)))
    }

    pub fn with_provider(mut self, provider: DependencyProvider) -> Self {
        self.declared.push(Arc::new(provider));
        self
    }
}

impl ConstructionStrategy for DirectStrategy {
    fn declared_providers(&self) -> Vec<Arc<DependencyProvider>> {
        self.declared.clone()
    }

    fn compile(
        &self,
        _kernel: &Kernel,
        description: &Arc<ObjectDescription>,
        _providers: &[Arc<DependencyProvider>],
    ) -> Result<Injector, ConfigError> {
        Ok(Injector::new(
            description.clone(),
            Construction::Direct {
                construct: self.construct.clone(),
            },
            Vec::new(),
        ))
    }
}

fn find_provider(
    providers: &[Arc<DependencyProvider>],
    name: &'static str,
    target: TypeId,
) -> Option<Arc<DependencyProvider>> {
    providers
        .iter()
        .find(|provider| provider.name() == name && provider.target().type_id == target)
        .cloned()
}
