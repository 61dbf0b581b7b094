//! Runtime dependency injection for shared object graphs.
//!
//! A [`Kernel`] holds a catalog of object builders, one per registered
//! contract type. Resolving a contract constructs the full dependency graph
//! on demand, shares in-flight instances across the graph, detects cycles,
//! and caches instances according to their [`Lifetime`]. Registrations react
//! to each other: a builder whose dependencies are missing stays dormant
//! until they arrive, and unregistering a builder deactivates everything
//! that depended on it.

mod builder;
mod context;
mod description;
mod errors;
mod injector;
mod kernel;
mod lifetime;
mod observer;
mod operator;
mod params;
mod provider;
mod recipe;
mod registry;
mod relation;
mod selection;
mod strategy;
mod types;

pub use builder::ObjectBuilder;
pub use context::InjectionContext;
pub use description::ObjectDescription;
pub use errors::{BuildError, ConfigError, ResolveError};
pub use injector::{CompiledMember, Construction, Injector, InvokeFn};
pub use kernel::{Kernel, Registration, RegistrationRequest};
pub use lifetime::{Lifetime, LifetimeScope, Scope};
pub use observer::{BuilderRef, ObserverChange, ObserverEvent, ObserverHandle};
pub use params::OverrideParameters;
pub use provider::{DependencyProvider, FactoryFn, ProviderSource};
pub use recipe::{arg, arg_all, ConstructorSpec, MemberSpec, ParameterSpec, TypeRecipe};
pub use relation::RegistrationState;
pub use selection::{
    AllConstructors, CatalogProbe, ConstructorFinder, ConstructorSelector, PublicConstructors,
};
pub use strategy::{ConstructionStrategy, DirectStrategy, RecipeStrategy};
pub use types::{DynError, Injectable, Instance, Resolved, TypeInfo};
