use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    context::InjectionContext,
    errors::{BuildError, ResolveError},
    params::OverrideParameters,
    recipe::{MemberSpec, ParameterSpec},
    types::{Instance, Resolved, TypeInfo},
};

/// User callback computing a value from the current resolution context
pub type FactoryFn =
    dyn for<'a> Fn(&InjectionContext<'a>) -> Result<Instance, BuildError> + Send + Sync;

/// How one slot obtains its value
pub enum ProviderSource {
    /// Resolve from the catalog at build time, by declared type
    Autowired,
    /// Fixed value captured at configuration time
    Constant(Instance),
    /// Invoke a user callback with the current resolution context
    Factory(Arc<FactoryFn>),
}

/// One parameter/property resolution unit, compiled once per configuration.
///
/// The obsolete flag is set by the unregistration cascade and only ever
/// cleared by a full recompilation, which produces fresh providers.
pub struct DependencyProvider {
    target: TypeInfo,
    name: &'static str,
    default: Option<Instance>,
    collection: bool,
    /// Absence is tolerated; never gates activation
    optional: bool,
    obsolete: AtomicBool,
    source: ProviderSource,
}

impl DependencyProvider {
    pub fn autowired(name: &'static str, target: TypeInfo) -> Self {
        Self::with_source(name, target, ProviderSource::Autowired)
    }

    pub fn constant(name: &'static str, value: Instance) -> Self {
        let target = value.info();
        Self::with_source(name, target, ProviderSource::Constant(value))
    }

    pub fn factory(
        name: &'static str,
        target: TypeInfo,
        callback: impl for<'a> Fn(&InjectionContext<'a>) -> Result<Instance, BuildError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self::with_source(name, target, ProviderSource::Factory(Arc::new(callback)))
    }

    fn with_source(name: &'static str, target: TypeInfo, source: ProviderSource) -> Self {
        DependencyProvider {
            target,
            name,
            default: None,
            collection: false,
            optional: false,
            obsolete: AtomicBool::new(false),
            source,
        }
    }

    /// Compile one declared parameter, folding a matching configuration-time
    /// override into a constant.
    pub(crate) fn from_parameter(
        spec: &ParameterSpec,
        position: usize,
        config: &OverrideParameters,
    ) -> Self {
        let source = match config.match_slot(position, spec.name, spec.target) {
            Some(value) => ProviderSource::Constant(value),
            None => ProviderSource::Autowired,
        };
        DependencyProvider {
            target: spec.target,
            name: spec.name,
            default: spec.default.clone(),
            collection: spec.collection,
            optional: false,
            obsolete: AtomicBool::new(false),
            source,
        }
    }

    pub(crate) fn from_member(spec: &MemberSpec) -> Self {
        DependencyProvider {
            target: spec.target,
            name: spec.name,
            default: None,
            collection: spec.collection,
            optional: !spec.required,
            obsolete: AtomicBool::new(false),
            source: ProviderSource::Autowired,
        }
    }

    /// Fresh copy for recompilation: same source, obsolete flag reset
    pub(crate) fn regenerate(&self) -> Self {
        let source = match &self.source {
            ProviderSource::Autowired => ProviderSource::Autowired,
            ProviderSource::Constant(value) => ProviderSource::Constant(value.clone()),
            ProviderSource::Factory(callback) => ProviderSource::Factory(callback.clone()),
        };
        DependencyProvider {
            target: self.target,
            name: self.name,
            default: self.default.clone(),
            collection: self.collection,
            optional: self.optional,
            obsolete: AtomicBool::new(false),
            source,
        }
    }

    pub fn target(&self) -> TypeInfo {
        self.target
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_collection(&self) -> bool {
        self.collection
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub fn is_autowired(&self) -> bool {
        matches!(self.source, ProviderSource::Autowired)
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::Acquire)
    }

    pub(crate) fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }

    /// Providers that must be satisfied by the catalog; these become the
    /// parent/child edges of the relation graph.
    pub(crate) fn requires_catalog(&self) -> bool {
        self.is_autowired() && !self.has_default() && !self.collection && !self.optional
    }

    pub(crate) fn resolve(&self, cx: &InjectionContext<'_>) -> Result<Resolved, BuildError> {
        if self.is_obsolete() {
            return Err(BuildError::Dependency {
                parent: cx.description().contract(),
                target: self.target,
                source: Box::new(ResolveError::Obsolete(self.target)),
            });
        }

        match &self.source {
            ProviderSource::Constant(value) => Ok(Resolved::One(value.clone())),
            ProviderSource::Factory(callback) => callback(cx).map(Resolved::One),
            ProviderSource::Autowired if self.collection => {
                cx.kernel().build_all_for(cx, self.target).map(Resolved::Many)
            }
            ProviderSource::Autowired => match cx.kernel().build_dependency(cx, self.target) {
                Ok(instance) => Ok(Resolved::One(instance)),
                Err(BuildError::Dependency { parent, target, source })
                    if matches!(*source, ResolveError::NotFound(_)) =>
                {
                    match &self.default {
                        Some(value) => Ok(Resolved::One(value.clone())),
                        None => Err(BuildError::Dependency { parent, target, source }),
                    }
                }
                Err(error) => Err(error),
            },
        }
    }
}

impl std::fmt::Debug for DependencyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.source {
            ProviderSource::Autowired => "autowired",
            ProviderSource::Constant(_) => "constant",
            ProviderSource::Factory(_) => "factory",
        };
        f.debug_struct("DependencyProvider")
            .field("name", &self.name)
            .field("target", &self.target.type_name)
            .field("kind", &kind)
            .field("obsolete", &self.is_obsolete())
            .finish()
    }
}
