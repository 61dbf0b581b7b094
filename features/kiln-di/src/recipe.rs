use std::{any::type_name, sync::Arc};

use crate::{
    errors::BuildError,
    types::{Injectable, Instance, Resolved, TypeInfo},
};

/// One declared constructor parameter
#[derive(Clone)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub target: TypeInfo,
    pub default: Option<Instance>,
    pub collection: bool,
}

impl ParameterSpec {
    pub fn of<T: Injectable>(name: &'static str) -> Self {
        ParameterSpec {
            name,
            target: TypeInfo::of::<T>(),
            default: None,
            collection: false,
        }
    }

    /// All currently valid instances of T, possibly empty
    pub fn collection_of<T: Injectable>(name: &'static str) -> Self {
        ParameterSpec {
            name,
            target: TypeInfo::of::<T>(),
            default: None,
            collection: true,
        }
    }

    /// A defaulted parameter is never required from the catalog
    pub fn with_default<T: Injectable>(mut self, value: T) -> Self {
        self.default = Some(Instance::new(value));
        self
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

type InvokeFn = dyn Fn(&[Resolved]) -> Result<Instance, BuildError> + Send + Sync;

/// One declared constructor: its parameters plus the invoke callback
/// receiving the fully merged argument list.
pub struct ConstructorSpec {
    params: Vec<ParameterSpec>,
    public: bool,
    invoke: Arc<InvokeFn>,
}

impl ConstructorSpec {
    pub fn new(
        params: Vec<ParameterSpec>,
        invoke: impl Fn(&[Resolved]) -> Result<Instance, BuildError> + Send + Sync + 'static,
    ) -> Self {
        ConstructorSpec {
            params,
            public: true,
            invoke: Arc::new(invoke),
        }
    }

    /// Hidden from the default finder
    pub fn internal(mut self) -> Self {
        self.public = false;
        self
    }

    pub fn params(&self) -> &[ParameterSpec] {
        &self.params
    }

    pub fn is_public(&self) -> bool {
        self.public
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub(crate) fn invoke_fn(&self) -> Arc<InvokeFn> {
        self.invoke.clone()
    }
}

type InjectFn = dyn Fn(&Instance, Resolved) -> Result<(), BuildError> + Send + Sync;

/// One property/method injection target, applied after construction
#[derive(Clone)]
pub struct MemberSpec {
    pub name: &'static str,
    pub target: TypeInfo,
    pub required: bool,
    pub collection: bool,
    inject: Arc<InjectFn>,
}

impl MemberSpec {
    /// Typed property target; `assign` stores the value on the owner
    /// (interior mutability is the owner's concern).
    pub fn property<T: Injectable, D: Injectable>(
        name: &'static str,
        assign: impl Fn(&T, Arc<D>) + Send + Sync + 'static,
    ) -> Self {
        MemberSpec {
            name,
            target: TypeInfo::of::<D>(),
            required: true,
            collection: false,
            inject: Arc::new(move |owner, value| {
                let owner = downcast_owner::<T>(owner)?;
                let value = match value.as_one() {
                    Some(instance) => one_of::<D>(instance, 0)?,
                    None => {
                        return Err(BuildError::Argument {
                            position: 0,
                            required_type: type_name::<D>(),
                        })
                    }
                };
                assign(&owner, value);
                Ok(())
            }),
        }
    }

    /// Typed collection target receiving every valid instance of D
    pub fn collection<T: Injectable, D: Injectable>(
        name: &'static str,
        assign: impl Fn(&T, Vec<Arc<D>>) + Send + Sync + 'static,
    ) -> Self {
        MemberSpec {
            name,
            target: TypeInfo::of::<D>(),
            required: true,
            collection: true,
            inject: Arc::new(move |owner, value| {
                let owner = downcast_owner::<T>(owner)?;
                let values = match value {
                    Resolved::Many(instances) => instances
                        .iter()
                        .map(|instance| one_of::<D>(instance, 0))
                        .collect::<Result<Vec<_>, _>>()?,
                    Resolved::One(instance) => vec![one_of::<D>(&instance, 0)?],
                };
                assign(&owner, values);
                Ok(())
            }),
        }
    }

    /// A missing dependency leaves the member untouched instead of failing
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub(crate) fn inject(&self, owner: &Instance, value: Resolved) -> Result<(), BuildError> {
        (self.inject)(owner, value)
    }
}

/// Declared construction surface of one concrete type: the surrogate for
/// constructor/member reflection.
pub struct TypeRecipe {
    pub info: TypeInfo,
    pub constructors: Vec<ConstructorSpec>,
    pub members: Vec<MemberSpec>,
}

impl TypeRecipe {
    pub fn of<T: Injectable>() -> Self {
        TypeRecipe {
            info: TypeInfo::of::<T>(),
            constructors: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn constructor(mut self, spec: ConstructorSpec) -> Self {
        self.constructors.push(spec);
        self
    }

    pub fn member(mut self, spec: MemberSpec) -> Self {
        self.members.push(spec);
        self
    }
}

/// Downcast a single constructor argument
pub fn arg<T: Injectable>(args: &[Resolved], position: usize) -> Result<Arc<T>, BuildError> {
    match args.get(position).and_then(Resolved::as_one) {
        Some(instance) => one_of::<T>(instance, position),
        None => Err(BuildError::Argument {
            position,
            required_type: type_name::<T>(),
        }),
    }
}

/// Downcast a collection constructor argument
pub fn arg_all<T: Injectable>(args: &[Resolved], position: usize) -> Result<Vec<Arc<T>>, BuildError> {
    match args.get(position).and_then(Resolved::as_many) {
        Some(instances) => instances
            .iter()
            .map(|instance| one_of::<T>(instance, position))
            .collect(),
        None => Err(BuildError::Argument {
            position,
            required_type: type_name::<T>(),
        }),
    }
}

fn one_of<T: Injectable>(instance: &Instance, position: usize) -> Result<Arc<T>, BuildError> {
    instance.downcast::<T>().map_err(|_| BuildError::Argument {
        position,
        required_type: type_name::<T>(),
    })
}

fn downcast_owner<T: Injectable>(owner: &Instance) -> Result<Arc<T>, BuildError> {
    owner.downcast::<T>().map_err(|_| BuildError::Argument {
        position: 0,
        required_type: type_name::<T>(),
    })
}
