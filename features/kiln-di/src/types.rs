use std::{
    any::{Any, TypeId},
    sync::Arc,
};

/// All errors must be clone
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// We assume parallel threads share one kernel,
/// so anything resolvable needs to be Send + Sync + 'static
pub trait Injectable: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> Injectable for T {}

/// Type Name and Type Id
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct TypeInfo {
    pub type_name: &'static str,
    pub type_id: TypeId,
}
impl std::fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name)
    }
}
impl TypeInfo {
    pub fn of<T: 'static + ?Sized>() -> TypeInfo {
        TypeInfo {
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
        }
    }
}

/// A type-erased, shared instance produced by a builder
#[derive(Clone)]
pub struct Instance {
    info: TypeInfo,
    value: Arc<dyn Any + Send + Sync>,
}

impl Instance {
    pub fn new<T: Injectable>(value: T) -> Self {
        Instance {
            info: TypeInfo::of::<T>(),
            value: Arc::new(value),
        }
    }

    pub fn from_arc<T: Injectable>(value: Arc<T>) -> Self {
        Instance {
            info: TypeInfo::of::<T>(),
            value,
        }
    }

    pub fn info(&self) -> TypeInfo {
        self.info
    }

    pub fn downcast<T: Injectable>(&self) -> Result<Arc<T>, &'static str> {
        match Arc::downcast::<T>(self.value.clone()) {
            Ok(downcasted) => Ok(downcasted),
            Err(_) => Err(self.info.type_name),
        }
    }

    /// Identity comparison of the shared value
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Instance").field(&self.info.type_name).finish()
    }
}

/// Result of resolving one parameter or member slot
#[derive(Clone)]
pub enum Resolved {
    One(Instance),
    Many(Vec<Instance>),
}

impl Resolved {
    pub fn as_one(&self) -> Option<&Instance> {
        match self {
            Resolved::One(instance) => Some(instance),
            Resolved::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> Option<&[Instance]> {
        match self {
            Resolved::One(_) => None,
            Resolved::Many(instances) => Some(instances),
        }
    }
}
