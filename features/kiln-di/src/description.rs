use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::RwLock;

use crate::types::{Injectable, TypeInfo};

static NEXT_DESCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one registration: contract type, concrete type, ranking,
/// optional metadata and a process-unique monotonic id.
///
/// Identity is the id; two descriptions never share one.
pub struct ObjectDescription {
    id: u64,
    contract: TypeInfo,
    concrete: RwLock<TypeInfo>,
    ranking: i32,
    metadata: BTreeMap<String, String>,
}

impl ObjectDescription {
    /// Description with distinct contract and concrete types
    pub fn new<Contract: ?Sized + 'static, Concrete: Injectable>() -> Self {
        Self::from_infos(TypeInfo::of::<Contract>(), TypeInfo::of::<Concrete>())
    }

    /// Description where the contract is the concrete type itself
    pub fn of<T: Injectable>() -> Self {
        Self::from_infos(TypeInfo::of::<T>(), TypeInfo::of::<T>())
    }

    fn from_infos(contract: TypeInfo, concrete: TypeInfo) -> Self {
        ObjectDescription {
            id: NEXT_DESCRIPTION_ID.fetch_add(1, Ordering::Relaxed),
            contract,
            concrete: RwLock::new(concrete),
            ranking: 0,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_ranking(mut self, ranking: i32) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn contract(&self) -> TypeInfo {
        self.contract
    }

    pub fn concrete(&self) -> TypeInfo {
        *self.concrete.read()
    }

    /// A later override may replace the concrete type; the contract never changes.
    pub fn replace_concrete(&self, concrete: TypeInfo) {
        tracing::debug!(
            "replacing concrete type of '{}' with '{}'",
            self.contract,
            concrete
        );
        *self.concrete.write() = concrete;
    }

    pub fn ranking(&self) -> i32 {
        self.ranking
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Identity comparison
    pub fn same(&self, other: &ObjectDescription) -> bool {
        self.id == other.id
    }
}

impl std::fmt::Debug for ObjectDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectDescription")
            .field("id", &self.id)
            .field("contract", &self.contract.type_name)
            .field("concrete", &self.concrete.read().type_name)
            .field("ranking", &self.ranking)
            .finish()
    }
}

impl std::fmt::Display for ObjectDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (as {})", self.concrete.read(), self.contract)
    }
}
