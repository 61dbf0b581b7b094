use std::{
    any::TypeId,
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};
use slab::Slab;

use crate::{
    builder::ObjectBuilder,
    errors::ResolveError,
    observer::{ObserverChange, ObserverEntry, ObserverEvent, ObserverList},
    relation::{BuilderId, RegistrationState},
    types::TypeInfo,
};

/// All builders registered for one contract, kept in ascending ranking order.
struct ObjectBuilderGroup {
    contract: TypeInfo,
    candidates: Vec<BuilderId>,
    observers: ObserverList,
}

impl ObjectBuilderGroup {
    fn new(contract: TypeInfo) -> Self {
        ObjectBuilderGroup {
            contract,
            candidates: Vec::new(),
            observers: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// One step of a registration cascade, executed after the catalog lock is
/// released.
pub(crate) enum CascadeAction {
    /// Recompile and mark the builder usable
    Activate(Arc<ObjectBuilder>),
    /// Mark the builder unusable until its dependencies return
    Deactivate(Arc<ObjectBuilder>),
    /// Dependencies shifted but stay satisfied; recompile only
    Refresh(Arc<ObjectBuilder>),
}

/// Work computed under the catalog write lock. Running it outside the lock
/// keeps recompilation and observer callbacks re-entrant.
pub(crate) struct CascadePlan {
    pub(crate) actions: Vec<CascadeAction>,
    pub(crate) notifications: Vec<(ObserverList, ObserverEvent)>,
}

struct RegistryInner {
    groups: HashMap<TypeId, ObjectBuilderGroup>,
    arena: Slab<Arc<ObjectBuilder>>,
    /// Deactivated builders waiting for a contract to become available again
    listeners: HashMap<TypeId, Vec<BuilderId>>,
}

/// The builder catalog: contract groups, the builder arena, and the
/// dependency bookkeeping driving activation and deactivation cascades.
pub(crate) struct ObjectBuilderRegistry {
    inner: RwLock<RegistryInner>,
}

impl ObjectBuilderRegistry {
    pub(crate) fn new() -> Self {
        ObjectBuilderRegistry {
            inner: RwLock::new(RegistryInner {
                groups: HashMap::new(),
                arena: Slab::new(),
                listeners: HashMap::new(),
            }),
        }
    }

    /// Insert a batch of builders as one unit: builders in the batch may
    /// satisfy each other's dependencies regardless of order.
    pub(crate) fn insert_batch(&self, builders: Vec<Arc<ObjectBuilder>>) -> CascadePlan {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let mut notifications = Vec::new();
        let mut actions = Vec::new();

        let mut batch_ids = Vec::with_capacity(builders.len());
        for builder in builders {
            let id = inner.arena.insert(builder.clone());
            builder.assign_id(id);
            batch_ids.push(id);

            let contract = builder.description().contract();
            let ranking = builder.description().ranking();
            let group = inner
                .groups
                .entry(contract.type_id)
                .or_insert_with(|| ObjectBuilderGroup::new(contract));
            let position = group
                .candidates
                .partition_point(|&cid| inner.arena[cid].description().ranking() <= ranking);
            group.candidates.insert(position, id);
        }

        for &id in &batch_ids {
            link_edges(inner, id);
            link_dependents(inner, id);
        }

        // Unsatisfied builders drop out until the set is stable; a batch
        // member only counts as available while it is still in the set.
        let mut pending: HashSet<BuilderId> = batch_ids.iter().copied().collect();
        loop {
            let unsatisfied: Vec<BuilderId> = pending
                .iter()
                .copied()
                .filter(|&id| !satisfied(inner, &pending, id))
                .collect();
            if unsatisfied.is_empty() {
                break;
            }
            for id in unsatisfied {
                pending.remove(&id);
            }
        }

        let mut newly_available = VecDeque::new();
        for &id in &batch_ids {
            let builder = inner.arena[id].clone();
            if pending.contains(&id) {
                builder.relation().transition(RegistrationState::Registered);
                if let Some(delta) =
                    usable_delta(inner, id, |position| ObserverChange::Added { position })
                {
                    notifications.push(delta);
                }
                newly_available.push_back(builder.description().contract().type_id);
                actions.push(CascadeAction::Activate(builder));
            } else {
                builder.relation().transition(RegistrationState::Deactivated);
                subscribe_missing(inner, id);
                tracing::debug!(
                    "{} registered dormant; dependencies are unsatisfied",
                    builder.description()
                );
            }
        }

        // Activation wave: contracts that just became available may wake
        // builders that were waiting on them, breadth first.
        while let Some(contract_id) = newly_available.pop_front() {
            let waiting = match inner.listeners.get(&contract_id) {
                Some(list) => list.clone(),
                None => continue,
            };
            for wid in waiting {
                let Some(waiter) = inner.arena.get(wid).cloned() else {
                    continue;
                };
                if waiter.relation().state() != RegistrationState::Deactivated {
                    continue;
                }
                if !satisfied(inner, &HashSet::new(), wid) {
                    // Still missing something else; wait for that instead
                    subscribe_missing(inner, wid);
                    continue;
                }
                waiter.relation().transition(RegistrationState::Registered);
                for list in inner.listeners.values_mut() {
                    list.retain(|&id| id != wid);
                }
                link_edges(inner, wid);
                if let Some(delta) =
                    usable_delta(inner, wid, |position| ObserverChange::Added { position })
                {
                    notifications.push(delta);
                }
                newly_available.push_back(waiter.description().contract().type_id);
                actions.push(CascadeAction::Activate(waiter));
            }
        }

        CascadePlan {
            actions,
            notifications,
        }
    }

    /// Remove a builder and compute the deactivation cascade over its
    /// dependents. Deactivations run in reverse discovery order.
    pub(crate) fn remove(&self, id: BuilderId) -> Option<(Arc<ObjectBuilder>, CascadePlan)> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let mut notifications = Vec::new();
        {
            // The delta is positioned before the candidate list changes.
            let builder = inner.arena.get(id)?;
            if builder.relation().state().is_usable() {
                if let Some(delta) =
                    usable_delta(inner, id, |position| ObserverChange::Removed { position })
                {
                    notifications.push(delta);
                }
            }
        }
        let builder = inner.arena.try_remove(id)?;
        builder.relation().transition(RegistrationState::Unregistering);
        let contract = builder.description().contract();

        let mut drop_group = false;
        if let Some(group) = inner.groups.get_mut(&contract.type_id) {
            group.candidates.retain(|&cid| cid != id);
            drop_group = group.candidates.is_empty() && group.observers.lock().is_empty();
        }
        if drop_group {
            inner.groups.remove(&contract.type_id);
        }

        for provider in builder.relation().providers() {
            if let Some(group) = inner.groups.get(&provider.target().type_id) {
                for &cid in &group.candidates {
                    inner.arena[cid].relation().remove_parent(id);
                }
            }
        }
        for list in inner.listeners.values_mut() {
            list.retain(|&wid| wid != id);
        }

        let mut refreshes = Vec::new();
        let mut refreshed = HashSet::new();
        let mut deactivations: Vec<Arc<ObjectBuilder>> = Vec::new();
        let mut deactivated = HashSet::new();

        // (dependent, contract it lost, whether the loss was the removed
        // builder itself)
        let mut queue: VecDeque<(BuilderId, TypeId, bool)> = builder
            .relation()
            .parents()
            .into_iter()
            .map(|pid| (pid, contract.type_id, true))
            .collect();

        while let Some((pid, lost, direct)) = queue.pop_front() {
            let Some(parent) = inner.arena.get(pid).cloned() else {
                continue;
            };
            if direct {
                // Only direct dependents held providers to the removed
                // contract; they stay stale until recompilation.
                parent.relation().mark_obsolete_for(lost);
            }
            if has_usable_candidate(inner, lost) {
                if parent.relation().state().is_usable() && refreshed.insert(pid) {
                    refreshes.push(CascadeAction::Refresh(parent.clone()));
                }
                continue;
            }
            if !deactivated.insert(pid) {
                continue;
            }
            if parent.relation().state().is_usable() {
                if let Some(delta) =
                    usable_delta(inner, pid, |position| ObserverChange::Removed { position })
                {
                    notifications.push(delta);
                }
            }
            parent.relation().transition(RegistrationState::Deactivating);
            inner
                .listeners
                .entry(lost)
                .or_default()
                .push(pid);
            deactivations.push(parent.clone());

            let parent_contract = parent.description().contract().type_id;
            for gpid in parent.relation().parents() {
                queue.push_back((gpid, parent_contract, false));
            }
        }

        deactivations.reverse();
        let mut actions: Vec<CascadeAction> = deactivations
            .into_iter()
            .map(CascadeAction::Deactivate)
            .collect();
        actions.extend(refreshes);

        Some((
            builder,
            CascadePlan {
                actions,
                notifications,
            },
        ))
    }

    /// The single usable builder for a contract, if any. More than one usable
    /// candidate makes the lookup ambiguous.
    pub(crate) fn lookup_one(
        &self,
        contract: TypeInfo,
    ) -> Result<Option<Arc<ObjectBuilder>>, ResolveError> {
        let inner = self.inner.read();
        let Some(group) = inner.groups.get(&contract.type_id) else {
            return Ok(None);
        };
        let mut usable = group
            .candidates
            .iter()
            .map(|&cid| &inner.arena[cid])
            .filter(|builder| builder.relation().state().is_usable());

        let Some(first) = usable.next() else {
            return Ok(None);
        };
        let extra = usable.count();
        if extra > 0 {
            return Err(ResolveError::Ambiguous {
                contract: group.contract,
                count: extra + 1,
            });
        }
        Ok(Some(first.clone()))
    }

    /// Every usable builder for a contract, in ascending ranking order
    pub(crate) fn lookup_all(&self, contract: TypeInfo) -> Vec<Arc<ObjectBuilder>> {
        let inner = self.inner.read();
        let Some(group) = inner.groups.get(&contract.type_id) else {
            return Vec::new();
        };
        group
            .candidates
            .iter()
            .map(|&cid| inner.arena[cid].clone())
            .filter(|builder| builder.relation().state().is_usable())
            .collect()
    }

    pub(crate) fn can_autowire(&self, contract: TypeInfo) -> bool {
        has_usable_candidate(&self.inner.read(), contract.type_id)
    }

    pub(crate) fn get(&self, id: BuilderId) -> Option<Arc<ObjectBuilder>> {
        self.inner.read().arena.get(id).cloned()
    }

    /// Description and state of every builder in the arena, for diagnostics
    pub(crate) fn snapshot(&self) -> Vec<(String, RegistrationState)> {
        let inner = self.inner.read();
        inner
            .arena
            .iter()
            .map(|(_, builder)| (builder.description().to_string(), builder.relation().state()))
            .collect()
    }

    pub(crate) fn attach_observer(&self, contract: TypeInfo, entry: &Arc<ObserverEntry>) {
        let mut inner = self.inner.write();
        let group = inner
            .groups
            .entry(contract.type_id)
            .or_insert_with(|| ObjectBuilderGroup::new(contract));
        group.observers.lock().push(Arc::downgrade(entry));
    }
}

fn has_usable_candidate(inner: &RegistryInner, contract_id: TypeId) -> bool {
    inner
        .groups
        .get(&contract_id)
        .is_some_and(|group| {
            group
                .candidates
                .iter()
                .any(|&cid| inner.arena[cid].relation().state().is_usable())
        })
}

/// Whether every catalog dependency of the builder has a usable candidate,
/// counting still-pending batch members as available.
fn satisfied(inner: &RegistryInner, pending: &HashSet<BuilderId>, id: BuilderId) -> bool {
    inner.arena[id]
        .relation()
        .providers()
        .iter()
        .filter(|provider| provider.requires_catalog())
        .all(|provider| {
            let target = provider.target().type_id;
            inner.groups.get(&target).is_some_and(|group| {
                group.candidates.iter().any(|&cid| {
                    inner.arena[cid].relation().state().is_usable() || pending.contains(&cid)
                })
            })
        })
}

/// Observer delta for one builder, positioned within the usable candidates
/// of its group. Observers track the usable set, not raw catalog membership.
fn usable_delta(
    inner: &RegistryInner,
    id: BuilderId,
    change: impl FnOnce(usize) -> ObserverChange,
) -> Option<(ObserverList, ObserverEvent)> {
    let builder = inner.arena.get(id)?;
    let group = inner.groups.get(&builder.description().contract().type_id)?;
    let position = group
        .candidates
        .iter()
        .take_while(|&&cid| cid != id)
        .filter(|&&cid| inner.arena[cid].relation().state().is_usable())
        .count();
    Some((
        group.observers.clone(),
        ObserverEvent {
            description: builder.description().clone(),
            change: change(position),
        },
    ))
}

/// Record this builder as a dependent of every current candidate of its
/// catalog dependencies.
fn link_edges(inner: &RegistryInner, id: BuilderId) {
    for provider in inner.arena[id].relation().providers() {
        if !provider.requires_catalog() {
            continue;
        }
        if let Some(group) = inner.groups.get(&provider.target().type_id) {
            for &cid in &group.candidates {
                if cid != id {
                    inner.arena[cid].relation().add_parent(id);
                }
            }
        }
    }
}

/// Record every existing builder that autowires this builder's contract as
/// its dependent. The mirror of [`link_edges`] for candidates that arrive
/// after their dependents.
fn link_dependents(inner: &RegistryInner, id: BuilderId) {
    let contract_id = inner.arena[id].description().contract().type_id;
    for (did, dependent) in inner.arena.iter() {
        if did == id {
            continue;
        }
        let depends = dependent
            .relation()
            .providers()
            .iter()
            .any(|provider| {
                provider.requires_catalog() && provider.target().type_id == contract_id
            });
        if depends {
            inner.arena[id].relation().add_parent(did);
        }
    }
}

/// Subscribe a dormant builder to every contract it is still missing.
fn subscribe_missing(inner: &mut RegistryInner, id: BuilderId) {
    let missing: Vec<TypeId> = inner.arena[id]
        .relation()
        .providers()
        .iter()
        .filter(|provider| provider.requires_catalog())
        .map(|provider| provider.target().type_id)
        .filter(|target| !has_usable_candidate(inner, *target))
        .collect();
    for target in missing {
        let list = inner.listeners.entry(target).or_default();
        if !list.contains(&id) {
            list.push(id);
        }
    }
}
