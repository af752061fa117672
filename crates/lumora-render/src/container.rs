//! Batch containers: the instance registration protocol for one stage and pipeline kind.
//!
//! Registration, removal and dirty marking may come from a tick thread. Dirty instances
//! are only re-bucketed by [`BatchContainer::prepare_for_frame`], which the render
//! thread runs before it reads the active batches.

use std::sync::Arc;

use ahash::AHashMap;
use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, RwLock};

use crate::batch::{ActiveBatch, BatchKey, BatchView, InstanceInfo, RenderBatch, batch_key};
use crate::error::{PipelineError, PipelineResult};
use crate::instance::{InstanceHandle, InstanceId};
use crate::kind::PipelineKind;
use crate::setting::RenderParameter;

/// Observer of container membership, e.g. a transform or uniform manager.
///
/// Callbacks run outside the container's locks.
pub trait BatchContainerListener: Send + Sync {
    fn on_instance_added(&self, _kind: PipelineKind, _instance: &InstanceHandle) {}

    fn on_instance_removed(&self, _kind: PipelineKind, _instance: &InstanceHandle) {}

    fn on_instance_dirty(&self, _kind: PipelineKind, _instance: InstanceId) {}
}

#[derive(Debug, Default)]
struct ContainerState {
    batches: IndexMap<BatchKey, RenderBatch, ahash::RandomState>,
    /// The single source of truth for which batch holds an instance.
    keys: AHashMap<InstanceId, BatchKey>,
    /// Bumped per registration, so re-bucketing can skip instances re-registered meanwhile.
    registrations: AHashMap<InstanceId, u64>,
    next_registration: u64,
}

impl ContainerState {
    fn insert(&mut self, key: BatchKey, info: InstanceInfo) {
        let id = info.handle.id();
        self.batches
            .entry(key.clone())
            .or_insert_with(|| RenderBatch::new(key.clone()))
            .add(info);
        self.keys.insert(id, key);
    }

    fn remove(&mut self, id: InstanceId) -> Option<InstanceInfo> {
        let key = self.keys.remove(&id)?;
        self.batches.get_mut(&key).and_then(|batch| batch.remove(id))
    }

    fn stamp(&mut self, id: InstanceId) {
        self.next_registration += 1;
        self.registrations.insert(id, self.next_registration);
    }

    fn registration(&self, id: InstanceId) -> Option<u64> {
        self.registrations.get(&id).copied()
    }

    fn get(&self, id: InstanceId) -> Option<&InstanceInfo> {
        let key = self.keys.get(&id)?;
        self.batches.get(key).and_then(|batch| batch.get(id))
    }

    fn handles(&self) -> Vec<InstanceHandle> {
        self.batches
            .values()
            .flat_map(|batch| batch.instances())
            .map(|info| info.handle.clone())
            .collect()
    }
}

/// Instances of one pipeline kind, bucketed by batch key.
pub struct BatchContainer {
    kind: PipelineKind,
    state: RwLock<ContainerState>,
    dirty: Mutex<IndexSet<InstanceId, ahash::RandomState>>,
    listeners: RwLock<Vec<Arc<dyn BatchContainerListener>>>,
}

impl BatchContainer {
    pub fn new(kind: PipelineKind) -> Self {
        Self {
            kind,
            state: RwLock::new(ContainerState::default()),
            dirty: Mutex::new(IndexSet::default()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn add_listener(&self, listener: Arc<dyn BatchContainerListener>) {
        self.listeners.write().push(listener);
    }

    fn check(&self, handle: &InstanceHandle, parameter: &RenderParameter) -> PipelineResult<()> {
        let expected = self.kind.required_capability();
        let actual = handle.capability();
        if expected != actual {
            return Err(PipelineError::CapabilityMismatch {
                instance: handle.id(),
                kind: self.kind,
                expected,
                actual,
            });
        }

        if self.kind.rasterizes() != parameter.is_rasterized() {
            let reason = if self.kind.rasterizes() {
                "rasterizing work needs a vertex layout and topology"
            } else {
                "only rasterizing work takes a vertex layout"
            };
            return Err(PipelineError::InvalidParameter {
                kind: self.kind,
                reason: reason.to_string(),
            });
        }
        Ok(())
    }

    /// Register an instance. Registering an already registered id replaces it.
    pub fn register_instance(
        &self,
        handle: InstanceHandle,
        parameter: RenderParameter,
    ) -> PipelineResult<()> {
        self.check(&handle, &parameter)?;

        let key = batch_key(&handle, &parameter, self.kind.rasterizes());
        let replaced = {
            let mut state = self.state.write();
            let replaced = state.remove(handle.id());
            state.insert(
                key,
                InstanceInfo {
                    handle: handle.clone(),
                    parameter,
                },
            );
            state.stamp(handle.id());
            replaced
        };

        if let Some(old) = replaced {
            tracing::debug!("Re-registered instance {} in {} container", old.handle.id(), self.kind);
            self.notify(|listener| listener.on_instance_removed(self.kind, &old.handle));
        }
        self.notify(|listener| listener.on_instance_added(self.kind, &handle));
        Ok(())
    }

    /// Unregister an instance. Returns `false` if it was not registered.
    pub fn unregister_instance(&self, id: InstanceId) -> bool {
        let removed = {
            let mut state = self.state.write();
            state.registrations.remove(&id);
            state.remove(id)
        };
        self.dirty.lock().shift_remove(&id);
        match removed {
            Some(info) => {
                self.notify(|listener| listener.on_instance_removed(self.kind, &info.handle));
                true
            }
            None => false,
        }
    }

    /// Mark an instance for re-bucketing at the next [`prepare_for_frame`](Self::prepare_for_frame).
    pub fn mark_dirty(&self, id: InstanceId) {
        if !self.state.read().keys.contains_key(&id) {
            tracing::trace!("Ignoring dirty mark for unregistered instance {}", id);
            return;
        }
        self.dirty.lock().insert(id);
        self.notify(|listener| listener.on_instance_dirty(self.kind, id));
    }

    /// Fold pending mutations in before the frame's batches are read.
    ///
    /// Discarded instances are unregistered, dirty instances are re-bucketed and every
    /// batch's visible subset is invalidated. Returns the number of re-bucketed instances.
    ///
    /// Instance callbacks run outside the container's locks, so they may register,
    /// unregister or mark instances dirty on this container.
    pub fn prepare_for_frame(&self) -> usize {
        let dirty: Vec<InstanceId> = self.dirty.lock().drain(..).collect();

        let handles = self.state.read().handles();
        let discarded: Vec<InstanceId> = handles
            .iter()
            .filter(|handle| handle.base().should_discard())
            .map(|handle| handle.id())
            .collect();
        for id in &discarded {
            self.unregister_instance(*id);
        }

        let pending: Vec<(u64, InstanceInfo)> = {
            let state = self.state.read();
            dirty
                .iter()
                .filter_map(|id| Some((state.registration(*id)?, state.get(*id)?.clone())))
                .collect()
        };
        let rekeyed: Vec<(InstanceId, u64, BatchKey)> = pending
            .into_iter()
            .map(|(registration, info)| {
                let key = batch_key(&info.handle, &info.parameter, self.kind.rasterizes());
                (info.handle.id(), registration, key)
            })
            .collect();

        let mut rebucketed = 0;
        let mut state = self.state.write();
        for (id, registration, key) in rekeyed {
            // Re-registered since the key was computed: registration already keyed it.
            if state.registration(id) != Some(registration) {
                continue;
            }
            let Some(info) = state.remove(id) else {
                continue;
            };
            state.insert(key, info);
            rebucketed += 1;
        }
        for batch in state.batches.values_mut() {
            batch.invalidate();
        }
        drop(state);

        if rebucketed > 0 || !discarded.is_empty() {
            tracing::trace!(
                "{} container: re-bucketed {}, discarded {}",
                self.kind,
                rebucketed,
                discarded.len()
            );
        }
        rebucketed
    }

    /// Non-empty batches with their visible subsets, in batch creation order.
    ///
    /// Visibility and uniforms are evaluated outside the container's locks and cached
    /// for the rest of the frame unless the batch changed meanwhile.
    pub fn collect_active_batches(&self) -> Vec<ActiveBatch> {
        let views: Vec<BatchView> = self
            .state
            .read()
            .batches
            .values()
            .filter(|batch| !batch.is_empty())
            .map(RenderBatch::view)
            .collect();

        let mut fresh = Vec::new();
        let active: Vec<ActiveBatch> = views
            .into_iter()
            .map(|view| match view {
                BatchView::Cached(active) => active,
                BatchView::Stale {
                    generation,
                    key,
                    instances,
                } => {
                    let active = ActiveBatch::evaluate(key, &instances);
                    fresh.push((generation, active.clone()));
                    active
                }
            })
            .collect();

        if !fresh.is_empty() {
            let mut state = self.state.write();
            for (generation, active) in &fresh {
                if let Some(batch) = state.batches.get_mut(&active.key) {
                    batch.store(*generation, active);
                }
            }
        }
        active
    }

    /// Run `tick` on every instance that asks for it. Returns how many ticked.
    pub fn tick_instances(&self) -> usize {
        let handles = self.state.read().handles();
        let ticking: Vec<&InstanceHandle> = handles
            .iter()
            .filter(|handle| handle.base().should_tick())
            .collect();
        for handle in &ticking {
            handle.base().tick();
        }
        ticking.len()
    }

    pub fn batch_key_of(&self, id: InstanceId) -> Option<BatchKey> {
        self.state.read().keys.get(&id).cloned()
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.state.read().keys.contains_key(&id)
    }

    /// Ids in the batch stored under `key`, in batch order.
    pub fn batch_members(&self, key: &BatchKey) -> Vec<InstanceId> {
        self.state
            .read()
            .batches
            .get(key)
            .map(|batch| batch.instances().iter().map(|info| info.handle.id()).collect())
            .unwrap_or_default()
    }

    pub fn instance_count(&self) -> usize {
        self.state.read().keys.len()
    }

    /// All batches, including emptied ones.
    pub fn batch_count(&self) -> usize {
        self.state.read().batches.len()
    }

    pub fn active_batch_count(&self) -> usize {
        self.state
            .read()
            .batches
            .values()
            .filter(|batch| !batch.is_empty())
            .count()
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.lock().len()
    }

    fn notify(&self, f: impl Fn(&dyn BatchContainerListener)) {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            f(listener.as_ref());
        }
    }
}

impl std::fmt::Debug for BatchContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchContainer")
            .field("kind", &self.kind)
            .field("instances", &self.instance_count())
            .field("batches", &self.batch_count())
            .finish()
    }
}
