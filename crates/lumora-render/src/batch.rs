//! Render batches: same-key instances plus their per-frame visible subset.

use std::sync::Arc;

use crate::instance::{InstanceHandle, InstanceId, MeshSourceId};
use crate::setting::{RenderParameter, RenderSetting, SettingRef};
use crate::uniform::{UniformBatch, group_by_uniforms};

/// Batch identity: the render setting, plus the mesh source for rasterization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    setting: SettingRef,
    mesh: Option<MeshSourceId>,
}

impl BatchKey {
    pub fn new(setting: SettingRef, mesh: Option<MeshSourceId>) -> Self {
        Self { setting, mesh }
    }

    pub fn setting(&self) -> &SettingRef {
        &self.setting
    }

    pub fn mesh(&self) -> Option<MeshSourceId> {
        self.mesh
    }

    pub fn parameter(&self) -> &RenderParameter {
        self.setting.parameter()
    }
}

/// A registered instance and the render parameter it was registered with.
#[derive(Debug, Clone)]
pub struct InstanceInfo {
    pub handle: InstanceHandle,
    pub parameter: RenderParameter,
}

/// Ordered instances sharing a [`BatchKey`].
///
/// Batches outlive their instances: an emptied batch stays in its container and is
/// filtered out of the active view.
#[derive(Debug)]
pub struct RenderBatch {
    key: BatchKey,
    instances: Vec<InstanceInfo>,
    /// Bumped whenever membership changes or the visible subset is invalidated.
    generation: u64,
    cache: Option<ActiveBatch>,
}

/// A batch read under its container's lock, before visibility is evaluated.
#[derive(Debug)]
pub enum BatchView {
    Cached(ActiveBatch),
    Stale {
        generation: u64,
        key: BatchKey,
        instances: Vec<InstanceHandle>,
    },
}

impl RenderBatch {
    pub fn new(key: BatchKey) -> Self {
        Self {
            key,
            instances: Vec::new(),
            generation: 0,
            cache: None,
        }
    }

    pub fn key(&self) -> &BatchKey {
        &self.key
    }

    pub fn setting(&self) -> &RenderSetting {
        &self.key.setting
    }

    pub fn add(&mut self, info: InstanceInfo) {
        self.instances.push(info);
        self.invalidate();
    }

    /// Remove an instance, preserving the order of the others.
    pub fn remove(&mut self, id: InstanceId) -> Option<InstanceInfo> {
        let index = self.instances.iter().position(|info| info.handle.id() == id)?;
        self.invalidate();
        Some(self.instances.remove(index))
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.instances.iter().any(|info| info.handle.id() == id)
    }

    pub fn get(&self, id: InstanceId) -> Option<&InstanceInfo> {
        self.instances.iter().find(|info| info.handle.id() == id)
    }

    pub fn instances(&self) -> &[InstanceInfo] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Drop the visible subset so the next [`view`](Self::view) recomputes it.
    pub fn invalidate(&mut self) {
        self.generation += 1;
        self.cache = None;
    }

    /// This frame's cached active batch, or what is needed to compute it.
    ///
    /// Instance callbacks are not invoked, so this can run under a lock.
    pub fn view(&self) -> BatchView {
        match &self.cache {
            Some(active) => BatchView::Cached(active.clone()),
            None => BatchView::Stale {
                generation: self.generation,
                key: self.key.clone(),
                instances: self.instances.iter().map(|info| info.handle.clone()).collect(),
            },
        }
    }

    /// Cache `active` unless the batch changed since the view it was computed from.
    pub fn store(&mut self, generation: u64, active: &ActiveBatch) -> bool {
        if generation != self.generation {
            return false;
        }
        self.cache = Some(active.clone());
        true
    }
}

/// A frame's view of a non-empty batch, handed to flow strategies.
#[derive(Debug, Clone)]
pub struct ActiveBatch {
    pub key: BatchKey,
    /// Instances whose `should_render` held, in batch order.
    pub visible: Vec<InstanceHandle>,
    /// Partition of `visible` by uniform snapshot.
    pub uniform_batches: Vec<UniformBatch>,
}

impl ActiveBatch {
    /// Filter `instances` by `should_render` and group the survivors by uniforms.
    pub fn evaluate(key: BatchKey, instances: &[InstanceHandle]) -> Self {
        let visible: Vec<InstanceHandle> = instances
            .iter()
            .filter(|handle| handle.base().should_render())
            .cloned()
            .collect();
        let uniform_batches = group_by_uniforms(&visible);
        Self {
            key,
            visible,
            uniform_batches,
        }
    }

    pub fn setting(&self) -> &SettingRef {
        &self.key.setting
    }

    pub fn visible_count(&self) -> usize {
        self.visible.len()
    }
}

/// Build the key for an instance registered with `parameter`.
pub(crate) fn batch_key(
    handle: &InstanceHandle,
    parameter: &RenderParameter,
    keyed_by_mesh: bool,
) -> BatchKey {
    let setting = Arc::new(handle.base().partial_setting().combine(parameter.clone()));
    let mesh = if keyed_by_mesh {
        handle
            .as_mesh()
            .and_then(|instance| instance.mesh())
            .and_then(|source| source.source_id())
    } else {
        None
    };
    BatchKey::new(setting, mesh)
}
