//! Capture and restore of device bindings around stage execution.
//!
//! Before a stage runs, the command queue captures every binding slot its render settings
//! may disturb, plus the vertex array and framebuffer, and restores them afterwards so
//! external code never observes the stage's bindings.

use std::collections::BTreeSet;

use ahash::AHashMap;

use crate::binding::{BindingSlot, RawBinding, ResourceBindings, ShaderId};
use crate::device::RenderDevice;
use crate::error::{PipelineError, PipelineResult};

/// A set of binding slots to capture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotScope {
    vertex_array: bool,
    framebuffer: bool,
    program: bool,
    texture_units: BTreeSet<u32>,
    uniform_buffers: BTreeSet<u32>,
    storage_buffers: BTreeSet<u32>,
    images: BTreeSet<u32>,
}

impl SnapshotScope {
    /// Captures nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The minimum captured around every stage: vertex array and framebuffer.
    pub fn defensive() -> Self {
        Self {
            vertex_array: true,
            framebuffer: true,
            ..Self::default()
        }
    }

    /// Every slot a binding set writes to.
    pub fn from_bindings(bindings: &ResourceBindings) -> Self {
        let mut scope = Self::empty();
        for (slot, _) in bindings.slot_values() {
            scope.insert(slot);
        }
        scope
    }

    pub fn insert(&mut self, slot: BindingSlot) {
        match slot {
            BindingSlot::VertexArray => self.vertex_array = true,
            BindingSlot::Framebuffer => self.framebuffer = true,
            BindingSlot::Program => self.program = true,
            BindingSlot::TextureUnit(unit) => {
                self.texture_units.insert(unit);
            }
            BindingSlot::UniformBuffer(index) => {
                self.uniform_buffers.insert(index);
            }
            BindingSlot::StorageBuffer(index) => {
                self.storage_buffers.insert(index);
            }
            BindingSlot::Image(unit) => {
                self.images.insert(unit);
            }
        }
    }

    pub fn with(mut self, slot: BindingSlot) -> Self {
        self.insert(slot);
        self
    }

    /// Add every slot of `other`.
    pub fn union(&mut self, other: &SnapshotScope) {
        self.vertex_array |= other.vertex_array;
        self.framebuffer |= other.framebuffer;
        self.program |= other.program;
        self.texture_units.extend(&other.texture_units);
        self.uniform_buffers.extend(&other.uniform_buffers);
        self.storage_buffers.extend(&other.storage_buffers);
        self.images.extend(&other.images);
    }

    pub fn contains(&self, slot: BindingSlot) -> bool {
        match slot {
            BindingSlot::VertexArray => self.vertex_array,
            BindingSlot::Framebuffer => self.framebuffer,
            BindingSlot::Program => self.program,
            BindingSlot::TextureUnit(unit) => self.texture_units.contains(&unit),
            BindingSlot::UniformBuffer(index) => self.uniform_buffers.contains(&index),
            BindingSlot::StorageBuffer(index) => self.storage_buffers.contains(&index),
            BindingSlot::Image(unit) => self.images.contains(&unit),
        }
    }

    /// Slots in capture order.
    pub fn slots(&self) -> Vec<BindingSlot> {
        let mut slots = Vec::with_capacity(self.len());
        if self.vertex_array {
            slots.push(BindingSlot::VertexArray);
        }
        if self.framebuffer {
            slots.push(BindingSlot::Framebuffer);
        }
        if self.program {
            slots.push(BindingSlot::Program);
        }
        slots.extend(self.texture_units.iter().map(|u| BindingSlot::TextureUnit(*u)));
        slots.extend(self.uniform_buffers.iter().map(|i| BindingSlot::UniformBuffer(*i)));
        slots.extend(self.storage_buffers.iter().map(|i| BindingSlot::StorageBuffer(*i)));
        slots.extend(self.images.iter().map(|u| BindingSlot::Image(*u)));
        slots
    }

    pub fn len(&self) -> usize {
        self.vertex_array as usize
            + self.framebuffer as usize
            + self.program as usize
            + self.texture_units.len()
            + self.uniform_buffers.len()
            + self.storage_buffers.len()
            + self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Binding values captured from the device. Restoring consumes the snapshot.
#[derive(Debug)]
#[must_use = "a captured snapshot must be restored"]
pub struct StateSnapshot {
    values: Vec<(BindingSlot, RawBinding)>,
}

impl StateSnapshot {
    /// Query every slot of `scope`.
    pub fn capture(device: &dyn RenderDevice, scope: &SnapshotScope) -> Self {
        let values = scope
            .slots()
            .into_iter()
            .map(|slot| (slot, device.query_binding(slot)))
            .collect();
        Self { values }
    }

    /// Write the captured values back, last captured first.
    pub fn restore(self, device: &dyn RenderDevice) {
        for (slot, value) in self.values.into_iter().rev() {
            device.restore_binding(slot, value);
        }
    }

    pub fn value(&self, slot: BindingSlot) -> Option<RawBinding> {
        self.values
            .iter()
            .find(|(captured, _)| *captured == slot)
            .map(|(_, value)| *value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Maps a binding set to the slots executing with it may disturb.
pub trait BindingResolver: Send + Sync {
    fn resolve(&self, bindings: &ResourceBindings) -> PipelineResult<SnapshotScope>;
}

/// Resolves to exactly the slots the binding set declares.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredBindingResolver;

impl BindingResolver for DeclaredBindingResolver {
    fn resolve(&self, bindings: &ResourceBindings) -> PipelineResult<SnapshotScope> {
        Ok(SnapshotScope::from_bindings(bindings))
    }
}

/// Adds the slots each shader is known to touch to the declared slots.
///
/// Shaders must be registered with their slot set; binding sets naming an unknown shader
/// fail to resolve.
#[derive(Debug, Default)]
pub struct ShaderBindingResolver {
    shaders: AHashMap<ShaderId, SnapshotScope>,
}

impl ShaderBindingResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, shader: ShaderId, scope: SnapshotScope) {
        self.shaders.insert(shader, scope);
    }
}

impl BindingResolver for ShaderBindingResolver {
    fn resolve(&self, bindings: &ResourceBindings) -> PipelineResult<SnapshotScope> {
        let mut scope = SnapshotScope::from_bindings(bindings);
        if let Some(shader) = bindings.shader() {
            let declared =
                self.shaders
                    .get(&shader)
                    .ok_or_else(|| PipelineError::UnresolvedBinding {
                        reason: format!("shader {} has no registered binding layout", shader.0),
                    })?;
            scope.union(declared);
        }
        Ok(scope)
    }
}
