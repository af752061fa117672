//! Resource-binding sets and device binding slots.

use std::collections::BTreeMap;

/// Shader program identifier, assigned by the external resource loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u64);

/// Texture identifier, assigned by the external resource loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

/// Buffer identifier, assigned by the external resource loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

/// A device binding point whose value can be captured and restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingSlot {
    /// The active vertex array / vertex input object.
    VertexArray,
    /// The active framebuffer.
    Framebuffer,
    /// The active shader program.
    Program,
    /// A sampled-texture unit.
    TextureUnit(u32),
    /// A uniform-buffer binding index.
    UniformBuffer(u32),
    /// A storage-buffer binding index.
    StorageBuffer(u32),
    /// A storage-image unit.
    Image(u32),
}

/// Raw value stored in a binding slot. `0` means "nothing bound".
pub type RawBinding = u64;

/// The resources a render setting binds before drawing or dispatching.
///
/// Equality is by value: two settings binding the same shader and resources to the same
/// slots compare equal and are batched together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResourceBindings {
    shader: Option<ShaderId>,
    textures: BTreeMap<u32, TextureId>,
    uniform_buffers: BTreeMap<u32, BufferId>,
    storage_buffers: BTreeMap<u32, BufferId>,
    images: BTreeMap<u32, TextureId>,
}

impl ResourceBindings {
    /// An empty binding set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shader(mut self, shader: ShaderId) -> Self {
        self.shader = Some(shader);
        self
    }

    pub fn with_texture(mut self, unit: u32, texture: TextureId) -> Self {
        self.textures.insert(unit, texture);
        self
    }

    pub fn with_uniform_buffer(mut self, index: u32, buffer: BufferId) -> Self {
        self.uniform_buffers.insert(index, buffer);
        self
    }

    pub fn with_storage_buffer(mut self, index: u32, buffer: BufferId) -> Self {
        self.storage_buffers.insert(index, buffer);
        self
    }

    pub fn with_image(mut self, unit: u32, texture: TextureId) -> Self {
        self.images.insert(unit, texture);
        self
    }

    pub fn shader(&self) -> Option<ShaderId> {
        self.shader
    }

    pub fn textures(&self) -> &BTreeMap<u32, TextureId> {
        &self.textures
    }

    pub fn uniform_buffers(&self) -> &BTreeMap<u32, BufferId> {
        &self.uniform_buffers
    }

    pub fn storage_buffers(&self) -> &BTreeMap<u32, BufferId> {
        &self.storage_buffers
    }

    pub fn images(&self) -> &BTreeMap<u32, TextureId> {
        &self.images
    }

    pub fn is_empty(&self) -> bool {
        self.shader.is_none()
            && self.textures.is_empty()
            && self.uniform_buffers.is_empty()
            && self.storage_buffers.is_empty()
            && self.images.is_empty()
    }

    /// Every slot this set writes to, paired with the raw value it writes.
    pub fn slot_values(&self) -> Vec<(BindingSlot, RawBinding)> {
        let mut values = Vec::new();
        if let Some(shader) = self.shader {
            values.push((BindingSlot::Program, shader.0));
        }
        values.extend(
            self.textures
                .iter()
                .map(|(unit, tex)| (BindingSlot::TextureUnit(*unit), tex.0)),
        );
        values.extend(
            self.uniform_buffers
                .iter()
                .map(|(index, buf)| (BindingSlot::UniformBuffer(*index), buf.0)),
        );
        values.extend(
            self.storage_buffers
                .iter()
                .map(|(index, buf)| (BindingSlot::StorageBuffer(*index), buf.0)),
        );
        values.extend(
            self.images
                .iter()
                .map(|(unit, tex)| (BindingSlot::Image(*unit), tex.0)),
        );
        values
    }
}
