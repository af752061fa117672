//! The graphics device seen by the pipeline.
//!
//! The pipeline never talks to a GPU API directly. Command execution, state switching and
//! snapshot capture all go through [`RenderDevice`], which keeps the core testable
//! without a GPU (see the `mock` feature).

#[cfg(any(test, feature = "mock"))]
pub mod mock;

use lumora_test_utils::GpuBuffer;

use crate::binding::{BindingSlot, RawBinding, ResourceBindings};
use crate::state::StateChange;
use crate::uniform::UniformSnapshot;
use crate::vertex::VertexResource;

/// A graphics device context.
///
/// All methods take `&self`. Implementations are driven from the single device-owning
/// thread; the `Send + Sync` bound only lets the device sit behind shared handles.
pub trait RenderDevice: Send + Sync {
    /// Apply one device-state component.
    fn apply_state(&self, change: &StateChange);

    /// Bind the shader and resources of a render setting.
    fn bind_resources(&self, bindings: &ResourceBindings);

    /// Read the raw value currently bound to a slot.
    fn query_binding(&self, slot: BindingSlot) -> RawBinding;

    /// Write a previously captured value back into a slot.
    fn restore_binding(&self, slot: BindingSlot, value: RawBinding);

    /// Create a GPU buffer.
    fn create_buffer(&self, descriptor: &wgpu::BufferDescriptor<'_>) -> GpuBuffer;

    /// Write `data` into `buffer` at `offset` bytes.
    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]);

    /// Bind the vertex buffers of a shared vertex resource.
    fn bind_vertex_resource(&self, resource: &VertexResource);

    /// Upload a uniform snapshot for the following draws or dispatches.
    fn apply_uniforms(&self, uniforms: &UniformSnapshot);

    /// Issue one non-indexed draw.
    fn draw(&self, first_vertex: u32, vertex_count: u32, first_instance: u32, instance_count: u32);

    /// Issue `draw_count` draws whose parameters are read from `buffer` at `byte_offset`.
    fn multi_draw_indirect(&self, buffer: &GpuBuffer, byte_offset: u64, draw_count: u32);

    /// Dispatch compute work groups.
    fn dispatch(&self, workgroups: [u32; 3]);
}
