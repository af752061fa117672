//! Mock render device for testing.
//!
//! Records every device call without touching a GPU, and simulates the device's binding
//! slots so snapshot capture and restore can be verified.

use ahash::AHashMap;
use lumora_test_utils::{CallRecorder, GpuBuffer};
use parking_lot::Mutex;

use super::RenderDevice;
use crate::binding::{BindingSlot, RawBinding, ResourceBindings};
use crate::state::StateChange;
use crate::uniform::UniformSnapshot;
use crate::vertex::VertexResource;

/// Records a device call for verification in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    ApplyState(StateChange),
    BindResources(ResourceBindings),
    QueryBinding(BindingSlot),
    RestoreBinding {
        slot: BindingSlot,
        value: RawBinding,
    },
    CreateBuffer {
        buffer_id: usize,
        size: u64,
        usage: wgpu::BufferUsages,
    },
    WriteBuffer {
        buffer_id: usize,
        offset: u64,
        size: usize,
    },
    BindVertexResource {
        id: u64,
    },
    ApplyUniforms(UniformSnapshot),
    Draw {
        first_vertex: u32,
        vertex_count: u32,
        first_instance: u32,
        instance_count: u32,
    },
    MultiDrawIndirect {
        buffer_id: usize,
        byte_offset: u64,
        draw_count: u32,
    },
    Dispatch([u32; 3]),
}

/// Mock implementation of [`RenderDevice`].
///
/// # Example
///
/// ```rust,ignore
/// use lumora_render::binding::BindingSlot;
/// use lumora_render::device::RenderDevice;
/// use lumora_render::device::mock::MockRenderDevice;
///
/// let device = MockRenderDevice::new();
/// device.set_binding(BindingSlot::Framebuffer, 7);
///
/// assert_eq!(device.query_binding(BindingSlot::Framebuffer), 7);
/// assert_eq!(device.count_queries(), 1);
/// ```
pub struct MockRenderDevice {
    calls: CallRecorder<DeviceCall>,
    bindings: Mutex<AHashMap<BindingSlot, RawBinding>>,
    contents: Mutex<AHashMap<usize, Vec<u8>>>,
    next_buffer_id: Mutex<usize>,
}

impl MockRenderDevice {
    pub fn new() -> Self {
        Self {
            calls: CallRecorder::new(),
            bindings: Mutex::new(AHashMap::new()),
            contents: Mutex::new(AHashMap::new()),
            next_buffer_id: Mutex::new(0),
        }
    }

    /// Get a copy of all recorded calls (for test assertions).
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls.calls()
    }

    /// Recorded calls matching the predicate.
    pub fn calls_matching(&self, predicate: impl Fn(&DeviceCall) -> bool) -> Vec<DeviceCall> {
        self.calls.filtered(predicate)
    }

    /// Clear recorded calls (useful between test steps). Binding slots are kept.
    pub fn clear_calls(&self) {
        self.calls.clear();
    }

    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    /// State changes applied, in call order.
    pub fn state_changes(&self) -> Vec<StateChange> {
        self.calls
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                DeviceCall::ApplyState(change) => Some(change),
                _ => None,
            })
            .collect()
    }

    pub fn count_state_changes(&self) -> usize {
        self.calls.count(|call| matches!(call, DeviceCall::ApplyState(_)))
    }

    pub fn count_resource_binds(&self) -> usize {
        self.calls.count(|call| matches!(call, DeviceCall::BindResources(_)))
    }

    pub fn count_queries(&self) -> usize {
        self.calls.count(|call| matches!(call, DeviceCall::QueryBinding(_)))
    }

    pub fn count_restores(&self) -> usize {
        self.calls.count(|call| matches!(call, DeviceCall::RestoreBinding { .. }))
    }

    pub fn count_buffer_creates(&self) -> usize {
        self.calls.count(|call| matches!(call, DeviceCall::CreateBuffer { .. }))
    }

    pub fn count_buffer_writes(&self) -> usize {
        self.calls.count(|call| matches!(call, DeviceCall::WriteBuffer { .. }))
    }

    pub fn count_uniform_uploads(&self) -> usize {
        self.calls.count(|call| matches!(call, DeviceCall::ApplyUniforms(_)))
    }

    pub fn count_draws(&self) -> usize {
        self.calls.count(|call| matches!(call, DeviceCall::Draw { .. }))
    }

    pub fn count_multi_draws(&self) -> usize {
        self.calls.count(|call| matches!(call, DeviceCall::MultiDrawIndirect { .. }))
    }

    pub fn count_dispatches(&self) -> usize {
        self.calls.count(|call| matches!(call, DeviceCall::Dispatch(_)))
    }

    /// Simulate external code binding `value` to `slot`.
    pub fn set_binding(&self, slot: BindingSlot, value: RawBinding) {
        self.bindings.lock().insert(slot, value);
    }

    /// Current value of a slot, without recording a query.
    pub fn binding(&self, slot: BindingSlot) -> RawBinding {
        self.bindings.lock().get(&slot).copied().unwrap_or(0)
    }

    /// Bytes written to a mock buffer so far.
    pub fn buffer_contents(&self, buffer: &GpuBuffer) -> Vec<u8> {
        buffer
            .mock_id()
            .and_then(|id| self.contents.lock().get(&id).cloned())
            .unwrap_or_default()
    }
}

impl Default for MockRenderDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderDevice for MockRenderDevice {
    fn apply_state(&self, change: &StateChange) {
        self.calls.record(DeviceCall::ApplyState(*change));
    }

    fn bind_resources(&self, bindings: &ResourceBindings) {
        self.calls.record(DeviceCall::BindResources(bindings.clone()));
        let mut slots = self.bindings.lock();
        for (slot, value) in bindings.slot_values() {
            slots.insert(slot, value);
        }
    }

    fn query_binding(&self, slot: BindingSlot) -> RawBinding {
        self.calls.record(DeviceCall::QueryBinding(slot));
        self.binding(slot)
    }

    fn restore_binding(&self, slot: BindingSlot, value: RawBinding) {
        self.calls.record(DeviceCall::RestoreBinding { slot, value });
        self.bindings.lock().insert(slot, value);
    }

    fn create_buffer(&self, descriptor: &wgpu::BufferDescriptor<'_>) -> GpuBuffer {
        let id = {
            let mut next = self.next_buffer_id.lock();
            let id = *next;
            *next += 1;
            id
        };
        self.calls.record(DeviceCall::CreateBuffer {
            buffer_id: id,
            size: descriptor.size,
            usage: descriptor.usage,
        });
        GpuBuffer::mock(id, descriptor.size)
    }

    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) {
        let buffer_id = buffer.mock_id().unwrap_or_default();
        self.calls.record(DeviceCall::WriteBuffer {
            buffer_id,
            offset,
            size: data.len(),
        });

        let mut contents = self.contents.lock();
        let stored = contents.entry(buffer_id).or_default();
        let start = offset as usize;
        let end = start + data.len();
        if stored.len() < end {
            stored.resize(end, 0);
        }
        stored[start..end].copy_from_slice(data);
    }

    fn bind_vertex_resource(&self, resource: &VertexResource) {
        self.calls
            .record(DeviceCall::BindVertexResource { id: resource.id() });
        self.bindings
            .lock()
            .insert(BindingSlot::VertexArray, resource.id());
    }

    fn apply_uniforms(&self, uniforms: &UniformSnapshot) {
        self.calls.record(DeviceCall::ApplyUniforms(uniforms.clone()));
    }

    fn draw(&self, first_vertex: u32, vertex_count: u32, first_instance: u32, instance_count: u32) {
        self.calls.record(DeviceCall::Draw {
            first_vertex,
            vertex_count,
            first_instance,
            instance_count,
        });
    }

    fn multi_draw_indirect(&self, buffer: &GpuBuffer, byte_offset: u64, draw_count: u32) {
        self.calls.record(DeviceCall::MultiDrawIndirect {
            buffer_id: buffer.mock_id().unwrap_or_default(),
            byte_offset,
            draw_count,
        });
    }

    fn dispatch(&self, workgroups: [u32; 3]) {
        self.calls.record(DeviceCall::Dispatch(workgroups));
    }
}
