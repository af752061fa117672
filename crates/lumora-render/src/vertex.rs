//! CPU-side vertex builders and growable GPU buffers shared by batches.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::Pod;
use lumora_test_utils::GpuBuffer;
use parking_lot::RwLock;

use crate::device::RenderDevice;
use crate::setting::VertexLayout;

/// Smallest allocation made by [`DynamicBuffer`], in bytes.
const MIN_BUFFER_SIZE: u64 = 256;

/// Global counter for vertex resource ids.
static VERTEX_RESOURCE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Default)]
struct BindingData {
    stride: u64,
    bytes: Vec<u8>,
}

/// Per-binding-point vertex byte streams, filled by mesh sources during batching.
#[derive(Debug, Clone, Default)]
pub struct VertexBuilder {
    bindings: BTreeMap<u32, BindingData>,
}

impl VertexBuilder {
    /// An empty builder with one stream per binding point of `layout`.
    pub fn new(layout: &VertexLayout) -> Self {
        let bindings = layout
            .binding_points()
            .into_iter()
            .map(|point| {
                (
                    point,
                    BindingData {
                        stride: layout.stride(point),
                        bytes: Vec::new(),
                    },
                )
            })
            .collect();
        Self { bindings }
    }

    /// Append one value to the stream at `binding`.
    pub fn push<T: Pod>(&mut self, binding: u32, value: &T) {
        self.push_bytes(binding, bytemuck::bytes_of(value));
    }

    /// Append raw bytes to the stream at `binding`. Bytes for unknown binding points are
    /// dropped.
    pub fn push_bytes(&mut self, binding: u32, bytes: &[u8]) {
        match self.bindings.get_mut(&binding) {
            Some(data) => data.bytes.extend_from_slice(bytes),
            None => tracing::trace!("Dropping vertex data for unbound binding point {}", binding),
        }
    }

    /// Complete vertices in the first binding point's stream.
    pub fn vertex_count(&self) -> u32 {
        self.bindings
            .values()
            .next()
            .filter(|data| data.stride > 0)
            .map(|data| (data.bytes.len() as u64 / data.stride) as u32)
            .unwrap_or(0)
    }

    pub fn bytes(&self, binding: u32) -> &[u8] {
        self.bindings
            .get(&binding)
            .map(|data| data.bytes.as_slice())
            .unwrap_or(&[])
    }

    pub fn binding_points(&self) -> impl Iterator<Item = u32> + '_ {
        self.bindings.keys().copied()
    }

    /// Total bytes across all streams.
    pub fn byte_len(&self) -> usize {
        self.bindings.values().map(|data| data.bytes.len()).sum()
    }

    /// Drop all bytes, keeping allocations for the next frame.
    pub fn clear(&mut self) {
        for data in self.bindings.values_mut() {
            data.bytes.clear();
        }
    }
}

/// A GPU buffer that is recreated at the next power of two when an upload outgrows it.
///
/// Clones share the same underlying buffer slot.
#[derive(Debug, Clone)]
pub struct DynamicBuffer {
    label: Arc<str>,
    usage: wgpu::BufferUsages,
    buffer: Arc<RwLock<Option<GpuBuffer>>>,
}

impl DynamicBuffer {
    pub fn new(label: &str, usage: wgpu::BufferUsages) -> Self {
        Self {
            label: Arc::from(label),
            usage: usage | wgpu::BufferUsages::COPY_DST,
            buffer: Arc::new(RwLock::new(None)),
        }
    }

    /// Make sure the buffer holds at least `size` bytes. Returns `true` if it was recreated.
    pub fn ensure_capacity(&self, device: &dyn RenderDevice, size: u64) -> bool {
        let mut slot = self.buffer.write();
        let capacity = slot.as_ref().map(|b| b.size()).unwrap_or(0);
        if size <= capacity {
            return false;
        }

        let new_size = size.next_power_of_two().max(MIN_BUFFER_SIZE);
        tracing::debug!(
            "Growing buffer '{}' from {} to {} bytes",
            self.label,
            capacity,
            new_size
        );
        *slot = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&*self.label),
            size: new_size,
            usage: self.usage,
            mapped_at_creation: false,
        }));
        true
    }

    /// Upload `data` at offset zero, growing the buffer first if needed.
    pub fn upload(&self, device: &dyn RenderDevice, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.ensure_capacity(device, data.len() as u64);
        if let Some(buffer) = self.buffer.read().as_ref() {
            device.write_buffer(buffer, 0, data);
        }
    }

    /// The current GPU buffer, if anything was ever uploaded.
    pub fn current(&self) -> Option<GpuBuffer> {
        self.buffer.read().clone()
    }

    pub fn capacity(&self) -> u64 {
        self.buffer.read().as_ref().map(|b| b.size()).unwrap_or(0)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Vertex buffers shared by every batch with the same layout and mesh source.
#[derive(Debug)]
pub struct VertexResource {
    id: u64,
    buffers: BTreeMap<u32, DynamicBuffer>,
}

impl VertexResource {
    /// A vertex resource id unique within the process.
    pub fn next_id() -> u64 {
        VERTEX_RESOURCE_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
    }

    /// One vertex buffer per binding point of `layout`.
    pub fn new(id: u64, layout: &VertexLayout) -> Self {
        let buffers = layout
            .binding_points()
            .into_iter()
            .map(|point| {
                let label = format!("vertex_resource_{}_binding_{}", id, point);
                (point, DynamicBuffer::new(&label, wgpu::BufferUsages::VERTEX))
            })
            .collect();
        Self { id, buffers }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn buffer(&self, binding: u32) -> Option<&DynamicBuffer> {
        self.buffers.get(&binding)
    }

    pub fn buffers(&self) -> impl Iterator<Item = (u32, &DynamicBuffer)> {
        self.buffers.iter().map(|(point, buffer)| (*point, buffer))
    }

    /// Upload each stream of `builder` into the matching buffer.
    pub fn upload(&self, device: &dyn RenderDevice, builder: &VertexBuilder) -> usize {
        let mut uploaded = 0;
        for (point, buffer) in &self.buffers {
            let bytes = builder.bytes(*point);
            buffer.upload(device, bytes);
            uploaded += bytes.len();
        }
        uploaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockRenderDevice;

    fn layout() -> VertexLayout {
        VertexLayout::new()
            .with_attribute(0, wgpu::VertexFormat::Float32x2)
            .with_attribute(1, wgpu::VertexFormat::Unorm8x4)
    }

    #[test]
    fn test_builder_counts_vertices_on_first_binding() {
        let mut builder = VertexBuilder::new(&layout());
        builder.push(0, &[0.0f32, 1.0]);
        builder.push(0, &[1.0f32, 1.0]);
        builder.push(1, &[255u8, 0, 0, 255]);
        builder.push(7, &1u32);

        assert_eq!(builder.vertex_count(), 2);
        assert_eq!(builder.bytes(0).len(), 16);
        assert_eq!(builder.bytes(1).len(), 4);
        assert_eq!(builder.byte_len(), 20);

        builder.clear();
        assert_eq!(builder.vertex_count(), 0);
    }

    #[test]
    fn test_dynamic_buffer_grows_to_power_of_two() {
        let device = MockRenderDevice::new();
        let buffer = DynamicBuffer::new("test", wgpu::BufferUsages::VERTEX);
        assert!(buffer.current().is_none());

        buffer.upload(&device, &[0u8; 300]);
        assert_eq!(buffer.capacity(), 512);
        assert_eq!(device.count_buffer_creates(), 1);

        buffer.upload(&device, &[0u8; 400]);
        assert_eq!(device.count_buffer_creates(), 1);

        buffer.upload(&device, &[0u8; 600]);
        assert_eq!(buffer.capacity(), 1024);
        assert_eq!(device.count_buffer_creates(), 2);
        assert_eq!(device.count_buffer_writes(), 3);
    }

    #[test]
    fn test_vertex_resource_has_buffer_per_binding() {
        let resource = VertexResource::new(3, &layout());
        assert_eq!(resource.buffers().count(), 2);
        assert!(resource.buffer(1).is_some());
        assert!(resource.buffer(2).is_none());
    }

    #[test]
    fn test_vertex_resource_ids_are_unique() {
        let first = VertexResource::next_id();
        let second = VertexResource::next_id();
        assert!(second > first);
    }
}
