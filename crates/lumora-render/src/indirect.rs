//! Indirect draw records and the per-parameter indirect command buffer.
//!
//! Records are appended on the CPU while batches are processed and uploaded once after
//! every group of the frame has been handled. The write cursor is reset at the start of
//! each frame; the GPU buffer only ever grows.

use bytemuck::{Pod, Zeroable};

use crate::device::RenderDevice;
use crate::vertex::DynamicBuffer;

/// Indirect draw command for non-indexed geometry.
///
/// This matches the layout expected by `wgpu::RenderPass::multi_draw_indirect`.
///
/// # Fields
///
/// * `vertex_count` - Number of vertices to draw
/// * `instance_count` - Number of instances to draw
/// * `first_vertex` - Index of the first vertex to draw
/// * `first_instance` - Instance ID of the first instance (requires INDIRECT_FIRST_INSTANCE)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DrawIndirect {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

// SAFETY: DrawIndirect is a repr(C) struct of u32s with no padding
unsafe impl Pod for DrawIndirect {}
unsafe impl Zeroable for DrawIndirect {}

impl DrawIndirect {
    pub const fn new(
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Self {
        Self {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        }
    }

    /// Size of the record in bytes.
    pub const fn size() -> u64 {
        std::mem::size_of::<Self>() as u64
    }
}

/// A contiguous run of records in an indirect command buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DrawRange {
    /// Index of the first record.
    pub first: u32,
    /// Number of records.
    pub count: u32,
}

impl DrawRange {
    pub const fn new(first: u32, count: u32) -> Self {
        Self { first, count }
    }

    /// Index one past the last record.
    pub const fn end(&self) -> u32 {
        self.first + self.count
    }

    /// Offset of the first record in bytes.
    pub const fn byte_offset(&self) -> u64 {
        self.first as u64 * DrawIndirect::size()
    }

    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Growable, append-only table of draw records backed by a GPU buffer.
#[derive(Debug, Clone)]
pub struct IndirectCommandBuffer {
    records: Vec<DrawIndirect>,
    buffer: DynamicBuffer,
}

impl IndirectCommandBuffer {
    /// A buffer with room reserved for `capacity` records.
    pub fn new(label: &str, capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            buffer: DynamicBuffer::new(label, wgpu::BufferUsages::INDIRECT),
        }
    }

    /// Reset the write cursor for a new frame.
    pub fn reset(&mut self) {
        self.records.clear();
    }

    /// Append a record and return its index.
    pub fn push(&mut self, record: DrawIndirect) -> u32 {
        let index = self.records.len() as u32;
        self.records.push(record);
        index
    }

    /// Records written this frame.
    pub fn len(&self) -> u32 {
        self.records.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[DrawIndirect] {
        &self.records
    }

    pub fn records_in(&self, range: DrawRange) -> &[DrawIndirect] {
        let start = (range.first as usize).min(self.records.len());
        let end = (range.end() as usize).min(self.records.len());
        &self.records[start..end]
    }

    /// The GPU side of this buffer. Shared with commands that read it.
    pub fn gpu_buffer(&self) -> &DynamicBuffer {
        &self.buffer
    }

    /// Upload this frame's records. Returns the number of bytes written.
    pub fn upload(&self, device: &dyn RenderDevice) -> usize {
        let bytes: &[u8] = bytemuck::cast_slice(&self.records);
        self.buffer.upload(device, bytes);
        bytes.len()
    }
}
