//! Rasterization batching into indirect multi-draws.
//!
//! Batches sharing a render parameter and mesh source share one vertex resource, and
//! every batch with the same render parameter writes into one indirect command buffer.
//! Batches keyed by a mesh source are instanced: the mesh is filled once per frame and
//! each uniform group becomes one record whose instance count is the group size.
//! Other batches fill vertices per instance and write one record per instance.
//!
//! Vertex and indirect uploads are deferred to [`UploadPass`], which runs once after
//! every stage of the frame has been generated.

use std::sync::Arc;

use ahash::AHashMap;
use indexmap::{IndexMap, IndexSet};
use lumora_core::profiling::{profile_function, profile_scope};
use parking_lot::Mutex;

use super::{FlowStrategy, PostProcessOutput, PostProcessor};
use crate::batch::ActiveBatch;
use crate::command::{CommandPayload, RenderCommand};
use crate::config::DrawTier;
use crate::device::RenderDevice;
use crate::error::PipelineResult;
use crate::indirect::{DrawIndirect, DrawRange, IndirectCommandBuffer};
use crate::instance::MeshSourceId;
use crate::kind::PipelineKind;
use crate::setting::{RenderParameter, drawable_vertex_count};
use crate::stage::StageId;
use crate::uniform::UniformBatch;
use crate::vertex::{VertexBuilder, VertexResource};

/// Batches with equal keys share a vertex resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct VertexBufferKey {
    parameter: RenderParameter,
    mesh: Option<MeshSourceId>,
}

#[derive(Debug)]
struct VertexSlot {
    resource: Arc<VertexResource>,
    builder: VertexBuilder,
    /// Where this frame's shared mesh starts and how many vertices it draws.
    mesh: Option<(u32, u32)>,
}

/// Per-frame cursors and counters, reset by `begin_frame`.
#[derive(Debug, Default)]
struct FrameArena {
    /// Running `first_instance` for instanced draws, per render parameter.
    instance_offsets: AHashMap<RenderParameter, u32>,
    touched_vertex: IndexSet<VertexBufferKey, ahash::RandomState>,
    touched_indirect: IndexSet<RenderParameter, ahash::RandomState>,
}

#[derive(Debug)]
struct RasterResources {
    tier: DrawTier,
    initial_capacity: usize,
    vertex: AHashMap<VertexBufferKey, VertexSlot>,
    indirect: IndexMap<RenderParameter, IndirectCommandBuffer, ahash::RandomState>,
    arena: FrameArena,
}

impl RasterResources {
    fn begin_frame(&mut self) {
        for slot in self.vertex.values_mut() {
            slot.builder.clear();
            slot.mesh = None;
        }
        for buffer in self.indirect.values_mut() {
            buffer.reset();
        }
        self.arena = FrameArena::default();
    }

    fn slot(&mut self, key: &VertexBufferKey) -> Option<&mut VertexSlot> {
        let layout = key.parameter.layout()?;
        if !self.vertex.contains_key(key) {
            let id = VertexResource::next_id();
            tracing::debug!("Creating vertex resource {} for mesh {:?}", id, key.mesh);
            self.vertex.insert(
                key.clone(),
                VertexSlot {
                    resource: Arc::new(VertexResource::new(id, layout)),
                    builder: VertexBuilder::new(layout),
                    mesh: None,
                },
            );
        }
        self.vertex.get_mut(key)
    }
}

/// Flow strategy for [`PipelineKind::Rasterization`] and [`PipelineKind::Translucent`].
pub struct RasterizationStrategy {
    resources: Arc<Mutex<RasterResources>>,
}

impl RasterizationStrategy {
    pub fn new(tier: DrawTier, initial_capacity: usize) -> Self {
        Self {
            resources: Arc::new(Mutex::new(RasterResources {
                tier,
                initial_capacity,
                vertex: AHashMap::new(),
                indirect: IndexMap::default(),
                arena: FrameArena::default(),
            })),
        }
    }

    pub fn tier(&self) -> DrawTier {
        self.resources.lock().tier
    }

    /// Indirect records written this frame for `parameter`.
    pub fn records(&self, parameter: &RenderParameter) -> Vec<DrawIndirect> {
        self.resources
            .lock()
            .indirect
            .get(parameter)
            .map(|buffer| buffer.records().to_vec())
            .unwrap_or_default()
    }

    /// Vertex resources created so far.
    pub fn vertex_resource_count(&self) -> usize {
        self.resources.lock().vertex.len()
    }
}

impl FlowStrategy for RasterizationStrategy {
    fn name(&self) -> &'static str {
        "rasterization"
    }

    fn begin_frame(&mut self) {
        self.resources.lock().begin_frame();
    }

    fn generate(
        &mut self,
        stage: &StageId,
        kind: PipelineKind,
        batches: &[ActiveBatch],
    ) -> PipelineResult<Vec<RenderCommand>> {
        profile_function!();

        let mut groups: IndexMap<VertexBufferKey, Vec<&ActiveBatch>, ahash::RandomState> =
            IndexMap::default();
        for batch in batches {
            if !batch.key.parameter().is_rasterized() {
                continue;
            }
            let key = VertexBufferKey {
                parameter: batch.key.parameter().clone(),
                mesh: batch.key.mesh(),
            };
            groups.entry(key).or_default().push(batch);
        }

        let mut resources = self.resources.lock();
        let mut commands = Vec::new();
        for (key, group) in &groups {
            let visible: usize = group.iter().map(|batch| batch.visible_count()).sum();
            if visible == 0 {
                continue;
            }
            profile_scope!("vertex_buffer_group");
            process_group(&mut resources, stage, kind, key, group, &mut commands);
        }
        Ok(commands)
    }

    fn post_processor(&mut self) -> Option<Box<dyn PostProcessor>> {
        Some(Box::new(UploadPass {
            resources: self.resources.clone(),
        }))
    }
}

impl std::fmt::Debug for RasterizationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterizationStrategy")
            .field("tier", &self.tier())
            .finish()
    }
}

fn process_group(
    resources: &mut RasterResources,
    stage: &StageId,
    kind: PipelineKind,
    key: &VertexBufferKey,
    group: &[&ActiveBatch],
    commands: &mut Vec<RenderCommand>,
) {
    let Some(topology) = key.parameter.topology() else {
        return;
    };
    let tier = resources.tier;
    let capacity = resources.initial_capacity;

    // Split borrows: the vertex slot, the indirect buffer and the arena are disjoint.
    if resources.slot(key).is_none() {
        return;
    }
    let RasterResources {
        vertex,
        indirect,
        arena,
        ..
    } = resources;
    let Some(slot) = vertex.get_mut(key) else {
        return;
    };
    let buffer = indirect
        .entry(key.parameter.clone())
        .or_insert_with(|| IndirectCommandBuffer::new("indirect_commands", capacity));

    if key.mesh.is_some() && slot.mesh.is_none() {
        slot.mesh = fill_shared_mesh(&mut slot.builder, group, topology);
    }

    for batch in group {
        let batch_first = buffer.len();
        let mut uniform_batches = Vec::with_capacity(batch.uniform_batches.len());

        for uniform in &batch.uniform_batches {
            let group_first = buffer.len();
            match (key.mesh, slot.mesh) {
                (Some(_), Some((first_vertex, vertex_count))) => {
                    let count = uniform.len() as u32;
                    if count == 0 {
                        continue;
                    }
                    let offset = arena
                        .instance_offsets
                        .entry(key.parameter.clone())
                        .or_insert(0);
                    buffer.push(DrawIndirect::new(vertex_count, count, first_vertex, *offset));
                    *offset += count;
                }
                (Some(_), None) => {}
                (None, _) => {
                    for handle in uniform.instances() {
                        let Some(mesh) = handle.as_mesh().and_then(|instance| instance.mesh())
                        else {
                            continue;
                        };
                        let first_vertex = slot.builder.vertex_count();
                        mesh.fill_vertices(&mut slot.builder);
                        let filled = slot.builder.vertex_count().saturating_sub(first_vertex);
                        let vertex_count = drawable_vertex_count(topology, filled);
                        if vertex_count > 0 {
                            buffer.push(DrawIndirect::new(vertex_count, 1, first_vertex, 0));
                        }
                    }
                }
            }

            let range = DrawRange::new(group_first, buffer.len() - group_first);
            if !range.is_empty() {
                uniform_batches.push(uniform.clone().with_range(range));
            }
        }

        let range = DrawRange::new(batch_first, buffer.len() - batch_first);
        if range.is_empty() {
            continue;
        }

        let payload = match tier {
            DrawTier::Indirect => CommandPayload::MultiDrawIndirect {
                vertex: slot.resource.clone(),
                indirect: buffer.gpu_buffer().clone(),
                range,
            },
            DrawTier::Direct => CommandPayload::Draw {
                vertex: slot.resource.clone(),
                records: Arc::from(buffer.records_in(range)),
                first: range.first,
            },
        };
        commands.push(RenderCommand::new(
            kind,
            stage.clone(),
            batch.setting().clone(),
            uniform_batches,
            payload,
        ));
    }

    arena.touched_vertex.insert(key.clone());
    arena.touched_indirect.insert(key.parameter.clone());
}

/// Fill the group's shared mesh once. Returns `(first_vertex, vertex_count)`.
fn fill_shared_mesh(
    builder: &mut VertexBuilder,
    group: &[&ActiveBatch],
    topology: wgpu::PrimitiveTopology,
) -> Option<(u32, u32)> {
    let mesh = group
        .iter()
        .flat_map(|batch| batch.visible.iter())
        .find_map(|handle| handle.as_mesh().and_then(|instance| instance.mesh()))?;

    let first_vertex = builder.vertex_count();
    mesh.fill_vertices(builder);
    let filled = builder.vertex_count().saturating_sub(first_vertex);
    let vertex_count = drawable_vertex_count(topology, filled);
    (vertex_count > 0).then_some((first_vertex, vertex_count))
}

/// Uploads every vertex builder and indirect buffer touched this frame.
struct UploadPass {
    resources: Arc<Mutex<RasterResources>>,
}

impl PostProcessor for UploadPass {
    fn process(self: Box<Self>, device: &dyn RenderDevice) -> PipelineResult<PostProcessOutput> {
        profile_function!();

        let resources = self.resources.lock();
        let mut output = PostProcessOutput::default();
        for key in &resources.arena.touched_vertex {
            if let Some(slot) = resources.vertex.get(key) {
                output.vertex_bytes += slot.resource.upload(device, &slot.builder) as u64;
            }
        }
        if resources.tier == DrawTier::Indirect {
            for parameter in &resources.arena.touched_indirect {
                if let Some(buffer) = resources.indirect.get(parameter) {
                    output.indirect_bytes += buffer.upload(device) as u64;
                }
            }
        }
        tracing::trace!(
            "Uploaded {} vertex bytes, {} indirect bytes",
            output.vertex_bytes,
            output.indirect_bytes
        );
        Ok(output)
    }
}
