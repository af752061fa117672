//! Executable render commands.

use std::fmt;
use std::sync::Arc;

use crate::device::RenderDevice;
use crate::indirect::{DrawIndirect, DrawRange};
use crate::instance::{ComputeInstance, FunctionInstance};
use crate::kind::PipelineKind;
use crate::setting::SettingRef;
use crate::stage::StageId;
use crate::uniform::{UniformBatch, UniformSnapshot};
use crate::vertex::{DynamicBuffer, VertexResource};

/// Kind-specific work carried by a [`RenderCommand`].
#[derive(Clone)]
pub enum CommandPayload {
    /// Records replayed as individual draw calls.
    Draw {
        vertex: Arc<VertexResource>,
        /// This command's records, starting at buffer index `first`.
        records: Arc<[DrawIndirect]>,
        first: u32,
    },
    /// Records drawn from an indirect buffer in one submission per uniform group.
    MultiDrawIndirect {
        vertex: Arc<VertexResource>,
        indirect: DynamicBuffer,
        range: DrawRange,
    },
    /// One compute instance.
    Dispatch { instance: Arc<dyn ComputeInstance> },
    /// Function instances in priority order.
    Function { calls: Vec<Arc<dyn FunctionInstance>> },
}

impl CommandPayload {
    fn name(&self) -> &'static str {
        match self {
            CommandPayload::Draw { .. } => "Draw",
            CommandPayload::MultiDrawIndirect { .. } => "MultiDrawIndirect",
            CommandPayload::Dispatch { .. } => "Dispatch",
            CommandPayload::Function { .. } => "Function",
        }
    }
}

/// One unit of device work, bound to a stage and render setting.
///
/// Built by a flow strategy each frame and executed once.
#[derive(Clone)]
pub struct RenderCommand {
    kind: PipelineKind,
    stage: StageId,
    setting: SettingRef,
    uniform_batches: Vec<UniformBatch>,
    payload: CommandPayload,
}

impl RenderCommand {
    pub fn new(
        kind: PipelineKind,
        stage: StageId,
        setting: SettingRef,
        uniform_batches: Vec<UniformBatch>,
        payload: CommandPayload,
    ) -> Self {
        Self {
            kind,
            stage,
            setting,
            uniform_batches,
            payload,
        }
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn stage(&self) -> &StageId {
        &self.stage
    }

    pub fn setting(&self) -> &SettingRef {
        &self.setting
    }

    pub fn uniform_batches(&self) -> &[UniformBatch] {
        &self.uniform_batches
    }

    pub fn payload(&self) -> &CommandPayload {
        &self.payload
    }

    /// Draw records covered by this command (zero for non-draw payloads).
    pub fn draw_count(&self) -> u32 {
        match &self.payload {
            CommandPayload::Draw { records, .. } => records.len() as u32,
            CommandPayload::MultiDrawIndirect { range, .. } => range.count,
            _ => 0,
        }
    }

    /// Execute against `device`.
    ///
    /// Each uniform group's snapshot is applied (unless it equals `last_uniforms`) before
    /// the payload is replayed for that group. Afterwards every contributing instance's
    /// `after_draw` hook runs.
    pub fn execute(
        &self,
        device: &dyn RenderDevice,
        last_uniforms: &mut Option<Arc<UniformSnapshot>>,
    ) {
        match &self.payload {
            CommandPayload::Draw { vertex, .. } | CommandPayload::MultiDrawIndirect { vertex, .. } => {
                device.bind_vertex_resource(vertex);
            }
            _ => {}
        }

        if self.uniform_batches.is_empty() {
            self.run(device, None);
        } else {
            for group in &self.uniform_batches {
                let snapshot = group.snapshot();
                let unchanged = last_uniforms.as_ref().is_some_and(|last| **last == **snapshot);
                if !snapshot.is_empty() && !unchanged {
                    device.apply_uniforms(snapshot);
                    *last_uniforms = Some(snapshot.clone());
                }
                self.run(device, group.range());
            }
        }

        self.after_draw();
    }

    fn run(&self, device: &dyn RenderDevice, group_range: Option<DrawRange>) {
        match &self.payload {
            CommandPayload::Draw { records, first, .. } => {
                let range = group_range.unwrap_or(DrawRange::new(*first, records.len() as u32));
                let start = range.first.saturating_sub(*first) as usize;
                let end = (start + range.count as usize).min(records.len());
                for record in &records[start.min(end)..end] {
                    if record.vertex_count > 0 && record.instance_count > 0 {
                        device.draw(
                            record.first_vertex,
                            record.vertex_count,
                            record.first_instance,
                            record.instance_count,
                        );
                    }
                }
            }
            CommandPayload::MultiDrawIndirect {
                indirect, range, ..
            } => {
                let range = group_range.unwrap_or(*range);
                if range.is_empty() {
                    return;
                }
                match indirect.current() {
                    Some(buffer) => {
                        device.multi_draw_indirect(&buffer, range.byte_offset(), range.count)
                    }
                    None => tracing::warn!(
                        "Indirect buffer '{}' was never uploaded; skipping {} draws",
                        indirect.label(),
                        range.count
                    ),
                }
            }
            CommandPayload::Dispatch { instance } => instance.dispatch(device),
            CommandPayload::Function { calls } => {
                for call in calls {
                    call.invoke(device);
                }
            }
        }
    }

    fn after_draw(&self) {
        match &self.payload {
            CommandPayload::Function { calls } => {
                for call in calls {
                    call.after_draw();
                }
            }
            _ => {
                for group in &self.uniform_batches {
                    for instance in group.instances() {
                        instance.base().after_draw();
                    }
                }
            }
        }
    }
}

impl fmt::Debug for RenderCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderCommand")
            .field("kind", &self.kind)
            .field("stage", &self.stage)
            .field("payload", &self.payload.name())
            .field("uniform_batches", &self.uniform_batches.len())
            .field("draw_count", &self.draw_count())
            .finish()
    }
}
