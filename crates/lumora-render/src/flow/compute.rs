//! Compute dispatch batching.

use lumora_core::profiling::profile_function;

use super::FlowStrategy;
use crate::batch::ActiveBatch;
use crate::command::{CommandPayload, RenderCommand};
use crate::error::PipelineResult;
use crate::kind::PipelineKind;
use crate::stage::StageId;
use crate::uniform::UniformBatch;

/// One dispatch command per visible instance, ordered by uniform group so consecutive
/// dispatches with equal uniforms share one upload.
#[derive(Debug, Default)]
pub struct ComputeStrategy;

impl ComputeStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl FlowStrategy for ComputeStrategy {
    fn name(&self) -> &'static str {
        "compute"
    }

    fn generate(
        &mut self,
        stage: &StageId,
        kind: PipelineKind,
        batches: &[ActiveBatch],
    ) -> PipelineResult<Vec<RenderCommand>> {
        profile_function!();

        let mut commands = Vec::new();
        for batch in batches {
            for group in &batch.uniform_batches {
                for handle in group.instances() {
                    let Some(instance) = handle.as_compute() else {
                        continue;
                    };
                    commands.push(RenderCommand::new(
                        kind,
                        stage.clone(),
                        batch.setting().clone(),
                        vec![UniformBatch::new(group.snapshot().clone(), vec![handle.clone()])],
                        CommandPayload::Dispatch {
                            instance: instance.clone(),
                        },
                    ));
                }
            }
        }
        Ok(commands)
    }
}
