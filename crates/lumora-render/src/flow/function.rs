//! Custom function batching.

use std::sync::Arc;

use lumora_core::profiling::profile_function;

use super::FlowStrategy;
use crate::batch::ActiveBatch;
use crate::command::{CommandPayload, RenderCommand};
use crate::error::PipelineResult;
use crate::instance::FunctionInstance;
use crate::kind::PipelineKind;
use crate::stage::StageId;

/// Flattens each batch into one command holding its callables sorted by priority.
///
/// Function instances manage their own uniforms, so no uniform groups are attached.
#[derive(Debug, Default)]
pub struct FunctionStrategy;

impl FunctionStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl FlowStrategy for FunctionStrategy {
    fn name(&self) -> &'static str {
        "function"
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
            let mut calls: Vec<Arc<dyn FunctionInstance>> = batch
                .visible
                .iter()
                .filter_map(|handle| handle.as_function().cloned())
                .collect();
            if calls.is_empty() {
                continue;
            }
            calls.sort_by_key(|call| call.priority());

            commands.push(RenderCommand::new(
                kind,
                stage.clone(),
                batch.setting().clone(),
                Vec::new(),
                CommandPayload::Function { calls },
            ));
        }
        Ok(commands)
    }
}
