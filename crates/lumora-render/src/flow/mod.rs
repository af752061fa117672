//! Flow strategies: per-kind command generation.
//!
//! The lifecycle per frame is: `begin_frame()` resets per-frame data, `post_processor()`
//! hands out the deferred work (buffer uploads), `generate()` runs once per stage with
//! that stage's active batches, and the post-processors run once after every stage has
//! been generated.

mod compute;
mod function;
mod raster;

pub use compute::ComputeStrategy;
pub use function::FunctionStrategy;
pub use raster::RasterizationStrategy;

use crate::batch::ActiveBatch;
use crate::command::RenderCommand;
use crate::device::RenderDevice;
use crate::error::PipelineResult;
use crate::kind::PipelineKind;
use crate::stage::StageId;

/// Turns active batches into render commands for one pipeline kind.
pub trait FlowStrategy: Send {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Reset per-frame data (write cursors, offset counters, vertex builders).
    fn begin_frame(&mut self) {}

    /// Build the commands for one stage.
    fn generate(
        &mut self,
        stage: &StageId,
        kind: PipelineKind,
        batches: &[ActiveBatch],
    ) -> PipelineResult<Vec<RenderCommand>>;

    /// Deferred work to run once after every stage of the frame has been generated.
    fn post_processor(&mut self) -> Option<Box<dyn PostProcessor>> {
        None
    }
}

/// Bytes written by a post-processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostProcessOutput {
    pub vertex_bytes: u64,
    pub indirect_bytes: u64,
}

/// Work deferred until all commands of a frame are built.
pub trait PostProcessor: Send {
    fn process(self: Box<Self>, device: &dyn RenderDevice) -> PipelineResult<PostProcessOutput>;
}

/// The strategy a pipeline kind uses unless another is installed.
pub fn default_strategy(
    kind: PipelineKind,
    config: &crate::config::PipelineConfig,
) -> Box<dyn FlowStrategy> {
    match kind {
        PipelineKind::Compute => Box::new(ComputeStrategy::new()),
        PipelineKind::Function => Box::new(FunctionStrategy::new()),
        PipelineKind::Rasterization | PipelineKind::Translucent => Box::new(
            RasterizationStrategy::new(config.draw_tier, config.initial_indirect_capacity),
        ),
    }
}
