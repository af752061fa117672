//! Lumora - a per-frame GPU render-command pipeline
//!
//! Lumora collects renderable instances, groups them into GPU-efficient batches, turns the
//! batches into draw, indirect multi-draw, dispatch and function commands, and executes
//! them stage by stage against a graphics device with minimal state switching.
//!
//! - **Stages**: ordered by `before`/`after` constraints, pending until satisfiable
//! - **Batching**: instances bucketed by render setting and mesh identity
//! - **Commands**: indirect multi-draw for geometry, per-instance compute dispatches
//! - **Translucency**: interleaved, dedicated flush stages, or per-stage flexible
//!
//! # Quick Start
//!
//! ```ignore
//! use lumora::prelude::*;
//!
//! lumora::core::logging::init();
//!
//! let mut pipeline = GraphicsPipeline::default();
//! pipeline.register_stage(Stage::new("opaque"))?;
//! pipeline.add_instance(&"opaque".into(), handle, parameter, PipelineKind::Rasterization)?;
//!
//! loop {
//!     lumora::core::profiling::new_frame();
//!     pipeline.compute_frame_commands(&device)?;
//!     pipeline.render_all_stages(&device);
//!     pipeline.flush_remaining_translucent_commands(&device);
//! }
//! ```

pub use lumora_core as core;
pub use lumora_render as render;

pub use lumora_render::{
    GraphicsPipeline, PipelineConfig, PipelineError, PipelineKind, PipelineResult, RenderDevice,
    Stage, StageId, TranslucencyStrategy,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use lumora_render::{
        BatchContainerListener, ComputeInstance, DeviceState, DrawTier, FunctionInstance,
        GraphicsInstance, GraphicsPipeline, InstanceHandle, InstanceId, MeshInstance,
        MeshSource, MeshSourceId, PartialRenderSetting, PipelineConfig, PipelineError,
        PipelineKind, PipelineResult, RenderDevice, RenderParameter, ResourceBindings, Stage,
        StageId, TranslucencyStrategy, UniformSnapshot, VertexBuilder, VertexLayout,
    };
}
