//! Lumora Render
//!
//! A per-frame render-command pipeline. Instances are registered into batch containers
//! per stage and pipeline kind; every frame, flow strategies turn the active batches into
//! render commands, and the command queue executes them stage by stage while the device
//! state manager keeps redundant state switches off the device.
//!
//! # Overview
//!
//! - [`GraphicsPipeline`] - Orchestrates stages, containers, strategies and the queue
//! - [`Stage`] / [`StageList`] - Topologically ordered stages with pending insertion
//! - [`BatchContainer`] - Instance registration, dirty re-bucketing and active batches
//! - [`FlowStrategy`] - Per-kind command generation (indirect draws, dispatches, functions)
//! - [`RenderCommandQueue`] - Setting-grouped execution with a [`TranslucencyStrategy`]
//! - [`DeviceStateManager`] - Component-wise state diffing
//! - [`StateSnapshot`] - Binding capture and restore around stage execution
//!
//! # Example
//!
//! ```rust,ignore
//! use lumora_render::*;
//!
//! let mut pipeline = GraphicsPipeline::new(
//!     PipelineConfig::default().with_translucency(TranslucencyStrategy::DedicatedStages),
//! );
//! pipeline.register_stage(Stage::new("opaque"))?;
//! pipeline.register_stage(Stage::new("transparent").after("opaque").dedicated_translucent())?;
//!
//! pipeline.add_instance(&"opaque".into(), handle, parameter, PipelineKind::Rasterization)?;
//!
//! // Every frame:
//! pipeline.compute_frame_commands(&device)?;
//! pipeline.render_all_stages(&device);
//! pipeline.flush_remaining_translucent_commands(&device);
//! ```

pub mod batch;
pub mod binding;
pub mod command;
pub mod config;
pub mod container;
pub mod device;
pub mod error;
pub mod flow;
pub mod indirect;
pub mod instance;
pub mod kind;
pub mod pipeline;
pub mod queue;
pub mod setting;
pub mod snapshot;
pub mod stage;
pub mod state;
pub mod state_manager;
pub mod stats;
pub mod uniform;
pub mod vertex;

pub use batch::{ActiveBatch, BatchKey, BatchView, RenderBatch};
pub use binding::{BindingSlot, BufferId, RawBinding, ResourceBindings, ShaderId, TextureId};
pub use command::{CommandPayload, RenderCommand};
pub use config::{DrawTier, PipelineConfig};
pub use container::{BatchContainer, BatchContainerListener};
pub use device::RenderDevice;
pub use error::{PipelineError, PipelineResult};
pub use flow::{
    ComputeStrategy, FlowStrategy, FunctionStrategy, PostProcessOutput, PostProcessor,
    RasterizationStrategy,
};
pub use indirect::{DrawIndirect, DrawRange, IndirectCommandBuffer};
pub use instance::{
    Capability, ComputeInstance, FunctionInstance, GraphicsInstance, InstanceHandle, InstanceId,
    MeshInstance, MeshSource, MeshSourceId,
};
pub use kind::PipelineKind;
pub use pipeline::GraphicsPipeline;
pub use queue::{RenderCommandQueue, TranslucencyStrategy};
pub use setting::{
    PartialRenderSetting, RenderParameter, RenderSetting, SettingLibrary, VertexLayout,
};
pub use snapshot::{
    BindingResolver, DeclaredBindingResolver, ShaderBindingResolver, SnapshotScope, StateSnapshot,
};
pub use stage::{Stage, StageId, StageInsertion, StageList};
pub use state::{BlendMode, DepthState, DeviceState, StateChange, StateComponents};
pub use state_manager::{AcceptOutcome, DeviceStateManager};
pub use stats::FrameStats;
pub use uniform::{UniformBatch, UniformSnapshot, UniformValue};
pub use vertex::{DynamicBuffer, VertexBuilder, VertexResource};

#[cfg(any(test, feature = "mock"))]
pub use device::mock::{DeviceCall, MockRenderDevice};
