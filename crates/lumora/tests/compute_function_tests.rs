//! Compute and function pipeline kinds, and per-frame failure isolation.

mod common;

use std::sync::Arc;

use common::{Callback, Kernel, Sprite, entries, log, sprite_parameter};
use lumora::prelude::*;
use lumora_render::{
    ActiveBatch, Capability, DeviceCall, FlowStrategy, MockRenderDevice, RenderCommand,
};
use parking_lot::Mutex;

fn single_stage() -> (GraphicsPipeline, StageId) {
    let mut pipeline = GraphicsPipeline::default();
    pipeline.register_stage(Stage::new("main")).unwrap();
    (pipeline, StageId::new("main"))
}

#[test]
fn test_one_dispatch_per_instance_with_shared_uniform_uploads() {
    let (mut pipeline, stage) = single_stage();
    for (id, tint) in [(0, 1), (1, 1), (2, 2)] {
        pipeline
            .add_instance(
                &stage,
                InstanceHandle::dispatchable(Kernel {
                    id,
                    tint,
                    workgroups: [8, 4, 1],
                }),
                RenderParameter::NonRasterized,
                PipelineKind::Compute,
            )
            .unwrap();
    }

    let device = MockRenderDevice::new();
    pipeline.compute_frame_commands(&device).unwrap();
    assert_eq!(pipeline.stats().commands(PipelineKind::Compute), 3);

    pipeline.render_stage(&stage, &device);
    let dispatches = device.calls_matching(|call| matches!(call, DeviceCall::Dispatch(_)));
    assert_eq!(dispatches, vec![DeviceCall::Dispatch([8, 4, 1]); 3]);
    // Equal snapshots back to back are uploaded once.
    assert_eq!(device.count_uniform_uploads(), 2);
}

#[test]
fn test_compute_runs_before_rasterization() {
    let (mut pipeline, stage) = single_stage();
    pipeline
        .add_instance(
            &stage,
            Sprite::new(0).handle(),
            sprite_parameter(),
            PipelineKind::Rasterization,
        )
        .unwrap();
    pipeline
        .add_instance(
            &stage,
            InstanceHandle::dispatchable(Kernel {
                id: 0,
                tint: 0,
                workgroups: [1, 1, 1],
            }),
            RenderParameter::NonRasterized,
            PipelineKind::Compute,
        )
        .unwrap();

    let device = MockRenderDevice::new();
    pipeline.compute_frame_commands(&device).unwrap();
    pipeline.render_stage(&stage, &device);

    let calls = device.calls();
    let dispatch = calls
        .iter()
        .position(|call| matches!(call, DeviceCall::Dispatch(_)))
        .unwrap();
    let draw = calls
        .iter()
        .position(|call| matches!(call, DeviceCall::MultiDrawIndirect { .. }))
        .unwrap();
    assert!(dispatch < draw);
}

#[test]
fn test_function_instances_run_in_priority_order() {
    let (mut pipeline, stage) = single_stage();
    let trace = log();
    for (id, label, priority) in [(0, "late", 5), (1, "early", -1), (2, "middle", 0)] {
        pipeline
            .add_instance(
                &stage,
                Callback::handle(id, label, priority, &trace),
                RenderParameter::NonRasterized,
                PipelineKind::Function,
            )
            .unwrap();
    }

    let device = MockRenderDevice::new();
    pipeline.compute_frame_commands(&device).unwrap();
    assert_eq!(pipeline.stats().commands(PipelineKind::Function), 1);
    pipeline.render_stage(&stage, &device);

    assert_eq!(entries(&trace), vec!["early", "middle", "late"]);
    assert_eq!(device.count_uniform_uploads(), 0);
}

#[test]
fn test_execute_pipeline_kind_across_stages() {
    let mut pipeline = GraphicsPipeline::default();
    pipeline.register_stage(Stage::new("a")).unwrap();
    pipeline.register_stage(Stage::new("b").after("a")).unwrap();
    let trace = log();
    for (id, stage) in [(0, "a"), (1, "b")] {
        pipeline
            .add_instance(
                &StageId::new(stage),
                Callback::handle(id, stage, 0, &trace),
                RenderParameter::NonRasterized,
                PipelineKind::Function,
            )
            .unwrap();
    }

    let device = MockRenderDevice::new();
    pipeline.compute_frame_commands(&device).unwrap();
    pipeline.execute_pipeline_kind(PipelineKind::Function, &device);

    assert_eq!(entries(&trace), vec!["a", "b"]);
    assert!(pipeline.queue().is_empty());
}

#[test]
fn test_capability_mismatch_is_reported() {
    let (mut pipeline, stage) = single_stage();
    let err = pipeline
        .add_instance(
            &stage,
            Sprite::new(0).handle(),
            RenderParameter::NonRasterized,
            PipelineKind::Compute,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::CapabilityMismatch {
            expected: Capability::Dispatch,
            actual: Capability::Mesh,
            ..
        }
    ));

    let err = pipeline
        .add_instance(
            &stage,
            Sprite::new(0).handle(),
            RenderParameter::NonRasterized,
            PipelineKind::Rasterization,
        )
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidParameter { .. }));
}

struct Failing;

impl FlowStrategy for Failing {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn generate(
        &mut self,
        _stage: &StageId,
        kind: PipelineKind,
        _batches: &[ActiveBatch],
    ) -> PipelineResult<Vec<RenderCommand>> {
        Err(PipelineError::CommandGeneration {
            kind,
            message: "out of descriptors".to_string(),
        })
    }
}

#[test]
fn test_failing_strategy_does_not_abort_the_frame() {
    let (mut pipeline, stage) = single_stage();
    pipeline.set_flow_strategy(PipelineKind::Function, Box::new(Failing));
    let trace = log();
    pipeline
        .add_instance(
            &stage,
            Callback::handle(0, "never", 0, &trace),
            RenderParameter::NonRasterized,
            PipelineKind::Function,
        )
        .unwrap();
    pipeline
        .add_instance(
            &stage,
            Sprite::new(1).handle(),
            sprite_parameter(),
            PipelineKind::Rasterization,
        )
        .unwrap();

    let device = MockRenderDevice::new();
    pipeline.compute_frame_commands(&device).unwrap();
    assert_eq!(pipeline.stats().generation_failures, 1);
    assert_eq!(pipeline.stats().commands(PipelineKind::Rasterization), 1);

    pipeline.render_stage(&stage, &device);
    assert!(entries(&trace).is_empty());
    assert_eq!(device.count_multi_draws(), 1);
}

#[test]
fn test_tick_instances_runs_only_ticking_instances() {
    struct Clock {
        id: u64,
        ticks: Arc<Mutex<u32>>,
        ticking: bool,
    }

    impl GraphicsInstance for Clock {
        fn id(&self) -> InstanceId {
            InstanceId::new(self.id)
        }

        fn partial_setting(&self) -> PartialRenderSetting {
            PartialRenderSetting::new()
        }

        fn should_tick(&self) -> bool {
            self.ticking
        }

        fn tick(&self) {
            *self.ticks.lock() += 1;
        }
    }

    impl FunctionInstance for Clock {
        fn invoke(&self, _device: &dyn RenderDevice) {}
    }

    let (mut pipeline, stage) = single_stage();
    let ticks = Arc::new(Mutex::new(0));
    for (id, ticking) in [(0, true), (1, false), (2, true)] {
        pipeline
            .add_instance(
                &stage,
                InstanceHandle::functional(Clock {
                    id,
                    ticks: ticks.clone(),
                    ticking,
                }),
                RenderParameter::NonRasterized,
                PipelineKind::Function,
            )
            .unwrap();
    }

    assert_eq!(pipeline.tick_instances(), 2);
    assert_eq!(*ticks.lock(), 2);
}

#[test]
fn test_force_apply_state_reapplies_last_setting() {
    let (mut pipeline, stage) = single_stage();
    pipeline
        .add_instance(
            &stage,
            Sprite::new(0).handle(),
            sprite_parameter(),
            PipelineKind::Rasterization,
        )
        .unwrap();

    let device = MockRenderDevice::new();
    pipeline.compute_frame_commands(&device).unwrap();
    pipeline.render_stage(&stage, &device);
    device.clear_calls();

    let outcome = pipeline.force_apply_state(&device);
    assert_eq!(outcome.state_changes, 6);
    assert!(outcome.rebound);
    assert_eq!(device.count_state_changes(), 6);
    assert_eq!(device.count_resource_binds(), 1);
}
