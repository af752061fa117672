//! Instance registration, batching and indirect draw generation through the pipeline.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::{Sprite, sprite_parameter};
use lumora::prelude::*;
use lumora_render::{DeviceCall, MockRenderDevice, StateChange};
use parking_lot::Mutex;

fn single_stage(config: PipelineConfig) -> (GraphicsPipeline, StageId) {
    let mut pipeline = GraphicsPipeline::new(config);
    pipeline.register_stage(Stage::new("main")).unwrap();
    (pipeline, StageId::new("main"))
}

fn add(pipeline: &mut GraphicsPipeline, stage: &StageId, handle: InstanceHandle) {
    pipeline
        .add_instance(stage, handle, sprite_parameter(), PipelineKind::Rasterization)
        .unwrap();
}

#[test]
fn test_identical_instances_become_one_instanced_draw() {
    let (mut pipeline, stage) = single_stage(PipelineConfig::default());
    for id in 0..3 {
        add(&mut pipeline, &stage, Sprite::new(id).handle());
    }

    let device = MockRenderDevice::new();
    pipeline.compute_frame_commands(&device).unwrap();
    assert_eq!(pipeline.stats().commands(PipelineKind::Rasterization), 1);
    assert_eq!(pipeline.stats().indirect_records, 1);

    pipeline.render_stage(&stage, &device);
    let draws = device.calls_matching(|call| matches!(call, DeviceCall::MultiDrawIndirect { .. }));
    assert_eq!(draws.len(), 1);
    let DeviceCall::MultiDrawIndirect { draw_count, byte_offset, .. } = &draws[0] else {
        unreachable!()
    };
    assert_eq!(*draw_count, 1);
    assert_eq!(*byte_offset, 0);
}

#[test]
fn test_indirect_records_match_uploaded_bytes() {
    let (mut pipeline, stage) = single_stage(PipelineConfig::default());
    for id in 0..4 {
        add(
            &mut pipeline,
            &stage,
            Sprite::new(id).unshared().with_shader(1 + id % 2).handle(),
        );
    }

    let device = MockRenderDevice::new();
    pipeline.compute_frame_commands(&device).unwrap();
    let stats = *pipeline.stats();
    assert_eq!(stats.commands(PipelineKind::Rasterization), 2);
    assert_eq!(stats.indirect_records, 4);
    assert_eq!(stats.indirect_bytes_uploaded, 4 * 16);
    // Four triangles of three Float32x2 vertices.
    assert_eq!(stats.vertex_bytes_uploaded, 4 * 3 * 8);

    pipeline.render_stage(&stage, &device);
    let drawn: u32 = device
        .calls()
        .iter()
        .filter_map(|call| match call {
            DeviceCall::MultiDrawIndirect { draw_count, .. } => Some(*draw_count),
            _ => None,
        })
        .sum();
    assert_eq!(drawn, 4);
}

#[test]
fn test_direct_tier_replays_records_as_draws() {
    let (mut pipeline, stage) =
        single_stage(PipelineConfig::default().with_draw_tier(DrawTier::Direct));
    for id in 0..3 {
        add(&mut pipeline, &stage, Sprite::new(id).unshared().handle());
    }

    let device = MockRenderDevice::new();
    pipeline.compute_frame_commands(&device).unwrap();
    assert_eq!(pipeline.stats().indirect_bytes_uploaded, 0);
    pipeline.render_stage(&stage, &device);

    assert_eq!(device.count_multi_draws(), 0);
    let firsts: Vec<u32> = device
        .calls()
        .iter()
        .filter_map(|call| match call {
            DeviceCall::Draw { first_vertex, vertex_count, .. } => {
                assert_eq!(*vertex_count, 3);
                Some(*first_vertex)
            }
            _ => None,
        })
        .collect();
    assert_eq!(firsts, vec![0, 3, 6]);
}

#[test]
fn test_uniform_groups_partition_visible_instances() {
    let (mut pipeline, stage) = single_stage(PipelineConfig::default());
    for (id, tint) in [(0, 1), (1, 2), (2, 1), (3, 2), (4, 3)] {
        add(&mut pipeline, &stage, Sprite::new(id).with_tint(tint).handle());
    }

    let device = MockRenderDevice::new();
    pipeline.compute_frame_commands(&device).unwrap();

    let container = pipeline.container(&stage, PipelineKind::Rasterization).unwrap();
    let batches = container.collect_active_batches();
    assert_eq!(batches.len(), 1);
    let groups = &batches[0].uniform_batches;
    assert_eq!(groups.len(), 3);

    let mut seen: Vec<u64> = groups
        .iter()
        .flat_map(|group| group.instances().iter().map(|h| h.id().as_u64()))
        .collect();
    seen.sort();
    assert_eq!(seen, vec![0, 1, 2, 3, 4]);

    for group in groups {
        for handle in group.instances() {
            assert_eq!(&handle.base().uniforms(), &**group.snapshot());
        }
    }

    // One upload per distinct snapshot.
    pipeline.render_stage(&stage, &device);
    assert_eq!(device.count_uniform_uploads(), 3);
}

#[test]
fn test_invisible_instances_are_not_drawn() {
    let (mut pipeline, stage) = single_stage(PipelineConfig::default());
    let hidden = Arc::new(Sprite::new(0));
    hidden.visible.store(false, Ordering::SeqCst);
    add(&mut pipeline, &stage, InstanceHandle::Rasterizable(hidden.clone()));

    let device = MockRenderDevice::new();
    pipeline.compute_frame_commands(&device).unwrap();
    assert_eq!(pipeline.stats().total_commands(), 0);

    hidden.visible.store(true, Ordering::SeqCst);
    pipeline.compute_frame_commands(&device).unwrap();
    assert_eq!(pipeline.stats().commands(PipelineKind::Rasterization), 1);
}

#[test]
fn test_remove_then_readd_is_not_duplicated() {
    let (mut pipeline, stage) = single_stage(PipelineConfig::default());
    let sprite = Arc::new(Sprite::new(5));
    add(&mut pipeline, &stage, InstanceHandle::Rasterizable(sprite.clone()));
    assert!(pipeline.remove_instance(&stage, PipelineKind::Rasterization, InstanceId::new(5)));
    add(&mut pipeline, &stage, InstanceHandle::Rasterizable(sprite.clone()));
    add(&mut pipeline, &stage, InstanceHandle::Rasterizable(sprite));

    let device = MockRenderDevice::new();
    pipeline.compute_frame_commands(&device).unwrap();

    let container = pipeline.container(&stage, PipelineKind::Rasterization).unwrap();
    assert_eq!(container.instance_count(), 1);
    let batches = container.collect_active_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].visible_count(), 1);
}

#[test]
fn test_dirty_rebucketing() {
    let (mut pipeline, stage) = single_stage(PipelineConfig::default());
    let sprite = Arc::new(Sprite::new(1));
    add(&mut pipeline, &stage, InstanceHandle::Rasterizable(sprite.clone()));
    let container = pipeline
        .container(&stage, PipelineKind::Rasterization)
        .unwrap()
        .clone();
    let id = InstanceId::new(1);
    let before = container.batch_key_of(id).unwrap();

    // Nothing changed: same bucket.
    pipeline.mark_dirty(&stage, PipelineKind::Rasterization, id);
    let device = MockRenderDevice::new();
    pipeline.compute_frame_commands(&device).unwrap();
    assert_eq!(container.batch_key_of(id).unwrap(), before);

    // A new shader only takes effect once the instance is marked dirty.
    sprite.shader.store(9, Ordering::SeqCst);
    pipeline.compute_frame_commands(&device).unwrap();
    assert_eq!(container.batch_key_of(id).unwrap(), before);

    pipeline.mark_dirty(&stage, PipelineKind::Rasterization, id);
    pipeline.compute_frame_commands(&device).unwrap();
    let after = container.batch_key_of(id).unwrap();
    assert_ne!(after, before);
    assert_eq!(container.batch_members(&after), vec![id]);
    assert!(container.batch_members(&before).is_empty());
    assert_eq!(container.active_batch_count(), 1);
}

#[test]
fn test_discarded_instances_are_unregistered() {
    #[derive(Default)]
    struct Removals(Mutex<Vec<InstanceId>>);

    impl BatchContainerListener for Removals {
        fn on_instance_removed(&self, _kind: PipelineKind, instance: &InstanceHandle) {
            self.0.lock().push(instance.id());
        }
    }

    let (mut pipeline, stage) = single_stage(PipelineConfig::default());
    let removals = Arc::new(Removals::default());
    pipeline.add_container_listener(removals.clone());

    let sprite = Arc::new(Sprite::new(3));
    add(&mut pipeline, &stage, InstanceHandle::Rasterizable(sprite.clone()));
    add(&mut pipeline, &stage, Sprite::new(4).handle());
    sprite.discard.store(true, Ordering::SeqCst);

    let device = MockRenderDevice::new();
    pipeline.compute_frame_commands(&device).unwrap();

    assert_eq!(*removals.0.lock(), vec![InstanceId::new(3)]);
    let container = pipeline.container(&stage, PipelineKind::Rasterization).unwrap();
    assert!(!container.contains(InstanceId::new(3)));
    assert!(container.contains(InstanceId::new(4)));
}

#[test]
fn test_settings_differing_in_one_component_reapply_only_that_component() {
    let (mut pipeline, stage) = single_stage(PipelineConfig::default());
    let culled = DeviceState::opaque();
    let unculled = DeviceState::opaque().with_cull(None);
    add(&mut pipeline, &stage, Sprite::new(0).with_state(culled).handle());
    add(&mut pipeline, &stage, Sprite::new(1).with_state(unculled).handle());

    let device = MockRenderDevice::new();
    pipeline.compute_frame_commands(&device).unwrap();
    pipeline.render_stage(&stage, &device);

    let changes = device.state_changes();
    // The first setting applies every component, the second only culling.
    assert_eq!(changes.len(), 7);
    assert_eq!(changes[6], StateChange::Cull(None));
    assert_eq!(pipeline.stats().state_changes, 7);
    // Same shader for both, so the bindings are bound once.
    assert_eq!(device.count_resource_binds(), 1);
}

#[test]
fn test_named_settings_from_library() {
    let (mut pipeline, stage) = single_stage(PipelineConfig::default());
    pipeline.settings_mut().register(
        "glass",
        PartialRenderSetting::new()
            .with_state(DeviceState::translucent())
            .with_bindings(ResourceBindings::new().with_shader(lumora_render::ShaderId(20))),
    );
    pipeline
        .add_instance_with_setting(
            &stage,
            Sprite::new(0).handle(),
            "glass",
            sprite_parameter(),
            PipelineKind::Translucent,
        )
        .unwrap();

    let device = MockRenderDevice::new();
    pipeline.compute_frame_commands(&device).unwrap();
    pipeline.render_stage(&stage, &device);

    let bound = device.calls_matching(|call| matches!(call, DeviceCall::BindResources(_)));
    assert_eq!(
        bound,
        vec![DeviceCall::BindResources(
            ResourceBindings::new().with_shader(lumora_render::ShaderId(20))
        )]
    );
}

#[test]
fn test_opaque_and_translucent_vertex_resources_have_distinct_ids() {
    let (mut pipeline, stage) = single_stage(PipelineConfig::default());
    add(&mut pipeline, &stage, Sprite::new(1).handle());
    let mut glass = Sprite::new(2).translucent();
    glass.mesh = Some(99);
    pipeline
        .add_instance(&stage, glass.handle(), sprite_parameter(), PipelineKind::Translucent)
        .unwrap();

    let device = MockRenderDevice::new();
    pipeline.compute_frame_commands(&device).unwrap();
    pipeline.render_stage(&stage, &device);

    let bound: Vec<u64> = device
        .calls()
        .iter()
        .filter_map(|call| match call {
            DeviceCall::BindVertexResource { id } => Some(*id),
            _ => None,
        })
        .collect();
    assert_eq!(bound.len(), 2);
    assert_ne!(bound[0], bound[1]);
}
