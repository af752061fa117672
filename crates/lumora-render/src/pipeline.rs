//! The graphics pipeline: stage ordering, per-kind containers and strategies, and the
//! per-frame compute → queue → execute cycle.
//!
//! A frame is driven by the caller:
//!
//! 1. [`GraphicsPipeline::compute_frame_commands`] folds pending registrations into the
//!    containers, generates commands for every ordered stage and uploads buffers.
//! 2. [`GraphicsPipeline::render_stage`] (or one of the range variants) executes stages.
//! 3. [`GraphicsPipeline::flush_remaining_translucent_commands`] runs translucent work
//!    the translucency strategy deferred.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use lumora_core::profiling::{profile_function, profile_scope};

use crate::config::PipelineConfig;
use crate::container::{BatchContainer, BatchContainerListener};
use crate::device::RenderDevice;
use crate::error::{PipelineError, PipelineResult};
use crate::flow::{FlowStrategy, PostProcessor, default_strategy};
use crate::instance::{InstanceHandle, InstanceId};
use crate::kind::PipelineKind;
use crate::queue::{ExecutionContext, RenderCommandQueue};
use crate::setting::{RenderParameter, SettingLibrary};
use crate::snapshot::{BindingResolver, DeclaredBindingResolver};
use crate::stage::{Stage, StageId, StageInsertion, StageList};
use crate::state_manager::{AcceptOutcome, DeviceStateManager};
use crate::stats::FrameStats;

type ContainerKey = (StageId, PipelineKind);

/// Owns stages, batch containers, flow strategies and the command queue.
pub struct GraphicsPipeline {
    config: PipelineConfig,
    stages: StageList,
    containers: IndexMap<ContainerKey, Arc<BatchContainer>, ahash::RandomState>,
    strategies: [Box<dyn FlowStrategy>; PipelineKind::COUNT],
    listeners: Vec<Arc<dyn BatchContainerListener>>,
    state: DeviceStateManager,
    resolver: Box<dyn BindingResolver>,
    settings: SettingLibrary,
    queue: RenderCommandQueue,
    stats: FrameStats,
}

impl GraphicsPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        tracing::info!(
            "Creating graphics pipeline (translucency: {}, draw tier: {}, strict: {})",
            config.translucency,
            config.draw_tier,
            config.strict_stage_order
        );
        Self {
            stages: StageList::new(config.strict_stage_order),
            containers: IndexMap::default(),
            strategies: PipelineKind::ALL.map(|kind| default_strategy(kind, &config)),
            listeners: Vec::new(),
            state: DeviceStateManager::new(),
            resolver: Box::new(DeclaredBindingResolver),
            settings: SettingLibrary::new(),
            queue: RenderCommandQueue::new(config.translucency, config.translucent_follows_solid),
            stats: FrameStats::default(),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // --- Stages ---

    /// Register a stage. Returns whether it was ordered immediately or is pending.
    pub fn register_stage(&mut self, stage: Stage) -> PipelineResult<StageInsertion> {
        let id = stage.id().clone();
        let insertion = self.stages.register(stage)?;
        match insertion {
            StageInsertion::Inserted => tracing::debug!("Registered stage '{}'", id),
            StageInsertion::Pending => {
                tracing::debug!("Stage '{}' is pending until its dependencies register", id)
            }
        }
        Ok(insertion)
    }

    /// Stages waiting for dependencies.
    pub fn pending_stages(&self) -> Vec<StageId> {
        self.stages.pending_stages()
    }

    pub fn stages(&self) -> &StageList {
        &self.stages
    }

    // --- Instances ---

    /// Register an instance into the container for `stage` and `kind`.
    ///
    /// The stage may still be pending; its instances produce commands once it is ordered.
    pub fn add_instance(
        &mut self,
        stage: &StageId,
        instance: InstanceHandle,
        parameter: RenderParameter,
        kind: PipelineKind,
    ) -> PipelineResult<()> {
        if !self.stages.contains(stage) {
            return Err(PipelineError::UnknownStage(stage.clone()));
        }
        self.container_or_create(stage, kind)
            .register_instance(instance, parameter)
    }

    /// Like [`add_instance`](Self::add_instance), with the partial setting looked up by
    /// name in the [`SettingLibrary`] instead of taken from the instance.
    pub fn add_instance_with_setting(
        &mut self,
        stage: &StageId,
        instance: InstanceHandle,
        setting: &str,
        parameter: RenderParameter,
        kind: PipelineKind,
    ) -> PipelineResult<()> {
        let partial = self.settings.get(setting)?.clone();
        self.add_instance(stage, instance.with_setting(partial), parameter, kind)
    }

    /// Unregister an instance. Returns `false` if it was not registered there.
    pub fn remove_instance(&self, stage: &StageId, kind: PipelineKind, id: InstanceId) -> bool {
        self.container(stage, kind)
            .is_some_and(|container| container.unregister_instance(id))
    }

    /// Queue an instance for re-bucketing at the next frame.
    pub fn mark_dirty(&self, stage: &StageId, kind: PipelineKind, id: InstanceId) {
        if let Some(container) = self.container(stage, kind) {
            container.mark_dirty(id);
        }
    }

    /// The container for `stage` and `kind`, if anything was ever registered there.
    ///
    /// Containers can be shared with a tick thread for registration and dirty marking.
    pub fn container(&self, stage: &StageId, kind: PipelineKind) -> Option<&Arc<BatchContainer>> {
        self.containers.get(&(stage.clone(), kind))
    }

    fn container_or_create(&mut self, stage: &StageId, kind: PipelineKind) -> &Arc<BatchContainer> {
        let listeners = &self.listeners;
        self.containers
            .entry((stage.clone(), kind))
            .or_insert_with(|| {
                tracing::trace!("Creating {} container for stage '{}'", kind, stage);
                let container = BatchContainer::new(kind);
                for listener in listeners {
                    container.add_listener(listener.clone());
                }
                Arc::new(container)
            })
    }

    /// Observe membership of every container, existing and future.
    pub fn add_container_listener(&mut self, listener: Arc<dyn BatchContainerListener>) {
        for container in self.containers.values() {
            container.add_listener(listener.clone());
        }
        self.listeners.push(listener);
    }

    /// Call `tick` on every registered instance that asks for it.
    pub fn tick_instances(&self) -> usize {
        profile_function!();
        self.containers
            .values()
            .map(|container| container.tick_instances())
            .sum()
    }

    // --- Collaborators ---

    /// Replace the flow strategy of `kind`.
    pub fn set_flow_strategy(&mut self, kind: PipelineKind, strategy: Box<dyn FlowStrategy>) {
        tracing::debug!("Using '{}' flow strategy for {}", strategy.name(), kind);
        self.strategies[kind.index()] = strategy;
    }

    /// Replace how snapshot scopes are derived from binding sets.
    pub fn set_binding_resolver(&mut self, resolver: impl BindingResolver + 'static) {
        self.resolver = Box::new(resolver);
    }

    pub fn settings(&self) -> &SettingLibrary {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut SettingLibrary {
        &mut self.settings
    }

    // --- Frame ---

    /// Build this frame's commands.
    ///
    /// A strategy failing for one stage is logged and that stage/kind contributes no
    /// commands. A failing post-processor (buffer upload) discards every command of the
    /// frame and is returned.
    pub fn compute_frame_commands(&mut self, device: &dyn RenderDevice) -> PipelineResult<()> {
        profile_function!();

        self.stats.reset();
        if !self.queue.is_empty() {
            tracing::warn!(
                "Discarding {} queued and {} deferred commands from the previous frame",
                self.queue.command_count(),
                self.queue.deferred_count()
            );
            self.queue.clear();
        }

        {
            profile_scope!("prepare_containers");
            for container in self.containers.values() {
                container.prepare_for_frame();
            }
        }

        let mut post_processors: Vec<(PipelineKind, Box<dyn PostProcessor>)> = Vec::new();
        for (kind, strategy) in PipelineKind::ALL.into_iter().zip(self.strategies.iter_mut()) {
            strategy.begin_frame();
            if let Some(processor) = strategy.post_processor() {
                post_processors.push((kind, processor));
            }
        }

        for stage in self.stages.ordered() {
            let id = stage.id();
            for kind in PipelineKind::ALL {
                let Some(container) = self.containers.get(&(id.clone(), kind)) else {
                    continue;
                };
                let batches = container.collect_active_batches();
                if batches.is_empty() {
                    continue;
                }

                let strategy = &mut self.strategies[kind.index()];
                match strategy.generate(id, kind, &batches) {
                    Ok(commands) => {
                        self.stats.commands_built[kind.index()] += commands.len() as u32;
                        for command in commands {
                            self.stats.indirect_records += command.draw_count();
                            self.queue.push(command);
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            "'{}' strategy failed for stage '{}': {}",
                            strategy.name(),
                            id,
                            e
                        );
                        self.stats.generation_failures += 1;
                    }
                }
            }
        }

        for (kind, processor) in post_processors {
            profile_scope!("post_process");
            match processor.process(device) {
                Ok(output) => {
                    self.stats.vertex_bytes_uploaded += output.vertex_bytes;
                    self.stats.indirect_bytes_uploaded += output.indirect_bytes;
                }
                Err(e) => {
                    tracing::error!("{} post-processing failed: {}", kind, e);
                    self.queue.clear();
                    return Err(e);
                }
            }
        }

        tracing::trace!(
            "Built {} commands for {} stages",
            self.stats.total_commands(),
            self.stages.len()
        );
        Ok(())
    }

    /// Execute the queued commands of one stage. Unknown or pending stages are a no-op.
    pub fn render_stage(&mut self, id: &StageId, device: &dyn RenderDevice) {
        let Some(stage) = self.stages.get(id) else {
            tracing::debug!("Ignoring render of unknown stage '{}'", id);
            return;
        };
        let mut cx = ExecutionContext {
            device,
            state: &mut self.state,
            resolver: self.resolver.as_ref(),
            stats: &mut self.stats,
        };
        self.queue.execute_stage(stage, &mut cx);
    }

    /// Execute every stage ordered before `id`.
    pub fn render_stages_before(&mut self, id: &StageId, device: &dyn RenderDevice) {
        self.render_range(self.stages.before(id), id, device);
    }

    /// Execute every stage ordered after `id`.
    pub fn render_stages_after(&mut self, id: &StageId, device: &dyn RenderDevice) {
        self.render_range(self.stages.after(id), id, device);
    }

    /// Execute every stage strictly between `from` and `to`.
    pub fn render_stages_between(&mut self, from: &StageId, to: &StageId, device: &dyn RenderDevice) {
        if self.stages.position(to).is_none() {
            tracing::debug!("Ignoring stage range ending at unknown stage '{}'", to);
            return;
        }
        self.render_range(self.stages.between(from, to), from, device);
    }

    /// Execute every ordered stage.
    pub fn render_all_stages(&mut self, device: &dyn RenderDevice) {
        for id in self.stages.ids().to_vec() {
            self.render_stage(&id, device);
        }
    }

    fn render_range(&mut self, ids: Vec<StageId>, anchor: &StageId, device: &dyn RenderDevice) {
        if self.stages.position(anchor).is_none() {
            tracing::debug!("Ignoring stage range around unknown stage '{}'", anchor);
            return;
        }
        for id in ids {
            self.render_stage(&id, device);
        }
    }

    /// Execute every queued command of `kind` across all stages, merged by render setting.
    pub fn execute_pipeline_kind(&mut self, kind: PipelineKind, device: &dyn RenderDevice) {
        let mut cx = ExecutionContext {
            device,
            state: &mut self.state,
            resolver: self.resolver.as_ref(),
            stats: &mut self.stats,
        };
        self.queue.execute_pipeline_kind(kind, &mut cx);
    }

    /// Execute translucent commands the translucency strategy deferred.
    pub fn flush_remaining_translucent_commands(&mut self, device: &dyn RenderDevice) {
        let mut cx = ExecutionContext {
            device,
            state: &mut self.state,
            resolver: self.resolver.as_ref(),
            stats: &mut self.stats,
        };
        self.queue.flush_remaining_translucent_commands(&mut cx);
    }

    /// Re-apply the last known device state and bindings, e.g. after an external reset.
    pub fn force_apply_state(&mut self, device: &dyn RenderDevice) -> AcceptOutcome {
        self.state.force_apply_state(device)
    }

    /// Counters of the current frame.
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn queue(&self) -> &RenderCommandQueue {
        &self.queue
    }
}

impl Default for GraphicsPipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl fmt::Debug for GraphicsPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsPipeline")
            .field("config", &self.config)
            .field("stages", &self.stages.ids())
            .field("pending", &self.stages.pending_stages())
            .field("containers", &self.containers.len())
            .field("queue", &self.queue)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::device::mock::MockRenderDevice;
    use crate::instance::{FunctionInstance, GraphicsInstance};
    use crate::setting::PartialRenderSetting;
    use crate::state::DeviceState;

    struct Callback {
        id: u64,
        hits: Arc<Mutex<u32>>,
    }

    impl GraphicsInstance for Callback {
        fn id(&self) -> InstanceId {
            InstanceId::new(self.id)
        }

        fn partial_setting(&self) -> PartialRenderSetting {
            PartialRenderSetting::new()
        }
    }

    impl FunctionInstance for Callback {
        fn invoke(&self, _device: &dyn RenderDevice) {
            *self.hits.lock() += 1;
        }
    }

    #[derive(Default)]
    struct CountingListener {
        added: Mutex<u32>,
    }

    impl BatchContainerListener for CountingListener {
        fn on_instance_added(&self, _kind: PipelineKind, _instance: &InstanceHandle) {
            *self.added.lock() += 1;
        }
    }

    fn callback(id: u64, hits: &Arc<Mutex<u32>>) -> InstanceHandle {
        InstanceHandle::functional(Callback {
            id,
            hits: hits.clone(),
        })
    }

    #[test]
    fn test_add_instance_to_unknown_stage_fails() {
        let mut pipeline = GraphicsPipeline::default();
        let hits = Arc::new(Mutex::new(0));
        let result = pipeline.add_instance(
            &StageId::new("missing"),
            callback(1, &hits),
            RenderParameter::NonRasterized,
            PipelineKind::Function,
        );
        assert_eq!(result, Err(PipelineError::UnknownStage(StageId::new("missing"))));
    }

    #[test]
    fn test_add_instance_with_named_setting() {
        let mut pipeline = GraphicsPipeline::default();
        pipeline.register_stage(Stage::new("main")).unwrap();
        pipeline.settings_mut().register(
            "overlay",
            PartialRenderSetting::new().with_state(DeviceState::translucent()),
        );
        let hits = Arc::new(Mutex::new(0));
        let stage = StageId::new("main");

        let unknown = pipeline.add_instance_with_setting(
            &stage,
            callback(1, &hits),
            "missing",
            RenderParameter::NonRasterized,
            PipelineKind::Function,
        );
        assert_eq!(unknown, Err(PipelineError::UnknownSetting("missing".to_string())));

        pipeline
            .add_instance_with_setting(
                &stage,
                callback(1, &hits),
                "overlay",
                RenderParameter::NonRasterized,
                PipelineKind::Function,
            )
            .unwrap();
        let key = pipeline
            .container(&stage, PipelineKind::Function)
            .and_then(|container| container.batch_key_of(InstanceId::new(1)))
            .unwrap();
        assert_eq!(key.setting().state(), Some(&DeviceState::translucent()));
    }

    #[test]
    fn test_listener_reaches_future_containers() {
        let mut pipeline = GraphicsPipeline::default();
        pipeline.register_stage(Stage::new("a")).unwrap();
        pipeline.register_stage(Stage::new("b").after("a")).unwrap();
        let hits = Arc::new(Mutex::new(0));

        pipeline
            .add_instance(
                &StageId::new("a"),
                callback(1, &hits),
                RenderParameter::NonRasterized,
                PipelineKind::Function,
            )
            .unwrap();
        let listener = Arc::new(CountingListener::default());
        pipeline.add_container_listener(listener.clone());
        pipeline
            .add_instance(
                &StageId::new("a"),
                callback(2, &hits),
                RenderParameter::NonRasterized,
                PipelineKind::Function,
            )
            .unwrap();
        pipeline
            .add_instance(
                &StageId::new("b"),
                callback(3, &hits),
                RenderParameter::NonRasterized,
                PipelineKind::Function,
            )
            .unwrap();

        assert_eq!(*listener.added.lock(), 2);
    }

    #[test]
    fn test_frame_cycle_runs_function_instances() {
        let mut pipeline = GraphicsPipeline::default();
        pipeline.register_stage(Stage::new("main")).unwrap();
        let hits = Arc::new(Mutex::new(0));
        let stage = StageId::new("main");
        for id in 0..3 {
            pipeline
                .add_instance(
                    &stage,
                    callback(id, &hits),
                    RenderParameter::NonRasterized,
                    PipelineKind::Function,
                )
                .unwrap();
        }

        let device = MockRenderDevice::new();
        pipeline.compute_frame_commands(&device).unwrap();
        assert_eq!(pipeline.stats().commands(PipelineKind::Function), 1);

        pipeline.render_stage(&stage, &device);
        assert_eq!(*hits.lock(), 3);
        assert_eq!(pipeline.stats().stages_executed, 1);
        assert!(pipeline.queue().is_empty());

        assert!(pipeline.remove_instance(&stage, PipelineKind::Function, InstanceId::new(0)));
        assert!(!pipeline.remove_instance(&stage, PipelineKind::Function, InstanceId::new(0)));
    }

    #[test]
    fn test_unknown_stage_render_is_noop() {
        let mut pipeline = GraphicsPipeline::default();
        let device = MockRenderDevice::new();
        pipeline.render_stage(&StageId::new("nowhere"), &device);
        pipeline.render_stages_after(&StageId::new("nowhere"), &device);
        assert_eq!(device.call_count(), 0);
        assert_eq!(pipeline.stats().stages_executed, 0);
    }

    #[test]
    fn test_pending_stage_is_not_rendered() {
        let mut pipeline = GraphicsPipeline::default();
        let insertion = pipeline
            .register_stage(Stage::new("post").after("main"))
            .unwrap();
        assert_eq!(insertion, StageInsertion::Pending);
        assert_eq!(pipeline.pending_stages(), vec![StageId::new("post")]);

        let device = MockRenderDevice::new();
        pipeline.render_stage(&StageId::new("post"), &device);
        assert_eq!(device.call_count(), 0);

        pipeline.register_stage(Stage::new("main")).unwrap();
        assert!(pipeline.pending_stages().is_empty());
        pipeline.render_all_stages(&device);
        assert_eq!(pipeline.stats().stages_executed, 2);
    }
}
