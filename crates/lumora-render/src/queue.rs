//! The render command queue and translucency policies.
//!
//! Commands are grouped per pipeline kind, stage and render setting. Executing a stage
//! runs its groups kind by kind in priority order, switching device state once per
//! render setting, inside a binding snapshot that is restored when the stage ends.
//! The translucency strategy decides whether translucent groups run with their stage
//! or are deferred to a later flush.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use lumora_core::profiling::profile_function;

use crate::command::RenderCommand;
use crate::device::RenderDevice;
use crate::kind::PipelineKind;
use crate::setting::SettingRef;
use crate::snapshot::{BindingResolver, SnapshotScope, StateSnapshot};
use crate::stage::{Stage, StageId};
use crate::state_manager::DeviceStateManager;
use crate::stats::FrameStats;

/// When translucent commands execute relative to solid ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TranslucencyStrategy {
    /// Every stage runs its translucent commands right after its solid ones.
    #[default]
    Interleaved,
    /// Translucent commands accumulate until a stage marked as a dedicated translucent
    /// flush point runs.
    DedicatedStages,
    /// Each stage decides whether its translucent commands follow its solid ones or wait
    /// for [`RenderCommandQueue::flush_remaining_translucent_commands`].
    Flexible,
}

impl fmt::Display for TranslucencyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslucencyStrategy::Interleaved => write!(f, "Interleaved"),
            TranslucencyStrategy::DedicatedStages => write!(f, "DedicatedStages"),
            TranslucencyStrategy::Flexible => write!(f, "Flexible"),
        }
    }
}

/// Commands of one kind and stage, grouped by render setting in first-seen order.
pub type SettingGroups = IndexMap<SettingRef, Vec<RenderCommand>, ahash::RandomState>;

/// Collaborators borrowed for the duration of an execution call.
pub struct ExecutionContext<'a> {
    pub device: &'a dyn RenderDevice,
    pub state: &'a mut DeviceStateManager,
    pub resolver: &'a dyn BindingResolver,
    pub stats: &'a mut FrameStats,
}

/// Per-frame command storage and execution.
pub struct RenderCommandQueue {
    translucency: TranslucencyStrategy,
    follows_solid: Option<bool>,
    by_stage: [IndexMap<StageId, SettingGroups, ahash::RandomState>; PipelineKind::COUNT],
    deferred: SettingGroups,
}

impl RenderCommandQueue {
    /// `follows_solid` is the pipeline-wide default for the flexible strategy.
    pub fn new(translucency: TranslucencyStrategy, follows_solid: Option<bool>) -> Self {
        Self {
            translucency,
            follows_solid,
            by_stage: Default::default(),
            deferred: SettingGroups::default(),
        }
    }

    pub fn translucency(&self) -> TranslucencyStrategy {
        self.translucency
    }

    pub fn push(&mut self, command: RenderCommand) {
        self.by_stage[command.kind().index()]
            .entry(command.stage().clone())
            .or_default()
            .entry(command.setting().clone())
            .or_default()
            .push(command);
    }

    /// Queued commands, excluding deferred translucent ones.
    pub fn command_count(&self) -> usize {
        self.by_stage
            .iter()
            .flat_map(|stages| stages.values())
            .map(count)
            .sum()
    }

    pub fn stage_command_count(&self, stage: &StageId, kind: PipelineKind) -> usize {
        self.by_stage[kind.index()].get(stage).map(count).unwrap_or(0)
    }

    /// Commands queued for `kind`, across every stage, grouped by render setting.
    pub fn commands_by_setting(&self, kind: PipelineKind) -> IndexMap<SettingRef, usize, ahash::RandomState> {
        let mut counts: IndexMap<SettingRef, usize, ahash::RandomState> = IndexMap::default();
        for groups in self.by_stage[kind.index()].values() {
            for (setting, commands) in groups {
                *counts.entry(setting.clone()).or_default() += commands.len();
            }
        }
        counts
    }

    /// Translucent commands waiting for a flush.
    pub fn deferred_count(&self) -> usize {
        count(&self.deferred)
    }

    pub fn is_empty(&self) -> bool {
        self.command_count() == 0 && self.deferred.is_empty()
    }

    /// Drop every queued and deferred command.
    pub fn clear(&mut self) {
        for stages in &mut self.by_stage {
            stages.clear();
        }
        self.deferred.clear();
    }

    /// Execute everything queued for `stage`, applying the translucency strategy.
    ///
    /// Runs even if the stage has no commands: the defensive snapshot is still captured
    /// and restored.
    pub fn execute_stage(&mut self, stage: &Stage, cx: &mut ExecutionContext<'_>) {
        profile_function!();

        let id = stage.id();
        let mut plan: Vec<(PipelineKind, SettingGroups)> = PipelineKind::SOLID
            .iter()
            .filter_map(|kind| {
                self.by_stage[kind.index()]
                    .shift_remove(id)
                    .map(|groups| (*kind, groups))
            })
            .collect();

        let translucent = self.by_stage[PipelineKind::Translucent.index()]
            .shift_remove(id)
            .unwrap_or_default();
        match self.translucency {
            TranslucencyStrategy::Interleaved => {
                plan.push((PipelineKind::Translucent, translucent));
            }
            TranslucencyStrategy::DedicatedStages => {
                self.defer(translucent);
                if stage.is_dedicated_translucent() {
                    tracing::trace!("Flushing deferred translucent commands at stage '{}'", id);
                    plan.push((PipelineKind::Translucent, std::mem::take(&mut self.deferred)));
                }
            }
            TranslucencyStrategy::Flexible => {
                let follows = stage
                    .follows_solid_override()
                    .or(self.follows_solid)
                    .unwrap_or(true);
                if follows {
                    plan.push((PipelineKind::Translucent, translucent));
                } else {
                    self.defer(translucent);
                }
            }
        }

        run_isolated(&plan, cx);
        cx.stats.stages_executed += 1;
    }

    /// Execute every queued command of `kind`, across all stages, merged by render setting.
    pub fn execute_pipeline_kind(&mut self, kind: PipelineKind, cx: &mut ExecutionContext<'_>) {
        profile_function!();

        let mut merged = SettingGroups::default();
        for (_, groups) in self.by_stage[kind.index()].drain(..) {
            merge(&mut merged, groups);
        }
        if merged.is_empty() {
            return;
        }
        run_isolated(&[(kind, merged)], cx);
    }

    /// Execute translucent commands still deferred, typically once after the last stage.
    pub fn flush_remaining_translucent_commands(&mut self, cx: &mut ExecutionContext<'_>) {
        if self.deferred.is_empty() {
            return;
        }
        profile_function!();
        tracing::trace!(
            "Flushing {} remaining translucent commands",
            self.deferred_count()
        );
        let deferred = std::mem::take(&mut self.deferred);
        run_isolated(&[(PipelineKind::Translucent, deferred)], cx);
    }

    fn defer(&mut self, groups: SettingGroups) {
        merge(&mut self.deferred, groups);
    }
}

impl Default for RenderCommandQueue {
    fn default() -> Self {
        Self::new(TranslucencyStrategy::default(), None)
    }
}

impl fmt::Debug for RenderCommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderCommandQueue")
            .field("translucency", &self.translucency)
            .field("queued", &self.command_count())
            .field("deferred", &self.deferred_count())
            .finish()
    }
}

fn count(groups: &SettingGroups) -> usize {
    groups.values().map(Vec::len).sum()
}

fn merge(into: &mut SettingGroups, groups: SettingGroups) {
    for (setting, commands) in groups {
        into.entry(setting).or_default().extend(commands);
    }
}

/// The slots every setting in `plan` may disturb, plus the defensive minimum.
///
/// Falls back to the defensive minimum if any binding set fails to resolve.
fn snapshot_scope(plan: &[(PipelineKind, SettingGroups)], resolver: &dyn BindingResolver) -> SnapshotScope {
    let mut scope = SnapshotScope::defensive();
    for (_, groups) in plan {
        for setting in groups.keys() {
            match resolver.resolve(setting.bindings()) {
                Ok(resolved) => scope.union(&resolved),
                Err(e) => {
                    tracing::debug!("{}; capturing the defensive scope only", e);
                    return SnapshotScope::defensive();
                }
            }
        }
    }
    scope
}

/// Execute `plan` between a snapshot capture and restore, with the state manager reset
/// on both sides.
fn run_isolated(plan: &[(PipelineKind, SettingGroups)], cx: &mut ExecutionContext<'_>) {
    let scope = snapshot_scope(plan, cx.resolver);
    let snapshot = StateSnapshot::capture(cx.device, &scope);
    cx.stats.snapshot_slots += snapshot.len() as u32;

    cx.state.reset();
    for (kind, groups) in plan {
        execute_groups(*kind, groups, cx);
    }
    cx.state.reset();

    snapshot.restore(cx.device);
}

fn execute_groups(kind: PipelineKind, groups: &SettingGroups, cx: &mut ExecutionContext<'_>) {
    for (setting, commands) in groups {
        let outcome = cx.state.accept(setting, cx.device);
        cx.stats.state_changes += outcome.state_changes;
        cx.stats.resource_binds += outcome.rebound as u32;

        let mut last_uniforms = None::<Arc<_>>;
        for command in commands {
            command.execute(cx.device, &mut last_uniforms);
            cx.stats.commands_executed += 1;
        }
        tracing::trace!("Executed {} {} commands", commands.len(), kind);
    }
}
