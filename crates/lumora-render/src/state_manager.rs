//! Minimal device-state switching.
//!
//! The manager remembers the last device state and binding set it applied and, when a
//! new render setting is accepted, emits only the components and bindings that differ.

use crate::binding::ResourceBindings;
use crate::device::RenderDevice;
use crate::setting::RenderSetting;
use crate::state::{DeviceState, StateComponents};

/// What [`DeviceStateManager::accept`] sent to the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptOutcome {
    /// Components applied.
    pub state_changes: u32,
    /// Whether the binding set was re-bound.
    pub rebound: bool,
}

/// Tracks applied device state and diffs incoming render settings against it.
#[derive(Debug, Default)]
pub struct DeviceStateManager {
    /// Baseline for diffing. Cleared by [`reset`](Self::reset).
    applied_state: Option<DeviceState>,
    bound: Option<ResourceBindings>,
    /// Survives resets, for [`force_apply_state`](Self::force_apply_state).
    last_state: Option<DeviceState>,
    last_bindings: Option<ResourceBindings>,
}

impl DeviceStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch the device to `setting`.
    ///
    /// If the setting applies state, only components differing from the last applied
    /// state are re-applied (all of them on the first call after a reset). The binding set
    /// is re-bound whenever it differs by value from the last bound one.
    pub fn accept(&mut self, setting: &RenderSetting, device: &dyn RenderDevice) -> AcceptOutcome {
        let mut outcome = AcceptOutcome::default();

        if setting.applies_state()
            && let Some(state) = setting.state()
        {
            let components = match &self.applied_state {
                Some(previous) => state.diff(previous),
                None => StateComponents::all(),
            };
            for change in state.changes(components) {
                device.apply_state(&change);
                outcome.state_changes += 1;
            }
            self.applied_state = Some(*state);
            self.last_state = Some(*state);
        }

        let bindings = setting.bindings();
        if self.bound.as_ref() != Some(bindings) {
            if !bindings.is_empty() {
                device.bind_resources(bindings);
                outcome.rebound = true;
            }
            self.bound = Some(bindings.clone());
            self.last_bindings = Some(bindings.clone());
        }

        if outcome.state_changes > 0 || outcome.rebound {
            tracing::trace!(
                "Accepted render setting: {} state changes, rebound: {}",
                outcome.state_changes,
                outcome.rebound
            );
        }
        outcome
    }

    /// Forget what was applied so the next [`accept`](Self::accept) applies everything.
    pub fn reset(&mut self) {
        self.applied_state = None;
        self.bound = None;
    }

    /// Re-apply the last known state and binding set unconditionally.
    pub fn force_apply_state(&mut self, device: &dyn RenderDevice) -> AcceptOutcome {
        let mut outcome = AcceptOutcome::default();
        if let Some(state) = self.last_state {
            for change in state.changes(StateComponents::all()) {
                device.apply_state(&change);
                outcome.state_changes += 1;
            }
            self.applied_state = Some(state);
        }
        if let Some(bindings) = &self.last_bindings {
            if !bindings.is_empty() {
                device.bind_resources(bindings);
                outcome.rebound = true;
            }
            self.bound = Some(bindings.clone());
        }
        tracing::debug!("Forced re-apply of {} state components", outcome.state_changes);
        outcome
    }

    pub fn applied_state(&self) -> Option<&DeviceState> {
        self.applied_state.as_ref()
    }

    pub fn bound_resources(&self) -> Option<&ResourceBindings> {
        self.bound.as_ref()
    }
}
