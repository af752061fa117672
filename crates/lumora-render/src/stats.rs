//! Per-frame pipeline statistics.

use crate::kind::PipelineKind;

/// Counters for one frame, reset by `compute_frame_commands`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Commands built, per pipeline kind (indexed by [`PipelineKind::index`]).
    pub commands_built: [u32; PipelineKind::COUNT],
    /// Command generations that failed and were skipped.
    pub generation_failures: u32,
    /// Indirect draw records written.
    pub indirect_records: u32,
    /// Vertex bytes uploaded by post-processors.
    pub vertex_bytes_uploaded: u64,
    /// Indirect record bytes uploaded by post-processors.
    pub indirect_bytes_uploaded: u64,
    /// Stages executed.
    pub stages_executed: u32,
    /// Commands executed.
    pub commands_executed: u32,
    /// Device-state components applied.
    pub state_changes: u32,
    /// Resource-binding sets bound.
    pub resource_binds: u32,
    /// Binding slots captured into snapshots.
    pub snapshot_slots: u32,
}

impl FrameStats {
    pub fn commands(&self, kind: PipelineKind) -> u32 {
        self.commands_built[kind.index()]
    }

    pub fn total_commands(&self) -> u32 {
        self.commands_built.iter().sum()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
