//! Pipeline kinds and their execution priority.

use std::fmt;

use crate::instance::Capability;

/// The kind of work a batch container and flow strategy handle.
///
/// Declaration order is execution priority: within a stage, compute work runs first and
/// translucent draws run last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PipelineKind {
    /// Compute dispatches, one per visible instance.
    Compute,
    /// Custom callables wrapped per render setting.
    Function,
    /// Opaque rasterized geometry, drawn through indirect multi-draws.
    Rasterization,
    /// Translucent rasterized geometry. Same batching as [`PipelineKind::Rasterization`]
    /// but scheduled separately so its ordering relative to solid draws can be controlled.
    Translucent,
}

impl PipelineKind {
    /// Number of pipeline kinds.
    pub const COUNT: usize = 4;

    /// All kinds in execution priority order.
    pub const ALL: [PipelineKind; Self::COUNT] = [
        PipelineKind::Compute,
        PipelineKind::Function,
        PipelineKind::Rasterization,
        PipelineKind::Translucent,
    ];

    /// Kinds that are never deferred by the translucency policy.
    pub const SOLID: [PipelineKind; 3] = [
        PipelineKind::Compute,
        PipelineKind::Function,
        PipelineKind::Rasterization,
    ];

    /// Dense index, usable for per-kind arrays.
    pub const fn index(self) -> usize {
        match self {
            PipelineKind::Compute => 0,
            PipelineKind::Function => 1,
            PipelineKind::Rasterization => 2,
            PipelineKind::Translucent => 3,
        }
    }

    /// Execution priority; lower runs first.
    pub const fn priority(self) -> u32 {
        self.index() as u32
    }

    /// Whether this kind batches geometry into indirect draws.
    pub const fn rasterizes(self) -> bool {
        matches!(self, PipelineKind::Rasterization | PipelineKind::Translucent)
    }

    /// Whether this kind is subject to the translucency policy.
    pub const fn is_translucent(self) -> bool {
        matches!(self, PipelineKind::Translucent)
    }

    /// The instance capability a container of this kind accepts.
    pub const fn required_capability(self) -> Capability {
        match self {
            PipelineKind::Compute => Capability::Dispatch,
            PipelineKind::Function => Capability::Function,
            PipelineKind::Rasterization | PipelineKind::Translucent => Capability::Mesh,
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineKind::Compute => write!(f, "Compute"),
            PipelineKind::Function => write!(f, "Function"),
            PipelineKind::Rasterization => write!(f, "Rasterization"),
            PipelineKind::Translucent => write!(f, "Translucent"),
        }
    }
}
