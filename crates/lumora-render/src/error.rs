//! Error types for the render pipeline.

use std::fmt;

use crate::instance::{Capability, InstanceId};
use crate::kind::PipelineKind;
use crate::stage::StageId;

/// Errors reported by the render pipeline.
///
/// Every variant describes a wiring bug (unknown ids, mismatched capabilities, impossible
/// stage orderings). Empty batches, invisible instances and missing meshes are not errors;
/// they simply produce no commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The stage id is not registered (neither ordered nor pending).
    UnknownStage(StageId),

    /// A stage with this id was already registered.
    DuplicateStage(StageId),

    /// Inserting the stage would create an ordering cycle.
    StageCycle {
        /// The stage whose constraints close the cycle.
        stage: StageId,
    },

    /// The stage references stages that are not registered yet (strict mode only).
    UnsatisfiedStageOrder {
        /// The stage being registered.
        stage: StageId,
        /// The stages it must run after that do not exist.
        missing: Vec<StageId>,
    },

    /// The instance does not provide the capability the container requires.
    CapabilityMismatch {
        /// The instance being registered.
        instance: InstanceId,
        /// The container's pipeline kind.
        kind: PipelineKind,
        /// The capability the container needs.
        expected: Capability,
        /// The capability the instance provides.
        actual: Capability,
    },

    /// The render parameter does not fit the pipeline kind
    /// (e.g. a non-rasterizing parameter in a rasterization container).
    InvalidParameter {
        /// The container's pipeline kind.
        kind: PipelineKind,
        /// Description of the mismatch.
        reason: String,
    },

    /// No partial render setting is registered under this name.
    UnknownSetting(String),

    /// A resource binding could not be resolved to binding slots.
    UnresolvedBinding {
        /// Description of the unresolved reference.
        reason: String,
    },

    /// Command generation or buffer upload failed.
    CommandGeneration {
        /// The pipeline kind whose strategy failed.
        kind: PipelineKind,
        /// Description of the failure.
        message: String,
    },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::UnknownStage(id) => write!(f, "Unknown stage: {}", id),
            PipelineError::DuplicateStage(id) => write!(f, "Stage already registered: {}", id),
            PipelineError::StageCycle { stage } => {
                write!(f, "Cyclic stage ordering while inserting stage {}", stage)
            }
            PipelineError::UnsatisfiedStageOrder { stage, missing } => {
                write!(f, "Stage {} must run after unregistered stages: ", stage)?;
                for (i, id) in missing.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", id)?;
                }
                Ok(())
            }
            PipelineError::CapabilityMismatch {
                instance,
                kind,
                expected,
                actual,
            } => write!(
                f,
                "Instance {} provides {} but the {} container requires {}",
                instance, actual, kind, expected
            ),
            PipelineError::InvalidParameter { kind, reason } => {
                write!(f, "Invalid render parameter for {}: {}", kind, reason)
            }
            PipelineError::UnknownSetting(name) => write!(f, "Unknown render setting: {}", name),
            PipelineError::UnresolvedBinding { reason } => {
                write!(f, "Unresolved resource binding: {}", reason)
            }
            PipelineError::CommandGeneration { kind, message } => {
                write!(f, "Command generation failed for {}: {}", kind, message)
            }
        }
    }
}

impl std::error::Error for PipelineError {}

/// Result type alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
