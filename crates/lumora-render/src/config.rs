//! Pipeline configuration.

use std::fmt;

use crate::queue::TranslucencyStrategy;

/// How rasterization commands reach the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DrawTier {
    /// One `draw()` call per indirect record. No special features required.
    Direct,
    /// One `multi_draw_indirect()` per batch.
    #[default]
    Indirect,
}

impl fmt::Display for DrawTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrawTier::Direct => write!(f, "Direct"),
            DrawTier::Indirect => write!(f, "Indirect"),
        }
    }
}

/// Configuration for a [`GraphicsPipeline`](crate::pipeline::GraphicsPipeline).
///
/// # Example
///
/// ```
/// use lumora_render::config::{DrawTier, PipelineConfig};
/// use lumora_render::queue::TranslucencyStrategy;
///
/// let config = PipelineConfig::default()
///     .with_translucency(TranslucencyStrategy::DedicatedStages)
///     .with_draw_tier(DrawTier::Direct)
///     .strict();
/// assert!(config.strict_stage_order);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// When translucent commands execute relative to solid ones.
    pub translucency: TranslucencyStrategy,
    /// Pipeline-wide default for the flexible strategy. Stage overrides win.
    pub translucent_follows_solid: Option<bool>,
    /// Reject stages with missing dependencies or cycles instead of holding them pending.
    pub strict_stage_order: bool,
    pub draw_tier: DrawTier,
    /// Indirect records reserved per render parameter.
    pub initial_indirect_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            translucency: TranslucencyStrategy::Interleaved,
            translucent_follows_solid: None,
            strict_stage_order: false,
            draw_tier: DrawTier::Indirect,
            initial_indirect_capacity: 256,
        }
    }
}

impl PipelineConfig {
    pub fn with_translucency(mut self, translucency: TranslucencyStrategy) -> Self {
        self.translucency = translucency;
        self
    }

    pub fn with_translucent_follows_solid(mut self, follows: bool) -> Self {
        self.translucent_follows_solid = Some(follows);
        self
    }

    pub fn with_draw_tier(mut self, draw_tier: DrawTier) -> Self {
        self.draw_tier = draw_tier;
        self
    }

    pub fn with_initial_indirect_capacity(mut self, capacity: usize) -> Self {
        self.initial_indirect_capacity = capacity;
        self
    }

    /// Enable strict stage ordering.
    pub fn strict(mut self) -> Self {
        self.strict_stage_order = true;
        self
    }
}
