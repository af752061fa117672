//! Device-state descriptors and component-wise diffing.
//!
//! A [`DeviceState`] is the fixed-function part of a render setting. The
//! [`DeviceStateManager`](crate::state_manager::DeviceStateManager) compares descriptors
//! component by component and only re-applies what changed.

use bitflags::bitflags;

/// Predefined blend modes for common use cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    /// No blending - source completely replaces destination.
    Replace,

    /// Standard alpha blending for translucent content.
    ///
    /// Formula: `src.rgb * src.a + dst.rgb * (1 - src.a)`
    #[default]
    Alpha,

    /// Premultiplied alpha blending.
    ///
    /// Formula: `src.rgb + dst.rgb * (1 - src.a)`
    PremultipliedAlpha,

    /// Additive blending - colors are added together.
    ///
    /// Formula: `src.rgb * src.a + dst.rgb`
    Additive,

    /// Custom blend state for advanced use cases.
    Custom(wgpu::BlendState),
}

impl BlendMode {
    /// Convert to wgpu BlendState.
    pub fn to_blend_state(self) -> wgpu::BlendState {
        match self {
            BlendMode::Replace => wgpu::BlendState::REPLACE,
            BlendMode::Alpha => wgpu::BlendState::ALPHA_BLENDING,
            BlendMode::PremultipliedAlpha => wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING,
            BlendMode::Additive => wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::SrcAlpha,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
            },
            BlendMode::Custom(state) => state,
        }
    }
}

impl From<wgpu::BlendState> for BlendMode {
    fn from(state: wgpu::BlendState) -> Self {
        BlendMode::Custom(state)
    }
}

/// Depth test configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    /// Comparison used by the depth test.
    pub compare: wgpu::CompareFunction,
    /// Whether passing fragments write depth.
    pub write: bool,
}

impl DepthState {
    /// Standard opaque depth: `Less`, with writes.
    pub const OPAQUE: Self = Self {
        compare: wgpu::CompareFunction::Less,
        write: true,
    };

    /// Depth-tested but read-only, typical for translucent geometry.
    pub const READ_ONLY: Self = Self {
        compare: wgpu::CompareFunction::LessEqual,
        write: false,
    };
}

bitflags! {
    /// Set of device-state components.
    ///
    /// Produced by [`DeviceState::diff`]; each flag maps to one [`StateChange`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StateComponents: u8 {
        /// Blend enable and equation.
        const BLEND = 1 << 0;
        /// Depth test and depth writes.
        const DEPTH = 1 << 1;
        /// Face culling.
        const CULL = 1 << 2;
        /// Front-face winding.
        const FRONT_FACE = 1 << 3;
        /// Color write mask.
        const COLOR_WRITES = 1 << 4;
        /// Polygon fill mode.
        const POLYGON_MODE = 1 << 5;
    }
}

/// A single device-state component with its new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateChange {
    /// `None` disables blending.
    Blend(Option<BlendMode>),
    /// `None` disables the depth test.
    Depth(Option<DepthState>),
    /// `None` disables culling.
    Cull(Option<wgpu::Face>),
    FrontFace(wgpu::FrontFace),
    ColorWrites(wgpu::ColorWrites),
    PolygonMode(wgpu::PolygonMode),
}

impl StateChange {
    /// The component this change applies to.
    pub fn component(&self) -> StateComponents {
        match self {
            StateChange::Blend(_) => StateComponents::BLEND,
            StateChange::Depth(_) => StateComponents::DEPTH,
            StateChange::Cull(_) => StateComponents::CULL,
            StateChange::FrontFace(_) => StateComponents::FRONT_FACE,
            StateChange::ColorWrites(_) => StateComponents::COLOR_WRITES,
            StateChange::PolygonMode(_) => StateComponents::POLYGON_MODE,
        }
    }
}

/// Fixed-function device state carried by a render setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceState {
    pub blend: Option<BlendMode>,
    pub depth: Option<DepthState>,
    pub cull: Option<wgpu::Face>,
    pub front_face: wgpu::FrontFace,
    pub color_writes: wgpu::ColorWrites,
    pub polygon_mode: wgpu::PolygonMode,
}

impl DeviceState {
    /// Opaque geometry: no blending, depth test with writes, back-face culling.
    pub fn opaque() -> Self {
        Self {
            blend: None,
            depth: Some(DepthState::OPAQUE),
            cull: Some(wgpu::Face::Back),
            front_face: wgpu::FrontFace::Ccw,
            color_writes: wgpu::ColorWrites::ALL,
            polygon_mode: wgpu::PolygonMode::Fill,
        }
    }

    /// Translucent geometry: alpha blending, read-only depth, no culling.
    pub fn translucent() -> Self {
        Self {
            blend: Some(BlendMode::Alpha),
            depth: Some(DepthState::READ_ONLY),
            cull: None,
            ..Self::opaque()
        }
    }

    pub fn with_blend(mut self, blend: Option<BlendMode>) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_depth(mut self, depth: Option<DepthState>) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_cull(mut self, cull: Option<wgpu::Face>) -> Self {
        self.cull = cull;
        self
    }

    pub fn with_front_face(mut self, front_face: wgpu::FrontFace) -> Self {
        self.front_face = front_face;
        self
    }

    pub fn with_color_writes(mut self, color_writes: wgpu::ColorWrites) -> Self {
        self.color_writes = color_writes;
        self
    }

    pub fn with_polygon_mode(mut self, polygon_mode: wgpu::PolygonMode) -> Self {
        self.polygon_mode = polygon_mode;
        self
    }

    /// Components whose value differs from `previous`.
    pub fn diff(&self, previous: &DeviceState) -> StateComponents {
        let mut changed = StateComponents::empty();
        changed.set(StateComponents::BLEND, self.blend != previous.blend);
        changed.set(StateComponents::DEPTH, self.depth != previous.depth);
        changed.set(StateComponents::CULL, self.cull != previous.cull);
        changed.set(StateComponents::FRONT_FACE, self.front_face != previous.front_face);
        changed.set(StateComponents::COLOR_WRITES, self.color_writes != previous.color_writes);
        changed.set(StateComponents::POLYGON_MODE, self.polygon_mode != previous.polygon_mode);
        changed
    }

    /// The changes that set every component in `components` to this descriptor's value,
    /// in a fixed component order.
    pub fn changes(&self, components: StateComponents) -> Vec<StateChange> {
        components
            .iter()
            .filter_map(|component| self.change(component))
            .collect()
    }

    /// The change for a single component flag.
    pub fn change(&self, component: StateComponents) -> Option<StateChange> {
        if component == StateComponents::BLEND {
            Some(StateChange::Blend(self.blend))
        } else if component == StateComponents::DEPTH {
            Some(StateChange::Depth(self.depth))
        } else if component == StateComponents::CULL {
            Some(StateChange::Cull(self.cull))
        } else if component == StateComponents::FRONT_FACE {
            Some(StateChange::FrontFace(self.front_face))
        } else if component == StateComponents::COLOR_WRITES {
            Some(StateChange::ColorWrites(self.color_writes))
        } else if component == StateComponents::POLYGON_MODE {
            Some(StateChange::PolygonMode(self.polygon_mode))
        } else {
            None
        }
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::opaque()
    }
}
