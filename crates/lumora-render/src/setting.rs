//! Render settings: the batching key for every instance.
//!
//! A [`RenderSetting`] combines a [`PartialRenderSetting`] (device state, resource bindings
//! and the "apply state" switch, usually loaded from declarative data) with a
//! [`RenderParameter`] supplied when the instance is registered.

use std::sync::Arc;

use ahash::AHashMap;

use crate::binding::ResourceBindings;
use crate::error::{PipelineError, PipelineResult};
use crate::state::DeviceState;

/// One vertex attribute: its binding point and format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Vertex buffer binding point the attribute is read from.
    pub binding: u32,
    /// Attribute format.
    pub format: wgpu::VertexFormat,
}

/// Ordered list of vertex attributes, grouped by binding point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attribute read from `binding`.
    pub fn with_attribute(mut self, binding: u32, format: wgpu::VertexFormat) -> Self {
        self.attributes.push(VertexAttribute { binding, format });
        self
    }

    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    /// Distinct binding points, ascending.
    pub fn binding_points(&self) -> Vec<u32> {
        let mut points: Vec<u32> = self.attributes.iter().map(|a| a.binding).collect();
        points.sort_unstable();
        points.dedup();
        points
    }

    /// Bytes per vertex at `binding`.
    pub fn stride(&self, binding: u32) -> u64 {
        self.attributes
            .iter()
            .filter(|a| a.binding == binding)
            .map(|a| a.format.size())
            .sum()
    }
}

/// How the work of a render setting reaches the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RenderParameter {
    /// Geometry with a vertex layout and primitive topology.
    Rasterized {
        layout: VertexLayout,
        topology: wgpu::PrimitiveTopology,
    },
    /// Compute or function work that produces no geometry.
    NonRasterized,
}

impl RenderParameter {
    pub fn rasterized(layout: VertexLayout, topology: wgpu::PrimitiveTopology) -> Self {
        RenderParameter::Rasterized { layout, topology }
    }

    pub fn is_rasterized(&self) -> bool {
        matches!(self, RenderParameter::Rasterized { .. })
    }

    pub fn layout(&self) -> Option<&VertexLayout> {
        match self {
            RenderParameter::Rasterized { layout, .. } => Some(layout),
            RenderParameter::NonRasterized => None,
        }
    }

    pub fn topology(&self) -> Option<wgpu::PrimitiveTopology> {
        match self {
            RenderParameter::Rasterized { topology, .. } => Some(*topology),
            RenderParameter::NonRasterized => None,
        }
    }
}

/// Number of vertices from `available` that form complete primitives of `topology`.
pub fn drawable_vertex_count(topology: wgpu::PrimitiveTopology, available: u32) -> u32 {
    match topology {
        wgpu::PrimitiveTopology::PointList => available,
        wgpu::PrimitiveTopology::LineList => available - available % 2,
        wgpu::PrimitiveTopology::LineStrip => {
            if available >= 2 {
                available
            } else {
                0
            }
        }
        wgpu::PrimitiveTopology::TriangleList => available - available % 3,
        wgpu::PrimitiveTopology::TriangleStrip => {
            if available >= 3 {
                available
            } else {
                0
            }
        }
    }
}

/// The declarative half of a render setting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PartialRenderSetting {
    state: Option<DeviceState>,
    bindings: ResourceBindings,
    apply_state: bool,
}

impl PartialRenderSetting {
    /// A setting with no device state, no bindings and state switching disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the device state and enable state switching.
    pub fn with_state(mut self, state: DeviceState) -> Self {
        self.state = Some(state);
        self.apply_state = true;
        self
    }

    pub fn with_bindings(mut self, bindings: ResourceBindings) -> Self {
        self.bindings = bindings;
        self
    }

    /// Override whether the device state is applied when this setting is accepted.
    pub fn with_apply_state(mut self, apply_state: bool) -> Self {
        self.apply_state = apply_state;
        self
    }

    pub fn state(&self) -> Option<&DeviceState> {
        self.state.as_ref()
    }

    pub fn bindings(&self) -> &ResourceBindings {
        &self.bindings
    }

    /// Combine with a render parameter into a full setting.
    pub fn combine(&self, parameter: RenderParameter) -> RenderSetting {
        RenderSetting {
            state: self.state,
            bindings: self.bindings.clone(),
            parameter,
            apply_state: self.apply_state,
        }
    }
}

/// Immutable (device state, resource bindings, render parameter) key.
///
/// Hash and equality cover every field; settings are shared as [`SettingRef`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderSetting {
    state: Option<DeviceState>,
    bindings: ResourceBindings,
    parameter: RenderParameter,
    apply_state: bool,
}

/// Shared, immutable render setting.
pub type SettingRef = Arc<RenderSetting>;

impl RenderSetting {
    pub fn state(&self) -> Option<&DeviceState> {
        self.state.as_ref()
    }

    pub fn bindings(&self) -> &ResourceBindings {
        &self.bindings
    }

    pub fn parameter(&self) -> &RenderParameter {
        &self.parameter
    }

    /// Whether accepting this setting switches device state.
    pub fn applies_state(&self) -> bool {
        self.apply_state
    }
}

/// Named partial settings, as produced by the declarative render-state loader.
#[derive(Debug, Default)]
pub struct SettingLibrary {
    settings: AHashMap<String, PartialRenderSetting>,
}

impl SettingLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a named partial setting.
    pub fn register(&mut self, name: impl Into<String>, setting: PartialRenderSetting) {
        let name = name.into();
        if self.settings.insert(name.clone(), setting).is_some() {
            tracing::debug!("Replaced render setting '{}'", name);
        }
    }

    pub fn get(&self, name: &str) -> PipelineResult<&PartialRenderSetting> {
        self.settings
            .get(name)
            .ok_or_else(|| PipelineError::UnknownSetting(name.to_string()))
    }

    /// Look up `name` and combine it with `parameter`.
    pub fn combine(&self, name: &str, parameter: RenderParameter) -> PipelineResult<RenderSetting> {
        Ok(self.get(name)?.combine(parameter))
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::ShaderId;

    fn position_color() -> VertexLayout {
        VertexLayout::new()
            .with_attribute(0, wgpu::VertexFormat::Float32x3)
            .with_attribute(0, wgpu::VertexFormat::Float32x4)
            .with_attribute(1, wgpu::VertexFormat::Float32x2)
    }

    #[test]
    fn test_layout_strides() {
        let layout = position_color();
        assert_eq!(layout.binding_points(), vec![0, 1]);
        assert_eq!(layout.stride(0), 28);
        assert_eq!(layout.stride(1), 8);
        assert_eq!(layout.stride(2), 0);
    }

    #[test]
    fn test_drawable_vertex_count() {
        use wgpu::PrimitiveTopology::*;
        assert_eq!(drawable_vertex_count(TriangleList, 7), 6);
        assert_eq!(drawable_vertex_count(LineList, 5), 4);
        assert_eq!(drawable_vertex_count(TriangleStrip, 2), 0);
        assert_eq!(drawable_vertex_count(PointList, 5), 5);
    }

    #[test]
    fn test_settings_equal_by_value() {
        let partial = PartialRenderSetting::new()
            .with_state(DeviceState::opaque())
            .with_bindings(ResourceBindings::new().with_shader(ShaderId(1)));
        let param = RenderParameter::rasterized(position_color(), wgpu::PrimitiveTopology::TriangleList);

        let a = partial.combine(param.clone());
        let b = partial.clone().combine(param);
        assert_eq!(a, b);
        assert!(a.applies_state());

        let c = partial.combine(RenderParameter::NonRasterized);
        assert_ne!(a, c);
    }

    #[test]
    fn test_library_lookup() {
        let mut library = SettingLibrary::new();
        library.register("opaque", PartialRenderSetting::new().with_state(DeviceState::opaque()));

        assert!(library.get("opaque").is_ok());
        assert_eq!(
            library.combine("missing", RenderParameter::NonRasterized),
            Err(PipelineError::UnknownSetting("missing".to_string()))
        );
    }
}
