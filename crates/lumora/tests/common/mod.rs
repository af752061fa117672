//! Instances shared by the scenario tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use lumora_render::{
    ComputeInstance, DeviceState, FunctionInstance, GraphicsInstance, InstanceHandle,
    InstanceId, MeshInstance, MeshSource, MeshSourceId, PartialRenderSetting, RenderDevice,
    RenderParameter, ResourceBindings, ShaderId, UniformSnapshot, VertexBuilder, VertexLayout,
};
use parking_lot::Mutex;

/// Execution trace written by `after_draw` and function callbacks.
pub type Log = Arc<Mutex<Vec<String>>>;

pub fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

/// Position-only layout drawn as a triangle list.
pub fn sprite_parameter() -> RenderParameter {
    RenderParameter::rasterized(
        VertexLayout::new().with_attribute(0, wgpu::VertexFormat::Float32x2),
        wgpu::PrimitiveTopology::TriangleList,
    )
}

/// A single triangle, optionally shareable for instanced draws.
pub struct Triangle {
    pub source: Option<u64>,
}

impl MeshSource for Triangle {
    fn source_id(&self) -> Option<MeshSourceId> {
        self.source.map(MeshSourceId)
    }

    fn fill_vertices(&self, builder: &mut VertexBuilder) {
        for vertex in [[0.0f32, 0.0], [1.0, 0.0], [0.5, 1.0]] {
            builder.push(0, &vertex);
        }
    }
}

/// A mesh instance whose render-relevant properties can change at runtime.
pub struct Sprite {
    pub id: u64,
    pub label: String,
    pub state: DeviceState,
    pub shader: AtomicU64,
    pub mesh: Option<u64>,
    pub tint: u32,
    pub log: Option<Log>,
    pub visible: AtomicBool,
    pub discard: AtomicBool,
}

impl Sprite {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            label: format!("sprite-{}", id),
            state: DeviceState::opaque(),
            shader: AtomicU64::new(1),
            mesh: Some(7),
            tint: 0,
            log: None,
            visible: AtomicBool::new(true),
            discard: AtomicBool::new(false),
        }
    }

    pub fn logged(mut self, label: impl Into<String>, log: &Log) -> Self {
        self.label = label.into();
        self.log = Some(log.clone());
        self
    }

    pub fn translucent(mut self) -> Self {
        self.state = DeviceState::translucent();
        self
    }

    pub fn with_state(mut self, state: DeviceState) -> Self {
        self.state = state;
        self
    }

    pub fn with_shader(self, shader: u64) -> Self {
        self.shader.store(shader, Ordering::SeqCst);
        self
    }

    pub fn with_tint(mut self, tint: u32) -> Self {
        self.tint = tint;
        self
    }

    /// Every instance gets its own vertices instead of sharing one mesh.
    pub fn unshared(mut self) -> Self {
        self.mesh = None;
        self
    }

    pub fn handle(self) -> InstanceHandle {
        InstanceHandle::rasterizable(self)
    }
}

impl GraphicsInstance for Sprite {
    fn id(&self) -> InstanceId {
        InstanceId::new(self.id)
    }

    fn partial_setting(&self) -> PartialRenderSetting {
        PartialRenderSetting::new()
            .with_state(self.state)
            .with_bindings(
                ResourceBindings::new().with_shader(ShaderId(self.shader.load(Ordering::SeqCst))),
            )
    }

    fn should_render(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    fn should_discard(&self) -> bool {
        self.discard.load(Ordering::SeqCst)
    }

    fn uniforms(&self) -> UniformSnapshot {
        UniformSnapshot::new().with(0, self.tint)
    }

    fn after_draw(&self) {
        if let Some(log) = &self.log {
            log.lock().push(self.label.clone());
        }
    }
}

impl MeshInstance for Sprite {
    fn mesh(&self) -> Option<Arc<dyn MeshSource>> {
        Some(Arc::new(Triangle { source: self.mesh }))
    }
}

/// A compute instance with fixed work-group counts.
pub struct Kernel {
    pub id: u64,
    pub tint: u32,
    pub workgroups: [u32; 3],
}

impl GraphicsInstance for Kernel {
    fn id(&self) -> InstanceId {
        InstanceId::new(self.id)
    }

    fn partial_setting(&self) -> PartialRenderSetting {
        PartialRenderSetting::new()
            .with_bindings(ResourceBindings::new().with_shader(ShaderId(50)))
    }

    fn uniforms(&self) -> UniformSnapshot {
        UniformSnapshot::new().with(0, self.tint)
    }
}

impl ComputeInstance for Kernel {
    fn workgroups(&self) -> [u32; 3] {
        self.workgroups
    }
}

/// A function instance that records its label when invoked.
pub struct Callback {
    pub id: u64,
    pub label: String,
    pub priority: i32,
    pub log: Log,
}

impl Callback {
    pub fn handle(id: u64, label: impl Into<String>, priority: i32, log: &Log) -> InstanceHandle {
        InstanceHandle::functional(Callback {
            id,
            label: label.into(),
            priority,
            log: log.clone(),
        })
    }
}

impl GraphicsInstance for Callback {
    fn id(&self) -> InstanceId {
        InstanceId::new(self.id)
    }

    fn partial_setting(&self) -> PartialRenderSetting {
        PartialRenderSetting::new()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

impl FunctionInstance for Callback {
    fn invoke(&self, _device: &dyn RenderDevice) {
        self.log.lock().push(self.label.clone());
    }
}
