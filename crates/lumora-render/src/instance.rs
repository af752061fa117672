//! Graphics instances and their capabilities.
//!
//! An instance is a renderable unit owned by the caller and shared with the pipeline
//! through `Arc`. What it can do is expressed by which capability trait it implements,
//! and [`InstanceHandle`] carries that capability as a closed set of variants so batch
//! containers can check it at registration.

use std::fmt;
use std::sync::Arc;

use crate::device::RenderDevice;
use crate::setting::PartialRenderSetting;
use crate::uniform::UniformSnapshot;
use crate::vertex::VertexBuilder;

/// Caller-assigned instance identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What an instance contributes to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Produces vertices through a mesh source.
    Mesh,
    /// Dispatches compute work.
    Dispatch,
    /// Runs an arbitrary callable against the device.
    Function,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Mesh => write!(f, "mesh"),
            Capability::Dispatch => write!(f, "dispatch"),
            Capability::Function => write!(f, "function"),
        }
    }
}

/// Behaviour shared by every instance.
///
/// Methods take `&self`: instances are shared between the tick thread and the render
/// thread, so mutable state lives behind interior mutability.
pub trait GraphicsInstance: Send + Sync {
    fn id(&self) -> InstanceId;

    /// The declarative part of this instance's render setting.
    fn partial_setting(&self) -> PartialRenderSetting;

    /// Whether the instance is drawn this frame.
    fn should_render(&self) -> bool {
        true
    }

    /// Whether [`tick`](Self::tick) should run this frame.
    fn should_tick(&self) -> bool {
        false
    }

    /// Whether the instance should be unregistered at the next frame preparation.
    fn should_discard(&self) -> bool {
        false
    }

    fn tick(&self) {}

    /// Uniform values for the current frame.
    fn uniforms(&self) -> UniformSnapshot {
        UniformSnapshot::default()
    }

    /// Called after every command this instance contributed to has executed.
    fn after_draw(&self) {}

    /// Ordering among function instances of one render setting; lower runs first.
    fn priority(&self) -> i32 {
        0
    }
}

/// Stable identity of a mesh that can be shared by many instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshSourceId(pub u64);

/// Vertex producer.
pub trait MeshSource: Send + Sync {
    /// Identity for instanced sharing. Sources without one are filled once per instance.
    fn source_id(&self) -> Option<MeshSourceId> {
        None
    }

    /// Append this mesh's vertices to `builder`.
    fn fill_vertices(&self, builder: &mut VertexBuilder);
}

/// An instance that draws geometry.
pub trait MeshInstance: GraphicsInstance {
    /// The mesh to draw. `None` draws nothing this frame.
    fn mesh(&self) -> Option<Arc<dyn MeshSource>>;
}

/// An instance that dispatches compute work.
pub trait ComputeInstance: GraphicsInstance {
    fn workgroups(&self) -> [u32; 3] {
        [1, 1, 1]
    }

    fn dispatch(&self, device: &dyn RenderDevice) {
        device.dispatch(self.workgroups());
    }
}

/// An instance that runs custom device work.
pub trait FunctionInstance: GraphicsInstance {
    fn invoke(&self, device: &dyn RenderDevice);
}

/// A registered instance, tagged with its capability.
#[derive(Clone)]
pub enum InstanceHandle {
    Rasterizable(Arc<dyn MeshInstance>),
    Dispatchable(Arc<dyn ComputeInstance>),
    Functional(Arc<dyn FunctionInstance>),
}

impl InstanceHandle {
    pub fn rasterizable(instance: impl MeshInstance + 'static) -> Self {
        InstanceHandle::Rasterizable(Arc::new(instance))
    }

    pub fn dispatchable(instance: impl ComputeInstance + 'static) -> Self {
        InstanceHandle::Dispatchable(Arc::new(instance))
    }

    pub fn functional(instance: impl FunctionInstance + 'static) -> Self {
        InstanceHandle::Functional(Arc::new(instance))
    }

    pub fn base(&self) -> &dyn GraphicsInstance {
        match self {
            InstanceHandle::Rasterizable(instance) => instance.as_ref(),
            InstanceHandle::Dispatchable(instance) => instance.as_ref(),
            InstanceHandle::Functional(instance) => instance.as_ref(),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.base().id()
    }

    pub fn capability(&self) -> Capability {
        match self {
            InstanceHandle::Rasterizable(_) => Capability::Mesh,
            InstanceHandle::Dispatchable(_) => Capability::Dispatch,
            InstanceHandle::Functional(_) => Capability::Function,
        }
    }

    pub fn as_mesh(&self) -> Option<&Arc<dyn MeshInstance>> {
        match self {
            InstanceHandle::Rasterizable(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn as_compute(&self) -> Option<&Arc<dyn ComputeInstance>> {
        match self {
            InstanceHandle::Dispatchable(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Arc<dyn FunctionInstance>> {
        match self {
            InstanceHandle::Functional(instance) => Some(instance),
            _ => None,
        }
    }

    /// Wrap the instance so it reports `setting` instead of its own partial setting.
    ///
    /// Everything else is delegated to the wrapped instance, including its id.
    pub fn with_setting(self, setting: PartialRenderSetting) -> Self {
        match self {
            InstanceHandle::Rasterizable(inner) => {
                InstanceHandle::Rasterizable(Arc::new(WithSetting { inner, setting }))
            }
            InstanceHandle::Dispatchable(inner) => {
                InstanceHandle::Dispatchable(Arc::new(WithSetting { inner, setting }))
            }
            InstanceHandle::Functional(inner) => {
                InstanceHandle::Functional(Arc::new(WithSetting { inner, setting }))
            }
        }
    }
}

impl fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("id", &self.id())
            .field("capability", &self.capability())
            .finish()
    }
}

/// An instance whose partial setting was supplied from outside.
struct WithSetting<T: ?Sized> {
    inner: Arc<T>,
    setting: PartialRenderSetting,
}

impl<T: GraphicsInstance + ?Sized> GraphicsInstance for WithSetting<T> {
    fn id(&self) -> InstanceId {
        self.inner.id()
    }

    fn partial_setting(&self) -> PartialRenderSetting {
        self.setting.clone()
    }

    fn should_render(&self) -> bool {
        self.inner.should_render()
    }

    fn should_tick(&self) -> bool {
        self.inner.should_tick()
    }

    fn should_discard(&self) -> bool {
        self.inner.should_discard()
    }

    fn tick(&self) {
        self.inner.tick()
    }

    fn uniforms(&self) -> UniformSnapshot {
        self.inner.uniforms()
    }

    fn after_draw(&self) {
        self.inner.after_draw()
    }

    fn priority(&self) -> i32 {
        self.inner.priority()
    }
}

impl<T: MeshInstance + ?Sized> MeshInstance for WithSetting<T> {
    fn mesh(&self) -> Option<Arc<dyn MeshSource>> {
        self.inner.mesh()
    }
}

impl<T: ComputeInstance + ?Sized> ComputeInstance for WithSetting<T> {
    fn workgroups(&self) -> [u32; 3] {
        self.inner.workgroups()
    }

    fn dispatch(&self, device: &dyn RenderDevice) {
        self.inner.dispatch(device)
    }
}

impl<T: FunctionInstance + ?Sized> FunctionInstance for WithSetting<T> {
    fn invoke(&self, device: &dyn RenderDevice) {
        self.inner.invoke(device)
    }
}
