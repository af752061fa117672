//! Per-frame uniform snapshots and uniform batch groups.

use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3, Vec4};
use indexmap::IndexMap;

use crate::indirect::DrawRange;
use crate::instance::InstanceHandle;

/// A typed uniform value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    UInt(u32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    /// Native-endian bytes of the value.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            UniformValue::Float(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Int(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::UInt(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Vec2(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Vec3(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Vec4(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Mat4(v) => bytemuck::bytes_of(v).to_vec(),
        }
    }
}

macro_rules! impl_from_uniform {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for UniformValue {
                fn from(value: $ty) -> Self {
                    UniformValue::$variant(value)
                }
            }
        )*
    };
}

impl_from_uniform! {
    f32 => Float,
    i32 => Int,
    u32 => UInt,
    Vec2 => Vec2,
    Vec3 => Vec3,
    Vec4 => Vec4,
    Mat4 => Mat4,
}

/// The uniform values an instance produces for the current frame, keyed by location.
///
/// Values are stored as bytes, so equality is bit-exact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct UniformSnapshot {
    entries: Vec<(u32, Vec<u8>)>,
}

impl UniformSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value at `location`, replacing any previous value.
    pub fn set(&mut self, location: u32, value: impl Into<UniformValue>) {
        let bytes = value.into().to_bytes();
        match self.entries.binary_search_by_key(&location, |(loc, _)| *loc) {
            Ok(index) => self.entries[index].1 = bytes,
            Err(index) => self.entries.insert(index, (location, bytes)),
        }
    }

    pub fn with(mut self, location: u32, value: impl Into<UniformValue>) -> Self {
        self.set(location, value);
        self
    }

    pub fn get(&self, location: u32) -> Option<&[u8]> {
        self.entries
            .binary_search_by_key(&location, |(loc, _)| *loc)
            .ok()
            .map(|index| self.entries[index].1.as_slice())
    }

    /// `(location, bytes)` pairs in ascending location order.
    pub fn entries(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.entries.iter().map(|(loc, bytes)| (*loc, bytes.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Instances of one batch whose uniform snapshots are identical for this frame.
#[derive(Clone)]
pub struct UniformBatch {
    snapshot: Arc<UniformSnapshot>,
    instances: Vec<InstanceHandle>,
    range: Option<DrawRange>,
}

impl UniformBatch {
    pub fn new(snapshot: Arc<UniformSnapshot>, instances: Vec<InstanceHandle>) -> Self {
        Self {
            snapshot,
            instances,
            range: None,
        }
    }

    /// Attach the indirect records this group draws.
    pub fn with_range(mut self, range: DrawRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn snapshot(&self) -> &Arc<UniformSnapshot> {
        &self.snapshot
    }

    pub fn instances(&self) -> &[InstanceHandle] {
        &self.instances
    }

    pub fn range(&self) -> Option<DrawRange> {
        self.range
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl std::fmt::Debug for UniformBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniformBatch")
            .field("uniforms", &self.snapshot.len())
            .field("instances", &self.instances.len())
            .field("range", &self.range)
            .finish()
    }
}

/// Partition `instances` by uniform snapshot, in first-appearance order.
pub fn group_by_uniforms(instances: &[InstanceHandle]) -> Vec<UniformBatch> {
    let mut groups: IndexMap<UniformSnapshot, Vec<InstanceHandle>, ahash::RandomState> =
        IndexMap::default();
    for instance in instances {
        groups
            .entry(instance.base().uniforms())
            .or_default()
            .push(instance.clone());
    }
    groups
        .into_iter()
        .map(|(snapshot, members)| UniformBatch::new(Arc::new(snapshot), members))
        .collect()
}
