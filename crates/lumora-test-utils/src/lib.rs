//! Test utilities for the Lumora render pipeline.
//!
//! This crate provides the GPU resource wrappers shared by real and mock devices,
//! plus a call recorder that mock devices use to make their behaviour observable.
//!
//! # Overview
//!
//! - [`GpuBuffer`] - Owned buffer handle that is either a real `wgpu::Buffer` or a mock
//!   (the mock variant requires the `mock` feature)
//! - [`CallRecorder`] - Thread-safe, append-only log of recorded calls
//!
//! # Example
//!
//! ```rust
//! use lumora_test_utils::CallRecorder;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! enum Call {
//!     Draw(u32),
//!     Dispatch,
//! }
//!
//! let recorder = CallRecorder::new();
//! recorder.record(Call::Draw(3));
//! recorder.record(Call::Dispatch);
//!
//! assert_eq!(recorder.len(), 2);
//! assert_eq!(recorder.count(|c| matches!(c, Call::Draw(_))), 1);
//! ```
//!
//! # Design Philosophy
//!
//! GPU wrapper types are owned and cheap to clone, so no lifetime parameters leak into
//! the render commands that hold them. Recorders take `&self` and use a
//! `parking_lot::Mutex`, so a mock device can stay `Send + Sync` behind `&dyn`.

pub mod gpu_types;
pub mod recorder;

pub use gpu_types::*;
pub use recorder::*;
