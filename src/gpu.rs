//! Backend-agnostic GPU command model and the devices that execute it.
//!
//! Strategies never talk to a backend directly. They record a [`command::CommandBuffer`]
//! (scopes, blend passes, copies, event waits and signals, a present) and hand it to a
//! [`device::GpuDevice`], which executes it asynchronously with respect to the encoding thread.

/// Recorded command buffers and scoped encoders.
pub mod command;
pub mod cpu;
/// Device trait and construction.
pub mod device;
/// Timeline events.
pub mod event;
#[cfg(feature = "gpu")]
pub mod wgpu_device;
