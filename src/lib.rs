//! blendbench composites a large ordered stack of image layers into one surface every frame,
//! using interchangeable strategies, so their scheduling and performance can be compared.
//!
//! The pieces, leaf first:
//!
//! - [`PipelineStatePool`]: round-robin rotation of identical pipelines
//! - [`IntermediateBufferSet`]: scratch images between passes
//! - [`CommandScheduler`]: optional device-side serialization of frames
//! - [`BlendPassDescriptor`] and the scoped encoders of [`CommandBuffer`]: one blend per pass
//! - [`Compositor`]: the six strategies
//! - [`FrameDriver`]: the per-frame `draw` / `on_surface_resize` contract
//!
//! Execution goes through a [`GpuDevice`]. [`CpuDevice`] is always available and bit-exact;
//! the `gpu` feature adds a wgpu device.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod foundation;

/// CPU blend kernels and the reference fold.
pub mod blend;
/// Configuration surface.
pub mod config;
/// Command model and devices.
pub mod gpu;
/// Frame driver.
pub mod harness;
/// Intermediate image sets.
pub mod intermediate;
/// Input layer stacks.
pub mod layers;
/// Pipeline rotation.
pub mod pipeline_pool;
/// Frame scheduling.
pub mod scheduler;
/// Compositing strategies.
pub mod strategy;
/// Headless presentation.
pub mod surface;

pub use crate::foundation::core::{Extent, TileGrid, TileRect, WORKING_HEIGHT, WORKING_WIDTH};
pub use crate::foundation::error::{BlendError, BlendResult};
pub use crate::foundation::image::{ImageRGBA, PremulRgba8};

pub use crate::blend::{over, reference_fold};
pub use crate::config::BenchConfig;
pub use crate::gpu::command::{
    BlendPassDescriptor, Command, CommandBuffer, CompletionHandler, EncodeStats, ImageDesc,
    ImageId, ImageRef, PipelineKind, PipelineVariant, StorageMode, SurfaceId,
};
pub use crate::gpu::cpu::CpuDevice;
pub use crate::gpu::device::{DeviceKind, DeviceOpts, DeviceStats, GpuDevice, create_device};
pub use crate::gpu::event::SharedEvent;
pub use crate::harness::{DrawOutcome, FrameDriver, FrameReport, FrameState, TARGET_TIMEOUT};
pub use crate::intermediate::{BufferLayout, IntermediateBufferSet};
pub use crate::layers::{LayerPattern, LayerStack};
pub use crate::pipeline_pool::PipelineStatePool;
pub use crate::scheduler::{CommandScheduler, SchedulingMode};
pub use crate::strategy::{Compositor, StrategyKind, StrategyOpts};
pub use crate::surface::{SurfaceProvider, SurfaceRing, TargetSurface};
