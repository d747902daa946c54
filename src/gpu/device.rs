use std::collections::BTreeMap;

use crate::{
    foundation::{
        error::{BlendError, BlendResult},
        image::ImageRGBA,
    },
    gpu::{
        command::{CommandBuffer, ImageDesc, ImageId, ImageRef, PipelineId, PipelineKind},
        event::SharedEvent,
    },
    layers::LayerStack,
};

/// Something that executes recorded [`CommandBuffer`]s.
///
/// `submit` returns as soon as the buffer is queued; execution is asynchronous. Failures that
/// happen on the device are reported by the next [`GpuDevice::wait_idle`].
pub trait GpuDevice: Send {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Make `layers` readable as [`ImageRef::Layer`]. Replaces any previous upload.
    fn upload_layers(&mut self, layers: &LayerStack) -> BlendResult<()>;

    /// Allocate an image.
    fn create_image(&mut self, desc: ImageDesc, label: &str) -> BlendResult<ImageId>;

    /// Free an image. Buffers already submitted that reference it fail on execution.
    fn release_image(&mut self, id: ImageId) -> BlendResult<()>;

    /// Description of a live image.
    fn image_desc(&self, id: ImageId) -> Option<ImageDesc>;

    /// Compile a pipeline of `kind`. Every call yields a distinct object.
    fn create_pipeline(&mut self, kind: PipelineKind, label: &str) -> BlendResult<PipelineId>;

    /// Create a timeline event starting at 0.
    fn make_event(&mut self) -> BlendResult<SharedEvent>;

    /// Queue `buffer` for execution.
    fn submit(&mut self, buffer: CommandBuffer) -> BlendResult<()>;

    /// Block until every submitted buffer has finished, then report the first failure, if any.
    fn wait_idle(&mut self) -> BlendResult<()>;

    /// Run completion callbacks of finished work without blocking.
    fn poll(&mut self) -> BlendResult<()>;

    /// Copy an image back to host memory. Does not wait for pending work.
    fn read_image(&mut self, image: ImageRef) -> BlendResult<ImageRGBA>;

    /// Execution counters.
    fn stats(&self) -> DeviceStats;
}

/// Counters accumulated by a device while executing buffers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// Buffers accepted by `submit`.
    pub submitted: u64,
    /// Buffers fully executed.
    pub completed: u64,
    /// Render scopes executed.
    pub render_scopes: u64,
    /// Compute scopes executed.
    pub compute_scopes: u64,
    /// Blend passes executed (draws and dispatches, aggregate included).
    pub passes: u64,
    /// Copies executed.
    pub copies: u64,
    /// Presents executed.
    pub presents: u64,
    /// How often each pipeline was bound.
    pub pipeline_binds: BTreeMap<PipelineId, u64>,
}

/// Available device kinds.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    /// Reference executor on CPU worker lanes. Always available.
    #[default]
    Cpu,
    /// wgpu backend. Requires the `gpu` feature and an adapter.
    Gpu,
}

/// Options shared by device constructors.
#[derive(Clone, Copy, Debug)]
pub struct DeviceOpts {
    /// Concurrent execution lanes of the CPU executor.
    pub lanes: usize,
}

impl Default for DeviceOpts {
    fn default() -> Self {
        Self { lanes: 2 }
    }
}

/// Create a device.
pub fn create_device(kind: DeviceKind, opts: DeviceOpts) -> BlendResult<Box<dyn GpuDevice>> {
    match kind {
        DeviceKind::Cpu => Ok(Box::new(crate::gpu::cpu::CpuDevice::new(opts)?)),
        #[cfg(feature = "gpu")]
        DeviceKind::Gpu => Ok(Box::new(crate::gpu::wgpu_device::WgpuDevice::new(opts)?)),
        #[allow(unreachable_patterns)]
        _ => Err(BlendError::init(format!(
            "{kind:?} device is not available in this build"
        ))),
    }
}
