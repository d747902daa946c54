use crate::{
    foundation::error::BlendResult,
    gpu::{
        command::{CommandBuffer, ImageRef, PipelineKind},
        device::GpuDevice,
    },
    intermediate::IntermediateBufferSet,
    pipeline_pool::PipelineStatePool,
    strategy::{StrategyOpts, encode_rotating_scope},
};

/// One render scope whose running composite never leaves tile memory.
///
/// Two memoryless attachments rotate: pass `k` writes attachment `k % 2` and reads the other
/// one, which pass `k - 1` just wrote. Only the final pass writes resident memory.
#[derive(Debug)]
pub struct TileMemory {
    pool: PipelineStatePool,
    tiles: IntermediateBufferSet,
}

impl TileMemory {
    pub(crate) fn new(device: &mut dyn GpuDevice, opts: &StrategyOpts) -> BlendResult<Self> {
        Ok(Self {
            pool: PipelineStatePool::new(
                device,
                PipelineKind::RenderBlend,
                opts.pool_size,
                "tile blend",
            )?,
            tiles: IntermediateBufferSet::memoryless(device, opts.working)?,
        })
    }

    pub(crate) fn compose(
        &mut self,
        buffer: &mut CommandBuffer,
        layers: usize,
        target: ImageRef,
    ) -> BlendResult<()> {
        self.pool.reset();
        let pair = [self.tiles.image(0)?, self.tiles.image(1)?];
        encode_rotating_scope(buffer, "tile memory blend", pair, target, layers, &mut self.pool)
    }

    pub(crate) fn footprint_bytes(&self) -> usize {
        self.tiles.footprint_bytes()
    }

    pub(crate) fn release(self, device: &mut dyn GpuDevice) -> BlendResult<()> {
        self.tiles.release(device)
    }
}
