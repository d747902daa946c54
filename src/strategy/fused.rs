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

/// Every blend drawn inside one render scope, ping-ponging two resident attachments.
#[derive(Debug)]
pub struct FusedEncoder {
    pool: PipelineStatePool,
    pair: IntermediateBufferSet,
}

impl FusedEncoder {
    pub(crate) fn new(device: &mut dyn GpuDevice, opts: &StrategyOpts) -> BlendResult<Self> {
        Ok(Self {
            pool: PipelineStatePool::new(
                device,
                PipelineKind::RenderBlend,
                opts.pool_size,
                "render blend",
            )?,
            pair: IntermediateBufferSet::ping_pong(device, opts.working)?,
        })
    }

    pub(crate) fn compose(
        &mut self,
        buffer: &mut CommandBuffer,
        layers: usize,
        target: ImageRef,
    ) -> BlendResult<()> {
        self.pool.reset();
        let pair = [self.pair.image(0)?, self.pair.image(1)?];
        encode_rotating_scope(buffer, "fused blend", pair, target, layers, &mut self.pool)
    }

    pub(crate) fn footprint_bytes(&self) -> usize {
        self.pair.footprint_bytes()
    }

    pub(crate) fn release(self, device: &mut dyn GpuDevice) -> BlendResult<()> {
        self.pair.release(device)
    }
}
