use crate::{
    foundation::{core::Extent, error::BlendResult},
    gpu::{
        command::{BlendPassDescriptor, CommandBuffer, ImageRef, PipelineKind},
        device::GpuDevice,
    },
    intermediate::IntermediateBufferSet,
    pipeline_pool::PipelineStatePool,
    strategy::{StrategyOpts, alternating_dst, layer},
};

/// One render scope per pairwise blend, one scratch image alternating with the target.
#[derive(Debug)]
pub struct SequentialPass {
    working: Extent,
    pool: PipelineStatePool,
    scratch: IntermediateBufferSet,
}

impl SequentialPass {
    pub(crate) fn new(device: &mut dyn GpuDevice, opts: &StrategyOpts) -> BlendResult<Self> {
        Ok(Self {
            working: opts.working,
            pool: PipelineStatePool::new(
                device,
                PipelineKind::RenderBlend,
                opts.pool_size,
                "render blend",
            )?,
            scratch: IntermediateBufferSet::single(device, opts.working)?,
        })
    }

    pub(crate) fn compose(
        &mut self,
        buffer: &mut CommandBuffer,
        layers: usize,
        target: ImageRef,
    ) -> BlendResult<()> {
        self.pool.reset();
        let scratch = self.scratch.image(0)?;
        let passes = layers - 1;
        let mut src1 = layer(0);
        for pass in 0..passes {
            let dst = alternating_dst(pass, passes, scratch, target);
            let desc = BlendPassDescriptor::full(
                src1,
                layer(pass + 1),
                dst,
                self.working,
                self.pool.next(),
            );
            buffer.encode_render(&format!("blend pass {pass}"), &[dst], |enc| {
                enc.draw_blend(desc)
            })?;
            src1 = dst;
        }
        Ok(())
    }

    pub(crate) fn footprint_bytes(&self) -> usize {
        self.scratch.footprint_bytes()
    }

    pub(crate) fn release(self, device: &mut dyn GpuDevice) -> BlendResult<()> {
        self.scratch.release(device)
    }
}
