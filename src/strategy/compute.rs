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

/// One compute dispatch per pairwise blend over general-purpose images.
///
/// Every blend but the last goes into a "merge" scope; the last one, which writes the target,
/// gets its own "final" scope.
#[derive(Debug)]
pub struct ComputeDispatch {
    working: Extent,
    pool: PipelineStatePool,
    scratch: IntermediateBufferSet,
}

impl ComputeDispatch {
    pub(crate) fn new(device: &mut dyn GpuDevice, opts: &StrategyOpts) -> BlendResult<Self> {
        Ok(Self {
            working: opts.working,
            pool: PipelineStatePool::new(
                device,
                PipelineKind::ComputeBlend,
                opts.pool_size,
                "compute blend",
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
        let working = self.working;
        let pool = &mut self.pool;

        let mut src1 = layer(0);
        if passes > 1 {
            src1 = buffer.encode_compute("merge", |enc| {
                let mut src1 = layer(0);
                for pass in 0..passes - 1 {
                    let dst = alternating_dst(pass, passes, scratch, target);
                    enc.dispatch_blend(BlendPassDescriptor::full(
                        src1,
                        layer(pass + 1),
                        dst,
                        working,
                        pool.next(),
                    ))?;
                    src1 = dst;
                }
                Ok(src1)
            })?;
        }
        buffer.encode_compute("final", |enc| {
            enc.dispatch_blend(BlendPassDescriptor::full(
                src1,
                layer(passes),
                target,
                working,
                pool.next(),
            ))
        })
    }

    pub(crate) fn footprint_bytes(&self) -> usize {
        self.scratch.footprint_bytes()
    }

    pub(crate) fn release(self, device: &mut dyn GpuDevice) -> BlendResult<()> {
        self.scratch.release(device)
    }
}
