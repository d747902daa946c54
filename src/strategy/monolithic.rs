use crate::{
    foundation::error::BlendResult,
    gpu::{
        command::{CommandBuffer, ImageRef, PipelineKind},
        device::GpuDevice,
    },
    pipeline_pool::PipelineStatePool,
    strategy::layer,
};

/// A single dispatch that reads every layer and folds them per pixel. No intermediates.
///
/// There is one dispatch per frame, so the pool holds a single pipeline regardless of the
/// configured pool size.
#[derive(Debug)]
pub struct MonolithicAggregate {
    pool: PipelineStatePool,
}

impl MonolithicAggregate {
    pub(crate) fn new(device: &mut dyn GpuDevice) -> BlendResult<Self> {
        Ok(Self {
            pool: PipelineStatePool::new(
                device,
                PipelineKind::ComputeAggregate,
                1,
                "aggregate blend",
            )?,
        })
    }

    pub(crate) fn compose(
        &mut self,
        buffer: &mut CommandBuffer,
        layers: usize,
        target: ImageRef,
    ) -> BlendResult<()> {
        self.pool.reset();
        let pipeline = self.pool.next();
        let inputs: Vec<ImageRef> = (0..layers).map(layer).collect();
        buffer.encode_compute("aggregate blend", |enc| {
            enc.dispatch_aggregate(inputs, target, pipeline)
        })
    }
}
