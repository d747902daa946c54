use crate::{
    foundation::error::{BlendError, BlendResult},
    gpu::{
        command::{PipelineKind, PipelineVariant},
        device::GpuDevice,
    },
};

/// Default number of pipelines per pool.
pub const DEFAULT_POOL_SIZE: usize = 10;

/// A fixed rotation of otherwise identical pipelines.
///
/// Every variant is compiled from the same kernel but registered as its own device object, so
/// a frame that binds them round-robin pays the cost of switching pipelines the way a graph of
/// distinct filters would.
#[derive(Debug)]
pub struct PipelineStatePool {
    variants: Vec<PipelineVariant>,
    counter: usize,
    selections: u64,
}

impl PipelineStatePool {
    /// Compile `size` pipelines of `kind` on `device`.
    pub fn new(
        device: &mut dyn GpuDevice,
        kind: PipelineKind,
        size: usize,
        label: &str,
    ) -> BlendResult<Self> {
        if size == 0 {
            return Err(BlendError::config("pipeline_pool_size must be >= 1"));
        }
        let mut variants = Vec::with_capacity(size);
        for slot in 0..size {
            let id = device
                .create_pipeline(kind, &format!("{label}#{slot}"))
                .map_err(|e| BlendError::init(format!("pipeline {label}#{slot}: {e}")))?;
            variants.push(PipelineVariant {
                id,
                kind,
                slot: slot as u32,
            });
        }
        Ok(Self {
            variants,
            counter: 0,
            selections: 0,
        })
    }

    /// The variant for the next pass; advances the rotation.
    pub fn next(&mut self) -> PipelineVariant {
        let variant = self.variants[self.counter % self.variants.len()];
        self.counter = (self.counter + 1) % self.variants.len();
        self.selections += 1;
        variant
    }

    /// Restart the rotation at slot 0. Called at the start of every frame.
    pub fn reset(&mut self) {
        self.counter = 0;
    }

    /// Number of variants.
    pub fn len(&self) -> usize {
        self.variants.len()
    }

    /// Always `false`: construction rejects empty pools.
    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// All variants in slot order.
    pub fn variants(&self) -> &[PipelineVariant] {
        &self.variants
    }

    /// Total `next` calls since construction.
    pub fn selections(&self) -> u64 {
        self.selections
    }
}

#[cfg(test)]
#[path = "../tests/unit/pipeline_pool.rs"]
mod tests;
