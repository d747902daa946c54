//! Compositing strategies.
//!
//! Every strategy folds the layer stack `result = blend(...blend(blend(l0, l1), l2)..., lN-1)`
//! into the frame target; they differ only in how the fold is split into scopes, passes and
//! tiles. Because the blend is exact integer math, every strategy produces the same bytes.

/// One compute dispatch per blend.
pub mod compute;
/// Every blend in one render scope.
pub mod fused;
/// One aggregate dispatch.
pub mod monolithic;
/// One render scope per blend.
pub mod sequential;
/// Render scope over tile memory.
pub mod tile_memory;
/// Per-tile compute folds.
pub mod tiled;

use crate::{
    foundation::{
        core::{Extent, TileGrid},
        error::{BlendError, BlendResult},
    },
    gpu::{
        command::{BlendPassDescriptor, CommandBuffer, ImageRef},
        device::GpuDevice,
    },
    pipeline_pool::{DEFAULT_POOL_SIZE, PipelineStatePool},
};

pub use compute::ComputeDispatch;
pub use fused::FusedEncoder;
pub use monolithic::MonolithicAggregate;
pub use sequential::SequentialPass;
pub use tile_memory::TileMemory;
pub use tiled::TiledFused;

/// Selectable strategy.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// One render scope per pairwise blend.
    #[default]
    Sequential,
    /// One render scope holding every blend.
    Fused,
    /// Every tile folded independently inside one compute scope.
    Tiled,
    /// One render scope rotating two tile-memory attachments.
    TileMemory,
    /// One compute dispatch per pairwise blend.
    Compute,
    /// One compute dispatch reading every layer.
    Monolithic,
}

impl StrategyKind {
    /// Every strategy, in menu order.
    pub const ALL: [StrategyKind; 6] = [
        StrategyKind::Sequential,
        StrategyKind::Fused,
        StrategyKind::Tiled,
        StrategyKind::TileMemory,
        StrategyKind::Compute,
        StrategyKind::Monolithic,
    ];

    /// Human-readable name.
    pub fn label(self) -> &'static str {
        match self {
            StrategyKind::Sequential => "Render (1 encoder/layer)",
            StrategyKind::Fused => "Render (1 encoder)",
            StrategyKind::Tiled => "Compute (tiled)",
            StrategyKind::TileMemory => "Render (tile memory)",
            StrategyKind::Compute => "Compute (1 dispatch/layer)",
            StrategyKind::Monolithic => "Compute (monolithic)",
        }
    }

    /// Blend passes one frame of `layers` layers encodes.
    pub fn expected_passes(self, layers: usize, grid: TileGrid) -> usize {
        if layers <= 1 {
            return 0;
        }
        match self {
            StrategyKind::Monolithic => 1,
            StrategyKind::Tiled => (layers - 1) * grid.count() as usize,
            _ => layers - 1,
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Construction parameters shared by all strategies.
#[derive(Clone, Copy, Debug)]
pub struct StrategyOpts {
    /// Working surface size.
    pub working: Extent,
    /// Tile grid of the tiled strategy.
    pub grid: TileGrid,
    /// Pipelines per pool.
    pub pool_size: usize,
}

impl Default for StrategyOpts {
    fn default() -> Self {
        Self {
            working: Extent::WORKING,
            grid: TileGrid::default(),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

/// An instantiated strategy with its private pipelines and intermediates.
#[derive(Debug)]
pub enum Compositor {
    /// See [`SequentialPass`].
    Sequential(SequentialPass),
    /// See [`FusedEncoder`].
    Fused(FusedEncoder),
    /// See [`TiledFused`].
    Tiled(TiledFused),
    /// See [`TileMemory`].
    TileMemory(TileMemory),
    /// See [`ComputeDispatch`].
    Compute(ComputeDispatch),
    /// See [`MonolithicAggregate`].
    Monolithic(MonolithicAggregate),
}

impl Compositor {
    /// Compile pipelines and allocate intermediates for `kind`.
    pub fn new(
        kind: StrategyKind,
        device: &mut dyn GpuDevice,
        opts: &StrategyOpts,
    ) -> BlendResult<Self> {
        let compositor = match kind {
            StrategyKind::Sequential => Self::Sequential(SequentialPass::new(device, opts)?),
            StrategyKind::Fused => Self::Fused(FusedEncoder::new(device, opts)?),
            StrategyKind::Tiled => Self::Tiled(TiledFused::new(device, opts)?),
            StrategyKind::TileMemory => Self::TileMemory(TileMemory::new(device, opts)?),
            StrategyKind::Compute => Self::Compute(ComputeDispatch::new(device, opts)?),
            StrategyKind::Monolithic => Self::Monolithic(MonolithicAggregate::new(device)?),
        };
        tracing::debug!(strategy = %kind, working = %opts.working, "compositor ready");
        Ok(compositor)
    }

    /// Which strategy this is.
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Sequential(_) => StrategyKind::Sequential,
            Self::Fused(_) => StrategyKind::Fused,
            Self::Tiled(_) => StrategyKind::Tiled,
            Self::TileMemory(_) => StrategyKind::TileMemory,
            Self::Compute(_) => StrategyKind::Compute,
            Self::Monolithic(_) => StrategyKind::Monolithic,
        }
    }

    /// Encode the fold of `layers` uploaded layers into `target`.
    ///
    /// A single layer is copied as is.
    #[tracing::instrument(level = "debug", skip(self, buffer), fields(strategy = %self.kind()))]
    pub fn compose(
        &mut self,
        buffer: &mut CommandBuffer,
        layers: usize,
        target: ImageRef,
    ) -> BlendResult<()> {
        if layers == 0 {
            return Err(BlendError::encoding("nothing to compose: zero layers"));
        }
        if layers == 1 {
            return buffer.encode_copy(ImageRef::Layer(0), target);
        }
        match self {
            Self::Sequential(s) => s.compose(buffer, layers, target),
            Self::Fused(s) => s.compose(buffer, layers, target),
            Self::Tiled(s) => s.compose(buffer, layers, target),
            Self::TileMemory(s) => s.compose(buffer, layers, target),
            Self::Compute(s) => s.compose(buffer, layers, target),
            Self::Monolithic(s) => s.compose(buffer, layers, target),
        }
    }

    /// Resident bytes of the strategy's intermediates.
    pub fn footprint_bytes(&self) -> usize {
        match self {
            Self::Sequential(s) => s.footprint_bytes(),
            Self::Fused(s) => s.footprint_bytes(),
            Self::Tiled(s) => s.footprint_bytes(),
            Self::TileMemory(s) => s.footprint_bytes(),
            Self::Compute(s) => s.footprint_bytes(),
            Self::Monolithic(_) => 0,
        }
    }

    /// Free device images owned by the strategy.
    pub fn release(self, device: &mut dyn GpuDevice) -> BlendResult<()> {
        match self {
            Self::Sequential(s) => s.release(device),
            Self::Fused(s) => s.release(device),
            Self::Tiled(s) => s.release(device),
            Self::TileMemory(s) => s.release(device),
            Self::Compute(s) => s.release(device),
            Self::Monolithic(_) => Ok(()),
        }
    }
}

/// Destination of pass `pass` of `passes` when one scratch image alternates with the target.
///
/// The last pass always lands in the target, and consecutive passes never share a destination,
/// so no pass reads the image it writes.
pub(crate) fn alternating_dst(
    pass: usize,
    passes: usize,
    scratch: ImageRef,
    target: ImageRef,
) -> ImageRef {
    if (passes - 1 - pass).is_multiple_of(2) {
        target
    } else {
        scratch
    }
}

/// Destination of pass `pass` of `passes` when two attachments rotate: pass `k` writes
/// attachment `k % 2` and reads `(k + 1) % 2`, and the last pass writes the target.
pub(crate) fn rotating_dst(
    pass: usize,
    passes: usize,
    pair: [ImageRef; 2],
    target: ImageRef,
) -> ImageRef {
    if pass + 1 == passes {
        target
    } else {
        pair[pass % 2]
    }
}

/// One render scope folding every layer through a rotating attachment pair into `target`.
pub(crate) fn encode_rotating_scope(
    buffer: &mut CommandBuffer,
    label: &str,
    pair: [ImageRef; 2],
    target: ImageRef,
    layers: usize,
    pool: &mut PipelineStatePool,
) -> BlendResult<()> {
    let working = buffer.working();
    let passes = layers - 1;
    buffer.encode_render(label, &[pair[0], pair[1], target], |enc| {
        let mut src1 = layer(0);
        for pass in 0..passes {
            let dst = rotating_dst(pass, passes, pair, target);
            enc.draw_blend(BlendPassDescriptor::full(
                src1,
                layer(pass + 1),
                dst,
                working,
                pool.next(),
            ))?;
            src1 = dst;
        }
        Ok(())
    })
}

/// Layer `i` as a pass operand.
pub(crate) fn layer(i: usize) -> ImageRef {
    ImageRef::Layer(i as u32)
}

#[cfg(test)]
#[path = "../tests/unit/strategy.rs"]
mod tests;
