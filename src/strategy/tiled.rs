use crate::{
    foundation::{
        core::{Extent, TileGrid},
        error::BlendResult,
    },
    gpu::{
        command::{BlendPassDescriptor, CommandBuffer, ImageRef, PipelineKind},
        device::GpuDevice,
    },
    intermediate::IntermediateBufferSet,
    pipeline_pool::PipelineStatePool,
    strategy::{StrategyOpts, alternating_dst, layer},
};

/// The working surface split into a grid; each tile runs the whole fold on its own tile-sized
/// scratch image before moving on, all inside one compute scope.
#[derive(Debug)]
pub struct TiledFused {
    grid: TileGrid,
    tile_extent: Extent,
    pool: PipelineStatePool,
    tiles: IntermediateBufferSet,
}

impl TiledFused {
    pub(crate) fn new(device: &mut dyn GpuDevice, opts: &StrategyOpts) -> BlendResult<Self> {
        let tile_extent = opts.grid.tile_extent(opts.working)?;
        Ok(Self {
            grid: opts.grid,
            tile_extent,
            pool: PipelineStatePool::new(
                device,
                PipelineKind::ComputeBlend,
                opts.pool_size,
                "tile blend",
            )?,
            tiles: IntermediateBufferSet::per_tile(device, opts.working, opts.grid)?,
        })
    }

    pub(crate) fn compose(
        &mut self,
        buffer: &mut CommandBuffer,
        layers: usize,
        target: ImageRef,
    ) -> BlendResult<()> {
        self.pool.reset();
        let passes = layers - 1;
        let (grid, tile_extent) = (self.grid, self.tile_extent);
        let tiles = &self.tiles;
        let pool = &mut self.pool;
        buffer.encode_compute("tiled blend", |enc| {
            for tile in 0..grid.count() {
                let scratch = tiles.image(tile as usize)?;
                let mut src1 = layer(0);
                for pass in 0..passes {
                    let dst = alternating_dst(pass, passes, scratch, target);
                    enc.dispatch_blend(BlendPassDescriptor {
                        src1,
                        src2: layer(pass + 1),
                        dst,
                        src1_tile: tile,
                        src2_tile: tile,
                        dst_tile: tile,
                        tile_extent,
                        grid,
                        pipeline: pool.next(),
                    })?;
                    src1 = dst;
                }
            }
            Ok(())
        })
    }

    pub(crate) fn footprint_bytes(&self) -> usize {
        self.tiles.footprint_bytes()
    }

    pub(crate) fn release(self, device: &mut dyn GpuDevice) -> BlendResult<()> {
        self.tiles.release(device)
    }
}
