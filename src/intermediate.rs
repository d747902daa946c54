use crate::{
    foundation::{
        core::{Extent, TileGrid},
        error::{BlendError, BlendResult},
    },
    gpu::{
        command::{ImageDesc, ImageId, ImageRef},
        device::GpuDevice,
    },
};

/// Shape of an [`IntermediateBufferSet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferLayout {
    /// One full-surface image, alternated with the frame target.
    Single,
    /// Two full-surface images alternated by pass parity.
    PingPong,
    /// One tile-sized image per grid tile.
    PerTile(TileGrid),
    /// Two tile-memory images; contents live only inside the render scope that attaches them.
    Memoryless,
}

/// Off-screen images holding partial composites between passes.
///
/// Sets persist across frames and are released explicitly when a strategy is torn down.
#[derive(Debug)]
pub struct IntermediateBufferSet {
    layout: BufferLayout,
    images: Vec<ImageId>,
    descs: Vec<ImageDesc>,
}

impl IntermediateBufferSet {
    /// One reusable full-surface image.
    pub fn single(device: &mut dyn GpuDevice, working: Extent) -> BlendResult<Self> {
        Self::allocate(device, BufferLayout::Single, vec![ImageDesc::private(working)])
    }

    /// Two full-surface images.
    pub fn ping_pong(device: &mut dyn GpuDevice, working: Extent) -> BlendResult<Self> {
        Self::allocate(
            device,
            BufferLayout::PingPong,
            vec![ImageDesc::private(working); 2],
        )
    }

    /// One image per tile of `grid` over `working`.
    pub fn per_tile(
        device: &mut dyn GpuDevice,
        working: Extent,
        grid: TileGrid,
    ) -> BlendResult<Self> {
        let tile = grid.tile_extent(working)?;
        Self::allocate(
            device,
            BufferLayout::PerTile(grid),
            vec![ImageDesc::private(tile); grid.count() as usize],
        )
    }

    /// A pair of tile-memory images of `extent`.
    pub fn memoryless(device: &mut dyn GpuDevice, extent: Extent) -> BlendResult<Self> {
        Self::allocate(
            device,
            BufferLayout::Memoryless,
            vec![ImageDesc::memoryless(extent); 2],
        )
    }

    fn allocate(
        device: &mut dyn GpuDevice,
        layout: BufferLayout,
        descs: Vec<ImageDesc>,
    ) -> BlendResult<Self> {
        let mut images = Vec::with_capacity(descs.len());
        for (i, desc) in descs.iter().enumerate() {
            let label = format!("intermediate {layout:?} #{i}");
            images.push(device.create_image(*desc, &label)?);
        }
        tracing::debug!(?layout, count = images.len(), "allocated intermediates");
        Ok(Self {
            layout,
            images,
            descs,
        })
    }

    /// The set's shape.
    pub fn layout(&self) -> BufferLayout {
        self.layout
    }

    /// Image `index` as a pass operand.
    pub fn image(&self, index: usize) -> BlendResult<ImageRef> {
        self.images
            .get(index)
            .map(|id| ImageRef::Image(*id))
            .ok_or_else(|| {
                BlendError::encoding(format!(
                    "intermediate {index} out of range for {:?} set of {}",
                    self.layout,
                    self.images.len()
                ))
            })
    }

    /// Number of images.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// `true` when the set holds no images.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Resident device memory held by the set. Memoryless images count as 0.
    pub fn footprint_bytes(&self) -> usize {
        self.descs.iter().map(|d| d.resident_bytes()).sum()
    }

    /// Free every image.
    pub fn release(self, device: &mut dyn GpuDevice) -> BlendResult<()> {
        for id in self.images {
            device.release_image(id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../tests/unit/intermediate.rs"]
mod tests;
