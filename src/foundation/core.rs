use crate::foundation::error::{BlendError, BlendResult};

/// Width of the default working surface, in pixels.
pub const WORKING_WIDTH: u32 = 4000;
/// Height of the default working surface, in pixels.
pub const WORKING_HEIGHT: u32 = 2000;

/// Pixel dimensions of an image or surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Extent {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Extent {
    /// The fixed working surface every strategy composites into.
    pub const WORKING: Extent = Extent {
        width: WORKING_WIDTH,
        height: WORKING_HEIGHT,
    };

    /// Build an extent.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels covered.
    pub fn pixel_count(self) -> usize {
        (self.width as usize).saturating_mul(self.height as usize)
    }

    /// Byte size of a premultiplied RGBA8 image of this extent.
    pub fn byte_len(self) -> usize {
        self.pixel_count().saturating_mul(4)
    }

    /// `true` when either dimension is zero.
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Rectangle covering the whole extent.
    pub fn rect(self) -> TileRect {
        TileRect {
            x: 0,
            y: 0,
            width: self.width,
            height: self.height,
        }
    }
}

impl Default for Extent {
    fn default() -> Self {
        Self::WORKING
    }
}

impl std::fmt::Display for Extent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Axis-aligned pixel rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileRect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl TileRect {
    /// Exclusive right edge.
    pub fn right(self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(self) -> u32 {
        self.y + self.height
    }

    /// Size of the rectangle.
    pub fn extent(self) -> Extent {
        Extent::new(self.width, self.height)
    }

    /// `true` when the rectangle lies inside `extent`.
    pub fn fits_in(self, extent: Extent) -> bool {
        self.right() <= extent.width && self.bottom() <= extent.height
    }

    /// `true` when both rectangles share at least one pixel.
    pub fn overlaps(self, other: TileRect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Region of the working surface that is visible on a presentable surface of `presentable`
    /// size, anchored at the origin.
    pub fn clipped_viewport(working: Extent, presentable: Extent) -> TileRect {
        TileRect {
            x: 0,
            y: 0,
            width: working.width.min(presentable.width),
            height: working.height.min(presentable.height),
        }
    }
}

/// A `columns x rows` grid of equal tiles over a surface.
///
/// Tile `i` starts at `((i % columns) * tile_width, (i / columns) * tile_height)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TileGrid {
    /// Tiles per row.
    pub columns: u32,
    /// Tiles per column.
    pub rows: u32,
}

impl TileGrid {
    /// The degenerate 1x1 grid used by untiled passes.
    pub const WHOLE: TileGrid = TileGrid {
        columns: 1,
        rows: 1,
    };

    /// Build a grid, rejecting empty ones.
    pub fn new(columns: u32, rows: u32) -> BlendResult<Self> {
        if columns == 0 || rows == 0 {
            return Err(BlendError::config(format!(
                "tile grid must have at least one column and row (got {columns}x{rows})"
            )));
        }
        Ok(Self { columns, rows })
    }

    /// Total number of tiles.
    pub fn count(self) -> u32 {
        self.columns.saturating_mul(self.rows)
    }

    /// Size of one tile on `surface`. The grid must divide the surface exactly, otherwise the
    /// tiles would not partition it.
    pub fn tile_extent(self, surface: Extent) -> BlendResult<Extent> {
        if self.columns == 0 || self.rows == 0 {
            return Err(BlendError::config("tile grid has zero columns or rows"));
        }
        if !surface.width.is_multiple_of(self.columns)
            || !surface.height.is_multiple_of(self.rows)
        {
            return Err(BlendError::config(format!(
                "tile grid {}x{} does not evenly divide surface {surface}",
                self.columns, self.rows
            )));
        }
        Ok(Extent::new(
            surface.width / self.columns,
            surface.height / self.rows,
        ))
    }

    /// Origin of tile `index` for tiles of `tile` size.
    pub fn tile_origin(self, index: u32, tile: Extent) -> (u32, u32) {
        (
            (index % self.columns) * tile.width,
            (index / self.columns) * tile.height,
        )
    }

    /// Rectangle of tile `index` on `surface`.
    pub fn tile_rect(self, surface: Extent, index: u32) -> BlendResult<TileRect> {
        if index >= self.count() {
            return Err(BlendError::config(format!(
                "tile index {index} out of range for {} tiles",
                self.count()
            )));
        }
        let tile = self.tile_extent(surface)?;
        let (x, y) = self.tile_origin(index, tile);
        Ok(TileRect {
            x,
            y,
            width: tile.width,
            height: tile.height,
        })
    }

    /// All tile rectangles in index order.
    pub fn rects(self, surface: Extent) -> BlendResult<Vec<TileRect>> {
        (0..self.count())
            .map(|i| self.tile_rect(surface, i))
            .collect()
    }
}

impl Default for TileGrid {
    fn default() -> Self {
        Self {
            columns: 2,
            rows: 2,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
