use crate::foundation::{
    core::{Extent, TileRect},
    error::{BlendError, BlendResult},
};

/// A premultiplied RGBA8 pixel.
pub type PremulRgba8 = [u8; 4];

/// A premultiplied RGBA8 image, tightly packed, row-major.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageRGBA {
    extent: Extent,
    data: Vec<u8>,
}

impl ImageRGBA {
    /// A fully transparent image.
    pub fn transparent(extent: Extent) -> Self {
        Self {
            extent,
            data: vec![0; extent.byte_len()],
        }
    }

    /// Wrap existing bytes; `data` must hold exactly `extent.byte_len()` bytes.
    pub fn from_raw(extent: Extent, data: Vec<u8>) -> BlendResult<Self> {
        if data.len() != extent.byte_len() {
            return Err(BlendError::config(format!(
                "image {extent} expects {} bytes, got {}",
                extent.byte_len(),
                data.len()
            )));
        }
        Ok(Self { extent, data })
    }

    /// Build an image by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(extent: Extent, mut f: impl FnMut(u32, u32) -> PremulRgba8) -> Self {
        let mut data = Vec::with_capacity(extent.byte_len());
        for y in 0..extent.height {
            for x in 0..extent.width {
                data.extend_from_slice(&f(x, y));
            }
        }
        Self { extent, data }
    }

    /// Image dimensions.
    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Raw bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Raw bytes, mutable.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Consume into raw bytes.
    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.extent.width as usize * 4
    }

    /// Pixel at `(x, y)`. Panics when out of bounds, like slice indexing.
    pub fn pixel(&self, x: u32, y: u32) -> PremulRgba8 {
        let i = self.offset(x, y);
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    /// Overwrite the pixel at `(x, y)`.
    pub fn set_pixel(&mut self, x: u32, y: u32, px: PremulRgba8) {
        let i = self.offset(x, y);
        self.data[i..i + 4].copy_from_slice(&px);
    }

    /// Copy out `rect` as a standalone image.
    pub fn crop(&self, rect: TileRect) -> BlendResult<ImageRGBA> {
        if !rect.fits_in(self.extent) {
            return Err(BlendError::execution(format!(
                "crop {rect:?} exceeds image {}",
                self.extent
            )));
        }
        let row_bytes = rect.width as usize * 4;
        let mut data = Vec::with_capacity(rect.extent().byte_len());
        for y in rect.y..rect.bottom() {
            let start = self.offset(rect.x, y);
            data.extend_from_slice(&self.data[start..start + row_bytes]);
        }
        Ok(ImageRGBA {
            extent: rect.extent(),
            data,
        })
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.extent.width as usize + x as usize) * 4
    }
}

impl std::fmt::Debug for ImageRGBA {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageRGBA")
            .field("extent", &self.extent)
            .field("bytes", &self.data.len())
            .finish()
    }
}
