//! CPU blend kernels.
//!
//! These are the ground truth for every compositing strategy: all math is premultiplied RGBA8
//! integer arithmetic, so any execution order that applies the same pairwise blends in layer
//! order produces the same bytes. The WGSL kernels of the `gpu` feature mirror these formulas.

use rayon::prelude::*;

use crate::foundation::{
    core::{Extent, TileRect},
    error::{BlendError, BlendResult},
    image::{ImageRGBA, PremulRgba8},
};

/// Premultiplied source-over: `top` composited onto `bottom`.
///
/// Not commutative: `over(a, b) != over(b, a)` whenever the alphas differ.
pub fn over(bottom: PremulRgba8, top: PremulRgba8) -> PremulRgba8 {
    let inv = 255u16 - u16::from(top[3]);
    let mut out = [0u8; 4];
    for i in 0..4 {
        out[i] = top[i].saturating_add(mul_div255(u16::from(bottom[i]), inv));
    }
    out
}

/// Where one pairwise blend reads and writes, in pixel coordinates of each image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlendRegion {
    /// Top-left of the region in `src1`.
    pub src1_origin: (u32, u32),
    /// Top-left of the region in `src2`.
    pub src2_origin: (u32, u32),
    /// Top-left of the region in `dst`.
    pub dst_origin: (u32, u32),
    /// Region size.
    pub extent: Extent,
}

impl BlendRegion {
    /// The whole of an `extent`-sized surface, at the origin of all three images.
    pub fn full(extent: Extent) -> Self {
        Self {
            src1_origin: (0, 0),
            src2_origin: (0, 0),
            dst_origin: (0, 0),
            extent,
        }
    }
}

/// `dst[region] = over(src1[region], src2[region])`, row-parallel.
pub fn blend_region(
    src1: &ImageRGBA,
    src2: &ImageRGBA,
    dst: &mut ImageRGBA,
    region: &BlendRegion,
) -> BlendResult<()> {
    check_region("src1", src1.extent(), region.src1_origin, region.extent)?;
    check_region("src2", src2.extent(), region.src2_origin, region.extent)?;
    check_region("dst", dst.extent(), region.dst_origin, region.extent)?;

    let w = region.extent.width as usize;
    let dst_rows = dst_rows_mut(dst, region.dst_origin.1, region.extent.height);
    let dst_stride = dst_rows.stride;
    dst_rows
        .bytes
        .par_chunks_mut(dst_stride)
        .enumerate()
        .for_each(|(r, row)| {
            let r = r as u32;
            let a = row_slice(src1, region.src1_origin, r, w);
            let b = row_slice(src2, region.src2_origin, r, w);
            let d = &mut row[region.dst_origin.0 as usize * 4..][..w * 4];
            for ((d, a), b) in d
                .chunks_exact_mut(4)
                .zip(a.chunks_exact(4))
                .zip(b.chunks_exact(4))
            {
                let px = over([a[0], a[1], a[2], a[3]], [b[0], b[1], b[2], b[3]]);
                d.copy_from_slice(&px);
            }
        });
    Ok(())
}

/// Fold every layer of `layers` in order into `dst`, one pixel at a time.
///
/// This is the monolithic kernel: the whole fold happens in one invocation without
/// intermediate images.
pub fn blend_all(layers: &[&ImageRGBA], dst: &mut ImageRGBA) -> BlendResult<()> {
    if layers.is_empty() {
        return Err(BlendError::execution("aggregate blend needs at least one layer"));
    }
    let extent = dst.extent();
    for layer in layers {
        if layer.extent() != extent {
            return Err(BlendError::execution(format!(
                "aggregate blend layer {} does not match destination {extent}",
                layer.extent()
            )));
        }
    }

    let stride = dst.stride();
    dst.data_mut()
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(y, row)| {
            let start = y * stride;
            for (x, d) in row.chunks_exact_mut(4).enumerate() {
                let i = start + x * 4;
                let px = |img: &ImageRGBA| -> PremulRgba8 {
                    let s = &img.data()[i..i + 4];
                    [s[0], s[1], s[2], s[3]]
                };
                let mut acc = px(layers[0]);
                for layer in &layers[1..] {
                    acc = over(acc, px(layer));
                }
                d.copy_from_slice(&acc);
            }
        });
    Ok(())
}

/// Copy `src[src_rect]` into `dst` at `dst_origin`.
pub fn copy_region(
    src: &ImageRGBA,
    src_rect: TileRect,
    dst: &mut ImageRGBA,
    dst_origin: (u32, u32),
) -> BlendResult<()> {
    check_region("copy src", src.extent(), (src_rect.x, src_rect.y), src_rect.extent())?;
    check_region("copy dst", dst.extent(), dst_origin, src_rect.extent())?;
    let w = src_rect.width as usize;
    let dst_rows = dst_rows_mut(dst, dst_origin.1, src_rect.height);
    let dst_stride = dst_rows.stride;
    dst_rows
        .bytes
        .par_chunks_mut(dst_stride)
        .enumerate()
        .for_each(|(r, row)| {
            let s = row_slice(src, (src_rect.x, src_rect.y), r as u32, w);
            row[dst_origin.0 as usize * 4..][..w * 4].copy_from_slice(s);
        });
    Ok(())
}

/// The canonical left-to-right fold every strategy must reproduce.
pub fn reference_fold(layers: &[&ImageRGBA]) -> BlendResult<ImageRGBA> {
    let Some(first) = layers.first() else {
        return Err(BlendError::config("cannot fold an empty layer stack"));
    };
    let mut acc = (*first).clone();
    let mut scratch = ImageRGBA::transparent(first.extent());
    for layer in &layers[1..] {
        blend_region(&acc, layer, &mut scratch, &BlendRegion::full(first.extent()))?;
        std::mem::swap(&mut acc, &mut scratch);
    }
    Ok(acc)
}

struct RowsMut<'a> {
    bytes: &'a mut [u8],
    stride: usize,
}

fn dst_rows_mut(dst: &mut ImageRGBA, y: u32, height: u32) -> RowsMut<'_> {
    let stride = dst.stride();
    let start = y as usize * stride;
    let end = start + height as usize * stride;
    RowsMut {
        bytes: &mut dst.data_mut()[start..end],
        stride,
    }
}

fn row_slice(img: &ImageRGBA, origin: (u32, u32), row: u32, width: usize) -> &[u8] {
    let start = ((origin.1 + row) as usize * img.extent().width as usize + origin.0 as usize) * 4;
    &img.data()[start..start + width * 4]
}

fn check_region(
    what: &str,
    image: Extent,
    origin: (u32, u32),
    extent: Extent,
) -> BlendResult<()> {
    let rect = TileRect {
        x: origin.0,
        y: origin.1,
        width: extent.width,
        height: extent.height,
    };
    if !rect.fits_in(image) {
        return Err(BlendError::execution(format!(
            "{what} region {rect:?} exceeds image {image}"
        )));
    }
    Ok(())
}

fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}

#[cfg(test)]
#[path = "../tests/unit/blend.rs"]
mod tests;
