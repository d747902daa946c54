//! The ordered input stack and its procedural generators.

use std::sync::Arc;

use rayon::prelude::*;

use crate::foundation::{
    core::Extent,
    error::{BlendError, BlendResult},
    image::{ImageRGBA, PremulRgba8},
};

/// How [`LayerStack::generate`] fills each layer.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum LayerPattern {
    /// One opaque checkered block per layer, blocks laid out left to right, top to bottom.
    #[default]
    Blocks,
    /// Translucent bands that overlap their neighbours, so layer order shows in the output.
    Overlapping,
}

/// An ordered, immutable sequence of equally sized layers. Layer 0 is the bottom.
#[derive(Clone, Debug)]
pub struct LayerStack {
    extent: Extent,
    layers: Vec<Arc<ImageRGBA>>,
}

impl LayerStack {
    /// Build a stack from existing images. Needs at least one layer, all of the same extent.
    pub fn new(layers: Vec<ImageRGBA>) -> BlendResult<Self> {
        let Some(first) = layers.first() else {
            return Err(BlendError::config("layer stack must contain at least one layer"));
        };
        let extent = first.extent();
        if extent.is_empty() {
            return Err(BlendError::config(format!("layer extent {extent} is empty")));
        }
        if let Some((i, bad)) = layers
            .iter()
            .enumerate()
            .find(|(_, l)| l.extent() != extent)
        {
            return Err(BlendError::config(format!(
                "layer {i} is {} but layer 0 is {extent}",
                bad.extent()
            )));
        }
        Ok(Self {
            extent,
            layers: layers.into_iter().map(Arc::new).collect(),
        })
    }

    /// Generate `count` layers of `extent` with `pattern`.
    #[tracing::instrument(level = "debug")]
    pub fn generate(count: usize, extent: Extent, pattern: LayerPattern) -> BlendResult<Self> {
        if count == 0 {
            return Err(BlendError::config("layer_count must be >= 1"));
        }
        if extent.is_empty() {
            return Err(BlendError::config(format!("layer extent {extent} is empty")));
        }
        let layers = (0..count)
            .into_par_iter()
            .map(|i| match pattern {
                LayerPattern::Blocks => block_layer(i, count, extent),
                LayerPattern::Overlapping => overlapping_layer(i, count, extent),
            })
            .collect();
        Self::new(layers)
    }

    /// Extent shared by every layer.
    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Always `false`; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layer `index`, bottom first.
    pub fn get(&self, index: usize) -> Option<&Arc<ImageRGBA>> {
        self.layers.get(index)
    }

    /// All layers in order.
    pub fn layers(&self) -> &[Arc<ImageRGBA>] {
        &self.layers
    }

    /// Borrowed views in order, the shape the CPU kernels take.
    pub fn as_refs(&self) -> Vec<&ImageRGBA> {
        self.layers.iter().map(|l| l.as_ref()).collect()
    }

    /// The same layers top to bottom.
    pub fn reversed(&self) -> Self {
        let mut layers = self.layers.clone();
        layers.reverse();
        Self {
            extent: self.extent,
            layers,
        }
    }
}

const RED: PremulRgba8 = [255, 0, 0, 255];
const GREEN: PremulRgba8 = [0, 255, 0, 255];
const BLUE: PremulRgba8 = [0, 0, 255, 255];
const CLEAR: PremulRgba8 = [0, 0, 0, 0];

fn block_layer(index: usize, count: usize, extent: Extent) -> ImageRGBA {
    let per_block = extent.pixel_count() / count;
    let block = ((per_block as f64).sqrt().floor() as u32).max(1);
    let per_line = (extent.width / block).max(1) as usize;
    let x0 = (index % per_line) as u32 * block;
    let y0 = (index / per_line) as u32 * block;

    ImageRGBA::from_fn(extent, |x, y| {
        let inside = x >= x0 && x < x0 + block && y >= y0 && y < y0 + block;
        if !inside {
            return CLEAR;
        }
        match (x % 8 < 4, y % 8 < 4) {
            (true, true) => RED,
            (true, false) => GREEN,
            (false, false) => BLUE,
            (false, true) => CLEAR,
        }
    })
}

fn overlapping_layer(index: usize, count: usize, extent: Extent) -> ImageRGBA {
    // Each band spans a third of the width and starts a little further right than the last one.
    let band = (extent.width / 3).max(1);
    let step = (extent.width.saturating_sub(band) / count.max(1) as u32).max(1);
    let x0 = (index as u32 * step) % extent.width;
    let alpha = 96 + (index * 37 % 128) as u8;
    let tint = [
        (index * 71 % 256) as u8,
        (index * 149 % 256) as u8,
        (index * 23 % 256) as u8,
    ];
    let premul = |c: u8| ((u16::from(c) * u16::from(alpha) + 127) / 255) as u8;
    let px = [premul(tint[0]), premul(tint[1]), premul(tint[2]), alpha];

    ImageRGBA::from_fn(extent, |x, _| {
        if x >= x0 && x < x0 + band { px } else { CLEAR }
    })
}

#[cfg(test)]
#[path = "../tests/unit/layers.rs"]
mod tests;
