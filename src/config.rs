use std::{fs::File, io::BufReader, path::Path};

use crate::{
    foundation::{
        core::{Extent, TileGrid},
        error::{BlendError, BlendResult},
    },
    gpu::device::{DeviceKind, DeviceOpts},
    layers::LayerPattern,
    pipeline_pool::DEFAULT_POOL_SIZE,
    scheduler::SchedulingMode,
    strategy::{StrategyKind, StrategyOpts},
    surface::DEFAULT_PENDING_SURFACES,
};

/// Everything a benchmark run can be configured with.
///
/// Missing JSON fields take their defaults; unknown fields are rejected.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    /// Active strategy.
    pub strategy: StrategyKind,
    /// Frame ordering on the device.
    pub scheduling: SchedulingMode,
    /// Grid used by the tiled strategy.
    pub tiles: TileGrid,
    /// Target surfaces in flight.
    pub pending_surfaces: usize,
    /// Pipelines per pool.
    pub pipeline_pool_size: usize,
    /// Working surface size.
    pub working_size: Extent,
    /// Size of the presentable surface; the working size when unset.
    pub presentable_size: Option<Extent>,
    /// Number of generated layers.
    pub layer_count: usize,
    /// How generated layers are filled.
    pub layer_pattern: LayerPattern,
    /// Executing device.
    pub device: DeviceKind,
    /// Execution lanes of the CPU device.
    pub device_lanes: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            scheduling: SchedulingMode::default(),
            tiles: TileGrid::default(),
            pending_surfaces: DEFAULT_PENDING_SURFACES,
            pipeline_pool_size: DEFAULT_POOL_SIZE,
            working_size: Extent::WORKING,
            presentable_size: None,
            layer_count: 50,
            layer_pattern: LayerPattern::default(),
            device: DeviceKind::default(),
            device_lanes: DeviceOpts::default().lanes,
        }
    }
}

impl BenchConfig {
    /// Parse a config from JSON.
    pub fn from_reader<R: std::io::Read>(r: R) -> BlendResult<Self> {
        let cfg: BenchConfig = serde_json::from_reader(r)
            .map_err(|e| BlendError::serde(format!("parse config JSON: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a config from a JSON file on disk.
    pub fn from_path(path: impl AsRef<Path>) -> BlendResult<Self> {
        let path = path.as_ref();
        let f = File::open(path).map_err(|e| {
            BlendError::config(format!("open config JSON '{}': {e}", path.display()))
        })?;
        Self::from_reader(BufReader::new(f))
    }

    /// Check value ranges and that the tile grid partitions the working surface.
    pub fn validate(&self) -> BlendResult<()> {
        if self.pending_surfaces < 2 {
            return Err(BlendError::config(format!(
                "pending_surfaces must be >= 2 (got {})",
                self.pending_surfaces
            )));
        }
        if self.pipeline_pool_size == 0 {
            return Err(BlendError::config("pipeline_pool_size must be >= 1"));
        }
        if self.layer_count == 0 {
            return Err(BlendError::config("layer_count must be >= 1"));
        }
        if self.device_lanes == 0 {
            return Err(BlendError::config("device_lanes must be >= 1"));
        }
        if self.working_size.is_empty() {
            return Err(BlendError::config(format!(
                "working_size {} is empty",
                self.working_size
            )));
        }
        TileGrid::new(self.tiles.columns, self.tiles.rows)?.tile_extent(self.working_size)?;
        Ok(())
    }

    /// Presentable surface size, defaulting to the working size.
    pub fn presentable(&self) -> Extent {
        self.presentable_size.unwrap_or(self.working_size)
    }

    /// Strategy construction parameters.
    pub fn strategy_opts(&self) -> StrategyOpts {
        StrategyOpts {
            working: self.working_size,
            grid: self.tiles,
            pool_size: self.pipeline_pool_size,
        }
    }

    /// Device construction parameters.
    pub fn device_opts(&self) -> DeviceOpts {
        DeviceOpts {
            lanes: self.device_lanes,
        }
    }
}

#[cfg(test)]
#[path = "../tests/unit/config.rs"]
mod tests;
