//! Per-frame driver: acquire a target, encode under the scheduler, submit, present.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::{
    config::BenchConfig,
    foundation::{
        core::{Extent, TileRect},
        error::{BlendError, BlendResult},
        image::ImageRGBA,
    },
    gpu::{
        command::{CommandBuffer, EncodeStats, SurfaceId},
        device::{DeviceStats, GpuDevice, create_device},
    },
    layers::LayerStack,
    scheduler::{CommandScheduler, SchedulingMode},
    strategy::{Compositor, StrategyKind, StrategyOpts},
    surface::{SurfaceProvider, SurfaceRing, TargetSurface, viewport},
};

/// How long [`FrameDriver::draw_next`] waits for a target surface.
pub const TARGET_TIMEOUT: Duration = Duration::from_secs(1);

// Granularity of device polling while waiting for a target.
const POLL_SLICE: Duration = Duration::from_millis(1);

/// Progress of the most recent frame.
///
/// `Idle -> Encoding -> Submitted -> Presented`, and back to `Idle` when the next frame starts.
/// `Presented` is set by the device once the frame's target is on screen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameState {
    /// No frame in progress.
    #[default]
    Idle,
    /// Building the command buffer.
    Encoding,
    /// Handed to the device, not yet on screen.
    Submitted,
    /// The frame's target is on screen.
    Presented,
}

#[derive(Debug, Default)]
struct Progress {
    frame: u64,
    state: FrameState,
}

fn lock_progress(progress: &Mutex<Progress>) -> MutexGuard<'_, Progress> {
    match progress.lock() {
        Ok(p) => p,
        Err(p) => p.into_inner(),
    }
}

/// What one submitted frame looked like.
#[derive(Clone, Debug)]
pub struct FrameReport {
    /// Frame number, counting submitted frames only.
    pub frame: u64,
    /// Strategy that encoded the frame.
    pub strategy: StrategyKind,
    /// Scheduling mode the frame was encoded under.
    pub scheduling: SchedulingMode,
    /// Target surface.
    pub surface: SurfaceId,
    /// What was recorded.
    pub encode: EncodeStats,
    /// Serial signal value of the frame, if any.
    pub signal: Option<u64>,
    /// Wall time spent encoding and submitting.
    pub cpu_time: Duration,
}

/// Result of [`FrameDriver::draw`].
#[derive(Clone, Debug)]
pub enum DrawOutcome {
    /// No target surface was free; nothing was encoded or submitted.
    Skipped,
    /// The frame was submitted.
    Submitted(FrameReport),
}

impl DrawOutcome {
    /// `true` for [`DrawOutcome::Skipped`].
    pub fn is_skipped(&self) -> bool {
        matches!(self, DrawOutcome::Skipped)
    }

    /// The report of a submitted frame.
    pub fn report(&self) -> Option<&FrameReport> {
        match self {
            DrawOutcome::Skipped => None,
            DrawOutcome::Submitted(r) => Some(r),
        }
    }
}

/// Owns the device, the presentation surfaces, the active strategy and the scheduler, and
/// drives one frame per [`FrameDriver::draw`] call.
pub struct FrameDriver {
    device: Box<dyn GpuDevice>,
    surfaces: Box<dyn SurfaceProvider>,
    compositor: Option<Compositor>,
    scheduler: CommandScheduler,
    layers: LayerStack,
    opts: StrategyOpts,
    progress: Arc<Mutex<Progress>>,
    frames: u64,
    skipped: u64,
}

impl FrameDriver {
    /// Build everything `cfg` describes: device, generated layers and a surface ring.
    pub fn new(cfg: &BenchConfig) -> BlendResult<Self> {
        cfg.validate()?;
        let mut device = create_device(cfg.device, cfg.device_opts())?;
        let layers =
            LayerStack::generate(cfg.layer_count, cfg.working_size, cfg.layer_pattern)?;
        let surfaces = SurfaceRing::new(
            device.as_mut(),
            cfg.working_size,
            cfg.pending_surfaces,
            cfg.presentable(),
        )?;
        Self::with_parts(device, Box::new(surfaces), layers, cfg)
    }

    /// Build a driver around an existing device, surface provider and layer stack.
    pub fn with_parts(
        mut device: Box<dyn GpuDevice>,
        surfaces: Box<dyn SurfaceProvider>,
        layers: LayerStack,
        cfg: &BenchConfig,
    ) -> BlendResult<Self> {
        let opts = cfg.strategy_opts();
        if layers.extent() != opts.working {
            return Err(BlendError::config(format!(
                "layers are {} but the working surface is {}",
                layers.extent(),
                opts.working
            )));
        }
        device.upload_layers(&layers)?;
        let compositor = Compositor::new(cfg.strategy, device.as_mut(), &opts)?;
        let scheduler = CommandScheduler::new(device.as_mut(), cfg.scheduling)?;
        tracing::info!(
            device = device.name(),
            strategy = %cfg.strategy,
            scheduling = ?cfg.scheduling,
            layers = layers.len(),
            working = %opts.working,
            "frame driver ready"
        );
        Ok(Self {
            device,
            surfaces,
            compositor: Some(compositor),
            scheduler,
            layers,
            opts,
            progress: Arc::default(),
            frames: 0,
            skipped: 0,
        })
    }

    /// Encode and submit one frame, or skip it when no target surface is free.
    ///
    /// Never waits for a target; see [`FrameDriver::draw_next`] for the paced variant.
    #[tracing::instrument(level = "debug", skip(self), fields(frame = self.frames))]
    pub fn draw(&mut self) -> BlendResult<DrawOutcome> {
        let Some(target) = self.surfaces.acquire() else {
            self.skipped += 1;
            tracing::debug!("no target surface available, skipping frame");
            return Ok(DrawOutcome::Skipped);
        };

        let frame = self.frames;
        self.set_state(frame, FrameState::Encoding);
        let started = Instant::now();
        let viewport = self.viewport();
        let layer_count = self.layers.len();
        let mut buffer = CommandBuffer::new(format!("frame {frame}"), self.opts.working);
        let Some(compositor) = self.compositor.as_mut() else {
            self.abandon(frame, target);
            return Err(BlendError::encoding("no active strategy"));
        };
        let strategy = compositor.kind();
        let encoded = self.scheduler.with_scoped_scheduling(&mut buffer, |cb| {
            compositor.compose(cb, layer_count, target.image.into())?;
            cb.present(target.id, target.image.into(), viewport);
            Ok(())
        });
        if let Err(err) = encoded {
            self.abandon(frame, target);
            return Err(err);
        }
        buffer.on_completed(self.surfaces.completion_handler(target));
        let progress = Arc::clone(&self.progress);
        buffer.on_completed(move || {
            let mut p = lock_progress(&progress);
            if p.frame == frame && p.state == FrameState::Submitted {
                p.state = FrameState::Presented;
            }
        });
        let encode = buffer.stats();

        // Submitted before the hand-off: the device may present the frame before `submit`
        // returns.
        self.set_state(frame, FrameState::Submitted);
        if let Err(err) = self.device.submit(buffer) {
            self.abandon(frame, target);
            return Err(err);
        }
        tracing::debug!(
            scopes = encode.scopes(),
            passes = encode.passes(),
            surface = target.id.0,
            "encoded frame"
        );

        let report = FrameReport {
            frame,
            strategy,
            scheduling: self.scheduler.mode(),
            surface: target.id,
            encode,
            signal: self.scheduler.last_signal_value(),
            cpu_time: started.elapsed(),
        };
        self.frames += 1;
        Ok(DrawOutcome::Submitted(report))
    }

    /// Wait up to `timeout` for a free target surface, polling the device so finished frames
    /// hand their targets back. Returns whether a target is free.
    pub fn wait_for_target(&mut self, timeout: Duration) -> BlendResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            self.device.poll()?;
            let left = deadline.saturating_duration_since(Instant::now());
            if self.surfaces.wait_for_target(left.min(POLL_SLICE)) {
                return Ok(true);
            }
            if left.is_zero() {
                return Ok(false);
            }
        }
    }

    /// Wait for a target surface (up to [`TARGET_TIMEOUT`]), then draw.
    ///
    /// Skips only when no target frees up in time. The wait is not part of the reported
    /// `cpu_time`.
    pub fn draw_next(&mut self) -> BlendResult<DrawOutcome> {
        if !self.wait_for_target(TARGET_TIMEOUT)? {
            tracing::warn!(timeout = ?TARGET_TIMEOUT, "timed out waiting for a target surface");
        }
        self.draw()
    }

    fn set_state(&self, frame: u64, state: FrameState) {
        let mut p = lock_progress(&self.progress);
        p.frame = frame;
        p.state = state;
    }

    fn abandon(&mut self, frame: u64, target: TargetSurface) {
        self.surfaces.discard(target);
        self.set_state(frame, FrameState::Idle);
    }

    /// Record a new presentable size. Strategies keep compositing the working surface; only the
    /// presented viewport changes.
    pub fn on_surface_resize(&mut self, size: Extent) {
        self.surfaces.on_resize(size);
        tracing::debug!(presentable = %size, viewport = ?self.viewport(), "surface resized");
    }

    /// Part of the working surface shown on the presentable surface.
    pub fn viewport(&self) -> TileRect {
        viewport(self.opts.working, self.surfaces.as_ref())
    }

    /// Switch scheduling mode. The scheduler and its event are recreated, so the next serial
    /// frame starts a fresh signal sequence.
    pub fn set_scheduling_mode(&mut self, mode: SchedulingMode) -> BlendResult<()> {
        self.scheduler = CommandScheduler::new(self.device.as_mut(), mode)?;
        Ok(())
    }

    /// Switch strategy. Waits for in-flight frames before freeing the old intermediates.
    pub fn set_strategy(&mut self, kind: StrategyKind) -> BlendResult<()> {
        self.device.wait_idle()?;
        if let Some(old) = self.compositor.take() {
            old.release(self.device.as_mut())?;
        }
        self.compositor = Some(Compositor::new(kind, self.device.as_mut(), &self.opts)?);
        Ok(())
    }

    /// Block until the device has finished every submitted frame.
    pub fn wait_idle(&mut self) -> BlendResult<()> {
        self.device.wait_idle()
    }

    /// Wait for the device, then read back the most recently presented target.
    pub fn read_presented(&mut self) -> BlendResult<Option<ImageRGBA>> {
        self.device.wait_idle()?;
        match self.surfaces.last_presented() {
            Some(target) => Ok(Some(self.device.read_image(target.image.into())?)),
            None => Ok(None),
        }
    }

    /// State of the most recent frame.
    pub fn state(&self) -> FrameState {
        lock_progress(&self.progress).state
    }

    /// Active strategy.
    pub fn strategy(&self) -> Option<StrategyKind> {
        self.compositor.as_ref().map(Compositor::kind)
    }

    /// Active scheduling mode.
    pub fn scheduling_mode(&self) -> SchedulingMode {
        self.scheduler.mode()
    }

    /// The scheduler, for inspecting serial signal values.
    pub fn scheduler(&self) -> &CommandScheduler {
        &self.scheduler
    }

    /// Input layers.
    pub fn layers(&self) -> &LayerStack {
        &self.layers
    }

    /// Resident bytes of the active strategy's intermediates.
    pub fn footprint_bytes(&self) -> usize {
        self.compositor
            .as_ref()
            .map_or(0, Compositor::footprint_bytes)
    }

    /// Device execution counters.
    pub fn device_stats(&self) -> DeviceStats {
        self.device.stats()
    }

    /// Name of the executing device.
    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    /// Submitted frames.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Skipped frames.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
#[path = "../tests/unit/harness.rs"]
mod tests;
