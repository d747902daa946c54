//! Headless presentation: a ring of target surfaces with a limit on how many are in flight.

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::Duration,
};

use crate::{
    foundation::{
        core::{Extent, TileRect},
        error::{BlendError, BlendResult},
    },
    gpu::{
        command::{CompletionHandler, ImageDesc, ImageId, SurfaceId},
        device::GpuDevice,
    },
};

/// Default number of target surfaces in flight.
pub const DEFAULT_PENDING_SURFACES: usize = 2;

/// A target acquired for one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetSurface {
    /// Ring slot.
    pub id: SurfaceId,
    /// Device image the frame composites into.
    pub image: ImageId,
}

/// Source of per-frame targets.
pub trait SurfaceProvider: Send {
    /// Take a free target, or `None` when every target is still in flight.
    fn acquire(&mut self) -> Option<TargetSurface>;

    /// Block for up to `timeout` until a target is free. Returns whether one is.
    fn wait_for_target(&self, timeout: Duration) -> bool;

    /// Callback that marks `target` presented once its frame has executed.
    fn completion_handler(&self, target: TargetSurface) -> CompletionHandler;

    /// Hand back a target whose frame was never submitted.
    fn discard(&mut self, target: TargetSurface);

    /// Most recently presented target.
    fn last_presented(&self) -> Option<TargetSurface>;

    /// Record a new presentable size.
    fn on_resize(&mut self, size: Extent);

    /// Current presentable size.
    fn presentable_size(&self) -> Extent;
}

#[derive(Debug, Default)]
struct RingState {
    free: VecDeque<TargetSurface>,
    on_screen: Option<TargetSurface>,
    presents: u64,
}

#[derive(Debug, Default)]
struct Ring {
    state: Mutex<RingState>,
    freed: Condvar,
}

impl Ring {
    fn lock(&self) -> MutexGuard<'_, RingState> {
        match self.state.lock() {
            Ok(s) => s,
            Err(p) => p.into_inner(),
        }
    }
}

/// `pending` working-size targets. The presented target stays on screen until the next present
/// replaces it, so at most `pending - 1` frames encode ahead of the display.
#[derive(Debug)]
pub struct SurfaceRing {
    ring: Arc<Ring>,
    targets: Vec<TargetSurface>,
    presentable: Extent,
}

impl SurfaceRing {
    /// Allocate `pending` targets of `working` size on `device`.
    pub fn new(
        device: &mut dyn GpuDevice,
        working: Extent,
        pending: usize,
        presentable: Extent,
    ) -> BlendResult<Self> {
        if pending < 2 {
            return Err(BlendError::config(format!(
                "pending_surfaces must be >= 2 (got {pending})"
            )));
        }
        let mut targets = Vec::with_capacity(pending);
        for i in 0..pending {
            let image = device.create_image(ImageDesc::private(working), &format!("target {i}"))?;
            targets.push(TargetSurface {
                id: SurfaceId(i as u32),
                image,
            });
        }
        let ring = Ring {
            state: Mutex::new(RingState {
                free: targets.iter().copied().collect(),
                ..RingState::default()
            }),
            freed: Condvar::new(),
        };
        Ok(Self {
            ring: Arc::new(ring),
            targets,
            presentable,
        })
    }

    /// Every target of the ring.
    pub fn targets(&self) -> &[TargetSurface] {
        &self.targets
    }

    /// Targets currently free to acquire.
    pub fn free_count(&self) -> usize {
        self.ring.lock().free.len()
    }

    /// Completed presents.
    pub fn presents(&self) -> u64 {
        self.ring.lock().presents
    }
}

impl SurfaceProvider for SurfaceRing {
    fn acquire(&mut self) -> Option<TargetSurface> {
        self.ring.lock().free.pop_front()
    }

    fn wait_for_target(&self, timeout: Duration) -> bool {
        let state = self.ring.lock();
        let waited = self
            .ring
            .freed
            .wait_timeout_while(state, timeout, |s| s.free.is_empty());
        match waited {
            Ok((s, _)) => !s.free.is_empty(),
            Err(p) => !p.into_inner().0.free.is_empty(),
        }
    }

    fn completion_handler(&self, target: TargetSurface) -> CompletionHandler {
        let ring = Arc::clone(&self.ring);
        Box::new(move || {
            let mut s = ring.lock();
            if let Some(previous) = s.on_screen.replace(target) {
                s.free.push_back(previous);
                ring.freed.notify_all();
            }
            s.presents += 1;
        })
    }

    fn discard(&mut self, target: TargetSurface) {
        self.ring.lock().free.push_front(target);
        self.ring.freed.notify_all();
    }

    fn last_presented(&self) -> Option<TargetSurface> {
        self.ring.lock().on_screen
    }

    fn on_resize(&mut self, size: Extent) {
        self.presentable = size;
    }

    fn presentable_size(&self) -> Extent {
        self.presentable
    }
}

/// Visible part of a `working` surface on the provider's presentable surface.
pub fn viewport(working: Extent, provider: &dyn SurfaceProvider) -> TileRect {
    TileRect::clipped_viewport(working, provider.presentable_size())
}

#[cfg(test)]
#[path = "../tests/unit/surface.rs"]
mod tests;
