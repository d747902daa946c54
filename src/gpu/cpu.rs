//! Reference device: executes command buffers on CPU worker lanes.
//!
//! Each lane pulls whole submissions from a shared queue, so with more than one lane two frames
//! can execute at the same time. Resident images sit behind per-image locks that a pass acquires
//! in id order; concurrent frames that reuse the same intermediates interleave at pass
//! granularity instead of at byte granularity.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Condvar, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    thread::JoinHandle,
};

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::{
    blend::{blend_all, blend_region, copy_region},
    foundation::{
        error::{BlendError, BlendResult},
        image::ImageRGBA,
    },
    gpu::{
        command::{
            BlendPassDescriptor, Command, CommandBuffer, CompletionHandler, ComputeOp,
            ComputeScope, ImageDesc, ImageId, ImageRef, PipelineId, PipelineKind, RenderScope,
            StorageMode,
        },
        device::{DeviceOpts, DeviceStats, GpuDevice},
        event::SharedEvent,
    },
    layers::LayerStack,
};

/// CPU executor with `lanes` concurrent execution contexts.
pub struct CpuDevice {
    name: String,
    shared: Arc<Shared>,
    queue: Option<Sender<Submission>>,
    lanes: Vec<JoinHandle<()>>,
    pipelines: HashMap<PipelineId, PipelineKind>,
    next_image: u32,
    next_pipeline: u32,
    next_event: u32,
}

struct Submission {
    label: String,
    commands: Vec<Command>,
    completion: Vec<CompletionHandler>,
}

#[derive(Clone)]
struct Resident {
    desc: ImageDesc,
    // `None` for memoryless images: they only exist inside a render scope.
    pixels: Option<Arc<RwLock<ImageRGBA>>>,
}

// Memoryless attachments of the render scope currently executing.
type Transient = HashMap<ImageId, ImageRGBA>;

#[derive(Default)]
struct Shared {
    layers: RwLock<Vec<Arc<ImageRGBA>>>,
    images: RwLock<HashMap<ImageId, Resident>>,
    in_flight: Mutex<usize>,
    idle: Condvar,
    failure: Mutex<Option<BlendError>>,
    stats: Mutex<DeviceStats>,
}

enum Guard<'a> {
    Read(RwLockReadGuard<'a, ImageRGBA>),
    Write(RwLockWriteGuard<'a, ImageRGBA>),
}

impl CpuDevice {
    /// Spawn the execution lanes.
    pub fn new(opts: DeviceOpts) -> BlendResult<Self> {
        if opts.lanes == 0 {
            return Err(BlendError::init("cpu device needs at least one lane"));
        }
        let shared = Arc::new(Shared::default());
        let (tx, rx) = unbounded::<Submission>();
        let mut lanes = Vec::with_capacity(opts.lanes);
        for i in 0..opts.lanes {
            let shared = Arc::clone(&shared);
            let rx = rx.clone();
            let lane = std::thread::Builder::new()
                .name(format!("blendbench-lane-{i}"))
                .spawn(move || lane_loop(shared, rx))
                .map_err(|e| BlendError::init(format!("spawn cpu lane {i}: {e}")))?;
            lanes.push(lane);
        }
        Ok(Self {
            name: format!("cpu ({} lanes)", opts.lanes),
            shared,
            queue: Some(tx),
            lanes,
            pipelines: HashMap::new(),
            next_image: 0,
            next_pipeline: 0,
            next_event: 0,
        })
    }

    /// Number of execution lanes.
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }
}

impl GpuDevice for CpuDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn upload_layers(&mut self, layers: &LayerStack) -> BlendResult<()> {
        let mut slot = self.shared.layers.write().map_err(poisoned)?;
        *slot = layers.layers().to_vec();
        tracing::debug!(count = layers.len(), extent = %layers.extent(), "uploaded layers");
        Ok(())
    }

    fn create_image(&mut self, desc: ImageDesc, label: &str) -> BlendResult<ImageId> {
        if desc.extent.is_empty() {
            return Err(BlendError::init(format!(
                "image '{label}' has empty extent {}",
                desc.extent
            )));
        }
        let id = ImageId(self.next_image);
        self.next_image += 1;
        let pixels = match desc.storage {
            StorageMode::Private => Some(Arc::new(RwLock::new(ImageRGBA::transparent(
                desc.extent,
            )))),
            StorageMode::Memoryless => None,
        };
        self.shared
            .images
            .write()
            .map_err(poisoned)?
            .insert(id, Resident { desc, pixels });
        tracing::trace!(
            ?id,
            label,
            extent = %desc.extent,
            storage = ?desc.storage,
            "created image"
        );
        Ok(id)
    }

    fn release_image(&mut self, id: ImageId) -> BlendResult<()> {
        match self.shared.images.write().map_err(poisoned)?.remove(&id) {
            Some(_) => Ok(()),
            None => Err(BlendError::execution(format!("release of unknown image {id:?}"))),
        }
    }

    fn image_desc(&self, id: ImageId) -> Option<ImageDesc> {
        let images = self.shared.images.read().ok()?;
        images.get(&id).map(|r| r.desc)
    }

    fn create_pipeline(&mut self, kind: PipelineKind, label: &str) -> BlendResult<PipelineId> {
        let id = PipelineId(self.next_pipeline);
        self.next_pipeline += 1;
        self.pipelines.insert(id, kind);
        tracing::trace!(?id, ?kind, label, "created pipeline");
        Ok(id)
    }

    fn make_event(&mut self) -> BlendResult<SharedEvent> {
        let event = SharedEvent::new(self.next_event);
        self.next_event += 1;
        Ok(event)
    }

    fn submit(&mut self, buffer: CommandBuffer) -> BlendResult<()> {
        let Some(queue) = self.queue.as_ref() else {
            return Err(BlendError::execution("cpu device is shutting down"));
        };
        let (label, commands, completion) = buffer.into_parts();
        *self.shared.in_flight.lock().map_err(poisoned)? += 1;
        self.shared.bump(|s| s.submitted += 1);
        let sent = queue.send(Submission {
            label,
            commands,
            completion,
        });
        if sent.is_err() {
            self.shared.finish_one();
            return Err(BlendError::execution("cpu lanes have exited"));
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> BlendResult<()> {
        let in_flight = self.shared.in_flight.lock().map_err(poisoned)?;
        let _idle = self
            .shared
            .idle
            .wait_while(in_flight, |n| *n > 0)
            .map_err(poisoned)?;
        match self.shared.failure.lock().map_err(poisoned)?.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn poll(&mut self) -> BlendResult<()> {
        // Lanes run completion handlers themselves.
        Ok(())
    }

    fn read_image(&mut self, image: ImageRef) -> BlendResult<ImageRGBA> {
        match image {
            ImageRef::Layer(i) => {
                let layers = self.shared.layers.read().map_err(poisoned)?;
                layers
                    .get(i as usize)
                    .map(|l| l.as_ref().clone())
                    .ok_or_else(|| BlendError::execution(format!("layer {i} was not uploaded")))
            }
            ImageRef::Image(id) => {
                let resident = self.shared.resident(id)?;
                let Some(pixels) = resident.pixels else {
                    return Err(BlendError::execution(format!(
                        "memoryless image {id:?} has no contents outside a render scope"
                    )));
                };
                let img = pixels.read().map_err(poisoned)?;
                Ok(img.clone())
            }
        }
    }

    fn stats(&self) -> DeviceStats {
        match self.shared.stats.lock() {
            Ok(s) => s.clone(),
            Err(p) => p.into_inner().clone(),
        }
    }
}

impl Drop for CpuDevice {
    fn drop(&mut self) {
        // Closing the queue ends every lane loop once the backlog drains.
        self.queue.take();
        for lane in self.lanes.drain(..) {
            let _ = lane.join();
        }
    }
}

fn lane_loop(shared: Arc<Shared>, queue: Receiver<Submission>) {
    for submission in queue.iter() {
        shared.execute(submission);
    }
}

fn poisoned<T>(_: PoisonError<T>) -> BlendError {
    BlendError::execution("cpu device state lock poisoned")
}

impl Shared {
    fn execute(&self, submission: Submission) {
        let Submission {
            label,
            commands,
            completion,
        } = submission;
        let _span = tracing::debug_span!("execute", buffer = %label).entered();

        // Trailing signals publish after the completion handlers, so whoever waits on this
        // buffer also sees its handlers done.
        let tail = commands
            .iter()
            .rposition(|c| !matches!(c, Command::SignalEvent { .. }))
            .map_or(0, |i| i + 1);
        let (body, signals) = commands.split_at(tail);

        let mut failed = None;
        for cmd in body {
            if failed.is_some() {
                // Later frames may be waiting on this buffer's signals.
                if let Command::SignalEvent { event, value } = cmd {
                    let _ = event.signal(*value);
                }
                continue;
            }
            if let Err(err) = self.run_command(cmd) {
                tracing::warn!(buffer = %label, error = %err, "command buffer failed");
                failed = Some(err);
            }
        }

        for handler in completion {
            handler();
        }
        for cmd in signals {
            if let Err(err) = self.run_command(cmd) {
                failed.get_or_insert(err);
            }
        }
        if let Some(err) = failed {
            if let Ok(mut slot) = self.failure.lock() {
                slot.get_or_insert(err);
            }
        }
        self.bump(|s| s.completed += 1);
        self.finish_one();
    }

    fn finish_one(&self) {
        let mut in_flight = match self.in_flight.lock() {
            Ok(n) => n,
            Err(p) => p.into_inner(),
        };
        *in_flight = in_flight.saturating_sub(1);
        self.idle.notify_all();
    }

    fn bump(&self, f: impl FnOnce(&mut DeviceStats)) {
        match self.stats.lock() {
            Ok(mut s) => f(&mut s),
            Err(p) => f(&mut p.into_inner()),
        }
    }

    fn count_pass(&self, pipeline: PipelineId) {
        self.bump(|s| {
            s.passes += 1;
            *s.pipeline_binds.entry(pipeline).or_default() += 1;
        });
    }

    fn resident(&self, id: ImageId) -> BlendResult<Resident> {
        let images = self.images.read().map_err(poisoned)?;
        images
            .get(&id)
            .cloned()
            .ok_or_else(|| BlendError::execution(format!("unknown image {id:?}")))
    }

    fn run_command(&self, cmd: &Command) -> BlendResult<()> {
        match cmd {
            Command::WaitEvent { event, value } => event.wait_until(*value),
            Command::SignalEvent { event, value } => event.signal(*value),
            Command::Render(scope) => self.run_render(scope),
            Command::Compute(scope) => self.run_compute(scope),
            Command::Copy { src, dst } => {
                self.with_pass_images(&[*src], *dst, &mut Transient::new(), |srcs, dst| {
                    let src = srcs[0];
                    if src.extent() != dst.extent() {
                        return Err(BlendError::execution(format!(
                            "copy between {} and {}",
                            src.extent(),
                            dst.extent()
                        )));
                    }
                    copy_region(src, src.extent().rect(), dst, (0, 0))
                })?;
                self.bump(|s| s.copies += 1);
                Ok(())
            }
            Command::Present { image, .. } => {
                if let ImageRef::Image(id) = image {
                    self.resident(*id)?;
                }
                self.bump(|s| s.presents += 1);
                Ok(())
            }
        }
    }

    fn run_render(&self, scope: &RenderScope) -> BlendResult<()> {
        let mut transient = Transient::new();
        for attachment in &scope.attachments {
            if let ImageRef::Image(id) = attachment {
                let resident = self.resident(*id)?;
                if resident.desc.storage == StorageMode::Memoryless {
                    transient.insert(*id, ImageRGBA::transparent(resident.desc.extent));
                }
            }
        }
        for draw in &scope.draws {
            self.run_blend(draw, &mut transient)?;
        }
        tracing::trace!(scope = %scope.label, draws = scope.draws.len(), "render scope done");
        self.bump(|s| s.render_scopes += 1);
        Ok(())
    }

    fn run_compute(&self, scope: &ComputeScope) -> BlendResult<()> {
        let mut transient = Transient::new();
        for op in &scope.ops {
            match op {
                ComputeOp::Blend(desc) => self.run_blend(desc, &mut transient)?,
                ComputeOp::Aggregate {
                    layers,
                    dst,
                    pipeline,
                } => {
                    self.with_pass_images(layers, *dst, &mut transient, |srcs, dst| {
                        blend_all(srcs, dst)
                    })?;
                    self.count_pass(pipeline.id);
                }
            }
        }
        tracing::trace!(scope = %scope.label, ops = scope.ops.len(), "compute scope done");
        self.bump(|s| s.compute_scopes += 1);
        Ok(())
    }

    fn run_blend(&self, desc: &BlendPassDescriptor, transient: &mut Transient) -> BlendResult<()> {
        self.with_pass_images(&[desc.src1, desc.src2], desc.dst, transient, |srcs, dst| {
            let region = desc.region(srcs[0].extent(), srcs[1].extent(), dst.extent())?;
            blend_region(srcs[0], srcs[1], dst, &region)
        })?;
        self.count_pass(desc.pipeline.id);
        Ok(())
    }

    /// Resolve the images of one pass and run `pass` with the sources borrowed and the
    /// destination borrowed mutably. Resident images are locked in id order.
    fn with_pass_images<T>(
        &self,
        srcs: &[ImageRef],
        dst: ImageRef,
        transient: &mut Transient,
        pass: impl FnOnce(&[&ImageRGBA], &mut ImageRGBA) -> BlendResult<T>,
    ) -> BlendResult<T> {
        let Some(dst_id) = dst.image_id() else {
            return Err(BlendError::execution(format!(
                "layer {dst:?} used as a destination"
            )));
        };

        let mut resident = BTreeMap::new();
        for r in srcs.iter().chain(std::iter::once(&dst)) {
            let ImageRef::Image(id) = *r else { continue };
            if transient.contains_key(&id) || resident.contains_key(&id) {
                continue;
            }
            match self.resident(id)?.pixels {
                Some(pixels) => {
                    resident.insert(id, pixels);
                }
                None => {
                    return Err(BlendError::execution(format!(
                        "memoryless image {id:?} used outside its render scope"
                    )));
                }
            }
        }

        let layers = self.layers.read().map_err(poisoned)?;
        let mut guards = BTreeMap::new();
        for (id, lock) in &resident {
            let guard = if *id == dst_id {
                Guard::Write(lock.write().map_err(poisoned)?)
            } else {
                Guard::Read(lock.read().map_err(poisoned)?)
            };
            guards.insert(*id, guard);
        }

        let mut dst_transient = transient.remove(&dst_id);
        let mut dst_guard = guards.remove(&dst_id);
        let dst_img: &mut ImageRGBA = match (&mut dst_transient, &mut dst_guard) {
            (Some(img), _) => img,
            (None, Some(Guard::Write(guard))) => &mut **guard,
            _ => {
                return Err(BlendError::execution(format!(
                    "destination {dst:?} is not writable"
                )));
            }
        };

        let mut src_imgs: Vec<&ImageRGBA> = Vec::with_capacity(srcs.len());
        for r in srcs {
            let img = match *r {
                ImageRef::Layer(i) => layers.get(i as usize).map(|l| l.as_ref()).ok_or_else(
                    || BlendError::execution(format!("layer {i} was not uploaded")),
                )?,
                ImageRef::Image(id) => match (transient.get(&id), guards.get(&id)) {
                    (Some(img), _) => img,
                    (None, Some(Guard::Read(guard))) => &**guard,
                    _ => {
                        return Err(BlendError::execution(format!(
                            "source {r:?} is not readable"
                        )));
                    }
                },
            };
            src_imgs.push(img);
        }

        let out = pass(&src_imgs, dst_img);
        drop(src_imgs);
        if let Some(img) = dst_transient {
            transient.insert(dst_id, img);
        }
        out
    }
}

#[cfg(test)]
#[path = "../../tests/unit/gpu/cpu.rs"]
mod tests;
