use crate::{
    blend::BlendRegion,
    foundation::{
        core::{Extent, TileGrid, TileRect},
        error::{BlendError, BlendResult},
    },
    gpu::event::SharedEvent,
};

/// Handle of a device-owned image (intermediate or target surface).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageId(pub u32);

/// Anything a pass can read from or write to.
///
/// Layers are read-only; only [`ImageRef::Image`] may be a destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ImageRef {
    /// Input layer by stack index.
    Layer(u32),
    /// Device image.
    Image(ImageId),
}

impl ImageRef {
    /// The device image behind this reference, if any.
    pub fn image_id(self) -> Option<ImageId> {
        match self {
            ImageRef::Layer(_) => None,
            ImageRef::Image(id) => Some(id),
        }
    }
}

impl From<ImageId> for ImageRef {
    fn from(id: ImageId) -> Self {
        ImageRef::Image(id)
    }
}

/// Index of a target surface in the presentation ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u32);

/// Where an image's contents live.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageMode {
    /// Resident device memory, persistent across submissions.
    Private,
    /// Tile memory: contents exist only inside the render scope that attaches the image.
    Memoryless,
}

/// Creation parameters for a device image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageDesc {
    /// Pixel size.
    pub extent: Extent,
    /// Residency.
    pub storage: StorageMode,
}

impl ImageDesc {
    /// A resident image.
    pub fn private(extent: Extent) -> Self {
        Self {
            extent,
            storage: StorageMode::Private,
        }
    }

    /// A tile-memory image.
    pub fn memoryless(extent: Extent) -> Self {
        Self {
            extent,
            storage: StorageMode::Memoryless,
        }
    }

    /// Bytes of device memory the image occupies outside a render scope.
    pub fn resident_bytes(self) -> usize {
        match self.storage {
            StorageMode::Private => self.extent.byte_len(),
            StorageMode::Memoryless => 0,
        }
    }
}

/// What a pipeline object computes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    /// Fragment blend drawn into a render attachment.
    RenderBlend,
    /// Compute blend over one tile.
    ComputeBlend,
    /// Compute fold over every layer at once.
    ComputeAggregate,
}

/// Device handle of a compiled pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PipelineId(pub u32);

/// One entry of a pipeline pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineVariant {
    /// Device handle.
    pub id: PipelineId,
    /// What the pipeline computes.
    pub kind: PipelineKind,
    /// Position inside the owning pool.
    pub slot: u32,
}

/// One pairwise blend: `dst[dst_tile] = blend(src1[src1_tile], src2[src2_tile])`.
///
/// A tile index addresses a whole image when the image is exactly one tile large, and the
/// grid rectangle `i` when the image covers the full grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlendPassDescriptor {
    /// Bottom operand.
    pub src1: ImageRef,
    /// Top operand.
    pub src2: ImageRef,
    /// Destination, never a layer and never one of the sources.
    pub dst: ImageRef,
    /// Tile read from `src1`.
    pub src1_tile: u32,
    /// Tile read from `src2`.
    pub src2_tile: u32,
    /// Tile written in `dst`.
    pub dst_tile: u32,
    /// Size of one tile.
    pub tile_extent: Extent,
    /// Grid the tile indices refer to.
    pub grid: TileGrid,
    /// Pipeline bound for the pass.
    pub pipeline: PipelineVariant,
}

impl BlendPassDescriptor {
    /// An untiled pass covering the whole working surface.
    pub fn full(
        src1: ImageRef,
        src2: ImageRef,
        dst: ImageRef,
        working: Extent,
        pipeline: PipelineVariant,
    ) -> Self {
        Self {
            src1,
            src2,
            dst,
            src1_tile: 0,
            src2_tile: 0,
            dst_tile: 0,
            tile_extent: working,
            grid: TileGrid::WHOLE,
            pipeline,
        }
    }

    /// Check the descriptor against the working surface it is encoded for.
    pub fn validate(&self, working: Extent) -> BlendResult<()> {
        let count = self.grid.count();
        for (name, tile) in [
            ("src1", self.src1_tile),
            ("src2", self.src2_tile),
            ("dst", self.dst_tile),
        ] {
            if tile >= count {
                return Err(BlendError::encoding(format!(
                    "{name} tile {tile} out of range for {count} tiles"
                )));
            }
        }
        if self.grid.tile_extent(working)? != self.tile_extent {
            return Err(BlendError::encoding(format!(
                "tile extent {} x grid {}x{} does not partition working surface {working}",
                self.tile_extent, self.grid.columns, self.grid.rows
            )));
        }
        if matches!(self.dst, ImageRef::Layer(_)) {
            return Err(BlendError::encoding(format!(
                "layer {:?} cannot be a blend destination",
                self.dst
            )));
        }
        if self.src1 == self.dst || self.src2 == self.dst {
            return Err(BlendError::encoding(format!(
                "blend pass reads and writes {:?}",
                self.dst
            )));
        }
        Ok(())
    }

    /// Pixel region of the pass, given the extents of the three images it touches.
    pub fn region(&self, src1: Extent, src2: Extent, dst: Extent) -> BlendResult<BlendRegion> {
        Ok(BlendRegion {
            src1_origin: self.tile_origin_in(src1, self.src1_tile)?,
            src2_origin: self.tile_origin_in(src2, self.src2_tile)?,
            dst_origin: self.tile_origin_in(dst, self.dst_tile)?,
            extent: self.tile_extent,
        })
    }

    fn tile_origin_in(&self, image: Extent, index: u32) -> BlendResult<(u32, u32)> {
        if image == self.tile_extent {
            return Ok((0, 0));
        }
        let full = Extent::new(
            self.tile_extent.width * self.grid.columns,
            self.tile_extent.height * self.grid.rows,
        );
        if image == full {
            return Ok(self.grid.tile_origin(index, self.tile_extent));
        }
        Err(BlendError::encoding(format!(
            "image {image} is neither one tile ({}) nor the full grid ({full})",
            self.tile_extent
        )))
    }
}

/// Commands recorded inside a render scope.
#[derive(Clone, Debug)]
pub struct RenderScope {
    /// Debug label.
    pub label: String,
    /// Images the scope may write.
    pub attachments: Vec<ImageRef>,
    /// Draws in encode order.
    pub draws: Vec<BlendPassDescriptor>,
}

/// One unit of compute work.
#[derive(Clone, Debug)]
pub enum ComputeOp {
    /// Pairwise blend.
    Blend(BlendPassDescriptor),
    /// Fold of every listed layer into `dst`, bottom first.
    Aggregate {
        /// Layers in stack order.
        layers: Vec<ImageRef>,
        /// Destination image.
        dst: ImageRef,
        /// Pipeline bound for the dispatch.
        pipeline: PipelineVariant,
    },
}

/// Commands recorded inside a compute scope.
#[derive(Clone, Debug)]
pub struct ComputeScope {
    /// Debug label.
    pub label: String,
    /// Dispatches in encode order.
    pub ops: Vec<ComputeOp>,
}

/// A recorded command.
#[derive(Clone, Debug)]
pub enum Command {
    /// Block execution of the rest of the buffer until `event` reaches `value`.
    WaitEvent {
        /// Timeline event.
        event: SharedEvent,
        /// Value to wait for.
        value: u64,
    },
    /// Set `event` to `value` once everything before has executed.
    SignalEvent {
        /// Timeline event.
        event: SharedEvent,
        /// Value to publish.
        value: u64,
    },
    /// A render scope.
    Render(RenderScope),
    /// A compute scope.
    Compute(ComputeScope),
    /// Whole-image copy; extents must match.
    Copy {
        /// Source image.
        src: ImageRef,
        /// Destination image.
        dst: ImageRef,
    },
    /// Hand `image` to the presentation surface.
    Present {
        /// Target surface.
        surface: SurfaceId,
        /// Image being presented.
        image: ImageRef,
        /// Visible part of the working surface.
        viewport: TileRect,
    },
}

/// Callback run by the device after a buffer has fully executed.
pub type CompletionHandler = Box<dyn FnOnce() + Send + 'static>;

/// Per-buffer encode counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncodeStats {
    /// Render scopes.
    pub render_scopes: usize,
    /// Compute scopes.
    pub compute_scopes: usize,
    /// Render draws.
    pub draws: usize,
    /// Pairwise compute dispatches.
    pub dispatches: usize,
    /// Aggregate compute dispatches.
    pub aggregate_dispatches: usize,
    /// Image copies.
    pub copies: usize,
    /// Event waits.
    pub waits: usize,
    /// Event signals.
    pub signals: usize,
    /// Presents.
    pub presents: usize,
}

impl EncodeStats {
    /// Units of blend work: draws plus dispatches of either kind.
    pub fn passes(&self) -> usize {
        self.draws + self.dispatches + self.aggregate_dispatches
    }

    /// Render and compute scopes together.
    pub fn scopes(&self) -> usize {
        self.render_scopes + self.compute_scopes
    }
}

/// An ordered list of commands plus completion callbacks, submitted as one unit.
pub struct CommandBuffer {
    label: String,
    working: Extent,
    commands: Vec<Command>,
    completion: Vec<CompletionHandler>,
}

impl CommandBuffer {
    /// An empty buffer encoding against a `working` sized surface.
    pub fn new(label: impl Into<String>, working: Extent) -> Self {
        Self {
            label: label.into(),
            working,
            commands: Vec::new(),
            completion: Vec::new(),
        }
    }

    /// Debug label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Working surface passes are validated against.
    pub fn working(&self) -> Extent {
        self.working
    }

    /// Recorded commands.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Make the device wait until `event` reaches `value` before running later commands.
    pub fn encode_wait_for_event(&mut self, event: &SharedEvent, value: u64) {
        self.commands.push(Command::WaitEvent {
            event: event.clone(),
            value,
        });
    }

    /// Make the device set `event` to `value` after running earlier commands.
    pub fn encode_signal_event(&mut self, event: &SharedEvent, value: u64) {
        self.commands.push(Command::SignalEvent {
            event: event.clone(),
            value,
        });
    }

    /// Record a render scope writing `attachments`.
    ///
    /// The scope is only appended when `encode` succeeds.
    pub fn encode_render<T>(
        &mut self,
        label: &str,
        attachments: &[ImageRef],
        encode: impl FnOnce(&mut RenderEncoder) -> BlendResult<T>,
    ) -> BlendResult<T> {
        for (i, a) in attachments.iter().enumerate() {
            if matches!(a, ImageRef::Layer(_)) {
                return Err(BlendError::encoding(format!(
                    "render scope '{label}' cannot attach layer {a:?}"
                )));
            }
            if attachments[..i].contains(a) {
                return Err(BlendError::encoding(format!(
                    "render scope '{label}' attaches {a:?} twice"
                )));
            }
        }
        let mut encoder = RenderEncoder {
            working: self.working,
            scope: RenderScope {
                label: label.to_owned(),
                attachments: attachments.to_vec(),
                draws: Vec::new(),
            },
        };
        let out = encode(&mut encoder)?;
        self.commands.push(Command::Render(encoder.scope));
        Ok(out)
    }

    /// Record a compute scope.
    ///
    /// The scope is only appended when `encode` succeeds.
    pub fn encode_compute<T>(
        &mut self,
        label: &str,
        encode: impl FnOnce(&mut ComputeEncoder) -> BlendResult<T>,
    ) -> BlendResult<T> {
        let mut encoder = ComputeEncoder {
            working: self.working,
            scope: ComputeScope {
                label: label.to_owned(),
                ops: Vec::new(),
            },
        };
        let out = encode(&mut encoder)?;
        self.commands.push(Command::Compute(encoder.scope));
        Ok(out)
    }

    /// Record a whole-image copy.
    pub fn encode_copy(&mut self, src: ImageRef, dst: ImageRef) -> BlendResult<()> {
        if matches!(dst, ImageRef::Layer(_)) {
            return Err(BlendError::encoding("cannot copy into a layer"));
        }
        if src == dst {
            return Err(BlendError::encoding(format!("copy from {src:?} onto itself")));
        }
        self.commands.push(Command::Copy { src, dst });
        Ok(())
    }

    /// Record a present of `image` on `surface`.
    pub fn present(&mut self, surface: SurfaceId, image: ImageRef, viewport: TileRect) {
        self.commands.push(Command::Present {
            surface,
            image,
            viewport,
        });
    }

    /// Register a callback to run once the device has executed the whole buffer.
    pub fn on_completed(&mut self, handler: impl FnOnce() + Send + 'static) {
        self.completion.push(Box::new(handler));
    }

    /// Count what has been recorded so far.
    pub fn stats(&self) -> EncodeStats {
        let mut stats = EncodeStats::default();
        for cmd in &self.commands {
            match cmd {
                Command::WaitEvent { .. } => stats.waits += 1,
                Command::SignalEvent { .. } => stats.signals += 1,
                Command::Render(scope) => {
                    stats.render_scopes += 1;
                    stats.draws += scope.draws.len();
                }
                Command::Compute(scope) => {
                    stats.compute_scopes += 1;
                    for op in &scope.ops {
                        match op {
                            ComputeOp::Blend(_) => stats.dispatches += 1,
                            ComputeOp::Aggregate { .. } => stats.aggregate_dispatches += 1,
                        }
                    }
                }
                Command::Copy { .. } => stats.copies += 1,
                Command::Present { .. } => stats.presents += 1,
            }
        }
        stats
    }

    /// Split into the pieces a device executes.
    pub fn into_parts(self) -> (String, Vec<Command>, Vec<CompletionHandler>) {
        (self.label, self.commands, self.completion)
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("label", &self.label)
            .field("working", &self.working)
            .field("commands", &self.commands.len())
            .field("completion_handlers", &self.completion.len())
            .finish()
    }
}

/// Encoder handed to [`CommandBuffer::encode_render`].
#[derive(Debug)]
pub struct RenderEncoder {
    working: Extent,
    scope: RenderScope,
}

impl RenderEncoder {
    /// Draw one blend into an attachment of this scope.
    pub fn draw_blend(&mut self, desc: BlendPassDescriptor) -> BlendResult<()> {
        if desc.pipeline.kind != PipelineKind::RenderBlend {
            return Err(BlendError::encoding(format!(
                "render scope '{}' cannot bind {:?} pipeline",
                self.scope.label, desc.pipeline.kind
            )));
        }
        desc.validate(self.working)?;
        if !self.scope.attachments.contains(&desc.dst) {
            return Err(BlendError::encoding(format!(
                "draw destination {:?} is not attached to render scope '{}'",
                desc.dst, self.scope.label
            )));
        }
        self.scope.draws.push(desc);
        Ok(())
    }

    /// Draws recorded so far in this scope.
    pub fn draw_count(&self) -> usize {
        self.scope.draws.len()
    }
}

/// Encoder handed to [`CommandBuffer::encode_compute`].
#[derive(Debug)]
pub struct ComputeEncoder {
    working: Extent,
    scope: ComputeScope,
}

impl ComputeEncoder {
    /// Dispatch one pairwise blend.
    pub fn dispatch_blend(&mut self, desc: BlendPassDescriptor) -> BlendResult<()> {
        if desc.pipeline.kind != PipelineKind::ComputeBlend {
            return Err(BlendError::encoding(format!(
                "blend dispatch cannot bind {:?} pipeline",
                desc.pipeline.kind
            )));
        }
        desc.validate(self.working)?;
        self.scope.ops.push(ComputeOp::Blend(desc));
        Ok(())
    }

    /// Dispatch a single fold over `layers` into `dst`.
    pub fn dispatch_aggregate(
        &mut self,
        layers: Vec<ImageRef>,
        dst: ImageRef,
        pipeline: PipelineVariant,
    ) -> BlendResult<()> {
        if pipeline.kind != PipelineKind::ComputeAggregate {
            return Err(BlendError::encoding(format!(
                "aggregate dispatch cannot bind {:?} pipeline",
                pipeline.kind
            )));
        }
        if layers.is_empty() {
            return Err(BlendError::encoding("aggregate dispatch needs at least one layer"));
        }
        if let Some(bad) = layers.iter().find(|l| !matches!(l, ImageRef::Layer(_))) {
            return Err(BlendError::encoding(format!(
                "aggregate dispatch reads layers only, got {bad:?}"
            )));
        }
        if matches!(dst, ImageRef::Layer(_)) {
            return Err(BlendError::encoding("aggregate dispatch cannot write a layer"));
        }
        self.scope.ops.push(ComputeOp::Aggregate {
            layers,
            dst,
            pipeline,
        });
        Ok(())
    }

    /// Dispatches recorded so far in this scope.
    pub fn dispatch_count(&self) -> usize {
        self.scope.ops.len()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/gpu/command.rs"]
mod tests;
