//! wgpu device.
//!
//! Layers live in one `Rgba8Unorm` array texture, intermediates in plain 2D textures. Both the
//! render and the compute kernels convert texels back to bytes and apply the same integer
//! source-over as [`crate::blend::over`], so results are bit-identical to the CPU device.
//!
//! Lowering notes:
//! - A render scope becomes one wgpu render pass per draw. wgpu forbids sampling a texture that
//!   is attached in the same pass, and fused scopes ping-pong between their attachments.
//! - A compute scope becomes one compute pass; wgpu synchronizes between its dispatches.
//! - Memoryless images are ordinary textures cleared at the start of every render scope that
//!   attaches them, and rejected everywhere else.
//! - There is a single queue, so a wait on a value signalled by an earlier submission is
//!   satisfied by submission order. A wait that nothing signals fails the buffer.
//! - Counters other than `completed` are taken when a buffer is encoded, not when it finishes.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use wgpu::util::DeviceExt as _;

use crate::{
    foundation::{
        core::Extent,
        error::{BlendError, BlendResult},
        image::ImageRGBA,
    },
    gpu::{
        command::{
            BlendPassDescriptor, Command, CommandBuffer, ComputeOp, ComputeScope, ImageDesc,
            ImageId, ImageRef, PipelineId, PipelineKind, RenderScope, StorageMode,
        },
        device::{DeviceOpts, DeviceStats, GpuDevice},
        event::SharedEvent,
    },
    layers::LayerStack,
};

const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const WORKGROUP: u32 = 8;

const BLEND_MATH: &str = r#"
fn to_bytes(c: vec4<f32>) -> vec4<u32> {
  return vec4<u32>(round(clamp(c, vec4<f32>(0.0), vec4<f32>(1.0)) * 255.0));
}

fn over(bottom: vec4<u32>, top: vec4<u32>) -> vec4<u32> {
  let inv = 255u - top.w;
  return min(top + (bottom * inv + vec4<u32>(127u)) / 255u, vec4<u32>(255u));
}
"#;

const PAIR_BINDINGS: &str = r#"
struct Params {
  src1_origin: vec2<u32>,
  src2_origin: vec2<u32>,
  dst_origin: vec2<u32>,
  extent: vec2<u32>,
};

@group(0) @binding(0) var t_src1: texture_2d<f32>;
@group(0) @binding(1) var t_src2: texture_2d<f32>;
@group(0) @binding(2) var<uniform> params: Params;

fn blend_at(p: vec2<u32>) -> vec4<f32> {
  let bottom = to_bytes(textureLoad(t_src1, params.src1_origin + p, 0));
  let top = to_bytes(textureLoad(t_src2, params.src2_origin + p, 0));
  return vec4<f32>(over(bottom, top)) / 255.0;
}
"#;

const RENDER_ENTRY: &str = r#"
struct VsOut {
  @builtin(position) pos: vec4<f32>,
};

@vertex
fn vs(@builtin(vertex_index) vi: u32) -> VsOut {
  var p = array<vec2<f32>, 3>(
    vec2<f32>(-1.0, -1.0),
    vec2<f32>( 3.0, -1.0),
    vec2<f32>(-1.0,  3.0),
  );
  var o: VsOut;
  o.pos = vec4<f32>(p[vi], 0.0, 1.0);
  return o;
}

@fragment
fn fs(in: VsOut) -> @location(0) vec4<f32> {
  let p = vec2<u32>(in.pos.xy) - params.dst_origin;
  return blend_at(p);
}
"#;

const COMPUTE_ENTRY: &str = r#"
@group(0) @binding(3) var t_dst: texture_storage_2d<rgba8unorm, write>;

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
  let p = gid.xy;
  if (p.x >= params.extent.x || p.y >= params.extent.y) {
    return;
  }
  textureStore(t_dst, params.dst_origin + p, blend_at(p));
}
"#;

const AGGREGATE_ENTRY: &str = r#"
struct AggParams {
  extent: vec2<u32>,
  count: u32,
  _pad: u32,
};

@group(0) @binding(0) var t_layers: texture_2d_array<f32>;
@group(0) @binding(1) var<storage, read> order: array<u32>;
@group(0) @binding(2) var<uniform> params: AggParams;
@group(0) @binding(3) var t_dst: texture_storage_2d<rgba8unorm, write>;

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
  let p = gid.xy;
  if (p.x >= params.extent.x || p.y >= params.extent.y) {
    return;
  }
  var acc = to_bytes(textureLoad(t_layers, p, order[0], 0));
  for (var i = 1u; i < params.count; i = i + 1u) {
    acc = over(acc, to_bytes(textureLoad(t_layers, p, order[i], 0)));
  }
  textureStore(t_dst, p, vec4<f32>(acc) / 255.0);
}
"#;

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct PairParams {
    src1_origin: [u32; 2],
    src2_origin: [u32; 2],
    dst_origin: [u32; 2],
    extent: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct AggregateParams {
    extent: [u32; 2],
    count: u32,
    _pad: u32,
}

struct Kernels {
    render_module: wgpu::ShaderModule,
    compute_module: wgpu::ShaderModule,
    aggregate_module: wgpu::ShaderModule,
    render_bgl: wgpu::BindGroupLayout,
    compute_bgl: wgpu::BindGroupLayout,
    aggregate_bgl: wgpu::BindGroupLayout,
    render_layout: wgpu::PipelineLayout,
    compute_layout: wgpu::PipelineLayout,
    aggregate_layout: wgpu::PipelineLayout,
}

enum Pipeline {
    Render(wgpu::RenderPipeline),
    Compute(wgpu::ComputePipeline),
}

struct GpuImage {
    desc: ImageDesc,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct LayerArray {
    extent: Extent,
    texture: wgpu::Texture,
    array_view: wgpu::TextureView,
    views: Vec<wgpu::TextureView>,
    host: Vec<Arc<ImageRGBA>>,
}

/// A sampled source of one pass.
struct Source<'a> {
    view: &'a wgpu::TextureView,
    extent: Extent,
}

#[derive(Default)]
struct Tracker {
    in_flight: Mutex<usize>,
    stats: Mutex<DeviceStats>,
}

impl Tracker {
    fn bump(&self, f: impl FnOnce(&mut DeviceStats)) {
        match self.stats.lock() {
            Ok(mut s) => f(&mut s),
            Err(p) => f(&mut p.into_inner()),
        }
    }

    fn finish_one(&self) {
        let mut n = match self.in_flight.lock() {
            Ok(n) => n,
            Err(p) => p.into_inner(),
        };
        *n = n.saturating_sub(1);
    }
}

/// Executes command buffers on a wgpu device and queue.
pub struct WgpuDevice {
    name: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
    kernels: Kernels,
    pipelines: HashMap<PipelineId, Pipeline>,
    layers: Option<LayerArray>,
    images: HashMap<ImageId, GpuImage>,
    // Highest value each event is scheduled to reach, by event id.
    scheduled: HashMap<u32, u64>,
    tracker: Arc<Tracker>,
    failure: Option<BlendError>,
    next_image: u32,
    next_pipeline: u32,
    next_event: u32,
}

impl WgpuDevice {
    /// Open the default high-performance adapter. Fails with [`BlendError::Init`] when no
    /// adapter is available.
    pub fn new(_opts: DeviceOpts) -> BlendResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| match e {
            wgpu::RequestAdapterError::NotFound { .. } => {
                BlendError::init("no gpu adapter available")
            }
            other => BlendError::init(format!("wgpu request_adapter failed: {other:?}")),
        })?;
        let info = adapter.get_info();

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("blendbench"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| BlendError::init(format!("wgpu request_device failed: {e:?}")))?;

        let kernels = Kernels::new(&device);
        tracing::info!(adapter = %info.name, backend = ?info.backend, "opened wgpu device");
        Ok(Self {
            name: format!("wgpu ({}, {:?})", info.name, info.backend),
            device,
            queue,
            kernels,
            pipelines: HashMap::new(),
            layers: None,
            images: HashMap::new(),
            scheduled: HashMap::new(),
            tracker: Arc::new(Tracker::default()),
            failure: None,
            next_image: 0,
            next_pipeline: 0,
            next_event: 0,
        })
    }

    fn image(&self, id: ImageId) -> BlendResult<&GpuImage> {
        self.images
            .get(&id)
            .ok_or_else(|| BlendError::execution(format!("unknown image {id:?}")))
    }

    fn layer_array(&self) -> BlendResult<&LayerArray> {
        self.layers
            .as_ref()
            .ok_or_else(|| BlendError::execution("no layers were uploaded"))
    }

    fn source(&self, r: ImageRef, scope: &[ImageRef]) -> BlendResult<Source<'_>> {
        match r {
            ImageRef::Layer(i) => {
                let layers = self.layer_array()?;
                let view = layers
                    .views
                    .get(i as usize)
                    .ok_or_else(|| BlendError::execution(format!("layer {i} was not uploaded")))?;
                Ok(Source {
                    view,
                    extent: layers.extent,
                })
            }
            ImageRef::Image(id) => {
                let img = self.usable(id, scope)?;
                Ok(Source {
                    view: &img.view,
                    extent: img.desc.extent,
                })
            }
        }
    }

    /// A live image, rejecting memoryless images that `scope` does not attach.
    fn usable(&self, id: ImageId, scope: &[ImageRef]) -> BlendResult<&GpuImage> {
        let img = self.image(id)?;
        if img.desc.storage == StorageMode::Memoryless && !scope.contains(&ImageRef::Image(id)) {
            return Err(BlendError::execution(format!(
                "memoryless image {id:?} used outside its render scope"
            )));
        }
        Ok(img)
    }

    fn destination(&self, r: ImageRef, scope: &[ImageRef]) -> BlendResult<&GpuImage> {
        match r {
            ImageRef::Image(id) => self.usable(id, scope),
            ImageRef::Layer(_) => Err(BlendError::execution(format!(
                "layer {r:?} used as a destination"
            ))),
        }
    }

    fn bind(&self, pipeline: PipelineId) {
        self.tracker.bump(|s| {
            s.passes += 1;
            *s.pipeline_binds.entry(pipeline).or_default() += 1;
        });
    }

    fn pair_params(
        &self,
        desc: &BlendPassDescriptor,
        src1: &Source<'_>,
        src2: &Source<'_>,
        dst: Extent,
    ) -> BlendResult<(wgpu::Buffer, crate::blend::BlendRegion)> {
        let region = desc.region(src1.extent, src2.extent, dst)?;
        for (name, origin, extent) in [
            ("src1", region.src1_origin, src1.extent),
            ("src2", region.src2_origin, src2.extent),
            ("dst", region.dst_origin, dst),
        ] {
            if origin.0 + region.extent.width > extent.width
                || origin.1 + region.extent.height > extent.height
            {
                return Err(BlendError::execution(format!(
                    "{name} region at {origin:?} of {} exceeds {extent}",
                    region.extent
                )));
            }
        }
        let params = PairParams {
            src1_origin: [region.src1_origin.0, region.src1_origin.1],
            src2_origin: [region.src2_origin.0, region.src2_origin.1],
            dst_origin: [region.dst_origin.0, region.dst_origin.1],
            extent: [region.extent.width, region.extent.height],
        };
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("blendbench_pair_params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        Ok((buffer, region))
    }

    fn encode_render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        scope: &RenderScope,
    ) -> BlendResult<()> {
        for attachment in &scope.attachments {
            let img = self.destination(*attachment, &scope.attachments)?;
            if img.desc.storage == StorageMode::Memoryless {
                let _clear = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("blendbench_memoryless_clear"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &img.view,
                        resolve_target: None,
                        depth_slice: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
            }
        }

        for draw in &scope.draws {
            let Some(Pipeline::Render(pipeline)) = self.pipelines.get(&draw.pipeline.id) else {
                return Err(BlendError::execution(format!(
                    "pipeline {:?} is not a render pipeline",
                    draw.pipeline.id
                )));
            };
            let src1 = self.source(draw.src1, &scope.attachments)?;
            let src2 = self.source(draw.src2, &scope.attachments)?;
            let dst = self.destination(draw.dst, &scope.attachments)?;
            let (params, region) = self.pair_params(draw, &src1, &src2, dst.desc.extent)?;

            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("blendbench_render_bg"),
                layout: &self.kernels.render_bgl,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(src1.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(src2.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: params.as_entire_binding(),
                    },
                ],
            });

            let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(scope.label.as_str()),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &dst.view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            let (x, y) = region.dst_origin;
            let Extent { width, height } = region.extent;
            rp.set_pipeline(pipeline);
            rp.set_bind_group(0, &bind_group, &[]);
            rp.set_viewport(x as f32, y as f32, width as f32, height as f32, 0.0, 1.0);
            rp.set_scissor_rect(x, y, width, height);
            rp.draw(0..3, 0..1);
            drop(rp);
            self.bind(draw.pipeline.id);
        }
        self.tracker.bump(|s| s.render_scopes += 1);
        Ok(())
    }

    fn encode_compute(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        scope: &ComputeScope,
    ) -> BlendResult<()> {
        // Resolve every op before opening the pass so a failure leaves the encoder clean.
        let mut prepared = Vec::with_capacity(scope.ops.len());
        for op in &scope.ops {
            prepared.push(self.prepare_op(op)?);
        }

        let mut cp = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(scope.label.as_str()),
            timestamp_writes: None,
        });
        for (pipeline, id, bind_group, extent) in &prepared {
            cp.set_pipeline(pipeline);
            cp.set_bind_group(0, bind_group, &[]);
            cp.dispatch_workgroups(
                extent.width.div_ceil(WORKGROUP),
                extent.height.div_ceil(WORKGROUP),
                1,
            );
            self.bind(*id);
        }
        drop(cp);
        self.tracker.bump(|s| s.compute_scopes += 1);
        Ok(())
    }

    fn prepare_op(
        &self,
        op: &ComputeOp,
    ) -> BlendResult<(&wgpu::ComputePipeline, PipelineId, wgpu::BindGroup, Extent)> {
        let pipeline_id = match op {
            ComputeOp::Blend(desc) => desc.pipeline.id,
            ComputeOp::Aggregate { pipeline, .. } => pipeline.id,
        };
        let Some(Pipeline::Compute(pipeline)) = self.pipelines.get(&pipeline_id) else {
            return Err(BlendError::execution(format!(
                "pipeline {pipeline_id:?} is not a compute pipeline"
            )));
        };

        match op {
            ComputeOp::Blend(desc) => {
                let src1 = self.source(desc.src1, &[])?;
                let src2 = self.source(desc.src2, &[])?;
                let dst = self.destination(desc.dst, &[])?;
                let (params, region) = self.pair_params(desc, &src1, &src2, dst.desc.extent)?;
                let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("blendbench_compute_bg"),
                    layout: &self.kernels.compute_bgl,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(src1.view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(src2.view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: params.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: wgpu::BindingResource::TextureView(&dst.view),
                        },
                    ],
                });
                Ok((pipeline, pipeline_id, bind_group, region.extent))
            }
            ComputeOp::Aggregate { layers, dst, .. } => {
                let array = self.layer_array()?;
                let dst = self.destination(*dst, &[])?;
                if dst.desc.extent != array.extent {
                    return Err(BlendError::execution(format!(
                        "aggregate blend destination {} does not match layers {}",
                        dst.desc.extent, array.extent
                    )));
                }
                let mut order = Vec::with_capacity(layers.len());
                for r in layers {
                    match r {
                        ImageRef::Layer(i) if (*i as usize) < array.views.len() => order.push(*i),
                        other => {
                            return Err(BlendError::execution(format!(
                                "aggregate blend input {other:?} is not an uploaded layer"
                            )));
                        }
                    }
                }
                if order.is_empty() {
                    return Err(BlendError::execution(
                        "aggregate blend needs at least one layer",
                    ));
                }
                let order_buf = self
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("blendbench_aggregate_order"),
                        contents: bytemuck::cast_slice(&order),
                        usage: wgpu::BufferUsages::STORAGE,
                    });
                let params = AggregateParams {
                    extent: [array.extent.width, array.extent.height],
                    count: order.len() as u32,
                    _pad: 0,
                };
                let params_buf = self
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("blendbench_aggregate_params"),
                        contents: bytemuck::bytes_of(&params),
                        usage: wgpu::BufferUsages::UNIFORM,
                    });
                let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("blendbench_aggregate_bg"),
                    layout: &self.kernels.aggregate_bgl,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&array.array_view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: order_buf.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: params_buf.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: wgpu::BindingResource::TextureView(&dst.view),
                        },
                    ],
                });
                Ok((pipeline, pipeline_id, bind_group, array.extent))
            }
        }
    }

    fn encode_copy(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        src: ImageRef,
        dst: ImageRef,
    ) -> BlendResult<()> {
        let dst = self.destination(dst, &[])?;
        let (texture, layer, extent) = match src {
            ImageRef::Layer(i) => {
                let array = self.layer_array()?;
                if i as usize >= array.views.len() {
                    return Err(BlendError::execution(format!("layer {i} was not uploaded")));
                }
                (&array.texture, i, array.extent)
            }
            ImageRef::Image(id) => {
                let img = self.usable(id, &[])?;
                (&img.texture, 0, img.desc.extent)
            }
        };
        if extent != dst.desc.extent {
            return Err(BlendError::execution(format!(
                "copy between {extent} and {}",
                dst.desc.extent
            )));
        }
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &dst.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            extent3d(extent, 1),
        );
        self.tracker.bump(|s| s.copies += 1);
        Ok(())
    }

    fn new_encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    fn encode_command(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
        cmd: &Command,
    ) -> BlendResult<()> {
        match cmd {
            Command::WaitEvent { event, value } => {
                let scheduled = self.scheduled.get(&event.id()).copied().unwrap_or(0);
                if scheduled.max(event.value()) < *value {
                    return Err(BlendError::execution(format!(
                        "wait on event {} for {value}, which no earlier submission signals",
                        event.id()
                    )));
                }
                Ok(())
            }
            Command::SignalEvent { event, value } => {
                let done = std::mem::replace(encoder, self.new_encoder(label));
                self.queue.submit(Some(done.finish()));
                self.schedule_signal(event, *value);
                Ok(())
            }
            Command::Render(scope) => self.encode_render(encoder, scope),
            Command::Compute(scope) => self.encode_compute(encoder, scope),
            Command::Copy { src, dst } => self.encode_copy(encoder, *src, *dst),
            Command::Present { image, .. } => {
                if let ImageRef::Image(id) = image {
                    self.image(*id)?;
                }
                self.tracker.bump(|s| s.presents += 1);
                Ok(())
            }
        }
    }

    fn schedule_signal(&mut self, event: &SharedEvent, value: u64) {
        let slot = self.scheduled.entry(event.id()).or_default();
        *slot = (*slot).max(value);
        let event = event.clone();
        self.queue.on_submitted_work_done(move || {
            if let Err(err) = event.signal(value) {
                tracing::warn!(error = %err, "event signal failed");
            }
        });
    }
}

impl Kernels {
    fn new(device: &wgpu::Device) -> Self {
        let module = |label: &str, entry: &str, pair: bool| {
            let bindings = if pair { PAIR_BINDINGS } else { "" };
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(format!("{BLEND_MATH}{bindings}{entry}").into()),
            })
        };
        let render_module = module("blendbench_render_blend", RENDER_ENTRY, true);
        let compute_module = module("blendbench_compute_blend", COMPUTE_ENTRY, true);
        let aggregate_module = module("blendbench_aggregate_blend", AGGREGATE_ENTRY, false);

        let sampled = |binding: u32, visibility, view_dimension| wgpu::BindGroupLayoutEntry {
            binding,
            visibility,
            ty: wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension,
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
            },
            count: None,
        };
        let uniform = |binding: u32, visibility| wgpu::BindGroupLayoutEntry {
            binding,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let storage_dst = wgpu::BindGroupLayoutEntry {
            binding: 3,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: FORMAT,
                view_dimension: wgpu::TextureViewDimension::D2,
            },
            count: None,
        };
        let d2 = wgpu::TextureViewDimension::D2;
        let frag = wgpu::ShaderStages::FRAGMENT;
        let comp = wgpu::ShaderStages::COMPUTE;

        let render_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blendbench_render_bgl"),
            entries: &[sampled(0, frag, d2), sampled(1, frag, d2), uniform(2, frag)],
        });
        let compute_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blendbench_compute_bgl"),
            entries: &[
                sampled(0, comp, d2),
                sampled(1, comp, d2),
                uniform(2, comp),
                storage_dst,
            ],
        });
        let aggregate_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blendbench_aggregate_bgl"),
            entries: &[
                sampled(0, comp, wgpu::TextureViewDimension::D2Array),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: comp,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                uniform(2, comp),
                storage_dst,
            ],
        });

        let layout = |label: &str, bgl: &wgpu::BindGroupLayout| {
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[bgl],
                push_constant_ranges: &[],
            })
        };
        let render_layout = layout("blendbench_render_pl", &render_bgl);
        let compute_layout = layout("blendbench_compute_pl", &compute_bgl);
        let aggregate_layout = layout("blendbench_aggregate_pl", &aggregate_bgl);

        Self {
            render_module,
            compute_module,
            aggregate_module,
            render_bgl,
            compute_bgl,
            aggregate_bgl,
            render_layout,
            compute_layout,
            aggregate_layout,
        }
    }

    fn render_pipeline(&self, device: &wgpu::Device, label: &str) -> wgpu::RenderPipeline {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&self.render_layout),
            vertex: wgpu::VertexState {
                module: &self.render_module,
                entry_point: Some("vs"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &self.render_module,
                entry_point: Some("fs"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                // Blending happens in the shader; the target is overwritten.
                targets: &[Some(wgpu::ColorTargetState {
                    format: FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }

    fn compute_pipeline(
        &self,
        device: &wgpu::Device,
        label: &str,
        aggregate: bool,
    ) -> wgpu::ComputePipeline {
        let (layout, module) = if aggregate {
            (&self.aggregate_layout, &self.aggregate_module)
        } else {
            (&self.compute_layout, &self.compute_module)
        };
        device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(layout),
            module,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        })
    }
}

impl GpuDevice for WgpuDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn upload_layers(&mut self, layers: &LayerStack) -> BlendResult<()> {
        let extent = layers.extent();
        let count = u32::try_from(layers.len())
            .map_err(|_| BlendError::init("too many layers for one array texture"))?;
        let limits = self.device.limits();
        if count > limits.max_texture_array_layers {
            return Err(BlendError::init(format!(
                "{count} layers exceed the adapter's array limit of {}",
                limits.max_texture_array_layers
            )));
        }
        check_extent(&limits, extent, "layers")?;

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("blendbench_layers"),
            size: extent3d(extent, count),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        for (i, layer) in layers.layers().iter().enumerate() {
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: 0,
                        y: 0,
                        z: i as u32,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                layer.data(),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(extent.width * 4),
                    rows_per_image: Some(extent.height),
                },
                extent3d(extent, 1),
            );
        }
        let array_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("blendbench_layers_array"),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            ..Default::default()
        });
        let views = (0..count)
            .map(|i| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("blendbench_layer"),
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    base_array_layer: i,
                    array_layer_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();
        self.layers = Some(LayerArray {
            extent,
            texture,
            array_view,
            views,
            host: layers.layers().to_vec(),
        });
        tracing::debug!(count, %extent, "uploaded layers");
        Ok(())
    }

    fn create_image(&mut self, desc: ImageDesc, label: &str) -> BlendResult<ImageId> {
        if desc.extent.is_empty() {
            return Err(BlendError::init(format!(
                "image '{label}' has empty extent {}",
                desc.extent
            )));
        }
        check_extent(&self.device.limits(), desc.extent, label)?;
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent3d(desc.extent, 1),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = ImageId(self.next_image);
        self.next_image += 1;
        self.images.insert(
            id,
            GpuImage {
                desc,
                texture,
                view,
            },
        );
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
        // wgpu keeps the texture alive for submissions that still reference it.
        match self.images.remove(&id) {
            Some(_) => Ok(()),
            None => Err(BlendError::execution(format!("release of unknown image {id:?}"))),
        }
    }

    fn image_desc(&self, id: ImageId) -> Option<ImageDesc> {
        self.images.get(&id).map(|img| img.desc)
    }

    fn create_pipeline(&mut self, kind: PipelineKind, label: &str) -> BlendResult<PipelineId> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = match kind {
            PipelineKind::RenderBlend => {
                Pipeline::Render(self.kernels.render_pipeline(&self.device, label))
            }
            PipelineKind::ComputeBlend => {
                Pipeline::Compute(self.kernels.compute_pipeline(&self.device, label, false))
            }
            PipelineKind::ComputeAggregate => {
                Pipeline::Compute(self.kernels.compute_pipeline(&self.device, label, true))
            }
        };
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BlendError::init(format!("compile pipeline '{label}': {err}")));
        }
        let id = PipelineId(self.next_pipeline);
        self.next_pipeline += 1;
        self.pipelines.insert(id, pipeline);
        tracing::trace!(?id, ?kind, label, "created pipeline");
        Ok(id)
    }

    fn make_event(&mut self) -> BlendResult<SharedEvent> {
        let event = SharedEvent::new(self.next_event);
        self.next_event += 1;
        Ok(event)
    }

    fn submit(&mut self, buffer: CommandBuffer) -> BlendResult<()> {
        let (label, commands, completion) = buffer.into_parts();
        let _span = tracing::debug_span!("submit", buffer = %label).entered();
        match self.tracker.in_flight.lock() {
            Ok(mut n) => *n += 1,
            Err(p) => *p.into_inner() += 1,
        }
        self.tracker.bump(|s| s.submitted += 1);

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self.new_encoder(&label);
        let mut failed = None;
        for cmd in &commands {
            if failed.is_some() {
                // Later frames may be waiting on this buffer's signals.
                if let Command::SignalEvent { event, value } = cmd {
                    self.schedule_signal(event, *value);
                }
                continue;
            }
            if let Err(err) = self.encode_command(&mut encoder, &label, cmd) {
                failed = Some(err);
            }
        }
        self.queue.submit(Some(encoder.finish()));
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            failed.get_or_insert(BlendError::execution(format!("wgpu validation: {err}")));
        }
        if let Some(err) = failed {
            tracing::warn!(buffer = %label, error = %err, "command buffer failed");
            self.failure.get_or_insert(err);
        }

        let tracker = Arc::clone(&self.tracker);
        self.queue.on_submitted_work_done(move || {
            for handler in completion {
                handler();
            }
            tracker.bump(|s| s.completed += 1);
            tracker.finish_one();
        });
        Ok(())
    }

    fn wait_idle(&mut self) -> BlendResult<()> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| BlendError::execution(format!("wgpu poll failed: {e:?}")))?;
        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn poll(&mut self) -> BlendResult<()> {
        self.device
            .poll(wgpu::PollType::Poll)
            .map(|_| ())
            .map_err(|e| BlendError::execution(format!("wgpu poll failed: {e:?}")))
    }

    fn read_image(&mut self, image: ImageRef) -> BlendResult<ImageRGBA> {
        let id = match image {
            ImageRef::Layer(i) => {
                let array = self.layer_array()?;
                return array
                    .host
                    .get(i as usize)
                    .map(|l| l.as_ref().clone())
                    .ok_or_else(|| BlendError::execution(format!("layer {i} was not uploaded")));
            }
            ImageRef::Image(id) => id,
        };
        let img = self.image(id)?;
        if img.desc.storage == StorageMode::Memoryless {
            return Err(BlendError::execution(format!(
                "memoryless image {id:?} has no contents outside a render scope"
            )));
        }
        let Extent { width, height } = img.desc.extent;

        let padded_row_bytes = align_to(width * 4, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("blendbench_readback"),
            size: u64::from(padded_row_bytes) * u64::from(height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self.new_encoder("blendbench_readback_encoder");
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &img.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(height),
                },
            },
            extent3d(img.desc.extent, 1),
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| BlendError::execution(format!("wgpu poll failed: {e:?}")))?;
        rx.recv()
            .map_err(|_| BlendError::execution("readback channel closed"))?
            .map_err(|e| BlendError::execution(format!("readback map failed: {e:?}")))?;

        let mapped = slice.get_mapped_range();
        let row_bytes = width as usize * 4;
        let mut out = Vec::with_capacity(row_bytes * height as usize);
        for row in mapped.chunks(padded_row_bytes as usize).take(height as usize) {
            out.extend_from_slice(&row[..row_bytes]);
        }
        drop(mapped);
        readback.unmap();
        ImageRGBA::from_raw(img.desc.extent, out)
    }

    fn stats(&self) -> DeviceStats {
        match self.tracker.stats.lock() {
            Ok(s) => s.clone(),
            Err(p) => p.into_inner().clone(),
        }
    }
}

fn extent3d(extent: Extent, layers: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: extent.width,
        height: extent.height,
        depth_or_array_layers: layers,
    }
}

fn check_extent(limits: &wgpu::Limits, extent: Extent, what: &str) -> BlendResult<()> {
    let max = limits.max_texture_dimension_2d;
    if extent.width > max || extent.height > max {
        return Err(BlendError::init(format!(
            "{what} extent {extent} exceeds the adapter limit of {max}"
        )));
    }
    Ok(())
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}
