//! `GraphicsDevice` on wgpu, rendering into an offscreen target.
//!
//! The compositor drives the device with immediate-mode calls. wgpu wants
//! whole command buffers, so every call is recorded into a frame (a vertex
//! arena plus a list of operations) and encoded as render passes at
//! `end_frame`. Unscissored clears split the frame into passes and become
//! load operations; scissored clears are drawn as replace-blended quads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use log::{debug, info, warn};
use resvg::tiny_skia::Pixmap;
use wgpu::util::DeviceExt;

use crate::color::Color;
use crate::error::{RenderError, Result};
use crate::image::Image;
use crate::renderer::BlendMode;

use super::device::{
    ClearFlags, Filter, GraphicsDevice, Program, StencilMode, TextureHandle, TextureOptions,
    Topology, Wrap,
};
use super::stream::{PrimitiveVertex, QuadVertex};

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const STENCIL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Stencil8;
/// Texture units exposed to the compositor, bounded by the device limit.
const MAX_UNITS: usize = 16;

const SHADER_SOURCE: &str = r#"
struct Viewport {
    size: vec2<f32>,
    _padding: vec2<f32>,
};

@group(0) @binding(0) var<uniform> viewport: Viewport;
@group(1) @binding(0) var quad_texture: texture_2d<f32>;
@group(1) @binding(1) var quad_sampler: sampler;

fn to_clip(position: vec2<f32>) -> vec4<f32> {
    let x = position.x / viewport.size.x * 2.0 - 1.0;
    let y = 1.0 - position.y / viewport.size.y * 2.0;
    return vec4<f32>(x, y, 0.0, 1.0);
}

struct QuadOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) color: vec4<f32>,
};

@vertex
fn vs_quad(
    @location(0) position: vec2<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) color: vec4<f32>,
) -> QuadOutput {
    var out: QuadOutput;
    out.position = to_clip(position);
    out.uv = uv;
    out.color = color;
    return out;
}

@fragment
fn fs_quad(in: QuadOutput) -> @location(0) vec4<f32> {
    return textureSample(quad_texture, quad_sampler, in.uv) * in.color;
}

struct PrimitiveOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec4<f32>,
};

@vertex
fn vs_prim(@location(0) position: vec2<f32>, @location(1) color: vec4<f32>) -> PrimitiveOutput {
    var out: PrimitiveOutput;
    out.position = to_clip(position);
    out.color = color;
    return out;
}

@fragment
fn fs_prim(in: PrimitiveOutput) -> @location(0) vec4<f32> {
    return in.color;
}
"#;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct ViewportUniform {
    size: [f32; 2],
    _padding: [f32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PipelineKey {
    Draw {
        program: Program,
        blend: BlendMode,
        stencil: StencilMode,
        topology: Topology,
    },
    /// Replace-blended quad standing in for a scissored clear.
    Clear { color: bool, stencil: bool },
}

#[derive(Debug, Clone)]
struct DrawOp {
    pipeline: PipelineKey,
    texture: Option<TextureHandle>,
    scissor: Option<[u32; 4]>,
    /// Byte range of the vertices in the frame arena.
    offset: u64,
    size: u64,
    /// Index count for indexed draws, vertex count otherwise.
    count: u32,
    indexed: bool,
    stencil_reference: u32,
}

#[derive(Debug, Clone)]
enum FrameOp {
    Clear { color: Option<Color>, stencil: bool },
    Draw(DrawOp),
}

/// Draws sharing one render pass and its load operations.
#[derive(Default)]
struct PassPlan {
    clear_color: Option<Color>,
    clear_stencil: bool,
    draws: Vec<DrawOp>,
}

struct GpuTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    options: TextureOptions,
    width: u32,
    height: u32,
}

struct Target {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    stencil: wgpu::TextureView,
}

impl Target {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Easel Target"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let stencil = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Easel Stencil"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: STENCIL_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        Self {
            view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
            stencil: stencil.create_view(&wgpu::TextureViewDescriptor::default()),
            texture,
        }
    }
}

/// Everything that dies with the wgpu device.
struct Resources {
    device: wgpu::Device,
    queue: wgpu::Queue,
    shader: wgpu::ShaderModule,
    texture_layout: wgpu::BindGroupLayout,
    quad_layout: wgpu::PipelineLayout,
    primitive_layout: wgpu::PipelineLayout,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    target: Target,
    vertex_buffer: wgpu::Buffer,
    index_buffer: Option<wgpu::Buffer>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    textures: HashMap<TextureHandle, GpuTexture>,
}

impl Resources {
    fn new(adapter: &wgpu::Adapter, lost: &Arc<AtomicBool>, width: u32, height: u32) -> Result<Self> {
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Easel Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| RenderError::DeviceCreation(e.to_string()))?;

        let flag = Arc::clone(lost);
        device.set_device_lost_callback(move |reason, message| {
            warn!("wgpu device lost ({:?}): {}", reason, message);
            flag.store(true, Ordering::SeqCst);
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Easel Shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER_SOURCE.into()),
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Easel Viewport Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Easel Texture Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let quad_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Easel Quad Layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            immediate_size: 0,
        });
        let primitive_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Easel Primitive Layout"),
            bind_group_layouts: &[&uniform_layout],
            immediate_size: 0,
        });

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Easel Viewport Buffer"),
            contents: bytemuck::bytes_of(&ViewportUniform {
                size: [width as f32, height as f32],
                _padding: [0.0; 2],
            }),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Easel Viewport Bind Group"),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let target = Target::new(&device, width, height);
        let vertex_buffer = create_vertex_buffer(&device, 64 * 1024);

        Ok(Self {
            device,
            queue,
            shader,
            texture_layout,
            quad_layout,
            primitive_layout,
            uniform_buffer,
            uniform_bind_group,
            target,
            vertex_buffer,
            index_buffer: None,
            pipelines: HashMap::new(),
            textures: HashMap::new(),
        })
    }

    fn pipeline(&mut self, key: PipelineKey) {
        if self.pipelines.contains_key(&key) {
            return;
        }
        let pipeline = create_pipeline(self, key);
        self.pipelines.insert(key, pipeline);
    }
}

fn create_vertex_buffer(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Easel Vertex Buffer"),
        size,
        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn blend_state(mode: BlendMode) -> wgpu::BlendState {
    use wgpu::{BlendComponent, BlendFactor, BlendOperation};

    let component = |src_factor, dst_factor| BlendComponent {
        src_factor,
        dst_factor,
        operation: BlendOperation::Add,
    };
    // colors are premultiplied throughout
    let over = component(BlendFactor::One, BlendFactor::OneMinusSrcAlpha);
    match mode {
        // the compositor falls back to normal for screen
        BlendMode::Normal | BlendMode::Screen => wgpu::BlendState {
            color: over,
            alpha: over,
        },
        BlendMode::Multiply => wgpu::BlendState {
            color: component(BlendFactor::Dst, BlendFactor::OneMinusSrcAlpha),
            alpha: over,
        },
        BlendMode::Additive => wgpu::BlendState {
            color: component(BlendFactor::One, BlendFactor::One),
            alpha: component(BlendFactor::One, BlendFactor::One),
        },
    }
}

fn stencil_face(compare: wgpu::CompareFunction, pass_op: wgpu::StencilOperation) -> wgpu::StencilFaceState {
    wgpu::StencilFaceState {
        compare,
        fail_op: wgpu::StencilOperation::Keep,
        depth_fail_op: wgpu::StencilOperation::Keep,
        pass_op,
    }
}

fn primitive_topology(topology: Topology) -> wgpu::PrimitiveTopology {
    match topology {
        Topology::LineList => wgpu::PrimitiveTopology::LineList,
        Topology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        Topology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
        Topology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

fn create_pipeline(resources: &Resources, key: PipelineKey) -> wgpu::RenderPipeline {
    use wgpu::{CompareFunction, StencilOperation};

    let (program, blend, write_mask, face, topology) = match key {
        PipelineKey::Draw {
            program,
            blend,
            stencil,
            topology,
        } => {
            let (write_mask, face) = match stencil {
                StencilMode::Disabled => (
                    wgpu::ColorWrites::ALL,
                    stencil_face(CompareFunction::Always, StencilOperation::Keep),
                ),
                StencilMode::Write => (
                    wgpu::ColorWrites::empty(),
                    stencil_face(CompareFunction::Always, StencilOperation::Replace),
                ),
                StencilMode::Test => (
                    wgpu::ColorWrites::ALL,
                    stencil_face(CompareFunction::Equal, StencilOperation::Keep),
                ),
            };
            (program, Some(blend_state(blend)), write_mask, face, topology)
        }
        PipelineKey::Clear { color, stencil } => {
            let write_mask = if color {
                wgpu::ColorWrites::ALL
            } else {
                wgpu::ColorWrites::empty()
            };
            let pass_op = if stencil {
                StencilOperation::Replace
            } else {
                StencilOperation::Keep
            };
            (
                Program::Primitive,
                None,
                write_mask,
                stencil_face(CompareFunction::Always, pass_op),
                Topology::TriangleStrip,
            )
        }
    };

    let (layout, vs, fs, buffers) = match program {
        Program::Quad => (&resources.quad_layout, "vs_quad", "fs_quad", [QuadVertex::desc()]),
        Program::Primitive => (
            &resources.primitive_layout,
            "vs_prim",
            "fs_prim",
            [PrimitiveVertex::desc()],
        ),
    };

    resources
        .device
        .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Easel Pipeline"),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module: &resources.shader,
                entry_point: Some(vs),
                buffers: &buffers,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &resources.shader,
                entry_point: Some(fs),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend,
                    write_mask,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: primitive_topology(topology),
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: STENCIL_FORMAT,
                depth_write_enabled: false,
                depth_compare: CompareFunction::Always,
                stencil: wgpu::StencilState {
                    front: face,
                    back: face,
                    read_mask: 0xff,
                    write_mask: 0xff,
                },
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        })
}

fn create_sampler(device: &wgpu::Device, options: TextureOptions) -> wgpu::Sampler {
    let address = |wrap| match wrap {
        Wrap::Clamp => wgpu::AddressMode::ClampToEdge,
        Wrap::Repeat => wgpu::AddressMode::Repeat,
    };
    let filter = match options.filter {
        Filter::Nearest => wgpu::FilterMode::Nearest,
        Filter::Linear => wgpu::FilterMode::Linear,
    };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("Easel Sampler"),
        address_mode_u: address(options.wrap_u),
        address_mode_v: address(options.wrap_v),
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: wgpu::MipmapFilterMode::Nearest,
        ..Default::default()
    })
}

fn write_image(queue: &wgpu::Queue, texture: &wgpu::Texture, image: &Image) {
    let (width, height) = (image.width(), image.height());
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        image.pixmap().data(),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * width),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}

/// Headless wgpu device.
///
/// Owns its adapter so a lost device can be requested again on
/// `init_programs`.
pub struct WgpuDevice {
    adapter: wgpu::Adapter,
    resources: Resources,
    lost: Arc<AtomicBool>,
    width: u32,
    height: u32,
    max_units: usize,
    next_texture: u64,

    program: Program,
    blend: BlendMode,
    scissor: Option<[u32; 4]>,
    stencil: StencilMode,
    units: Vec<Option<TextureHandle>>,
    active_unit: usize,

    arena: Vec<u8>,
    /// Byte range of the latest `upload_vertices` in the arena.
    uploaded: (u64, u64),
    ops: Vec<FrameOp>,
}

impl WgpuDevice {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidSurfaceSize { width, height });
        }
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| RenderError::DeviceCreation(e.to_string()))?;

        let info = adapter.get_info();
        info!("Using GPU adapter {} ({:?})", info.name, info.backend);

        let lost = Arc::new(AtomicBool::new(false));
        let resources = Resources::new(&adapter, &lost, width, height)?;
        let limit = resources.device.limits().max_sampled_textures_per_shader_stage as usize;
        let max_units = limit.min(MAX_UNITS);

        Ok(Self {
            adapter,
            resources,
            lost,
            width,
            height,
            max_units,
            next_texture: 0,
            program: Program::Quad,
            blend: BlendMode::Normal,
            scissor: None,
            stencil: StencilMode::Disabled,
            units: vec![None; max_units],
            active_unit: 0,
            arena: Vec::new(),
            uploaded: (0, 0),
            ops: Vec::new(),
        })
    }

    fn record_draw(&mut self, topology: Topology, count: usize, indexed: bool) {
        let texture = match self.program {
            Program::Quad => self.units.get(self.active_unit).copied().flatten(),
            Program::Primitive => None,
        };
        if self.program == Program::Quad && texture.is_none() {
            warn!("Quad draw skipped: no texture bound to unit {}", self.active_unit);
            return;
        }
        let (offset, size) = self.uploaded;
        self.ops.push(FrameOp::Draw(DrawOp {
            pipeline: PipelineKey::Draw {
                program: self.program,
                blend: self.blend,
                stencil: self.stencil,
                topology,
            },
            texture,
            scissor: self.scissor,
            offset,
            size,
            count: count as u32,
            indexed,
            stencil_reference: 1,
        }));
    }

    fn push_vertices(&mut self, data: &[u8]) -> (u64, u64) {
        let offset = self.arena.len() as u64;
        self.arena.extend_from_slice(data);
        (offset, data.len() as u64)
    }

    /// A scissored clear, drawn as a quad over the scissor rectangle.
    fn record_scissored_clear(&mut self, rect: [u32; 4], color: Color, flags: ClearFlags) {
        let [x, y, w, h] = rect.map(|v| v as f32);
        let color = color.premultiplied();
        let vertices = [
            PrimitiveVertex { position: [x + w, y], color },
            PrimitiveVertex { position: [x, y], color },
            PrimitiveVertex { position: [x + w, y + h], color },
            PrimitiveVertex { position: [x, y + h], color },
        ];
        let (offset, size) = self.push_vertices(bytemuck::cast_slice(&vertices));
        self.ops.push(FrameOp::Draw(DrawOp {
            pipeline: PipelineKey::Clear {
                color: flags.contains(ClearFlags::COLOR),
                stencil: flags.contains(ClearFlags::STENCIL),
            },
            texture: None,
            scissor: Some(rect),
            offset,
            size,
            count: 4,
            indexed: false,
            stencil_reference: 0,
        }));
    }

    fn plan_passes(ops: Vec<FrameOp>) -> Vec<PassPlan> {
        let mut passes = Vec::new();
        let mut current = PassPlan::default();
        for op in ops {
            match op {
                FrameOp::Clear { color, stencil } => {
                    if !current.draws.is_empty() {
                        passes.push(std::mem::take(&mut current));
                    }
                    if color.is_some() {
                        current.clear_color = color;
                    }
                    current.clear_stencil |= stencil;
                }
                FrameOp::Draw(draw) => current.draws.push(draw),
            }
        }
        if !current.draws.is_empty() || current.clear_color.is_some() || current.clear_stencil {
            passes.push(current);
        }
        passes
    }

    fn encode_frame(&mut self) {
        let ops = std::mem::take(&mut self.ops);
        let arena = std::mem::take(&mut self.arena);
        self.uploaded = (0, 0);
        if ops.is_empty() {
            return;
        }
        let passes = Self::plan_passes(ops);
        let res = &mut self.resources;

        for draw in passes.iter().flat_map(|p| p.draws.iter()) {
            res.pipeline(draw.pipeline);
        }
        if arena.len() as u64 > res.vertex_buffer.size() {
            let size = (arena.len() as u64).next_power_of_two();
            debug!("Vertex buffer grows to {} bytes", size);
            res.vertex_buffer = create_vertex_buffer(&res.device, size);
        }
        if !arena.is_empty() {
            // buffer writes must be 4-byte aligned; vertices always are
            res.queue.write_buffer(&res.vertex_buffer, 0, &arena);
        }

        let mut encoder = res
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Easel Encoder"),
            });
        let (width, height) = (self.width, self.height);
        for plan in &passes {
            let load = match plan.clear_color {
                Some(c) => {
                    let [r, g, b, a] = c.premultiplied();
                    wgpu::LoadOp::Clear(wgpu::Color {
                        r: r as f64,
                        g: g as f64,
                        b: b as f64,
                        a: a as f64,
                    })
                }
                None => wgpu::LoadOp::Load,
            };
            let stencil_load = if plan.clear_stencil {
                wgpu::LoadOp::Clear(0)
            } else {
                wgpu::LoadOp::Load
            };
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Easel Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &res.target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &res.target.stencil,
                    depth_ops: None,
                    stencil_ops: Some(wgpu::Operations {
                        load: stencil_load,
                        store: wgpu::StoreOp::Store,
                    }),
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            pass.set_bind_group(0, &res.uniform_bind_group, &[]);
            for draw in &plan.draws {
                let Some(pipeline) = res.pipelines.get(&draw.pipeline) else {
                    continue;
                };
                if draw.size == 0 {
                    continue;
                }
                match draw.scissor {
                    Some([x, y, w, h]) => {
                        if w == 0 || h == 0 {
                            continue;
                        }
                        pass.set_scissor_rect(x, y, w, h);
                    }
                    None => pass.set_scissor_rect(0, 0, width, height),
                }
                pass.set_pipeline(pipeline);
                pass.set_stencil_reference(draw.stencil_reference);
                if let Some(handle) = draw.texture {
                    let Some(texture) = res.textures.get(&handle) else {
                        continue;
                    };
                    pass.set_bind_group(1, &texture.bind_group, &[]);
                }
                pass.set_vertex_buffer(
                    0,
                    res.vertex_buffer
                        .slice(draw.offset..draw.offset + draw.size),
                );
                if draw.indexed {
                    let Some(indices) = res.index_buffer.as_ref() else {
                        continue;
                    };
                    pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint16);
                    pass.draw_indexed(0..draw.count, 0, 0..1);
                } else {
                    pass.draw(0..draw.count, 0..1);
                }
            }
        }
        res.queue.submit(std::iter::once(encoder.finish()));
    }
}

impl GraphicsDevice for WgpuDevice {
    fn max_texture_units(&self) -> usize {
        self.max_units
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    fn init_programs(&mut self) -> Result<()> {
        if self.is_lost() {
            info!("Requesting a new wgpu device");
            self.resources = Resources::new(&self.adapter, &self.lost, self.width, self.height)?;
            self.lost.store(false, Ordering::SeqCst);
        }
        self.resources.pipelines.clear();
        for program in [Program::Quad, Program::Primitive] {
            self.resources.pipeline(PipelineKey::Draw {
                program,
                blend: BlendMode::Normal,
                stencil: StencilMode::Disabled,
                topology: Topology::TriangleList,
            });
        }
        self.resources.textures.clear();
        self.next_texture = 0;
        self.units = vec![None; self.max_units];
        self.ops.clear();
        self.arena.clear();
        Ok(())
    }

    fn upload_indices(&mut self, indices: &[u16]) -> Result<()> {
        let res = &mut self.resources;
        res.index_buffer = Some(res.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Easel Index Buffer"),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        }));
        Ok(())
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        if width == self.width && height == self.height {
            return;
        }
        // pending work belongs to the old target
        self.encode_frame();
        self.width = width;
        self.height = height;
        let res = &mut self.resources;
        res.target = Target::new(&res.device, width, height);
        res.queue.write_buffer(
            &res.uniform_buffer,
            0,
            bytemuck::bytes_of(&ViewportUniform {
                size: [width as f32, height as f32],
                _padding: [0.0; 2],
            }),
        );
    }

    fn use_program(&mut self, program: Program) {
        self.program = program;
    }

    fn set_blend_mode(&mut self, mode: BlendMode) {
        self.blend = mode;
    }

    fn set_scissor(&mut self, rect: Option<[u32; 4]>) {
        self.scissor = rect;
    }

    fn set_stencil(&mut self, mode: StencilMode) {
        self.stencil = mode;
    }

    fn create_texture(&mut self, image: &Image, options: TextureOptions) -> Result<TextureHandle> {
        let res = &self.resources;
        let texture = res.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Easel Image Texture"),
            size: wgpu::Extent3d {
                width: image.width(),
                height: image.height(),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        write_image(&res.queue, &texture, image);

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = create_sampler(&res.device, options);
        let bind_group = res.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Easel Texture Bind Group"),
            layout: &res.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        let handle = TextureHandle(self.next_texture);
        self.next_texture += 1;
        self.resources.textures.insert(
            handle,
            GpuTexture {
                texture,
                bind_group,
                options,
                width: image.width(),
                height: image.height(),
            },
        );
        Ok(handle)
    }

    fn update_texture(&mut self, texture: TextureHandle, image: &Image) -> Result<()> {
        // queued writes land before the frame that uses them is submitted,
        // so earlier draws must be encoded first
        self.encode_frame();
        let Some(entry) = self.resources.textures.get(&texture) else {
            warn!("Update of unknown texture {:?} ignored", texture);
            return Ok(());
        };
        if entry.width != image.width() || entry.height != image.height() {
            let options = entry.options;
            let replacement = self.create_texture(image, options)?;
            self.next_texture -= 1;
            if let Some(fresh) = self.resources.textures.remove(&replacement) {
                self.resources.textures.insert(texture, fresh);
            }
            return Ok(());
        }
        write_image(&self.resources.queue, &entry.texture, image);
        Ok(())
    }

    fn bind_texture(&mut self, unit: usize, texture: TextureHandle) {
        if unit >= self.units.len() {
            self.units.resize(unit + 1, None);
        }
        self.units[unit] = Some(texture);
        self.active_unit = unit;
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        self.encode_frame();
        if let Some(entry) = self.resources.textures.remove(&texture) {
            entry.texture.destroy();
        }
        for slot in self.units.iter_mut().filter(|s| **s == Some(texture)) {
            *slot = None;
        }
    }

    fn upload_vertices(&mut self, data: &[u8]) {
        self.uploaded = self.push_vertices(data);
    }

    fn draw_indexed(&mut self, topology: Topology, index_count: usize) {
        self.record_draw(topology, index_count, true);
    }

    fn draw_arrays(&mut self, topology: Topology, vertex_count: usize) {
        self.record_draw(topology, vertex_count, false);
    }

    fn clear(&mut self, color: Color, flags: ClearFlags) {
        match self.scissor {
            Some(rect) => self.record_scissored_clear(rect, color, flags),
            None => self.ops.push(FrameOp::Clear {
                color: flags.contains(ClearFlags::COLOR).then_some(color),
                stencil: flags.contains(ClearFlags::STENCIL),
            }),
        }
    }

    fn end_frame(&mut self) -> Result<()> {
        if self.is_lost() {
            self.ops.clear();
            self.arena.clear();
            return Err(RenderError::ContextLost);
        }
        self.encode_frame();
        Ok(())
    }

    fn read_pixels(&mut self) -> Result<Image> {
        self.end_frame()?;
        let (width, height) = (self.width, self.height);
        let row = 4 * width as usize;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize;
        let padded = row.div_ceil(align) * align;

        let res = &self.resources;
        let readback = res.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Easel Readback"),
            size: (padded * height as usize) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = res
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Easel Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            res.target.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded as u32),
                    rows_per_image: None,
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        res.queue.submit(std::iter::once(encoder.finish()));

        let slice = readback.slice(..);
        let (sender, receiver) = channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        loop {
            if self.is_lost() {
                return Err(RenderError::ContextLost);
            }
            let _ = res.device.poll(wgpu::PollType::Poll);
            if let Ok(result) = receiver.try_recv() {
                result.map_err(|e| RenderError::Readback(e.to_string()))?;
                break;
            }
            std::thread::yield_now();
        }

        let mut pixmap = Pixmap::new(width, height)
            .ok_or(RenderError::InvalidSurfaceSize { width, height })?;
        {
            let mapped = slice.get_mapped_range();
            for (y, dst) in pixmap.data_mut().chunks_exact_mut(row).enumerate() {
                let src = y * padded;
                dst.copy_from_slice(&mapped[src..src + row]);
            }
        }
        readback.unmap();
        Ok(Image::from_pixmap(pixmap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw(pipeline: PipelineKey) -> FrameOp {
        FrameOp::Draw(DrawOp {
            pipeline,
            texture: None,
            scissor: None,
            offset: 0,
            size: 96,
            count: 4,
            indexed: false,
            stencil_reference: 1,
        })
    }

    fn primitive() -> PipelineKey {
        PipelineKey::Draw {
            program: Program::Primitive,
            blend: BlendMode::Normal,
            stencil: StencilMode::Disabled,
            topology: Topology::TriangleStrip,
        }
    }

    #[test]
    fn test_unscissored_clears_split_passes() {
        let passes = WgpuDevice::plan_passes(vec![
            FrameOp::Clear {
                color: Some(Color::BLACK),
                stencil: false,
            },
            draw(primitive()),
            FrameOp::Clear {
                color: None,
                stencil: true,
            },
            draw(primitive()),
            draw(primitive()),
        ]);
        assert_eq!(passes.len(), 2);
        assert_eq!(passes[0].clear_color, Some(Color::BLACK));
        assert!(!passes[0].clear_stencil);
        assert_eq!(passes[1].clear_color, None);
        assert!(passes[1].clear_stencil);
        assert_eq!(passes[1].draws.len(), 2);
    }

    #[test]
    fn test_trailing_clear_gets_its_own_pass() {
        let passes = WgpuDevice::plan_passes(vec![
            draw(primitive()),
            FrameOp::Clear {
                color: Some(Color::WHITE),
                stencil: false,
            },
        ]);
        assert_eq!(passes.len(), 2);
        assert!(passes[1].draws.is_empty());
        assert!(WgpuDevice::plan_passes(Vec::new()).is_empty());
    }

    #[test]
    fn test_blend_states_are_premultiplied() {
        let normal = blend_state(BlendMode::Normal);
        assert_eq!(normal.color.src_factor, wgpu::BlendFactor::One);
        assert_eq!(normal.color.dst_factor, wgpu::BlendFactor::OneMinusSrcAlpha);
        let additive = blend_state(BlendMode::Additive);
        assert_eq!(additive.color.dst_factor, wgpu::BlendFactor::One);
    }

    #[test]
    fn test_screen_blends_like_normal() {
        assert_eq!(blend_state(BlendMode::Screen), blend_state(BlendMode::Normal));
        assert_eq!(
            crate::gpu::compositor::supported_blend(BlendMode::Screen),
            BlendMode::Normal
        );
    }
}
