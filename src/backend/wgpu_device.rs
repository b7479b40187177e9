//! [`GraphicsDevice`] on top of wgpu.
//!
//! An effect is a WGSL module. Every `vs_<name>`/`fs_<name>` entry point pair
//! is a technique with one pass, `VertexLight` selecting `vs_vertex_light`.
//! Parameters are collected on the host: values set outside a pass are picked
//! up by `begin_pass`, values set inside one only after `commit_changes`.
//!
//! Draws issued between `begin_scene` and `end_scene` are recorded with a
//! snapshot of the committed parameters and replayed in a single render pass
//! when the scene ends. Text follows in an overlay pass on top.

use std::{
    collections::{HashMap, HashSet},
    ops::Range,
    path::{Path, PathBuf},
    sync::Arc,
};

use cgmath::{Matrix4, SquareMatrix, Vector3};
use instant::Duration;
use winit::window::Window;

use crate::{
    data_structures::texture::Texture,
    device::{
        ALPHA_TEST_REFERENCE, BackBufferDesc, DeviceCaps, EffectValue, FillMode, FontDesc,
        GraphicsDevice, ResourceHandle, ResourceKind, VertexLayoutKind, params,
    },
    error::DeviceError,
    pipelines::{
        render::{EntryPoints, mk_render_pipeline, vertex_layouts},
        text::TextRun,
    },
    resources::{load_string, load_texture},
};

#[cfg(feature = "ui")]
use crate::pipelines::text::TextOverlay;

pub const MAX_BONES: usize = 4;
const MAX_STREAMS: usize = 3;
const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct EffectUniforms {
    view_projection: [[f32; 4]; 4],
    world: [[f32; 4]; 4],
    bones: [[[f32; 4]; 4]; MAX_BONES],
    camera_position: [f32; 4],
    light_direction: [f32; 4],
    /// ambient, diffuse, diffuse map enabled, alpha reference
    lighting: [f32; 4],
}

#[derive(Clone, Debug, PartialEq)]
struct EffectParams {
    view_projection: Matrix4<f32>,
    world: Matrix4<f32>,
    bones: Vec<Matrix4<f32>>,
    camera_position: Vector3<f32>,
    light_direction: Vector3<f32>,
    ambient: f32,
    diffuse: f32,
    diffuse_enabled: bool,
    texture: Option<ResourceHandle>,
}

impl Default for EffectParams {
    fn default() -> Self {
        Self {
            view_projection: Matrix4::identity(),
            world: Matrix4::identity(),
            bones: Vec::new(),
            camera_position: Vector3::new(0.0, 0.0, 0.0),
            light_direction: Vector3::new(0.0, 0.0, -1.0),
            ambient: 0.0,
            diffuse: 1.0,
            diffuse_enabled: true,
            texture: None,
        }
    }
}

impl EffectParams {
    fn set(&mut self, name: &str, value: EffectValue) -> Result<(), DeviceError> {
        match (name, value) {
            (params::VIEW_PROJECTION, EffectValue::Matrix(m)) => self.view_projection = m,
            (params::WORLD, EffectValue::Matrix(m)) => self.world = m,
            (params::BONE_PALETTE, EffectValue::MatrixArray(bones)) if bones.len() <= MAX_BONES => {
                self.bones = bones
            }
            (params::CAMERA_POSITION, EffectValue::Vector(v)) => self.camera_position = v,
            (params::LIGHT_DIRECTION, EffectValue::Vector(v)) => self.light_direction = v,
            (params::AMBIENT, EffectValue::Float(f)) => self.ambient = f,
            (params::DIFFUSE, EffectValue::Float(f)) => self.diffuse = f,
            (params::DIFFUSE_ENABLED, EffectValue::Bool(b)) => self.diffuse_enabled = b,
            (params::DIFFUSE_TEXTURE, EffectValue::Texture(t)) => self.texture = Some(t),
            (name, value) => {
                return Err(DeviceError::UnknownParameter(format!("{} = {:?}", name, value)));
            }
        }
        Ok(())
    }

    fn uniforms(&self) -> EffectUniforms {
        let mut bones: [[[f32; 4]; 4]; MAX_BONES] = [Matrix4::<f32>::identity().into(); MAX_BONES];
        for (slot, bone) in bones.iter_mut().zip(&self.bones) {
            *slot = (*bone).into();
        }
        let v = self.camera_position;
        let l = self.light_direction;
        EffectUniforms {
            view_projection: self.view_projection.into(),
            world: self.world.into(),
            bones,
            camera_position: [v.x, v.y, v.z, 1.0],
            light_direction: [l.x, l.y, l.z, 0.0],
            lighting: [
                self.ambient,
                self.diffuse,
                if self.diffuse_enabled { 1.0 } else { 0.0 },
                ALPHA_TEST_REFERENCE as f32 / 255.0,
            ],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EffectState {
    Idle,
    Begun,
    InPass,
}

struct Effect {
    path: PathBuf,
    module: wgpu::ShaderModule,
    entry_points: HashSet<String>,
    technique: Option<String>,
    pending: EffectParams,
    committed: EffectParams,
    /// Bumped whenever `committed` changes so draws can share snapshots.
    version: u64,
    state: EffectState,
    valid: bool,
}

/// Names of every function declared in a WGSL source.
fn declared_functions(source: &str) -> HashSet<String> {
    source
        .split("fn ")
        .skip(1)
        .filter_map(|rest| {
            let name: String = rest
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            (!name.is_empty()).then_some(name)
        })
        .collect()
}

struct GpuTexture {
    #[allow(unused)]
    texture: Texture,
    bind_group: wgpu::BindGroup,
}

enum Resource {
    Font { desc: FontDesc, valid: bool },
    Effect(Box<Effect>),
    Layout(VertexLayoutKind),
    VertexBuffer(wgpu::Buffer),
    Sprite,
    Texture(Box<GpuTexture>),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    effect: u64,
    technique: String,
    layout: VertexLayoutKind,
    fill: FillMode,
}

struct DrawCommand {
    pipeline: PipelineKey,
    uniform: usize,
    texture: Option<u64>,
    streams: Vec<u64>,
    vertices: Range<u32>,
}

struct Scene {
    frame: Option<wgpu::SurfaceTexture>,
    clear: [f32; 4],
    uniforms: Vec<EffectUniforms>,
    last_snapshot: Option<(u64, u64)>,
    draws: Vec<DrawCommand>,
    text: Vec<TextRun>,
}

enum RenderTarget {
    Surface {
        window: Arc<Window>,
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    },
    Offscreen {
        texture: wgpu::Texture,
        size: [u32; 2],
    },
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    caps: DeviceCaps,
    target: RenderTarget,
    color_format: wgpu::TextureFormat,
    depth: Texture,
    supports_wireframe: bool,
    next_id: u64,
    resources: HashMap<u64, Resource>,
    texture_layout: wgpu::BindGroupLayout,
    uniform_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    uniform_stride: u64,
    uniform_capacity: u64,
    default_texture: GpuTexture,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    fill: FillMode,
    layout: Option<VertexLayoutKind>,
    streams: [Option<u64>; MAX_STREAMS],
    active_effect: Option<u64>,
    scene: Option<Scene>,
    #[cfg(feature = "ui")]
    overlay: TextOverlay,
}

impl std::fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuDevice")
            .field("caps", &self.caps)
            .field("format", &self.color_format)
            .field("resources", &self.resources.len())
            .field("pipelines", &self.pipelines.len())
            .finish_non_exhaustive()
    }
}

async fn request_device(
    instance: &wgpu::Instance,
    surface: Option<&wgpu::Surface<'static>>,
) -> anyhow::Result<(wgpu::Adapter, wgpu::Device, wgpu::Queue)> {
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: surface,
            force_fallback_adapter: false,
        })
        .await
        .map_err(|e| anyhow::anyhow!("no suitable graphics adapter: {}", e))?;

    let required_features = adapter.features() & wgpu::Features::POLYGON_MODE_LINE;
    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some("crowd device"),
            required_features,
            required_limits: wgpu::Limits::default(),
            experimental_features: Default::default(),
            memory_hints: Default::default(),
            trace: wgpu::Trace::Off,
        })
        .await
        .map_err(|e| anyhow::anyhow!("failed to create logical device: {}", e))?;

    device.on_uncaptured_error(Arc::new(|e| {
        log::error!("uncaptured wgpu error: {e:?}");
    }));
    Ok((adapter, device, queue))
}

fn caps_for(adapter: &wgpu::Adapter, format: wgpu::TextureFormat) -> DeviceCaps {
    let info = adapter.get_info();
    let shader_model = if adapter.get_downlevel_capabilities().is_webgpu_compliant() {
        (3, 0)
    } else {
        (2, 0)
    };
    DeviceCaps {
        adapter_name: info.name,
        pixel_shader_version: shader_model,
        vertex_shader_version: shader_model,
        hardware_transform_and_light: info.device_type != wgpu::DeviceType::Cpu,
        post_pixel_shader_blending: adapter
            .get_texture_format_features(format)
            .flags
            .contains(wgpu::TextureFormatFeatureFlags::BLENDABLE),
    }
}

fn uniform_buffer(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("effect uniforms"),
        size,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn uniform_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    buffer: &wgpu::Buffer,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer,
                offset: 0,
                size: wgpu::BufferSize::new(std::mem::size_of::<EffectUniforms>() as u64),
            }),
        }],
        label: Some("effect_uniform_bind_group"),
    })
}

fn texture_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    texture: &Texture,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&texture.view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&texture.sampler),
            },
        ],
        label: Some("diffuse_bind_group"),
    })
}

impl WgpuDevice {
    /// A device presenting to `window`.
    pub async fn new(window: Arc<Window>) -> anyhow::Result<Self> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..wgpu::InstanceDescriptor::new_without_display_handle()
        });
        let surface = instance.create_surface(window.clone())?;
        let (adapter, device, queue) = request_device(&instance, Some(&surface)).await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| anyhow::anyhow!("surface reports no formats"))?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: surface_caps.present_modes[0],
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let caps = caps_for(&adapter, surface_format);
        let target = RenderTarget::Surface {
            window,
            surface,
            config,
        };
        Ok(Self::with_target(device, queue, caps, target, surface_format, [size.width, size.height]))
    }

    /// A device rendering into a texture that can be read back with
    /// [`WgpuDevice::read_pixels`].
    pub async fn new_offscreen(width: u32, height: u32) -> anyhow::Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..wgpu::InstanceDescriptor::new_without_display_handle()
        });
        let (adapter, device, queue) = request_device(&instance, None).await?;
        let caps = caps_for(&adapter, OFFSCREEN_FORMAT);
        let size = [width.max(1), height.max(1)];
        let texture = Self::offscreen_texture(&device, size);
        let target = RenderTarget::Offscreen { texture, size };
        Ok(Self::with_target(device, queue, caps, target, OFFSCREEN_FORMAT, size))
    }

    fn offscreen_texture(device: &wgpu::Device, size: [u32; 2]) -> wgpu::Texture {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen target"),
            size: wgpu::Extent3d {
                width: size[0],
                height: size[1],
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OFFSCREEN_FORMAT,
            usage: wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        })
    }

    fn with_target(
        device: wgpu::Device,
        queue: wgpu::Queue,
        caps: DeviceCaps,
        target: RenderTarget,
        color_format: wgpu::TextureFormat,
        size: [u32; 2],
    ) -> Self {
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(
                        std::mem::size_of::<EffectUniforms>() as u64,
                    ),
                },
                count: None,
            }],
            label: Some("effect_uniform_layout"),
        });
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
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
            label: Some("diffuse_texture_layout"),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("crowd pipeline layout"),
            bind_group_layouts: &[Some(&uniform_layout), Some(&texture_layout)],
            immediate_size: 0,
        });

        let alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        let uniform_stride = (std::mem::size_of::<EffectUniforms>() as u64).div_ceil(alignment) * alignment;
        let uniform_capacity = uniform_stride * 64;
        let uniform_buffer = uniform_buffer(&device, uniform_capacity);
        let uniform_bind_group = uniform_bind_group(&device, &uniform_layout, &uniform_buffer);

        let white = Texture::create_solid(&device, &queue, [255, 255, 255, 255], "default texture");
        let default_texture = GpuTexture {
            bind_group: texture_bind_group(&device, &texture_layout, &white),
            texture: white,
        };
        let depth = Texture::create_depth_texture(&device, size, "depth_texture");
        let supports_wireframe = device.features().contains(wgpu::Features::POLYGON_MODE_LINE);
        #[cfg(feature = "ui")]
        let overlay = TextOverlay::new(&device, &queue, color_format);

        log::info!(
            "wgpu device ready on {} ({:?}, wireframe {})",
            caps.adapter_name,
            color_format,
            if supports_wireframe { "supported" } else { "unsupported" }
        );

        Self {
            device,
            queue,
            caps,
            target,
            color_format,
            depth,
            supports_wireframe,
            next_id: 1,
            resources: HashMap::new(),
            texture_layout,
            uniform_layout,
            pipeline_layout,
            uniform_buffer,
            uniform_bind_group,
            uniform_stride,
            uniform_capacity,
            default_texture,
            pipelines: HashMap::new(),
            fill: FillMode::Solid,
            layout: None,
            streams: [None; MAX_STREAMS],
            active_effect: None,
            scene: None,
            #[cfg(feature = "ui")]
            overlay,
        }
    }

    pub fn back_buffer(&self) -> BackBufferDesc {
        match &self.target {
            RenderTarget::Surface { config, .. } => BackBufferDesc {
                width: config.width,
                height: config.height,
            },
            RenderTarget::Offscreen { size, .. } => BackBufferDesc {
                width: size[0],
                height: size[1],
            },
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        match &mut self.target {
            RenderTarget::Surface {
                surface, config, ..
            } => {
                config.width = width;
                config.height = height;
                surface.configure(&self.device, config);
            }
            RenderTarget::Offscreen { texture, size } => {
                *size = [width, height];
                *texture = Self::offscreen_texture(&self.device, *size);
            }
        }
        self.depth = Texture::create_depth_texture(&self.device, [width, height], "depth_texture");
    }

    /// Number of live resources of `kind`.
    pub fn live_resources(&self, kind: ResourceKind) -> usize {
        self.resources
            .values()
            .filter(|r| Self::kind_of(r) == kind)
            .count()
    }

    fn kind_of(resource: &Resource) -> ResourceKind {
        match resource {
            Resource::Font { .. } => ResourceKind::Font,
            Resource::Effect(_) => ResourceKind::Effect,
            Resource::Layout(_) => ResourceKind::VertexLayout,
            Resource::VertexBuffer(_) => ResourceKind::VertexBuffer,
            Resource::Sprite => ResourceKind::Sprite,
            Resource::Texture(_) => ResourceKind::Texture,
        }
    }

    fn insert(&mut self, resource: Resource) -> ResourceHandle {
        let id = self.next_id;
        self.next_id += 1;
        let handle = ResourceHandle::new(id, Self::kind_of(&resource));
        self.resources.insert(id, resource);
        handle
    }

    fn effect_mut(&mut self, handle: ResourceHandle) -> Result<&mut Effect, DeviceError> {
        match self.resources.get_mut(&handle.id()) {
            Some(Resource::Effect(effect)) => Ok(&mut **effect),
            _ => Err(DeviceError::UnknownHandle(handle)),
        }
    }

    fn ensure_pipeline(&mut self, key: &PipelineKey) -> Result<(), DeviceError> {
        if self.pipelines.contains_key(key) {
            return Ok(());
        }
        let Some(Resource::Effect(effect)) = self.resources.get(&key.effect) else {
            return Err(DeviceError::UnknownHandle(ResourceHandle::new(
                key.effect,
                ResourceKind::Effect,
            )));
        };
        log::debug!(
            "building pipeline {} / {:?} / {:?} for {}",
            key.technique,
            key.layout,
            key.fill,
            effect.path.display()
        );
        let pipeline = mk_render_pipeline(
            &self.device,
            &self.pipeline_layout,
            self.color_format,
            key.fill,
            &vertex_layouts(key.layout),
            &effect.module,
            &EntryPoints::for_technique(&key.technique),
        );
        self.pipelines.insert(key.clone(), pipeline);
        Ok(())
    }

    fn grow_uniforms(&mut self, needed: u64) {
        if needed <= self.uniform_capacity {
            return;
        }
        let capacity = needed.next_power_of_two();
        log::debug!("growing effect uniform buffer to {} bytes", capacity);
        self.uniform_buffer = uniform_buffer(&self.device, capacity);
        self.uniform_bind_group =
            uniform_bind_group(&self.device, &self.uniform_layout, &self.uniform_buffer);
        self.uniform_capacity = capacity;
    }

    /// Draws the queued text over `view` in its own pass.
    #[cfg(feature = "ui")]
    fn draw_overlay(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
        text: &[TextRun],
    ) -> Result<(), DeviceError> {
        let BackBufferDesc { width, height } = self.back_buffer();
        if !self
            .overlay
            .prepare(&self.device, &self.queue, [width, height], text)?
        {
            return Ok(());
        }
        let mut text_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Text Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
            multiview_mask: None,
        });
        self.overlay.render(&mut text_pass)
    }

    /// Copies the last rendered offscreen frame into an image.
    pub fn read_pixels(&self) -> anyhow::Result<image::RgbaImage> {
        let RenderTarget::Offscreen { texture, size } = &self.target else {
            anyhow::bail!("only offscreen devices can be read back");
        };
        let [width, height] = *size;
        let unpadded = 4 * width;
        let padded = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            size: (padded * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            label: Some("readback"),
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &output_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        let buffer_slice = output_buffer.slice(..);
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: Some(Duration::from_secs(3)),
            })
            .map_err(|e| anyhow::anyhow!("device poll failed: {:?}", e))?;
        futures::executor::block_on(rx.receive())
            .ok_or_else(|| anyhow::anyhow!("readback was cancelled"))??;

        let data = buffer_slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded * height) as usize);
        for row in data.chunks(padded as usize) {
            pixels.extend_from_slice(&row[..unpadded as usize]);
        }
        drop(data);
        output_buffer.unmap();
        image::RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow::anyhow!("readback size mismatch"))
    }

    fn execute(&mut self, scene: Scene) -> Result<(), DeviceError> {
        let stride = self.uniform_stride;
        self.grow_uniforms(scene.uniforms.len().max(1) as u64 * stride);
        let size = std::mem::size_of::<EffectUniforms>();
        let mut bytes = vec![0u8; scene.uniforms.len() * stride as usize];
        for (i, uniforms) in scene.uniforms.iter().enumerate() {
            let start = i * stride as usize;
            bytes[start..start + size].copy_from_slice(bytemuck::bytes_of(uniforms));
        }
        if !bytes.is_empty() {
            self.queue.write_buffer(&self.uniform_buffer, 0, &bytes);
        }

        let view = match (&scene.frame, &self.target) {
            (Some(frame), _) => frame
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default()),
            (None, RenderTarget::Offscreen { texture, .. }) => {
                texture.create_view(&wgpu::TextureViewDescriptor::default())
            }
            (None, RenderTarget::Surface { .. }) => return Err(DeviceError::NotRecording),
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });
        {
            let [r, g, b, a] = scene.clear;
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: r as f64,
                            g: g as f64,
                            b: b as f64,
                            a: a as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
                multiview_mask: None,
            });

            for draw in &scene.draws {
                let Some(pipeline) = self.pipelines.get(&draw.pipeline) else {
                    continue;
                };
                render_pass.set_pipeline(pipeline);
                let offset = (draw.uniform as u64 * stride) as wgpu::DynamicOffset;
                render_pass.set_bind_group(0, &self.uniform_bind_group, &[offset]);
                let texture = match draw.texture.and_then(|id| self.resources.get(&id)) {
                    Some(Resource::Texture(texture)) => &texture.bind_group,
                    _ => &self.default_texture.bind_group,
                };
                render_pass.set_bind_group(1, texture, &[]);
                for (slot, id) in draw.streams.iter().enumerate() {
                    if let Some(Resource::VertexBuffer(buffer)) = self.resources.get(id) {
                        render_pass.set_vertex_buffer(slot as u32, buffer.slice(..));
                    }
                }
                render_pass.draw(draw.vertices.clone(), 0..1);
            }
        }
        for run in &scene.text {
            log::trace!("text at {:?}: {}", run.position, run.text);
        }
        #[cfg(feature = "ui")]
        self.draw_overlay(&mut encoder, &view, &scene.text)?;

        self.queue.submit(std::iter::once(encoder.finish()));
        if let Some(frame) = scene.frame {
            if let RenderTarget::Surface { window, .. } = &self.target {
                window.pre_present_notify();
            }
            frame.present();
        }
        #[cfg(feature = "ui")]
        self.overlay.trim();
        Ok(())
    }
}

impl GraphicsDevice for WgpuDevice {
    fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    fn create_font(&mut self, desc: &FontDesc) -> Result<ResourceHandle, DeviceError> {
        Ok(self.insert(Resource::Font {
            desc: desc.clone(),
            valid: true,
        }))
    }

    fn create_effect(&mut self, path: &Path) -> Result<ResourceHandle, DeviceError> {
        let source = load_string(path).map_err(|e| DeviceError::Asset {
            path: path.to_path_buf(),
            details: format!("{e:#}"),
        })?;
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: path.to_str(),
                source: wgpu::ShaderSource::Wgsl(source.as_str().into()),
            });
        let info = futures::executor::block_on(module.get_compilation_info());
        let errors: Vec<String> = info
            .messages
            .iter()
            .filter(|m| matches!(m.message_type, wgpu::CompilationMessageType::Error))
            .map(|m| m.message.clone())
            .collect();
        if !errors.is_empty() {
            return Err(DeviceError::EffectCompile {
                path: path.to_path_buf(),
                details: errors.join("; "),
            });
        }

        let entry_points = declared_functions(&source);
        log::debug!(
            "compiled effect {} with {} functions",
            path.display(),
            entry_points.len()
        );
        Ok(self.insert(Resource::Effect(Box::new(Effect {
            path: path.to_path_buf(),
            module,
            entry_points,
            technique: None,
            pending: EffectParams::default(),
            committed: EffectParams::default(),
            version: 0,
            state: EffectState::Idle,
            valid: true,
        }))))
    }

    fn create_vertex_layout(
        &mut self,
        kind: VertexLayoutKind,
    ) -> Result<ResourceHandle, DeviceError> {
        Ok(self.insert(Resource::Layout(kind)))
    }

    fn create_vertex_buffer(&mut self, size: u64) -> Result<ResourceHandle, DeviceError> {
        if size == 0 {
            return Err(DeviceError::Creation {
                kind: "vertex buffer",
                details: "size must not be zero".to_string(),
            });
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("vertex buffer"),
            size: size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Ok(self.insert(Resource::VertexBuffer(buffer)))
    }

    fn create_sprite(&mut self) -> Result<ResourceHandle, DeviceError> {
        Ok(self.insert(Resource::Sprite))
    }

    fn create_texture(&mut self, path: &Path) -> Result<ResourceHandle, DeviceError> {
        let texture = load_texture(path, &self.device, &self.queue).map_err(|e| DeviceError::Asset {
            path: path.to_path_buf(),
            details: format!("{e:#}"),
        })?;
        let bind_group = texture_bind_group(&self.device, &self.texture_layout, &texture);
        Ok(self.insert(Resource::Texture(Box::new(GpuTexture {
            texture,
            bind_group,
        }))))
    }

    fn release(&mut self, handle: ResourceHandle) -> Result<(), DeviceError> {
        match self.resources.get(&handle.id()) {
            Some(resource) if Self::kind_of(resource) == handle.kind() => {}
            _ => return Err(DeviceError::UnknownHandle(handle)),
        }
        self.resources.remove(&handle.id());
        match handle.kind() {
            ResourceKind::Effect => {
                self.pipelines.retain(|key, _| key.effect != handle.id());
                if self.active_effect == Some(handle.id()) {
                    self.active_effect = None;
                }
            }
            ResourceKind::VertexBuffer => {
                for stream in self.streams.iter_mut() {
                    if *stream == Some(handle.id()) {
                        *stream = None;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn invalidate(&mut self, handle: ResourceHandle) {
        match self.resources.get_mut(&handle.id()) {
            Some(Resource::Font { valid, .. }) => *valid = false,
            Some(Resource::Effect(effect)) => {
                effect.valid = false;
                effect.state = EffectState::Idle;
            }
            _ => {}
        }
    }

    fn restore(&mut self, handle: ResourceHandle) -> Result<(), DeviceError> {
        match self.resources.get_mut(&handle.id()) {
            Some(Resource::Font { valid, .. }) => *valid = true,
            Some(Resource::Effect(effect)) => effect.valid = true,
            Some(_) => {}
            None => return Err(DeviceError::UnknownHandle(handle)),
        }
        Ok(())
    }

    fn write_vertex_buffer(
        &mut self,
        buffer: ResourceHandle,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let Some(Resource::VertexBuffer(target)) = self.resources.get(&buffer.id()) else {
            return Err(DeviceError::UnknownHandle(buffer));
        };
        if data.len() as u64 > target.size() {
            return Err(DeviceError::BufferOverflow {
                size: target.size(),
                len: data.len(),
            });
        }
        self.queue.write_buffer(target, 0, data);
        Ok(())
    }

    fn begin_scene(&mut self, clear: [f32; 4]) -> Result<bool, DeviceError> {
        if self.scene.is_some() {
            return Err(DeviceError::SceneInProgress);
        }
        let frame = match &self.target {
            RenderTarget::Offscreen { .. } => None,
            RenderTarget::Surface {
                surface, config, ..
            } => match surface.get_current_texture() {
                wgpu::CurrentSurfaceTexture::Success(frame)
                | wgpu::CurrentSurfaceTexture::Suboptimal(frame) => Some(frame),
                wgpu::CurrentSurfaceTexture::Lost | wgpu::CurrentSurfaceTexture::Outdated => {
                    log::debug!("surface lost or outdated, reconfiguring");
                    surface.configure(&self.device, config);
                    return Ok(false);
                }
                wgpu::CurrentSurfaceTexture::Timeout => {
                    log::warn!("timed out waiting for the next frame");
                    return Ok(false);
                }
                e @ (wgpu::CurrentSurfaceTexture::Occluded
                | wgpu::CurrentSurfaceTexture::Validation) => {
                    return Err(DeviceError::Surface(format!("{e:?}")));
                }
            },
        };
        self.scene = Some(Scene {
            frame,
            clear,
            uniforms: Vec::new(),
            last_snapshot: None,
            draws: Vec::new(),
            text: Vec::new(),
        });
        Ok(true)
    }

    fn end_scene(&mut self) -> Result<(), DeviceError> {
        let scene = self.scene.take().ok_or(DeviceError::NotRecording)?;
        self.execute(scene)
    }

    fn set_fill_mode(&mut self, mode: FillMode) {
        if mode == FillMode::Wireframe && !self.supports_wireframe && self.fill != mode {
            log::warn!("wireframe requested but the adapter cannot draw lines");
        }
        self.fill = mode;
    }

    fn set_vertex_layout(&mut self, layout: ResourceHandle) -> Result<(), DeviceError> {
        match self.resources.get(&layout.id()) {
            Some(Resource::Layout(kind)) => {
                self.layout = Some(*kind);
                Ok(())
            }
            _ => Err(DeviceError::UnknownHandle(layout)),
        }
    }

    fn set_stream_source(
        &mut self,
        slot: u32,
        buffer: ResourceHandle,
        _stride: u32,
    ) -> Result<(), DeviceError> {
        if !matches!(self.resources.get(&buffer.id()), Some(Resource::VertexBuffer(_))) {
            return Err(DeviceError::UnknownHandle(buffer));
        }
        let stream = self
            .streams
            .get_mut(slot as usize)
            .ok_or_else(|| DeviceError::Creation {
                kind: "stream binding",
                details: format!("slot {} exceeds {} streams", slot, MAX_STREAMS),
            })?;
        *stream = Some(buffer.id());
        Ok(())
    }

    fn set_technique(
        &mut self,
        effect: ResourceHandle,
        technique: &str,
    ) -> Result<(), DeviceError> {
        let effect = self.effect_mut(effect)?;
        let entry = EntryPoints::for_technique(technique);
        if !effect.entry_points.contains(&entry.vertex) || !effect.entry_points.contains(&entry.fragment) {
            return Err(DeviceError::UnknownTechnique(technique.to_string()));
        }
        effect.technique = Some(technique.to_string());
        Ok(())
    }

    fn set_effect_param(
        &mut self,
        effect: ResourceHandle,
        name: &str,
        value: EffectValue,
    ) -> Result<(), DeviceError> {
        self.effect_mut(effect)?.pending.set(name, value)
    }

    fn begin_effect(&mut self, handle: ResourceHandle) -> Result<u32, DeviceError> {
        if self.active_effect.is_some() {
            return Err(DeviceError::NotRecording);
        }
        let effect = self.effect_mut(handle)?;
        if !effect.valid {
            return Err(DeviceError::Invalidated(handle));
        }
        let Some(technique) = &effect.technique else {
            return Err(DeviceError::UnknownTechnique(String::new()));
        };
        log::trace!("begin effect {} / {}", effect.path.display(), technique);
        effect.state = EffectState::Begun;
        self.active_effect = Some(handle.id());
        Ok(1)
    }

    fn begin_pass(&mut self, handle: ResourceHandle, pass: u32) -> Result<(), DeviceError> {
        let effect = self.effect_mut(handle)?;
        if effect.state != EffectState::Begun || pass != 0 {
            return Err(DeviceError::NotRecording);
        }
        effect.committed = effect.pending.clone();
        effect.version += 1;
        effect.state = EffectState::InPass;
        Ok(())
    }

    fn commit_changes(&mut self, handle: ResourceHandle) -> Result<(), DeviceError> {
        let effect = self.effect_mut(handle)?;
        if effect.state != EffectState::InPass {
            return Err(DeviceError::NotRecording);
        }
        if effect.committed != effect.pending {
            effect.committed = effect.pending.clone();
            effect.version += 1;
        }
        Ok(())
    }

    fn end_pass(&mut self, handle: ResourceHandle) -> Result<(), DeviceError> {
        let effect = self.effect_mut(handle)?;
        if effect.state != EffectState::InPass {
            return Err(DeviceError::NotRecording);
        }
        effect.state = EffectState::Begun;
        Ok(())
    }

    fn end_effect(&mut self, handle: ResourceHandle) -> Result<(), DeviceError> {
        let effect = self.effect_mut(handle)?;
        if effect.state != EffectState::Begun {
            return Err(DeviceError::NotRecording);
        }
        effect.state = EffectState::Idle;
        self.active_effect = None;
        Ok(())
    }

    fn draw_triangles(
        &mut self,
        first_vertex: u32,
        vertex_count: u32,
    ) -> Result<(), DeviceError> {
        if self.scene.is_none() {
            return Err(DeviceError::NotRecording);
        }
        let effect_id = self.active_effect.ok_or(DeviceError::NotRecording)?;
        let layout = self.layout.ok_or(DeviceError::NotRecording)?;
        let mut streams = Vec::with_capacity(MAX_STREAMS);
        for slot in 0..layout.stream_strides().len() {
            streams.push(self.streams[slot].ok_or(DeviceError::NotRecording)?);
        }
        let fill = if self.supports_wireframe {
            self.fill
        } else {
            FillMode::Solid
        };

        let handle = ResourceHandle::new(effect_id, ResourceKind::Effect);
        let effect = self.effect_mut(handle)?;
        if effect.state != EffectState::InPass {
            return Err(DeviceError::NotRecording);
        }
        let technique = effect.technique.clone().unwrap_or_default();
        let version = effect.version;
        let snapshot = effect.committed.uniforms();
        let texture = effect.committed.texture;
        if let Some(texture) = texture {
            if !matches!(self.resources.get(&texture.id()), Some(Resource::Texture(_))) {
                return Err(DeviceError::UnknownHandle(texture));
            }
        }

        let key = PipelineKey {
            effect: effect_id,
            technique,
            layout,
            fill,
        };
        self.ensure_pipeline(&key)?;

        let scene = self.scene.as_mut().ok_or(DeviceError::NotRecording)?;
        let uniform = match scene.last_snapshot {
            Some((id, v)) if id == effect_id && v == version => scene.uniforms.len() - 1,
            _ => {
                scene.uniforms.push(snapshot);
                scene.last_snapshot = Some((effect_id, version));
                scene.uniforms.len() - 1
            }
        };
        scene.draws.push(DrawCommand {
            pipeline: key,
            uniform,
            texture: texture.map(|t| t.id()),
            streams,
            vertices: first_vertex..first_vertex + vertex_count,
        });
        Ok(())
    }

    fn draw_text(
        &mut self,
        font: ResourceHandle,
        sprite: ResourceHandle,
        position: [i32; 2],
        color: [f32; 4],
        text: &str,
    ) -> Result<(), DeviceError> {
        let desc = match self.resources.get(&font.id()) {
            Some(Resource::Font { valid: true, desc }) => desc,
            Some(Resource::Font { valid: false, .. }) => return Err(DeviceError::Invalidated(font)),
            _ => return Err(DeviceError::UnknownHandle(font)),
        };
        if !matches!(self.resources.get(&sprite.id()), Some(Resource::Sprite)) {
            return Err(DeviceError::UnknownHandle(sprite));
        }
        let run = TextRun {
            text: text.to_string(),
            position,
            color,
            family: desc.family.clone(),
            height: desc.height,
            bold: desc.bold,
        };
        let scene = self.scene.as_mut().ok_or(DeviceError::NotRecording)?;
        scene.text.push(run);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_find_entry_points_in_wgsl() {
        let functions = declared_functions(
            "fn helper() {}\n@vertex\nfn vs_no_light(@location(0) p: vec3<f32>) {}\n@fragment fn fs_no_light() {}",
        );
        assert!(functions.contains("vs_no_light"));
        assert!(functions.contains("fs_no_light"));
        assert!(functions.contains("helper"));
    }

    #[test]
    fn should_reject_mismatched_parameter_types() {
        let mut p = EffectParams::default();
        assert!(p.set(params::AMBIENT, EffectValue::Float(0.3)).is_ok());
        assert!(matches!(
            p.set(params::WORLD, EffectValue::Bool(true)),
            Err(DeviceError::UnknownParameter(_))
        ));
        assert!(p
            .set(params::BONE_PALETTE, EffectValue::MatrixArray(vec![Matrix4::identity(); MAX_BONES + 1]))
            .is_err());
    }

    #[test]
    fn should_pack_lighting_constants() {
        let mut p = EffectParams::default();
        p.set(params::AMBIENT, EffectValue::Float(0.3)).unwrap();
        p.set(params::DIFFUSE, EffectValue::Float(0.8)).unwrap();
        p.set(params::DIFFUSE_ENABLED, EffectValue::Bool(false)).unwrap();
        let uniforms = p.uniforms();
        assert_eq!(uniforms.lighting[0], 0.3);
        assert_eq!(uniforms.lighting[1], 0.8);
        assert_eq!(uniforms.lighting[2], 0.0);
        assert_eq!(std::mem::size_of::<EffectUniforms>(), 432);
    }
}
