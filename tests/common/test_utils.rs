#![allow(dead_code)]

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    rc::Rc,
    sync::Arc,
};

use flow_crowd::{
    config::AppConfig,
    device::{
        BackBufferDesc, DeviceCaps, EffectValue, FillMode, FontDesc, GraphicsDevice,
        ResourceHandle, ResourceKind, VertexLayoutKind, params,
    },
    error::{CrowdError, DeviceError, ModelError},
    gui::SettingsPanel,
    model::{
        CharacterModel, DrawContext, LodSettings, MeshUpdateMode, ModelFactory, Playback,
        UpdateFlags,
    },
    session::CrowdSession,
    skinning::SkinningMode,
    streaming::StreamingSubsystem,
};

pub const BACK_BUFFER: BackBufferDesc = BackBufferDesc {
    width: 800,
    height: 600,
};

pub const MODEL_VERTICES: u32 = 36;

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Create(ResourceKind),
    Release(ResourceHandle),
    Invalidate(ResourceHandle),
    Restore(ResourceHandle),
    WriteBuffer(usize),
    BeginScene,
    EndScene,
    FillMode(FillMode),
    VertexLayout(VertexLayoutKind),
    StreamSource { slot: u32, stride: u32 },
    Technique(String),
    Param(String),
    BeginEffect,
    BeginPass(u32),
    Commit,
    EndPass,
    EndEffect,
    Draw { first: u32, count: u32 },
    Text(String),
}

/// A [`GraphicsDevice`] that keeps track of live handles and logs every call.
pub struct RecordingDevice {
    pub caps: DeviceCaps,
    next_id: u64,
    live: HashMap<u64, ResourceKind>,
    layouts: HashMap<u64, VertexLayoutKind>,
    invalidated: HashSet<u64>,
    calls: Vec<Call>,
    /// Creating a resource of this kind fails.
    pub fail_kind: Option<ResourceKind>,
    /// Returned by `begin_scene`.
    pub scene_available: bool,
    in_scene: bool,
    in_pass: bool,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self {
            caps: DeviceCaps {
                adapter_name: "recording".to_string(),
                pixel_shader_version: (3, 0),
                vertex_shader_version: (3, 0),
                hardware_transform_and_light: true,
                post_pixel_shader_blending: true,
            },
            next_id: 1,
            live: HashMap::new(),
            layouts: HashMap::new(),
            invalidated: HashSet::new(),
            calls: Vec::new(),
            fail_kind: None,
            scene_available: true,
            in_scene: false,
            in_pass: false,
        }
    }

    pub fn live(&self, kind: ResourceKind) -> usize {
        self.live.values().filter(|k| **k == kind).count()
    }

    pub fn live_total(&self) -> usize {
        self.live.len()
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| predicate(c)).count()
    }

    pub fn param_sets(&self, name: &str) -> usize {
        self.count(|c| *c == Call::Param(name.to_string()))
    }

    pub fn draws(&self) -> usize {
        self.count(|c| matches!(c, Call::Draw { .. }))
    }

    fn create(&mut self, kind: ResourceKind) -> Result<ResourceHandle, DeviceError> {
        self.calls.push(Call::Create(kind));
        if self.fail_kind == Some(kind) {
            return Err(DeviceError::Creation {
                kind: kind.name(),
                details: "injected failure".to_string(),
            });
        }
        let id = self.next_id;
        self.next_id += 1;
        self.live.insert(id, kind);
        Ok(ResourceHandle::new(id, kind))
    }

    fn check_live(&self, handle: ResourceHandle) -> Result<(), DeviceError> {
        match self.live.get(&handle.id()) {
            Some(kind) if *kind == handle.kind() => Ok(()),
            _ => Err(DeviceError::UnknownHandle(handle)),
        }
    }
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsDevice for RecordingDevice {
    fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    fn create_font(&mut self, _desc: &FontDesc) -> Result<ResourceHandle, DeviceError> {
        self.create(ResourceKind::Font)
    }

    fn create_effect(&mut self, path: &Path) -> Result<ResourceHandle, DeviceError> {
        self.create(ResourceKind::Effect).map_err(|_| DeviceError::EffectCompile {
            path: path.to_path_buf(),
            details: "injected failure".to_string(),
        })
    }

    fn create_vertex_layout(
        &mut self,
        kind: VertexLayoutKind,
    ) -> Result<ResourceHandle, DeviceError> {
        let handle = self.create(ResourceKind::VertexLayout)?;
        self.layouts.insert(handle.id(), kind);
        Ok(handle)
    }

    fn create_vertex_buffer(&mut self, _size: u64) -> Result<ResourceHandle, DeviceError> {
        self.create(ResourceKind::VertexBuffer)
    }

    fn create_sprite(&mut self) -> Result<ResourceHandle, DeviceError> {
        self.create(ResourceKind::Sprite)
    }

    fn create_texture(&mut self, _path: &Path) -> Result<ResourceHandle, DeviceError> {
        self.create(ResourceKind::Texture)
    }

    fn release(&mut self, handle: ResourceHandle) -> Result<(), DeviceError> {
        self.calls.push(Call::Release(handle));
        self.check_live(handle)?;
        self.live.remove(&handle.id());
        self.invalidated.remove(&handle.id());
        Ok(())
    }

    fn invalidate(&mut self, handle: ResourceHandle) {
        self.calls.push(Call::Invalidate(handle));
        self.invalidated.insert(handle.id());
    }

    fn restore(&mut self, handle: ResourceHandle) -> Result<(), DeviceError> {
        self.calls.push(Call::Restore(handle));
        self.check_live(handle)?;
        self.invalidated.remove(&handle.id());
        Ok(())
    }

    fn write_vertex_buffer(
        &mut self,
        buffer: ResourceHandle,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        self.check_live(buffer)?;
        self.calls.push(Call::WriteBuffer(data.len()));
        Ok(())
    }

    fn begin_scene(&mut self, _clear: [f32; 4]) -> Result<bool, DeviceError> {
        if self.in_scene {
            return Err(DeviceError::SceneInProgress);
        }
        self.calls.push(Call::BeginScene);
        self.in_scene = self.scene_available;
        Ok(self.scene_available)
    }

    fn end_scene(&mut self) -> Result<(), DeviceError> {
        if !self.in_scene {
            return Err(DeviceError::NotRecording);
        }
        self.calls.push(Call::EndScene);
        self.in_scene = false;
        Ok(())
    }

    fn set_fill_mode(&mut self, mode: FillMode) {
        self.calls.push(Call::FillMode(mode));
    }

    fn set_vertex_layout(&mut self, layout: ResourceHandle) -> Result<(), DeviceError> {
        self.check_live(layout)?;
        let kind = self.layouts[&layout.id()];
        self.calls.push(Call::VertexLayout(kind));
        Ok(())
    }

    fn set_stream_source(
        &mut self,
        slot: u32,
        buffer: ResourceHandle,
        stride: u32,
    ) -> Result<(), DeviceError> {
        self.check_live(buffer)?;
        self.calls.push(Call::StreamSource { slot, stride });
        Ok(())
    }

    fn set_technique(
        &mut self,
        effect: ResourceHandle,
        technique: &str,
    ) -> Result<(), DeviceError> {
        self.check_live(effect)?;
        self.calls.push(Call::Technique(technique.to_string()));
        Ok(())
    }

    fn set_effect_param(
        &mut self,
        effect: ResourceHandle,
        name: &str,
        value: EffectValue,
    ) -> Result<(), DeviceError> {
        self.check_live(effect)?;
        if let EffectValue::Texture(texture) = value {
            self.check_live(texture)?;
        }
        self.calls.push(Call::Param(name.to_string()));
        Ok(())
    }

    fn begin_effect(&mut self, effect: ResourceHandle) -> Result<u32, DeviceError> {
        self.check_live(effect)?;
        if self.invalidated.contains(&effect.id()) {
            return Err(DeviceError::Invalidated(effect));
        }
        self.calls.push(Call::BeginEffect);
        Ok(1)
    }

    fn begin_pass(&mut self, _effect: ResourceHandle, pass: u32) -> Result<(), DeviceError> {
        self.calls.push(Call::BeginPass(pass));
        self.in_pass = true;
        Ok(())
    }

    fn commit_changes(&mut self, _effect: ResourceHandle) -> Result<(), DeviceError> {
        if !self.in_pass {
            return Err(DeviceError::NotRecording);
        }
        self.calls.push(Call::Commit);
        Ok(())
    }

    fn end_pass(&mut self, _effect: ResourceHandle) -> Result<(), DeviceError> {
        self.calls.push(Call::EndPass);
        self.in_pass = false;
        Ok(())
    }

    fn end_effect(&mut self, _effect: ResourceHandle) -> Result<(), DeviceError> {
        self.calls.push(Call::EndEffect);
        Ok(())
    }

    fn draw_triangles(
        &mut self,
        first_vertex: u32,
        vertex_count: u32,
    ) -> Result<(), DeviceError> {
        if !self.in_scene || !self.in_pass {
            return Err(DeviceError::NotRecording);
        }
        self.calls.push(Call::Draw {
            first: first_vertex,
            count: vertex_count,
        });
        Ok(())
    }

    fn draw_text(
        &mut self,
        font: ResourceHandle,
        sprite: ResourceHandle,
        _position: [i32; 2],
        _color: [f32; 4],
        text: &str,
    ) -> Result<(), DeviceError> {
        self.check_live(font)?;
        self.check_live(sprite)?;
        if !self.in_scene {
            return Err(DeviceError::NotRecording);
        }
        self.calls.push(Call::Text(text.to_string()));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FactoryLog {
    pub created: usize,
    pub released: usize,
    pub factory_released: usize,
    pub updates: usize,
    /// Asset bytes every successful `create` was handed.
    pub sources: Vec<Vec<u8>>,
}

/// A character that owns one vertex buffer and draws it in a single call.
pub struct MockModel {
    buffer: ResourceHandle,
    mode: SkinningMode,
    clip: Option<String>,
    hidden: HashSet<String>,
    log: Rc<RefCell<FactoryLog>>,
}

impl CharacterModel for MockModel {
    fn set_transform(&mut self, _world: cgmath::Matrix4<f32>) {}

    fn set_lod(&mut self, _lod: LodSettings) {}

    fn clip_names(&self) -> Vec<String> {
        ["stand", "fight", "walk", "run", "attack"]
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    fn play_animation(
        &mut self,
        clip: &str,
        _playback: Playback,
        _time_scale: f32,
    ) -> Result<(), ModelError> {
        if !self.clip_names().iter().any(|c| c == clip) {
            return Err(ModelError::ClipNotFound(clip.to_string()));
        }
        self.clip = Some(clip.to_string());
        Ok(())
    }

    fn set_part_visible(&mut self, part: &str, visible: bool) -> Result<(), ModelError> {
        if !visible {
            self.hidden.insert(part.to_string());
        }
        Ok(())
    }

    fn set_part_update_mode(
        &mut self,
        _part: &str,
        _mode: MeshUpdateMode,
    ) -> Result<(), ModelError> {
        Ok(())
    }

    fn set_skinning_mode(&mut self, mode: SkinningMode) {
        self.mode = mode;
    }

    fn skinning_mode(&self) -> SkinningMode {
        self.mode
    }

    fn update(&mut self, _time: f64, _elapsed: f32, _flags: UpdateFlags) {
        self.log.borrow_mut().updates += 1;
    }

    fn render(
        &self,
        device: &mut dyn GraphicsDevice,
        effect: ResourceHandle,
        ctx: &DrawContext,
    ) -> Result<(), ModelError> {
        if ctx.commit_shared {
            device.set_effect_param(
                effect,
                params::VIEW_PROJECTION,
                EffectValue::Matrix(ctx.view_projection()),
            )?;
        }
        device.set_effect_param(
            effect,
            params::WORLD,
            EffectValue::Matrix(cgmath::SquareMatrix::identity()),
        )?;
        device.set_stream_source(0, self.buffer, 48)?;
        device.commit_changes(effect)?;
        device.draw_triangles(0, MODEL_VERTICES)?;
        Ok(())
    }

    fn release(&mut self, device: &mut dyn GraphicsDevice) {
        let _ = device.release(self.buffer);
        self.log.borrow_mut().released += 1;
    }
}

pub struct MockFactory {
    pub log: Rc<RefCell<FactoryLog>>,
    /// Creation of the model with this index fails.
    pub fail_at: Option<usize>,
}

impl MockFactory {
    pub fn new() -> (Self, Rc<RefCell<FactoryLog>>) {
        let log = Rc::new(RefCell::new(FactoryLog::default()));
        (
            Self {
                log: log.clone(),
                fail_at: None,
            },
            log,
        )
    }

    pub fn failing_at(index: usize) -> (Self, Rc<RefCell<FactoryLog>>) {
        let (mut factory, log) = Self::new();
        factory.fail_at = Some(index);
        (factory, log)
    }
}

impl ModelFactory for MockFactory {
    fn create(
        &mut self,
        path: &Path,
        source: &[u8],
        device: &mut dyn GraphicsDevice,
    ) -> Result<Box<dyn CharacterModel>, ModelError> {
        if self.fail_at == Some(self.log.borrow().created) {
            return Err(ModelError::Load {
                path: path.to_path_buf(),
                details: "injected failure".to_string(),
            });
        }
        let buffer = device.create_vertex_buffer(1024)?;
        {
            let mut log = self.log.borrow_mut();
            log.created += 1;
            log.sources.push(source.to_vec());
        }
        Ok(Box::new(MockModel {
            buffer,
            mode: SkinningMode::Cpu,
            clip: None,
            hidden: HashSet::new(),
            log: self.log.clone(),
        }))
    }

    fn release(&mut self, _device: &mut dyn GraphicsDevice) {
        self.log.borrow_mut().factory_released += 1;
    }
}

#[derive(Debug, Default)]
pub struct StreamLog {
    pub requests: Vec<PathBuf>,
    pub loads: Vec<PathBuf>,
    pub updates: usize,
    pub shutdowns: usize,
}

pub const CHARACTER_SOURCE: &[u8] = b"texture = mannequin.png\nclips = stand fight walk run attack\n";

/// Serves one in-memory asset for every path, or nothing when `source` is `None`.
pub struct CountingStreamer {
    pub log: Rc<RefCell<StreamLog>>,
    pub source: Option<Arc<[u8]>>,
}

impl StreamingSubsystem for CountingStreamer {
    fn request(&mut self, path: &Path) {
        self.log.borrow_mut().requests.push(path.to_path_buf());
    }

    fn update(&mut self, _elapsed: f32) -> flow_crowd::error::Result<()> {
        self.log.borrow_mut().updates += 1;
        Ok(())
    }

    fn get(&self, _path: &Path) -> Option<Arc<[u8]>> {
        None
    }

    fn load_now(&mut self, path: &Path) -> flow_crowd::error::Result<Arc<[u8]>> {
        self.log.borrow_mut().loads.push(path.to_path_buf());
        self.source
            .clone()
            .ok_or_else(|| CrowdError::Streaming(format!("{} is not available", path.display())))
    }

    fn shutdown(&mut self) {
        self.log.borrow_mut().shutdowns += 1;
    }
}

pub struct Harness {
    pub session: CrowdSession,
    pub device: RecordingDevice,
    pub models: Rc<RefCell<FactoryLog>>,
    pub streams: Rc<RefCell<StreamLog>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_factory(MockFactory::new())
    }

    pub fn with_factory(factory: (MockFactory, Rc<RefCell<FactoryLog>>)) -> Self {
        Self::with_source(factory, Some(CHARACTER_SOURCE))
    }

    pub fn with_source(
        (factory, models): (MockFactory, Rc<RefCell<FactoryLog>>),
        source: Option<&[u8]>,
    ) -> Self {
        let streams = Rc::new(RefCell::new(StreamLog::default()));
        let session = CrowdSession::new(
            &AppConfig::default(),
            Box::new(factory),
            Box::new(CountingStreamer {
                log: streams.clone(),
                source: source.map(Arc::from),
            }),
            Box::new(SettingsPanel::new()),
        );
        Self {
            session,
            device: RecordingDevice::new(),
            models,
            streams,
        }
    }

    /// Brings the session to the `Reset` phase.
    pub fn started() -> Self {
        let mut harness = Self::new();
        harness.start();
        harness
    }

    pub fn start(&mut self) {
        self.session
            .on_device_created(&mut self.device, BACK_BUFFER)
            .unwrap();
        self.session
            .on_device_reset(&mut self.device, BACK_BUFFER)
            .unwrap();
    }

    pub fn frame(&mut self) -> bool {
        self.session.frame_move(1.0, 1.0 / 60.0).unwrap();
        self.device.clear_calls();
        self.session.frame_render(&mut self.device).unwrap()
    }
}
