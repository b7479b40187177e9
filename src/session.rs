//! The object that owns everything a running crowd needs.
//!
//! A [`CrowdSession`] is what the windowing adapter talks to. Device
//! notifications, frame callbacks and input all arrive here as plain method
//! calls; the session forwards them to the lifecycle tracker, the frame
//! orchestrator and the input router, and applies settings changes coming back
//! from the settings panel.

use std::path::PathBuf;

use crate::{
    camera::{CREATE_FOVY, Camera, CameraController, LOOK_SENSITIVITY, MOVE_SPEED, Projection, RESET_FOVY, Z_FAR, Z_NEAR},
    config::{AppConfig, RenderConfig},
    crowd::{CharacterInstance, CrowdGridConfig, CrowdLayoutEngine, release_crowd},
    device::{self, BackBufferDesc, DeviceCaps, DeviceSettings, GraphicsDevice},
    error::{CrowdError, Result},
    frame::{FrameOrchestrator, SceneView},
    gui::{ControlEvent, GuiLayer},
    input::{InputEvent, InputEventRouter, Routed},
    lifecycle::{DeviceLifecyclePhase, ResourceLifecycleTracker},
    model::ModelFactory,
    skinning::{SkinningMode, switch_skinning_mode},
    streaming::StreamingSubsystem,
};

pub struct CrowdSession {
    config: RenderConfig,
    tracker: ResourceLifecycleTracker,
    layout: CrowdLayoutEngine,
    crowd: Vec<CharacterInstance>,
    factory: Box<dyn ModelFactory>,
    streaming: Box<dyn StreamingSubsystem>,
    camera: Camera,
    projection: Projection,
    controller: CameraController,
    gui: Box<dyn GuiLayer>,
    router: InputEventRouter,
    frame: FrameOrchestrator,
    character_path: PathBuf,
}

impl std::fmt::Debug for CrowdSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrowdSession")
            .field("phase", &self.tracker.phase())
            .field("config", &self.config)
            .field("instances", &self.crowd.len())
            .field("camera", &self.camera)
            .finish_non_exhaustive()
    }
}

impl CrowdSession {
    pub fn new(
        config: &AppConfig,
        factory: Box<dyn ModelFactory>,
        streaming: Box<dyn StreamingSubsystem>,
        gui: Box<dyn GuiLayer>,
    ) -> Self {
        let character_path = config.character_path();
        Self {
            config: config.render.clone(),
            tracker: ResourceLifecycleTracker::new(config.resource_assets()),
            layout: CrowdLayoutEngine::new(character_path.clone(), config.layout_seed),
            crowd: Vec::new(),
            factory,
            streaming,
            camera: Camera::default(),
            projection: Projection::new(config.width, config.height, CREATE_FOVY, Z_NEAR, Z_FAR),
            controller: CameraController::new(MOVE_SPEED, LOOK_SENSITIVITY),
            gui,
            router: InputEventRouter::new(),
            frame: FrameOrchestrator::new(config.clear_color),
            character_path,
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn crowd(&self) -> &[CharacterInstance] {
        &self.crowd
    }

    pub fn tracker(&self) -> &ResourceLifecycleTracker {
        &self.tracker
    }

    pub fn phase(&self) -> DeviceLifecyclePhase {
        self.tracker.phase()
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn gui(&self) -> &dyn GuiLayer {
        self.gui.as_ref()
    }

    pub fn frame(&self) -> &FrameOrchestrator {
        &self.frame
    }

    pub fn is_device_acceptable(&self, caps: &DeviceCaps) -> Result<()> {
        device::is_device_acceptable(caps).map_err(|reason| {
            log::warn!("device rejected: {}", reason);
            CrowdError::DeviceRejected(reason)
        })
    }

    pub fn modify_device_settings(&self, settings: DeviceSettings, caps: &DeviceCaps) -> DeviceSettings {
        device::modify_device_settings(settings, caps)
    }

    /// Creates the long-lived resources and the initial crowd.
    ///
    /// A crowd that fails to build is reported, the tracker still ends up
    /// `Created` and has to be destroyed by the caller.
    pub fn on_device_created(
        &mut self,
        device: &mut dyn GraphicsDevice,
        back_buffer: BackBufferDesc,
    ) -> Result<()> {
        self.tracker.on_device_created(device, back_buffer)?;
        self.camera = Camera::default();
        self.projection = Projection::new(
            back_buffer.width,
            back_buffer.height,
            CREATE_FOVY,
            Z_NEAR,
            Z_FAR,
        );
        self.streaming.request(&self.character_path);
        self.rebuild_crowd(device)
    }

    pub fn on_device_reset(
        &mut self,
        device: &mut dyn GraphicsDevice,
        back_buffer: BackBufferDesc,
    ) -> Result<()> {
        self.tracker.on_device_reset(device, back_buffer)?;
        self.projection = Projection::new(
            back_buffer.width,
            back_buffer.height,
            RESET_FOVY,
            Z_NEAR,
            Z_FAR,
        );
        self.gui.on_resize(back_buffer);
        Ok(())
    }

    /// Walks through lost and reset for a changed back buffer.
    ///
    /// Returns `false` without touching the device when there is nothing to
    /// reset, before creation or after the session was destroyed.
    pub fn reset_device(
        &mut self,
        device: &mut dyn GraphicsDevice,
        back_buffer: BackBufferDesc,
    ) -> Result<bool> {
        match self.tracker.phase() {
            DeviceLifecyclePhase::Uninitialized | DeviceLifecyclePhase::Destroyed => {
                return Ok(false);
            }
            DeviceLifecyclePhase::Reset => self.on_device_lost(device)?,
            DeviceLifecyclePhase::Created | DeviceLifecyclePhase::Lost => {}
        }
        self.on_device_reset(device, back_buffer)?;
        Ok(true)
    }

    pub fn on_device_lost(&mut self, device: &mut dyn GraphicsDevice) -> Result<()> {
        self.tracker.on_device_lost(device)
    }

    pub fn on_device_destroyed(&mut self, device: &mut dyn GraphicsDevice) -> Result<()> {
        self.tracker.on_device_destroyed(device)?;
        release_crowd(&mut self.crowd, device);
        self.factory.release(device);
        self.streaming.shutdown();
        Ok(())
    }

    pub fn frame_move(&mut self, time: f64, elapsed: f32) -> Result<()> {
        self.frame.frame_move(
            time,
            elapsed,
            &self.config,
            &mut self.camera,
            &mut self.controller,
            &mut self.crowd,
            self.streaming.as_mut(),
        )
    }

    /// Draws a frame if the default-phase resources are available.
    pub fn frame_render(&mut self, device: &mut dyn GraphicsDevice) -> Result<bool> {
        let Some(resources) = self.tracker.frame_resources() else {
            return Ok(false);
        };
        let view = SceneView {
            camera: &self.camera,
            projection: &self.projection,
        };
        self.frame.render(
            device,
            resources,
            &self.config,
            view,
            &self.crowd,
            self.gui.as_ref(),
        )
    }

    /// Converts a window event into an [`InputEvent`] using the router's
    /// cursor tracking.
    pub fn translate(&mut self, event: &winit::event::WindowEvent) -> Option<InputEvent> {
        self.router.translate(event)
    }

    pub fn handle_input(
        &mut self,
        device: &mut dyn GraphicsDevice,
        event: &InputEvent,
    ) -> Result<Routed> {
        let routed = self.router.route(
            event,
            self.gui.as_mut(),
            &mut self.controller,
            &mut self.config,
        );
        if let Routed::Control(control) = routed {
            self.apply_control(device, control)?;
        }
        Ok(routed)
    }

    pub fn apply_control(
        &mut self,
        device: &mut dyn GraphicsDevice,
        control: ControlEvent,
    ) -> Result<()> {
        match control {
            ControlEvent::TimeScale(raw) => self.config.set_time_scale_from_slider(raw),
            ControlEvent::InstanceCount(count) => {
                // before creation the count is picked up by the initial build
                if self.config.set_instances_per_axis(count) && self.tracker.created_resources().is_some() {
                    self.rebuild_crowd(device)?;
                }
            }
            ControlEvent::GpuSkinning(gpu) => {
                switch_skinning_mode(
                    &mut self.config,
                    &mut self.crowd,
                    SkinningMode::from_gpu_flag(gpu),
                );
            }
            ControlEvent::DiffuseMap(enabled) => self.config.set_diffuse_map_enabled(enabled),
            ControlEvent::Wireframe(wireframe) => self.config.set_wireframe(wireframe),
        }
        Ok(())
    }

    /// Replaces the crowd with one built for the configured count and mode.
    ///
    /// The character asset comes from the streaming subsystem. If no poll has
    /// handed it over yet it is loaded on the spot.
    pub fn rebuild_crowd(&mut self, device: &mut dyn GraphicsDevice) -> Result<()> {
        let grid = CrowdGridConfig::new(self.config.instances_per_axis())?;
        let source = match self.streaming.get(&self.character_path) {
            Some(source) => source,
            None => self.streaming.load_now(&self.character_path)?,
        };
        self.layout.rebuild(
            &mut self.crowd,
            &grid,
            self.config.skinning_mode(),
            &source,
            device,
            self.factory.as_mut(),
        )
    }
}
