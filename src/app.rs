//! Window and event loop.
//!
//! [`App`] adapts winit's application callbacks to the device notifications and
//! frame callbacks of a [`CrowdSession`]:
//!
//! | winit                      | session                                   |
//! |----------------------------|-------------------------------------------|
//! | first `resumed`            | acceptability check, created, reset       |
//! | `suspended` / `resumed`    | lost / reset                              |
//! | `Resized`                  | lost, reset                               |
//! | `RedrawRequested`          | frame move, frame render                  |
//! | `CloseRequested`           | lost, destroyed                           |

use std::sync::Arc;

use instant::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowId},
};

use crate::{
    backend::WgpuDevice,
    config::AppConfig,
    device::{DeviceSettings, GraphicsDevice},
    error::CrowdError,
    gui::SettingsPanel,
    lifecycle::DeviceLifecyclePhase,
    resources::mannequin::MannequinFactory,
    session::CrowdSession,
    streaming::AssetStreamer,
};

pub struct App {
    config: AppConfig,
    async_runtime: tokio::runtime::Runtime,
    session: CrowdSession,
    window: Option<Arc<Window>>,
    device: Option<WgpuDevice>,
    start: Instant,
    last_time: Instant,
    error: Option<anyhow::Error>,
}

impl App {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let async_runtime = tokio::runtime::Runtime::new()?;
        let session = CrowdSession::new(
            &config,
            Box::new(MannequinFactory::new(config.asset_paths.clone())),
            Box::new(AssetStreamer::new(config.streaming.clone())?),
            Box::new(SettingsPanel::new()),
        );
        Ok(Self {
            config,
            async_runtime,
            session,
            window: None,
            device: None,
            start: Instant::now(),
            last_time: Instant::now(),
            error: None,
        })
    }

    pub fn session(&self) -> &CrowdSession {
        &self.session
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        if let Some(device) = self.device.as_mut() {
            shut_down(&mut self.session, device);
        }
        self.error.get_or_insert(error);
        event_loop.exit();
    }

    fn init_device(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let window_attributes = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.width,
                self.config.height,
            ));
        let window = Arc::new(event_loop.create_window(window_attributes)?);
        let device = self
            .async_runtime
            .block_on(WgpuDevice::new(window.clone()))?;

        self.session.is_device_acceptable(device.caps())?;
        let settings = self
            .session
            .modify_device_settings(DeviceSettings::default(), device.caps());
        log::info!("vertex processing: {:?}", settings.vertex_processing);

        self.window = Some(window);
        let device = self.device.insert(device);
        let back_buffer = device.back_buffer();
        match self.session.on_device_created(device, back_buffer) {
            Ok(()) => {}
            // the device is usable, the crowd stays empty until the next count change
            Err(e @ CrowdError::ModelConstruction { .. }) => report("initial crowd", &e),
            Err(e) => return Err(e.into()),
        }
        self.session.on_device_reset(device, back_buffer)?;
        Ok(())
    }

    fn reset(&mut self) -> crate::error::Result<()> {
        let Some(device) = self.device.as_mut() else {
            return Ok(());
        };
        let back_buffer = device.back_buffer();
        if !self.session.reset_device(device, back_buffer)? {
            log::debug!("ignoring reset while the session is {:?}", self.session.phase());
        }
        Ok(())
    }

    fn redraw(&mut self) -> crate::error::Result<()> {
        let Some(device) = self.device.as_mut() else {
            return Ok(());
        };
        let now = Instant::now();
        let elapsed = (now - self.last_time).as_secs_f32();
        self.last_time = now;
        let time = (now - self.start).as_secs_f64();

        self.session.frame_move(time, elapsed)?;
        if self.session.phase() == DeviceLifecyclePhase::Reset {
            self.session.frame_render(device)?;
        }
        Ok(())
    }
}

/// Out-of-order lifecycle notifications are bugs in this adapter.
fn report(context: &str, error: &CrowdError) {
    log::error!("{}: {}", context, error);
    debug_assert!(
        !matches!(error, CrowdError::Lifecycle(_)),
        "{}: {}",
        context,
        error
    );
}

/// Walks the session to `Destroyed` from wherever it is.
fn shut_down(session: &mut CrowdSession, device: &mut WgpuDevice) {
    if session.phase() == DeviceLifecyclePhase::Reset {
        if let Err(e) = session.on_device_lost(device) {
            report("device lost", &e);
        }
    }
    if matches!(
        session.phase(),
        DeviceLifecyclePhase::Created | DeviceLifecyclePhase::Lost
    ) {
        if let Err(e) = session.on_device_destroyed(device) {
            report("device destroyed", &e);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.device.is_none() {
            if let Err(e) = self.init_device(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        } else if self.session.phase() == DeviceLifecyclePhase::Lost {
            if let Err(e) = self.reset() {
                report("device reset after resume", &e);
            }
        }
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn suspended(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(device) = self.device.as_mut() {
            if self.session.phase() == DeviceLifecyclePhase::Reset {
                if let Err(e) = self.session.on_device_lost(device) {
                    report("device lost", &e);
                }
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        if self.device.is_none() {
            return;
        }

        if let Some(input) = self.session.translate(&event) {
            if let Some(device) = self.device.as_mut() {
                if let Err(e) = self.session.handle_input(device, &input) {
                    report("input", &e);
                }
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                if let Some(device) = self.device.as_mut() {
                    shut_down(&mut self.session, device);
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if size.width == 0 || size.height == 0 {
                    return;
                }
                if let Some(device) = self.device.as_mut() {
                    device.resize(size.width, size.height);
                }
                if let Err(e) = self.reset() {
                    report("device reset after resize", &e);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    report("Unable to render", &e);
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

pub fn run(config: AppConfig) -> anyhow::Result<()> {
    if let Err(e) = env_logger::try_init() {
        println!("Warning: Could not initialize logger: {}", e);
    };

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config)?;
    event_loop.run_app(&mut app)?;

    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
