//! Per-frame update and draw sequence.
//!
//! [`FrameOrchestrator::frame_move`] advances the simulation:
//! 1. camera from input and elapsed time
//! 2. every crowd member (scaled time, bounding boxes skipped)
//! 3. one poll of the streaming subsystem
//! 4. the floor scroll
//!
//! [`FrameOrchestrator::render`] draws the floor, then the crowd inside a single
//! effect bracket, then the settings panel and finally the statistics text.

use cgmath::{Matrix4, Vector3};
use instant::Duration;

use crate::{
    camera::{Camera, CameraController, Projection},
    config::RenderConfig,
    crowd::CharacterInstance,
    data_structures::floor::{FLOOR_VERTEX_COUNT, FloorSurface, FloorVertex},
    device::{EffectValue, FillMode, GraphicsDevice, ResourceHandle, VertexLayoutKind, params},
    error::{CrowdError, Result},
    gui::GuiLayer,
    lifecycle::FrameResources,
    model::{DrawContext, UpdateFlags},
    streaming::StreamingSubsystem,
};

pub const FLOOR_TECHNIQUE: &str = "NoLight";
pub const LIGHT_DIRECTION: [f32; 3] = [0.0, -0.707, 0.707];
pub const STATS_POSITION: [i32; 2] = [2, 0];
pub const STATS_COLOR: [f32; 4] = [1.0, 1.0, 0.0, 1.0];

/// How long frames are averaged before the FPS figure refreshes.
const STATS_WINDOW_SECS: f64 = 0.5;

#[derive(Debug, Default)]
pub struct FrameStats {
    fps: f32,
    frames: u32,
    window: f64,
}

impl FrameStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn tick(&mut self, elapsed: f32) {
        self.frames += 1;
        self.window += elapsed as f64;
        if self.window >= STATS_WINDOW_SECS {
            self.fps = (self.frames as f64 / self.window) as f32;
            self.frames = 0;
            self.window = 0.0;
        }
    }

    pub fn text(&self, width: u32, height: u32, instances: usize) -> String {
        format!(
            "{:.2} fps ({}x{}), {} instances",
            self.fps, width, height, instances
        )
    }
}

/// Camera state a frame reads from.
#[derive(Clone, Copy, Debug)]
pub struct SceneView<'a> {
    pub camera: &'a Camera,
    pub projection: &'a Projection,
}

impl SceneView<'_> {
    fn view(&self) -> Matrix4<f32> {
        self.camera.calc_matrix()
    }

    fn projection(&self) -> Matrix4<f32> {
        self.projection.calc_matrix()
    }
}

#[derive(Debug)]
pub struct FrameOrchestrator {
    floor: FloorSurface,
    stats: FrameStats,
    clear_color: [f32; 4],
}

impl FrameOrchestrator {
    pub fn new(clear_color: [f32; 4]) -> Self {
        Self {
            floor: FloorSurface::new(),
            stats: FrameStats::new(),
            clear_color,
        }
    }

    pub fn floor(&self) -> &FloorSurface {
        &self.floor
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    #[allow(clippy::too_many_arguments)]
    pub fn frame_move(
        &mut self,
        time: f64,
        elapsed: f32,
        config: &RenderConfig,
        camera: &mut Camera,
        controller: &mut CameraController,
        crowd: &mut [CharacterInstance],
        streaming: &mut dyn StreamingSubsystem,
    ) -> Result<()> {
        controller.update(camera, Duration::from_secs_f32(elapsed.max(0.0)));

        let scaled = elapsed * config.time_scale();
        for instance in crowd.iter_mut() {
            instance.update(time, scaled, UpdateFlags::NO_BOUNDING_BOX);
        }

        streaming.update(elapsed)?;

        self.floor
            .advance(elapsed, config.floor_speed(), config.time_scale());
        self.stats.tick(elapsed);
        Ok(())
    }

    /// Draws one frame. Returns `Ok(false)` if the device could not start a
    /// scene and nothing was drawn.
    pub fn render(
        &mut self,
        device: &mut dyn GraphicsDevice,
        resources: FrameResources<'_>,
        config: &RenderConfig,
        view: SceneView<'_>,
        crowd: &[CharacterInstance],
        gui: &dyn GuiLayer,
    ) -> Result<bool> {
        let vertices = self.floor.vertices();
        device.write_vertex_buffer(
            resources.default.floor_buffer,
            bytemuck::cast_slice(&vertices),
        )?;

        if !device.begin_scene(self.clear_color)? {
            log::debug!("scene could not begin, skipping frame");
            return Ok(false);
        }

        let drawn = self.draw_scene(device, resources, config, view, crowd, gui);
        let ended = device.end_scene();
        drawn?;
        ended?;
        Ok(true)
    }

    fn draw_scene(
        &self,
        device: &mut dyn GraphicsDevice,
        resources: FrameResources<'_>,
        config: &RenderConfig,
        view: SceneView<'_>,
        crowd: &[CharacterInstance],
        gui: &dyn GuiLayer,
    ) -> Result<()> {
        device.set_fill_mode(if config.wireframe() {
            FillMode::Wireframe
        } else {
            FillMode::Solid
        });

        self.draw_floor(device, resources, view)?;
        draw_crowd(device, resources, config, view, crowd)?;

        if config.show_help_overlay() {
            gui.render(
                device,
                resources.created.font,
                resources.default.sprite,
                config,
            )?;
        }

        let text = self.stats.text(
            resources.back_buffer.width,
            resources.back_buffer.height,
            crowd.len(),
        );
        device.draw_text(
            resources.created.font,
            resources.default.sprite,
            STATS_POSITION,
            STATS_COLOR,
            &text,
        )?;
        Ok(())
    }

    fn draw_floor(
        &self,
        device: &mut dyn GraphicsDevice,
        resources: FrameResources<'_>,
        view: SceneView<'_>,
    ) -> Result<()> {
        let effect = resources.created.effect;
        device.set_effect_param(
            effect,
            params::VIEW_PROJECTION,
            EffectValue::Matrix(view.projection() * view.view()),
        )?;
        device.set_effect_param(
            effect,
            params::WORLD,
            EffectValue::Matrix(FloorSurface::world_matrix()),
        )?;
        device.set_vertex_layout(resources.created.layout(VertexLayoutKind::Floor))?;
        device.set_stream_source(0, resources.default.floor_buffer, FloorVertex::STRIDE)?;
        device.set_effect_param(
            effect,
            params::DIFFUSE_TEXTURE,
            EffectValue::Texture(resources.default.floor_texture),
        )?;
        device.set_technique(effect, FLOOR_TECHNIQUE)?;

        with_effect(device, effect, |device, _| {
            device.draw_triangles(0, FLOOR_VERTEX_COUNT)?;
            Ok(())
        })
    }
}

/// Runs `draw` once per pass of the bound technique, inside the effect bracket.
fn with_effect(
    device: &mut dyn GraphicsDevice,
    effect: ResourceHandle,
    mut draw: impl FnMut(&mut dyn GraphicsDevice, u32) -> Result<()>,
) -> Result<()> {
    let passes = device.begin_effect(effect)?;
    let mut result = Ok(());
    for pass in 0..passes {
        if let Err(e) = device.begin_pass(effect, pass) {
            result = Err(CrowdError::from(e));
            break;
        }
        let drawn = draw(device, pass);
        let ended = device.end_pass(effect);
        if let Err(e) = drawn.and(ended.map_err(CrowdError::from)) {
            result = Err(e);
            break;
        }
    }
    let ended = device.end_effect(effect);
    result?;
    ended?;
    Ok(())
}

fn draw_crowd(
    device: &mut dyn GraphicsDevice,
    resources: FrameResources<'_>,
    config: &RenderConfig,
    view: SceneView<'_>,
    crowd: &[CharacterInstance],
) -> Result<()> {
    let effect = resources.created.effect;
    let mode = config.skinning_mode();

    device.set_vertex_layout(resources.created.layout(mode.vertex_layout()))?;
    let eye = view.camera.position;
    device.set_effect_param(
        effect,
        params::CAMERA_POSITION,
        EffectValue::Vector(Vector3::new(eye.x, eye.y, eye.z)),
    )?;
    device.set_effect_param(
        effect,
        params::LIGHT_DIRECTION,
        EffectValue::Vector(LIGHT_DIRECTION.into()),
    )?;
    device.set_effect_param(
        effect,
        params::DIFFUSE_ENABLED,
        EffectValue::Bool(config.diffuse_map_enabled()),
    )?;
    device.set_technique(effect, mode.technique())?;

    let view_matrix = view.view();
    let projection = view.projection();
    with_effect(device, effect, |device, _| {
        for (index, instance) in crowd.iter().enumerate() {
            let ctx = DrawContext {
                view: view_matrix,
                projection,
                commit_shared: mode.commits_shared_constants(index),
                diffuse_map_enabled: config.diffuse_map_enabled(),
            };
            instance
                .render(device, effect, &ctx)
                .map_err(|source| CrowdError::ModelDraw { index, source })?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn should_average_fps_over_half_second_windows() {
        let mut stats = FrameStats::new();
        for _ in 0..29 {
            stats.tick(1.0 / 60.0);
        }
        assert_eq!(stats.fps(), 0.0);
        stats.tick(1.0 / 60.0);
        assert_relative_eq!(stats.fps(), 60.0, epsilon = 0.1);
    }

    #[test]
    fn should_describe_frame() {
        let stats = FrameStats::new();
        assert_eq!(stats.text(640, 480, 16), "0.00 fps (640x480), 16 instances");
    }
}
