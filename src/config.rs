//! Settings read by the renderer every frame and settings fixed at startup.
//!
//! [`RenderConfig`] is owned by the [`CrowdSession`](crate::session::CrowdSession)
//! and only changes through its setters; [`AppConfig`] is handed to the
//! application once when it starts.

use std::path::{Path, PathBuf};

use crate::{
    device::FontDesc,
    lifecycle::ResourceAssets,
    skinning::SkinningMode,
    streaming::StreamingConfig,
};

pub const MIN_INSTANCES_PER_AXIS: u32 = 1;
pub const MAX_INSTANCES_PER_AXIS: u32 = 60;

/// Range and default of the raw time-scale slider.
pub const TIME_SCALE_SLIDER_MIN: i32 = 0;
pub const TIME_SCALE_SLIDER_MAX: i32 = 100;
pub const TIME_SCALE_SLIDER_DEFAULT: i32 = 50;

/// Maps a raw slider value onto an animation time scale.
///
/// Below 50 the scale grows linearly from 0 to 1; from 50 upward every step
/// adds a tenth, reaching 6x at the top of the slider.
pub fn time_scale_from_slider(raw: i32) -> f32 {
    let raw = raw.clamp(TIME_SCALE_SLIDER_MIN, TIME_SCALE_SLIDER_MAX);
    if raw < 50 {
        raw as f32 / 50.0
    } else {
        raw as f32 / 10.0 - 4.0
    }
}

/// Inverse of [`time_scale_from_slider`], rounded to the nearest step.
pub fn slider_from_time_scale(scale: f32) -> i32 {
    let raw = if scale < 1.0 {
        scale * 50.0
    } else {
        (scale + 4.0) * 10.0
    };
    (raw.round() as i32).clamp(TIME_SCALE_SLIDER_MIN, TIME_SCALE_SLIDER_MAX)
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderConfig {
    time_scale: f32,
    instances_per_axis: u32,
    skinning_mode: SkinningMode,
    wireframe: bool,
    diffuse_map_enabled: bool,
    show_help_overlay: bool,
    floor_speed: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            instances_per_axis: 4,
            skinning_mode: SkinningMode::Cpu,
            wireframe: false,
            diffuse_map_enabled: true,
            show_help_overlay: true,
            floor_speed: 0.0,
        }
    }
}

impl RenderConfig {
    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    pub fn instances_per_axis(&self) -> u32 {
        self.instances_per_axis
    }

    pub fn total_instances(&self) -> u32 {
        self.instances_per_axis * self.instances_per_axis
    }

    pub fn skinning_mode(&self) -> SkinningMode {
        self.skinning_mode
    }

    pub fn wireframe(&self) -> bool {
        self.wireframe
    }

    pub fn diffuse_map_enabled(&self) -> bool {
        self.diffuse_map_enabled
    }

    pub fn show_help_overlay(&self) -> bool {
        self.show_help_overlay
    }

    /// Speed the floor scrolls at, in world units per second.
    pub fn floor_speed(&self) -> f32 {
        self.floor_speed
    }

    pub fn set_time_scale(&mut self, scale: f32) {
        self.time_scale = scale.max(0.0);
    }

    pub fn set_time_scale_from_slider(&mut self, raw: i32) {
        self.time_scale = time_scale_from_slider(raw);
    }

    /// Clamps into `1..=60` and reports whether the value changed.
    pub fn set_instances_per_axis(&mut self, count: u32) -> bool {
        let count = count.clamp(MIN_INSTANCES_PER_AXIS, MAX_INSTANCES_PER_AXIS);
        let changed = count != self.instances_per_axis;
        self.instances_per_axis = count;
        changed
    }

    /// Reports whether the value changed.
    pub fn set_skinning_mode(&mut self, mode: SkinningMode) -> bool {
        let changed = mode != self.skinning_mode;
        self.skinning_mode = mode;
        changed
    }

    pub fn set_wireframe(&mut self, wireframe: bool) {
        self.wireframe = wireframe;
    }

    pub fn set_diffuse_map_enabled(&mut self, enabled: bool) {
        self.diffuse_map_enabled = enabled;
    }

    pub fn set_show_help_overlay(&mut self, show: bool) {
        self.show_help_overlay = show;
    }

    pub fn toggle_help_overlay(&mut self) {
        self.show_help_overlay = !self.show_help_overlay;
    }

    pub fn set_floor_speed(&mut self, speed: f32) {
        self.floor_speed = speed;
    }
}

/// Names of the assets the application loads, resolved by [`AssetPaths`].
#[derive(Clone, Debug)]
pub struct AssetNames {
    pub effect: String,
    pub floor_texture: String,
    pub character: String,
}

impl Default for AssetNames {
    fn default() -> Self {
        Self {
            effect: "shaders/crowd.wgsl".to_string(),
            floor_texture: "textures/floor.png".to_string(),
            character: "characters/mannequin.chr".to_string(),
        }
    }
}

/// Looks for assets in `./assets` first and then in the copy `build.rs`
/// placed next to the build output.
#[derive(Clone, Debug)]
pub struct AssetPaths {
    roots: Vec<PathBuf>,
}

impl Default for AssetPaths {
    fn default() -> Self {
        Self {
            roots: vec![
                PathBuf::from("assets"),
                PathBuf::from(env!("OUT_DIR")).join("assets"),
            ],
        }
    }
}

impl AssetPaths {
    pub fn with_roots(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// The first existing candidate, or the path under the first root if none
    /// exists so that the load error names a sensible location.
    pub fn resolve(&self, name: impl AsRef<Path>) -> PathBuf {
        let name = name.as_ref();
        self.roots
            .iter()
            .map(|root| root.join(name))
            .find(|candidate| candidate.exists())
            .or_else(|| self.roots.first().map(|root| root.join(name)))
            .unwrap_or_else(|| name.to_path_buf())
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub clear_color: [f32; 4],
    pub assets: AssetNames,
    pub asset_paths: AssetPaths,
    pub font: FontDesc,
    pub layout_seed: u64,
    pub streaming: StreamingConfig,
    pub render: RenderConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Crowd".to_string(),
            width: 1024,
            height: 768,
            clear_color: [0.3, 0.3, 0.6, 0.5],
            assets: AssetNames::default(),
            asset_paths: AssetPaths::default(),
            font: FontDesc::default(),
            layout_seed: 0x5eed_c0de,
            streaming: StreamingConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn resource_assets(&self) -> ResourceAssets {
        ResourceAssets {
            effect: self.asset_paths.resolve(&self.assets.effect),
            floor_texture: self.asset_paths.resolve(&self.assets.floor_texture),
            font: self.font.clone(),
        }
    }

    pub fn character_path(&self) -> PathBuf {
        self.asset_paths.resolve(&self.assets.character)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn should_map_slider_segments() {
        assert_relative_eq!(time_scale_from_slider(0), 0.0);
        assert_relative_eq!(time_scale_from_slider(25), 0.5);
        assert_relative_eq!(time_scale_from_slider(50), 1.0);
        assert_relative_eq!(time_scale_from_slider(60), 2.0);
        assert_relative_eq!(time_scale_from_slider(100), 6.0);
    }

    #[test]
    fn should_be_continuous_at_segment_boundary() {
        let below = time_scale_from_slider(49);
        let at = time_scale_from_slider(50);
        let above = time_scale_from_slider(51);
        let min_step = (time_scale_from_slider(1) - time_scale_from_slider(0))
            .min(above - at);
        assert!(at - below <= min_step + f32::EPSILON);
    }

    #[test]
    fn should_round_trip_slider_positions() {
        for raw in TIME_SCALE_SLIDER_MIN..=TIME_SCALE_SLIDER_MAX {
            assert_eq!(slider_from_time_scale(time_scale_from_slider(raw)), raw);
        }
    }

    #[test]
    fn should_clamp_instance_count() {
        let mut config = RenderConfig::default();
        assert!(config.set_instances_per_axis(0));
        assert_eq!(config.instances_per_axis(), 1);
        assert!(config.set_instances_per_axis(500));
        assert_eq!(config.instances_per_axis(), 60);
        assert!(!config.set_instances_per_axis(60));
        assert_eq!(config.total_instances(), 3600);
    }

    #[test]
    fn should_resolve_missing_assets_under_first_root() {
        let paths = AssetPaths::with_roots(vec![PathBuf::from("/nonexistent/a"), PathBuf::from("/nonexistent/b")]);
        assert_eq!(paths.resolve("x.png"), PathBuf::from("/nonexistent/a/x.png"));
    }
}
