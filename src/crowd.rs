//! Grid layout of the crowd.
//!
//! [`CrowdLayoutEngine::rebuild`] replaces the whole crowd: the previous batch
//! is released first, then `count²` models are created, placed on a square
//! grid and configured with the crowd's LOD, clip and part policies. A failure
//! anywhere aborts the batch and leaves the crowd empty.

use std::path::{Path, PathBuf};

use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};

use crate::{
    data_structures::{floor::FLOOR_SIZE, instance::Transform},
    device::{GraphicsDevice, ResourceHandle},
    error::{CrowdError, ModelError, Result},
    model::{
        CharacterModel, DrawContext, LodSettings, MeshUpdateMode, ModelFactory, Playback,
        UpdateFlags,
    },
    skinning::SkinningMode,
};

/// The grid covers the floor.
pub const GRID_HALF_EXTENT: f32 = FLOOR_SIZE;
/// The grid footprint stays constant: scale is this value divided by the count.
pub const GRID_SCALE_NUMERATOR: f32 = 6.0;

pub const CROWD_CLIPS: [&str; 5] = ["stand", "fight", "walk", "run", "attack"];
pub const PLAYBACK_SPEED_MIN: f32 = 0.5;
pub const PLAYBACK_SPEED_MAX: f32 = 2.0;

pub const HIDDEN_PART: &str = "weapon";
pub const REDUCED_UPDATE_PART: &str = "body";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CrowdGridConfig {
    instances_per_axis: u32,
    half_extent: f32,
}

impl CrowdGridConfig {
    pub fn new(instances_per_axis: u32) -> Result<Self> {
        Self::with_extent(instances_per_axis, GRID_HALF_EXTENT)
    }

    pub fn with_extent(instances_per_axis: u32, half_extent: f32) -> Result<Self> {
        if instances_per_axis == 0 {
            return Err(CrowdError::InvalidInstanceCount(instances_per_axis));
        }
        Ok(Self {
            instances_per_axis,
            half_extent,
        })
    }

    pub fn instances_per_axis(&self) -> u32 {
        self.instances_per_axis
    }

    pub fn total_instances(&self) -> usize {
        (self.instances_per_axis as usize).pow(2)
    }

    pub fn half_extent(&self) -> f32 {
        self.half_extent
    }

    /// Distance between neighbouring cell centers.
    pub fn cell_spacing(&self) -> f32 {
        2.0 * self.half_extent / self.instances_per_axis as f32
    }

    pub fn instance_scale(&self) -> f32 {
        GRID_SCALE_NUMERATOR / self.instances_per_axis as f32
    }

    pub fn cell_center(&self, i: u32, j: u32) -> cgmath::Vector3<f32> {
        let d = self.cell_spacing();
        let h = self.half_extent;
        cgmath::Vector3::new(
            (i as f32 + 0.5) * d - h,
            (j as f32 + 0.5) * d - h,
            0.0,
        )
    }

    pub fn cell_transform(&self, i: u32, j: u32) -> Transform {
        Transform::placed(self.cell_center(i, j), self.instance_scale())
    }

    /// Cells in creation order, `i` major.
    pub fn cells(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let n = self.instances_per_axis;
        (0..n).flat_map(move |i| (0..n).map(move |j| (i, j)))
    }
}

/// One crowd member. Its placement and animation choice are fixed at creation.
pub struct CharacterInstance {
    model: Box<dyn CharacterModel>,
    cell: (u32, u32),
    transform: Transform,
    clip: String,
    time_scale: f32,
    skinning_mode: SkinningMode,
}

impl std::fmt::Debug for CharacterInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CharacterInstance")
            .field("cell", &self.cell)
            .field("transform", &self.transform)
            .field("clip", &self.clip)
            .field("time_scale", &self.time_scale)
            .field("skinning_mode", &self.skinning_mode)
            .finish_non_exhaustive()
    }
}

impl CharacterInstance {
    pub fn cell(&self) -> (u32, u32) {
        self.cell
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn clip(&self) -> &str {
        &self.clip
    }

    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    pub fn skinning_mode(&self) -> SkinningMode {
        self.skinning_mode
    }

    pub fn model(&self) -> &dyn CharacterModel {
        self.model.as_ref()
    }

    pub(crate) fn set_skinning_mode(&mut self, mode: SkinningMode) {
        self.skinning_mode = mode;
        self.model.set_skinning_mode(mode);
    }

    pub fn update(&mut self, time: f64, elapsed: f32, flags: UpdateFlags) {
        self.model.update(time, elapsed, flags);
    }

    pub fn render(
        &self,
        device: &mut dyn GraphicsDevice,
        effect: ResourceHandle,
        ctx: &DrawContext,
    ) -> std::result::Result<(), ModelError> {
        self.model.render(device, effect, ctx)
    }

    fn release(mut self, device: &mut dyn GraphicsDevice) {
        self.model.release(device);
    }
}

pub struct CrowdLayoutEngine {
    rng: StdRng,
    model_path: PathBuf,
}

impl CrowdLayoutEngine {
    pub fn new(model_path: impl Into<PathBuf>, seed: u64) -> Self {
        Self::with_rng(model_path, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(model_path: impl Into<PathBuf>, rng: StdRng) -> Self {
        Self {
            rng,
            model_path: model_path.into(),
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Replaces `crowd` with a fresh batch for `grid`, every instance created
    /// from the character asset bytes in `source`.
    ///
    /// `crowd` is always emptied first. On error it stays empty; instances
    /// created before the failure are released again.
    pub fn rebuild(
        &mut self,
        crowd: &mut Vec<CharacterInstance>,
        grid: &CrowdGridConfig,
        mode: SkinningMode,
        source: &[u8],
        device: &mut dyn GraphicsDevice,
        factory: &mut dyn ModelFactory,
    ) -> Result<()> {
        release_crowd(crowd, device);

        let mut batch = Vec::with_capacity(grid.total_instances());
        for (index, (i, j)) in grid.cells().enumerate() {
            match self.create_instance(grid, (i, j), mode, source, device, factory) {
                Ok(instance) => batch.push(instance),
                Err(source) => {
                    log::error!(
                        "crowd rebuild of {} instances aborted at instance {}: {}",
                        grid.total_instances(),
                        index,
                        source
                    );
                    release_crowd(&mut batch, device);
                    return Err(CrowdError::ModelConstruction { index, source });
                }
            }
        }

        log::info!(
            "crowd rebuilt with {} instances ({}x{}, spacing {:.3}, scale {:.3})",
            batch.len(),
            grid.instances_per_axis(),
            grid.instances_per_axis(),
            grid.cell_spacing(),
            grid.instance_scale()
        );
        *crowd = batch;
        Ok(())
    }

    fn create_instance(
        &mut self,
        grid: &CrowdGridConfig,
        cell: (u32, u32),
        mode: SkinningMode,
        source: &[u8],
        device: &mut dyn GraphicsDevice,
        factory: &mut dyn ModelFactory,
    ) -> std::result::Result<CharacterInstance, ModelError> {
        let mut model = factory.create(&self.model_path, source, device)?;
        let transform = grid.cell_transform(cell.0, cell.1);
        let clip = CROWD_CLIPS
            .choose(&mut self.rng)
            .copied()
            .unwrap_or(CROWD_CLIPS[0])
            .to_string();
        let time_scale = self.rng.gen_range(PLAYBACK_SPEED_MIN..PLAYBACK_SPEED_MAX);

        let configured = (|| -> std::result::Result<(), ModelError> {
            model.set_transform(transform.to_matrix());
            model.set_lod(LodSettings::CROWD);
            model.play_animation(&clip, Playback::Loop, time_scale)?;
            model.set_part_visible(HIDDEN_PART, false)?;
            model.set_part_update_mode(REDUCED_UPDATE_PART, MeshUpdateMode::NoTangent)?;
            model.set_skinning_mode(mode);
            Ok(())
        })();
        if let Err(e) = configured {
            model.release(device);
            return Err(e);
        }

        Ok(CharacterInstance {
            model,
            cell,
            transform,
            clip,
            time_scale,
            skinning_mode: mode,
        })
    }
}

/// Releases every instance and leaves `crowd` empty.
pub fn release_crowd(crowd: &mut Vec<CharacterInstance>, device: &mut dyn GraphicsDevice) {
    if !crowd.is_empty() {
        log::debug!("releasing {} crowd instances", crowd.len());
    }
    for instance in crowd.drain(..) {
        instance.release(device);
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn should_reject_empty_grid() {
        assert!(matches!(
            CrowdGridConfig::new(0),
            Err(CrowdError::InvalidInstanceCount(0))
        ));
    }

    #[test]
    fn should_center_single_instance() {
        let grid = CrowdGridConfig::new(1).unwrap();
        let c = grid.cell_center(0, 0);
        assert_relative_eq!(c.x, 0.0);
        assert_relative_eq!(c.y, 0.0);
        assert_relative_eq!(grid.instance_scale(), 6.0);
    }

    #[test]
    fn should_keep_grid_inside_extent() {
        for n in 1..=60 {
            let grid = CrowdGridConfig::new(n).unwrap();
            let h = grid.half_extent();
            for (i, j) in grid.cells() {
                let c = grid.cell_center(i, j);
                assert!(c.x > -h && c.x < h);
                assert!(c.y > -h && c.y < h);
            }
            assert_relative_eq!(grid.cell_spacing() * n as f32, 2.0 * h, epsilon = 1e-4);
        }
    }
}
