//! Contract of the character engine.
//!
//! Skeletons, animation blending, LOD selection and skin deformation all live
//! behind [`CharacterModel`]. The crowd only configures a model once, updates it
//! every frame and asks it to draw itself with the effect the crowd has bound.

use std::path::Path;

use bitflags::bitflags;

use crate::{
    device::{GraphicsDevice, ResourceHandle},
    error::ModelError,
    skinning::SkinningMode,
};

/// Level-of-detail policy applied by the engine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LodSettings {
    pub mesh: bool,
    pub weights: bool,
    pub skeleton: bool,
    pub tolerance: f32,
}

impl LodSettings {
    pub const CROWD: LodSettings = LodSettings {
        mesh: true,
        weights: true,
        skeleton: true,
        tolerance: 0.17,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Playback {
    Once,
    Loop,
}

/// How much per-vertex data a mesh part recomputes after skinning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeshUpdateMode {
    Full,
    /// Positions and normals only, tangent space is left untouched.
    NoTangent,
}

bitflags! {
    pub struct UpdateFlags: u32 {
        /// Skip recomputing the model's bounding box.
        const NO_BOUNDING_BOX = 0b0000_0001;
    }
}

/// Per-frame state a model needs to draw.
#[derive(Clone, Copy, Debug)]
pub struct DrawContext {
    pub view: cgmath::Matrix4<f32>,
    pub projection: cgmath::Matrix4<f32>,
    /// When `false` the model leaves the pass-wide view-projection constant
    /// alone because an earlier draw in the same pass already committed it.
    pub commit_shared: bool,
    pub diffuse_map_enabled: bool,
}

impl DrawContext {
    pub fn view_projection(&self) -> cgmath::Matrix4<f32> {
        self.projection * self.view
    }
}

/// One animated character owned by the character engine.
pub trait CharacterModel {
    fn set_transform(&mut self, world: cgmath::Matrix4<f32>);
    fn set_lod(&mut self, lod: LodSettings);
    fn clip_names(&self) -> Vec<String>;
    fn play_animation(
        &mut self,
        clip: &str,
        playback: Playback,
        time_scale: f32,
    ) -> Result<(), ModelError>;
    fn set_part_visible(&mut self, part: &str, visible: bool) -> Result<(), ModelError>;
    fn set_part_update_mode(&mut self, part: &str, mode: MeshUpdateMode)
    -> Result<(), ModelError>;
    /// Switches between host and GPU deformation. The engine reshapes its
    /// vertex streams to match the layout of the mode if needed.
    fn set_skinning_mode(&mut self, mode: SkinningMode);
    fn skinning_mode(&self) -> SkinningMode;

    /// Advances animation by `elapsed` seconds of scaled time.
    fn update(&mut self, time: f64, elapsed: f32, flags: UpdateFlags);

    /// Issues the draw calls for this model. Called inside an open effect
    /// pass; the effect, technique and vertex layout are already bound.
    fn render(
        &self,
        device: &mut dyn GraphicsDevice,
        effect: ResourceHandle,
        ctx: &DrawContext,
    ) -> Result<(), ModelError>;

    /// Frees any device resources the model holds.
    fn release(&mut self, device: &mut dyn GraphicsDevice);
}

/// Creates character models from an asset.
pub trait ModelFactory {
    /// `source` holds the asset bytes handed over by the streaming subsystem,
    /// `path` names it.
    fn create(
        &mut self,
        path: &Path,
        source: &[u8],
        device: &mut dyn GraphicsDevice,
    ) -> Result<Box<dyn CharacterModel>, ModelError>;

    /// Frees device resources shared between the models of this factory.
    fn release(&mut self, _device: &mut dyn GraphicsDevice) {}
}
