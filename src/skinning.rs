//! Host vs GPU skin deformation.
//!
//! The mode picks the vertex layout and the technique the crowd pass binds,
//! and decides which instances commit the effect's shared constants. Changing
//! it never rebuilds the crowd: [`switch_skinning_mode`] forwards the new mode
//! to every live instance.

use crate::{config::RenderConfig, crowd::CharacterInstance, device::VertexLayoutKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum SkinningMode {
    #[default]
    Cpu,
    Gpu,
}

impl SkinningMode {
    pub fn from_gpu_flag(gpu: bool) -> Self {
        if gpu { SkinningMode::Gpu } else { SkinningMode::Cpu }
    }

    pub fn is_gpu(self) -> bool {
        self == SkinningMode::Gpu
    }

    pub fn vertex_layout(self) -> VertexLayoutKind {
        match self {
            SkinningMode::Cpu => VertexLayoutKind::StaticMesh,
            SkinningMode::Gpu => VertexLayoutKind::GpuSkinnedMesh,
        }
    }

    pub fn technique(self) -> &'static str {
        match self {
            SkinningMode::Cpu => "VertexLight",
            SkinningMode::Gpu => "VertexLight_Gpu_Skinning",
        }
    }

    /// Whether the draw of the `index`-th instance in a pass commits the
    /// shared lighting and camera constants.
    ///
    /// On the GPU path the constants are committed once by the first instance
    /// and shared by the rest of the pass.
    pub fn commits_shared_constants(self, index: usize) -> bool {
        match self {
            SkinningMode::Cpu => true,
            SkinningMode::Gpu => index == 0,
        }
    }
}

/// Applies a new skinning mode to the configuration and every instance.
///
/// Returns `false` if the mode was already active, in which case nothing is
/// touched.
pub fn switch_skinning_mode(
    config: &mut RenderConfig,
    crowd: &mut [CharacterInstance],
    mode: SkinningMode,
) -> bool {
    if !config.set_skinning_mode(mode) {
        return false;
    }
    for instance in crowd.iter_mut() {
        instance.set_skinning_mode(mode);
    }
    log::info!(
        "skinning mode switched to {:?} for {} instances",
        mode,
        crowd.len()
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_pick_layout_and_technique_per_mode() {
        assert_eq!(SkinningMode::Cpu.vertex_layout(), VertexLayoutKind::StaticMesh);
        assert_eq!(SkinningMode::Gpu.vertex_layout(), VertexLayoutKind::GpuSkinnedMesh);
        assert_eq!(SkinningMode::Cpu.technique(), "VertexLight");
        assert_eq!(SkinningMode::Gpu.technique(), "VertexLight_Gpu_Skinning");
    }

    #[test]
    fn should_only_let_first_gpu_instance_commit() {
        assert!(SkinningMode::Gpu.commits_shared_constants(0));
        assert!(!SkinningMode::Gpu.commits_shared_constants(1));
        assert!((0..5).all(|i| SkinningMode::Cpu.commits_shared_constants(i)));
    }
}
