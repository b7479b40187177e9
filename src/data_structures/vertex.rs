//! Vertex streams of the character meshes.
//!
//! A skinned mesh is split over three streams so the host-skinning path only
//! rewrites the first one each frame:
//!
//! | stream | type            | stride |
//! |--------|-----------------|--------|
//! | 0      | [`MeshVertex`]  | 48     |
//! | 1      | [`UvVertex`]    | 8      |
//! | 2      | [`BlendVertex`] | 20     |

use std::mem;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
    pub binormal: [f32; 3],
}

impl MeshVertex {
    pub const STRIDE: u32 = mem::size_of::<MeshVertex>() as u32;

    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<MeshVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 6]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 9]>() as wgpu::BufferAddress,
                    shader_location: 3,
                    format: wgpu::VertexFormat::Float32x3,
                },
            ],
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct UvVertex {
    pub tex_coords: [f32; 2],
}

impl UvVertex {
    pub const STRIDE: u32 = mem::size_of::<UvVertex>() as u32;

    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<UvVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                offset: 0,
                shader_location: 4,
                format: wgpu::VertexFormat::Float32x2,
            }],
        }
    }
}

/// Bone influences of one vertex, read only by the GPU skinning technique.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BlendVertex {
    pub indices: [u8; 4],
    pub weights: [f32; 4],
}

impl BlendVertex {
    pub const STRIDE: u32 = mem::size_of::<BlendVertex>() as u32;

    /// All weight on a single bone.
    pub fn rigid(bone: u8) -> Self {
        Self {
            indices: [bone, 0, 0, 0],
            weights: [1.0, 0.0, 0.0, 0.0],
        }
    }

    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<BlendVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 5,
                    format: wgpu::VertexFormat::Uint8x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[u8; 4]>() as wgpu::BufferAddress,
                    shader_location: 6,
                    format: wgpu::VertexFormat::Float32x4,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::VertexLayoutKind;

    #[test]
    fn should_match_declared_stream_strides() {
        assert_eq!(
            VertexLayoutKind::GpuSkinnedMesh.stream_strides(),
            &[MeshVertex::STRIDE, UvVertex::STRIDE, BlendVertex::STRIDE]
        );
    }
}
