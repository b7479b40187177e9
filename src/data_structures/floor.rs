//! The scrolling floor quad under the crowd.

use cgmath::Matrix4;

/// Half extent of the floor quad in world units.
pub const FLOOR_SIZE: f32 = 5.0;
pub const WALK_SPEED: f32 = 0.5;
pub const RUN_SPEED: f32 = 0.95;

/// How many texture repeats one floor length covers along V.
const UV_SCROLL_FACTOR: f64 = 1.8;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FloorVertex {
    pub position: [f32; 3],
    pub tex_coords: [f32; 2],
}

impl FloorVertex {
    pub const STRIDE: u32 = std::mem::size_of::<FloorVertex>() as u32;

    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<FloorVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                // shares the texture coordinate slot of the character meshes
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 4,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }
    }
}

pub const FLOOR_VERTEX_COUNT: u32 = 6;

#[derive(Debug, Default)]
pub struct FloorSurface {
    scroll: f64,
}

impl FloorSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total V offset scrolled since the session started. Grows without bound.
    pub fn scroll(&self) -> f64 {
        self.scroll
    }

    pub fn advance(&mut self, elapsed: f32, speed: f32, time_scale: f32) {
        let delta =
            elapsed as f64 * speed as f64 * time_scale as f64 / FLOOR_SIZE as f64 * UV_SCROLL_FACTOR;
        self.scroll += delta.max(0.0);
    }

    /// Two triangles in the XZ plane with V shifted by the scroll offset.
    ///
    /// The offset is taken modulo one texture repeat; the floor texture is
    /// sampled with wrapping so the result is the same as the raw offset.
    pub fn vertices(&self) -> [FloorVertex; FLOOR_VERTEX_COUNT as usize] {
        let v = self.scroll.rem_euclid(1.0) as f32;
        let s = FLOOR_SIZE;
        let vertex = |x: f32, z: f32, u: f32, tv: f32| FloorVertex {
            position: [x, 0.0, z],
            tex_coords: [u, tv + v],
        };
        [
            vertex(-s, -s, 0.0, 1.0),
            vertex(s, -s, 1.0, 1.0),
            vertex(-s, s, 0.0, 0.0),
            vertex(s, -s, 1.0, 1.0),
            vertex(s, s, 1.0, 0.0),
            vertex(-s, s, 0.0, 0.0),
        ]
    }

    /// World matrix swapping Y and Z so the XZ-authored quad lies flat in the
    /// Z-up scene.
    pub fn world_matrix() -> Matrix4<f32> {
        Matrix4::new(
            1.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        )
    }
}
