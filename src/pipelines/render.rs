use crate::{
    data_structures::{
        floor::FloorVertex,
        texture::Texture,
        vertex::{BlendVertex, MeshVertex, UvVertex},
    },
    device::{FillMode, VertexLayoutKind},
};

/// Vertex buffer layouts bound for each stream of a vertex format.
pub fn vertex_layouts(kind: VertexLayoutKind) -> Vec<wgpu::VertexBufferLayout<'static>> {
    match kind {
        VertexLayoutKind::StaticMesh => vec![MeshVertex::desc(), UvVertex::desc()],
        VertexLayoutKind::GpuSkinnedMesh => {
            vec![MeshVertex::desc(), UvVertex::desc(), BlendVertex::desc()]
        }
        VertexLayoutKind::Floor => vec![FloorVertex::desc()],
    }
}

/// The shader entry points of one technique.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryPoints {
    pub vertex: String,
    pub fragment: String,
}

impl EntryPoints {
    /// `VertexLight_Gpu_Skinning` maps to `vs_vertex_light_gpu_skinning` and
    /// `fs_vertex_light_gpu_skinning`.
    pub fn for_technique(technique: &str) -> Self {
        let mut snake = String::with_capacity(technique.len() + 4);
        let mut previous_lower = false;
        for c in technique.chars() {
            if c.is_ascii_uppercase() && previous_lower {
                snake.push('_');
            }
            previous_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            snake.push(c.to_ascii_lowercase());
        }
        Self {
            vertex: format!("vs_{}", snake),
            fragment: format!("fs_{}", snake),
        }
    }
}

pub fn mk_render_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    color_format: wgpu::TextureFormat,
    fill: FillMode,
    vertex_layouts: &[wgpu::VertexBufferLayout],
    shader: &wgpu::ShaderModule,
    entry_points: &EntryPoints,
) -> wgpu::RenderPipeline {
    let polygon_mode = match fill {
        FillMode::Solid => wgpu::PolygonMode::Fill,
        FillMode::Wireframe => wgpu::PolygonMode::Line,
    };

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        cache: None,
        label: Some(entry_points.vertex.as_str()),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some(entry_points.vertex.as_str()),
            buffers: vertex_layouts,
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some(entry_points.fragment.as_str()),
            targets: &[Some(wgpu::ColorTargetState {
                format: color_format,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            // the floor is authored with the opposite winding of the characters
            cull_mode: None,
            polygon_mode,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: Texture::DEPTH_FORMAT,
            depth_write_enabled: Some(true),
            depth_compare: Some(wgpu::CompareFunction::Less),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview_mask: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_derive_entry_points_from_technique_names() {
        assert_eq!(EntryPoints::for_technique("NoLight").vertex, "vs_no_light");
        assert_eq!(
            EntryPoints::for_technique("VertexLight").fragment,
            "fs_vertex_light"
        );
        assert_eq!(
            EntryPoints::for_technique("VertexLight_Gpu_Skinning").vertex,
            "vs_vertex_light_gpu_skinning"
        );
    }

    #[test]
    fn should_bind_one_buffer_per_stream() {
        for kind in VertexLayoutKind::ALL {
            let layouts = vertex_layouts(kind);
            let strides: Vec<u32> = layouts.iter().map(|l| l.array_stride as u32).collect();
            assert_eq!(strides, kind.stream_strides());
        }
    }
}
