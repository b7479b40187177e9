//! The graphics device contract.
//!
//! Everything the crowd needs from the graphics API goes through
//! [`GraphicsDevice`]. Resources are referred to by opaque
//! [`ResourceHandle`]s; the device owns the backing objects and the
//! [`ResourceLifecycleTracker`](crate::lifecycle::ResourceLifecycleTracker)
//! owns the handles.
//!
//! Drawing follows an effect model: parameters are set on an effect, a
//! technique is selected and draws are issued between `begin_effect`/`end_effect`
//! and `begin_pass`/`end_pass`. Parameter changes made inside a pass only reach
//! the GPU once [`GraphicsDevice::commit_changes`] is called.

use std::path::Path;

use crate::error::DeviceError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Font,
    Effect,
    VertexLayout,
    VertexBuffer,
    Sprite,
    Texture,
}

impl ResourceKind {
    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::Font => "font",
            ResourceKind::Effect => "effect",
            ResourceKind::VertexLayout => "vertex layout",
            ResourceKind::VertexBuffer => "vertex buffer",
            ResourceKind::Sprite => "sprite",
            ResourceKind::Texture => "texture",
        }
    }
}

/// Opaque reference to a resource living on a [`GraphicsDevice`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    id: u64,
    kind: ResourceKind,
}

impl ResourceHandle {
    pub fn new(id: u64, kind: ResourceKind) -> Self {
        Self { id, kind }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

/// The vertex formats the crowd renders with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexLayoutKind {
    /// Position, normal, tangent, binormal on stream 0 and UV on stream 1.
    StaticMesh,
    /// [`VertexLayoutKind::StaticMesh`] plus blend indices and weights on stream 2.
    GpuSkinnedMesh,
    /// Position and UV interleaved on stream 0.
    Floor,
}

impl VertexLayoutKind {
    pub const ALL: [VertexLayoutKind; 3] = [
        VertexLayoutKind::StaticMesh,
        VertexLayoutKind::GpuSkinnedMesh,
        VertexLayoutKind::Floor,
    ];

    /// Byte stride of every stream the layout reads from.
    pub fn stream_strides(self) -> &'static [u32] {
        match self {
            VertexLayoutKind::StaticMesh => &[48, 8],
            VertexLayoutKind::GpuSkinnedMesh => &[48, 8, 20],
            VertexLayoutKind::Floor => &[20],
        }
    }
}

/// Fragments with alpha below this reference are discarded.
pub const ALPHA_TEST_REFERENCE: u8 = 0x80;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FillMode {
    Solid,
    Wireframe,
}

/// Size and format information about the presentation surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackBufferDesc {
    pub width: u32,
    pub height: u32,
}

impl BackBufferDesc {
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FontDesc {
    pub family: String,
    pub height: u32,
    pub bold: bool,
}

impl Default for FontDesc {
    fn default() -> Self {
        Self {
            family: "Arial".to_string(),
            height: 15,
            bold: true,
        }
    }
}

/// A value assigned to a named effect parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum EffectValue {
    Matrix(cgmath::Matrix4<f32>),
    MatrixArray(Vec<cgmath::Matrix4<f32>>),
    Vector(cgmath::Vector3<f32>),
    Float(f32),
    Bool(bool),
    Texture(ResourceHandle),
}

/// Names of the effect parameters the crowd effect declares.
pub mod params {
    /// Shared by every draw of a pass.
    pub const VIEW_PROJECTION: &str = "view_projection";
    pub const WORLD: &str = "world";
    pub const BONE_PALETTE: &str = "bone_palette";
    pub const CAMERA_POSITION: &str = "camera_position";
    pub const LIGHT_DIRECTION: &str = "light_direction";
    pub const AMBIENT: &str = "ambient";
    pub const DIFFUSE: &str = "diffuse";
    pub const DIFFUSE_ENABLED: &str = "diffuse_enabled";
    pub const DIFFUSE_TEXTURE: &str = "diffuse_texture";
}

/// Shader model version as (major, minor).
pub type ShaderVersion = (u8, u8);

#[derive(Clone, Debug, PartialEq)]
pub struct DeviceCaps {
    pub adapter_name: String,
    pub pixel_shader_version: ShaderVersion,
    pub vertex_shader_version: ShaderVersion,
    pub hardware_transform_and_light: bool,
    /// Whether the back-buffer format supports blending after the pixel shader.
    pub post_pixel_shader_blending: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexProcessing {
    Hardware,
    Software,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceSettings {
    pub vertex_processing: VertexProcessing,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            vertex_processing: VertexProcessing::Hardware,
        }
    }
}

pub const MIN_PIXEL_SHADER_VERSION: ShaderVersion = (2, 0);
pub const MIN_HW_VERTEX_SHADER_VERSION: ShaderVersion = (1, 1);

/// Rejects devices that cannot run the crowd effect.
pub fn is_device_acceptable(caps: &DeviceCaps) -> Result<(), String> {
    if caps.pixel_shader_version < MIN_PIXEL_SHADER_VERSION {
        return Err(format!(
            "{} supports pixel shader {}.{}, at least {}.{} is required",
            caps.adapter_name,
            caps.pixel_shader_version.0,
            caps.pixel_shader_version.1,
            MIN_PIXEL_SHADER_VERSION.0,
            MIN_PIXEL_SHADER_VERSION.1,
        ));
    }
    if !caps.post_pixel_shader_blending {
        return Err(format!(
            "{} cannot alpha blend on the back-buffer format",
            caps.adapter_name
        ));
    }
    Ok(())
}

/// Adjusts the settings chosen by the framework before the device is created.
///
/// Falls back to software vertex processing when the hardware lacks
/// transform & lighting or vertex shader 1.1.
pub fn modify_device_settings(mut settings: DeviceSettings, caps: &DeviceCaps) -> DeviceSettings {
    if !caps.hardware_transform_and_light
        || caps.vertex_shader_version < MIN_HW_VERTEX_SHADER_VERSION
    {
        if settings.vertex_processing != VertexProcessing::Software {
            log::warn!(
                "{} lacks hardware vertex processing, switching to software",
                caps.adapter_name
            );
        }
        settings.vertex_processing = VertexProcessing::Software;
    }
    settings
}

/// The graphics API as seen by the crowd.
///
/// Implementations must tolerate `release` being called for every handle they
/// handed out exactly once; releasing an unknown handle is an error.
pub trait GraphicsDevice {
    fn caps(&self) -> &DeviceCaps;

    fn create_font(&mut self, desc: &FontDesc) -> Result<ResourceHandle, DeviceError>;
    /// Loads and compiles a shader effect from an asset path.
    fn create_effect(&mut self, path: &Path) -> Result<ResourceHandle, DeviceError>;
    fn create_vertex_layout(
        &mut self,
        kind: VertexLayoutKind,
    ) -> Result<ResourceHandle, DeviceError>;
    /// Creates a dynamic vertex buffer of `size` bytes.
    fn create_vertex_buffer(&mut self, size: u64) -> Result<ResourceHandle, DeviceError>;
    fn create_sprite(&mut self) -> Result<ResourceHandle, DeviceError>;
    fn create_texture(&mut self, path: &Path) -> Result<ResourceHandle, DeviceError>;
    fn release(&mut self, handle: ResourceHandle) -> Result<(), DeviceError>;

    /// Drops device dependent state of a resource that survives a reset.
    fn invalidate(&mut self, _handle: ResourceHandle) {}
    /// Restores what [`GraphicsDevice::invalidate`] dropped.
    fn restore(&mut self, _handle: ResourceHandle) -> Result<(), DeviceError> {
        Ok(())
    }

    fn write_vertex_buffer(
        &mut self,
        buffer: ResourceHandle,
        data: &[u8],
    ) -> Result<(), DeviceError>;

    /// Starts a frame. Returns `Ok(false)` when nothing can be presented this
    /// frame, in which case the frame is skipped.
    fn begin_scene(&mut self, clear: [f32; 4]) -> Result<bool, DeviceError>;
    fn end_scene(&mut self) -> Result<(), DeviceError>;

    fn set_fill_mode(&mut self, mode: FillMode);
    fn set_vertex_layout(&mut self, layout: ResourceHandle) -> Result<(), DeviceError>;
    fn set_stream_source(
        &mut self,
        slot: u32,
        buffer: ResourceHandle,
        stride: u32,
    ) -> Result<(), DeviceError>;

    fn set_technique(&mut self, effect: ResourceHandle, technique: &str)
    -> Result<(), DeviceError>;
    fn set_effect_param(
        &mut self,
        effect: ResourceHandle,
        name: &str,
        value: EffectValue,
    ) -> Result<(), DeviceError>;
    /// Opens the effect bracket and returns the number of passes of the
    /// current technique.
    fn begin_effect(&mut self, effect: ResourceHandle) -> Result<u32, DeviceError>;
    fn begin_pass(&mut self, effect: ResourceHandle, pass: u32) -> Result<(), DeviceError>;
    fn commit_changes(&mut self, effect: ResourceHandle) -> Result<(), DeviceError>;
    fn end_pass(&mut self, effect: ResourceHandle) -> Result<(), DeviceError>;
    fn end_effect(&mut self, effect: ResourceHandle) -> Result<(), DeviceError>;

    /// Draws `vertex_count` vertices as a triangle list from the bound streams.
    fn draw_triangles(&mut self, first_vertex: u32, vertex_count: u32)
    -> Result<(), DeviceError>;

    fn draw_text(
        &mut self,
        font: ResourceHandle,
        sprite: ResourceHandle,
        position: [i32; 2],
        color: [f32; 4],
        text: &str,
    ) -> Result<(), DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> DeviceCaps {
        DeviceCaps {
            adapter_name: "test".to_string(),
            pixel_shader_version: (3, 0),
            vertex_shader_version: (3, 0),
            hardware_transform_and_light: true,
            post_pixel_shader_blending: true,
        }
    }

    #[test]
    fn should_reject_old_pixel_shaders() {
        let caps = DeviceCaps {
            pixel_shader_version: (1, 4),
            ..caps()
        };
        assert!(is_device_acceptable(&caps).is_err());
        assert!(is_device_acceptable(&self::caps()).is_ok());
    }

    #[test]
    fn should_reject_formats_without_blending() {
        let caps = DeviceCaps {
            post_pixel_shader_blending: false,
            ..caps()
        };
        assert!(is_device_acceptable(&caps).is_err());
    }

    #[test]
    fn should_force_software_vertex_processing() {
        let no_tnl = DeviceCaps {
            hardware_transform_and_light: false,
            ..caps()
        };
        let old_vs = DeviceCaps {
            vertex_shader_version: (1, 0),
            ..caps()
        };
        for caps in [no_tnl, old_vs] {
            let settings = modify_device_settings(DeviceSettings::default(), &caps);
            assert_eq!(settings.vertex_processing, VertexProcessing::Software);
        }
        let settings = modify_device_settings(DeviceSettings::default(), &caps());
        assert_eq!(settings.vertex_processing, VertexProcessing::Hardware);
    }
}
