//! Screen-space text.
//!
//! Strings queued with `draw_text` during a scene are laid out with glyphon and
//! drawn in a second pass over the finished frame, so they always end up on top
//! of the geometry. Without the `ui` feature text is only traced.

#[cfg(feature = "ui")]
use std::collections::HashMap;

#[cfg(feature = "ui")]
use glyphon::{
    Attrs, Buffer, Cache, Color, Family, FontSystem, Metrics, Resolution, Shaping, SwashCache,
    TextArea, TextAtlas, TextBounds, TextRenderer, Viewport, Weight,
};

#[cfg(feature = "ui")]
use crate::error::DeviceError;

/// One string queued for the overlay, in back-buffer pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub position: [i32; 2],
    pub color: [f32; 4],
    pub family: String,
    pub height: u32,
    pub bold: bool,
}

#[cfg(feature = "ui")]
pub struct TextOverlay {
    font_system: FontSystem,
    swash_cache: SwashCache,
    viewport: Viewport,
    atlas: TextAtlas,
    renderer: TextRenderer,
    installed_families: HashMap<String, bool>,
}

#[cfg(feature = "ui")]
impl TextOverlay {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, format: wgpu::TextureFormat) -> Self {
        let cache = Cache::new(device);
        let viewport = Viewport::new(device, &cache);
        let mut atlas = TextAtlas::new(device, queue, &cache, format);
        let renderer = TextRenderer::new(&mut atlas, device, wgpu::MultisampleState::default(), None);
        Self {
            font_system: FontSystem::new(),
            swash_cache: SwashCache::new(),
            viewport,
            atlas,
            renderer,
            installed_families: HashMap::new(),
        }
    }

    /// Lays out `runs` and uploads their glyphs. Returns `false` when there is
    /// nothing to draw.
    pub fn prepare(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        size: [u32; 2],
        runs: &[TextRun],
    ) -> Result<bool, DeviceError> {
        if runs.is_empty() {
            return Ok(false);
        }
        self.viewport.update(
            queue,
            Resolution {
                width: size[0],
                height: size[1],
            },
        );
        let buffers: Vec<Buffer> = runs.iter().map(|run| self.layout(run, size)).collect();
        let bounds = TextBounds {
            left: 0,
            top: 0,
            right: size[0] as i32,
            bottom: size[1] as i32,
        };
        let areas = runs.iter().zip(&buffers).map(|(run, buffer)| TextArea {
            buffer,
            left: run.position[0] as f32,
            top: run.position[1] as f32,
            scale: 1.0,
            bounds,
            default_color: to_color(run.color),
            custom_glyphs: &[],
        });
        self.renderer
            .prepare(
                device,
                queue,
                &mut self.font_system,
                &mut self.atlas,
                &self.viewport,
                areas,
                &mut self.swash_cache,
            )
            .map_err(|e| DeviceError::Text(e.to_string()))?;
        Ok(true)
    }

    pub fn render(&self, pass: &mut wgpu::RenderPass<'_>) -> Result<(), DeviceError> {
        self.renderer
            .render(&self.atlas, &self.viewport, pass)
            .map_err(|e| DeviceError::Text(e.to_string()))
    }

    /// Evicts glyphs that were not used by the last frame.
    pub fn trim(&mut self) {
        self.atlas.trim();
    }

    fn layout(&mut self, run: &TextRun, size: [u32; 2]) -> Buffer {
        let height = run.height.max(1) as f32;
        let mut buffer = Buffer::new(&mut self.font_system, Metrics::new(height, height * 1.2));
        buffer.set_size(
            &mut self.font_system,
            Some(size[0] as f32),
            Some(size[1] as f32),
        );

        let installed = self.is_installed(&run.family);
        let family = if installed {
            Family::Name(&run.family)
        } else {
            Family::SansSerif
        };
        let weight = if run.bold { Weight::BOLD } else { Weight::NORMAL };
        let attrs = Attrs::new().family(family).weight(weight);
        buffer.set_text(&mut self.font_system, &run.text, &attrs, Shaping::Advanced, None);
        buffer.shape_until_scroll(&mut self.font_system, false);
        buffer
    }

    fn is_installed(&mut self, family: &str) -> bool {
        if let Some(installed) = self.installed_families.get(family) {
            return *installed;
        }
        let installed = !family.is_empty()
            && self
                .font_system
                .db()
                .faces()
                .any(|face| face.families.iter().any(|(name, _)| name == family));
        if !installed {
            log::debug!("font family '{}' is not installed, using sans-serif", family);
        }
        self.installed_families.insert(family.to_string(), installed);
        installed
    }
}

#[cfg(feature = "ui")]
fn to_color([r, g, b, a]: [f32; 4]) -> Color {
    let channel = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    Color::rgba(channel(r), channel(g), channel(b), channel(a))
}

#[cfg(all(test, feature = "ui"))]
mod tests {
    use super::*;

    #[test]
    fn should_convert_normalized_colour_to_bytes() {
        assert_eq!(to_color([1.0, 1.0, 0.0, 1.0]), Color::rgba(255, 255, 0, 255));
        assert_eq!(to_color([2.0, -1.0, 0.5, 0.0]), Color::rgba(255, 0, 128, 0));
    }
}
