//! The on-screen settings panel.
//!
//! [`GuiLayer`] is the contract the input router and the frame talk to.
//! [`SettingsPanel`] implements it with a column of text widgets docked to the
//! top-right corner of the back buffer. Widgets never mutate the configuration
//! themselves; they report a [`ControlEvent`] that the session applies.

use crate::{
    config::{
        self, MAX_INSTANCES_PER_AXIS, MIN_INSTANCES_PER_AXIS, RenderConfig, TIME_SCALE_SLIDER_MAX,
        TIME_SCALE_SLIDER_MIN,
    },
    device::{BackBufferDesc, GraphicsDevice, ResourceHandle},
    error::DeviceError,
    input::{InputEvent, Key, MouseButton},
};

pub const PANEL_WIDTH: u32 = 170;
pub const PANEL_HEIGHT: u32 = 300;

const TEXT_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

/// A configuration change requested through the GUI.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlEvent {
    /// Raw time-scale slider position.
    TimeScale(i32),
    InstanceCount(u32),
    GpuSkinning(bool),
    DiffuseMap(bool),
    Wireframe(bool),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GuiResponse {
    Ignored,
    Consumed,
    Control(ControlEvent),
}

pub trait GuiLayer {
    fn handle_input(&mut self, event: &InputEvent, config: &RenderConfig) -> GuiResponse;
    /// Re-docks the layer after the back buffer changed size.
    fn on_resize(&mut self, back_buffer: BackBufferDesc);
    /// Top-left corner in back-buffer pixels.
    fn location(&self) -> (i32, i32);
    fn render(
        &self,
        device: &mut dyn GraphicsDevice,
        font: ResourceHandle,
        sprite: ResourceHandle,
        config: &RenderConfig,
    ) -> Result<(), DeviceError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WidgetId {
    TimeScaleLabel,
    TimeScaleSlider,
    GpuSkinning,
    DiffuseMap,
    Wireframe,
    TotalLabel,
    CountSlider,
}

#[derive(Clone, Copy, Debug)]
struct Widget {
    id: WidgetId,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
}

impl Widget {
    const fn new(id: WidgetId, x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            id,
            x,
            y,
            width,
            height,
        }
    }

    fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    /// Position of `x` along the widget, in `[0, 1]`.
    fn fraction(&self, x: i32) -> f32 {
        ((x - self.x) as f32 / (self.width - 1).max(1) as f32).clamp(0.0, 1.0)
    }
}

/// Widget rectangles relative to the panel origin.
const WIDGETS: [Widget; 7] = [
    Widget::new(WidgetId::TimeScaleLabel, 50, 10, 100, 24),
    Widget::new(WidgetId::TimeScaleSlider, 50, 26, 100, 22),
    Widget::new(WidgetId::GpuSkinning, 50, 56, 100, 22),
    Widget::new(WidgetId::DiffuseMap, 50, 86, 100, 22),
    Widget::new(WidgetId::Wireframe, 50, 106, 100, 22),
    Widget::new(WidgetId::TotalLabel, 50, 136, 100, 24),
    Widget::new(WidgetId::CountSlider, 50, 156, 100, 22),
];

#[derive(Debug)]
pub struct SettingsPanel {
    origin: (i32, i32),
    size: (u32, u32),
    dragging: Option<WidgetId>,
}

impl Default for SettingsPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsPanel {
    pub fn new() -> Self {
        Self {
            origin: (0, 0),
            size: (PANEL_WIDTH, PANEL_HEIGHT),
            dragging: None,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    fn contains(&self, x: i32, y: i32) -> bool {
        let (ox, oy) = self.origin;
        x >= ox && x < ox + self.size.0 as i32 && y >= oy && y < oy + self.size.1 as i32
    }

    fn widget_at(&self, x: i32, y: i32) -> Option<Widget> {
        let (lx, ly) = (x - self.origin.0, y - self.origin.1);
        WIDGETS.iter().copied().find(|w| w.contains(lx, ly))
    }

    fn widget(id: WidgetId) -> Widget {
        WIDGETS
            .iter()
            .copied()
            .find(|w| w.id == id)
            .unwrap_or(WIDGETS[0])
    }

    fn slide(&self, id: WidgetId, x: i32) -> Option<ControlEvent> {
        let f = Self::widget(id).fraction(x - self.origin.0);
        let lerp = |min: i32, max: i32| min + (f * (max - min) as f32).round() as i32;
        match id {
            WidgetId::TimeScaleSlider => Some(ControlEvent::TimeScale(lerp(
                TIME_SCALE_SLIDER_MIN,
                TIME_SCALE_SLIDER_MAX,
            ))),
            WidgetId::CountSlider => Some(ControlEvent::InstanceCount(lerp(
                MIN_INSTANCES_PER_AXIS as i32,
                MAX_INSTANCES_PER_AXIS as i32,
            ) as u32)),
            _ => None,
        }
    }

    fn click(&mut self, widget: Widget, x: i32, config: &RenderConfig) -> GuiResponse {
        let control = match widget.id {
            WidgetId::TimeScaleSlider | WidgetId::CountSlider => {
                self.dragging = Some(widget.id);
                self.slide(widget.id, x)
            }
            WidgetId::GpuSkinning => Some(ControlEvent::GpuSkinning(
                !config.skinning_mode().is_gpu(),
            )),
            WidgetId::DiffuseMap => Some(ControlEvent::DiffuseMap(!config.diffuse_map_enabled())),
            WidgetId::Wireframe => Some(ControlEvent::Wireframe(!config.wireframe())),
            WidgetId::TimeScaleLabel | WidgetId::TotalLabel => None,
        };
        control.map_or(GuiResponse::Consumed, GuiResponse::Control)
    }

    fn accelerator(&self, key: Key, config: &RenderConfig) -> Option<ControlEvent> {
        let slider = config::slider_from_time_scale(config.time_scale());
        let count = config.instances_per_axis();
        match key {
            Key::Character('g') => Some(ControlEvent::GpuSkinning(!config.skinning_mode().is_gpu())),
            Key::Character('m') => Some(ControlEvent::DiffuseMap(!config.diffuse_map_enabled())),
            Key::Character('f') => Some(ControlEvent::Wireframe(!config.wireframe())),
            Key::Character('+') | Key::Character('=') if count < MAX_INSTANCES_PER_AXIS => {
                Some(ControlEvent::InstanceCount(count + 1))
            }
            Key::Character('-') if count > MIN_INSTANCES_PER_AXIS => {
                Some(ControlEvent::InstanceCount(count - 1))
            }
            Key::Character(']') if slider < TIME_SCALE_SLIDER_MAX => {
                Some(ControlEvent::TimeScale(slider + 1))
            }
            Key::Character('[') if slider > TIME_SCALE_SLIDER_MIN => {
                Some(ControlEvent::TimeScale(slider - 1))
            }
            _ => None,
        }
    }

    fn lines(config: &RenderConfig) -> [(WidgetId, String); 6] {
        let check = |on: bool| if on { "[x]" } else { "[ ]" };
        [
            (
                WidgetId::TimeScaleLabel,
                format!("Time scale {:.2}x", config.time_scale()),
            ),
            (
                WidgetId::GpuSkinning,
                format!("{} GPU Skinning", check(config.skinning_mode().is_gpu())),
            ),
            (
                WidgetId::DiffuseMap,
                format!("{} Diffusemap", check(config.diffuse_map_enabled())),
            ),
            (
                WidgetId::Wireframe,
                format!("{} Wireframe", check(config.wireframe())),
            ),
            (
                WidgetId::TotalLabel,
                format!("Total: {}", config.total_instances()),
            ),
            (
                WidgetId::CountSlider,
                format!("< {} >", config.instances_per_axis()),
            ),
        ]
    }
}

impl GuiLayer for SettingsPanel {
    fn handle_input(&mut self, event: &InputEvent, config: &RenderConfig) -> GuiResponse {
        if !config.show_help_overlay() {
            self.dragging = None;
            return GuiResponse::Ignored;
        }
        match *event {
            InputEvent::MouseDown {
                button: MouseButton::Left,
                x,
                y,
            } => {
                let (x, y) = (x as i32, y as i32);
                if !self.contains(x, y) {
                    return GuiResponse::Ignored;
                }
                match self.widget_at(x, y) {
                    Some(widget) => self.click(widget, x, config),
                    None => GuiResponse::Consumed,
                }
            }
            InputEvent::MouseMove { x, .. } => match self.dragging {
                Some(id) => self
                    .slide(id, x as i32)
                    .map_or(GuiResponse::Consumed, GuiResponse::Control),
                None => GuiResponse::Ignored,
            },
            InputEvent::MouseUp {
                button: MouseButton::Left,
                ..
            } => {
                if self.dragging.take().is_some() {
                    GuiResponse::Consumed
                } else {
                    GuiResponse::Ignored
                }
            }
            InputEvent::Key { key, pressed: true } => self
                .accelerator(key, config)
                .map_or(GuiResponse::Ignored, GuiResponse::Control),
            _ => GuiResponse::Ignored,
        }
    }

    fn on_resize(&mut self, back_buffer: BackBufferDesc) {
        self.origin = (back_buffer.width as i32 - PANEL_WIDTH as i32, 0);
        self.size = (PANEL_WIDTH, PANEL_HEIGHT);
    }

    fn location(&self) -> (i32, i32) {
        self.origin
    }

    fn render(
        &self,
        device: &mut dyn GraphicsDevice,
        font: ResourceHandle,
        sprite: ResourceHandle,
        config: &RenderConfig,
    ) -> Result<(), DeviceError> {
        for (id, text) in Self::lines(config) {
            let w = Self::widget(id);
            device.draw_text(
                font,
                sprite,
                [self.origin.0 + w.x, self.origin.1 + w.y],
                TEXT_COLOR,
                &text,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docked() -> SettingsPanel {
        let mut panel = SettingsPanel::new();
        panel.on_resize(BackBufferDesc {
            width: 800,
            height: 600,
        });
        panel
    }

    fn click(panel: &mut SettingsPanel, x: f64, y: f64, config: &RenderConfig) -> GuiResponse {
        panel.handle_input(
            &InputEvent::MouseDown {
                button: MouseButton::Left,
                x,
                y,
            },
            config,
        )
    }

    #[test]
    fn should_dock_to_top_right() {
        let panel = docked();
        assert_eq!(panel.location(), (630, 0));
        assert_eq!(panel.size(), (170, 300));
    }

    #[test]
    fn should_toggle_gpu_skinning_checkbox() {
        let mut panel = docked();
        let config = RenderConfig::default();
        assert_eq!(
            click(&mut panel, 690.0, 60.0, &config),
            GuiResponse::Control(ControlEvent::GpuSkinning(true))
        );
    }

    #[test]
    fn should_map_count_slider_ends() {
        let mut panel = docked();
        let config = RenderConfig::default();
        assert_eq!(
            click(&mut panel, 680.0, 160.0, &config),
            GuiResponse::Control(ControlEvent::InstanceCount(1))
        );
        assert_eq!(
            panel.handle_input(&InputEvent::MouseMove { x: 779.0, y: 160.0 }, &config),
            GuiResponse::Control(ControlEvent::InstanceCount(60))
        );
    }

    #[test]
    fn should_ignore_clicks_outside_or_when_hidden() {
        let mut panel = docked();
        let mut config = RenderConfig::default();
        assert_eq!(click(&mut panel, 10.0, 10.0, &config), GuiResponse::Ignored);
        config.set_show_help_overlay(false);
        assert_eq!(click(&mut panel, 690.0, 60.0, &config), GuiResponse::Ignored);
    }
}
