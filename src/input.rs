//! Input routing.
//!
//! Every event goes to the GUI layer first, then to the camera controller and
//! finally to the application hotkeys. The first consumer wins.

use winit::{
    event::{ElementState, MouseScrollDelta, WindowEvent},
    keyboard::{Key as WinitKey, NamedKey},
};

use crate::{camera::CameraController, config::RenderConfig, gui::{ControlEvent, GuiLayer, GuiResponse}};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Keys the application and its collaborators react to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    /// A printable key, lowercased.
    Character(char),
    F1,
    Left,
    Right,
    Up,
    Down,
    Escape,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputEvent {
    MouseDown { button: MouseButton, x: f64, y: f64 },
    MouseUp { button: MouseButton, x: f64, y: f64 },
    MouseMove { x: f64, y: f64 },
    /// Positive values scroll away from the user.
    Wheel { delta: f32 },
    Key { key: Key, pressed: bool },
}

pub const HELP_KEY: Key = Key::F1;

/// Who ended up handling an event.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Routed {
    /// The GUI consumed the event and reported a control change.
    Control(ControlEvent),
    Gui,
    Camera,
    HelpToggled,
    Ignored,
}

#[derive(Debug, Default)]
pub struct InputEventRouter {
    cursor: (f64, f64),
}

impl InputEventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(
        &mut self,
        event: &InputEvent,
        gui: &mut dyn GuiLayer,
        camera: &mut CameraController,
        config: &mut RenderConfig,
    ) -> Routed {
        if let InputEvent::MouseMove { x, y } = *event {
            self.cursor = (x, y);
        }

        match gui.handle_input(event, config) {
            GuiResponse::Control(control) => return Routed::Control(control),
            GuiResponse::Consumed => return Routed::Gui,
            GuiResponse::Ignored => {}
        }

        if camera.handle_input(event) {
            return Routed::Camera;
        }

        if let InputEvent::Key {
            key: HELP_KEY,
            pressed: true,
        } = *event
        {
            config.toggle_help_overlay();
            log::debug!("help overlay {}", if config.show_help_overlay() { "shown" } else { "hidden" });
            return Routed::HelpToggled;
        }
        Routed::Ignored
    }

    /// Last cursor position seen, used to give button events a location.
    pub fn cursor(&self) -> (f64, f64) {
        self.cursor
    }

    /// Converts a window event into an [`InputEvent`], if it is one the
    /// application cares about.
    pub fn translate(&mut self, event: &WindowEvent) -> Option<InputEvent> {
        match event {
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = (position.x, position.y);
                Some(InputEvent::MouseMove {
                    x: position.x,
                    y: position.y,
                })
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let button = match button {
                    winit::event::MouseButton::Left => MouseButton::Left,
                    winit::event::MouseButton::Right => MouseButton::Right,
                    winit::event::MouseButton::Middle => MouseButton::Middle,
                    _ => return None,
                };
                let (x, y) = self.cursor;
                Some(match state {
                    ElementState::Pressed => InputEvent::MouseDown { button, x, y },
                    ElementState::Released => InputEvent::MouseUp { button, x, y },
                })
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let delta = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y * 120.0,
                    MouseScrollDelta::PixelDelta(p) => p.y as f32,
                };
                Some(InputEvent::Wheel { delta })
            }
            WindowEvent::KeyboardInput { event, .. } => Some(InputEvent::Key {
                key: translate_key(&event.logical_key),
                pressed: event.state.is_pressed(),
            }),
            _ => None,
        }
    }
}

fn translate_key(key: &WinitKey) -> Key {
    match key {
        WinitKey::Named(NamedKey::F1) => Key::F1,
        WinitKey::Named(NamedKey::ArrowLeft) => Key::Left,
        WinitKey::Named(NamedKey::ArrowRight) => Key::Right,
        WinitKey::Named(NamedKey::ArrowUp) => Key::Up,
        WinitKey::Named(NamedKey::ArrowDown) => Key::Down,
        WinitKey::Named(NamedKey::Escape) => Key::Escape,
        WinitKey::Character(s) => s
            .chars()
            .next()
            .map(|c| Key::Character(c.to_ascii_lowercase()))
            .unwrap_or(Key::Other),
        _ => Key::Other,
    }
}
