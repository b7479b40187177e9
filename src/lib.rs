//! flow-crowd
//!
//! Renders a square grid of animated characters over a scrolling floor while
//! the graphics device goes through its create/reset/lost/destroy lifecycle.
//! The crowd can be resized and switched between host and GPU skinning at
//! runtime without restarting the device.
//!
//! High-level modules
//! - `app`: winit event loop driving a session
//! - `backend`: wgpu implementation of the device contract
//! - `camera`: first person camera, projection and controller
//! - `config`: render settings, asset locations and application config
//! - `crowd`: grid layout and per-instance state
//! - `device`: the graphics device contract and capability checks
//! - `frame`: per-frame update and draw ordering
//! - `gui`: settings panel
//! - `input`: routing of input events between GUI, camera and hotkeys
//! - `lifecycle`: device resource ownership across lifecycle phases
//! - `model`: the character engine contract
//! - `resources`: asset loading and the procedural mannequin
//! - `session`: the object tying all of the above together
//! - `skinning`: host vs. GPU skinning
//! - `streaming`: background asset streaming
//!

pub mod app;
pub mod backend;
pub mod camera;
pub mod config;
pub mod crowd;
pub mod data_structures;
pub mod device;
pub mod error;
pub mod frame;
pub mod gui;
pub mod input;
pub mod lifecycle;
pub mod model;
pub mod pipelines;
pub mod resources;
pub mod session;
pub mod skinning;
pub mod streaming;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath;
pub use session::CrowdSession;
