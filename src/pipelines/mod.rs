//! Render pipelines of the wgpu device.
//!
//! One pipeline exists per technique, vertex format and fill mode. They are
//! built lazily by the device the first time a combination is drawn.

pub mod render;
pub mod text;
