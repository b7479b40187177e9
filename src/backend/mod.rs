//! Implementations of [`GraphicsDevice`](crate::device::GraphicsDevice).
//!
//! The crowd logic only ever talks to the trait; the windowed application and
//! the offscreen tests plug in [`WgpuDevice`].

pub mod wgpu_device;

pub use wgpu_device::WgpuDevice;
