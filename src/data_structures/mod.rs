//! Plain data the crowd renders.
//!
//! - `instance` holds the fixed placement of one crowd member
//! - `floor` holds the scrolling floor quad and its vertex format
//! - `vertex` holds the vertex streams of the character meshes
//! - `texture` wraps wgpu textures for the wgpu device

pub mod floor;
pub mod instance;
pub mod texture;
pub mod vertex;
