//! Loading of external files and the stand-in character engine.
//!
//! Loaders return `anyhow` errors with the offending path attached; callers
//! that expose typed errors flatten them into their own variants.

use std::path::Path;

use anyhow::Context;

pub mod mannequin;

pub fn load_string(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("could not read {}", path.display()))
}

pub fn load_binary(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("could not read {}", path.display()))
}

pub fn load_texture(
    path: &Path,
    device: &wgpu::Device,
    queue: &wgpu::Queue,
) -> anyhow::Result<crate::data_structures::texture::Texture> {
    let data = load_binary(path)?;
    let label = path.to_string_lossy();
    crate::data_structures::texture::Texture::from_bytes(device, queue, &data, &label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_name_missing_file_in_error() {
        let path = Path::new("definitely/not/here.wgsl");
        let err = load_string(path).unwrap_err();
        assert!(format!("{err:#}").contains("definitely/not/here.wgsl"));
    }
}
