use anyhow::*;
use fs_extra::copy_items;
use fs_extra::dir::CopyOptions;
use std::env;
use std::path::PathBuf;

fn main() -> Result<()> {
    // Shaders, textures and character definitions are read at runtime from
    // the copy placed next to the build output.
    println!("cargo:rerun-if-changed=assets");

    let out_dir = env::var("OUT_DIR")?;
    let mut copy_options = CopyOptions::new();
    copy_options.overwrite = true;
    let paths_to_copy = vec!["assets/"];
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?);
    let assets_src = manifest_dir.join("assets");
    if assets_src.exists() {
        copy_items(&paths_to_copy, out_dir, &copy_options)?;
    }

    Ok(())
}
