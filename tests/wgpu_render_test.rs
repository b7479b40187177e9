#![cfg(feature = "integration-tests")]

use flow_crowd::{
    backend::WgpuDevice,
    config::AppConfig,
    device::{FontDesc, GraphicsDevice, ResourceKind},
    gui::{ControlEvent, SettingsPanel},
    resources::mannequin::MannequinFactory,
    session::CrowdSession,
    streaming::AssetStreamer,
};

fn offscreen(width: u32, height: u32) -> WgpuDevice {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime
        .block_on(WgpuDevice::new_offscreen(width, height))
        .expect("an adapter is required for GPU tests")
}

fn session(config: &AppConfig) -> CrowdSession {
    CrowdSession::new(
        config,
        Box::new(MannequinFactory::new(config.asset_paths.clone())),
        Box::new(AssetStreamer::new(config.streaming.clone()).unwrap()),
        Box::new(SettingsPanel::new()),
    )
}

#[test]
fn should_render_crowd_and_release_everything() {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = AppConfig::default();
    let mut device = offscreen(256, 256);
    let mut session = session(&config);
    session.is_device_acceptable(device.caps()).unwrap();

    let back_buffer = device.back_buffer();
    session.on_device_created(&mut device, back_buffer).unwrap();
    session.on_device_reset(&mut device, back_buffer).unwrap();

    session.frame_move(0.0, 1.0 / 60.0).unwrap();
    assert!(session.frame_render(&mut device).unwrap());

    let image = device.read_pixels().unwrap();
    assert_eq!(image.dimensions(), (256, 256));
    let first = *image.get_pixel(0, 0);
    assert!(image.pixels().any(|p| *p != first), "frame is a flat colour");

    session
        .apply_control(&mut device, ControlEvent::GpuSkinning(true))
        .unwrap();
    session.frame_move(0.016, 1.0 / 60.0).unwrap();
    assert!(session.frame_render(&mut device).unwrap());

    session.on_device_lost(&mut device).unwrap();
    session.on_device_destroyed(&mut device).unwrap();
    for kind in [
        ResourceKind::Font,
        ResourceKind::Effect,
        ResourceKind::VertexLayout,
        ResourceKind::VertexBuffer,
        ResourceKind::Sprite,
        ResourceKind::Texture,
    ] {
        assert_eq!(device.live_resources(kind), 0, "{:?} leaked", kind);
    }
}

#[test]
fn should_reject_unknown_technique() {
    let config = AppConfig::default();
    let mut device = offscreen(64, 64);
    let effect = device
        .create_effect(&config.resource_assets().effect)
        .unwrap();

    assert!(device.set_technique(effect, "VertexLight").is_ok());
    assert!(device.set_technique(effect, "PixelLight").is_err());
    device.release(effect).unwrap();
}

#[cfg(feature = "ui")]
#[test]
fn should_draw_text_in_requested_colour() {
    let mut device = offscreen(160, 64);
    let font = device
        .create_font(&FontDesc {
            family: String::new(),
            height: 40,
            bold: true,
        })
        .unwrap();
    let sprite = device.create_sprite().unwrap();

    assert!(device.begin_scene([0.0, 0.0, 0.0, 1.0]).unwrap());
    device
        .draw_text(font, sprite, [4, 4], [1.0, 1.0, 0.0, 1.0], "MMMM")
        .unwrap();
    device.end_scene().unwrap();

    let image = device.read_pixels().unwrap();
    assert!(
        image
            .pixels()
            .any(|p| p[0] > 128 && p[1] > 128 && p[2] < 64),
        "no yellow glyph pixels"
    );
    device.release(font).unwrap();
    device.release(sprite).unwrap();
}
