use flow_crowd::{
    device::{VertexLayoutKind, params},
    gui::ControlEvent,
    skinning::SkinningMode,
};

use crate::common::test_utils::{Call, Harness};

mod common;

#[test]
fn should_switch_mode_without_rebuilding_crowd() {
    let mut h = Harness::started();
    let created = h.models.borrow().created;

    h.session
        .apply_control(&mut h.device, ControlEvent::GpuSkinning(true))
        .unwrap();

    assert_eq!(h.models.borrow().created, created);
    assert_eq!(h.session.config().skinning_mode(), SkinningMode::Gpu);
    for instance in h.session.crowd() {
        assert_eq!(instance.skinning_mode(), SkinningMode::Gpu);
        assert_eq!(instance.model().skinning_mode(), SkinningMode::Gpu);
    }
}

#[test]
fn should_bind_layout_and_technique_of_active_mode() {
    let mut h = Harness::started();

    assert!(h.frame());
    assert!(h.device.calls().contains(&Call::VertexLayout(VertexLayoutKind::StaticMesh)));
    assert!(h.device.calls().contains(&Call::Technique("VertexLight".to_string())));

    h.session
        .apply_control(&mut h.device, ControlEvent::GpuSkinning(true))
        .unwrap();
    assert!(h.frame());
    assert!(h
        .device
        .calls()
        .contains(&Call::VertexLayout(VertexLayoutKind::GpuSkinnedMesh)));
    assert!(h
        .device
        .calls()
        .contains(&Call::Technique("VertexLight_Gpu_Skinning".to_string())));
    assert!(!h.device.calls().contains(&Call::VertexLayout(VertexLayoutKind::StaticMesh)));
}

#[test]
fn should_commit_view_projection_once_per_pass_on_gpu() {
    let mut h = Harness::started();
    let instances = h.session.crowd().len();

    // the floor sets it once, host skinning once per instance
    assert!(h.frame());
    assert_eq!(h.device.param_sets(params::VIEW_PROJECTION), 1 + instances);
    assert_eq!(h.device.param_sets(params::WORLD), 1 + instances);

    h.session
        .apply_control(&mut h.device, ControlEvent::GpuSkinning(true))
        .unwrap();
    assert!(h.frame());
    assert_eq!(h.device.param_sets(params::VIEW_PROJECTION), 2);
    assert_eq!(h.device.param_sets(params::WORLD), 1 + instances);
}

#[test]
fn should_ignore_switch_to_active_mode() {
    let mut h = Harness::started();
    h.session
        .apply_control(&mut h.device, ControlEvent::GpuSkinning(false))
        .unwrap();
    assert_eq!(h.session.config().skinning_mode(), SkinningMode::Cpu);
}
