use approx::assert_relative_eq;
use flow_crowd::{
    crowd::{
        CROWD_CLIPS, CrowdGridConfig, CrowdLayoutEngine, PLAYBACK_SPEED_MAX, PLAYBACK_SPEED_MIN,
        release_crowd,
    },
    device::ResourceKind,
    error::CrowdError,
    skinning::SkinningMode,
};

use crate::common::test_utils::{MockFactory, RecordingDevice};

mod common;

const MODEL: &str = "characters/mannequin.chr";
const SOURCE: &[u8] = b"mannequin";

#[test]
fn should_build_count_squared_instances() {
    let mut device = RecordingDevice::new();
    let (mut factory, log) = MockFactory::new();
    let mut engine = CrowdLayoutEngine::new(MODEL, 7);
    let mut crowd = Vec::new();

    for n in 1..=60 {
        let grid = CrowdGridConfig::new(n).unwrap();
        engine
            .rebuild(&mut crowd, &grid, SkinningMode::Cpu, SOURCE, &mut device, &mut factory)
            .unwrap();

        assert_eq!(crowd.len(), (n * n) as usize);
        assert_eq!(device.live(ResourceKind::VertexBuffer), (n * n) as usize);

        let (sx, sy) = crowd.iter().fold((0.0, 0.0), |(sx, sy), c| {
            let p = c.transform().position;
            (sx + p.x, sy + p.y)
        });
        assert_relative_eq!(sx / crowd.len() as f32, 0.0, epsilon = 1e-3);
        assert_relative_eq!(sy / crowd.len() as f32, 0.0, epsilon = 1e-3);
    }

    release_crowd(&mut crowd, &mut device);
    assert_eq!(device.live_total(), 0);
    let log = log.borrow();
    assert_eq!(log.created, log.released);
}

#[test]
fn should_give_every_cell_exactly_one_instance() {
    let mut device = RecordingDevice::new();
    let (mut factory, _) = MockFactory::new();
    let mut crowd = Vec::new();
    let grid = CrowdGridConfig::new(5).unwrap();

    CrowdLayoutEngine::new(MODEL, 1)
        .rebuild(&mut crowd, &grid, SkinningMode::Gpu, SOURCE, &mut device, &mut factory)
        .unwrap();

    let mut cells: Vec<_> = crowd.iter().map(|c| c.cell()).collect();
    cells.sort();
    cells.dedup();
    assert_eq!(cells.len(), 25);
    for instance in &crowd {
        assert!(CROWD_CLIPS.contains(&instance.clip()));
        assert!(instance.time_scale() >= PLAYBACK_SPEED_MIN);
        assert!(instance.time_scale() < PLAYBACK_SPEED_MAX);
        assert_eq!(instance.skinning_mode(), SkinningMode::Gpu);
        assert_eq!(instance.model().skinning_mode(), SkinningMode::Gpu);
        assert_relative_eq!(instance.transform().scale, grid.instance_scale());
    }
}

#[test]
fn should_repeat_layout_for_same_seed() {
    let grid = CrowdGridConfig::new(4).unwrap();
    let build = |seed| {
        let mut device = RecordingDevice::new();
        let (mut factory, _) = MockFactory::new();
        let mut crowd = Vec::new();
        CrowdLayoutEngine::new(MODEL, seed)
            .rebuild(&mut crowd, &grid, SkinningMode::Cpu, SOURCE, &mut device, &mut factory)
            .unwrap();
        crowd
            .iter()
            .map(|c| (c.clip().to_string(), c.time_scale()))
            .collect::<Vec<_>>()
    };

    assert_eq!(build(42), build(42));
    assert_ne!(build(42), build(43));
}

#[test]
fn should_abort_rebuild_and_release_partial_batch() {
    let mut device = RecordingDevice::new();
    let (mut factory, log) = MockFactory::failing_at(5);
    let mut engine = CrowdLayoutEngine::new(MODEL, 3);
    let mut crowd = Vec::new();
    let grid = CrowdGridConfig::new(3).unwrap();

    let err = engine
        .rebuild(&mut crowd, &grid, SkinningMode::Cpu, SOURCE, &mut device, &mut factory)
        .unwrap_err();

    assert!(matches!(err, CrowdError::ModelConstruction { index: 5, .. }));
    assert!(crowd.is_empty());
    assert_eq!(device.live_total(), 0);
    assert_eq!(log.borrow().released, 5);
}

#[test]
fn should_release_previous_crowd_before_rebuilding() {
    let mut device = RecordingDevice::new();
    let (mut factory, log) = MockFactory::new();
    let mut engine = CrowdLayoutEngine::new(MODEL, 3);
    let mut crowd = Vec::new();

    let four = CrowdGridConfig::new(4).unwrap();
    let two = CrowdGridConfig::new(2).unwrap();
    engine
        .rebuild(&mut crowd, &four, SkinningMode::Cpu, SOURCE, &mut device, &mut factory)
        .unwrap();
    engine
        .rebuild(&mut crowd, &two, SkinningMode::Cpu, SOURCE, &mut device, &mut factory)
        .unwrap();

    assert_eq!(crowd.len(), 4);
    assert_eq!(device.live(ResourceKind::VertexBuffer), 4);
    assert_eq!(log.borrow().released, 16);
}
