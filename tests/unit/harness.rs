use super::*;
use crate::{
    blend::reference_fold,
    gpu::{
        command::CompletionHandler,
        cpu::CpuDevice,
        device::{DeviceKind, DeviceOpts},
    },
    layers::LayerPattern,
    surface::TargetSurface,
};

fn small_config(strategy: StrategyKind, scheduling: SchedulingMode) -> BenchConfig {
    BenchConfig {
        strategy,
        scheduling,
        working_size: Extent::new(40, 20),
        layer_count: 12,
        layer_pattern: LayerPattern::Overlapping,
        device: DeviceKind::Cpu,
        ..BenchConfig::default()
    }
}

/// A provider that never has a target.
struct NoTarget;

impl SurfaceProvider for NoTarget {
    fn acquire(&mut self) -> Option<TargetSurface> {
        None
    }
    fn wait_for_target(&self, _timeout: Duration) -> bool {
        false
    }
    fn completion_handler(&self, _target: TargetSurface) -> CompletionHandler {
        Box::new(|| {})
    }
    fn discard(&mut self, _target: TargetSurface) {}
    fn last_presented(&self) -> Option<TargetSurface> {
        None
    }
    fn on_resize(&mut self, _size: Extent) {}
    fn presentable_size(&self) -> Extent {
        Extent::new(40, 20)
    }
}

#[test]
fn missing_target_skips_without_submitting() {
    let cfg = small_config(StrategyKind::Sequential, SchedulingMode::Serial);
    let device = Box::new(CpuDevice::new(DeviceOpts { lanes: 1 }).unwrap());
    let layers =
        LayerStack::generate(cfg.layer_count, cfg.working_size, cfg.layer_pattern).unwrap();
    let mut driver = FrameDriver::with_parts(device, Box::new(NoTarget), layers, &cfg).unwrap();

    let outcome = driver.draw().unwrap();
    assert!(outcome.is_skipped());
    assert_eq!(driver.skipped(), 1);
    assert_eq!(driver.frames(), 0);
    assert_eq!(driver.device_stats().submitted, 0);
    assert_eq!(driver.scheduler().last_signal_value(), None);
    assert_eq!(driver.state(), FrameState::Idle);
}

#[test]
fn presented_frame_matches_reference_fold() {
    let cfg = small_config(StrategyKind::Fused, SchedulingMode::Serial);
    let mut driver = FrameDriver::new(&cfg).unwrap();
    let outcome = driver.draw().unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.encode.passes(), 11);
    assert_eq!(report.encode.presents, 1);
    assert_eq!(report.signal, Some(1));

    let presented = driver.read_presented().unwrap().unwrap();
    let expected = reference_fold(&driver.layers().as_refs()).unwrap();
    assert_eq!(presented, expected);
}

#[test]
fn serial_signals_count_submitted_frames() {
    let cfg = small_config(StrategyKind::Compute, SchedulingMode::Serial);
    let mut driver = FrameDriver::new(&cfg).unwrap();
    let mut submitted = 0;
    for _ in 0..6 {
        if !driver.draw().unwrap().is_skipped() {
            submitted += 1;
        }
        // Let the ring recycle so later frames find a target.
        driver.wait_idle().unwrap();
    }
    assert_eq!(submitted, 6);
    assert_eq!(driver.scheduler().last_signal_value(), Some(6));
    assert_eq!(driver.scheduler().event().value(), 6);
}

#[test]
fn switching_mode_restarts_signal_sequence() {
    let cfg = small_config(StrategyKind::Sequential, SchedulingMode::Serial);
    let mut driver = FrameDriver::new(&cfg).unwrap();
    driver.draw().unwrap();
    driver.wait_idle().unwrap();
    driver.set_scheduling_mode(SchedulingMode::Unconstrained).unwrap();
    let outcome = driver.draw().unwrap();
    assert_eq!(outcome.report().unwrap().signal, None);
    assert_eq!(driver.scheduling_mode(), SchedulingMode::Unconstrained);

    driver.wait_idle().unwrap();
    driver.set_scheduling_mode(SchedulingMode::Serial).unwrap();
    let outcome = driver.draw().unwrap();
    assert_eq!(outcome.report().unwrap().signal, Some(1));
}

#[test]
fn switching_strategy_keeps_output() {
    let cfg = small_config(StrategyKind::Tiled, SchedulingMode::Serial);
    let mut driver = FrameDriver::new(&cfg).unwrap();
    driver.draw().unwrap();
    let tiled = driver.read_presented().unwrap().unwrap();

    driver.set_strategy(StrategyKind::Monolithic).unwrap();
    assert_eq!(driver.strategy(), Some(StrategyKind::Monolithic));
    assert_eq!(driver.footprint_bytes(), 0);
    let report = driver.draw().unwrap();
    assert_eq!(report.report().unwrap().encode.aggregate_dispatches, 1);
    assert_eq!(driver.read_presented().unwrap().unwrap(), tiled);
}

#[test]
fn resize_only_moves_viewport() {
    let cfg = small_config(StrategyKind::Sequential, SchedulingMode::Unconstrained);
    let mut driver = FrameDriver::new(&cfg).unwrap();
    assert_eq!(driver.viewport(), Extent::new(40, 20).rect());
    driver.on_surface_resize(Extent::new(30, 50));
    assert_eq!(driver.viewport(), TileRect { x: 0, y: 0, width: 30, height: 20 });

    driver.draw().unwrap();
    let presented = driver.read_presented().unwrap().unwrap();
    assert_eq!(presented.extent(), Extent::new(40, 20));
}

#[test]
fn layers_must_match_working_surface() {
    let cfg = small_config(StrategyKind::Sequential, SchedulingMode::Serial);
    let device = Box::new(CpuDevice::new(DeviceOpts { lanes: 1 }).unwrap());
    let layers = LayerStack::generate(3, Extent::new(8, 8), LayerPattern::Blocks).unwrap();
    let err = FrameDriver::with_parts(device, Box::new(NoTarget), layers, &cfg)
        .err()
        .unwrap();
    assert!(matches!(err, BlendError::Config(_)));
}

#[test]
fn frame_state_reaches_presented_once_the_device_finishes() {
    let cfg = small_config(StrategyKind::Sequential, SchedulingMode::Serial);
    let mut driver = FrameDriver::new(&cfg).unwrap();
    assert_eq!(driver.state(), FrameState::Idle);

    driver.draw().unwrap();
    assert!(matches!(driver.state(), FrameState::Submitted | FrameState::Presented));
    driver.wait_idle().unwrap();
    assert_eq!(driver.state(), FrameState::Presented);
}

#[test]
fn waiting_without_targets_times_out() {
    let cfg = small_config(StrategyKind::Sequential, SchedulingMode::Serial);
    let device = Box::new(CpuDevice::new(DeviceOpts { lanes: 1 }).unwrap());
    let layers =
        LayerStack::generate(cfg.layer_count, cfg.working_size, cfg.layer_pattern).unwrap();
    let mut driver = FrameDriver::with_parts(device, Box::new(NoTarget), layers, &cfg).unwrap();

    let started = Instant::now();
    assert!(!driver.wait_for_target(Duration::from_millis(20)).unwrap());
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(driver.frames(), 0);
}

#[test]
fn paced_draws_wait_for_the_ring() {
    let cfg = small_config(StrategyKind::Compute, SchedulingMode::Serial);
    let mut driver = FrameDriver::new(&cfg).unwrap();
    for _ in 0..10 {
        assert!(!driver.draw_next().unwrap().is_skipped());
    }
    driver.wait_idle().unwrap();
    assert_eq!((driver.frames(), driver.skipped()), (10, 0));
    assert_eq!(driver.scheduler().event().value(), 10);
    assert_eq!(driver.state(), FrameState::Presented);
}
