use super::*;
use crate::gpu::{cpu::CpuDevice, device::DeviceOpts};

fn device() -> CpuDevice {
    CpuDevice::new(DeviceOpts { lanes: 1 }).unwrap()
}

#[test]
fn rotation_wraps_and_resets() {
    let mut dev = device();
    let mut pool = PipelineStatePool::new(&mut dev, PipelineKind::RenderBlend, 3, "blend").unwrap();
    let slots: Vec<u32> = (0..7).map(|_| pool.next().slot).collect();
    assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);

    pool.reset();
    assert_eq!(pool.next().slot, 0);
    assert_eq!(pool.selections(), 8);
}

#[test]
fn variants_are_distinct_device_objects() {
    let mut dev = device();
    let pool =
        PipelineStatePool::new(&mut dev, PipelineKind::ComputeBlend, DEFAULT_POOL_SIZE, "blend")
            .unwrap();
    let mut ids: Vec<_> = pool.variants().iter().map(|v| v.id).collect();
    ids.dedup();
    assert_eq!(ids.len(), DEFAULT_POOL_SIZE);
    assert!(pool.variants().iter().all(|v| v.kind == PipelineKind::ComputeBlend));
}

#[test]
fn empty_pool_is_a_config_error() {
    let mut dev = device();
    let err = PipelineStatePool::new(&mut dev, PipelineKind::RenderBlend, 0, "blend").unwrap_err();
    assert!(matches!(err, BlendError::Config(_)));
}
