use super::*;
use crate::{
    foundation::{core::Extent, image::ImageRGBA},
    gpu::{
        command::{Command, ImageDesc, ImageId, ImageRef, PipelineId, PipelineKind},
        cpu::CpuDevice,
        device::{DeviceOpts, DeviceStats},
    },
    layers::LayerStack,
};

const E: Extent = Extent::new(4, 4);

fn device() -> CpuDevice {
    CpuDevice::new(DeviceOpts { lanes: 1 }).unwrap()
}

fn sync_commands(buffer: &CommandBuffer) -> Vec<(&'static str, u64)> {
    buffer
        .commands()
        .iter()
        .filter_map(|c| match c {
            Command::WaitEvent { value, .. } => Some(("wait", *value)),
            Command::SignalEvent { value, .. } => Some(("signal", *value)),
            _ => None,
        })
        .collect()
}

#[test]
fn serial_frames_chain_wait_and_signal() {
    let mut dev = device();
    let mut sched = CommandScheduler::new(&mut dev, SchedulingMode::Serial).unwrap();

    let mut first = CommandBuffer::new("frame 1", E);
    sched.with_scoped_scheduling(&mut first, |_| Ok(())).unwrap();
    assert_eq!(sync_commands(&first), vec![("signal", 1)]);

    let mut second = CommandBuffer::new("frame 2", E);
    sched.with_scoped_scheduling(&mut second, |_| Ok(())).unwrap();
    assert_eq!(sync_commands(&second), vec![("wait", 1), ("signal", 2)]);
    assert_eq!(sched.last_signal_value(), Some(2));
}

#[test]
fn serial_wrap_puts_encoding_between_wait_and_signal() {
    let mut dev = device();
    let mut sched = CommandScheduler::new(&mut dev, SchedulingMode::Serial).unwrap();
    let mut warmup = CommandBuffer::new("warmup", E);
    sched.with_scoped_scheduling(&mut warmup, |_| Ok(())).unwrap();

    let mut cb = CommandBuffer::new("frame", E);
    sched
        .with_scoped_scheduling(&mut cb, |cb| cb.encode_copy(ImageRef::Layer(0), ImageId(0).into()))
        .unwrap();
    let kinds: Vec<_> = cb
        .commands()
        .iter()
        .map(|c| match c {
            Command::WaitEvent { .. } => "wait",
            Command::SignalEvent { .. } => "signal",
            Command::Copy { .. } => "copy",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["wait", "copy", "signal"]);
}

#[test]
fn unconstrained_records_no_sync() {
    let mut dev = device();
    let mut sched = CommandScheduler::new(&mut dev, SchedulingMode::default()).unwrap();
    assert_eq!(sched.mode(), SchedulingMode::Unconstrained);
    for _ in 0..3 {
        let mut cb = CommandBuffer::new("frame", E);
        let out = sched.with_scoped_scheduling(&mut cb, |_| Ok(7)).unwrap();
        assert_eq!(out, 7);
        assert!(sync_commands(&cb).is_empty());
    }
    assert_eq!(sched.last_signal_value(), None);
}

#[test]
fn failed_encoding_does_not_advance_counter() {
    let mut dev = device();
    let mut sched = CommandScheduler::new(&mut dev, SchedulingMode::Serial).unwrap();
    let mut cb = CommandBuffer::new("frame", E);
    let res: BlendResult<()> =
        sched.with_scoped_scheduling(&mut cb, |_| Err(BlendError::encoding("boom")));
    assert!(res.is_err());
    assert_eq!(sched.last_signal_value(), None);
}

#[test]
fn serial_frames_signal_on_the_device() {
    let mut dev = device();
    let mut sched = CommandScheduler::new(&mut dev, SchedulingMode::Serial).unwrap();
    for i in 0..3 {
        let mut cb = CommandBuffer::new(format!("frame {i}"), E);
        sched.with_scoped_scheduling(&mut cb, |_| Ok(())).unwrap();
        dev.submit(cb).unwrap();
    }
    dev.wait_idle().unwrap();
    assert_eq!(sched.event().value(), 3);
}

struct NoEvents(CpuDevice);

impl GpuDevice for NoEvents {
    fn name(&self) -> &str {
        "no events"
    }
    fn upload_layers(&mut self, layers: &LayerStack) -> BlendResult<()> {
        self.0.upload_layers(layers)
    }
    fn create_image(&mut self, desc: ImageDesc, label: &str) -> BlendResult<ImageId> {
        self.0.create_image(desc, label)
    }
    fn release_image(&mut self, id: ImageId) -> BlendResult<()> {
        self.0.release_image(id)
    }
    fn image_desc(&self, id: ImageId) -> Option<ImageDesc> {
        self.0.image_desc(id)
    }
    fn create_pipeline(&mut self, kind: PipelineKind, label: &str) -> BlendResult<PipelineId> {
        self.0.create_pipeline(kind, label)
    }
    fn make_event(&mut self) -> BlendResult<SharedEvent> {
        Err(BlendError::execution("events unsupported"))
    }
    fn submit(&mut self, buffer: CommandBuffer) -> BlendResult<()> {
        self.0.submit(buffer)
    }
    fn wait_idle(&mut self) -> BlendResult<()> {
        self.0.wait_idle()
    }
    fn poll(&mut self) -> BlendResult<()> {
        self.0.poll()
    }
    fn read_image(&mut self, image: ImageRef) -> BlendResult<ImageRGBA> {
        self.0.read_image(image)
    }
    fn stats(&self) -> DeviceStats {
        self.0.stats()
    }
}

#[test]
fn event_creation_failure_is_fatal() {
    let mut dev = NoEvents(device());
    let err = CommandScheduler::new(&mut dev, SchedulingMode::Serial).unwrap_err();
    assert!(matches!(err, BlendError::Init(_)));
}
