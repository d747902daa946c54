use crate::{
    foundation::error::{BlendError, BlendResult},
    gpu::{command::CommandBuffer, device::GpuDevice, event::SharedEvent},
};

/// How successive frame submissions are ordered on the device.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulingMode {
    /// Every frame waits on the device for the previous frame's signal.
    Serial,
    /// The device may run frames in any order or concurrently.
    ///
    /// Strategies reuse their intermediates across frames, so overlapping frames can race on
    /// them. That race is part of what this mode measures; nothing detects it.
    #[default]
    Unconstrained,
}

/// Wraps frame encoding with optional device-side serialization.
#[derive(Debug)]
pub struct CommandScheduler {
    mode: SchedulingMode,
    event: SharedEvent,
    last_signal: Option<u64>,
}

impl CommandScheduler {
    /// Create a scheduler with a fresh timeline event.
    pub fn new(device: &mut dyn GpuDevice, mode: SchedulingMode) -> BlendResult<Self> {
        let event = device
            .make_event()
            .map_err(|e| BlendError::init(format!("scheduler event: {e}")))?;
        Ok(Self {
            mode,
            event,
            last_signal: None,
        })
    }

    /// Active mode.
    pub fn mode(&self) -> SchedulingMode {
        self.mode
    }

    /// Timeline event used in serial mode.
    pub fn event(&self) -> &SharedEvent {
        &self.event
    }

    /// Value signalled by the most recent serial frame, if any.
    pub fn last_signal_value(&self) -> Option<u64> {
        self.last_signal
    }

    /// Run `encode` on `buffer`, bracketed by a wait for the previous frame and a signal for
    /// this one when the mode is [`SchedulingMode::Serial`].
    ///
    /// Never blocks: the wait is recorded into the buffer and happens on the device. When
    /// `encode` fails the counter does not advance, since the caller discards the buffer.
    pub fn with_scoped_scheduling<T>(
        &mut self,
        buffer: &mut CommandBuffer,
        encode: impl FnOnce(&mut CommandBuffer) -> BlendResult<T>,
    ) -> BlendResult<T> {
        match self.mode {
            SchedulingMode::Unconstrained => encode(buffer),
            SchedulingMode::Serial => {
                if let Some(previous) = self.last_signal {
                    buffer.encode_wait_for_event(&self.event, previous);
                }
                let out = encode(buffer)?;
                let next = self.last_signal.map_or(1, |v| v + 1);
                buffer.encode_signal_event(&self.event, next);
                self.last_signal = Some(next);
                tracing::trace!(signal = next, "scheduled serial frame");
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
#[path = "../tests/unit/scheduler.rs"]
mod tests;
