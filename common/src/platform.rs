//! Collaborators the lifecycle drives but does not implement: the radio link
//! and time source, the wake hardware, and the wake-phase effects.

use crate::{
    error::{ArmError, NetworkError},
    types::{AlarmRecord, ClockReading, NetworkCredentials, WakeCause},
};

pub trait Connectivity {
    fn is_connected(&self) -> bool;

    /// Blocking connect with the implementation's own bounded retry.
    fn connect(&mut self, credentials: &NetworkCredentials) -> Result<(), NetworkError>;

    fn disconnect(&mut self);

    /// Local wall-clock time, or `None` when no time source is available.
    fn current_time(&mut self) -> Option<ClockReading>;
}

pub trait WakeHardware {
    /// Why this boot happened. Only meaningful once per boot.
    fn wake_cause(&mut self) -> WakeCause;

    fn arm_signal_wake(&mut self) -> Result<(), ArmError>;

    fn arm_timer_wake(&mut self, seconds: u32) -> Result<(), ArmError>;
}

/// Side effects of the wake phase (light ramp, sound).
pub trait WakeEffects {
    fn start(&mut self, alarm: &AlarmRecord, now_ms: u64);

    fn tick(&mut self, now_ms: u64);

    fn is_complete(&self) -> bool;

    fn stop(&mut self) {}
}
