use log::info;

use crate::{platform::WakeEffects, types::AlarmRecord};

const START_COLOR: (u8, u8, u8) = (139, 0, 0);
const END_COLOR: (u8, u8, u8) = (255, 250, 244);

/// Sunrise light ramp: dark red at zero brightness rising to warm white at
/// full brightness over the wake phase.
#[derive(Debug, Clone)]
pub struct SunriseRamp {
    duration_ms: u64,
    started_ms: Option<u64>,
    elapsed_ms: u64,
}

impl SunriseRamp {
    pub fn new(duration_secs: u64) -> Self {
        Self {
            duration_ms: duration_secs.saturating_mul(1_000),
            started_ms: None,
            elapsed_ms: 0,
        }
    }

    pub fn brightness(&self) -> u8 {
        if self.started_ms.is_none() {
            return 0;
        }
        interpolate(0, 255, self.elapsed_ms, self.duration_ms)
    }

    pub fn color(&self) -> (u8, u8, u8) {
        (
            interpolate(START_COLOR.0, END_COLOR.0, self.elapsed_ms, self.duration_ms),
            interpolate(START_COLOR.1, END_COLOR.1, self.elapsed_ms, self.duration_ms),
            interpolate(START_COLOR.2, END_COLOR.2, self.elapsed_ms, self.duration_ms),
        )
    }
}

impl WakeEffects for SunriseRamp {
    fn start(&mut self, alarm: &AlarmRecord, now_ms: u64) {
        info!(
            "sunrise ramp started for slot {} over {}s",
            alarm.slot,
            self.duration_ms / 1_000
        );
        self.started_ms = Some(now_ms);
        self.elapsed_ms = 0;
    }

    fn tick(&mut self, now_ms: u64) {
        if let Some(started) = self.started_ms {
            self.elapsed_ms = now_ms.saturating_sub(started).min(self.duration_ms);
        }
    }

    fn is_complete(&self) -> bool {
        self.started_ms.is_some() && self.elapsed_ms >= self.duration_ms
    }

    fn stop(&mut self) {
        self.started_ms = None;
        self.elapsed_ms = 0;
    }
}

fn interpolate(start: u8, end: u8, elapsed_ms: u64, total_ms: u64) -> u8 {
    if total_ms == 0 || elapsed_ms >= total_ms {
        return end;
    }
    let start = i64::from(start);
    let delta = i64::from(end) - start;
    let value = start + delta * elapsed_ms as i64 / total_ms as i64;
    value.clamp(0, 255) as u8
}
