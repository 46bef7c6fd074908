use std::{thread, time::Duration};

use log::{debug, warn};

use crate::{
    error::ScheduleError,
    types::{AlarmRecord, ClockReading, SECONDS_PER_DAY},
};

/// Anything earlier than 2020-01-01 means the clock was never synchronized.
pub const MIN_VALID_EPOCH: i64 = 1_577_836_800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextFire {
    pub slot: u8,
    pub seconds: u32,
}

/// Seconds from `current_time_of_day` until `alarm` next fires, crossing
/// midnight when the fire time has already passed today.
pub fn seconds_until_next_fire(
    current_time_of_day: u32,
    current_epoch: i64,
    alarm: &AlarmRecord,
) -> Result<u32, ScheduleError> {
    if current_time_of_day >= SECONDS_PER_DAY || current_epoch < MIN_VALID_EPOCH {
        return Err(ScheduleError::TimeUnavailable { attempts: 0 });
    }
    if !alarm.is_valid() {
        return Err(ScheduleError::InvalidComputation);
    }

    let seconds = if current_time_of_day < alarm.time_of_day {
        alarm.time_of_day - current_time_of_day
    } else {
        (SECONDS_PER_DAY - current_time_of_day) + alarm.time_of_day
    };

    if seconds == 0 {
        return Err(ScheduleError::InvalidComputation);
    }
    Ok(seconds)
}

/// Picks the alarm that fires soonest. Ties go to the lowest slot.
pub fn next_alarm(
    alarms: &[AlarmRecord],
    now: ClockReading,
) -> Result<Option<NextFire>, ScheduleError> {
    let mut best: Option<NextFire> = None;

    for alarm in alarms {
        let seconds = seconds_until_next_fire(now.time_of_day, now.epoch, alarm)?;
        debug!("alarm slot {} fires in {seconds}s", alarm.slot);

        let earlier = best.map(|current| seconds < current.seconds).unwrap_or(true);
        if earlier {
            best = Some(NextFire {
                slot: alarm.slot,
                seconds,
            });
        }
    }

    Ok(best)
}

/// Polls `read_clock` up to `attempts` times, pausing `retry_delay` between
/// attempts, and gives up with `TimeUnavailable`.
pub fn resolve_clock<F>(
    mut read_clock: F,
    attempts: u32,
    retry_delay: Duration,
) -> Result<ClockReading, ScheduleError>
where
    F: FnMut() -> Option<ClockReading>,
{
    let attempts = attempts.max(1);

    for attempt in 1..=attempts {
        match read_clock() {
            Some(reading)
                if reading.epoch >= MIN_VALID_EPOCH && reading.time_of_day < SECONDS_PER_DAY =>
            {
                return Ok(reading);
            }
            Some(reading) => {
                warn!(
                    "clock not synchronized on attempt {attempt}/{attempts} (epoch {})",
                    reading.epoch
                );
            }
            None => warn!("no time source on attempt {attempt}/{attempts}"),
        }

        if attempt < attempts && !retry_delay.is_zero() {
            thread::sleep(retry_delay);
        }
    }

    Err(ScheduleError::TimeUnavailable { attempts })
}
