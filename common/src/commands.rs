use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use log::{info, warn};
use thiserror::Error;

use crate::{
    config::ClockConfig,
    error::ValidationError,
    flags::SharedFlags,
    platform::Connectivity,
    settings::DeviceSettings,
    store::KeyValueStore,
    types::{
        AlarmRecord, ClockReading, ConnectivityStatus, NetworkCredentials, OperationStatus,
        ALL_DAYS_MASK, SECONDS_PER_DAY,
    },
};

pub const COMMAND_QUEUE_DEPTH: usize = 16;
const ALARM_FIELDS: usize = 4;

/// A configuration command delivered by the remote command surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SubmitAlarm(String),
    SetSsid(String),
    SetPassword(String),
    ApplyCredentials,
    RequestSleep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("command queue is full")]
    QueueFull,
    #[error("command queue is closed")]
    Closed,
}

/// Writer half of the command mailbox, cloned into every callback.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: SyncSender<Command>,
}

impl CommandSender {
    pub fn submit(&self, command: Command) -> Result<(), SubmitError> {
        self.tx.try_send(command).map_err(|err| match err {
            TrySendError::Full(_) => SubmitError::QueueFull,
            TrySendError::Disconnected(_) => SubmitError::Closed,
        })
    }
}

pub fn command_channel() -> (CommandSender, Receiver<Command>) {
    let (tx, rx) = mpsc::sync_channel(COMMAND_QUEUE_DEPTH);
    (CommandSender { tx }, rx)
}

/// Parses `slot,fireTime,payloadRef,activeDaysMask`.
///
/// `fireTime` is either seconds since local midnight or a Unix epoch, which
/// is reduced to its local time of day using the offset of `clock`.
pub fn parse_alarm(
    raw: &str,
    config: &ClockConfig,
    clock: Option<ClockReading>,
) -> Result<AlarmRecord, ValidationError> {
    let fields: Vec<&str> = raw.split(',').map(str::trim).collect();
    if fields.len() != ALARM_FIELDS {
        return Err(ValidationError::MissingFields {
            expected: ALARM_FIELDS,
            found: fields.len(),
        });
    }

    let slot: u8 = fields[0]
        .parse()
        .map_err(|_| invalid("slot", "not a number"))?;
    if slot == 0 {
        return Err(invalid("slot", "must be non-zero"));
    }
    if slot > config.max_alarms {
        return Err(invalid("slot", "out of range"));
    }

    let fire_time: i64 = fields[1]
        .parse()
        .map_err(|_| invalid("fireTime", "not a number"))?;
    let time_of_day = fire_time_of_day(fire_time, clock)?;

    let payload_ref = fields[2].to_string();
    if payload_ref.len() > config.max_payload_len {
        return Err(invalid("payloadRef", "too long"));
    }

    let active_days_mask: u8 = fields[3]
        .parse()
        .map_err(|_| invalid("activeDaysMask", "not a number"))?;
    if active_days_mask == 0 {
        return Err(invalid("activeDaysMask", "must be non-zero"));
    }
    if active_days_mask & !ALL_DAYS_MASK != 0 {
        return Err(invalid("activeDaysMask", "unknown weekday bits"));
    }

    Ok(AlarmRecord {
        slot,
        time_of_day,
        payload_ref,
        active_days_mask,
    })
}

fn fire_time_of_day(fire_time: i64, clock: Option<ClockReading>) -> Result<u32, ValidationError> {
    if fire_time == 0 {
        return Err(invalid("fireTime", "must be non-zero"));
    }
    if fire_time < 0 {
        return Err(invalid("fireTime", "negative"));
    }

    let day = i64::from(SECONDS_PER_DAY);
    let time_of_day = if fire_time < day {
        fire_time
    } else {
        let offset = clock.map(local_offset_secs).unwrap_or_else(|| {
            warn!("no clock reading; interpreting epoch fire time as UTC");
            0
        });
        fire_time
            .checked_add(offset)
            .ok_or_else(|| invalid("fireTime", "out of range"))?
            .rem_euclid(day)
    };

    if time_of_day == 0 {
        return Err(invalid("fireTime", "falls on midnight"));
    }
    u32::try_from(time_of_day).map_err(|_| invalid("fireTime", "out of range"))
}

fn local_offset_secs(clock: ClockReading) -> i64 {
    let day = i64::from(SECONDS_PER_DAY);
    let offset = (i64::from(clock.time_of_day) - clock.epoch.rem_euclid(day)).rem_euclid(day);
    // Offsets range from UTC-12 to UTC+14.
    if offset > 14 * 3_600 {
        offset - day
    } else {
        offset
    }
}

fn invalid(field: &'static str, reason: &'static str) -> ValidationError {
    ValidationError::InvalidField { field, reason }
}

/// Applies configuration commands to persisted state and records the outcome
/// in the shared last-operation status.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    config: ClockConfig,
    credentials: NetworkCredentials,
}

impl CommandHandler {
    pub fn new(config: ClockConfig, credentials: NetworkCredentials) -> Self {
        Self {
            config,
            credentials,
        }
    }

    /// In-memory credential mirror; differs from storage until applied.
    pub fn credentials(&self) -> &NetworkCredentials {
        &self.credentials
    }

    pub fn set_credentials(&mut self, credentials: NetworkCredentials) {
        self.credentials = credentials;
    }

    pub fn handle<S, N>(
        &mut self,
        command: Command,
        settings: &mut DeviceSettings<S>,
        network: &mut N,
        flags: &SharedFlags,
    ) -> OperationStatus
    where
        S: KeyValueStore,
        N: Connectivity,
    {
        let status = match command {
            Command::SubmitAlarm(raw) => self.submit_alarm(&raw, settings, network),
            Command::SetSsid(ssid) => {
                self.credentials.ssid = ssid.trim().to_string();
                OperationStatus::Success
            }
            Command::SetPassword(password) => {
                self.credentials.password = password;
                OperationStatus::Success
            }
            Command::ApplyCredentials => self.apply_credentials(settings, network, flags),
            Command::RequestSleep => {
                flags.request_sleep();
                OperationStatus::Success
            }
        };

        flags.set_status(status);
        status
    }

    fn submit_alarm<S, N>(
        &self,
        raw: &str,
        settings: &mut DeviceSettings<S>,
        network: &mut N,
    ) -> OperationStatus
    where
        S: KeyValueStore,
        N: Connectivity,
    {
        let alarm = match parse_alarm(raw, &self.config, network.current_time()) {
            Ok(alarm) => alarm,
            Err(err @ ValidationError::MissingFields { .. }) => {
                warn!("rejected alarm `{raw}`: {err}");
                return OperationStatus::MissingFields;
            }
            Err(err @ ValidationError::InvalidField { .. }) => {
                warn!("rejected alarm `{raw}`: {err}");
                return OperationStatus::InvalidFields;
            }
        };

        match settings.save_alarm(&alarm) {
            Ok(()) => {
                let (hour, minute) = alarm.hour_minute();
                info!(
                    "alarm slot {} set for {hour:02}:{minute:02} (days {:#09b}, `{}`)",
                    alarm.slot, alarm.active_days_mask, alarm.payload_ref
                );
                OperationStatus::Success
            }
            Err(err) => {
                warn!("failed to save alarm slot {}: {err}", alarm.slot);
                OperationStatus::NotSaved
            }
        }
    }

    fn apply_credentials<S, N>(
        &self,
        settings: &mut DeviceSettings<S>,
        network: &mut N,
        flags: &SharedFlags,
    ) -> OperationStatus
    where
        S: KeyValueStore,
        N: Connectivity,
    {
        if let Err(err) = settings.save_credentials(&self.credentials) {
            warn!("failed to save wifi credentials: {err}");
            return OperationStatus::NotSaved;
        }

        network.disconnect();
        // Reachability is reported through the connectivity descriptor, not
        // through the operation status.
        if let Err(err) = network.connect(&self.credentials) {
            warn!("reconnect to `{}` failed: {err}", self.credentials.ssid);
        }
        flags.set_connectivity(ConnectivityStatus::describe(
            network.is_connected(),
            &self.credentials,
        ));

        OperationStatus::Success
    }
}
