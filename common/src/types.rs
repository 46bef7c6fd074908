use serde::{Deserialize, Serialize};

pub const SECONDS_PER_DAY: u32 = 86_400;

/// Bits 0..=6 map to Monday..=Sunday.
pub const ALL_DAYS_MASK: u8 = 0b0111_1111;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Configuring,
    Sleeping,
    Waking,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuring => "CONFIGURING",
            Self::Sleeping => "SLEEPING",
            Self::Waking => "WAKING",
        }
    }
}

/// Result code of the most recent configuration command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    #[default]
    None,
    Success,
    MissingFields,
    InvalidFields,
    NotSaved,
    SleepAborted,
}

impl OperationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Success => "SUCCESS",
            Self::MissingFields => "MISSING_FIELDS",
            Self::InvalidFields => "INVALID_FIELDS",
            Self::NotSaved => "NOT_SAVED",
            Self::SleepAborted => "SLEEP_ABORTED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WakeCause {
    Signal,
    Timer,
    Other,
}

impl WakeCause {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Signal => "signal",
            Self::Timer => "timer",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectivityStatus {
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "disconnected")]
    Disconnected,
    #[serde(rename = "not configured")]
    NotConfigured,
}

impl ConnectivityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::NotConfigured => "not configured",
        }
    }

    pub fn describe(connected: bool, credentials: &NetworkCredentials) -> Self {
        if connected {
            Self::Connected
        } else if credentials.is_configured() {
            Self::Disconnected
        } else {
            Self::NotConfigured
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub slot: u8,
    #[serde(rename = "timeOfDay")]
    pub time_of_day: u32,
    #[serde(rename = "payloadRef")]
    pub payload_ref: String,
    #[serde(rename = "activeDaysMask")]
    pub active_days_mask: u8,
}

impl AlarmRecord {
    /// A record is persistable only when every identity field is non-zero and
    /// the fire time lies strictly inside the day.
    pub fn is_valid(&self) -> bool {
        self.slot != 0
            && self.time_of_day != 0
            && self.time_of_day < SECONDS_PER_DAY
            && self.active_days_mask != 0
    }

    pub fn hour_minute(&self) -> (u32, u32) {
        (self.time_of_day / 3_600, (self.time_of_day % 3_600) / 60)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCredentials {
    pub ssid: String,
    pub password: String,
}

impl NetworkCredentials {
    pub fn is_configured(&self) -> bool {
        !self.ssid.is_empty() && !self.password.is_empty()
    }
}

/// Wall-clock reading in the device's local timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReading {
    pub time_of_day: u32,
    pub epoch: i64,
}

impl ClockReading {
    pub fn from_datetime<Tz: chrono::TimeZone>(now: &chrono::DateTime<Tz>) -> Self {
        use chrono::Timelike;

        Self {
            time_of_day: now.num_seconds_from_midnight(),
            epoch: now.timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClockStatus {
    pub state: &'static str,
    #[serde(rename = "deviceName")]
    pub device_name: String,
    #[serde(rename = "lastOperationStatus")]
    pub last_operation_status: &'static str,
    pub connectivity: &'static str,
    pub alarms: Vec<AlarmRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    #[test]
    fn zero_fields_make_a_record_invalid() {
        let valid = AlarmRecord {
            slot: 1,
            time_of_day: 21_600,
            payload_ref: "song.mp3".to_string(),
            active_days_mask: 5,
        };
        assert!(valid.is_valid());

        assert!(!AlarmRecord { slot: 0, ..valid.clone() }.is_valid());
        assert!(!AlarmRecord { time_of_day: 0, ..valid.clone() }.is_valid());
        assert!(!AlarmRecord { time_of_day: 86_400, ..valid.clone() }.is_valid());
        assert!(!AlarmRecord { active_days_mask: 0, ..valid }.is_valid());
    }

    #[test]
    fn connectivity_descriptor_follows_credentials() {
        let mut credentials = NetworkCredentials::default();
        assert_eq!(
            ConnectivityStatus::describe(false, &credentials),
            ConnectivityStatus::NotConfigured
        );

        credentials.ssid = "home".to_string();
        credentials.password = "secret".to_string();
        assert_eq!(
            ConnectivityStatus::describe(false, &credentials).as_str(),
            "disconnected"
        );
        assert_eq!(
            ConnectivityStatus::describe(true, &credentials).as_str(),
            "connected"
        );
    }

    #[test]
    fn clock_reading_uses_local_midnight() {
        let now = FixedOffset::east_opt(2 * 3_600)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 2, 23, 0, 0)
            .unwrap();
        let reading = ClockReading::from_datetime(&now);

        assert_eq!(reading.time_of_day, 82_800);
        assert_eq!(reading.epoch, now.timestamp());
    }
}
