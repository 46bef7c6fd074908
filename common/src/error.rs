use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("expected {expected} fields, got {found}")]
    MissingFields { expected: usize, found: usize },
    #[error("invalid {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("failed to write `{key}`: {reason}")]
    Write { key: String, reason: String },
    #[error("failed to read `{key}`: {reason}")]
    Read { key: String, reason: String },
    #[error("stored value for `{key}` is corrupt: {reason}")]
    Decode { key: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("current time unavailable after {attempts} attempts")]
    TimeUnavailable { attempts: u32 },
    #[error("computed a zero-length sleep")]
    InvalidComputation,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("wake source rejected: {0}")]
pub struct ArmError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("no credentials configured")]
    NotConfigured,
    #[error("connection failed after {attempts} attempts: {reason}")]
    ConnectFailed { attempts: u32, reason: String },
}

/// Why the device refused to enter deep sleep.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SleepAbort {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Arm(#[from] ArmError),
}
