pub mod commands;
pub mod config;
pub mod effects;
pub mod error;
pub mod flags;
pub mod lifecycle;
pub mod platform;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod types;

pub use commands::{command_channel, parse_alarm, Command, CommandHandler, CommandSender};
pub use config::{ClockConfig, RuntimeConfig};
pub use effects::SunriseRamp;
pub use error::{ArmError, NetworkError, ScheduleError, SleepAbort, StorageError, ValidationError};
pub use flags::SharedFlags;
pub use lifecycle::{Board, Lifecycle, SleepPlan, TickOutcome};
pub use platform::{Connectivity, WakeEffects, WakeHardware};
pub use store::{KeyValueStore, MemoryStore};
pub use types::{
    AlarmRecord, ClockReading, ClockStatus, ConnectivityStatus, LifecycleState,
    NetworkCredentials, OperationStatus, WakeCause,
};
