use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClockConfig {
    pub max_alarms: u8,
    pub tick_interval_ms: u64,
    pub safety_sleep_secs: u32,
    pub time_retry_attempts: u32,
    pub time_retry_delay_ms: u64,
    pub wifi_connect_attempts: u32,
    pub configuring_idle_sleep_secs: Option<u64>,
    pub wake_phase_secs: u64,
    pub device_name_prefix: String,
    pub max_payload_len: usize,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            max_alarms: 4,
            tick_interval_ms: 1_000,
            safety_sleep_secs: 60,
            time_retry_attempts: 5,
            time_retry_delay_ms: 500,
            wifi_connect_attempts: 20,
            configuring_idle_sleep_secs: Some(600),
            wake_phase_secs: 1_800,
            device_name_prefix: "sunrise-".to_string(),
            max_payload_len: 64,
        }
    }
}

impl ClockConfig {
    pub fn sanitize(&mut self) {
        self.max_alarms = self.max_alarms.clamp(1, 16);
        self.tick_interval_ms = self.tick_interval_ms.clamp(100, 10_000);
        self.safety_sleep_secs = self.safety_sleep_secs.clamp(10, 86_399);
        self.time_retry_attempts = self.time_retry_attempts.clamp(1, 20);
        self.wifi_connect_attempts = self.wifi_connect_attempts.clamp(1, 60);
        self.wake_phase_secs = self.wake_phase_secs.clamp(1, 7_200);
        self.max_payload_len = self.max_payload_len.clamp(1, 256);

        if let Some(idle) = self.configuring_idle_sleep_secs {
            self.configuring_idle_sleep_secs = Some(idle.max(30));
        }

        if self.device_name_prefix.trim().is_empty() {
            self.device_name_prefix = "sunrise-".to_string();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub clock: ClockConfig,
    pub timezone: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            clock: ClockConfig::default(),
            timezone: "UTC".to_string(),
        }
    }
}
