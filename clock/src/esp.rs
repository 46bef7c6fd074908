use core::convert::TryInto;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, OnceLock, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::{Offset, Utc};
use chrono_tz::Tz;
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    gpio::{InterruptType, PinDriver, Pull},
    ledc::{config::TimerConfig, LedcDriver, LedcTimerDriver},
    units::FromValueType,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::prelude::Peripherals,
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    sntp::{EspSntp, SyncStatus},
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use serde::Serialize;

use sunrise_common::{
    command_channel, commands::SubmitError, effects::SunriseRamp, settings::DeviceSettings,
    AlarmRecord, ArmError, Board, ClockReading, ClockStatus, Command, CommandSender, Connectivity,
    KeyValueStore, Lifecycle, LifecycleState, NetworkCredentials, NetworkError, RuntimeConfig,
    SharedFlags, StorageError, TickOutcome, WakeCause, WakeEffects, WakeHardware,
};

const NVS_NAMESPACE: &str = "sunrise";
const NVS_MAX_VALUE: usize = 512;
const MAX_HTTP_BODY: usize = 512;
const PROVISIONING_AP_PASSWORD: &str = "SunriseSetup";
const WIFI_RETRY_DELAY_MS: u64 = 500;
const BUTTON_GPIO: i32 = 13;
const LIGHT_FREQUENCY_HZ: u32 = 5_000;

static BUTTON_PRESSED: AtomicBool = AtomicBool::new(false);

type SharedStatus = Arc<Mutex<ClockStatus>>;

struct NvsStore {
    nvs: EspNvs<NvsDefault>,
}

struct EspNetwork {
    wifi: BlockingWifi<EspWifi<'static>>,
    sntp: Option<EspSntp<'static>>,
    timezone: String,
    attempts: u32,
}

struct EspWakeHardware;

/// Sunrise ramp rendered as PWM duty on the lamp channel. Runs dark when the
/// LEDC driver could not be set up.
struct LedcLight {
    ramp: SunriseRamp,
    driver: Option<LedcDriver<'static>>,
}

#[derive(Debug, Serialize)]
struct Accepted {
    queued: bool,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let mut runtime = RuntimeConfig::default();
    runtime.clock.sanitize();

    let store = NvsStore {
        nvs: EspNvs::new(nvs_partition.clone(), NVS_NAMESPACE, true)
            .context("failed to open NVS namespace")?,
    };
    let mut settings = DeviceSettings::new(store, runtime.clock.max_alarms);
    ensure_wifi_defaults(&mut settings);
    let credentials = settings.credentials().unwrap_or_default();

    let Peripherals {
        modem, pins, ledc, ..
    } = Peripherals::take()?;

    let mut button = PinDriver::input(pins.gpio13)?;
    button.set_pull(Pull::Up)?;
    button.set_interrupt_type(InterruptType::NegEdge)?;
    unsafe {
        button.subscribe(|| BUTTON_PRESSED.store(true, Ordering::Relaxed))?;
    }
    button.enable_interrupt()?;

    let light_driver = LedcTimerDriver::new(
        ledc.timer0,
        &TimerConfig::default().frequency(LIGHT_FREQUENCY_HZ.Hz().into()),
    )
    .and_then(|timer| LedcDriver::new(ledc.channel0, timer, pins.gpio25));
    let light_driver = match light_driver {
        Ok(driver) => {
            info!("sunrise light on GPIO25");
            Some(driver)
        }
        Err(err) => {
            warn!("failed to initialize sunrise light, running dark: {err}");
            None
        }
    };

    let wifi = BlockingWifi::wrap(
        EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?,
        sys_loop,
    )?;
    let mut network = EspNetwork {
        wifi,
        sntp: None,
        timezone: runtime.timezone.clone(),
        attempts: runtime.clock.wifi_connect_attempts,
    };

    if !credentials.is_configured() {
        warn!("wifi credentials missing; entering provisioning AP mode");
        if let Err(err) = network.start_provisioning_ap() {
            warn!("failed to start provisioning AP: {err:#}");
        }
    }

    let flags = SharedFlags::new();
    let (commands, receiver) = command_channel();
    let board = Board {
        store: settings.into_store(),
        network,
        hardware: EspWakeHardware,
        effects: LedcLight {
            ramp: SunriseRamp::new(runtime.clock.wake_phase_secs),
            driver: light_driver,
        },
    };

    let mut machine = Lifecycle::boot(runtime.clock.clone(), board, flags.clone(), receiver);
    let status: SharedStatus = Arc::new(Mutex::new(machine.status()));

    // Keep the server alive until deep sleep ends the process.
    let _server = create_http_server(commands, flags.clone(), status.clone())?;

    let tick_every = Duration::from_millis(runtime.clock.tick_interval_ms);
    loop {
        let now_ms = monotonic_ms();

        if BUTTON_PRESSED.swap(false, Ordering::Relaxed) {
            if machine.state() == LifecycleState::Waking {
                info!("button pressed during wake phase");
                flags.request_config();
            }
            if let Err(err) = button.enable_interrupt() {
                warn!("failed to re-arm button interrupt: {err}");
            }
        }

        let outcome = machine.tick(now_ms);
        *status.lock().unwrap_or_else(PoisonError::into_inner) = machine.status();

        if let TickOutcome::Suspend(plan) = outcome {
            info!(
                "entering deep sleep for {}s (armed slot {})",
                plan.seconds, plan.armed_slot
            );
            let (mut board, _receiver) = machine.into_parts();
            board.network.disconnect();
            enter_deep_sleep();
        }

        thread::sleep(tick_every);
    }
}

fn ensure_wifi_defaults(settings: &mut DeviceSettings<NvsStore>) {
    let mut credentials = match settings.credentials() {
        Ok(credentials) => credentials,
        Err(err) => {
            warn!("failed to read wifi credentials from NVS: {err}");
            return;
        }
    };
    if credentials.is_configured() {
        return;
    }

    if let Some(ssid) = option_env!("WIFI_SSID") {
        credentials.ssid = ssid.to_string();
    }
    if let Some(pass) = option_env!("WIFI_PASS") {
        credentials.password = pass.to_string();
    }

    if credentials.is_configured() {
        match settings.save_credentials(&credentials) {
            Ok(()) => info!("seeded wifi credentials for `{}`", credentials.ssid),
            Err(err) => warn!("failed to seed wifi credentials: {err}"),
        }
    }
}

fn create_http_server(
    commands: CommandSender,
    flags: SharedFlags,
    status: SharedStatus,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 8 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    server.fn_handler("/api/status", Method::Get, move |req| {
        let snapshot = status.lock().unwrap_or_else(PoisonError::into_inner).clone();
        write_json(req, 200, &snapshot)
    })?;

    {
        let flags = flags.clone();
        server.fn_handler("/api/connectivity", Method::Get, move |req| {
            let payload = serde_json::json!({ "connectivity": flags.connectivity().as_str() });
            write_json(req, 200, &payload)
        })?;
    }

    {
        let flags = flags.clone();
        server.fn_handler("/api/last-status", Method::Get, move |req| {
            let payload =
                serde_json::json!({ "lastOperationStatus": flags.status().as_str() });
            write_json(req, 200, &payload)
        })?;
    }

    let text_routes: [(&str, Method, fn(String) -> Command); 3] = [
        ("/api/alarm", Method::Post, Command::SubmitAlarm),
        ("/api/wifi/ssid", Method::Put, Command::SetSsid),
        ("/api/wifi/password", Method::Put, Command::SetPassword),
    ];
    for (uri, method, build) in text_routes {
        let commands = commands.clone();
        server.fn_handler(uri, method, move |mut req| {
            let body = read_request_body(&mut req)?;
            let Ok(text) = String::from_utf8(body) else {
                return write_error(req, 400, "Body must be UTF-8 text");
            };
            submit(req, &commands, build(text))
        })?;
    }

    let bare_routes = [
        ("/api/wifi/apply", Command::ApplyCredentials),
        ("/api/sleep", Command::RequestSleep),
    ];
    for (uri, command) in bare_routes {
        let commands = commands.clone();
        server.fn_handler(uri, Method::Post, move |req| {
            submit(req, &commands, command.clone())
        })?;
    }

    Ok(server)
}

fn submit(
    req: esp_idf_svc::http::server::Request<&mut esp_idf_svc::http::server::EspHttpConnection<'_>>,
    commands: &CommandSender,
    command: Command,
) -> anyhow::Result<()> {
    match commands.submit(command) {
        Ok(()) => write_json(req, 202, &Accepted { queued: true }),
        Err(SubmitError::QueueFull) => write_error(req, 429, "Command queue is full"),
        Err(SubmitError::Closed) => write_error(req, 503, "Device is going to sleep"),
    }
}

fn read_request_body(
    req: &mut esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn write_json<T: Serialize>(
    req: esp_idf_svc::http::server::Request<&mut esp_idf_svc::http::server::EspHttpConnection<'_>>,
    status_code: u16,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(
    req: esp_idf_svc::http::server::Request<&mut esp_idf_svc::http::server::EspHttpConnection<'_>>,
    status_code: u16,
    message: &str,
) -> anyhow::Result<()> {
    write_json(req, status_code, &serde_json::json!({ "error": message }))
}

impl KeyValueStore for NvsStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let mut buffer = [0_u8; NVS_MAX_VALUE];
        self.nvs
            .get_blob(key, &mut buffer)
            .map(|value| value.map(<[u8]>::to_vec))
            .map_err(|err| StorageError::Read {
                key: key.to_string(),
                reason: err.to_string(),
            })
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.nvs
            .set_blob(key, value)
            .map_err(|err| StorageError::Write {
                key: key.to_string(),
                reason: err.to_string(),
            })
    }
}

impl EspNetwork {
    fn start_provisioning_ap(&mut self) -> anyhow::Result<()> {
        let suffix = unsafe { esp_idf_svc::sys::esp_random() } as u16;
        let ssid = format!("sunrise-setup-{suffix:04x}");

        self.wifi
            .set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
                ssid: ssid
                    .as_str()
                    .try_into()
                    .map_err(|_| anyhow!("provisioning AP SSID too long"))?,
                password: PROVISIONING_AP_PASSWORD
                    .try_into()
                    .map_err(|_| anyhow!("provisioning AP password too long"))?,
                auth_method: AuthMethod::WPA2Personal,
                channel: 1,
                ..Default::default()
            }))?;
        self.wifi.start()?;
        self.wifi.wait_netif_up()?;
        info!(
            "provisioning AP started on `{ssid}` (password: `{}`)",
            PROVISIONING_AP_PASSWORD
        );
        Ok(())
    }

    fn join(&mut self, credentials: &NetworkCredentials) -> anyhow::Result<()> {
        let auth_method = if credentials.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        if self.wifi.is_started()? {
            self.wifi.stop()?;
        }
        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: credentials
                    .ssid
                    .as_str()
                    .try_into()
                    .map_err(|_| anyhow!("wifi ssid too long"))?,
                password: credentials
                    .password
                    .as_str()
                    .try_into()
                    .map_err(|_| anyhow!("wifi password too long"))?,
                auth_method,
                ..Default::default()
            }))?;
        self.wifi.start()?;
        info!("wifi started, connecting to `{}`", credentials.ssid);

        let mut last_err = None;
        for attempt in 1..=self.attempts {
            match self.wifi.connect().and_then(|()| self.wifi.wait_netif_up()) {
                Ok(()) => {
                    info!("wifi connected and netif up on attempt {attempt}");
                    return Ok(());
                }
                Err(err) => {
                    warn!("wifi connect attempt {attempt}/{} failed: {err}", self.attempts);
                    last_err = Some(err);
                }
            }

            if attempt < self.attempts {
                let _ = self.wifi.disconnect();
                thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
            }
        }

        match last_err {
            Some(err) => Err(err.into()),
            None => Err(anyhow!("no connect attempts made")),
        }
    }
}

impl Connectivity for EspNetwork {
    fn is_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }

    fn connect(&mut self, credentials: &NetworkCredentials) -> Result<(), NetworkError> {
        if !credentials.is_configured() {
            return Err(NetworkError::NotConfigured);
        }

        if let Err(err) = self.join(credentials) {
            let _ = self.wifi.disconnect();
            let _ = self.wifi.stop();
            if let Err(ap_err) = self.start_provisioning_ap() {
                warn!("failed to fall back to provisioning AP: {ap_err:#}");
            }
            return Err(NetworkError::ConnectFailed {
                attempts: self.attempts,
                reason: format!("{err:#}"),
            });
        }

        if self.sntp.is_none() {
            match EspSntp::new_default() {
                Ok(sntp) => {
                    info!("SNTP initialized");
                    self.sntp = Some(sntp);
                }
                Err(err) => warn!("failed to start SNTP: {err}"),
            }
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.sntp = None;
        let _ = self.wifi.disconnect();
        let _ = self.wifi.stop();
        info!("wifi stopped");
    }

    fn current_time(&mut self) -> Option<ClockReading> {
        if self.sntp.as_ref()?.get_sync_status() != SyncStatus::Completed {
            return None;
        }
        now_in_timezone(&self.timezone).map(|now| ClockReading::from_datetime(&now))
    }
}

impl WakeHardware for EspWakeHardware {
    fn wake_cause(&mut self) -> WakeCause {
        let cause = unsafe { esp_idf_svc::sys::esp_sleep_get_wakeup_cause() };
        match cause {
            esp_idf_svc::sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT0 => WakeCause::Signal,
            esp_idf_svc::sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER => WakeCause::Timer,
            _ => WakeCause::Other,
        }
    }

    fn arm_signal_wake(&mut self) -> Result<(), ArmError> {
        let rc = unsafe {
            esp_idf_svc::sys::rtc_gpio_pullup_en(BUTTON_GPIO);
            esp_idf_svc::sys::rtc_gpio_pulldown_dis(BUTTON_GPIO);
            esp_idf_svc::sys::esp_sleep_enable_ext0_wakeup(BUTTON_GPIO, 0)
        };
        if rc != esp_idf_svc::sys::ESP_OK {
            return Err(ArmError(format!("esp_sleep_enable_ext0_wakeup failed with code {rc}")));
        }
        Ok(())
    }

    fn arm_timer_wake(&mut self, seconds: u32) -> Result<(), ArmError> {
        let micros = u64::from(seconds).saturating_mul(1_000_000);
        let rc = unsafe { esp_idf_svc::sys::esp_sleep_enable_timer_wakeup(micros) };
        if rc != esp_idf_svc::sys::ESP_OK {
            return Err(ArmError(format!("esp_sleep_enable_timer_wakeup failed with code {rc}")));
        }
        Ok(())
    }
}

impl LedcLight {
    fn render(&mut self) {
        let Some(driver) = self.driver.as_mut() else {
            return;
        };
        let duty = u32::from(self.ramp.brightness()) * driver.get_max_duty() / 255;
        if let Err(err) = driver.set_duty(duty) {
            warn!("failed to set sunrise light duty: {err}");
        }
    }
}

impl WakeEffects for LedcLight {
    fn start(&mut self, alarm: &AlarmRecord, now_ms: u64) {
        self.ramp.start(alarm, now_ms);
        info!("wake sound `{}` selected", alarm.payload_ref);
        self.render();
    }

    fn tick(&mut self, now_ms: u64) {
        self.ramp.tick(now_ms);
        self.render();
    }

    fn is_complete(&self) -> bool {
        self.ramp.is_complete()
    }

    fn stop(&mut self) {
        self.ramp.stop();
        self.render();
    }
}

/// The button driver stays alive across this call so the pad keeps the RTC
/// configuration armed for the EXT0 wake.
fn enter_deep_sleep() -> ! {
    unsafe {
        esp_idf_svc::sys::esp_deep_sleep_start();
    }
}

fn now_in_timezone(timezone: &str) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    let tz: Tz = timezone.parse().ok()?;
    let local = Utc::now().with_timezone(&tz);
    Some(local.with_timezone(&local.offset().fix()))
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
