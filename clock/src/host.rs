use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{Offset, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::{
    net::TcpListener,
    sync::{Mutex, Notify},
};
use tracing::{info, warn};

use sunrise_common::{
    commands::SubmitError, command_channel, effects::SunriseRamp, AlarmRecord, ArmError, Board,
    ClockReading, ClockStatus, Command, CommandSender, Connectivity, KeyValueStore, Lifecycle,
    MemoryStore, NetworkCredentials, NetworkError, RuntimeConfig, SharedFlags, SleepPlan,
    StorageError, TickOutcome, WakeCause, WakeEffects, WakeHardware,
};

type HostMachine = Lifecycle<FileStore, SimNetwork, SimHardware, HostLight>;

#[derive(Clone)]
struct AppState {
    commands: CommandSender,
    flags: SharedFlags,
    status: Arc<Mutex<ClockStatus>>,
    asleep: Arc<AtomicBool>,
    button: Arc<Notify>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct Accepted {
    queued: bool,
}

#[derive(Debug, Serialize)]
struct ConnectivityView {
    connectivity: &'static str,
}

#[derive(Debug, Serialize)]
struct LastStatusView {
    #[serde(rename = "lastOperationStatus")]
    last_operation_status: &'static str,
}

#[derive(Debug, Serialize)]
struct ButtonView {
    action: &'static str,
}

/// JSON-file backed store standing in for the flash partition. Falls back to
/// memory only when the data directory cannot be read.
struct FileStore {
    path: Option<PathBuf>,
    memory: MemoryStore,
}

/// Station link simulated on the host. The clock skew carries simulated
/// deep-sleep time so a timer wake reads the alarm's wall-clock time.
struct SimNetwork {
    connected: bool,
    reachable: bool,
    attempts: u32,
    timezone: String,
    skew_secs: i64,
}

#[derive(Default)]
struct SimHardware {
    pending_cause: Option<WakeCause>,
    signal_armed: bool,
    timer_secs: Option<u32>,
}

struct HostLight {
    ramp: SunriseRamp,
    last_step: Option<u8>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = std::env::var("SUNRISE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.sunrise"));

    let mut runtime = load_runtime_config(&data_dir.join("runtime.json"))
        .await
        .unwrap_or_else(|err| {
            warn!("failed to load runtime config: {err:#}");
            RuntimeConfig::default()
        });
    runtime.clock.sanitize();

    let time_scale = std::env::var("SUNRISE_TIME_SCALE")
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|scale| scale.is_finite() && *scale > 0.0)
        .unwrap_or(1.0);

    let board = Board {
        store: FileStore::open(data_dir.join("store.json")),
        network: SimNetwork {
            connected: false,
            reachable: std::env::var("SUNRISE_SIM_OFFLINE").is_err(),
            attempts: runtime.clock.wifi_connect_attempts,
            timezone: runtime.timezone.clone(),
            skew_secs: 0,
        },
        hardware: SimHardware::default(),
        effects: HostLight {
            ramp: SunriseRamp::new(runtime.clock.wake_phase_secs),
            last_step: None,
        },
    };

    let flags = SharedFlags::new();
    let (commands, receiver) = command_channel();
    let machine = Lifecycle::boot(runtime.clock.clone(), board, flags.clone(), receiver);

    let app_state = AppState {
        commands,
        flags,
        status: Arc::new(Mutex::new(machine.status())),
        asleep: Arc::new(AtomicBool::new(false)),
        button: Arc::new(Notify::new()),
    };

    spawn_device_loop(app_state.clone(), machine, runtime, time_scale);

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/connectivity", get(handle_get_connectivity))
        .route("/api/last-status", get(handle_get_last_status))
        .route("/api/alarm", post(handle_post_alarm))
        .route("/api/wifi/ssid", put(handle_put_ssid))
        .route("/api/wifi/password", put(handle_put_password))
        .route("/api/wifi/apply", post(handle_post_apply))
        .route("/api/sleep", post(handle_post_sleep))
        .route("/api/button", post(handle_post_button))
        .with_state(app_state);

    let port = std::env::var("SUNRISE_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind clock simulator at {addr}"))?;

    info!("clock simulator listening on http://{addr} (sleep time scale x{time_scale})");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for ctrl-c: {err}");
            }
        })
        .await?;
    Ok(())
}

/// Drives the lifecycle on the configured tick. A suspend tears the machine
/// down, simulates deep sleep, and boots a fresh machine from the store.
fn spawn_device_loop(
    app_state: AppState,
    mut machine: HostMachine,
    runtime: RuntimeConfig,
    time_scale: f64,
) {
    tokio::spawn(async move {
        let tick_every = Duration::from_millis(runtime.clock.tick_interval_ms);

        loop {
            let mut interval = tokio::time::interval(tick_every);
            let plan = loop {
                interval.tick().await;
                let now_ms = monotonic_ms();
                let outcome = tokio::task::block_in_place(|| machine.tick(now_ms));
                *app_state.status.lock().await = machine.status();

                if let TickOutcome::Suspend(plan) = outcome {
                    break plan;
                }
            };

            let (mut board, receiver) = machine.into_parts();
            app_state.asleep.store(true, Ordering::SeqCst);
            board.network.disconnect();

            let dropped = receiver.try_iter().count();
            if dropped > 0 {
                warn!("discarded {dropped} queued commands at deep sleep");
            }

            let cause = simulate_deep_sleep(&mut board, plan, &app_state.button, time_scale).await;

            app_state.flags.reset();
            app_state.asleep.store(false, Ordering::SeqCst);
            info!("simulated reboot, wake cause: {}", cause.as_str());

            machine = Lifecycle::boot(
                runtime.clock.clone(),
                board,
                app_state.flags.clone(),
                receiver,
            );
            *app_state.status.lock().await = machine.status();
        }
    });
}

async fn simulate_deep_sleep(
    board: &mut Board<FileStore, SimNetwork, SimHardware, HostLight>,
    plan: SleepPlan,
    button: &Notify,
    time_scale: f64,
) -> WakeCause {
    info!(
        "deep sleep for {}s (armed slot {}), scaled to {:.1}s",
        plan.seconds,
        plan.armed_slot,
        f64::from(plan.seconds) / time_scale
    );

    let started = Instant::now();
    let cause = board.hardware.deep_sleep(button, time_scale).await;
    let slept = started.elapsed().as_secs_f64();

    let simulated = match cause {
        WakeCause::Timer => f64::from(plan.seconds),
        _ => slept * time_scale,
    };
    board.network.advance((simulated - slept).round() as i64);
    cause
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.status.lock().await.clone();
    Json(status)
}

async fn handle_get_connectivity(State(state): State<AppState>) -> impl IntoResponse {
    Json(ConnectivityView {
        connectivity: state.flags.connectivity().as_str(),
    })
}

async fn handle_get_last_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(LastStatusView {
        last_operation_status: state.flags.status().as_str(),
    })
}

async fn handle_post_alarm(State(state): State<AppState>, body: String) -> impl IntoResponse {
    submit(&state, Command::SubmitAlarm(body))
}

async fn handle_put_ssid(State(state): State<AppState>, body: String) -> impl IntoResponse {
    submit(&state, Command::SetSsid(body))
}

async fn handle_put_password(State(state): State<AppState>, body: String) -> impl IntoResponse {
    submit(&state, Command::SetPassword(body))
}

async fn handle_post_apply(State(state): State<AppState>) -> impl IntoResponse {
    submit(&state, Command::ApplyCredentials)
}

async fn handle_post_sleep(State(state): State<AppState>) -> impl IntoResponse {
    submit(&state, Command::RequestSleep)
}

/// The physical button: wakes a sleeping device, or interrupts the wake
/// phase of an awake one.
async fn handle_post_button(State(state): State<AppState>) -> impl IntoResponse {
    if state.asleep.load(Ordering::SeqCst) {
        state.button.notify_one();
        return Json(ButtonView { action: "wake" });
    }

    state.flags.request_config();
    Json(ButtonView {
        action: "configure",
    })
}

fn submit(state: &AppState, command: Command) -> axum::response::Response {
    if state.asleep.load(Ordering::SeqCst) {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Device is in deep sleep");
    }

    match state.commands.submit(command) {
        Ok(()) => (StatusCode::ACCEPTED, Json(Accepted { queued: true })).into_response(),
        Err(SubmitError::QueueFull) => {
            warn!("command mailbox full");
            error_response(StatusCode::TOO_MANY_REQUESTS, "Command queue is full")
        }
        Err(SubmitError::Closed) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Device is restarting")
        }
    }
}

async fn load_runtime_config(path: &Path) -> anyhow::Result<RuntimeConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
        Err(err) => Err(err.into()),
    }
}

impl FileStore {
    fn open(path: PathBuf) -> Self {
        let entries = match std::fs::read(&path) {
            Ok(raw) => serde_json::from_slice::<HashMap<String, Vec<u8>>>(&raw)
                .unwrap_or_else(|err| {
                    warn!("store at {} is corrupt, starting empty: {err}", path.display());
                    HashMap::new()
                }),
            Err(err) if err.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                warn!(
                    "store at {} is unreadable, keeping settings in memory: {err}",
                    path.display()
                );
                return Self {
                    path: None,
                    memory: MemoryStore::new(),
                };
            }
        };

        info!("store opened at {} ({} keys)", path.display(), entries.len());
        Self {
            path: Some(path),
            memory: MemoryStore::from_entries(entries),
        }
    }

    fn write_file(path: &Path, entries: &HashMap<String, Vec<u8>>) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_vec_pretty(entries)?;
        std::fs::write(path, payload)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.memory.get(key)
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        if let Some(path) = &self.path {
            let mut entries = self.memory.entries().clone();
            entries.insert(key.to_string(), value.to_vec());
            Self::write_file(path, &entries).map_err(|err| StorageError::Write {
                key: key.to_string(),
                reason: err.to_string(),
            })?;
        }
        self.memory.put(key, value)
    }
}

impl SimNetwork {
    fn advance(&mut self, seconds: i64) {
        self.skew_secs = self.skew_secs.saturating_add(seconds);
    }
}

impl Connectivity for SimNetwork {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connect(&mut self, credentials: &NetworkCredentials) -> Result<(), NetworkError> {
        if !credentials.is_configured() {
            return Err(NetworkError::NotConfigured);
        }
        if !self.reachable {
            return Err(NetworkError::ConnectFailed {
                attempts: self.attempts,
                reason: "access point unreachable".to_string(),
            });
        }

        info!("wifi joined `{}`", credentials.ssid);
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.connected {
            info!("wifi disconnected");
        }
        self.connected = false;
    }

    fn current_time(&mut self) -> Option<ClockReading> {
        if !self.connected {
            return None;
        }
        now_in_timezone(&self.timezone, self.skew_secs)
            .map(|now| ClockReading::from_datetime(&now))
    }
}

impl SimHardware {
    /// Waits for whichever armed wake source fires first and records it as
    /// the cause the next boot will read.
    async fn deep_sleep(&mut self, button: &Notify, time_scale: f64) -> WakeCause {
        let signal = std::mem::take(&mut self.signal_armed);
        let cause = match self.timer_secs.take() {
            Some(seconds) => {
                let wait = Duration::from_secs_f64(f64::from(seconds) / time_scale);
                if signal {
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => WakeCause::Timer,
                        _ = button.notified() => WakeCause::Signal,
                    }
                } else {
                    tokio::time::sleep(wait).await;
                    WakeCause::Timer
                }
            }
            None if signal => {
                button.notified().await;
                WakeCause::Signal
            }
            None => {
                warn!("no wake source armed; rebooting immediately");
                WakeCause::Other
            }
        };

        self.pending_cause = Some(cause);
        cause
    }
}

impl WakeHardware for SimHardware {
    fn wake_cause(&mut self) -> WakeCause {
        self.pending_cause.take().unwrap_or(WakeCause::Other)
    }

    fn arm_signal_wake(&mut self) -> Result<(), ArmError> {
        self.signal_armed = true;
        Ok(())
    }

    fn arm_timer_wake(&mut self, seconds: u32) -> Result<(), ArmError> {
        if seconds == 0 {
            return Err(ArmError("zero-length timer".to_string()));
        }
        self.timer_secs = Some(seconds);
        Ok(())
    }
}

impl WakeEffects for HostLight {
    fn start(&mut self, alarm: &AlarmRecord, now_ms: u64) {
        self.ramp.start(alarm, now_ms);
        self.last_step = None;
        info!("playing `{}`", alarm.payload_ref);
    }

    fn tick(&mut self, now_ms: u64) {
        self.ramp.tick(now_ms);

        let brightness = self.ramp.brightness();
        let step = brightness / 26;
        if self.last_step != Some(step) {
            let (red, green, blue) = self.ramp.color();
            info!("sunrise light {brightness}/255 rgb({red}, {green}, {blue})");
            self.last_step = Some(step);
        }
    }

    fn is_complete(&self) -> bool {
        self.ramp.is_complete()
    }

    fn stop(&mut self) {
        self.ramp.stop();
        self.last_step = None;
        info!("sunrise light off");
    }
}

fn now_in_timezone(
    timezone: &str,
    skew_secs: i64,
) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    let tz: Tz = timezone.parse().ok()?;
    let now = Utc::now() + chrono::TimeDelta::try_seconds(skew_secs)?;
    let local = now.with_timezone(&tz);
    Some(local.with_timezone(&local.offset().fix()))
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
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
