use std::{sync::mpsc::Receiver, time::Duration};

use log::{debug, info, warn};
use rand::Rng;

use crate::{
    commands::{Command, CommandHandler, COMMAND_QUEUE_DEPTH},
    config::ClockConfig,
    error::{ArmError, ScheduleError, SleepAbort},
    flags::SharedFlags,
    platform::{Connectivity, WakeEffects, WakeHardware},
    scheduler,
    settings::DeviceSettings,
    store::KeyValueStore,
    types::{
        AlarmRecord, ClockStatus, ConnectivityStatus, LifecycleState, OperationStatus, WakeCause,
    },
};

/// Everything the lifecycle borrows from the board for one boot.
#[derive(Debug)]
pub struct Board<S, N, H, E> {
    pub store: S,
    pub network: N,
    pub hardware: H,
    pub effects: E,
}

/// Armed wake configuration handed to the platform for the terminal
/// deep-sleep call. `armed_slot == 0` marks the safety interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepPlan {
    pub seconds: u32,
    pub armed_slot: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// Wake sources are armed; the caller must enter deep sleep now.
    Suspend(SleepPlan),
}

pub fn generate_device_name<R: Rng + ?Sized>(prefix: &str, rng: &mut R) -> String {
    format!("{prefix}{:04x}", rng.gen::<u16>())
}

pub struct Lifecycle<S, N, H, E> {
    config: ClockConfig,
    settings: DeviceSettings<S>,
    network: N,
    hardware: H,
    effects: E,
    flags: SharedFlags,
    commands: Receiver<Command>,
    handler: CommandHandler,

    state: LifecycleState,
    entered: bool,
    device_name: String,
    last_activity_ms: u64,
    wake_alarm: Option<AlarmRecord>,
    sleep_plan: Option<SleepPlan>,
}

impl<S, N, H, E> Lifecycle<S, N, H, E>
where
    S: KeyValueStore,
    N: Connectivity,
    H: WakeHardware,
    E: WakeEffects,
{
    /// Starts a fresh process instance. When the persisted sleep flag is set
    /// this boot is a resumption from deep sleep and the wake cause decides
    /// where the machine goes; otherwise it starts in Configuring.
    pub fn boot(
        mut config: ClockConfig,
        board: Board<S, N, H, E>,
        flags: SharedFlags,
        commands: Receiver<Command>,
    ) -> Self {
        config.sanitize();
        let settings = DeviceSettings::new(board.store, config.max_alarms);
        let credentials = settings.credentials().unwrap_or_else(|err| {
            warn!("failed to load wifi credentials: {err}");
            Default::default()
        });
        let device_name = settings.device_name().ok().flatten().unwrap_or_default();

        let mut machine = Self {
            handler: CommandHandler::new(config.clone(), credentials),
            config,
            settings,
            network: board.network,
            hardware: board.hardware,
            effects: board.effects,
            flags,
            commands,
            state: LifecycleState::Configuring,
            entered: false,
            device_name,
            last_activity_ms: 0,
            wake_alarm: None,
            sleep_plan: None,
        };

        let resuming = machine.settings.in_deep_sleep().unwrap_or_else(|err| {
            warn!("failed to read sleep flag, assuming cold boot: {err}");
            false
        });

        if resuming {
            machine.state = LifecycleState::Sleeping;
            machine.leave_sleep();
        } else {
            info!("cold boot");
        }

        machine
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn flags(&self) -> &SharedFlags {
        &self.flags
    }

    pub fn settings(&self) -> &DeviceSettings<S> {
        &self.settings
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn effects(&self) -> &E {
        &self.effects
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn into_board(self) -> Board<S, N, H, E> {
        self.into_parts().0
    }

    /// Tears the machine down, handing back the board and the command
    /// mailbox so a simulated reboot can reuse the same channel.
    pub fn into_parts(self) -> (Board<S, N, H, E>, Receiver<Command>) {
        let board = Board {
            store: self.settings.into_store(),
            network: self.network,
            hardware: self.hardware,
            effects: self.effects,
        };
        (board, self.commands)
    }

    pub fn status(&self) -> ClockStatus {
        ClockStatus {
            state: self.state.as_str(),
            device_name: self.device_name.clone(),
            last_operation_status: self.flags.status().as_str(),
            connectivity: self.flags.connectivity().as_str(),
            alarms: self.settings.alarms(),
        }
    }

    /// Runs one scheduler cycle: entry actions for a freshly entered state,
    /// the state body, then the state's transition predicates in priority
    /// order.
    pub fn tick(&mut self, now_ms: u64) -> TickOutcome {
        if !self.entered {
            self.enter_state(now_ms);
            self.entered = true;
        }

        match self.state {
            LifecycleState::Configuring => self.run_configuring(now_ms),
            LifecycleState::Waking => self.effects.tick(now_ms),
            LifecycleState::Sleeping => {
                if let Some(plan) = self.sleep_plan {
                    return TickOutcome::Suspend(plan);
                }
            }
        }

        let Some(next) = self.next_state(now_ms) else {
            return TickOutcome::Continue;
        };

        if next == LifecycleState::Sleeping {
            return self.try_enter_sleep(now_ms);
        }

        self.transition_to(next);
        TickOutcome::Continue
    }

    fn next_state(&mut self, now_ms: u64) -> Option<LifecycleState> {
        match self.state {
            LifecycleState::Configuring => {
                if self.flags.take_sleep_request() {
                    info!("sleep requested by operator");
                    return Some(LifecycleState::Sleeping);
                }
                if self.idle_expired(now_ms) {
                    info!("no configuration activity; returning to sleep");
                    return Some(LifecycleState::Sleeping);
                }
                None
            }
            LifecycleState::Sleeping => Some(self.sleeping_transition()),
            LifecycleState::Waking => {
                if self.flags.take_config_request() {
                    info!("wake phase interrupted by operator");
                    return Some(LifecycleState::Configuring);
                }
                if self.effects.is_complete() {
                    info!("wake phase completed");
                    return Some(LifecycleState::Configuring);
                }
                None
            }
        }
    }

    fn sleeping_transition(&mut self) -> LifecycleState {
        if self.flags.take_config_request() {
            return LifecycleState::Configuring;
        }
        if self.flags.take_wake_request() {
            return LifecycleState::Waking;
        }
        LifecycleState::Configuring
    }

    fn transition_to(&mut self, next: LifecycleState) {
        if self.state == LifecycleState::Waking {
            self.effects.stop();
            self.wake_alarm = None;
        }
        info!("lifecycle {} -> {}", self.state.as_str(), next.as_str());
        self.state = next;
        self.entered = false;
    }

    fn enter_state(&mut self, now_ms: u64) {
        match self.state {
            LifecycleState::Configuring => self.enter_configuring(now_ms),
            LifecycleState::Waking => self.enter_waking(now_ms),
            LifecycleState::Sleeping => {}
        }
    }

    /// Reads the wake cause once, clears the persisted sleep flag, and routes
    /// through the Sleeping transitions.
    fn leave_sleep(&mut self) {
        let cause = self.hardware.wake_cause();
        info!("resuming from deep sleep, wake cause: {}", cause.as_str());

        if let Err(err) = self.settings.save_in_deep_sleep(false) {
            warn!("failed to clear sleep flag: {err}");
        }

        match cause {
            WakeCause::Signal => self.flags.request_config(),
            WakeCause::Timer => match self.armed_alarm() {
                Some(alarm) => {
                    self.wake_alarm = Some(alarm);
                    self.flags.request_wake();
                }
                None => {
                    info!("timer wake without a defined alarm");
                    self.flags.request_config();
                }
            },
            WakeCause::Other => {}
        }

        let next = self.sleeping_transition();
        self.transition_to(next);
    }

    fn armed_alarm(&self) -> Option<AlarmRecord> {
        let slot = match self.settings.armed_slot() {
            Ok(slot) => slot,
            Err(err) => {
                warn!("failed to read armed slot: {err}");
                return None;
            }
        };
        if slot == 0 {
            return None;
        }

        self.settings.alarm(slot).unwrap_or_else(|err| {
            warn!("failed to read alarm slot {slot}: {err}");
            None
        })
    }

    fn enter_configuring(&mut self, now_ms: u64) {
        self.last_activity_ms = now_ms;
        self.ensure_identity();

        match self.settings.credentials() {
            Ok(credentials) => self.handler.set_credentials(credentials),
            Err(err) => warn!("failed to load wifi credentials: {err}"),
        }

        let credentials = self.handler.credentials().clone();
        if credentials.is_configured() && !self.network.is_connected() {
            if let Err(err) = self.network.connect(&credentials) {
                warn!("wifi connect to `{}` failed: {err}", credentials.ssid);
            }
        } else if !credentials.is_configured() {
            info!("wifi not configured");
        }
        self.refresh_connectivity();

        info!("configuration surface open as `{}`", self.device_name);
    }

    fn ensure_identity(&mut self) {
        match self.settings.device_name() {
            Ok(Some(name)) => {
                self.device_name = name;
                return;
            }
            Ok(None) => {}
            Err(err) => warn!("failed to read device name: {err}"),
        }

        if !self.device_name.is_empty() {
            return;
        }

        let name = generate_device_name(&self.config.device_name_prefix, &mut rand::thread_rng());
        if let Err(err) = self.settings.save_device_name(&name) {
            warn!("failed to persist device name `{name}`: {err}");
        } else {
            info!("generated device name `{name}`");
        }
        self.device_name = name;
    }

    fn run_configuring(&mut self, now_ms: u64) {
        for command in self.commands.try_iter().take(COMMAND_QUEUE_DEPTH) {
            debug!("handling {command:?}");
            let status =
                self.handler
                    .handle(command, &mut self.settings, &mut self.network, &self.flags);
            info!("command finished: {}", status.as_str());
            self.last_activity_ms = now_ms;
        }
        self.refresh_connectivity();
    }

    fn refresh_connectivity(&mut self) {
        self.flags.set_connectivity(ConnectivityStatus::describe(
            self.network.is_connected(),
            self.handler.credentials(),
        ));
    }

    fn idle_expired(&self, now_ms: u64) -> bool {
        match self.config.configuring_idle_sleep_secs {
            Some(idle_secs) => {
                now_ms.saturating_sub(self.last_activity_ms) >= idle_secs.saturating_mul(1_000)
            }
            None => false,
        }
    }

    fn enter_waking(&mut self, now_ms: u64) {
        match self.wake_alarm.clone() {
            Some(alarm) => {
                let (hour, minute) = alarm.hour_minute();
                info!("alarm slot {} ({hour:02}:{minute:02}) firing", alarm.slot);
                self.effects.start(&alarm, now_ms);
            }
            None => {
                warn!("entered wake phase without an alarm");
                self.flags.request_config();
            }
        }
    }

    fn try_enter_sleep(&mut self, now_ms: u64) -> TickOutcome {
        match self.prepare_sleep() {
            Ok(plan) => {
                info!(
                    "lifecycle {} -> {} for {}s (slot {})",
                    self.state.as_str(),
                    LifecycleState::Sleeping.as_str(),
                    plan.seconds,
                    plan.armed_slot
                );
                self.state = LifecycleState::Sleeping;
                self.entered = true;
                self.sleep_plan = Some(plan);
                TickOutcome::Suspend(plan)
            }
            Err(err) => {
                warn!("staying awake, sleep entry aborted: {err}");
                self.flags.set_status(OperationStatus::SleepAborted);
                self.last_activity_ms = now_ms;
                TickOutcome::Continue
            }
        }
    }

    fn prepare_sleep(&mut self) -> Result<SleepPlan, SleepAbort> {
        let alarms = self.settings.alarms();

        let plan = if alarms.is_empty() {
            info!(
                "no alarm defined; using the {}s safety interval",
                self.config.safety_sleep_secs
            );
            SleepPlan {
                seconds: self.config.safety_sleep_secs,
                armed_slot: 0,
            }
        } else {
            let network = &mut self.network;
            let now = scheduler::resolve_clock(
                || network.current_time(),
                self.config.time_retry_attempts,
                Duration::from_millis(self.config.time_retry_delay_ms),
            )?;
            let next =
                scheduler::next_alarm(&alarms, now)?.ok_or(ScheduleError::InvalidComputation)?;
            SleepPlan {
                seconds: next.seconds,
                armed_slot: next.slot,
            }
        };

        self.settings.save_armed_slot(plan.armed_slot)?;
        self.settings.save_in_deep_sleep(true)?;

        if let Err(err) = self.arm_wake_sources(plan.seconds) {
            if let Err(clear_err) = self.settings.save_in_deep_sleep(false) {
                warn!("failed to clear sleep flag after arm failure: {clear_err}");
            }
            return Err(err.into());
        }

        Ok(plan)
    }

    fn arm_wake_sources(&mut self, seconds: u32) -> Result<(), ArmError> {
        self.hardware.arm_signal_wake()?;
        self.hardware.arm_timer_wake(seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        commands::{command_channel, CommandSender},
        platform::fakes::{FakeEffects, FakeHardware, FakeNetwork},
        settings::KEY_DEVICE_NAME,
        store::MemoryStore,
        types::{ClockReading, NetworkCredentials},
    };
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, SeedableRng};

    const MIDNIGHT: i64 = 1_767_225_600; // 2026-01-01T00:00:00Z

    type TestMachine = Lifecycle<MemoryStore, FakeNetwork, FakeHardware, FakeEffects>;

    fn config() -> ClockConfig {
        ClockConfig {
            time_retry_attempts: 3,
            time_retry_delay_ms: 0,
            configuring_idle_sleep_secs: None,
            ..ClockConfig::default()
        }
    }

    fn clock_at(time_of_day: u32) -> ClockReading {
        ClockReading {
            time_of_day,
            epoch: MIDNIGHT + i64::from(time_of_day),
        }
    }

    fn alarm(slot: u8, time_of_day: u32) -> AlarmRecord {
        AlarmRecord {
            slot,
            time_of_day,
            payload_ref: "song.mp3".to_string(),
            active_days_mask: 0b0111_1111,
        }
    }

    type TestBoard = Board<MemoryStore, FakeNetwork, FakeHardware, FakeEffects>;

    fn board(store: MemoryStore, cause: WakeCause) -> TestBoard {
        Board {
            store,
            network: FakeNetwork::online(clock_at(82_800)),
            hardware: FakeHardware::woken_by(cause),
            effects: FakeEffects {
                complete_after: 3,
                ..FakeEffects::default()
            },
        }
    }

    fn boot_with(config: ClockConfig, board: TestBoard) -> (TestMachine, CommandSender) {
        let (sender, receiver) = command_channel();
        let machine = Lifecycle::boot(config, board, SharedFlags::new(), receiver);
        (machine, sender)
    }

    fn sleeping_store(armed_slot: u8, alarms: &[AlarmRecord]) -> MemoryStore {
        let mut settings = DeviceSettings::new(MemoryStore::new(), 4);
        for alarm in alarms {
            settings.save_alarm(alarm).unwrap();
        }
        settings.save_device_name("sunrise-test").unwrap();
        settings.save_armed_slot(armed_slot).unwrap();
        settings.save_in_deep_sleep(true).unwrap();
        settings.into_store()
    }

    #[test]
    fn cold_boot_starts_configuring_and_creates_identity() {
        let (mut machine, _sender) = boot_with(config(), board(MemoryStore::new(), WakeCause::Other));
        assert_eq!(machine.state(), LifecycleState::Configuring);

        assert_eq!(machine.tick(0), TickOutcome::Continue);

        let name = machine.device_name().to_string();
        assert!(name.starts_with("sunrise-"));
        assert_eq!(name.len(), "sunrise-".len() + 4);
        assert_eq!(
            machine.settings().store().get(KEY_DEVICE_NAME).unwrap(),
            Some(name.into_bytes())
        );
        assert_eq!(machine.flags().connectivity(), ConnectivityStatus::NotConfigured);
    }

    #[test]
    fn existing_identity_is_kept() {
        let mut settings = DeviceSettings::new(MemoryStore::new(), 4);
        settings.save_device_name("sunrise-beef").unwrap();
        let (mut machine, _sender) =
            boot_with(config(), board(settings.into_store(), WakeCause::Other));

        machine.tick(0);

        assert_eq!(machine.device_name(), "sunrise-beef");
    }

    #[test]
    fn configuring_connects_with_persisted_credentials() {
        let mut settings = DeviceSettings::new(MemoryStore::new(), 4);
        let credentials = NetworkCredentials {
            ssid: "home".to_string(),
            password: "hunter2".to_string(),
        };
        settings.save_credentials(&credentials).unwrap();
        let (mut machine, _sender) =
            boot_with(config(), board(settings.into_store(), WakeCause::Other));

        machine.tick(0);

        assert_eq!(machine.network().connects, vec![credentials]);
        assert_eq!(machine.flags().connectivity(), ConnectivityStatus::Connected);
    }

    #[test]
    fn failed_connect_is_not_fatal() {
        let mut settings = DeviceSettings::new(MemoryStore::new(), 4);
        settings
            .save_credentials(&NetworkCredentials {
                ssid: "home".to_string(),
                password: "wrong".to_string(),
            })
            .unwrap();
        let mut board = board(settings.into_store(), WakeCause::Other);
        board.network.accept_connect = false;
        let (mut machine, _sender) = boot_with(config(), board);

        assert_eq!(machine.tick(0), TickOutcome::Continue);
        assert_eq!(machine.state(), LifecycleState::Configuring);
        assert_eq!(machine.flags().connectivity(), ConnectivityStatus::Disconnected);
    }

    #[test]
    fn signal_wake_resumes_into_configuring_and_clears_flag() {
        let store = sleeping_store(1, &[alarm(1, 21_600)]);
        let (machine, _sender) = boot_with(config(), board(store, WakeCause::Signal));

        assert_eq!(machine.state(), LifecycleState::Configuring);
        assert!(!machine.settings().in_deep_sleep().unwrap());
    }

    #[test]
    fn timer_wake_without_alarm_falls_back_to_configuring() {
        let store = sleeping_store(0, &[]);
        let (machine, _sender) = boot_with(config(), board(store, WakeCause::Timer));

        assert_eq!(machine.state(), LifecycleState::Configuring);
        assert!(!machine.settings().in_deep_sleep().unwrap());
    }

    #[test]
    fn timer_wake_for_a_removed_slot_falls_back_to_configuring() {
        let store = sleeping_store(2, &[alarm(1, 21_600)]);
        let (machine, _sender) = boot_with(config(), board(store, WakeCause::Timer));

        assert_eq!(machine.state(), LifecycleState::Configuring);
    }

    #[test]
    fn unknown_wake_cause_defaults_to_configuring() {
        let store = sleeping_store(1, &[alarm(1, 21_600)]);
        let (machine, _sender) = boot_with(config(), board(store, WakeCause::Other));

        assert_eq!(machine.state(), LifecycleState::Configuring);
        assert!(!machine.settings().in_deep_sleep().unwrap());
    }

    #[test]
    fn timer_wake_with_alarm_enters_waking() {
        let store = sleeping_store(1, &[alarm(1, 21_600)]);
        let (mut machine, _sender) = boot_with(config(), board(store, WakeCause::Timer));
        assert_eq!(machine.state(), LifecycleState::Waking);

        machine.tick(0);

        assert_eq!(machine.effects().started, Some(alarm(1, 21_600)));
        assert_eq!(machine.effects().ticks, 1);
    }

    #[test]
    fn waking_returns_to_configuring_when_complete() {
        let store = sleeping_store(1, &[alarm(1, 21_600)]);
        let (mut machine, _sender) = boot_with(config(), board(store, WakeCause::Timer));

        machine.tick(0);
        machine.tick(1_000);
        assert_eq!(machine.state(), LifecycleState::Waking);
        machine.tick(2_000);

        assert_eq!(machine.state(), LifecycleState::Configuring);
        assert!(machine.effects().stopped);
    }

    #[test]
    fn operator_interrupt_ends_the_wake_phase() {
        let store = sleeping_store(1, &[alarm(1, 21_600)]);
        let (mut machine, _sender) = boot_with(config(), board(store, WakeCause::Timer));

        machine.tick(0);
        machine.flags().request_config();
        machine.tick(1_000);

        assert_eq!(machine.state(), LifecycleState::Configuring);
        assert!(machine.effects().stopped);
    }

    #[test]
    fn sleep_request_arms_timer_for_next_alarm() {
        let (mut machine, sender) = boot_with(config(), board(MemoryStore::new(), WakeCause::Other));
        machine.tick(0);

        sender
            .submit(Command::SubmitAlarm("1,21600,song.mp3,5".to_string()))
            .unwrap();
        sender.submit(Command::RequestSleep).unwrap();
        let outcome = machine.tick(1_000);

        assert_eq!(
            outcome,
            TickOutcome::Suspend(SleepPlan {
                seconds: 25_200,
                armed_slot: 1,
            })
        );
        assert_eq!(machine.state(), LifecycleState::Sleeping);
        assert!(machine.settings().in_deep_sleep().unwrap());
        assert_eq!(machine.settings().armed_slot().unwrap(), 1);

        let board = machine.into_board();
        assert!(board.hardware.signal_armed);
        assert_eq!(board.hardware.timer_armed, Some(25_200));
    }

    #[test]
    fn sleep_without_alarm_uses_safety_interval() {
        let (mut machine, _sender) = boot_with(config(), board(MemoryStore::new(), WakeCause::Other));
        machine.tick(0);
        machine.flags().request_sleep();

        let outcome = machine.tick(1_000);

        assert_eq!(
            outcome,
            TickOutcome::Suspend(SleepPlan {
                seconds: 60,
                armed_slot: 0,
            })
        );
        assert_eq!(machine.network().time_reads, 0);
        let board = machine.into_board();
        assert_eq!(board.hardware.timer_armed, Some(60));
    }

    #[test]
    fn missing_time_source_keeps_device_configuring() {
        let mut settings = DeviceSettings::new(MemoryStore::new(), 4);
        settings.save_alarm(&alarm(1, 21_600)).unwrap();
        let mut board = board(settings.into_store(), WakeCause::Other);
        board.network.clock = None;
        let (mut machine, _sender) = boot_with(config(), board);
        machine.tick(0);
        machine.flags().request_sleep();

        assert_eq!(machine.tick(1_000), TickOutcome::Continue);

        assert_eq!(machine.state(), LifecycleState::Configuring);
        assert_eq!(machine.flags().status(), OperationStatus::SleepAborted);
        assert_eq!(machine.network().time_reads, 3);
        assert!(!machine.settings().in_deep_sleep().unwrap());
        assert_eq!(machine.into_board().hardware.timer_armed, None);
    }

    #[test]
    fn arm_failure_aborts_sleep_and_clears_flag() {
        let mut board = board(MemoryStore::new(), WakeCause::Other);
        board.hardware.reject_timer = true;
        let (mut machine, _sender) = boot_with(config(), board);
        machine.tick(0);
        machine.flags().request_sleep();

        assert_eq!(machine.tick(1_000), TickOutcome::Continue);

        assert_eq!(machine.state(), LifecycleState::Configuring);
        assert!(!machine.settings().in_deep_sleep().unwrap());
    }

    #[test]
    fn storage_failure_aborts_sleep() {
        let (mut machine, _sender) = boot_with(config(), board(MemoryStore::new(), WakeCause::Other));
        machine.tick(0);
        machine.settings.store_mut().set_read_only(true);
        machine.flags().request_sleep();

        assert_eq!(machine.tick(1_000), TickOutcome::Continue);

        assert_eq!(machine.state(), LifecycleState::Configuring);
        assert_eq!(machine.into_board().hardware.timer_armed, None);
    }

    #[test]
    fn idle_configuring_requests_sleep() {
        let config = ClockConfig {
            configuring_idle_sleep_secs: Some(60),
            ..config()
        };
        let (mut machine, sender) = boot_with(config, board(MemoryStore::new(), WakeCause::Other));

        machine.tick(0);
        sender.submit(Command::SetSsid("home".to_string())).unwrap();
        assert_eq!(machine.tick(30_000), TickOutcome::Continue);
        assert_eq!(machine.tick(89_000), TickOutcome::Continue);

        assert!(matches!(machine.tick(90_000), TickOutcome::Suspend(_)));
    }

    #[test]
    fn full_cycle_survives_the_reboot_boundary() {
        let (mut machine, sender) = boot_with(config(), board(MemoryStore::new(), WakeCause::Other));
        machine.tick(0);
        sender
            .submit(Command::SubmitAlarm("3,25200,birds.mp3,31".to_string()))
            .unwrap();
        sender.submit(Command::RequestSleep).unwrap();
        assert!(matches!(machine.tick(1_000), TickOutcome::Suspend(_)));

        // Deep sleep drops volatile memory: only the store crosses over.
        let mut board = machine.into_board();
        board.hardware = FakeHardware::woken_by(WakeCause::Timer);
        let (mut machine, _sender) = boot_with(config(), board);

        assert_eq!(machine.state(), LifecycleState::Waking);
        machine.tick(0);
        assert_eq!(
            machine.effects().started.as_ref().map(|alarm| alarm.slot),
            Some(3)
        );
        assert_eq!(machine.device_name().len(), "sunrise-".len() + 4);
    }

    #[test]
    fn device_names_are_short_and_prefixed() {
        let mut rng = StdRng::seed_from_u64(7);
        let first = generate_device_name("sunrise-", &mut rng);
        let second = generate_device_name("sunrise-", &mut rng);

        assert!(first.starts_with("sunrise-"));
        assert_eq!(first.len(), 12);
        assert!(second[8..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn status_snapshot_reports_alarms_and_state() {
        let store = sleeping_store(1, &[alarm(1, 21_600)]);
        let (mut machine, _sender) = boot_with(config(), board(store, WakeCause::Signal));
        machine.tick(0);

        let status = machine.status();

        assert_eq!(status.state, "CONFIGURING");
        assert_eq!(status.device_name, "sunrise-test");
        assert_eq!(status.alarms, vec![alarm(1, 21_600)]);
    }
}
