use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::types::{ConnectivityStatus, OperationStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FlagState {
    sleep_requested: bool,
    config_requested: bool,
    wake_requested: bool,
    last_status: OperationStatus,
    connectivity: ConnectivityStatus,
}

impl Default for FlagState {
    fn default() -> Self {
        Self {
            sleep_requested: false,
            config_requested: false,
            wake_requested: false,
            last_status: OperationStatus::None,
            connectivity: ConnectivityStatus::NotConfigured,
        }
    }
}

/// Volatile flags shared between the tick loop and asynchronous writers
/// (command callbacks, button interrupts).
///
/// Writers only ever set; the tick loop only ever takes (reads and clears in
/// one critical section), so a request is observed exactly once.
#[derive(Debug, Clone, Default)]
pub struct SharedFlags {
    inner: Arc<Mutex<FlagState>>,
}

impl SharedFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_sleep(&self) {
        self.lock().sleep_requested = true;
    }

    pub fn take_sleep_request(&self) -> bool {
        std::mem::take(&mut self.lock().sleep_requested)
    }

    pub fn request_config(&self) {
        self.lock().config_requested = true;
    }

    pub fn take_config_request(&self) -> bool {
        std::mem::take(&mut self.lock().config_requested)
    }

    pub fn request_wake(&self) {
        self.lock().wake_requested = true;
    }

    pub fn take_wake_request(&self) -> bool {
        std::mem::take(&mut self.lock().wake_requested)
    }

    pub fn set_status(&self, status: OperationStatus) {
        self.lock().last_status = status;
    }

    pub fn status(&self) -> OperationStatus {
        self.lock().last_status
    }

    pub fn set_connectivity(&self, connectivity: ConnectivityStatus) {
        self.lock().connectivity = connectivity;
    }

    pub fn connectivity(&self) -> ConnectivityStatus {
        self.lock().connectivity
    }

    /// Drops every pending request and status, as a reboot would.
    pub fn reset(&self) {
        *self.lock() = FlagState::default();
    }

    fn lock(&self) -> MutexGuard<'_, FlagState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_are_consumed_once() {
        let flags = SharedFlags::new();
        flags.request_sleep();
        flags.request_config();

        assert!(flags.take_sleep_request());
        assert!(!flags.take_sleep_request());
        assert!(flags.take_config_request());
        assert!(!flags.take_config_request());
        assert!(!flags.take_wake_request());
    }

    #[test]
    fn clones_share_state_across_threads() {
        let flags = SharedFlags::new();
        let writer = flags.clone();

        std::thread::spawn(move || {
            writer.request_wake();
            writer.set_status(OperationStatus::Success);
        })
        .join()
        .unwrap();

        assert!(flags.take_wake_request());
        assert_eq!(flags.status(), OperationStatus::Success);
    }

    #[test]
    fn concurrent_requests_are_taken_exactly_once() {
        let flags = SharedFlags::new();
        flags.request_sleep();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let flags = flags.clone();
                std::thread::spawn(move || flags.take_sleep_request())
            })
            .collect();
        let taken = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|taken| *taken)
            .count();

        assert_eq!(taken, 1);
    }

    #[test]
    fn reset_clears_status_and_requests() {
        let flags = SharedFlags::new();
        flags.request_sleep();
        flags.set_status(OperationStatus::NotSaved);
        flags.set_connectivity(ConnectivityStatus::Connected);

        flags.reset();

        assert!(!flags.take_sleep_request());
        assert_eq!(flags.status(), OperationStatus::None);
        assert_eq!(flags.connectivity(), ConnectivityStatus::NotConfigured);
    }
}
