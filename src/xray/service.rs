//! Restart signalling
//!
//! The enforcement job never restarts the proxy core itself. It raises a
//! "needs restart" request on whatever owns the core process.

use std::sync::atomic::{AtomicBool, Ordering};

/// Receiver of restart requests.
pub trait RestartSignal: Send + Sync {
    /// Request that the proxy core be restarted to pick up inbound changes.
    fn set_to_need_restart(&self);
}

/// Restart flag shared with the process supervisor.
///
/// Requests coalesce: any number of `set_to_need_restart` calls between two
/// `take_need_restart` calls produce a single restart.
#[derive(Debug, Default)]
pub struct XrayService {
    need_restart: AtomicBool,
}

impl XrayService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_need_restart(&self) -> bool {
        self.need_restart.load(Ordering::SeqCst)
    }

    /// Consume a pending restart request.
    pub fn take_need_restart(&self) -> bool {
        self.need_restart.swap(false, Ordering::SeqCst)
    }
}

impl RestartSignal for XrayService {
    fn set_to_need_restart(&self) {
        self.need_restart.store(true, Ordering::SeqCst);
    }
}
