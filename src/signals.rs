//! Signal flags
//!
//! Signals never run cleanup themselves. They set a flag and interrupt the
//! relay's readiness wait, which notices the flag and ends the loop through
//! the ordinary teardown path.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM, SIGWINCH};
use signal_hook::SigId;

/// Signals that end the session
const TERMINATING: [i32; 3] = [SIGHUP, SIGINT, SIGTERM];

/// Flags raised by signal handlers and polled by the relay loop
#[derive(Default)]
pub struct SignalFlags {
    cancel: Arc<AtomicBool>,
    resize: Arc<AtomicBool>,
    registered: Vec<SigId>,
}

impl SignalFlags {
    /// Flags with no handlers behind them
    pub fn new() -> Self {
        Self::default()
    }

    /// Register handlers for the terminating signals and SIGWINCH
    pub fn install() -> io::Result<Self> {
        let mut flags = Self::new();
        for signal in TERMINATING {
            let id = signal_hook::flag::register(signal, Arc::clone(&flags.cancel))?;
            flags.registered.push(id);
        }
        let id = signal_hook::flag::register(SIGWINCH, Arc::clone(&flags.resize))?;
        flags.registered.push(id);
        Ok(flags)
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Ask the relay to stop as if a terminating signal had arrived
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Whether the window changed size since the last call
    pub fn take_resize(&self) -> bool {
        self.resize.swap(false, Ordering::Relaxed)
    }
}

impl Drop for SignalFlags {
    fn drop(&mut self) {
        for id in self.registered.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_start_clear() {
        let flags = SignalFlags::new();
        assert!(!flags.cancel_requested());
        assert!(!flags.take_resize());
    }

    #[test]
    fn test_request_cancel() {
        let flags = SignalFlags::new();
        flags.request_cancel();
        assert!(flags.cancel_requested());
    }

    #[test]
    fn test_resize_flag_is_consumed() {
        let flags = SignalFlags::new();
        flags.resize.store(true, Ordering::Relaxed);
        assert!(flags.take_resize());
        assert!(!flags.take_resize());
    }
}
