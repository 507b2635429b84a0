//! Cooperative SIGINT handling.
//!
//! The controller checks the flag between subprocess calls and exits
//! cleanly (releasing its lock) when set. Mid-subprocess, the terminal
//! delivers SIGINT to the whole process group, so the child dies with us
//! and its nonzero exit surfaces through the normal failure path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ShutdownFlag {
    flag: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// Install the SIGINT hook. On platforms without signal-hook support
    /// the flag simply never trips.
    pub fn register() -> Self {
        let flag = Arc::new(AtomicBool::new(false));
        #[cfg(unix)]
        {
            if let Err(e) = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag))
            {
                tracing::warn!(error = %e, "failed to register SIGINT handler");
            }
        }
        Self { flag }
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn trip(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}
