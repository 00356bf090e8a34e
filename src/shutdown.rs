//! Shutdown coordination
//!
//! A single process-wide exit flag, written exactly once by whichever
//! termination source fires first. Every loop in the player polls it
//! cooperatively; the teardown sequence itself runs in the top-level task,
//! never inside a transport or UI callback, so it cannot deadlock against
//! the event loop that delivered the trigger.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::info;

/// Why the run is terminating. The first reported reason wins and is
/// retained for the exit report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The preview window was closed or ESC was pressed
    WindowClosed,
    /// The process received an interrupt signal
    Interrupted,
    /// The configured play duration elapsed
    TimeoutExpired,
    /// The track ended or the transport reported a disconnect
    StreamEnded,
    /// ICE/DTLS failure or signaling rejection mid-session
    TransportFailed(String),
}

impl ExitReason {
    /// Process exit code for this reason; only transport failure is an error
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitReason::TransportFailed(_) => 4,
            _ => 0,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::WindowClosed => write!(f, "window closed"),
            ExitReason::Interrupted => write!(f, "interrupted"),
            ExitReason::TimeoutExpired => write!(f, "timeout expired"),
            ExitReason::StreamEnded => write!(f, "stream ended"),
            ExitReason::TransportFailed(msg) => write!(f, "transport failed: {msg}"),
        }
    }
}

/// Process-wide exit state: single writer (the coordinator), many readers
#[derive(Default)]
pub struct ExitFlag {
    requested: AtomicBool,
    reason: OnceLock<ExitReason>,
}

impl ExitFlag {
    /// Whether exit has been requested
    pub fn is_set(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// The retained first exit reason, if any
    pub fn reason(&self) -> Option<&ExitReason> {
        self.reason.get()
    }
}

/// Owns the exit flag and fans termination requests into it
#[derive(Clone)]
pub struct ShutdownCoordinator {
    flag: Arc<ExitFlag>,
}

impl ShutdownCoordinator {
    /// Create a coordinator with a fresh, unset exit flag
    pub fn new() -> Self {
        Self {
            flag: Arc::new(ExitFlag::default()),
        }
    }

    /// Shared handle to the exit flag for components that only read it
    pub fn exit_flag(&self) -> Arc<ExitFlag> {
        Arc::clone(&self.flag)
    }

    /// Request termination. The first call sets the flag and retains the
    /// reason; every later call is a no-op. Returns whether this call won.
    pub fn request_exit(&self, reason: ExitReason) -> bool {
        if self.flag.reason.set(reason.clone()).is_ok() {
            self.flag.requested.store(true, Ordering::Release);
            info!("Exit requested: {}", reason);
            true
        } else {
            false
        }
    }

    /// The retained first exit reason, if any
    pub fn reason(&self) -> Option<ExitReason> {
        self.flag.reason().cloned()
    }

    /// Spawn a task that maps ctrl-c onto the exit flag
    pub fn watch_interrupt(&self) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                coordinator.request_exit(ExitReason::Interrupted);
            }
        });
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
