//! Graceful shutdown bookkeeping.
//!
//! Teardown order:
//! 1. Mark the bridge as draining (new RPC calls get "shutting down")
//! 2. Stop the RPC listener; in-flight HTTP requests keep running
//! 3. Wait up to the drain timeout for in-flight calls to finish
//! 4. Close the RPC server
//! 5. Close the messaging node
//!
//! The coordinator only records progress. The server drives the steps.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Shutdown phase identifiers (in execution order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ShutdownPhase {
    Running = 0,
    Draining = 1,
    WaitingForCalls = 2,
    ClosingRpc = 3,
    ClosingMessaging = 4,
    Complete = 5,
}

impl ShutdownPhase {
    fn from_u8(val: u8) -> Self {
        match val {
            0 => Self::Running,
            1 => Self::Draining,
            2 => Self::WaitingForCalls,
            3 => Self::ClosingRpc,
            4 => Self::ClosingMessaging,
            _ => Self::Complete,
        }
    }
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::WaitingForCalls => write!(f, "waiting_for_calls"),
            Self::ClosingRpc => write!(f, "closing_rpc"),
            Self::ClosingMessaging => write!(f, "closing_messaging"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Log entry for a completed shutdown phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseLog {
    pub phase: ShutdownPhase,
    pub elapsed_ms: u64,
    pub success: bool,
    pub message: Option<String>,
}

/// Shutdown progress snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownStatus {
    pub is_shutting_down: bool,
    pub current_phase: ShutdownPhase,
    pub elapsed_secs: f64,
    pub phases_completed: Vec<PhaseLog>,
}

/// Tracks a shutdown in progress.
pub struct ShutdownCoordinator {
    is_shutting_down: AtomicBool,
    current_phase: AtomicU8,
    started_at: Mutex<Option<Instant>>,
    drain_timeout: Duration,
    phase_log: Mutex<Vec<PhaseLog>>,
}

impl ShutdownCoordinator {
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            is_shutting_down: AtomicBool::new(false),
            current_phase: AtomicU8::new(ShutdownPhase::Running as u8),
            started_at: Mutex::new(None),
            drain_timeout,
            phase_log: Mutex::new(Vec::new()),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::Relaxed)
    }

    /// Initiate shutdown. Returns `false` if already shutting down.
    pub fn initiate(&self) -> bool {
        if self.is_shutting_down.swap(true, Ordering::SeqCst) {
            return false;
        }
        *self.started_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        info!(drain_timeout = ?self.drain_timeout, "Graceful shutdown initiated");
        true
    }

    pub fn current_phase(&self) -> ShutdownPhase {
        ShutdownPhase::from_u8(self.current_phase.load(Ordering::Relaxed))
    }

    /// Move to `next`, logging the phase being left.
    pub fn advance_phase(&self, next: ShutdownPhase, success: bool, message: Option<String>) {
        let current = self.current_phase();
        let elapsed = self.elapsed().as_millis() as u64;

        self.phase_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PhaseLog {
                phase: current,
                elapsed_ms: elapsed,
                success,
                message: message.clone(),
            });
        self.current_phase.store(next as u8, Ordering::SeqCst);

        if success {
            info!(phase = %current, next = %next, elapsed_ms = elapsed, "Shutdown phase complete");
        } else {
            warn!(phase = %current, next = %next, error = ?message, "Shutdown phase failed, continuing");
        }
    }

    pub fn status(&self) -> ShutdownStatus {
        ShutdownStatus {
            is_shutting_down: self.is_shutting_down(),
            current_phase: self.current_phase(),
            elapsed_secs: self.elapsed().as_secs_f64(),
            phases_completed: self
                .phase_log
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    fn elapsed(&self) -> Duration {
        self.started_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|s| s.elapsed())
            .unwrap_or_default()
    }
}
