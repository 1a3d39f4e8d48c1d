use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use super::env::Env;

/// Admission failure, surfaced to clients as HTTP 503.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Another session is active")]
    SessionActive,
    /// Permanent for the process lifetime; no retry succeeds.
    #[error("Server has been destroyed")]
    ServerDestroyed,
}

#[derive(Default)]
struct Flags {
    decommissioned: bool,
    active_session: bool,
}

#[derive(Default)]
struct GateShared {
    flags: Mutex<Flags>,
    unhealthy: AtomicBool,
}

/// Process-wide admission controller.
///
/// Prod sessions take an exclusive slot so two independent terminals
/// never race on one backend's input/output; dev sessions bypass the
/// slot entirely. Once a prod session ends cleanly the gate
/// decommissions the server: the backend is assumed single-use and must
/// not be handed to a second client in an unknown state.
#[derive(Clone, Default)]
pub struct SessionGate {
    shared: Arc<GateShared>,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a session, returning its ticket.
    ///
    /// Checks and mutations happen under one lock acquisition so two
    /// simultaneous prod attempts never both succeed.
    pub fn begin(&self, env: Env) -> Result<SessionGuard, AdmissionError> {
        let mut flags = self.shared.flags.lock();

        if flags.decommissioned {
            return Err(AdmissionError::ServerDestroyed);
        }

        if env == Env::Prod {
            if flags.active_session {
                return Err(AdmissionError::SessionActive);
            }
            flags.active_session = true;
        }

        Ok(SessionGuard {
            gate: self.clone(),
            env,
            released: false,
        })
    }

    /// True once the server has been decommissioned; the health gate
    /// then rejects every request.
    pub fn is_unhealthy(&self) -> bool {
        self.shared.unhealthy.load(Ordering::Acquire)
    }

    pub fn is_decommissioned(&self) -> bool {
        self.shared.flags.lock().decommissioned
    }

    fn mark_unhealthy(&self) {
        self.shared.unhealthy.store(true, Ordering::Release);
    }
}

/// Admission ticket, owned by one session handler for the lifetime of
/// one session.
///
/// Released exactly once: explicitly via [`finish`](Self::finish), or
/// on drop as the panic path (which never decommissions).
pub struct SessionGuard {
    gate: SessionGate,
    env: Env,
    released: bool,
}

impl SessionGuard {
    pub fn env(&self) -> Env {
        self.env
    }

    /// Release the slot. Idempotent; a no-op for dev tickets.
    ///
    /// Returns true when this call performed the (first) decommission,
    /// for logging.
    pub fn finish(&mut self, decommission: bool) -> bool {
        if self.released {
            return false;
        }
        self.released = true;

        if self.env == Env::Dev {
            return false;
        }

        let mut flags = self.gate.shared.flags.lock();
        flags.active_session = false;
        if decommission && !flags.decommissioned {
            flags.decommissioned = true;
            self.gate.mark_unhealthy();
            return true;
        }
        false
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.finish(false);
    }
}
