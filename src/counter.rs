use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Process-wide live session count with an idle-shutdown window.
///
/// `add`/`done` are linearized through a watch channel so concurrent
/// sessions always see a consistent total and the idle watcher observes
/// every transition. Every successful `add` must be paired with exactly
/// one `done`, including on early-abort paths.
#[derive(Clone)]
pub struct ConnectionCounter {
    tx: Arc<watch::Sender<usize>>,
    idle: Duration,
}

impl ConnectionCounter {
    /// Create a counter. A zero `idle` duration disables the idle
    /// watcher.
    pub fn new(idle: Duration) -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx: Arc::new(tx), idle }
    }

    /// Increase the live count by `n`, returning the new total.
    pub fn add(&self, n: usize) -> usize {
        let mut total = 0;
        self.tx.send_modify(|count| {
            *count += n;
            total = *count;
        });
        total
    }

    /// Decrease the live count by 1, returning the new total. Saturates
    /// at zero.
    pub fn done(&self) -> usize {
        let mut total = 0;
        self.tx.send_modify(|count| {
            *count = count.saturating_sub(1);
            total = *count;
        });
        total
    }

    /// Current live count.
    pub fn count(&self) -> usize {
        *self.tx.borrow()
    }

    /// Race the idle window against process-wide cancellation.
    ///
    /// When the count has been zero for the full window, cancels
    /// `cancel` so an unattended server self-terminates; exits silently
    /// when the token is cancelled first. Any count transition restarts
    /// the window.
    pub async fn watch_idle(self, cancel: CancellationToken) {
        if self.idle.is_zero() {
            return;
        }
        let mut rx = self.tx.subscribe();
        loop {
            let connections = *rx.borrow_and_update();
            if connections == 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.idle) => {
                        match rx.has_changed() {
                            // The count moved during the window; re-evaluate.
                            Ok(true) => continue,
                            Ok(false) => {
                                tracing::info!(
                                    timeout = ?self.idle,
                                    "no connections within the idle window, shutting down"
                                );
                                cancel.cancel();
                                return;
                            }
                            Err(_) => return,
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            } else {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        }
    }
}
