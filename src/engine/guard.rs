//! Phase watchdog: one cancellable delayed task per active phase.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{ConversationEngine, Phase};

/// Cancellable watchdog armed for one speaking or listening phase.
///
/// Dropping the guard (or replacing it) cancels the pending expiry, so a
/// completed phase never sees a stale timeout. Expiries are additionally
/// epoch-stamped and verified against the engine state before acting.
pub(crate) struct PhaseGuard {
    cancel: CancellationToken,
}

impl PhaseGuard {
    /// Arm a watchdog that force-stops `phase` after `ceiling` unless the
    /// guard is disarmed first. Returns `None` outside a tokio runtime,
    /// in which case the phase runs unguarded.
    pub(crate) fn arm(
        engine: &ConversationEngine,
        phase: Phase,
        ceiling: Duration,
        epoch: u64,
    ) -> Option<Self> {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime: phase watchdog disabled for {phase:?}");
            return None;
        };
        let cancel = CancellationToken::new();
        let expired = cancel.clone();
        let engine = engine.clone();
        handle.spawn(async move {
            tokio::select! {
                () = expired.cancelled() => {}
                () = tokio::time::sleep(ceiling) => engine.on_phase_timeout(phase, epoch),
            }
        });
        Some(Self { cancel })
    }
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
