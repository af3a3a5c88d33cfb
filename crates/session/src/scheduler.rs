// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proactive renewal timer.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::codec::CredentialPayload;
use crate::refresh::RefreshCoordinator;

/// When to renew ahead of expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalTiming {
    /// Renew this many seconds before `exp`.
    pub threshold_secs: u64,
    /// Never fire sooner than this, so a token already inside the threshold
    /// does not cause a tight renewal loop.
    pub min_delay_secs: u64,
}

impl Default for RenewalTiming {
    fn default() -> Self {
        Self { threshold_secs: 300, min_delay_secs: 10 }
    }
}

/// `max(min_delay, (exp - now) - threshold)`, in whole seconds.
pub fn renewal_delay(exp: u64, now: u64, timing: RenewalTiming) -> Duration {
    let lead = exp.saturating_sub(now).saturating_sub(timing.threshold_secs);
    Duration::from_secs(lead.max(timing.min_delay_secs))
}

/// A live timer. Dropping it cancels the pending renewal.
struct ArmedTimer {
    delay: Duration,
    _cancel: DropGuard,
}

/// Holds at most one pending background renewal.
pub struct ProactiveScheduler {
    coordinator: Arc<RefreshCoordinator>,
    timing: RenewalTiming,
    timer: Mutex<Option<ArmedTimer>>,
}

impl ProactiveScheduler {
    pub fn new(coordinator: Arc<RefreshCoordinator>, timing: RenewalTiming) -> Self {
        Self { coordinator, timing, timer: Mutex::new(None) }
    }

    pub fn timing(&self) -> RenewalTiming {
        self.timing
    }

    /// Replace any pending timer with one that fires ahead of `payload.exp`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn arm(&self, payload: &CredentialPayload, now: u64) {
        let delay = renewal_delay(payload.exp, now, self.timing);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let coordinator = Arc::clone(&self.coordinator);

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    tracing::debug!("proactive renewal timer fired");
                    // Outcome is observed through the broadcaster.
                    let _ = coordinator.renew().await;
                }
            }
        });

        let previous =
            self.timer.lock().replace(ArmedTimer { delay, _cancel: cancel.drop_guard() });
        drop(previous);
        tracing::debug!(delay_secs = delay.as_secs(), "proactive renewal armed");
    }

    /// Cancel the pending timer, if any.
    pub fn disarm(&self) {
        if self.timer.lock().take().is_some() {
            tracing::debug!("proactive renewal disarmed");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Delay the live timer was armed with.
    pub fn armed_delay(&self) -> Option<Duration> {
        self.timer.lock().as_ref().map(|t| t.delay)
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
