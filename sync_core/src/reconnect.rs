//! Per-endpoint reconnect/backoff controller (component C1).
//!
//! The delay-doubling loop is grounded on the plain `reconnect_attempts`
//! counter in `yahoo_logic::upstream::run_upstream_connection`; the jitter
//! and cap/floor shape (a base duration, a jitter bound, a max duration)
//! follows `dennisss_dacha::net::backoff::ExponentialBackoffOptions`.

use crate::error::{ResumptionDelayInfo, TerminationReason};
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const MIN_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(5 * 60);
const COOL_OFF: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectMode {
    Normal,
    /// Permits a zero or infinite test delay, per spec.md §4.1.
    TestingImmediate,
    TestingInfinite,
}

/// Per-endpoint reconnect bookkeeping and delay computation.
#[derive(Debug)]
pub struct BackoffController {
    mode: ReconnectMode,
    last_delay: Duration,
    last_attempt_at: Option<Instant>,
    scheduled_reset: bool,
    pending_resumption: Option<(Instant, ResumptionDelayInfo)>,
    /// Count of consecutive `ServerSaidTryAgainLater` occurrences; reset by
    /// any other termination reason or a successful connect.
    try_again_later_streak: u32,
}

impl BackoffController {
    pub fn new(mode: ReconnectMode) -> Self {
        Self {
            mode,
            last_delay: Duration::ZERO,
            last_attempt_at: None,
            scheduled_reset: false,
            pending_resumption: None,
            try_again_later_streak: 0,
        }
    }

    /// Records that the ERROR carrying a `ResumptionDelayInfo` was received
    /// now; its timer starts at receipt, not at the next connect attempt.
    pub fn record_try_again_later(&mut self, info: ResumptionDelayInfo) {
        self.pending_resumption = Some((Instant::now(), info));
    }

    /// Called when a connection transitions to `connected`. Per spec.md
    /// §4.1, a `cancel_reconnect_delay()` mid-connection does not reset the
    /// delay immediately; it only arms `scheduled_reset`, cleared once the
    /// urgent PING this triggers is answered by a PONG (`clear_scheduled_reset`).
    pub fn cancel_reconnect_delay(&mut self) {
        self.scheduled_reset = true;
    }

    pub fn scheduled_reset(&self) -> bool {
        self.scheduled_reset
    }

    pub fn clear_scheduled_reset(&mut self) {
        self.scheduled_reset = false;
        self.last_delay = Duration::ZERO;
    }

    /// Computes the delay to wait before the next connection attempt given
    /// why the previous one ended, applies anti-thundering-herd jitter, and
    /// deducts time already elapsed since that termination.
    pub fn next_delay(&mut self, reason: &TerminationReason, terminated_at: Instant) -> Duration {
        if matches!(self.mode, ReconnectMode::TestingImmediate) {
            self.last_delay = Duration::ZERO;
            self.try_again_later_streak = 0;
            return Duration::ZERO;
        }

        if !matches!(reason, TerminationReason::ServerSaidTryAgainLater(_)) {
            self.try_again_later_streak = 0;
        }

        let raw = match reason {
            TerminationReason::ClosedVoluntarily
            | TerminationReason::ReadOrWriteError
            | TerminationReason::PongTimeout => self.grown_from_min(),

            TerminationReason::ConnectOperationFailed
            | TerminationReason::HttpResponseSaysNonfatalError
            | TerminationReason::SyncConnectTimeout => self.doubled(),

            TerminationReason::ServerSaidTryAgainLater(info) => {
                let (received_at, info) = self
                    .pending_resumption
                    .take()
                    .unwrap_or((terminated_at, *info));
                let elapsed_already = received_at.elapsed();
                self.try_again_later_streak += 1;
                let growth = info.multiplier.max(1.0).powi((self.try_again_later_streak - 1) as i32);
                let delay = info.initial.mul_f64(growth).min(info.max);
                self.last_delay = delay;
                return delay.saturating_sub(elapsed_already);
            }

            TerminationReason::SslCertificateRejected
            | TerminationReason::SslProtocolViolation
            | TerminationReason::WebsocketProtocolViolation
            | TerminationReason::HttpResponseSaysFatalError
            | TerminationReason::BadHeaders
            | TerminationReason::SyncProtocolViolation
            | TerminationReason::ServerSaidDoNotReconnect
            | TerminationReason::MissingProtocolFeature => COOL_OFF,
        };

        self.last_delay = raw;

        if matches!(self.mode, ReconnectMode::TestingInfinite) {
            return Duration::MAX;
        }

        let jittered = apply_jitter(raw);
        let elapsed = self.last_attempt_at.map(|t| t.elapsed()).unwrap_or(Duration::ZERO);
        jittered.saturating_sub(elapsed)
    }

    pub fn note_attempt_started(&mut self, at: Instant) {
        self.last_attempt_at = Some(at);
    }

    pub fn note_connected(&mut self) {
        self.last_delay = Duration::ZERO;
        self.try_again_later_streak = 0;
    }

    fn grown_from_min(&self) -> Duration {
        if self.last_delay.is_zero() {
            MIN_DELAY
        } else {
            (self.last_delay * 2).min(MAX_DELAY).max(MIN_DELAY)
        }
    }

    fn doubled(&self) -> Duration {
        if self.last_delay.is_zero() {
            MIN_DELAY
        } else {
            (self.last_delay * 2).max(MIN_DELAY).min(MAX_DELAY)
        }
    }
}

/// Subtracts a uniform random fraction in `[0, 25%]` from `delay`.
fn apply_jitter(delay: Duration) -> Duration {
    let max_cut = delay.mul_f64(0.25);
    if max_cut.is_zero() {
        return delay;
    }
    let cut_ms = rand::rng().random_range(0..=max_cut.as_millis().max(1) as u64);
    delay.saturating_sub(Duration::from_millis(cut_ms))
}

/// Registry of one `BackoffController` per `ServerEndpoint`, owned by the
/// connection multiplexer.
#[derive(Default)]
pub struct BackoffRegistry {
    controllers: HashMap<crate::model::ServerEndpoint, BackoffController>,
    mode: Option<ReconnectMode>,
}

impl BackoffRegistry {
    pub fn new(mode: ReconnectMode) -> Self {
        Self {
            controllers: HashMap::new(),
            mode: Some(mode),
        }
    }

    pub fn get_or_insert(&mut self, endpoint: &crate::model::ServerEndpoint) -> &mut BackoffController {
        let mode = self.mode.unwrap_or(ReconnectMode::Normal);
        self.controllers
            .entry(endpoint.clone())
            .or_insert_with(|| BackoffController::new(mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProtocolEnvelope, ServerEndpoint};

    #[test]
    fn doubles_and_caps_on_connect_failed() {
        let mut ctl = BackoffController::new(ReconnectMode::Normal);
        let d1 = ctl.next_delay(&TerminationReason::ConnectOperationFailed, Instant::now());
        assert!(d1 <= MIN_DELAY);
        for _ in 0..20 {
            ctl.next_delay(&TerminationReason::ConnectOperationFailed, Instant::now());
        }
        assert!(ctl.last_delay <= MAX_DELAY);
    }

    #[test]
    fn cool_off_reasons_use_one_hour() {
        let mut ctl = BackoffController::new(ReconnectMode::Normal);
        ctl.next_delay(&TerminationReason::SslCertificateRejected, Instant::now());
        assert_eq!(ctl.last_delay, COOL_OFF);
    }

    #[test]
    fn testing_immediate_mode_yields_zero() {
        let mut ctl = BackoffController::new(ReconnectMode::TestingImmediate);
        assert_eq!(
            ctl.next_delay(&TerminationReason::ReadOrWriteError, Instant::now()),
            Duration::ZERO
        );
    }

    #[test]
    fn cancel_reconnect_delay_only_arms_flag() {
        let mut ctl = BackoffController::new(ReconnectMode::Normal);
        ctl.next_delay(&TerminationReason::ConnectOperationFailed, Instant::now());
        let delay_before = ctl.last_delay;
        ctl.cancel_reconnect_delay();
        assert!(ctl.scheduled_reset());
        assert_eq!(ctl.last_delay, delay_before);
        ctl.clear_scheduled_reset();
        assert!(!ctl.scheduled_reset());
        assert_eq!(ctl.last_delay, Duration::ZERO);
    }

    #[test]
    fn try_again_later_grows_by_occurrence_not_every_call() {
        let mut ctl = BackoffController::new(ReconnectMode::Normal);
        let info = ResumptionDelayInfo {
            initial: Duration::from_secs(120),
            multiplier: 2.0,
            max: Duration::from_secs(600),
        };
        ctl.record_try_again_later(info);
        let first = ctl.next_delay(&TerminationReason::ServerSaidTryAgainLater(info), Instant::now());
        assert!(first <= Duration::from_secs(120));

        ctl.record_try_again_later(info);
        let second = ctl.next_delay(&TerminationReason::ServerSaidTryAgainLater(info), Instant::now());
        assert!(second <= Duration::from_secs(240));
        assert!(second > Duration::from_secs(120));

        // A success resets the streak back to the initial delay.
        ctl.note_connected();
        ctl.record_try_again_later(info);
        let after_reset = ctl.next_delay(&TerminationReason::ServerSaidTryAgainLater(info), Instant::now());
        assert!(after_reset <= Duration::from_secs(120));
    }

    #[test]
    fn registry_keys_controllers_per_endpoint() {
        let mut reg = BackoffRegistry::new(ReconnectMode::Normal);
        let a = ServerEndpoint::new(ProtocolEnvelope::TlsWs, "a.example.com", 443);
        let b = ServerEndpoint::new(ProtocolEnvelope::TlsWs, "b.example.com", 443);
        reg.get_or_insert(&a).next_delay(&TerminationReason::ConnectOperationFailed, Instant::now());
        assert_eq!(reg.get_or_insert(&b).last_delay, Duration::ZERO);
    }
}
