//! PING/PONG scheduling (spec.md §4.2 Heartbeat).

use rand::Rng;
use std::time::{Duration, Instant};

/// Computes the delay before the next PING after `connected` or after a
/// previous PONG. The first ping after connecting gets full (100%) jitter;
/// subsequent pings get up to 10% jitter, per the design note.
pub fn next_ping_delay(period: Duration, is_first: bool) -> Duration {
    let jitter_fraction = if is_first { 1.0 } else { 0.10 };
    let max_cut = period.mul_f64(jitter_fraction);
    if max_cut.is_zero() {
        return period;
    }
    let cut_ms = rand::rng().random_range(0..=max_cut.as_millis().max(1) as u64);
    period.saturating_sub(Duration::from_millis(cut_ms))
}

/// Tracks the in-flight PING/PONG round trip for one connection.
#[derive(Debug, Default)]
pub struct PongWait {
    sent_at: Option<Instant>,
    sent_timestamp: Option<i64>,
}

impl PongWait {
    pub fn arm(&mut self, timestamp: i64) {
        self.sent_at = Some(Instant::now());
        self.sent_timestamp = Some(timestamp);
    }

    pub fn is_armed(&self) -> bool {
        self.sent_at.is_some()
    }

    /// Verifies an inbound PONG's echoed timestamp and returns the round
    /// trip time. A mismatch is `bad_timestamp`, which is fatal.
    pub fn verify(&mut self, echoed_timestamp: i64) -> Result<Duration, crate::error::ClientProtocolError> {
        let (sent_at, expected) = match (self.sent_at.take(), self.sent_timestamp.take()) {
            (Some(at), Some(ts)) => (at, ts),
            _ => return Err(crate::error::ClientProtocolError::BadTimestamp),
        };
        if echoed_timestamp != expected {
            return Err(crate::error::ClientProtocolError::BadTimestamp);
        }
        Ok(sent_at.elapsed())
    }
}
