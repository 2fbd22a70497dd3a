// gproxy.rs -- GProxy reconnection grace windows (spec.md ss4.7, property P4).
// Converted from: myq2-original has no analog (Quake 2's netchan assumes a
// stable UDP endpoint, not a client that can drop TCP and resume later).
// Grounded on the cooperative-timeout style of myq2-server/src/sv_main.rs's
// idle-timeout bookkeeping, applied here to a per-player grace deadline
// instead of a single global client timeout.

use std::time::{Duration, Instant};

use super::player::GProxyLevel;

pub const BASIC_GRACE: Duration = Duration::from_secs(90);
pub const ACK_INTERVAL: Duration = Duration::from_secs(10);

/// Per-player GProxy reconnection bookkeeping, separate from [`super::player::Player`]
/// so the lobby can track grace deadlines without every caller needing
/// mutable access to the full player record.
#[derive(Debug, Clone)]
pub struct GProxyGrace {
    pub level: GProxyLevel,
    pub disconnected_at: Instant,
    pub grace: Duration,
    pub last_ack_sent: Instant,
}

impl GProxyGrace {
    pub fn start(level: GProxyLevel, now: Instant, extended_minutes: u32) -> Self {
        let grace = match level {
            GProxyLevel::Extended => Duration::from_secs(extended_minutes as u64 * 60),
            _ => BASIC_GRACE,
        };
        GProxyGrace {
            level,
            disconnected_at: now,
            grace,
            last_ack_sent: now,
        }
    }

    pub fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.disconnected_at) >= self.grace
    }

    /// True every [`ACK_INTERVAL`] while the grace window is open, so the
    /// lobby can send `GPS_ACK(totalPacketsReceived)`.
    pub fn ack_due(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last_ack_sent) >= ACK_INTERVAL {
            self.last_ack_sent = now;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_grace_expires_after_ninety_seconds() {
        let t0 = Instant::now();
        let grace = GProxyGrace::start(GProxyLevel::Basic, t0, 0);
        assert!(!grace.expired(t0 + Duration::from_secs(89)));
        assert!(grace.expired(t0 + Duration::from_secs(90)));
    }

    #[test]
    fn extended_grace_uses_configured_minutes() {
        let t0 = Instant::now();
        let grace = GProxyGrace::start(GProxyLevel::Extended, t0, 5);
        assert!(!grace.expired(t0 + Duration::from_secs(4 * 60)));
        assert!(grace.expired(t0 + Duration::from_secs(5 * 60)));
    }

    #[test]
    fn ack_fires_once_per_interval() {
        let t0 = Instant::now();
        let mut grace = GProxyGrace::start(GProxyLevel::Basic, t0, 0);
        assert!(!grace.ack_due(t0 + Duration::from_secs(5)));
        assert!(grace.ack_due(t0 + Duration::from_secs(10)));
        assert!(!grace.ack_due(t0 + Duration::from_secs(15)));
        assert!(grace.ack_due(t0 + Duration::from_secs(20)));
    }
}
