// action.rs -- action-frame scheduler and desync detection (spec.md ss4.5,
// properties P3 and P8).
// Converted from: myq2-original/server/sv_main.rs's ServerTiming (decoupled
// tick rate via sv_fps/sv_frametime/time_residual), generalized from a fixed
// simulation tick to a configurable `latency` (default 100 ms) action-frame
// interval that also advances a monotonic sync counter.

use std::collections::HashMap;

use super::wire::ActionChunk;

pub const DEFAULT_LATENCY_MS: u32 = 100;
pub const DESYNC_GRACE_FRAMES: u32 = 5;

/// Schedules when the next `INCOMING_ACTION` fan-out is due, mirroring
/// `ServerTiming`'s accumulate-residual-then-fire pattern but driven by
/// wall-clock milliseconds rather than a fixed frame count.
#[derive(Debug, Clone)]
pub struct ActionScheduler {
    pub latency_ms: u32,
    residual_ms: u32,
    pub sync_counter: u32,
    pending: Vec<ActionChunk>,
    paused: bool,
}

impl ActionScheduler {
    pub fn new(latency_ms: u32) -> Self {
        ActionScheduler {
            latency_ms,
            residual_ms: 0,
            sync_counter: 0,
            pending: Vec::new(),
            paused: false,
        }
    }

    pub fn enqueue(&mut self, uid: u8, action_bytes: Vec<u8>) {
        self.pending.push(ActionChunk { uid, action_bytes });
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Advance the scheduler by `elapsed_ms` of wall-clock time. Returns
    /// `Some(chunks)` (draining the pending queue) exactly once per
    /// latency-threshold crossing, or `None` if not yet due. While paused,
    /// the latency timer does not advance (spec.md ss4.5 pause/resume).
    pub fn tick(&mut self, elapsed_ms: u32) -> Option<Vec<ActionChunk>> {
        if self.paused {
            return None;
        }
        self.residual_ms += elapsed_ms;
        if self.residual_ms < self.latency_ms {
            return None;
        }
        self.residual_ms -= self.latency_ms;
        self.sync_counter += 1;
        Some(std::mem::take(&mut self.pending))
    }
}

/// Tracks per-player checksums reported via `OUTGOING_KEEPALIVE` at each
/// sync-counter index, and raises a desync event per property P8: "if >= 5
/// consecutive sync-counter indices have non-equal checksums among any two
/// players' reports, a desync event is emitted exactly once."
#[derive(Debug, Default)]
pub struct DesyncTracker {
    reports: HashMap<u32, HashMap<u8, u32>>,
    mismatched_streak: u32,
    emitted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesyncEvent {
    pub sync_counter: u32,
    pub lowest_uid: u8,
}

impl DesyncTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, sync_counter: u32, uid: u8, checksum: u32) {
        self.reports.entry(sync_counter).or_default().insert(uid, checksum);
    }

    fn is_mismatched(reports: &HashMap<u8, u32>) -> bool {
        let mut values = reports.values();
        match values.next() {
            None => false,
            Some(first) => values.any(|v| v != first),
        }
    }

    /// Call once per completed sync-counter index (after all players for
    /// that index have reported, or the next frame has started). Returns a
    /// desync event the first time the grace window is exceeded; returns
    /// `None` on every subsequent mismatched index (P8: "exactly once").
    pub fn evaluate(&mut self, sync_counter: u32, player_sync_counters: &HashMap<u8, u32>) -> Option<DesyncEvent> {
        let mismatched = self
            .reports
            .get(&sync_counter)
            .map(Self::is_mismatched)
            .unwrap_or(false);

        if mismatched {
            self.mismatched_streak += 1;
        } else {
            self.mismatched_streak = 0;
            self.emitted = false;
        }

        if self.mismatched_streak >= DESYNC_GRACE_FRAMES && !self.emitted {
            self.emitted = true;
            let lowest_uid = player_sync_counters
                .iter()
                .min_by_key(|(_, &sync)| sync)
                .map(|(&uid, _)| uid)
                .unwrap_or(0);
            return Some(DesyncEvent { sync_counter, lowest_uid });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_fires_exactly_at_latency_threshold() {
        let mut s = ActionScheduler::new(100);
        s.enqueue(1, vec![0xAA]);
        assert!(s.tick(60).is_none());
        let chunks = s.tick(40).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(s.sync_counter, 1);
    }

    #[test]
    fn scheduler_accumulates_residual_across_ticks() {
        let mut s = ActionScheduler::new(100);
        for _ in 0..9 {
            assert!(s.tick(15).is_none());
        }
        // 9 * 15 = 135 >= 100
        assert!(s.tick(0).is_some());
    }

    #[test]
    fn pause_freezes_the_latency_timer() {
        let mut s = ActionScheduler::new(100);
        s.set_paused(true);
        assert!(s.tick(500).is_none());
        s.set_paused(false);
        assert!(s.tick(99).is_none());
        assert!(s.tick(1).is_some());
    }

    #[test]
    fn desync_emits_once_after_five_frame_grace() {
        let mut tracker = DesyncTracker::new();
        let mut players = HashMap::new();
        players.insert(1u8, 10u32);
        players.insert(2u8, 14u32);

        let mut last_event = None;
        for n in 10..=14u32 {
            tracker.report(n, 1, 0xAAA);
            tracker.report(n, 2, 0xBBB);
            last_event = tracker.evaluate(n, &players);
        }
        assert_eq!(
            last_event,
            Some(DesyncEvent { sync_counter: 14, lowest_uid: 1 })
        );
    }

    #[test]
    fn desync_does_not_fire_before_grace_expires() {
        let mut tracker = DesyncTracker::new();
        let players = HashMap::new();
        for n in 0..4u32 {
            tracker.report(n, 1, 0xAAA);
            tracker.report(n, 2, 0xBBB);
            assert_eq!(tracker.evaluate(n, &players), None);
        }
    }

    #[test]
    fn matching_checksums_never_desync() {
        let mut tracker = DesyncTracker::new();
        let players = HashMap::new();
        for n in 0..20u32 {
            tracker.report(n, 1, 0x111);
            tracker.report(n, 2, 0x111);
            assert_eq!(tracker.evaluate(n, &players), None);
        }
    }
}
