// lag.rs -- lag detection and drop-vote handling (spec.md ss4.5).
// Converted from: myq2-original/server/sv_lag_compensation.rs's ring-buffer
// "how far behind is this entity" bookkeeping, restyled here around sync
// counters instead of timestamps: a player lags when their reported sync
// counter falls `lag_threshold` frames behind the lobby's.

use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct LagTracker {
    pub lag_threshold: u32,
    laggers: HashSet<u8>,
    drop_votes: HashSet<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LagTransition {
    pub now_lagging: Vec<u8>,
    pub recovered: Vec<u8>,
}

impl LagTracker {
    pub fn new(lag_threshold: u32) -> Self {
        LagTracker {
            lag_threshold,
            laggers: HashSet::new(),
            drop_votes: HashSet::new(),
        }
    }

    pub fn is_lagging(&self, uid: u8) -> bool {
        self.laggers.contains(&uid)
    }

    pub fn any_lagging(&self) -> bool {
        !self.laggers.is_empty()
    }

    /// Re-evaluate every player's lag state against the lobby's sync
    /// counter. Returns which players newly started or stopped lagging
    /// this call, so the caller can broadcast `START_LAG`/`STOP_LAG`.
    pub fn update(&mut self, lobby_sync_counter: u32, player_sync_counters: &[(u8, u32)]) -> LagTransition {
        let mut now_lagging = Vec::new();
        let mut recovered = Vec::new();

        for &(uid, sync) in player_sync_counters {
            let behind = lobby_sync_counter.saturating_sub(sync);
            let currently_tracked = self.laggers.contains(&uid);
            if behind >= self.lag_threshold {
                if !currently_tracked {
                    self.laggers.insert(uid);
                    now_lagging.push(uid);
                }
            } else if currently_tracked {
                self.laggers.remove(&uid);
                self.drop_votes.remove(&uid);
                recovered.push(uid);
            }
        }

        LagTransition { now_lagging, recovered }
    }

    /// Record a `DROPREQ` vote from a non-lagging player. Returns the set of
    /// laggers to drop once a >= 1/2 + 1 majority of eligible (non-lagging)
    /// voters has voted.
    pub fn record_drop_vote(&mut self, voter_uid: u8, eligible_voters: usize) -> Option<Vec<u8>> {
        self.drop_votes.insert(voter_uid);
        let required = eligible_voters / 2 + 1;
        if self.drop_votes.len() >= required {
            let dropped: Vec<u8> = self.laggers.iter().copied().collect();
            self.laggers.clear();
            self.drop_votes.clear();
            Some(dropped)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_starts_lagging_past_threshold() {
        let mut t = LagTracker::new(10);
        let transition = t.update(20, &[(1, 5), (2, 18)]);
        assert_eq!(transition.now_lagging, vec![1]);
        assert!(t.is_lagging(1));
        assert!(!t.is_lagging(2));
    }

    #[test]
    fn player_recovers_when_caught_up() {
        let mut t = LagTracker::new(10);
        t.update(20, &[(1, 5)]);
        assert!(t.is_lagging(1));
        let transition = t.update(20, &[(1, 15)]);
        assert_eq!(transition.recovered, vec![1]);
        assert!(!t.is_lagging(1));
    }

    #[test]
    fn drop_vote_requires_majority() {
        let mut t = LagTracker::new(10);
        t.update(20, &[(1, 0)]);
        assert_eq!(t.record_drop_vote(2, 3), None);
        assert_eq!(t.record_drop_vote(3, 3), Some(vec![1]));
    }

    #[test]
    fn dropping_clears_lag_state() {
        let mut t = LagTracker::new(10);
        t.update(20, &[(1, 0)]);
        t.record_drop_vote(2, 2);
        assert!(!t.any_lagging());
    }
}
