// player.rs -- per-connected-client state (spec.md ss3 Player).
// Converted from: myq2-original/server/server.rs's Client struct (per-client
// state owned by the server), restyled per spec.md ss9's explicit-owner
// rule: a player owns its socket outright, and holds no back-reference to
// its game -- callers resolve `(gameId, uid)` pairs instead.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Instant;

use hostbot_common::queue::PriorityQueue;

use crate::net::TcpConnection;

pub const DEFAULT_PAUSES: u8 = 3;
pub const RTT_SAMPLE_WEIGHTS: [u32; 6] = [4, 3, 2, 1, 1, 1];
pub const GPROXY_REPLAY_BUFFER_CAP: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GProxyLevel {
    #[default]
    None,
    Basic,
    Extended,
}

/// One RTT sample plus whether it was taken mid-download (spec.md ss4.5:
/// "drop samples taken during a download").
#[derive(Debug, Clone, Copy)]
pub struct RttSample {
    pub millis: u32,
    pub during_download: bool,
}

/// A buffered outbound packet kept so a GProxy client can reconnect without
/// gaps (spec.md ss4.7, property P4).
#[derive(Debug, Clone)]
pub struct ReplayEntry {
    pub sequence: u32,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerRole {
    Normal,
    Observer,
    PowerObserver,
}

#[derive(Debug)]
pub struct Player {
    pub uid: u8,
    pub name: String,
    pub internal_ip: [u8; 4],
    pub external_addr: SocketAddr,
    pub joining_realm: Option<u8>,
    pub verified: bool,
    pub role: PlayerRole,
    pub ready: bool,
    pub reserved: bool,
    pub owner: bool,
    /// Set once the player explicitly picks a race via a slot-change request
    /// (spec.md ss4.5 expect-race ready condition), as opposed to the
    /// map-assigned default.
    pub race_selected: bool,

    pub total_packets_sent: u32,
    pub total_packets_received: u32,
    pub send_queue: PriorityQueue<Vec<u8>>,

    rtt_samples: VecDeque<RttSample>,
    pub checksum_queue: VecDeque<(u32, u32)>, // (sync_counter, checksum)

    pub map_download_percent: u8,
    pub download_finished: bool,
    pub download_finished_at: Option<Instant>,

    pub load_complete_ticks: Option<u32>,
    pub last_keepalive_sync: u32,

    pub remaining_pauses: u8,
    pub remaining_saves: u8,

    pub reconnect_key: u32,
    pub gproxy_level: GProxyLevel,
    replay_buffer: VecDeque<ReplayEntry>,

    pub disconnected_at: Option<Instant>,
    pub accumulated_disconnected: std::time::Duration,

    pub left: bool,
    pub left_reason: Option<String>,

    /// The player owns its socket outright and holds no back-reference to
    /// its game (spec.md ss9 explicit-owner rule). `None` once the
    /// connection drops, while the player itself lingers for a GProxy grace
    /// period.
    pub connection: Option<TcpConnection>,
}

impl Player {
    pub fn new(uid: u8, name: String, internal_ip: [u8; 4], external_addr: SocketAddr) -> Self {
        Player {
            uid,
            name,
            internal_ip,
            external_addr,
            joining_realm: None,
            verified: false,
            role: PlayerRole::Normal,
            ready: false,
            reserved: false,
            owner: false,
            race_selected: false,
            total_packets_sent: 0,
            total_packets_received: 0,
            send_queue: PriorityQueue::new(),
            rtt_samples: VecDeque::with_capacity(6),
            checksum_queue: VecDeque::new(),
            map_download_percent: 0,
            download_finished: false,
            download_finished_at: None,
            load_complete_ticks: None,
            last_keepalive_sync: 0,
            remaining_pauses: DEFAULT_PAUSES,
            remaining_saves: DEFAULT_PAUSES,
            reconnect_key: rand::random(),
            gproxy_level: GProxyLevel::None,
            replay_buffer: VecDeque::new(),
            disconnected_at: None,
            accumulated_disconnected: std::time::Duration::ZERO,
            left: false,
            left_reason: None,
            connection: None,
        }
    }

    pub fn is_observer(&self) -> bool {
        matches!(self.role, PlayerRole::Observer | PlayerRole::PowerObserver)
    }

    /// Record an RTT sample, keeping only the most recent 6. Samples during
    /// a download are recorded but excluded from [`Player::weighted_rtt`].
    pub fn record_rtt(&mut self, millis: u32, during_download: bool, literal_rtt: bool) {
        let adjusted = if literal_rtt { millis } else { millis / 2 };
        if self.rtt_samples.len() == 6 {
            self.rtt_samples.pop_front();
        }
        self.rtt_samples.push_back(RttSample { millis: adjusted, during_download });
    }

    /// Weighted average of the last up-to-6 non-download samples (weights
    /// 4:3:2:1:1:1, most recent first). Requires >= 3 usable samples before
    /// returning a value, per spec.md ss4.5.
    pub fn weighted_rtt(&self) -> Option<u32> {
        let usable: Vec<&RttSample> = self.rtt_samples.iter().rev().filter(|s| !s.during_download).collect();
        if usable.len() < 3 {
            return None;
        }
        let mut weighted_sum = 0u64;
        let mut weight_total = 0u64;
        for (sample, weight) in usable.iter().zip(RTT_SAMPLE_WEIGHTS.iter()) {
            weighted_sum += sample.millis as u64 * *weight as u64;
            weight_total += *weight as u64;
        }
        Some((weighted_sum / weight_total.max(1)) as u32)
    }

    pub fn push_replay(&mut self, sequence: u32, bytes: Vec<u8>) {
        if self.replay_buffer.len() == GPROXY_REPLAY_BUFFER_CAP {
            self.replay_buffer.pop_front();
        }
        self.replay_buffer.push_back(ReplayEntry { sequence, bytes });
    }

    /// Packets strictly newer than `last_acked`, in send order (spec.md
    /// P4: "server first sends packet R+1").
    pub fn replay_since(&self, last_acked: u32) -> Vec<&ReplayEntry> {
        self.replay_buffer.iter().filter(|e| e.sequence > last_acked).collect()
    }

    pub fn truncate_replay_up_to(&mut self, acked: u32) {
        while matches!(self.replay_buffer.front(), Some(e) if e.sequence <= acked) {
            self.replay_buffer.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_addr() -> SocketAddr {
        "127.0.0.1:6112".parse().unwrap()
    }

    #[test]
    fn weighted_rtt_requires_three_samples() {
        let mut p = Player::new(2, "Bob".into(), [10, 0, 0, 1], sample_addr());
        p.record_rtt(100, false, true);
        p.record_rtt(100, false, true);
        assert_eq!(p.weighted_rtt(), None);
        p.record_rtt(100, false, true);
        assert_eq!(p.weighted_rtt(), Some(100));
    }

    #[test]
    fn download_samples_excluded_from_weighted_rtt() {
        let mut p = Player::new(2, "Bob".into(), [10, 0, 0, 1], sample_addr());
        p.record_rtt(50, false, true);
        p.record_rtt(50, false, true);
        p.record_rtt(50, false, true);
        p.record_rtt(5000, true, true); // during download, should be excluded
        assert_eq!(p.weighted_rtt(), Some(50));
    }

    #[test]
    fn non_literal_rtt_is_halved() {
        let mut p = Player::new(2, "Bob".into(), [10, 0, 0, 1], sample_addr());
        p.record_rtt(200, false, false);
        p.record_rtt(200, false, false);
        p.record_rtt(200, false, false);
        assert_eq!(p.weighted_rtt(), Some(100));
    }

    #[test]
    fn replay_buffer_honors_p4_gapless_replay() {
        let mut p = Player::new(2, "Bob".into(), [10, 0, 0, 1], sample_addr());
        for seq in 1..=50u32 {
            p.push_replay(seq, vec![seq as u8]);
        }
        let replay = p.replay_since(35);
        assert_eq!(replay.len(), 15);
        assert_eq!(replay[0].sequence, 36);
        assert_eq!(replay.last().unwrap().sequence, 50);
    }

    #[test]
    fn truncate_replay_drops_acked_prefix() {
        let mut p = Player::new(2, "Bob".into(), [10, 0, 0, 1], sample_addr());
        for seq in 1..=10u32 {
            p.push_replay(seq, vec![]);
        }
        p.truncate_replay_up_to(7);
        assert_eq!(p.replay_since(0).first().unwrap().sequence, 8);
    }
}
