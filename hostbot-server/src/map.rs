// map.rs -- map metadata and the out-of-scope fingerprinting collaborator.
// Converted from: myq2-original has no analog (Quake 2 maps are BSPs with
// no equivalent fingerprint scheme). Per spec.md ss1, map file parsing
// (CRC32, weak hash, SHA-1 over the archive's script members) is explicitly
// out of scope -- it's modeled here as a pure data type plus a collaborator
// trait the supervisor calls into, the same way the original's sv_init.rs
// models `SvClientCallbacks` as an externally-registered hook rather than
// inline logic.

use crate::game::slot::{GameFlags, SlotTemplate};

/// Sentinel width/height pair signalling "reconnection-capable" maps
/// (spec.md ss3).
pub const RECONNECTION_CAPABLE_DIMENSIONS: (u16, u16) = (0xFFFF, 0xFFFF);

/// Immutable per-hosted-game map fingerprint and layout (spec.md ss3).
#[derive(Debug, Clone)]
pub struct MapMetadata {
    pub client_path: String,
    pub size_bytes: u32,
    pub crc32: u32,
    pub weak_hash: [u8; 4],
    pub sha1: [u8; 20],
    pub width: u16,
    pub height: u16,
    pub slot_template: SlotTemplate,
    pub flags: GameFlags,
    pub min_game_version: u32,
}

impl MapMetadata {
    pub fn is_reconnection_capable(&self) -> bool {
        (self.width, self.height) == RECONNECTION_CAPABLE_DIMENSIONS
    }

    /// Invariant: fingerprints must match between host and joining client.
    pub fn fingerprints_match(&self, other_crc32: u32, other_weak_hash: [u8; 4], other_sha1: [u8; 20]) -> bool {
        self.crc32 == other_crc32 && self.weak_hash == other_weak_hash && self.sha1 == other_sha1
    }

    pub fn custom_forces(&self) -> bool {
        self.flags.contains(GameFlags::CUSTOM_FORCES)
    }

    pub fn fixed_player_settings(&self) -> bool {
        self.flags.contains(GameFlags::FIXED_PLAYER_SETTINGS)
    }
}

/// Error surfaced by [`MapLoader`] implementations; a fatal startup error
/// per spec.md ss7 (unreadable map path).
#[derive(Debug, thiserror::Error)]
pub enum MapLoadError {
    #[error("could not read map {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("map identifier {0:?} could not be resolved")]
    UnresolvedIdentifier(String),
}

/// The out-of-scope collaborator that parses a map file into
/// [`MapMetadata`]. A real implementation computes CRC32, the weak
/// XOR-rotate hash, and SHA-1 over `common.j`/`blizzard.j`/`war3map.j` and
/// the rest of the archive; the runtime only depends on this trait so it
/// can be exercised against a fake in tests.
pub trait MapLoader {
    fn parse_map(&self, identifier: &str) -> Result<MapMetadata, MapLoadError>;
}

/// The out-of-scope crypto collaborator for logon key hashing and CD-key
/// challenge response (spec.md ss1).
pub trait Handshaker {
    fn hash_logon_password(&self, username: &str, password: &str, client_token: u32, server_token: u32) -> Vec<u8>;
    fn check_revision(&self, value_string: &str, mpq_data: &[u8]) -> u32;
    fn create_key_hash(&self, cd_key: &str, client_token: u32, server_token: u32) -> Vec<u8>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::slot::{RaceFlags, Slot, SlotTemplate};

    fn sample_metadata() -> MapMetadata {
        MapMetadata {
            client_path: "Maps\\Download\\melee.w3x".to_string(),
            size_bytes: 123_456,
            crc32: 0xDEADBEEF,
            weak_hash: [1, 2, 3, 4],
            sha1: [0u8; 20],
            width: 96,
            height: 96,
            slot_template: SlotTemplate::new(
                vec![Slot::open(0, 0, RaceFlags::RANDOM), Slot::open(1, 1, RaceFlags::RANDOM)],
                2,
            ),
            flags: GameFlags::empty(),
            min_game_version: 2600,
        }
    }

    #[test]
    fn fingerprint_match_requires_all_three() {
        let m = sample_metadata();
        assert!(m.fingerprints_match(0xDEADBEEF, [1, 2, 3, 4], [0u8; 20]));
        assert!(!m.fingerprints_match(0xBADF00D, [1, 2, 3, 4], [0u8; 20]));
    }

    #[test]
    fn reconnection_capable_sentinel() {
        let mut m = sample_metadata();
        assert!(!m.is_reconnection_capable());
        m.width = 0xFFFF;
        m.height = 0xFFFF;
        assert!(m.is_reconnection_capable());
    }
}
