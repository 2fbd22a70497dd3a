// discovery.rs -- UDP LAN discovery bus (spec.md ss4.3).
// Converted from: myq2-original/qcommon/net.rs's NET_SendPacket/NET_GetPacket
// dispatch registration pattern, applied to the discovery datagram opcodes
// instead of Quake's connectionless out-of-band packets.

use hostbot_common::codec::FAMILY_GAME;
use hostbot_common::net::HostAddr;

use crate::game::wire::W3gsOpcode;

pub const STANDARD_PORT: u16 = 6112;
pub const PRODUCT_ROC: u32 = 0x3157_3350; // "W3P3" reversed on the wire, kept symbolic here
pub const PRODUCT_TFT: u32 = 0x3357_3350; // "W3P3" TFT variant

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchGame {
    pub product_id: u32,
    pub version: u32,
    pub host_counter: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    SearchGame(SearchGame),
    CreateGame,
    RefreshGame,
    DecreateGame,
    Unrecognized,
}

/// Classify a UDP payload's first two bytes per spec.md ss4.3.
pub fn classify(payload: &[u8]) -> DiscoveryEvent {
    if payload.len() < 2 || payload[0] != FAMILY_GAME {
        return DiscoveryEvent::Unrecognized;
    }
    match W3gsOpcode::from_u8(payload[1]) {
        Some(W3gsOpcode::SearchGame) if payload.len() >= 16 => {
            let product_id = u32::from_le_bytes(payload[4..8].try_into().unwrap());
            let version = u32::from_le_bytes(payload[8..12].try_into().unwrap());
            let host_counter = u32::from_le_bytes(payload[12..16].try_into().unwrap());
            DiscoveryEvent::SearchGame(SearchGame { product_id, version, host_counter })
        }
        Some(W3gsOpcode::CreateGame) => DiscoveryEvent::CreateGame,
        Some(W3gsOpcode::RefreshGame) => DiscoveryEvent::RefreshGame,
        Some(W3gsOpcode::DecreateGame) => DiscoveryEvent::DecreateGame,
        _ => DiscoveryEvent::Unrecognized,
    }
}

pub fn search_game_matches_bot(search: &SearchGame, configured_version: u32) -> bool {
    (search.product_id == PRODUCT_ROC || search.product_id == PRODUCT_TFT) && search.version == configured_version
}

/// Build the `GAMEINFO` reply payload, embedding the stat string of
/// spec.md ss4.1.
pub fn encode_gameinfo(product_id: u32, version: u32, host_counter: u32, entry_key: u32, game_name: &str, stat_string: &[u8], slots_total: u32, slots_open: u32, elapsed_secs: u32, port: u16) -> Vec<u8> {
    let mut w = hostbot_common::buffer::WriteBuffer::new();
    w.write_u32_le(product_id);
    w.write_u32_le(version);
    w.write_u32_le(host_counter);
    w.write_u32_le(entry_key);
    w.write_cstring(game_name);
    w.write_u8(0); // password byte, always empty on the wire
    let encoded_stat = hostbot_common::statstring::encode(stat_string);
    w.write_bytes(&encoded_stat);
    w.write_u8(0);
    w.write_u32_le(slots_total);
    w.write_u32_le(0x01); // game type flag, placeholder for advanced filters
    w.write_u32_le(slots_open);
    w.write_u32_le(elapsed_secs);
    w.write_u16_le(port);
    w.finish_framed(FAMILY_GAME, W3gsOpcode::GameInfo as u8)
}

/// Forwarder relay: unknown UDP traffic re-emitted with a 4-byte
/// pseudo-header (source IP, source port, game version) per spec.md ss4.3.
pub fn prepend_forwarder_header(payload: &[u8], source: HostAddr, game_version: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    match source.ipv4_octets() {
        Some(ip) => {
            out.extend_from_slice(&ip[..3]);
        }
        None => out.extend_from_slice(&[0, 0, 0]),
    }
    out.push(game_version);
    out.extend_from_slice(payload);
    out
}

/// Should the bus additionally multicast a `GAMEINFO` to `<source-ip>:6112`?
/// Spec.md ss4.3: "if the source port is not the standard 6112 and the
/// source IP is IPv4".
pub fn should_multicast_to_standard_port(source: HostAddr) -> bool {
    source.is_ipv4() && source.port() != STANDARD_PORT
}

#[cfg(test)]
mod tests {
    use super::*;

    fn searchgame_payload(product_id: u32, version: u32, host_counter: u32) -> Vec<u8> {
        let mut v = vec![FAMILY_GAME, W3gsOpcode::SearchGame as u8, 0, 0];
        v.extend_from_slice(&product_id.to_le_bytes());
        v.extend_from_slice(&version.to_le_bytes());
        v.extend_from_slice(&host_counter.to_le_bytes());
        v
    }

    #[test]
    fn classifies_searchgame() {
        let payload = searchgame_payload(PRODUCT_TFT, 2600, 42);
        match classify(&payload) {
            DiscoveryEvent::SearchGame(s) => {
                assert_eq!(s.product_id, PRODUCT_TFT);
                assert_eq!(s.version, 2600);
                assert_eq!(s.host_counter, 42);
            }
            other => panic!("wrong classification: {other:?}"),
        }
    }

    #[test]
    fn too_short_searchgame_is_unrecognized() {
        let payload = vec![FAMILY_GAME, W3gsOpcode::SearchGame as u8, 0, 0, 1, 2];
        assert_eq!(classify(&payload), DiscoveryEvent::Unrecognized);
    }

    #[test]
    fn version_mismatch_does_not_match_bot() {
        let search = SearchGame { product_id: PRODUCT_TFT, version: 2500, host_counter: 1 };
        assert!(!search_game_matches_bot(&search, 2600));
    }

    #[test]
    fn non_standard_port_triggers_multicast() {
        let a = HostAddr::V4 { ip: [10, 0, 0, 5], port: 6113 };
        assert!(should_multicast_to_standard_port(a));
        let b = HostAddr::V4 { ip: [10, 0, 0, 5], port: 6112 };
        assert!(!should_multicast_to_standard_port(b));
    }

    #[test]
    fn gameinfo_frame_embeds_null_free_stat_string() {
        let frame = encode_gameinfo(PRODUCT_TFT, 2600, 1, 0, "game one", &[0u8, 1, 2], 12, 10, 5, 6112);
        assert_eq!(frame[0], FAMILY_GAME);
        assert_eq!(frame[1], W3gsOpcode::GameInfo as u8);
    }
}
