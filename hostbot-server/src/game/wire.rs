// wire.rs -- W3GS (family 0xF7) and GProxy (family 0xF8) opcode encode/decode.
// Converted from: myq2-original/qcommon/qcommon.rs's SvcOps/ClcOps enums and
// myq2-common/src/buffer.rs's WriteBuffer/ReadCursor, applied to the wire
// formats enumerated in spec.md ss6.

use hostbot_common::buffer::{ReadCursor, WriteBuffer};
use hostbot_common::codec::{FAMILY_GAME, FAMILY_GPROXY};
use hostbot_common::error::CodecError;

use super::slot::Slot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum W3gsOpcode {
    PingFromHost = 0x01,
    SlotInfoJoin = 0x04,
    RejectJoin = 0x05,
    PlayerInfo = 0x06,
    PlayerLeaveOthers = 0x07,
    SlotInfo = 0x09,
    CountdownStart = 0x0A,
    CountdownEnd = 0x0B,
    IncomingAction = 0x0C,
    ChatFromHost = 0x0F,
    StartDownload = 0x10,
    MapPart = 0x42,
    MapSize = 0x43,
    ReqJoin = 0x1E,
    LeaveGame = 0x21,
    GameLoadedSelf = 0x23,
    OutgoingAction = 0x26,
    OutgoingKeepAlive = 0x27,
    ChatToHost = 0x28,
    GameLoadedOthers = 0x2A,
    PongToHost = 0x2B,
    StartLag = 0x2D,
    StopLag = 0x2E,
    SearchGame = 0x2F,
    GameInfo = 0x30,
    CreateGame = 0x31,
    RefreshGame = 0x32,
    DecreateGame = 0x33,
    IncomingAction2 = 0x48,
}

impl W3gsOpcode {
    pub fn from_u8(v: u8) -> Option<Self> {
        use W3gsOpcode::*;
        Some(match v {
            0x01 => PingFromHost,
            0x04 => SlotInfoJoin,
            0x05 => RejectJoin,
            0x06 => PlayerInfo,
            0x07 => PlayerLeaveOthers,
            0x09 => SlotInfo,
            0x0A => CountdownStart,
            0x0B => CountdownEnd,
            0x0C => IncomingAction,
            0x0F => ChatFromHost,
            0x10 => StartDownload,
            0x42 => MapPart,
            0x43 => MapSize,
            0x1E => ReqJoin,
            0x21 => LeaveGame,
            0x23 => GameLoadedSelf,
            0x26 => OutgoingAction,
            0x27 => OutgoingKeepAlive,
            0x28 => ChatToHost,
            0x2A => GameLoadedOthers,
            0x2B => PongToHost,
            0x2D => StartLag,
            0x2E => StopLag,
            0x2F => SearchGame,
            0x30 => GameInfo,
            0x31 => CreateGame,
            0x32 => RefreshGame,
            0x33 => DecreateGame,
            0x48 => IncomingAction2,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GpsOpcode {
    Init = 0x01,
    Reconnect = 0x02,
    Ack = 0x03,
    Reject = 0x04,
    SupportExtended = 0x05,
    UdpSyn = 0x06,
    UdpAck = 0x07,
}

impl GpsOpcode {
    pub fn from_u8(v: u8) -> Option<Self> {
        use GpsOpcode::*;
        Some(match v {
            0x01 => Init,
            0x02 => Reconnect,
            0x03 => Ack,
            0x04 => Reject,
            0x05 => SupportExtended,
            0x06 => UdpSyn,
            0x07 => UdpAck,
            _ => return None,
        })
    }
}

/// Reason codes for REJECTJOIN (spec.md ss7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RejectJoinReason {
    Full = 9,
    Started = 10,
    WrongPassword = 27,
    WrongVersion = 100,
}

/// A parsed `REQJOIN` (client -> host). Spec.md ss6: 4-byte host-counter +
/// 4-byte entry-key + null-terminated name + 1-byte internal-host-length +
/// 4-byte internal IPv4 (big-endian on the wire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReqJoin {
    pub host_counter: u32,
    pub entry_key: u32,
    pub name: String,
    pub internal_ip: [u8; 4],
}

pub fn decode_reqjoin(payload: &[u8]) -> Result<ReqJoin, CodecError> {
    let mut c = ReadCursor::new(payload);
    let host_counter = c.read_u32_le()?;
    let entry_key = c.read_u32_le()?;
    let name = c.read_cstring()?;
    let host_len = c.read_u8()?;
    let _ = host_len; // internal-host-length field, unused beyond framing
    let ip = c.read_u32_be()?;
    Ok(ReqJoin {
        host_counter,
        entry_key,
        name,
        internal_ip: ip.to_be_bytes(),
    })
}

/// `SLOTINFOJOIN` (host -> joiner). Spec.md ss6: 1-byte UID + 2-byte port +
/// 4-byte external IP + slot array + 4-byte random seed + 1-byte layout
/// style + 1-byte player-slot count.
pub fn encode_slotinfojoin(
    uid: u8,
    port: u16,
    external_ip: [u8; 4],
    slots: &[Slot],
    random_seed: u32,
    layout_style: u8,
    player_slot_count: u8,
) -> Vec<u8> {
    let mut w = WriteBuffer::new();
    w.write_u8(uid);
    w.write_u16_le(port);
    w.write_bytes(&external_ip);
    for slot in slots {
        let mut buf = Vec::with_capacity(9);
        slot.encode(&mut buf);
        w.write_bytes(&buf);
    }
    w.write_u32_le(random_seed);
    w.write_u8(layout_style);
    w.write_u8(player_slot_count);
    w.finish_framed(FAMILY_GAME, W3gsOpcode::SlotInfoJoin as u8)
}

pub fn encode_rejectjoin(reason: RejectJoinReason) -> Vec<u8> {
    let mut w = WriteBuffer::new();
    w.write_u32_le(reason as u32);
    w.finish_framed(FAMILY_GAME, W3gsOpcode::RejectJoin as u8)
}

/// `CHAT_FROM_HOST` = recipient-count + recipient UIDs + sender UID +
/// 1-byte chat flag (0x10: chat message) + null-terminated text.
pub fn encode_chat_from_host(recipients: &[u8], from_uid: u8, text: &str) -> Vec<u8> {
    let mut w = WriteBuffer::new();
    w.write_u8(recipients.len() as u8);
    w.write_bytes(recipients);
    w.write_u8(from_uid);
    w.write_u8(0x10);
    w.write_cstring(text);
    w.finish_framed(FAMILY_GAME, W3gsOpcode::ChatFromHost as u8)
}

/// A chunk of `OUTGOING_ACTION` data received from one player, packed into
/// an `INCOMING_ACTION` fan-out.
#[derive(Debug, Clone)]
pub struct ActionChunk {
    pub uid: u8,
    pub action_bytes: Vec<u8>,
}

/// `INCOMING_ACTION` = 2-byte send-interval + 4-byte CRC + per-player chunks
/// of (1-byte UID, 2-byte action-block-length, action bytes). Spec.md ss4.5:
/// if the concatenation exceeds one packet's budget, split into
/// `INCOMING_ACTION` + `INCOMING_ACTION2` (the latter carries the tail).
///
/// Returns one or two frames: the first is always `IncomingAction`, the
/// second (if present) is `IncomingAction2` carrying the overflow.
pub fn encode_incoming_action(send_interval: u16, chunks: &[ActionChunk], max_packet_payload: usize) -> Vec<Vec<u8>> {
    let mut body = WriteBuffer::new();
    body.write_u16_le(send_interval);

    let mut concatenated = Vec::new();
    for chunk in chunks {
        concatenated.push(chunk.uid);
        concatenated.extend_from_slice(&(chunk.action_bytes.len() as u16).to_le_bytes());
        concatenated.extend_from_slice(&chunk.action_bytes);
    }
    let crc = hostbot_common::crc::crc32_block(&concatenated);
    body.write_u32_le(crc);

    // Budget reserves room for the 2-byte interval + 4-byte CRC already
    // written into `body`.
    let reserved = body.len();
    let first_budget = max_packet_payload.saturating_sub(reserved);

    if concatenated.len() <= first_budget {
        body.write_bytes(&concatenated);
        return vec![body.finish_framed(FAMILY_GAME, W3gsOpcode::IncomingAction as u8)];
    }

    let (head, tail) = concatenated.split_at(first_budget);
    body.write_bytes(head);
    let first = body.finish_framed(FAMILY_GAME, W3gsOpcode::IncomingAction as u8);

    let mut second = WriteBuffer::new();
    second.write_bytes(tail);
    let second = second.finish_framed(FAMILY_GAME, W3gsOpcode::IncomingAction2 as u8);

    vec![first, second]
}

/// `GPS_INIT` (server -> client at join). Spec.md ss6: 2-byte reconnect
/// port, 1-byte UID, 4-byte reconnect key, 1-byte empty-action budget.
pub fn encode_gps_init(reconnect_port: u16, uid: u8, reconnect_key: u32, empty_action_budget: u8) -> Vec<u8> {
    let mut w = WriteBuffer::new();
    w.write_u16_le(reconnect_port);
    w.write_u8(uid);
    w.write_u32_le(reconnect_key);
    w.write_u8(empty_action_budget);
    w.finish_framed(FAMILY_GPROXY, GpsOpcode::Init as u8)
}

/// A parsed `GPS_RECONNECT` (client -> server). Spec.md ss6/ss4.4: 1-byte
/// UID, 4-byte reconnect key, 4-byte lastAckedPacket, optional 4-byte
/// game-id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpsReconnect {
    pub uid: u8,
    pub reconnect_key: u32,
    pub last_acked_packet: u32,
    pub game_id: Option<u32>,
}

pub fn decode_gps_reconnect(payload: &[u8]) -> Result<GpsReconnect, CodecError> {
    let mut c = ReadCursor::new(payload);
    let uid = c.read_u8()?;
    let reconnect_key = c.read_u32_le()?;
    let last_acked_packet = c.read_u32_le()?;
    let game_id = if c.remaining() >= 4 {
        Some(c.read_u32_le()?)
    } else {
        None
    };
    Ok(GpsReconnect {
        uid,
        reconnect_key,
        last_acked_packet,
        game_id,
    })
}

pub fn encode_gps_ack(total_packets_received: u32) -> Vec<u8> {
    let mut w = WriteBuffer::new();
    w.write_u32_le(total_packets_received);
    w.finish_framed(FAMILY_GPROXY, GpsOpcode::Ack as u8)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum GpsRejectReason {
    Invalid = 1,
    NotFound = 2,
}

pub fn encode_gps_reject(reason: GpsRejectReason) -> Vec<u8> {
    let mut w = WriteBuffer::new();
    w.write_u32_le(reason as u32);
    w.finish_framed(FAMILY_GPROXY, GpsOpcode::Reject as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::slot::RaceFlags;

    #[test]
    fn reqjoin_roundtrips() {
        let mut w = WriteBuffer::new();
        w.write_u32_le(0x1234);
        w.write_u32_le(0xABCD);
        w.write_cstring("Bob");
        w.write_u8(9);
        w.write_u32_be(u32::from_be_bytes([10, 0, 0, 5]));
        let payload = w.into_vec();

        let parsed = decode_reqjoin(&payload).unwrap();
        assert_eq!(parsed.host_counter, 0x1234);
        assert_eq!(parsed.entry_key, 0xABCD);
        assert_eq!(parsed.name, "Bob");
        assert_eq!(parsed.internal_ip, [10, 0, 0, 5]);
    }

    #[test]
    fn slotinfojoin_frame_has_game_family_and_opcode() {
        let slot = Slot::open(0, 0, RaceFlags::RANDOM);
        let frame = encode_slotinfojoin(2, 6112, [127, 0, 0, 1], &[slot], 42, 0, 1);
        assert_eq!(frame[0], FAMILY_GAME);
        assert_eq!(frame[1], W3gsOpcode::SlotInfoJoin as u8);
    }

    #[test]
    fn incoming_action_splits_when_over_budget() {
        let chunks = vec![
            ActionChunk { uid: 1, action_bytes: vec![0xAA; 40] },
            ActionChunk { uid: 2, action_bytes: vec![0xBB; 40] },
        ];
        let frames = encode_incoming_action(100, &chunks, 50);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0][1], W3gsOpcode::IncomingAction as u8);
        assert_eq!(frames[1][1], W3gsOpcode::IncomingAction2 as u8);
    }

    #[test]
    fn incoming_action_single_frame_when_within_budget() {
        let chunks = vec![ActionChunk { uid: 1, action_bytes: vec![0xAA; 4] }];
        let frames = encode_incoming_action(100, &chunks, 1400);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn chat_from_host_carries_recipients_and_text() {
        let frame = encode_chat_from_host(&[2, 3], 1, "Unable to create game on realm. Try another name");
        assert_eq!(frame[0], FAMILY_GAME);
        assert_eq!(frame[1], W3gsOpcode::ChatFromHost as u8);
    }

    #[test]
    fn gps_reconnect_roundtrips_without_game_id() {
        let mut w = WriteBuffer::new();
        w.write_u8(5);
        w.write_u32_le(0xDEADBEEF);
        w.write_u32_le(35);
        let payload = w.into_vec();
        let parsed = decode_gps_reconnect(&payload).unwrap();
        assert_eq!(parsed.uid, 5);
        assert_eq!(parsed.reconnect_key, 0xDEADBEEF);
        assert_eq!(parsed.last_acked_packet, 35);
        assert_eq!(parsed.game_id, None);
    }
}
