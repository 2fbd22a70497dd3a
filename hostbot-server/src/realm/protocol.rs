// protocol.rs -- realm (PvPGN/Battle.net subset) wire opcodes (spec.md ss6).
// Converted from: myq2-original/qcommon/qcommon.rs's SvcOps/ClcOps enums,
// applied to the SID_* opcode space. Password-hash and CD-key computation
// are explicitly out of scope (spec.md ss1) -- this module only frames and
// parses; `crate::map::Handshaker` supplies the hash bytes.

use hostbot_common::buffer::{ReadCursor, WriteBuffer};
use hostbot_common::codec::{peek_frame, FAMILY_REALM};
use hostbot_common::error::CodecError;

pub const SESSION_PREFACE: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SidOpcode {
    StopAdv = 0x02,
    GetAdvListEx = 0x09,
    EnterChat = 0x0A,
    JoinChannel = 0x0C,
    ChatEvent = 0x0F,
    StartAdvEx3 = 0x1C,
    PublicHost = 0x1B,
    Ping = 0x25,
    AuthInfo = 0x50,
    AuthCheck = 0x51,
    AuthAccountLogon = 0x53,
    AuthAccountLogonProof = 0x54,
    NetGamePort = 0x45,
    FriendList = 0x65,
    ClanMemberList = 0x7D,
}

impl SidOpcode {
    pub fn from_u8(v: u8) -> Option<Self> {
        use SidOpcode::*;
        Some(match v {
            0x02 => StopAdv,
            0x09 => GetAdvListEx,
            0x0A => EnterChat,
            0x0C => JoinChannel,
            0x0F => ChatEvent,
            0x1C => StartAdvEx3,
            0x1B => PublicHost,
            0x25 => Ping,
            0x50 => AuthInfo,
            0x51 => AuthCheck,
            0x53 => AuthAccountLogon,
            0x54 => AuthAccountLogonProof,
            0x45 => NetGamePort,
            0x65 => FriendList,
            0x7D => ClanMemberList,
            _ => return None,
        })
    }
}

pub fn encode_auth_info() -> Vec<u8> {
    // Session preface byte (0x01) is written by the caller immediately
    // before the first frame, not as part of any individual frame.
    let w = WriteBuffer::new();
    w.finish_framed(FAMILY_REALM, SidOpcode::AuthInfo as u8)
}

pub fn encode_auth_check(client_token: u32, exe_version: u32, exe_hash: u32, key_hash: &[u8], exe_info: &str) -> Vec<u8> {
    let mut w = WriteBuffer::new();
    w.write_u32_le(client_token);
    w.write_u32_le(exe_version);
    w.write_u32_le(exe_hash);
    w.write_u32_le(1); // number of CD-keys, always 1 for ROC/TFT
    w.write_u32_le(0); // spawn flag
    w.write_bytes(key_hash);
    w.write_cstring(exe_info);
    w.write_cstring("");
    w.finish_framed(FAMILY_REALM, SidOpcode::AuthCheck as u8)
}

pub fn encode_logon(username: &str) -> Vec<u8> {
    let mut w = WriteBuffer::new();
    w.write_u32_le(0); // client token, filled by caller if needed
    w.write_cstring(username);
    w.finish_framed(FAMILY_REALM, SidOpcode::AuthAccountLogon as u8)
}

pub fn encode_logon_proof(password_proof: &[u8]) -> Vec<u8> {
    let mut w = WriteBuffer::new();
    w.write_bytes(password_proof);
    w.finish_framed(FAMILY_REALM, SidOpcode::AuthAccountLogonProof as u8)
}

pub fn encode_enter_chat() -> Vec<u8> {
    let mut w = WriteBuffer::new();
    w.write_cstring("");
    w.write_cstring("");
    w.finish_framed(FAMILY_REALM, SidOpcode::EnterChat as u8)
}

pub fn encode_join_channel(channel: &str) -> Vec<u8> {
    let mut w = WriteBuffer::new();
    w.write_u32_le(0x02); // JOIN_FLAG_FIRSTJOIN-style flag, realm-specific
    w.write_cstring(channel);
    w.finish_framed(FAMILY_REALM, SidOpcode::JoinChannel as u8)
}

pub fn encode_chat_command(text: &str) -> Vec<u8> {
    let mut w = WriteBuffer::new();
    w.write_cstring(text);
    w.finish_framed(FAMILY_REALM, SidOpcode::ChatEvent as u8)
}

pub fn encode_get_adv_list_ex() -> Vec<u8> {
    let mut w = WriteBuffer::new();
    w.write_u32_le(0); // filter: none
    w.write_u32_le(0);
    w.write_u32_le(0);
    w.write_u32_le(20); // count
    w.write_cstring("");
    w.write_cstring("");
    w.write_bytes(&[0]);
    w.finish_framed(FAMILY_REALM, SidOpcode::GetAdvListEx as u8)
}

pub fn encode_stop_adv() -> Vec<u8> {
    WriteBuffer::new().finish_framed(FAMILY_REALM, SidOpcode::StopAdv as u8)
}

/// `SID_STARTADVEX3` advertises (or refreshes) the current lobby. Sent once
/// on lobby creation and again on every slot-occupancy change (spec.md ss6,
/// scenario 1: "`SID_STARTADVEX3` queued on realm_1").
pub fn encode_start_adv_ex3(
    host_counter: u32,
    game_name: &str,
    map_path: &str,
    game_type_flags: u32,
    elapsed_seconds: u32,
    port: u16,
    player_count: u8,
    max_slots: u8,
) -> Vec<u8> {
    let mut w = WriteBuffer::new();
    w.write_u32_le(0); // state: 0 = game in lobby, not in progress
    w.write_u32_le(host_counter);
    w.write_u32_le(0); // entry key, unused for LAN-visible games
    w.write_cstring(game_name);
    w.write_cstring(""); // password, always empty
    w.write_u32_le(game_type_flags);
    w.write_u16_le(port);
    w.write_u32_le(player_count as u32);
    w.write_u32_le(max_slots as u32);
    w.write_u32_le(elapsed_seconds);
    w.write_cstring(map_path);
    w.write_cstring(""); // host name, server fills this from the session
    w.finish_framed(FAMILY_REALM, SidOpcode::StartAdvEx3 as u8)
}

/// `SID_AUTH_INFO` reply: server-assigned logon parameters the client needs
/// before it can answer `SID_AUTH_CHECK` (spec.md ss6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthInfoReply {
    pub logon_type: u32,
    pub server_token: u32,
    pub udp_value: u32,
    pub mpq_filetime: u64,
    pub value_string_formula: String,
    pub value_string: String,
}

pub fn decode_auth_info_reply(payload: &[u8]) -> Result<AuthInfoReply, CodecError> {
    let mut c = ReadCursor::new(payload);
    let logon_type = c.read_u32_le()?;
    let server_token = c.read_u32_le()?;
    let udp_value = c.read_u32_le()?;
    let filetime_lo = c.read_u32_le()?;
    let filetime_hi = c.read_u32_le()?;
    let value_string_formula = c.read_cstring()?;
    let value_string = c.read_cstring()?;
    Ok(AuthInfoReply {
        logon_type,
        server_token,
        udp_value,
        mpq_filetime: ((filetime_hi as u64) << 32) | filetime_lo as u64,
        value_string_formula,
        value_string,
    })
}

/// `SID_AUTH_CHECK` reply: whether the version/key check passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCheckReply {
    pub result: u32,
    pub info: String,
}

impl AuthCheckReply {
    pub fn passed(&self) -> bool {
        self.result == 0
    }
}

pub fn decode_auth_check_reply(payload: &[u8]) -> Result<AuthCheckReply, CodecError> {
    let mut c = ReadCursor::new(payload);
    let result = c.read_u32_le()?;
    let info = c.read_cstring()?;
    Ok(AuthCheckReply { result, info })
}

/// `SID_AUTH_ACCOUNTLOGON` reply: salt and server public key for the SRP-style
/// proof exchange, present only when `result == 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogonReply {
    pub result: u32,
    pub salt: [u8; 32],
    pub server_public_key: [u8; 32],
}

impl LogonReply {
    pub fn passed(&self) -> bool {
        self.result == 0
    }
}

pub fn decode_logon_reply(payload: &[u8]) -> Result<LogonReply, CodecError> {
    let mut c = ReadCursor::new(payload);
    let result = c.read_u32_le()?;
    if result != 0 {
        return Ok(LogonReply { result, salt: [0; 32], server_public_key: [0; 32] });
    }
    let salt: [u8; 32] = c.read_bytes(32)?.try_into().expect("read_bytes(32) yields a 32-byte slice");
    let server_public_key: [u8; 32] =
        c.read_bytes(32)?.try_into().expect("read_bytes(32) yields a 32-byte slice");
    Ok(LogonReply { result, salt, server_public_key })
}

/// `SID_AUTH_ACCOUNTLOGONPROOF` reply: final pass/fail for the logon attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogonProofReply {
    pub result: u32,
}

impl LogonProofReply {
    pub fn passed(&self) -> bool {
        self.result == 0
    }
}

pub fn decode_logon_proof_reply(payload: &[u8]) -> Result<LogonProofReply, CodecError> {
    let mut c = ReadCursor::new(payload);
    let result = c.read_u32_le()?;
    Ok(LogonProofReply { result })
}

/// A parsed `SID_CHATEVENT`, classified into one of the kinds spec.md ss4.2
/// enumerates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    ChannelJoin { channel: String },
    JoinUser { username: String },
    LeaveUser { username: String },
    Whisper { username: String, text: String },
    Talk { username: String, text: String },
    Info { text: String },
    Error { text: String },
    Broadcast { text: String },
    Emote { username: String, text: String },
}

const EID_SHOWUSER: u32 = 0x01;
const EID_JOIN: u32 = 0x02;
const EID_LEAVE: u32 = 0x03;
const EID_WHISPER: u32 = 0x04;
const EID_TALK: u32 = 0x05;
const EID_BROADCAST: u32 = 0x06;
const EID_CHANNEL: u32 = 0x07;
const EID_EMOTE: u32 = 0x17;
const EID_INFO: u32 = 0x12;
const EID_ERROR: u32 = 0x13;

pub fn decode_chat_event(payload: &[u8]) -> Result<ChatEvent, CodecError> {
    let mut c = ReadCursor::new(payload);
    let eid = c.read_u32_le()?;
    let _flags = c.read_u32_le()?;
    let _ping = c.read_u32_le()?;
    let _ip = c.read_u32_le()?;
    let _acctnum = c.read_u32_le()?;
    let _reg_auth = c.read_u32_le()?;
    let username = c.read_cstring()?;
    let text = c.read_cstring()?;

    Ok(match eid {
        EID_SHOWUSER | EID_JOIN => ChatEvent::JoinUser { username },
        EID_LEAVE => ChatEvent::LeaveUser { username },
        EID_WHISPER => ChatEvent::Whisper { username, text },
        EID_TALK => ChatEvent::Talk { username, text },
        EID_BROADCAST => ChatEvent::Broadcast { text },
        EID_CHANNEL => ChatEvent::ChannelJoin { channel: text },
        EID_EMOTE => ChatEvent::Emote { username, text },
        EID_INFO => ChatEvent::Info { text },
        EID_ERROR => ChatEvent::Error { text },
        other => return Err(CodecError::UnknownOpcode { family: FAMILY_REALM, opcode: other as u8 }),
    })
}

/// Whispers of exactly these forms flip the sender's verified flag if they
/// are currently in the lobby (spec.md ss4.2).
pub fn is_spoofcheck_command(text: &str) -> bool {
    matches!(text.trim(), "s" | "sc" | "spoofcheck")
}

/// Pulls every complete frame out of a connection's read buffer, leaving a
/// trailing partial frame (if any) for the next read. A malformed header
/// drops the rest of the buffer outright -- there is no way to resync a
/// byte-oriented stream once the declared length is wrong.
pub fn drain_frames(buf: &mut Vec<u8>) -> Vec<(u8, Vec<u8>)> {
    let mut out = Vec::new();
    loop {
        match peek_frame(buf) {
            Ok(Some((header, payload))) => {
                out.push((header.opcode, payload.to_vec()));
                let consumed = header.total_len as usize;
                buf.drain(..consumed);
            }
            Ok(None) => break,
            Err(_) => {
                buf.clear();
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_event_payload(eid: u32, username: &str, text: &str) -> Vec<u8> {
        let mut w = WriteBuffer::new();
        w.write_u32_le(eid);
        w.write_u32_le(0);
        w.write_u32_le(0);
        w.write_u32_le(0);
        w.write_u32_le(0);
        w.write_u32_le(0);
        w.write_cstring(username);
        w.write_cstring(text);
        w.into_vec()
    }

    #[test]
    fn decodes_whisper_event() {
        let payload = chat_event_payload(EID_WHISPER, "Bob", "hello");
        let event = decode_chat_event(&payload).unwrap();
        assert_eq!(event, ChatEvent::Whisper { username: "Bob".into(), text: "hello".into() });
    }

    #[test]
    fn decodes_channel_join_event() {
        let payload = chat_event_payload(EID_CHANNEL, "", "Clan Arena");
        let event = decode_chat_event(&payload).unwrap();
        assert_eq!(event, ChatEvent::ChannelJoin { channel: "Clan Arena".into() });
    }

    #[test]
    fn spoofcheck_variants_match() {
        assert!(is_spoofcheck_command("s"));
        assert!(is_spoofcheck_command("sc"));
        assert!(is_spoofcheck_command(" spoofcheck "));
        assert!(!is_spoofcheck_command("spoof"));
    }

    #[test]
    fn auth_check_frame_carries_realm_family() {
        let frame = encode_auth_check(1, 2600, 0xAAAA, &[1, 2, 3, 4], "war3.exe 1 0 0 1234 A");
        assert_eq!(frame[0], FAMILY_REALM);
        assert_eq!(frame[1], SidOpcode::AuthCheck as u8);
    }

    #[test]
    fn start_adv_ex3_frame_carries_realm_family() {
        let frame = encode_start_adv_ex3(0x0102_0304, "game one", "local\\melee.w3x", 0, 0, 6112, 1, 12);
        assert_eq!(frame[0], FAMILY_REALM);
        assert_eq!(frame[1], SidOpcode::StartAdvEx3 as u8);
    }

    #[test]
    fn decodes_auth_info_reply() {
        let mut w = WriteBuffer::new();
        w.write_u32_le(0);
        w.write_u32_le(0xDEAD_BEEF);
        w.write_u32_le(0x1234_5678);
        w.write_u32_le(0);
        w.write_u32_le(0);
        w.write_cstring("A=%d B=%d C=%d 4 A=A-S");
        w.write_cstring("ver-ix86-1.mpq");
        let payload = w.into_vec();
        let reply = decode_auth_info_reply(&payload).unwrap();
        assert_eq!(reply.server_token, 0xDEAD_BEEF);
        assert_eq!(reply.udp_value, 0x1234_5678);
        assert_eq!(reply.value_string, "ver-ix86-1.mpq");
    }

    #[test]
    fn decodes_passing_auth_check_reply() {
        let mut w = WriteBuffer::new();
        w.write_u32_le(0);
        w.write_cstring("");
        let reply = decode_auth_check_reply(&w.into_vec()).unwrap();
        assert!(reply.passed());
    }

    #[test]
    fn decodes_failing_logon_reply_without_trailing_fields() {
        let mut w = WriteBuffer::new();
        w.write_u32_le(1); // account doesn't exist
        let reply = decode_logon_reply(&w.into_vec()).unwrap();
        assert!(!reply.passed());
        assert_eq!(reply.salt, [0; 32]);
    }

    #[test]
    fn decodes_passing_logon_reply_with_salt_and_key() {
        let mut w = WriteBuffer::new();
        w.write_u32_le(0);
        w.write_bytes(&[7u8; 32]);
        w.write_bytes(&[9u8; 32]);
        let reply = decode_logon_reply(&w.into_vec()).unwrap();
        assert!(reply.passed());
        assert_eq!(reply.salt, [7u8; 32]);
        assert_eq!(reply.server_public_key, [9u8; 32]);
    }

    #[test]
    fn drain_frames_leaves_a_trailing_partial_frame_buffered() {
        let first = encode_stop_adv();
        let mut buf = first.clone();
        buf.extend_from_slice(&[FAMILY_REALM, SidOpcode::Ping as u8, 0x08, 0x00, 0xAA]); // declared len 8, only 1 payload byte present
        let frames = drain_frames(&mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, SidOpcode::StopAdv as u8);
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn decodes_logon_proof_reply() {
        let mut w = WriteBuffer::new();
        w.write_u32_le(0);
        let reply = decode_logon_proof_reply(&w.into_vec()).unwrap();
        assert!(reply.passed());
    }
}
