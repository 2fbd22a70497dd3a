// realm/mod.rs -- per-realm session state machine (spec.md ss3 RealmSession, ss4.2).
// Converted from: myq2-original/server/server.rs's per-client state enum
// plus myq2-server/src/sv_main.rs's reconnect/backoff bookkeeping, applied
// here to a realm rather than a game client: exponential backoff on
// disconnect, a priority-tagged outbound queue drained under flood control,
// and periodic game-list refresh.

pub mod protocol;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use hostbot_common::queue::{Priority, PriorityQueue};

use crate::net::TcpConnection;
use protocol::ChatEvent;

pub const INITIAL_BACKOFF: Duration = Duration::from_secs(45);
pub const QUEUE_EXPIRY: Duration = Duration::from_secs(30);
pub const FLOOD_QUEUE_LIMIT: usize = 20;
pub const GAME_LIST_QUERY_INTERVAL: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealmPhase {
    Disconnected,
    Connecting,
    AuthInfoSent,
    AuthCheckSent,
    LogonSent,
    LogonProofSent,
    InChat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketSizeClass {
    Small,
    Medium,
    Large,
}

impl PacketSizeClass {
    pub fn classify(byte_len: usize) -> Self {
        if byte_len <= 64 {
            PacketSizeClass::Small
        } else if byte_len <= 128 {
            PacketSizeClass::Medium
        } else {
            PacketSizeClass::Large
        }
    }

    pub fn delay(self) -> Duration {
        match self {
            PacketSizeClass::Small => Duration::from_millis(1300),
            PacketSizeClass::Medium => Duration::from_millis(3300),
            PacketSizeClass::Large => Duration::from_millis(4300),
        }
    }
}

const FLOOD_IMMUNE_DELAY: Duration = Duration::from_millis(150);

struct QueuedPacket {
    bytes: Vec<u8>,
    enqueued_at: Instant,
    game_generation: Option<u32>,
    chat_blocking: bool,
}

pub struct RealmSession {
    pub host_name: String,
    pub username: String,
    pub password: String,
    pub phase: RealmPhase,
    pub flood_immune: bool,
    pub current_channel: Option<String>,
    pub verified_nickname: Option<String>,

    queue: PriorityQueue<QueuedPacket>,
    pub last_disconnect: Option<Instant>,
    pub backoff: Duration,
    pub last_send: Option<Instant>,
    pub last_sent_size_class: Option<PacketSizeClass>,
    pub last_game_list_query: Option<Instant>,
    pub current_game_generation: Option<u32>,

    pub client_token: u32,
    pub server_token: Option<u32>,
    pub salt: Option<[u8; 32]>,
    pub server_public_key: Option<[u8; 32]>,

    /// Resolved once at configuration time; reused on every reconnect
    /// attempt (spec.md ss1: DNS resolution of `realm_N.host_name` is out of
    /// scope, so the caller resolves it once and hands the address in).
    pub addr: Option<SocketAddr>,
    /// The realm owns its socket outright (spec.md ss9 explicit-owner rule).
    pub connection: Option<TcpConnection>,
}

impl RealmSession {
    pub fn new(host_name: String, username: String, password: String, flood_immune: bool) -> Self {
        RealmSession {
            host_name,
            username,
            password,
            phase: RealmPhase::Disconnected,
            flood_immune,
            current_channel: None,
            verified_nickname: None,
            queue: PriorityQueue::new(),
            last_disconnect: None,
            backoff: INITIAL_BACKOFF,
            last_send: None,
            last_sent_size_class: None,
            last_game_list_query: None,
            current_game_generation: None,
            client_token: rand::random(),
            server_token: None,
            salt: None,
            server_public_key: None,
            addr: None,
            connection: None,
        }
    }

    pub fn enqueue(&mut self, priority: Priority, bytes: Vec<u8>, game_generation: Option<u32>) {
        let chat_blocking = priority == Priority::ChatBlocking;
        self.queue.push(
            priority,
            QueuedPacket { bytes, enqueued_at: Instant::now(), game_generation, chat_blocking },
        );
    }

    fn expire_and_drop_stale(&mut self, now: Instant) {
        self.queue.retain(|p| now.duration_since(p.enqueued_at) < QUEUE_EXPIRY);
        let generation = self.current_game_generation;
        self.queue.retain(|p| match p.game_generation {
            Some(g) => Some(g) == generation,
            None => true,
        });
        if !self.flood_immune {
            let non_priority_len = self.queue.len_of(Priority::Default)
                + self.queue.len_of(Priority::GameList)
                + self.queue.len_of(Priority::GameRefresh);
            if non_priority_len > FLOOD_QUEUE_LIMIT {
                let mut dropped = 0usize;
                let to_drop = non_priority_len - FLOOD_QUEUE_LIMIT;
                self.queue.retain(|p| {
                    if p.chat_blocking || dropped >= to_drop {
                        true
                    } else {
                        dropped += 1;
                        false
                    }
                });
            }
        }
    }

    /// Returns the next packet to send, respecting flood-control delay and
    /// the "CHAT_BLOCKING blocks until in_chat" rule (spec.md ss4.2,
    /// property P7). Does not remove non-eligible packets from the queue.
    pub fn next_send(&mut self, now: Instant) -> Option<Vec<u8>> {
        self.expire_and_drop_stale(now);

        if let Some(last_class) = self.last_sent_size_class {
            let required_delay = if self.flood_immune { FLOOD_IMMUNE_DELAY } else { last_class.delay() };
            if let Some(last_send) = self.last_send {
                if now.duration_since(last_send) < required_delay {
                    return None;
                }
            }
        }

        // Peek at the queue without destructively popping a CHAT_BLOCKING
        // packet we can't send yet.
        if self.queue.is_empty() {
            return None;
        }
        let packet = self.queue.pop()?;
        if packet.chat_blocking && self.phase != RealmPhase::InChat {
            // Not ready; put it back at the front of its lane.
            self.queue.push(Priority::ChatBlocking, packet);
            return None;
        }

        self.last_send = Some(now);
        self.last_sent_size_class = Some(PacketSizeClass::classify(packet.bytes.len()));
        Some(packet.bytes)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn on_disconnect(&mut self, now: Instant) {
        self.phase = RealmPhase::Disconnected;
        self.last_disconnect = Some(now);
        self.queue.clear();
    }

    pub fn schedule_reconnect_at(&self) -> Option<Instant> {
        self.last_disconnect.map(|t| t + self.backoff)
    }

    pub fn on_connect_failed(&mut self, max_backoff: Duration) {
        self.backoff = (self.backoff * 2).min(max_backoff);
    }

    pub fn on_logon_proof_succeeded(&mut self) {
        self.backoff = INITIAL_BACKOFF;
        self.phase = RealmPhase::LogonProofSent;
    }

    /// The TCP connection to the realm has just completed; send the session
    /// preface's first frame (spec.md ss6: "Session preface = one byte 0x01
    /// then SID_AUTH_INFO").
    pub fn on_connected(&mut self) -> Vec<u8> {
        self.phase = RealmPhase::AuthInfoSent;
        protocol::encode_auth_info()
    }

    /// Decode-driven transition on `SID_AUTH_INFO`'s reply: stash the server
    /// token, run the version/CD-key handshake through the `Handshaker`
    /// boundary, and queue `SID_AUTH_CHECK`.
    pub fn on_auth_info_reply(
        &mut self,
        reply: &protocol::AuthInfoReply,
        handshaker: &dyn crate::map::Handshaker,
        cd_key: &str,
        exe_info: &str,
    ) -> Vec<u8> {
        self.server_token = Some(reply.server_token);
        let exe_version = handshaker.check_revision(&reply.value_string, &[]);
        let key_hash = handshaker.create_key_hash(cd_key, self.client_token, reply.server_token);
        self.phase = RealmPhase::AuthCheckSent;
        protocol::encode_auth_check(self.client_token, exe_version, exe_version, &key_hash, exe_info)
    }

    /// Decode-driven transition on `SID_AUTH_CHECK`'s reply: proceed to
    /// account logon when the check passes, otherwise drop the session so
    /// the caller's reconnect/backoff bookkeeping takes over.
    pub fn on_auth_check_reply(&mut self, reply: &protocol::AuthCheckReply) -> Option<Vec<u8>> {
        if !reply.passed() {
            self.phase = RealmPhase::Disconnected;
            return None;
        }
        self.phase = RealmPhase::LogonSent;
        Some(protocol::encode_logon(&self.username))
    }

    /// Decode-driven transition on `SID_AUTH_ACCOUNTLOGON`'s reply: stash the
    /// salt/server public key and answer with the password proof.
    pub fn on_logon_reply(&mut self, reply: &protocol::LogonReply, handshaker: &dyn crate::map::Handshaker) -> Option<Vec<u8>> {
        if !reply.passed() {
            self.phase = RealmPhase::Disconnected;
            return None;
        }
        self.salt = Some(reply.salt);
        self.server_public_key = Some(reply.server_public_key);
        let server_token = self.server_token.unwrap_or(0);
        let proof = handshaker.hash_logon_password(&self.username, &self.password, self.client_token, server_token);
        self.phase = RealmPhase::LogonProofSent;
        Some(protocol::encode_logon_proof(&proof))
    }

    /// Decode-driven transition on `SID_AUTH_ACCOUNTLOGONPROOF`'s reply: a
    /// pass enters chat; a fail drops the session.
    pub fn on_logon_proof_reply(&mut self, reply: &protocol::LogonProofReply) -> Option<Vec<u8>> {
        if !reply.passed() {
            self.phase = RealmPhase::Disconnected;
            return None;
        }
        self.on_logon_proof_succeeded();
        self.phase = RealmPhase::InChat;
        Some(protocol::encode_enter_chat())
    }

    /// Queues (or re-queues) `SID_STARTADVEX3` once in chat, tagged with the
    /// lobby's generation so a stale refresh after the lobby closes never
    /// sends a superseded frame (spec.md ss6 scenario 1; flood lane
    /// `Priority::GameRefresh`).
    #[allow(clippy::too_many_arguments)]
    pub fn queue_game_advertisement(
        &mut self,
        host_counter: u32,
        game_name: &str,
        map_path: &str,
        game_type_flags: u32,
        elapsed_seconds: u32,
        port: u16,
        player_count: u8,
        max_slots: u8,
        game_generation: u32,
    ) {
        if self.phase != RealmPhase::InChat {
            return;
        }
        let frame = protocol::encode_start_adv_ex3(
            host_counter,
            game_name,
            map_path,
            game_type_flags,
            elapsed_seconds,
            port,
            player_count,
            max_slots,
        );
        self.enqueue(Priority::GameRefresh, frame, Some(game_generation));
    }

    /// Decode one already-framed realm reply and drive the logon state
    /// machine or chat classification accordingly (spec.md ss6). Returns the
    /// immediate reply frame to send (if any) and a classified chat action
    /// (only set for `SID_CHATEVENT` frames).
    pub fn handle_frame(
        &mut self,
        opcode: u8,
        payload: &[u8],
        handshaker: &dyn crate::map::Handshaker,
        cd_key: &str,
        exe_info: &str,
        command_prefix: &str,
    ) -> (Option<Vec<u8>>, Option<ChatAction>) {
        let Some(op) = protocol::SidOpcode::from_u8(opcode) else {
            return (None, None);
        };
        match op {
            protocol::SidOpcode::AuthInfo => match protocol::decode_auth_info_reply(payload) {
                Ok(reply) => (Some(self.on_auth_info_reply(&reply, handshaker, cd_key, exe_info)), None),
                Err(_) => (None, None),
            },
            protocol::SidOpcode::AuthCheck => match protocol::decode_auth_check_reply(payload) {
                Ok(reply) => (self.on_auth_check_reply(&reply), None),
                Err(_) => (None, None),
            },
            protocol::SidOpcode::AuthAccountLogon => match protocol::decode_logon_reply(payload) {
                Ok(reply) => (self.on_logon_reply(&reply, handshaker), None),
                Err(_) => (None, None),
            },
            protocol::SidOpcode::AuthAccountLogonProof => match protocol::decode_logon_proof_reply(payload) {
                Ok(reply) => (self.on_logon_proof_reply(&reply), None),
                Err(_) => (None, None),
            },
            protocol::SidOpcode::ChatEvent => match protocol::decode_chat_event(payload) {
                Ok(event) => (None, Some(self.classify_chat_event(&event, command_prefix))),
                Err(_) => (None, None),
            },
            _ => (None, None),
        }
    }

    pub fn game_list_query_due(&self, now: Instant) -> bool {
        match self.last_game_list_query {
            None => true,
            Some(last) => now.duration_since(last) >= GAME_LIST_QUERY_INTERVAL,
        }
    }

    pub fn mark_game_list_queried(&mut self, now: Instant) {
        self.last_game_list_query = Some(now);
    }

    /// Route a parsed chat event; returns a command string to dispatch when
    /// the whisper starts with the configured command prefix, or marks a
    /// spoofcheck request (spec.md ss4.2).
    pub fn classify_chat_event(&self, event: &ChatEvent, command_prefix: &str) -> ChatAction {
        match event {
            ChatEvent::Whisper { username, text } => {
                if protocol::is_spoofcheck_command(text) {
                    ChatAction::Spoofcheck { username: username.clone() }
                } else if let Some(rest) = text.strip_prefix(command_prefix) {
                    ChatAction::Command { username: username.clone(), command: rest.to_string() }
                } else {
                    ChatAction::None
                }
            }
            ChatEvent::Talk { username, text } => {
                if let Some(rest) = text.strip_prefix(command_prefix) {
                    ChatAction::Command { username: username.clone(), command: rest.to_string() }
                } else {
                    ChatAction::None
                }
            }
            // A `SID_CHATEVENT EID_ERROR` while in chat means the realm
            // rejected our last request -- the only request that can fail
            // silently like this is a `SID_STARTADVEX3` refresh (spec.md
            // ss7), so surface it as a refresh failure.
            ChatEvent::Error { text } if self.phase == RealmPhase::InChat => {
                ChatAction::RefreshFailed { realm_host_name: self.host_name.clone(), text: text.clone() }
            }
            _ => ChatAction::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatAction {
    None,
    Spoofcheck { username: String },
    Command { username: String, command: String },
    RefreshFailed { realm_host_name: String, text: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_on_repeated_failure() {
        let mut s = RealmSession::new("realm".into(), "bot".into(), "pw".into(), false);
        assert_eq!(s.backoff, INITIAL_BACKOFF);
        s.on_connect_failed(Duration::from_secs(600));
        assert_eq!(s.backoff, INITIAL_BACKOFF * 2);
        s.on_connect_failed(Duration::from_secs(600));
        assert_eq!(s.backoff, INITIAL_BACKOFF * 4);
    }

    #[test]
    fn backoff_resets_on_logon_proof() {
        let mut s = RealmSession::new("realm".into(), "bot".into(), "pw".into(), false);
        s.on_connect_failed(Duration::from_secs(600));
        s.on_logon_proof_succeeded();
        assert_eq!(s.backoff, INITIAL_BACKOFF);
    }

    #[test]
    fn chat_blocking_waits_for_in_chat_phase() {
        let mut s = RealmSession::new("realm".into(), "bot".into(), "pw".into(), false);
        s.enqueue(Priority::ChatBlocking, b"hello".to_vec(), None);
        let now = Instant::now();
        assert!(s.next_send(now).is_none());
        s.phase = RealmPhase::InChat;
        assert!(s.next_send(now).is_some());
    }

    #[test]
    fn flood_delay_blocks_rapid_sends_for_non_immune_realm() {
        let mut s = RealmSession::new("realm".into(), "bot".into(), "pw".into(), false);
        s.phase = RealmPhase::InChat;
        s.enqueue(Priority::Default, vec![0u8; 10], None); // small packet
        s.enqueue(Priority::Default, vec![0u8; 10], None);
        let now = Instant::now();
        assert!(s.next_send(now).is_some());
        assert!(s.next_send(now).is_none()); // too soon, small-packet delay is 1.3s
        assert!(s.next_send(now + Duration::from_millis(1301)).is_some());
    }

    #[test]
    fn flood_immune_uses_150ms_delay_regardless_of_size() {
        let mut s = RealmSession::new("realm".into(), "bot".into(), "pw".into(), true);
        s.phase = RealmPhase::InChat;
        s.enqueue(Priority::Default, vec![0u8; 500], None); // large packet
        s.enqueue(Priority::Default, vec![0u8; 500], None);
        let now = Instant::now();
        assert!(s.next_send(now).is_some());
        assert!(s.next_send(now + Duration::from_millis(151)).is_some());
    }

    #[test]
    fn game_refresh_dropped_when_generation_stale() {
        let mut s = RealmSession::new("realm".into(), "bot".into(), "pw".into(), false);
        s.current_game_generation = Some(1);
        s.enqueue(Priority::GameRefresh, b"refresh-old".to_vec(), Some(0));
        s.enqueue(Priority::GameRefresh, b"refresh-new".to_vec(), Some(1));
        s.phase = RealmPhase::InChat;
        let next = s.next_send(Instant::now());
        assert_eq!(next, Some(b"refresh-new".to_vec()));
    }

    #[test]
    fn game_list_query_fires_every_ninety_seconds() {
        let mut s = RealmSession::new("realm".into(), "bot".into(), "pw".into(), false);
        let t0 = Instant::now();
        assert!(s.game_list_query_due(t0));
        s.mark_game_list_queried(t0);
        assert!(!s.game_list_query_due(t0 + Duration::from_secs(60)));
        assert!(s.game_list_query_due(t0 + Duration::from_secs(90)));
    }

    #[test]
    fn spoofcheck_whisper_is_classified() {
        let s = RealmSession::new("realm".into(), "bot".into(), "pw".into(), false);
        let event = ChatEvent::Whisper { username: "Bob".into(), text: "sc".into() };
        assert_eq!(s.classify_chat_event(&event, "!"), ChatAction::Spoofcheck { username: "Bob".into() });
    }

    #[test]
    fn command_prefixed_whisper_is_classified() {
        let s = RealmSession::new("realm".into(), "bot".into(), "pw".into(), false);
        let event = ChatEvent::Whisper { username: "Bob".into(), text: "!start".into() };
        assert_eq!(
            s.classify_chat_event(&event, "!"),
            ChatAction::Command { username: "Bob".into(), command: "start".into() }
        );
    }

    #[test]
    fn error_event_in_chat_is_classified_as_refresh_failure() {
        let mut s = RealmSession::new("useast.battle.net".into(), "bot".into(), "pw".into(), false);
        s.phase = RealmPhase::InChat;
        let event = ChatEvent::Error { text: "That game already exists.".into() };
        assert_eq!(
            s.classify_chat_event(&event, "!"),
            ChatAction::RefreshFailed {
                realm_host_name: "useast.battle.net".into(),
                text: "That game already exists.".into(),
            }
        );
    }

    #[test]
    fn error_event_before_chat_is_not_a_refresh_failure() {
        let s = RealmSession::new("realm".into(), "bot".into(), "pw".into(), false);
        let event = ChatEvent::Error { text: "early".into() };
        assert_eq!(s.classify_chat_event(&event, "!"), ChatAction::None);
    }

    struct StubHandshaker;
    impl crate::map::Handshaker for StubHandshaker {
        fn hash_logon_password(&self, _username: &str, _password: &str, _client_token: u32, _server_token: u32) -> Vec<u8> {
            vec![0xAB; 32]
        }
        fn check_revision(&self, _value_string: &str, _mpq_data: &[u8]) -> u32 {
            0x1234
        }
        fn create_key_hash(&self, _cd_key: &str, _client_token: u32, _server_token: u32) -> Vec<u8> {
            vec![0xCD; 20]
        }
    }

    #[test]
    fn logon_state_machine_advances_through_every_phase_on_success() {
        let mut s = RealmSession::new("realm".into(), "bot".into(), "pw".into(), false);
        let handshaker = StubHandshaker;

        assert!(!s.on_connected().is_empty());
        assert_eq!(s.phase, RealmPhase::AuthInfoSent);

        let info = protocol::AuthInfoReply {
            logon_type: 0,
            server_token: 0xAAAA_AAAA,
            udp_value: 0,
            mpq_filetime: 0,
            value_string_formula: String::new(),
            value_string: String::new(),
        };
        s.on_auth_info_reply(&info, &handshaker, "KEY", "war3.exe 1 0 0 1234 A");
        assert_eq!(s.phase, RealmPhase::AuthCheckSent);
        assert_eq!(s.server_token, Some(0xAAAA_AAAA));

        let check = protocol::AuthCheckReply { result: 0, info: String::new() };
        assert!(s.on_auth_check_reply(&check).is_some());
        assert_eq!(s.phase, RealmPhase::LogonSent);

        let logon = protocol::LogonReply { result: 0, salt: [1; 32], server_public_key: [2; 32] };
        assert!(s.on_logon_reply(&logon, &handshaker).is_some());
        assert_eq!(s.phase, RealmPhase::LogonProofSent);

        let proof = protocol::LogonProofReply { result: 0 };
        assert!(s.on_logon_proof_reply(&proof).is_some());
        assert_eq!(s.phase, RealmPhase::InChat);
    }

    #[test]
    fn failed_auth_check_drops_the_session() {
        let mut s = RealmSession::new("realm".into(), "bot".into(), "pw".into(), false);
        s.phase = RealmPhase::AuthCheckSent;
        let check = protocol::AuthCheckReply { result: 0x0102, info: "old version".into() };
        assert!(s.on_auth_check_reply(&check).is_none());
        assert_eq!(s.phase, RealmPhase::Disconnected);
    }

    #[test]
    fn handle_frame_dispatches_auth_info_reply_into_a_phase_transition() {
        let mut s = RealmSession::new("realm".into(), "bot".into(), "pw".into(), false);
        let handshaker = StubHandshaker;
        s.phase = RealmPhase::AuthInfoSent;

        let mut w = hostbot_common::buffer::WriteBuffer::new();
        w.write_u32_le(0);
        w.write_u32_le(0x7777_7777);
        w.write_u32_le(0);
        w.write_u32_le(0);
        w.write_u32_le(0);
        w.write_cstring("");
        w.write_cstring("");
        let payload = w.into_vec();

        let (reply, chat) = s.handle_frame(
            protocol::SidOpcode::AuthInfo as u8,
            &payload,
            &handshaker,
            "KEY",
            "war3.exe 1 0 0 1234 A",
            "!",
        );
        assert!(reply.is_some());
        assert!(chat.is_none());
        assert_eq!(s.phase, RealmPhase::AuthCheckSent);
        assert_eq!(s.server_token, Some(0x7777_7777));
    }

    #[test]
    fn advertisement_only_queues_once_in_chat() {
        let mut s = RealmSession::new("realm".into(), "bot".into(), "pw".into(), false);
        s.queue_game_advertisement(1, "game one", "local\\melee.w3x", 0, 0, 6112, 1, 12, 0);
        assert_eq!(s.queue_len(), 0);

        s.phase = RealmPhase::InChat;
        s.queue_game_advertisement(1, "game one", "local\\melee.w3x", 0, 0, 6112, 1, 12, 0);
        assert_eq!(s.queue_len(), 1);
    }
}
