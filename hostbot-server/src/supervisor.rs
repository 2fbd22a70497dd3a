// supervisor.rs -- top-level owner of realms/games/the current lobby and the
// tick loop (spec.md ss3 Game host-counter field, ss5 Concurrency Model).
// Converted from: myq2-original/server/sv_main.rs's `ServerTiming` (a
// decoupled frame-rate accumulator) and server.rs's `ServerStatic`
// singleton, generalized per spec.md ss9's explicit-owner rule: this struct
// is constructed once and threaded through explicitly rather than reached
// via a global.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::{Events, Poll, Token};

use crate::discovery;
use crate::game::wire::ReqJoin;
use crate::game::{Game, GamePhase};
use crate::net::{TcpConnection, TcpListenerSocket, UdpSocketWrapper};
use crate::pregate::{PendingConnection, PreGateOutcome};
use crate::realm::{ChatAction, RealmSession};
use crate::store::Store;

pub const TICK_TIMEOUT: Duration = Duration::from_millis(50);
pub const IDLE_SLEEP: Duration = Duration::from_millis(200);

/// Allocates 32-bit host-counters whose low 24 bits are unique across the
/// bot's lifetime (spec.md GLOSSARY, property P2); the high 8 bits encode
/// the originating realm tag (0 = LAN, 16..=255 = realm N-15).
#[derive(Debug, Default)]
pub struct HostCounterAllocator {
    next_low_bits: u32,
}

impl HostCounterAllocator {
    pub fn new() -> Self {
        HostCounterAllocator { next_low_bits: 1 }
    }

    pub fn allocate(&mut self, realm_tag: u8) -> u32 {
        let low = self.next_low_bits & 0x00FF_FFFF;
        self.next_low_bits = self.next_low_bits.wrapping_add(1);
        ((realm_tag as u32) << 24) | low
    }
}

/// One-shot actions driven by the CLI or config (spec.md ss3 Supervisor).
#[derive(Debug, Clone)]
pub enum PendingAction {
    HostMap { identifier: String, name: String, owner: String },
    Mirror { source: String },
    ExecuteCommand { command: String, as_user: String },
}

pub struct Supervisor {
    pub realms: Vec<RealmSession>,
    pub games: Vec<Game>,
    pub current_lobby_index: Option<usize>,
    pub store: Store,
    pub host_counters: HostCounterAllocator,
    pub pending_actions: Vec<PendingAction>,
    pub exit_requested: std::sync::Arc<std::sync::atomic::AtomicBool>,
    poll: Poll,
    next_token: usize,

    /// Accepts new player connections on the hosted game's port.
    pub game_listener: Option<TcpListenerSocket>,
    /// The LAN discovery bus (spec.md ss4.3); absent when `--no-lan` is set.
    pub discovery: Option<UdpSocketWrapper>,
    /// Freshly accepted connections not yet classified as join/reconnect/
    /// tunnel requests (spec.md ss4.4).
    pub pregate: Vec<(TcpConnection, PendingConnection)>,
    last_advertisement: Option<Instant>,
}

impl Supervisor {
    pub fn new(store: Store) -> std::io::Result<Self> {
        Ok(Supervisor {
            realms: Vec::new(),
            games: Vec::new(),
            current_lobby_index: None,
            store,
            host_counters: HostCounterAllocator::new(),
            pending_actions: Vec::new(),
            exit_requested: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
            poll: Poll::new()?,
            next_token: 0,
            game_listener: None,
            discovery: None,
            pregate: Vec::new(),
            last_advertisement: None,
        })
    }

    /// Binds the TCP listener new players connect to (spec.md ss2).
    pub fn bind_game_listener(&mut self, addr: SocketAddr) -> std::io::Result<()> {
        let token = self.next_token();
        self.game_listener = Some(TcpListenerSocket::bind(addr, &self.poll, token)?);
        Ok(())
    }

    /// Binds the UDP discovery bus new players `SEARCHGAME` over (spec.md
    /// ss4.3); a no-op when `--no-lan` disables it.
    pub fn bind_discovery(&mut self, addr: SocketAddr) -> std::io::Result<()> {
        let token = self.next_token();
        self.discovery = Some(UdpSocketWrapper::bind(addr, &self.poll, token)?);
        Ok(())
    }

    /// Starts a non-blocking outbound connection to `realms[idx]` and queues
    /// the session-preface byte plus the first `SID_AUTH_INFO` frame
    /// (spec.md ss6).
    pub fn connect_realm(&mut self, idx: usize, addr: SocketAddr, now: Instant) -> std::io::Result<()> {
        let token = self.next_token();
        let mut conn = TcpConnection::connect(addr, token, &self.poll, now)?;
        let auth_info = self.realms[idx].on_connected();
        conn.queue_write(&[crate::realm::protocol::SESSION_PREFACE]);
        conn.queue_write(&auth_info);
        self.realms[idx].addr = Some(addr);
        self.realms[idx].connection = Some(conn);
        Ok(())
    }

    /// Any realm that's disconnected, past its backoff, and has a resolved
    /// address gets a fresh connection attempt.
    pub fn service_realm_reconnects(&mut self, now: Instant) {
        for idx in 0..self.realms.len() {
            let realm = &self.realms[idx];
            if realm.connection.is_some() {
                continue;
            }
            let due = match realm.schedule_reconnect_at() {
                Some(at) => now >= at,
                None => true,
            };
            let Some(addr) = realm.addr else { continue };
            if !due {
                continue;
            }
            if let Err(e) = self.connect_realm(idx, addr, now) {
                log::warn!("realm reconnect to {addr} failed: {e}");
                self.realms[idx].on_connect_failed(Duration::from_secs(600));
                self.realms[idx].on_disconnect(now);
            }
        }
    }

    /// Drains every readable realm socket, dispatches complete frames
    /// through [`RealmSession::handle_frame`], and flushes both the
    /// handshake replies and the flood-controlled send queue.
    #[allow(clippy::too_many_arguments)]
    pub fn service_realms(
        &mut self,
        now: Instant,
        handshaker: &dyn crate::map::Handshaker,
        cd_key: &str,
        exe_info: &str,
        command_prefix: &str,
    ) -> Vec<(usize, ChatAction)> {
        let mut actions = Vec::new();
        for idx in 0..self.realms.len() {
            let Some(conn) = self.realms[idx].connection.as_mut() else { continue };
            let alive = conn.fill_read_buffer().unwrap_or(false);
            let frames = crate::realm::protocol::drain_frames(&mut conn.read_buf);
            for (opcode, payload) in frames {
                let (reply, chat) =
                    self.realms[idx].handle_frame(opcode, &payload, handshaker, cd_key, exe_info, command_prefix);
                if let Some(bytes) = reply {
                    if let Some(conn) = self.realms[idx].connection.as_mut() {
                        conn.queue_write(&bytes);
                    }
                }
                if let Some(action) = chat {
                    actions.push((idx, action));
                }
            }
            if let Some(bytes) = self.realms[idx].next_send(now) {
                if let Some(conn) = self.realms[idx].connection.as_mut() {
                    conn.queue_write(&bytes);
                }
            }
            if let Some(conn) = self.realms[idx].connection.as_mut() {
                let _ = conn.flush_write();
            }
            if !alive {
                if let Some(mut conn) = self.realms[idx].connection.take() {
                    conn.deregister(&self.poll);
                }
                self.realms[idx].on_disconnect(now);
            }
        }
        actions
    }

    /// Accepts every connection ready on the game listener and hands it to
    /// the pre-gate for classification (spec.md ss4.4).
    pub fn accept_new_players(&mut self, port: u16, now: Instant) {
        let accepted = match self.game_listener.as_mut() {
            Some(listener) => listener.accept_all(),
            None => Vec::new(),
        };
        for (stream, _addr) in accepted {
            let token = self.next_token();
            match TcpConnection::from_accepted(stream, token, &self.poll, now) {
                Ok(conn) => self.pregate.push((conn, PendingConnection::new(port, now))),
                Err(e) => log::warn!("failed to register accepted connection: {e}"),
            }
        }
    }

    /// Drains readable pre-gate connections, classifies them, and drops
    /// expired/errored ones. Connections that resolve to a join request are
    /// handed back to the caller, which owns `Game::try_accept` and the
    /// current lobby.
    pub fn service_pregate(&mut self, now: Instant) -> Vec<(TcpConnection, ReqJoin)> {
        let mut ready_joins = Vec::new();
        let mut i = 0;
        while i < self.pregate.len() {
            let (conn, pending) = &mut self.pregate[i];
            let alive = conn.fill_read_buffer().unwrap_or(false);
            if !alive || pending.expired(now) {
                let (mut conn, _) = self.pregate.remove(i);
                conn.deregister(&self.poll);
                continue;
            }
            if !conn.read_buf.is_empty() {
                let bytes = std::mem::take(&mut conn.read_buf);
                pending.feed(&bytes);
            }
            let outcome = pending.classify();
            match outcome {
                PreGateOutcome::Incomplete => i += 1,
                PreGateOutcome::Join(join) => {
                    let (conn, _) = self.pregate.remove(i);
                    ready_joins.push((conn, join));
                }
                PreGateOutcome::Reconnect(_) | PreGateOutcome::UdpTunnelRequested | PreGateOutcome::Vlan => {
                    // Not driven further yet; leave buffered rather than
                    // guess at a reply.
                    i += 1;
                }
                PreGateOutcome::ProtocolError => {
                    let (mut conn, _) = self.pregate.remove(i);
                    conn.deregister(&self.poll);
                }
            }
        }
        ready_joins
    }

    /// Resolves every pre-gate join request against the current lobby,
    /// promoting accepted connections into real [`Player`]s and rejecting
    /// the rest (spec.md ss4.4/ss4.5). The promoted connection keeps its
    /// registration and becomes the new player's socket.
    pub fn accept_pregate_joins(&mut self, ready_joins: Vec<(TcpConnection, ReqJoin)>) {
        for (mut conn, join) in ready_joins {
            let Some(lobby_idx) = self.current_lobby_index else {
                conn.queue_write(&crate::game::wire::encode_rejectjoin(crate::game::wire::RejectJoinReason::Started));
                let _ = conn.flush_write();
                conn.deregister(&self.poll);
                continue;
            };
            let lobby = &mut self.games[lobby_idx];
            if join.host_counter != lobby.host_counter {
                conn.queue_write(&crate::game::wire::encode_rejectjoin(crate::game::wire::RejectJoinReason::Full));
                let _ = conn.flush_write();
                conn.deregister(&self.poll);
                continue;
            }
            let max_uid = lobby.slots.slots.len() as u8;
            match lobby.try_accept(&join, false, max_uid) {
                Ok((uid, events)) => {
                    if let Some(player) = lobby.players.get_mut(&uid) {
                        player.connection = Some(conn);
                    }
                    self.dispatch_game_events(lobby_idx, events);
                }
                Err(reason) => {
                    conn.queue_write(&crate::game::wire::encode_rejectjoin(reason));
                    let _ = conn.flush_write();
                    conn.deregister(&self.poll);
                }
            }
        }
    }

    /// Routes [`GameEvent`]s to their destination players' send queues and
    /// flushes each touched connection.
    pub fn dispatch_game_events(&mut self, game_idx: usize, events: Vec<crate::game::GameEvent>) {
        use crate::game::GameEvent;
        let Some(game) = self.games.get_mut(game_idx) else { return };
        for event in events {
            match event {
                GameEvent::SendTo { uid, frame } => {
                    if let Some(player) = game.players.get_mut(&uid) {
                        if let Some(conn) = player.connection.as_mut() {
                            conn.queue_write(&frame);
                        }
                    }
                }
                GameEvent::BroadcastExcept { except_uid, frame } => {
                    for (uid, player) in game.players.iter_mut() {
                        if Some(*uid) == except_uid {
                            continue;
                        }
                        if let Some(conn) = player.connection.as_mut() {
                            conn.queue_write(&frame);
                        }
                    }
                }
                GameEvent::DestroyPlayer { uid, .. } => {
                    if let Some(player) = game.players.get_mut(&uid) {
                        if let Some(conn) = player.connection.as_mut() {
                            let _ = conn.flush_write();
                        }
                    }
                }
                GameEvent::GameOver | GameEvent::DesyncDetected(_) => {}
            }
        }
        for player in game.players.values_mut() {
            if let Some(conn) = player.connection.as_mut() {
                let _ = conn.flush_write();
            }
        }
    }

    /// Refreshes the current lobby's `SID_STARTADVEX3` advertisement on
    /// every realm in chat, no more often than the lobby's configured
    /// refresh interval (spec.md ss4.6).
    pub fn service_lobby_advertisement(&mut self, now: Instant) {
        let Some(lobby_idx) = self.current_lobby_index else { return };
        let due = match self.last_advertisement {
            Some(t) => now.duration_since(t) >= Duration::from_millis(self.games[lobby_idx].refresh_interval_ms as u64),
            None => true,
        };
        if !due {
            return;
        }
        let lobby = &self.games[lobby_idx];
        if !lobby.is_joinable() {
            return;
        }
        self.last_advertisement = Some(now);
        let host_counter = lobby.host_counter;
        let game_name = lobby.name.clone();
        let map_path = lobby.map.client_path.clone();
        let port = lobby.port;
        let elapsed = lobby.created_at.elapsed().as_secs() as u32;
        let player_count = lobby.players.len() as u8;
        let max_slots = lobby.slots.slots.len() as u8;
        for realm in self.realms.iter_mut() {
            realm.queue_game_advertisement(
                host_counter,
                &game_name,
                &map_path,
                0,
                elapsed,
                port,
                player_count,
                max_slots,
                host_counter,
            );
        }
    }

    /// Drains the discovery bus and replies `GAMEINFO` to any `SEARCHGAME`
    /// that matches the hosted product/version (spec.md ss4.3).
    pub fn service_discovery(&mut self, configured_version: u32) {
        let Some(socket) = self.discovery.as_mut() else { return };
        let datagrams = socket.recv_all();
        let Some(lobby) = self.current_lobby() else { return };
        if !lobby.is_joinable() {
            return;
        }
        let slots_total = lobby.slots.slots.len() as u32;
        let slots_open = slots_total - lobby.slots.slots.iter().filter(|s| s.is_occupied()).count() as u32;
        let elapsed = lobby.created_at.elapsed().as_secs() as u32;
        for (payload, src) in datagrams {
            if let discovery::DiscoveryEvent::SearchGame(search) = discovery::classify(&payload) {
                if discovery::search_game_matches_bot(&search, configured_version) {
                    let frame = discovery::encode_gameinfo(
                        search.product_id,
                        search.version,
                        lobby.host_counter,
                        0,
                        &lobby.name,
                        lobby.map.client_path.as_bytes(),
                        slots_total,
                        slots_open,
                        elapsed,
                        lobby.port,
                    );
                    if let Some(socket) = self.discovery.as_ref() {
                        let _ = socket.send_to(&frame, src);
                    }
                }
            }
        }
    }

    /// Applies a classified realm chat action to the current lobby, if any
    /// (spec.md ss7: a refresh failure surfaces in lobby chat and, on an
    /// empty lobby, closes it outright).
    pub fn apply_chat_action(&mut self, action: ChatAction) {
        if let ChatAction::RefreshFailed { realm_host_name, .. } = action {
            let Some(lobby_idx) = self.current_lobby_index else { return };
            let events = self.games[lobby_idx].on_refresh_failed(&realm_host_name);
            self.dispatch_game_events(lobby_idx, events);
        }
    }

    pub fn register_exit_signal(&self) -> std::sync::Arc<std::sync::atomic::AtomicBool> {
        self.exit_requested.clone()
    }

    pub fn next_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    pub fn poll_mut(&mut self) -> &mut Poll {
        &mut self.poll
    }

    /// At most one lobby exists at a time (spec.md ss3 Game invariant).
    pub fn current_lobby(&self) -> Option<&Game> {
        self.current_lobby_index.and_then(|i| self.games.get(i))
    }

    pub fn current_lobby_mut(&mut self) -> Option<&mut Game> {
        self.current_lobby_index.and_then(move |i| self.games.get_mut(i))
    }

    pub fn host_game(&mut self, game: Game) -> usize {
        self.games.push(game);
        let idx = self.games.len() - 1;
        if self.current_lobby_index.is_none() {
            self.current_lobby_index = Some(idx);
        }
        idx
    }

    /// Retire games that have fully wound down (Over phase, no clients left
    /// connected) and clear the current-lobby pointer if it pointed at one.
    pub fn reap_finished_games(&mut self) {
        if let Some(idx) = self.current_lobby_index {
            if matches!(self.games.get(idx).map(|g| g.phase), Some(GamePhase::Over)) {
                if self.games[idx].players.is_empty() {
                    self.current_lobby_index = None;
                }
            }
        }
    }

    /// One event-loop pass: compute the next wait timeout (min of 50 ms and
    /// the nearest scheduled event), wait for socket readiness, then let the
    /// caller drain ready sockets and advance subsystems. This method only
    /// owns the suspension point per spec.md ss5; subsystem advancement is
    /// the caller's responsibility since it needs mutable access to sockets
    /// this type doesn't own.
    pub fn wait_for_ready(&mut self, next_scheduled_event: Option<Instant>, now: Instant) -> std::io::Result<Events> {
        let mut timeout = TICK_TIMEOUT;
        if let Some(next) = next_scheduled_event {
            if next > now {
                timeout = timeout.min(next - now);
            } else {
                timeout = Duration::ZERO;
            }
        }
        if self.realms.is_empty() && self.games.is_empty() {
            timeout = IDLE_SLEEP;
        }

        let mut events = Events::with_capacity(256);
        self.poll.poll(&mut events, Some(timeout))?;
        Ok(events)
    }

    pub fn should_exit(&self) -> bool {
        self.exit_requested.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// Registers a real `SIGINT` handler that flips an atomic flag consulted on
/// the next tick (spec.md ss5: "No operation is cancellable mid-flight by
/// external signal; SIGINT sets an atomic exit flag"). A second Ctrl+C while
/// the flag is already set is a no-op; the event loop is expected to notice
/// and exit within one tick.
pub fn install_sigint_handler(flag: std::sync::Arc<std::sync::atomic::AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        flag.store(true, std::sync::atomic::Ordering::Relaxed);
    }) {
        log::error!("failed to install SIGINT handler: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_counter_low_bits_increment_and_stay_unique() {
        let mut alloc = HostCounterAllocator::new();
        let a = alloc.allocate(0);
        let b = alloc.allocate(0);
        assert_ne!(a & 0x00FF_FFFF, b & 0x00FF_FFFF);
    }

    #[test]
    fn host_counter_high_byte_encodes_realm_tag() {
        let mut alloc = HostCounterAllocator::new();
        let lan = alloc.allocate(0);
        let realm = alloc.allocate(17);
        assert_eq!(lan >> 24, 0);
        assert_eq!(realm >> 24, 17);
    }

    #[test]
    fn supervisor_starts_with_no_current_lobby() {
        let store = Store::open_in_memory().unwrap();
        let sup = Supervisor::new(store).unwrap();
        assert!(sup.current_lobby().is_none());
    }
}
