// lobby.rs -- the Game entity and its lobby/in-game state machine
// (spec.md ss3 Game, ss4.5, ss4.6, ss4.7).
// Converted from: myq2-original/server/server.rs's god-object `Server`
// struct (owns clients, state enum, timing), generalized per spec.md ss9's
// explicit-owner rule: a Game owns its Players outright (indexed by UID,
// no back-reference), and exposes the phase-driven tick methods the
// supervisor calls once per event-loop pass.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Instant;

use super::action::{ActionScheduler, DesyncEvent, DesyncTracker};
use super::download::{DownloadState, UploadBudget};
use super::gproxy::GProxyGrace;
use super::lag::{LagTracker, LagTransition};
use super::player::{GProxyLevel, Player, PlayerRole};
use super::slot::{RaceFlags, Slot, SlotStatus, SlotTemplate};
use super::wire::{ActionChunk, RejectJoinReason, ReqJoin};
use crate::map::MapMetadata;

pub const VIRTUAL_HOST_UID: u8 = 1;
pub const DEFAULT_PING_INTERVAL_MS: u32 = 5_000;
pub const DEFAULT_COUNTDOWN_DELAY_MS: u32 = 5_000;
pub const DEFAULT_LOAD_TIMEOUT_MS: u32 = 120_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameVisibility {
    Public,
    Private,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    Lobby,
    Countdown,
    Loading,
    Playing,
    Over,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyMode {
    Fast,
    ExpectRace,
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesyncPolicy {
    None,
    Notify,
    DropBehind,
}

/// Outbound side-effects the lobby wants the supervisor/connection layer to
/// perform. Kept as a plain enum so `Game` methods stay pure and testable
/// without a live socket.
#[derive(Debug, Clone)]
pub enum GameEvent {
    SendTo { uid: u8, frame: Vec<u8> },
    BroadcastExcept { except_uid: Option<u8>, frame: Vec<u8> },
    DestroyPlayer { uid: u8, reason: String },
    GameOver,
    DesyncDetected(DesyncEvent),
}

pub struct Game {
    pub host_counter: u32,
    pub visibility: GameVisibility,
    pub phase: GamePhase,
    pub name: String,
    pub owner_name: String,
    pub owner_realm: Option<u8>,
    pub map: MapMetadata,
    pub slots: SlotTemplate,
    pub port: u16,
    pub created_at: Instant,
    pub countdown_started_at: Option<Instant>,
    pub load_started_at: Option<Instant>,
    pub players: BTreeMap<u8, Player>,
    pub gproxy_graces: BTreeMap<u8, GProxyGrace>,
    pub downloads: BTreeMap<u8, DownloadState>,
    pub upload_budget: UploadBudget,
    pub action_scheduler: ActionScheduler,
    pub lag_tracker: LagTracker,
    pub desync_tracker: DesyncTracker,
    pub desync_policy: DesyncPolicy,
    pub ready_mode: ReadyMode,
    pub countdown_interruptable: bool,
    pub refresh_interval_ms: u32,
    /// `--random-races`: every slot is assigned a race regardless of the
    /// map's own race-selection flags (spec.md ss4.5).
    pub random_races_enabled: bool,
    /// Set when the realm's game-refresh fails while the lobby still has
    /// players in it (spec.md ss7); cleared on the next successful refresh.
    pub refresh_error: bool,
    next_uid: u8,
    rng_seed: u32,
}

impl Game {
    pub fn new(
        host_counter: u32,
        name: String,
        owner_name: String,
        owner_realm: Option<u8>,
        map: MapMetadata,
        port: u16,
        lag_threshold: u32,
        max_upload_kb_per_sec: u32,
        random_races_enabled: bool,
    ) -> Self {
        let slots = map.slot_template.clone();
        Game {
            host_counter,
            visibility: GameVisibility::Public,
            phase: GamePhase::Lobby,
            name,
            owner_name,
            owner_realm,
            map,
            slots,
            port,
            created_at: Instant::now(),
            countdown_started_at: None,
            load_started_at: None,
            players: BTreeMap::new(),
            gproxy_graces: BTreeMap::new(),
            downloads: BTreeMap::new(),
            upload_budget: UploadBudget::new(max_upload_kb_per_sec, 50),
            action_scheduler: ActionScheduler::new(super::action::DEFAULT_LATENCY_MS),
            lag_tracker: LagTracker::new(lag_threshold),
            desync_tracker: DesyncTracker::new(),
            desync_policy: DesyncPolicy::DropBehind,
            ready_mode: ReadyMode::Fast,
            countdown_interruptable: true,
            refresh_interval_ms: 5_000,
            random_races_enabled,
            refresh_error: false,
            next_uid: VIRTUAL_HOST_UID + 1,
            rng_seed: rand::random(),
        }
    }

    pub fn is_joinable(&self) -> bool {
        self.phase == GamePhase::Lobby && self.visibility != GameVisibility::Private
    }

    fn alloc_uid(&mut self, max_uid: u8) -> Option<u8> {
        let start = self.next_uid;
        loop {
            let candidate = self.next_uid;
            if !self.players.contains_key(&candidate) && candidate != VIRTUAL_HOST_UID && candidate != 0 {
                self.next_uid = if candidate >= max_uid { 1 } else { candidate + 1 };
                return Some(candidate);
            }
            self.next_uid = if candidate >= max_uid { 1 } else { candidate + 1 };
            if self.next_uid == start {
                return None;
            }
        }
    }

    fn censor_name(raw: &str) -> String {
        raw.chars().filter(|c| !c.is_control()).collect()
    }

    /// `tryAccept` (spec.md ss4.5). Validates name, slot availability, and
    /// host-counter match (the host-counter is checked by the pre-gate
    /// before this is even called); assigns a UID and a slot, and returns
    /// the events the caller must emit.
    pub fn try_accept(&mut self, join: &ReqJoin, as_observer: bool, max_uid: u8) -> Result<(u8, Vec<GameEvent>), RejectJoinReason> {
        if self.phase != GamePhase::Lobby {
            return Err(RejectJoinReason::Started);
        }

        let name = Self::censor_name(&join.name);
        if name.is_empty() || name.len() > 15 {
            return Err(RejectJoinReason::Full); // name-length violations treated as a full-equivalent rejection
        }
        if self.players.values().any(|p| p.name == name) {
            return Err(RejectJoinReason::Full);
        }

        let slot_idx = if as_observer {
            self.slots.first_open_observer_slot()
        } else {
            self.slots.first_open_player_slot()
        }
        .ok_or(RejectJoinReason::Full)?;

        let uid = self.alloc_uid(max_uid).ok_or(RejectJoinReason::Full)?;

        self.slots.slots[slot_idx].status = SlotStatus::Occupied;
        self.slots.slots[slot_idx].uid = uid;

        let mut player = Player::new(
            uid,
            name,
            join.internal_ip,
            SocketAddr::from(([0, 0, 0, 0], 0)),
        );
        if as_observer {
            player.role = PlayerRole::Observer;
        }
        self.players.insert(uid, player);

        let slotinfojoin = super::wire::encode_slotinfojoin(
            uid,
            self.port,
            [0, 0, 0, 0],
            &self.slots.slots,
            self.rng_seed,
            0,
            self.slots.slots.len() as u8,
        );
        let slotinfo = self.encode_slotinfo();

        Ok((
            uid,
            vec![
                GameEvent::SendTo { uid, frame: slotinfojoin },
                GameEvent::BroadcastExcept { except_uid: Some(uid), frame: slotinfo },
            ],
        ))
    }

    fn encode_slotinfo(&self) -> Vec<u8> {
        let mut w = hostbot_common::buffer::WriteBuffer::new();
        for slot in &self.slots.slots {
            let mut buf = Vec::with_capacity(9);
            slot.encode(&mut buf);
            w.write_bytes(&buf);
        }
        w.write_u32_le(self.rng_seed);
        w.finish_framed(hostbot_common::codec::FAMILY_GAME, super::wire::W3gsOpcode::SlotInfo as u8)
    }

    /// Slot-change validation against the map's layout restrictions
    /// (spec.md ss4.5: "teams locked in custom-forces maps, races locked in
    /// fixed-player-settings maps").
    pub fn apply_slot_change(
        &mut self,
        uid: u8,
        new_team: Option<u8>,
        new_color: Option<u8>,
        new_race: Option<RaceFlags>,
    ) -> Result<(), &'static str> {
        if self.phase != GamePhase::Lobby {
            return Err("lobby not accepting slot changes");
        }
        if new_team.is_some() && self.map.custom_forces() {
            return Err("teams are locked by this map's custom forces");
        }
        if new_race.is_some() && self.map.fixed_player_settings() {
            return Err("races are locked by this map's fixed player settings");
        }
        let slot_idx = self
            .slots
            .slots
            .iter()
            .position(|s| s.uid == uid && s.is_occupied())
            .ok_or("no such occupied slot")?;

        if let Some(team) = new_team {
            self.slots.slots[slot_idx].team = team;
        }
        if let Some(color) = new_color {
            if self.slots.slots.iter().any(|s| s.uid != uid && s.is_occupied() && s.color == color) {
                return Err("color already in use");
            }
            self.slots.slots[slot_idx].color = color;
        }
        if let Some(race) = new_race {
            self.slots.slots[slot_idx].race = race;
            if let Some(player) = self.players.get_mut(&uid) {
                player.race_selected = true;
            }
        }
        self.slots.check_invariants().map_err(|_| "slot change violates invariants")?;
        Ok(())
    }

    fn ready_condition_met(&self, uid: u8) -> bool {
        let player = match self.players.get(&uid) {
            Some(p) => p,
            None => return false,
        };
        if player.is_observer() {
            return true;
        }
        match self.ready_mode {
            ReadyMode::Fast => player.download_finished,
            ReadyMode::ExpectRace => {
                player.download_finished
                    && (self.map.fixed_player_settings() || player.race_selected || self.random_races_enabled)
            }
            ReadyMode::Explicit => player.ready,
        }
    }

    pub fn all_ready(&self) -> bool {
        self.slots
            .slots
            .iter()
            .filter(|s| s.is_occupied() && !s.is_observer())
            .all(|s| self.ready_condition_met(s.uid))
    }

    /// Owner-issued `start`, or auto-start quorum plus every slot ready.
    pub fn try_start_countdown(&mut self, requested_by_owner: bool) -> bool {
        if self.phase != GamePhase::Lobby {
            return false;
        }
        if !requested_by_owner && !self.all_ready() {
            return false;
        }
        self.phase = GamePhase::Countdown;
        self.countdown_started_at = Some(Instant::now());
        true
    }

    /// Spec.md scenario 3: a leave immediately before `COUNTDOWN_END` either
    /// continues or aborts countdown depending on `countdown_interruptable`.
    pub fn handle_countdown_leave(&mut self, uid: u8) -> Vec<GameEvent> {
        self.remove_player(uid, "LOBBY");
        if self.countdown_interruptable && self.phase == GamePhase::Countdown {
            self.phase = GamePhase::Lobby;
            self.countdown_started_at = None;
            return vec![GameEvent::BroadcastExcept {
                except_uid: None,
                frame: self.encode_player_leave(uid, "LOBBY"),
            }];
        }
        vec![GameEvent::BroadcastExcept {
            except_uid: None,
            frame: self.encode_player_leave(uid, "LOBBY"),
        }]
    }

    fn encode_player_leave(&self, uid: u8, reason: &str) -> Vec<u8> {
        let mut w = hostbot_common::buffer::WriteBuffer::new();
        w.write_u8(uid);
        w.write_cstring(reason);
        w.finish_framed(hostbot_common::codec::FAMILY_GAME, super::wire::W3gsOpcode::PlayerLeaveOthers as u8)
    }

    pub fn remove_player(&mut self, uid: u8, reason: &str) {
        if let Some(slot) = self.slots.slots.iter_mut().find(|s| s.uid == uid) {
            slot.status = SlotStatus::Open;
            slot.uid = 0;
        }
        if let Some(mut player) = self.players.remove(&uid) {
            player.left = true;
            player.left_reason = Some(reason.to_string());
        }
    }

    pub fn advance_to_loading(&mut self) {
        self.phase = GamePhase::Loading;
        self.load_started_at = Some(Instant::now());
    }

    pub fn mark_loaded(&mut self, uid: u8) -> Vec<GameEvent> {
        if let Some(p) = self.players.get_mut(&uid) {
            p.load_complete_ticks = Some(0);
        }
        let mut w = hostbot_common::buffer::WriteBuffer::new();
        w.write_u8(uid);
        let frame = w.finish_framed(hostbot_common::codec::FAMILY_GAME, super::wire::W3gsOpcode::GameLoadedOthers as u8);
        vec![GameEvent::BroadcastExcept { except_uid: Some(uid), frame }]
    }

    pub fn all_loaded(&self) -> bool {
        self.players.values().all(|p| p.load_complete_ticks.is_some())
    }

    pub fn advance_to_playing(&mut self) {
        self.phase = GamePhase::Playing;
    }

    /// One event-loop tick worth of action-frame scheduling (spec.md ss4.5,
    /// property P3). Returns fan-out events; empty while nobody is lagging
    /// and no frame is yet due.
    pub fn tick_playing(&mut self, elapsed_ms: u32, max_packet_payload: usize) -> Vec<GameEvent> {
        if self.lag_tracker.any_lagging() {
            return Vec::new();
        }
        let chunks: Vec<ActionChunk> = match self.action_scheduler.tick(elapsed_ms) {
            Some(c) => c,
            None => return Vec::new(),
        };
        let frames = super::wire::encode_incoming_action(
            self.action_scheduler.latency_ms as u16,
            &chunks,
            max_packet_payload,
        );
        frames
            .into_iter()
            .map(|frame| GameEvent::BroadcastExcept { except_uid: None, frame })
            .collect()
    }

    pub fn report_checksum(&mut self, uid: u8, sync_counter: u32, checksum: u32) {
        self.desync_tracker.report(sync_counter, uid, checksum);
    }

    pub fn evaluate_desync(&mut self, sync_counter: u32) -> Option<GameEvent> {
        let player_syncs: std::collections::HashMap<u8, u32> =
            self.players.iter().map(|(&uid, p)| (uid, p.last_keepalive_sync)).collect();
        self.desync_tracker
            .evaluate(sync_counter, &player_syncs)
            .map(GameEvent::DesyncDetected)
    }

    pub fn update_lag(&mut self) -> LagTransition {
        let syncs: Vec<(u8, u32)> = self.players.iter().map(|(&uid, p)| (uid, p.last_keepalive_sync)).collect();
        self.lag_tracker.update(self.action_scheduler.sync_counter, &syncs)
    }

    /// Game-over detection (spec.md ss4.5): fewer than 2 non-observer slots
    /// remain occupied, or every player of one team has left.
    pub fn check_game_over(&self) -> bool {
        if self.phase != GamePhase::Playing {
            return false;
        }
        let occupied_non_observer: Vec<&Slot> = self.slots.slots.iter().filter(|s| s.is_occupied() && !s.is_observer()).collect();
        if occupied_non_observer.len() < 2 {
            return true;
        }
        let teams_remaining: std::collections::HashSet<u8> = occupied_non_observer.iter().map(|s| s.team).collect();
        teams_remaining.len() < 2
    }

    pub fn mark_over(&mut self) {
        self.phase = GamePhase::Over;
    }

    /// Spec.md ss7: a realm whose `SID_STARTADVEX3` refresh fails surfaces a
    /// one-line lobby chat message. An empty lobby is closed outright;
    /// otherwise the lobby stays open and is flagged `refresh_error` so the
    /// owner can see the realm advertisement is broken.
    pub fn on_refresh_failed(&mut self, realm_host_name: &str) -> Vec<GameEvent> {
        if self.players.is_empty() {
            self.mark_over();
            return Vec::new();
        }
        self.refresh_error = true;
        let text = format!("Unable to create game on {realm_host_name}. Try another name");
        let recipients: Vec<u8> = self.players.keys().copied().collect();
        let frame = super::wire::encode_chat_from_host(&recipients, VIRTUAL_HOST_UID, &text);
        vec![GameEvent::BroadcastExcept { except_uid: None, frame }]
    }

    pub fn clear_refresh_error(&mut self) {
        self.refresh_error = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::slot::{GameFlags, RaceFlags};

    fn melee_map() -> MapMetadata {
        MapMetadata {
            client_path: "Maps\\melee.w3x".into(),
            size_bytes: 1000,
            crc32: 1,
            weak_hash: [0; 4],
            sha1: [0; 20],
            width: 96,
            height: 96,
            slot_template: SlotTemplate::new(
                vec![
                    Slot::open(0, 0, RaceFlags::RANDOM | RaceFlags::SELECTABLE),
                    Slot::open(1, 1, RaceFlags::RANDOM | RaceFlags::SELECTABLE),
                ],
                2,
            ),
            flags: GameFlags::empty(),
            min_game_version: 1,
        }
    }

    fn sample_join(name: &str) -> ReqJoin {
        ReqJoin {
            host_counter: 1,
            entry_key: 0,
            name: name.to_string(),
            internal_ip: [10, 0, 0, 1],
        }
    }

    #[test]
    fn first_join_gets_uid_two_virtual_host_reserves_one() {
        let mut g = Game::new(1, "game one".into(), "Alice".into(), None, melee_map(), 6112, 10, 100, false);
        let (uid, _events) = g.try_accept(&sample_join("Bob"), false, 12).unwrap();
        assert_eq!(uid, 2);
        assert_ne!(uid, VIRTUAL_HOST_UID);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut g = Game::new(1, "game one".into(), "Alice".into(), None, melee_map(), 6112, 10, 100, false);
        g.try_accept(&sample_join("Bob"), false, 12).unwrap();
        assert_eq!(g.try_accept(&sample_join("Bob"), false, 12), Err(RejectJoinReason::Full));
    }

    #[test]
    fn lobby_full_is_rejected_once_player_slots_exhausted() {
        let mut g = Game::new(1, "g".into(), "Alice".into(), None, melee_map(), 6112, 10, 100, false);
        g.try_accept(&sample_join("Bob"), false, 12).unwrap();
        g.try_accept(&sample_join("Carol"), false, 12).unwrap();
        assert_eq!(g.try_accept(&sample_join("Dave"), false, 12), Err(RejectJoinReason::Full));
    }

    #[test]
    fn slot_change_color_collision_rejected() {
        let mut g = Game::new(1, "g".into(), "Alice".into(), None, melee_map(), 6112, 10, 100, false);
        let (bob, _) = g.try_accept(&sample_join("Bob"), false, 12).unwrap();
        g.try_accept(&sample_join("Carol"), false, 12).unwrap();
        assert!(g.apply_slot_change(bob, None, Some(1), None).is_err());
    }

    #[test]
    fn countdown_leave_aborts_when_interruptable() {
        let mut g = Game::new(1, "g".into(), "Alice".into(), None, melee_map(), 6112, 10, 100, false);
        let (bob, _) = g.try_accept(&sample_join("Bob"), false, 12).unwrap();
        g.try_start_countdown(true);
        g.handle_countdown_leave(bob);
        assert_eq!(g.phase, GamePhase::Lobby);
    }

    #[test]
    fn countdown_leave_continues_when_not_interruptable() {
        let mut g = Game::new(1, "g".into(), "Alice".into(), None, melee_map(), 6112, 10, 100, false);
        g.countdown_interruptable = false;
        let (bob, _) = g.try_accept(&sample_join("Bob"), false, 12).unwrap();
        g.try_start_countdown(true);
        g.handle_countdown_leave(bob);
        assert_eq!(g.phase, GamePhase::Countdown);
    }

    #[test]
    fn game_over_when_fewer_than_two_players_remain() {
        let mut g = Game::new(1, "g".into(), "Alice".into(), None, melee_map(), 6112, 10, 100, false);
        let (bob, _) = g.try_accept(&sample_join("Bob"), false, 12).unwrap();
        g.phase = GamePhase::Playing;
        assert!(g.check_game_over());
        let _ = bob;
    }

    #[test]
    fn expect_race_not_ready_until_a_race_is_picked() {
        let mut g = Game::new(1, "g".into(), "Alice".into(), None, melee_map(), 6112, 10, 100, false);
        g.ready_mode = ReadyMode::ExpectRace;
        let (bob, _) = g.try_accept(&sample_join("Bob"), false, 12).unwrap();
        g.players.get_mut(&bob).unwrap().download_finished = true;
        assert!(!g.ready_condition_met(bob));
        g.apply_slot_change(bob, None, None, Some(RaceFlags::ORC)).unwrap();
        assert!(g.ready_condition_met(bob));
    }

    #[test]
    fn expect_race_satisfied_by_random_races_enabled_without_a_pick() {
        let mut g = Game::new(1, "g".into(), "Alice".into(), None, melee_map(), 6112, 10, 100, true);
        g.ready_mode = ReadyMode::ExpectRace;
        let (bob, _) = g.try_accept(&sample_join("Bob"), false, 12).unwrap();
        g.players.get_mut(&bob).unwrap().download_finished = true;
        assert!(g.ready_condition_met(bob));
    }

    #[test]
    fn expect_race_satisfied_by_fixed_player_settings_without_a_pick() {
        let mut map = melee_map();
        map.flags = GameFlags::FIXED_PLAYER_SETTINGS;
        let mut g = Game::new(1, "g".into(), "Alice".into(), None, map, 6112, 10, 100, false);
        g.ready_mode = ReadyMode::ExpectRace;
        let (bob, _) = g.try_accept(&sample_join("Bob"), false, 12).unwrap();
        g.players.get_mut(&bob).unwrap().download_finished = true;
        assert!(g.ready_condition_met(bob));
    }

    #[test]
    fn refresh_failure_closes_an_empty_lobby() {
        let mut g = Game::new(1, "g".into(), "Alice".into(), None, melee_map(), 6112, 10, 100, false);
        let events = g.on_refresh_failed("useast.battle.net");
        assert!(events.is_empty());
        assert_eq!(g.phase, GamePhase::Over);
    }

    #[test]
    fn refresh_failure_flags_and_chats_a_non_empty_lobby() {
        let mut g = Game::new(1, "g".into(), "Alice".into(), None, melee_map(), 6112, 10, 100, false);
        g.try_accept(&sample_join("Bob"), false, 12).unwrap();
        let events = g.on_refresh_failed("useast.battle.net");
        assert!(g.refresh_error);
        assert_eq!(g.phase, GamePhase::Lobby);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn race_change_rejected_when_fixed_player_settings() {
        let mut map = melee_map();
        map.flags = GameFlags::FIXED_PLAYER_SETTINGS;
        let mut g = Game::new(1, "g".into(), "Alice".into(), None, map, 6112, 10, 100, false);
        let (bob, _) = g.try_accept(&sample_join("Bob"), false, 12).unwrap();
        assert!(g.apply_slot_change(bob, None, None, Some(RaceFlags::HUMAN)).is_err());
    }
}
