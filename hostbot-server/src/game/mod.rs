// game/mod.rs -- the lobby/in-game subsystem (spec.md ss3 Game/Player, ss4.5-4.7).

pub mod action;
pub mod download;
pub mod gproxy;
pub mod lag;
pub mod lobby;
pub mod player;
pub mod slot;
pub mod wire;

pub use lobby::{Game, GameEvent, GamePhase, GameVisibility};
pub use player::Player;
