// cli.rs -- command-line surface (spec.md ss6).
// Converted from: myq2-original's Sys_ParseArgs-style argv handling,
// replaced with clap's derive API the way the rest of the pack's networked
// services (see workspace-level note in DESIGN.md) declare their CLI.

use clap::Parser;

/// Host a single Warcraft III lobby and advertise it on configured realms
/// and the local network.
#[derive(Debug, Parser)]
#[command(name = "hostbot", version, about)]
pub struct Cli {
    /// Map path or identifier, e.g. `local:melee.w3x` or `epicwar:12345`.
    pub map: String,

    /// Display name for the hosted game.
    #[arg(long)]
    pub name: Option<String>,

    /// Client game version the bot advertises and enforces.
    #[arg(long = "w3version")]
    pub w3version: Option<String>,

    /// Path to a Warcraft III installation, used to resolve bundled maps.
    #[arg(long = "w3path")]
    pub w3path: Option<String>,

    /// Directory searched for map files.
    #[arg(long = "mapdir")]
    pub mapdir: Option<String>,

    /// Directory searched for config files.
    #[arg(long = "cfgdir", default_value = "cfg")]
    pub cfgdir: String,

    /// Number of observer slots to reserve.
    #[arg(long, default_value_t = 0)]
    pub observers: u8,

    /// Lobby visibility: public, private, or full.
    #[arg(long, default_value = "public")]
    pub visibility: String,

    /// Assign random races regardless of map settings.
    #[arg(long = "random-races", default_value_t = false)]
    pub random_races: bool,

    /// Assign random heroes regardless of map settings.
    #[arg(long = "random-heroes", default_value_t = false)]
    pub random_heroes: bool,

    /// Realm name (or "lan") of the game's owner.
    #[arg(long)]
    pub owner: Option<String>,

    /// A chat command to run immediately after the game is created.
    #[arg(long)]
    pub exec: Option<String>,

    /// Identity the `--exec` command should appear to run as.
    #[arg(long = "exec-as")]
    pub exec_as: Option<String>,

    /// Minimum auth level required for `--exec`.
    #[arg(long = "exec-auth", default_value = "owner")]
    pub exec_auth: String,

    /// Host a mirror of a game already advertised elsewhere.
    #[arg(long)]
    pub mirror: Option<String>,

    /// Restrict advertisement to the local network only.
    #[arg(long = "lan-mode", default_value_t = false)]
    pub lan_mode: bool,

    /// Keep the process running after the hosted game ends.
    #[arg(long = "no-exit", default_value_t = false)]
    pub no_exit: bool,

    /// Disable the LAN discovery bus entirely.
    #[arg(long = "no-lan", default_value_t = false)]
    pub no_lan: bool,

    /// Skip the map fingerprint cache and recompute on every start.
    #[arg(long = "no-cache", default_value_t = false)]
    pub no_cache: bool,

    /// Path to the dotted-key config file.
    #[arg(long, default_value = "hostbot.cfg")]
    pub config: String,
}
