// main.rs -- process entry point.
// Converted from: myq2-original/server/sv_init.rs's `SV_Init` boot sequence
// (parse argv, load config, open persistence, enter the frame loop),
// restated for a single hosted game instead of a dedicated-server console.

use std::path::Path;
use std::time::Instant;

use clap::Parser;
use log::{error, info};

use hostbot_server::cli::Cli;
use hostbot_server::discovery;
use hostbot_server::error::StartupError;
use hostbot_server::map::{Handshaker, MapLoadError, MapLoader, MapMetadata};
use hostbot_server::realm::RealmSession;
use hostbot_server::store::Store;
use hostbot_server::supervisor::{install_sigint_handler, PendingAction, Supervisor};

/// Distinct `realm_N` indices with at least a `host_name` configured
/// (spec.md ss6: config keys are `realm_N.X`, one per realm).
fn configured_realm_indices(config: &hostbot_common::config::RawConfig) -> Vec<usize> {
    let mut indices: Vec<usize> = config
        .keys()
        .filter_map(|key| {
            let rest = key.strip_prefix("realm_")?;
            let (digits, suffix) = rest.split_once('.')?;
            if suffix != "host_name" {
                return None;
            }
            digits.parse::<usize>().ok()
        })
        .collect();
    indices.sort_unstable();
    indices.dedup();
    indices
}

/// Placeholder collaborator for the explicitly out-of-scope map-parsing and
/// crypto pipeline (spec.md ss1). A production deployment wires these to a
/// real MPQ/StormLib reader and a real Battle.net crypto implementation;
/// this crate only depends on the trait boundary.
struct UnimplementedMapPipeline;

impl MapLoader for UnimplementedMapPipeline {
    fn parse_map(&self, identifier: &str) -> Result<MapMetadata, MapLoadError> {
        Err(MapLoadError::UnresolvedIdentifier(identifier.to_string()))
    }
}

impl Handshaker for UnimplementedMapPipeline {
    fn hash_logon_password(&self, _username: &str, _password: &str, _client_token: u32, _server_token: u32) -> Vec<u8> {
        Vec::new()
    }

    fn check_revision(&self, _value_string: &str, _mpq_data: &[u8]) -> u32 {
        0
    }

    fn create_key_hash(&self, _cd_key: &str, _client_token: u32, _server_token: u32) -> Vec<u8> {
        Vec::new()
    }
}

fn run() -> Result<(), StartupError> {
    let cli = Cli::parse();

    let config_path = Path::new(&cli.cfgdir).join(&cli.config);
    let config = if config_path.exists() {
        hostbot_common::config::RawConfig::load_file(&config_path)?
    } else {
        info!("no config file at {}, continuing with CLI-only configuration", config_path.display());
        hostbot_common::config::RawConfig::parse("")?
    };
    hostbot_common::config::warn_on_unknown_keys(&config);

    let db_path = config.get("bot.database").unwrap_or("hostbot.dbs").to_string();
    let store = Store::open(&db_path)?;

    let mut supervisor = Supervisor::new(store).map_err(|e| StartupError::BindFailed {
        addr: "mio poll".to_string(),
        source: e,
    })?;

    let exit_flag = supervisor.register_exit_signal();
    install_sigint_handler(exit_flag);

    let port = config.get_u16("bot.port")?.unwrap_or(6112);
    let realm_port = config.get_u16("bot.realm_port")?.unwrap_or(6112);
    let lag_threshold = config.get_u32("bot.lag_threshold_ms")?.unwrap_or(10_000);
    let max_upload_kb_per_sec = config.get_u32("bot.max_upload_kb_per_sec")?.unwrap_or(1024);
    let owner = cli.owner.clone().unwrap_or_else(|| "LAN".to_string());
    let display_name = cli.name.clone().unwrap_or_else(|| cli.map.clone());
    let cd_key = config.get("bot.cd_key").unwrap_or("").to_string();
    let exe_info = config.get("bot.exe_info").unwrap_or("war3.exe 1 0 0 0000 A").to_string();
    let command_prefix = config.get("bot.command_prefix").unwrap_or("!").to_string();
    let configured_version = config.get_u32("bot.w3version")?.unwrap_or(2600);

    for idx in configured_realm_indices(&config) {
        let host_name = match config.get_realm(idx, "host_name") {
            Some(v) => v.to_string(),
            None => continue,
        };
        let username = config.get_realm(idx, "username").unwrap_or_default().to_string();
        let password = config.get_realm(idx, "password").unwrap_or_default().to_string();
        let flood_immune = matches!(config.get_realm(idx, "flood_immune"), Some("1" | "true" | "yes" | "on"));
        info!("configuring realm_{idx} ({host_name})");
        let mut realm = RealmSession::new(host_name.clone(), username, password, flood_immune);
        use std::net::ToSocketAddrs;
        match (host_name.as_str(), realm_port).to_socket_addrs().ok().and_then(|mut it| it.next()) {
            Some(addr) => realm.addr = Some(addr),
            None => error!("could not resolve realm_{idx} host `{host_name}`, will not attempt to connect"),
        }
        supervisor.realms.push(realm);
    }

    if let Err(e) = supervisor.bind_game_listener(std::net::SocketAddr::from(([0, 0, 0, 0], port))) {
        error!("failed to bind game listener on port {port}: {e}");
    }
    if !cli.no_lan {
        if let Err(e) = supervisor.bind_discovery(std::net::SocketAddr::from(([0, 0, 0, 0], discovery::STANDARD_PORT))) {
            error!("failed to bind discovery bus on {}: {e}", discovery::STANDARD_PORT);
        }
    }

    let pipeline = UnimplementedMapPipeline;
    let map = pipeline.parse_map(&cli.map).map_err(|e| StartupError::MapUnreadable {
        path: cli.map.clone(),
        source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
    })?;

    let host_counter = supervisor.host_counters.allocate(0);
    let game = hostbot_server::game::Game::new(
        host_counter,
        display_name,
        owner.clone(),
        None,
        map,
        port,
        lag_threshold,
        max_upload_kb_per_sec,
        cli.random_races,
    );
    supervisor.host_game(game);

    if let Some(source) = cli.mirror.clone() {
        supervisor.pending_actions.push(PendingAction::Mirror { source });
    }
    if let Some(command) = cli.exec.clone() {
        let as_user = cli.exec_as.clone().unwrap_or(owner);
        supervisor.pending_actions.push(PendingAction::ExecuteCommand { command, as_user });
    }

    info!("hostbot starting, map={}, no_lan={}", cli.map, cli.no_lan);

    loop {
        if supervisor.should_exit() {
            info!("shutdown requested, exiting cleanly");
            break;
        }
        if !cli.no_exit && supervisor.current_lobby().is_none() {
            info!("no lobby or game remaining and --no-exit was not set, exiting");
            break;
        }

        let now = Instant::now();
        let events = supervisor.wait_for_ready(None, now).map_err(|e| StartupError::BindFailed {
            addr: "event loop".to_string(),
            source: e,
        })?;
        // The token space is shared across every registered socket, so each
        // subsystem just drains whatever is ready this tick rather than
        // switching on individual event tokens.
        let _ = events;

        supervisor.service_realm_reconnects(now);
        supervisor.accept_new_players(port, now);
        let ready_joins = supervisor.service_pregate(now);
        supervisor.accept_pregate_joins(ready_joins);

        let chat_actions = supervisor.service_realms(now, &pipeline, &cd_key, &exe_info, &command_prefix);
        for (_realm_idx, action) in chat_actions {
            match action {
                hostbot_server::realm::ChatAction::Command { username, command } => {
                    supervisor.pending_actions.push(PendingAction::ExecuteCommand { command, as_user: username });
                }
                hostbot_server::realm::ChatAction::RefreshFailed { .. } => supervisor.apply_chat_action(action),
                hostbot_server::realm::ChatAction::Spoofcheck { .. } | hostbot_server::realm::ChatAction::None => {}
            }
        }

        if !cli.no_lan {
            supervisor.service_discovery(configured_version);
        }
        supervisor.service_lobby_advertisement(now);
        supervisor.reap_finished_games();
    }

    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        error!("fatal startup error: {e}");
        std::process::exit(1);
    }
}
