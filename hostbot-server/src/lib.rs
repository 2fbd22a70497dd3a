#![allow(dead_code)]
#![allow(clippy::too_many_arguments, clippy::manual_range_contains)]

//! The hosting runtime: a single-threaded cooperative event loop that hosts
//! one Warcraft III game lobby, advertises it on configured realms and the
//! local network, relays in-game traffic, and survives brief disconnects via
//! GProxy reconnection.

pub mod cli;
pub mod discovery;
pub mod error;
pub mod game;
pub mod map;
pub mod net;
pub mod pregate;
pub mod realm;
pub mod store;
pub mod supervisor;
