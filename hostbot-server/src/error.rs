// error.rs -- top-level error types for the hosting runtime.
// Converted from: myq2-original/qcommon/common.c's com_error(ERR_FATAL) /
// com_error(ERR_DROP) split, restated as two concrete types per
// hostbot-common::error's pattern: a fatal type that aborts startup and a
// recoverable type that only ever closes one connection or resets one
// session.

use thiserror::Error;

/// Fatal startup errors. Per spec.md ss7, printed and the process exits
/// with code 1 before any game is hosted.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("config error: {0}")]
    Config(#[from] hostbot_common::ConfigError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database schema is incompatible (schema_number={found}, require >= {required})")]
    IncompatibleSchema { found: u32, required: u32 },

    #[error("could not read map file {path}: {source}")]
    MapUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not bind {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Recoverable errors raised while the event loop is running. These never
/// abort the process; the caller decides whether to reset a session, close
/// a connection, or just log and continue.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("codec error: {0}")]
    Codec(#[from] hostbot_common::CodecError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}
