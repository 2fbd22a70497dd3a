// error.rs -- typed errors for the codec and config leaves.
//
// Converted from: myq2-original's com_error(ERR_FATAL/ERR_DROP, ...) pattern.
// The original distinguishes fatal-vs-drop by an integer code passed to a
// single function; here the distinction is the type itself, and propagation
// is via `Result` rather than panic/longjmp-style error codes.

use thiserror::Error;

/// Errors produced while framing or parsing a wire packet.
///
/// Per spec: any protocol-level anomaly (bad length, unknown opcode inside a
/// known family, stat-string decode failure) closes the offending connection
/// but never aborts the event loop.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CodecError {
    #[error("frame shorter than the 4-byte header (got {0} bytes)")]
    TooShort(usize),

    #[error("frame header declares length {declared} but buffer only holds {available}")]
    Truncated { declared: usize, available: usize },

    #[error("unknown frame family byte 0x{0:02X}")]
    UnknownFamily(u8),

    #[error("unknown opcode 0x{opcode:02X} in family 0x{family:02X}")]
    UnknownOpcode { family: u8, opcode: u8 },

    #[error("frame declares length {0} which is below the 4-byte header minimum")]
    LengthBelowHeader(usize),

    #[error("stat string contains an embedded null byte at index {0}")]
    StatStringEmbeddedNull(usize),

    #[error("stat string block truncated (expected 8-byte blocks)")]
    StatStringTruncated,

    #[error("buffer read past end of data (wanted {wanted} bytes, {available} remained)")]
    ReadPastEnd { wanted: usize, available: usize },

    #[error("string field missing null terminator")]
    UnterminatedString,
}

/// Errors produced while loading or validating the bot's configuration file.
#[derive(Debug, Error, Clone)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::sync::Arc<std::io::Error>,
    },

    #[error("line {line}: expected `key = value`, got {text:?}")]
    Malformed { line: usize, text: String },

    #[error("missing required key `{0}`")]
    MissingRequired(String),

    #[error("key `{key}` has invalid value {value:?}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}
