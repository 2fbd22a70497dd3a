#![allow(dead_code)]
#![allow(clippy::too_many_arguments, clippy::manual_range_contains)]

//! Leaf utilities shared by the hosting runtime: the wire-level byte buffer,
//! the dual-stack address type, the three-family frame codec, the
//! stat-string bijection, the typed configuration loader, and a generic
//! priority-tagged outbound queue.

pub mod buffer;
pub mod codec;
pub mod config;
pub mod crc;
pub mod error;
pub mod net;
pub mod queue;
pub mod statstring;

pub use error::{CodecError, ConfigError};
