// codec.rs -- shared frame header for the four byte-protocol families that
// multiplex over a single TCP connection (spec.md ss4.1).
//
// Converted from: myq2-original/qcommon/net_chan.c's out-of-band vs.
// in-band framing split, generalized to four families instead of two. Every
// frame begins with a 1-byte family tag, a 1-byte opcode, and a 2-byte
// little-endian total length (header included). The payload that follows is
// handed to the family-specific decoder in `hostbot-server`'s `realm`/`game`
// modules; this module only owns the shared envelope.

use crate::error::CodecError;

pub const FAMILY_REALM: u8 = 0xFF;
pub const FAMILY_GAME: u8 = 0xF7;
pub const FAMILY_GPROXY: u8 = 0xF8;
pub const FAMILY_VLAN: u8 = 0xFA;

pub const HEADER_LEN: usize = 4;

/// One parsed frame header plus a borrow of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub family: u8,
    pub opcode: u8,
    /// Total frame length including the 4-byte header, as declared on the wire.
    pub total_len: u16,
}

impl FrameHeader {
    pub fn payload_len(&self) -> usize {
        self.total_len as usize - HEADER_LEN
    }

    pub fn is_known_family(&self) -> bool {
        matches!(
            self.family,
            FAMILY_REALM | FAMILY_GAME | FAMILY_GPROXY | FAMILY_VLAN
        )
    }
}

/// Attempt to parse one frame header from the front of `buf`. Returns the
/// header and the payload slice (not including the header) on success.
///
/// This never consumes partial data: if `buf` doesn't yet hold a complete
/// frame, callers should leave `buf` untouched and wait for more bytes.
pub fn peek_frame<'a>(buf: &'a [u8]) -> Result<Option<(FrameHeader, &'a [u8])>, CodecError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let family = buf[0];
    let opcode = buf[1];
    let total_len = u16::from_le_bytes([buf[2], buf[3]]);

    if (total_len as usize) < HEADER_LEN {
        return Err(CodecError::LengthBelowHeader(total_len as usize));
    }

    if buf.len() < total_len as usize {
        return Ok(None);
    }

    let header = FrameHeader {
        family,
        opcode,
        total_len,
    };
    if !header.is_known_family() {
        return Err(CodecError::UnknownFamily(family));
    }

    let payload = &buf[HEADER_LEN..total_len as usize];
    Ok(Some((header, payload)))
}

/// Split `buf` into (consumed frame bytes, remainder) once [`peek_frame`]
/// has confirmed a complete frame is present. Panics if called on a `buf`
/// that doesn't start with a complete frame -- callers always call
/// [`peek_frame`] first.
pub fn split_frame(buf: &[u8], header: FrameHeader) -> (&[u8], &[u8]) {
    buf.split_at(header.total_len as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(family: u8, opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mut v = vec![family, opcode];
        v.extend_from_slice(&((payload.len() + HEADER_LEN) as u16).to_le_bytes());
        v.extend_from_slice(payload);
        v
    }

    #[test]
    fn incomplete_header_returns_none() {
        let buf = [FAMILY_GAME, 0x1E];
        assert_eq!(peek_frame(&buf).unwrap(), None);
    }

    #[test]
    fn incomplete_payload_returns_none() {
        let full = frame(FAMILY_GAME, 0x1E, b"hello world");
        let partial = &full[..full.len() - 3];
        assert_eq!(peek_frame(partial).unwrap(), None);
    }

    #[test]
    fn complete_frame_parses() {
        let full = frame(FAMILY_REALM, 0x50, b"payload");
        let (header, payload) = peek_frame(&full).unwrap().unwrap();
        assert_eq!(header.family, FAMILY_REALM);
        assert_eq!(header.opcode, 0x50);
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn unknown_family_is_rejected() {
        let full = frame(0x00, 0x01, b"");
        assert_eq!(peek_frame(&full), Err(CodecError::UnknownFamily(0x00)));
    }

    #[test]
    fn length_below_header_is_rejected() {
        let buf = [FAMILY_GPROXY, 0x01, 0x02, 0x00];
        assert_eq!(peek_frame(&buf), Err(CodecError::LengthBelowHeader(2)));
    }

    #[test]
    fn split_frame_separates_consumed_bytes_from_remainder() {
        let first = frame(FAMILY_VLAN, 0x01, b"abc");
        let second = frame(FAMILY_GAME, 0x02, b"xyz");
        let mut buf = first.clone();
        buf.extend_from_slice(&second);

        let (header, _) = peek_frame(&buf).unwrap().unwrap();
        let (consumed, remainder) = split_frame(&buf, header);
        assert_eq!(consumed, &first[..]);
        assert_eq!(remainder, &second[..]);
    }
}
