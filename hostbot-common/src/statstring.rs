// statstring.rs -- the null-free "stat string" bijection carried inside
// GAMEINFO and realm ad packets (spec.md ss4.1, property P5).
//
// Converted from: myq2-original has no equivalent (Quake 2 never needed a
// null-free encoding); this is grounded on the original bot's stat-string
// encode/decode, restated per spec.md's design note ss9 as two pure
// functions rather than a stream class.
//
// Encoding maps each run of up to 7 source bytes to an 8-byte block. The
// first byte of the block is a mask byte: bit (i+1) is set when source byte
// `i` of the run was even (its low bit clear); every source byte is then
// written with its low bit forced to 1. Since an encoded byte's low bit is
// always 1, it can never be 0x00 -- that's the whole point, it lets the
// rest of the packet keep using null-terminated C strings.

/// Encode an arbitrary byte string (which may contain embedded nulls) into a
/// null-free byte string safe to embed inside a C-string-delimited packet.
pub fn encode(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len() + src.len() / 7 + 1);
    for chunk in src.chunks(7) {
        let mut mask = 1u8;
        for (i, &b) in chunk.iter().enumerate() {
            if b & 1 == 0 {
                mask |= 1 << (i + 1);
            }
        }
        out.push(mask);
        for &b in chunk {
            out.push(b | 1);
        }
    }
    out
}

/// Decode a stat string produced by [`encode`]. Returns `None` if the input
/// is empty where a block was expected; a malformed frame is a protocol
/// anomaly, not a panic.
pub fn decode(src: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;
    while i < src.len() {
        let mask = src[i];
        i += 1;
        let remaining_in_block = (src.len() - i).min(7);
        if remaining_in_block == 0 {
            break;
        }
        for j in 0..remaining_in_block {
            let b = src[i + j];
            let was_even = (mask >> (j + 1)) & 1 != 0;
            let original = if was_even { b & 0xFE } else { b };
            out.push(original);
        }
        i += remaining_in_block;
    }
    Some(out)
}
