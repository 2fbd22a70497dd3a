// pregate.rs -- connection pre-gate (spec.md ss3 PendingConnection, ss4.4).
// Converted from: myq2-original/server/sv_init.rs's `SvClientCallbacks`
// registration-hook pattern for classifying freshly accepted connections,
// applied here to the four-way classification spec.md ss4.4 describes
// instead of Quake 2's single client-connect path.

use std::time::{Duration, Instant};

use hostbot_common::codec::{peek_frame, FAMILY_GAME, FAMILY_GPROXY, FAMILY_VLAN};

use crate::game::wire::{decode_gps_reconnect, decode_reqjoin, GpsOpcode, GpsReconnect, ReqJoin, W3gsOpcode};

pub const PRE_GATE_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreGateOutcome {
    /// Not enough data buffered yet; keep waiting.
    Incomplete,
    Join(ReqJoin),
    Reconnect(GpsReconnect),
    UdpTunnelRequested,
    Vlan,
    ProtocolError,
}

pub struct PendingConnection {
    pub port: u16,
    pub accepted_at: Instant,
    pub recv_buffer: Vec<u8>,
}

impl PendingConnection {
    pub fn new(port: u16, now: Instant) -> Self {
        PendingConnection { port, accepted_at: now, recv_buffer: Vec::new() }
    }

    pub fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.accepted_at) >= PRE_GATE_DEADLINE
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.recv_buffer.extend_from_slice(bytes);
    }

    /// Classify the buffered data per spec.md ss4.4's ordered pattern match.
    /// Consumes the frame from `recv_buffer` on a definitive outcome.
    pub fn classify(&mut self) -> PreGateOutcome {
        let parsed = match peek_frame(&self.recv_buffer) {
            Ok(Some((header, payload))) => Some((header, payload.to_vec())),
            Ok(None) => None,
            Err(_) => return PreGateOutcome::ProtocolError,
        };

        let (header, payload) = match parsed {
            Some(v) => v,
            None => return PreGateOutcome::Incomplete,
        };

        let outcome = match header.family {
            FAMILY_GAME if header.opcode == W3gsOpcode::ReqJoin as u8 && header.payload_len() >= 8 => {
                match decode_reqjoin(&payload) {
                    Ok(join) => PreGateOutcome::Join(join),
                    Err(_) => PreGateOutcome::ProtocolError,
                }
            }
            FAMILY_GPROXY if header.opcode == GpsOpcode::Reconnect as u8 && header.payload_len() >= 9 => {
                match decode_gps_reconnect(&payload) {
                    Ok(reconnect) => PreGateOutcome::Reconnect(reconnect),
                    Err(_) => PreGateOutcome::ProtocolError,
                }
            }
            FAMILY_GPROXY if header.opcode == GpsOpcode::UdpSyn as u8 && header.payload_len() == 0 => {
                PreGateOutcome::UdpTunnelRequested
            }
            FAMILY_VLAN if header.opcode == 0xFF && header.payload_len() == 0 => PreGateOutcome::Vlan,
            _ => PreGateOutcome::ProtocolError,
        };

        let consumed = header.total_len as usize;
        self.recv_buffer.drain(..consumed);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostbot_common::buffer::WriteBuffer;

    fn reqjoin_frame(host_counter: u32) -> Vec<u8> {
        let mut w = WriteBuffer::new();
        w.write_u32_le(host_counter);
        w.write_u32_le(0);
        w.write_cstring("Bob");
        w.write_u8(9);
        w.write_u32_be(u32::from_be_bytes([10, 0, 0, 1]));
        w.finish_framed(FAMILY_GAME, W3gsOpcode::ReqJoin as u8)
    }

    #[test]
    fn incomplete_data_waits() {
        let mut pc = PendingConnection::new(6112, Instant::now());
        pc.feed(&[FAMILY_GAME, W3gsOpcode::ReqJoin as u8]);
        assert_eq!(pc.classify(), PreGateOutcome::Incomplete);
    }

    #[test]
    fn reqjoin_classifies_as_join() {
        let mut pc = PendingConnection::new(6112, Instant::now());
        pc.feed(&reqjoin_frame(42));
        match pc.classify() {
            PreGateOutcome::Join(join) => assert_eq!(join.host_counter, 42),
            other => panic!("wrong outcome: {other:?}"),
        }
    }

    #[test]
    fn unknown_frame_is_a_protocol_error() {
        let mut pc = PendingConnection::new(6112, Instant::now());
        pc.feed(&[0x00, 0x01, 0x04, 0x00]);
        assert_eq!(pc.classify(), PreGateOutcome::ProtocolError);
    }

    #[test]
    fn deadline_expires_after_five_seconds() {
        let t0 = Instant::now();
        let pc = PendingConnection::new(6112, t0);
        assert!(!pc.expired(t0 + Duration::from_secs(4)));
        assert!(pc.expired(t0 + Duration::from_secs(5)));
    }

    #[test]
    fn udp_syn_classifies_as_tunnel_request() {
        let mut pc = PendingConnection::new(6112, Instant::now());
        pc.feed(&[FAMILY_GPROXY, GpsOpcode::UdpSyn as u8, 4, 0]);
        assert_eq!(pc.classify(), PreGateOutcome::UdpTunnelRequested);
    }
}
