// net.rs -- dual-stack address abstraction.
// Converted from: myq2-original/qcommon/net.c (NetAdr + NET_* helpers).
//
// The original's netadr_t discriminates loopback/IP/IPv6/broadcast variants
// inline; we keep that shape (rather than just wrapping std::net::SocketAddr)
// because the discovery bus and pre-gate both need to special-case loopback
// and local-subnet sends the way the original does.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostAddr {
    Loopback,
    V4 { ip: [u8; 4], port: u16 },
    V6 { ip: [u8; 16], scope_id: u32, port: u16 },
}

impl HostAddr {
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => HostAddr::V4 {
                ip: v4.ip().octets(),
                port: v4.port(),
            },
            SocketAddr::V6(v6) => HostAddr::V6 {
                ip: v6.ip().octets(),
                scope_id: v6.scope_id(),
                port: v6.port(),
            },
        }
    }

    pub fn to_socket_addr(self) -> Option<SocketAddr> {
        match self {
            HostAddr::Loopback => Some(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)),
            HostAddr::V4 { ip, port } => Some(SocketAddr::new(Ipv4Addr::from(ip).into(), port)),
            HostAddr::V6 { ip, port, .. } => Some(SocketAddr::new(Ipv6Addr::from(ip).into(), port)),
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            HostAddr::Loopback => 0,
            HostAddr::V4 { port, .. } => *port,
            HostAddr::V6 { port, .. } => *port,
        }
    }

    pub fn with_port(self, port: u16) -> Self {
        match self {
            HostAddr::Loopback => HostAddr::Loopback,
            HostAddr::V4 { ip, .. } => HostAddr::V4 { ip, port },
            HostAddr::V6 { ip, scope_id, .. } => HostAddr::V6 { ip, scope_id, port },
        }
    }

    /// Compare including port (exact peer match).
    pub fn matches(&self, other: &HostAddr) -> bool {
        self == other
    }

    /// Compare ignoring port (same host, possibly different ephemeral port).
    pub fn matches_base(&self, other: &HostAddr) -> bool {
        match (self, other) {
            (HostAddr::Loopback, HostAddr::Loopback) => true,
            (HostAddr::V4 { ip: a, .. }, HostAddr::V4 { ip: b, .. }) => a == b,
            (
                HostAddr::V6 { ip: a, scope_id: sa, .. },
                HostAddr::V6 { ip: b, scope_id: sb, .. },
            ) => a == b && sa == sb,
            _ => false,
        }
    }

    pub fn is_ipv4(&self) -> bool {
        matches!(self, HostAddr::V4 { .. })
    }

    pub fn ipv4_octets(&self) -> Option<[u8; 4]> {
        match self {
            HostAddr::V4 { ip, .. } => Some(*ip),
            _ => None,
        }
    }

    /// Private/loopback/link-local ranges -- used by the pre-gate and
    /// discovery bus to decide whether to reply with a local-subnet
    /// GAMEINFO broadcast.
    pub fn is_local(&self) -> bool {
        match self {
            HostAddr::Loopback => true,
            HostAddr::V4 { ip, .. } => {
                ip[0] == 127
                    || (ip[0] == 192 && ip[1] == 168)
                    || (ip[0] == 172 && (16..=31).contains(&ip[1]))
                    || ip[0] == 10
            }
            HostAddr::V6 { ip, .. } => {
                *ip == [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]
                    || (ip[0] == 0xfe && (ip[1] & 0xc0) == 0x80)
                    || (ip[0] & 0xfe) == 0xfc
            }
        }
    }
}

impl std::fmt::Display for HostAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostAddr::Loopback => write!(f, "loopback"),
            HostAddr::V4 { ip, port } => {
                write!(f, "{}.{}.{}.{}:{}", ip[0], ip[1], ip[2], ip[3], port)
            }
            HostAddr::V6 { ip, scope_id, port } => {
                let groups: Vec<String> = (0..8)
                    .map(|i| format!("{:x}", u16::from_be_bytes([ip[i * 2], ip[i * 2 + 1]])))
                    .collect();
                if *scope_id != 0 {
                    write!(f, "[{}%{}]:{}", groups.join(":"), scope_id, port)
                } else {
                    write!(f, "[{}]:{}", groups.join(":"), port)
                }
            }
        }
    }
}

/// Parse a CLI/config-supplied address string. Supports "host", "host:port",
/// "[::1]:port" and "localhost".
pub fn parse_host_addr(s: &str) -> Option<HostAddr> {
    if s == "localhost" {
        return Some(HostAddr::Loopback);
    }
    if s.starts_with('[') {
        let close = s.find(']')?;
        let inner = &s[1..close];
        let addr_part = match inner.find('%') {
            Some(p) => &inner[..p],
            None => inner,
        };
        let ip: Ipv6Addr = addr_part.parse().ok()?;
        let port = if s.as_bytes().get(close + 1) == Some(&b':') {
            s[close + 2..].parse().ok()?
        } else {
            0
        };
        return Some(HostAddr::V6 {
            ip: ip.octets(),
            scope_id: 0,
            port,
        });
    }
    let (host, port) = match s.rfind(':') {
        Some(i) if s.matches(':').count() == 1 => (&s[..i], s[i + 1..].parse().ok()?),
        _ => (s, 0u16),
    };
    let ip: Ipv4Addr = host.parse().ok()?;
    Some(HostAddr::V4 {
        ip: ip.octets(),
        port,
    })
}
