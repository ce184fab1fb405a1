// src/ice/candidate.rs
//! ICE candidate attribute parsing (RFC 8839 Section 5.1)

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::Serialize;

use crate::error::CandidateParseError;
use crate::storage::CorrelationKey;

/// Prefix of every candidate attribute value
pub const CANDIDATE_PREFIX: &str = "candidate";

/// ICE candidate type (RFC 8445 Section 5.1.1.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateType {
    /// Host candidate (local address)
    Host,
    /// Server reflexive (from STUN)
    #[serde(rename = "srflx")]
    ServerReflexive,
    /// Peer reflexive (discovered during connectivity checks)
    #[serde(rename = "prflx")]
    PeerReflexive,
    /// Relayed candidate (from TURN)
    Relay,
}

impl CandidateType {
    pub fn to_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::ServerReflexive => "srflx",
            Self::PeerReflexive => "prflx",
            Self::Relay => "relay",
        }
    }
}

impl FromStr for CandidateType {
    type Err = CandidateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(Self::Host),
            "srflx" => Ok(Self::ServerReflexive),
            "prflx" => Ok(Self::PeerReflexive),
            "relay" => Ok(Self::Relay),
            other => Err(CandidateParseError::UnknownType(other.to_string())),
        }
    }
}

/// Transport protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    Udp,
    Tcp,
}

/// TCP candidate type (RFC 6544)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TcpType {
    Active,
    Passive,
    So,
}

/// Connection address of a candidate: an IP literal or a hostname
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum ConnectionAddress {
    Ip(IpAddr),
    Host(String),
}

impl ConnectionAddress {
    fn parse(s: &str) -> Result<Self, CandidateParseError> {
        if s.is_empty() {
            return Err(CandidateParseError::InvalidAddress(s.to_string()));
        }

        // Zone IDs never appear on the wire side of the key
        let without_zone = s.split('%').next().unwrap_or(s);
        if let Ok(ip) = without_zone.parse::<IpAddr>() {
            return Ok(Self::Ip(ip));
        }

        let valid_host = s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_');
        if valid_host && !s.contains(':') {
            Ok(Self::Host(s.to_string()))
        } else {
            Err(CandidateParseError::InvalidAddress(s.to_string()))
        }
    }
}

impl fmt::Display for ConnectionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(ip) => write!(f, "{}", ip),
            Self::Host(host) => f.write_str(host),
        }
    }
}

/// ICE candidate parsed from an SDP `a=candidate:` attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    /// Foundation (RFC 8445 Section 5.1.1.3)
    pub foundation: String,

    /// Component ID (1 for RTP, 2 for RTCP)
    pub component_id: u16,

    pub transport: TransportProtocol,

    pub priority: u32,

    pub connection_address: ConnectionAddress,

    pub port: u16,

    #[serde(rename = "type")]
    pub typ: CandidateType,

    /// Related address and port (for reflexive/relay candidates)
    pub related: Option<(ConnectionAddress, u16)>,

    /// TCP type (if TCP transport)
    pub tcp_type: Option<TcpType>,

    /// Remaining extension attributes in their original order
    pub extensions: Vec<(String, String)>,

    /// Attribute value the candidate was parsed from
    #[serde(skip)]
    pub raw: String,
}

impl Candidate {
    /// Parse from the SDP attribute value (`candidate:...`, without `a=`)
    pub fn from_sdp_attribute(value: &[u8]) -> Result<Self, CandidateParseError> {
        let text = std::str::from_utf8(value).map_err(|_| CandidateParseError::InvalidUtf8)?;
        let body = text
            .trim()
            .strip_prefix(CANDIDATE_PREFIX)
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or(CandidateParseError::MissingPrefix)?;

        let parts: Vec<&str> = body.split_whitespace().collect();
        if parts.len() < 8 {
            return Err(CandidateParseError::TooFewFields(parts.len()));
        }

        let foundation = parts[0].to_string();
        let component_id = parts[1]
            .parse()
            .map_err(|_| CandidateParseError::InvalidComponent(parts[1].to_string()))?;

        let transport = match parts[2].to_ascii_lowercase().as_str() {
            "udp" => TransportProtocol::Udp,
            "tcp" => TransportProtocol::Tcp,
            _ => return Err(CandidateParseError::InvalidTransport(parts[2].to_string())),
        };

        let priority = parts[3]
            .parse()
            .map_err(|_| CandidateParseError::InvalidPriority(parts[3].to_string()))?;

        let connection_address = ConnectionAddress::parse(parts[4])?;

        let port = parts[5]
            .parse::<u16>()
            .map_err(|_| CandidateParseError::InvalidPort(parts[5].to_string()))?;

        if parts[6] != "typ" {
            return Err(CandidateParseError::MissingType(parts[6].to_string()));
        }
        let typ = parts[7].parse()?;

        let mut candidate = Self {
            foundation,
            component_id,
            transport,
            priority,
            connection_address,
            port,
            typ,
            related: None,
            tcp_type: None,
            extensions: Vec::new(),
            raw: text.to_string(),
        };

        // Optional fields come as name/value pairs
        let mut related_address = None;
        let mut related_port = None;
        let mut rest = parts[8..].iter();
        while let Some(&name) = rest.next() {
            let value = *rest
                .next()
                .ok_or_else(|| CandidateParseError::DanglingExtension(name.to_string()))?;

            match name {
                "raddr" => related_address = Some(ConnectionAddress::parse(value)?),
                "rport" => {
                    related_port = Some(
                        value
                            .parse::<u16>()
                            .map_err(|_| CandidateParseError::InvalidPort(value.to_string()))?,
                    )
                }
                "tcptype" => {
                    candidate.tcp_type = match value {
                        "active" => Some(TcpType::Active),
                        "passive" => Some(TcpType::Passive),
                        "so" => Some(TcpType::So),
                        _ => None,
                    };
                }
                _ => candidate.extensions.push((name.to_string(), value.to_string())),
            }
        }

        if let (Some(address), Some(port)) = (related_address, related_port) {
            candidate.related = Some((address, port));
        }

        Ok(candidate)
    }

    /// Convert to SDP attribute value format
    pub fn to_sdp_attribute(&self) -> String {
        let mut parts = vec![
            format!("{}:{}", CANDIDATE_PREFIX, self.foundation),
            self.component_id.to_string(),
            match self.transport {
                TransportProtocol::Udp => "udp",
                TransportProtocol::Tcp => "tcp",
            }
            .to_string(),
            self.priority.to_string(),
            self.connection_address.to_string(),
            self.port.to_string(),
            "typ".to_string(),
            self.typ.to_str().to_string(),
        ];

        if let Some((address, port)) = &self.related {
            parts.extend_from_slice(&[
                "raddr".to_string(),
                address.to_string(),
                "rport".to_string(),
                port.to_string(),
            ]);
        }

        if let Some(tcp_type) = &self.tcp_type {
            parts.extend_from_slice(&[
                "tcptype".to_string(),
                match tcp_type {
                    TcpType::Active => "active",
                    TcpType::Passive => "passive",
                    TcpType::So => "so",
                }
                .to_string(),
            ]);
        }

        for (name, value) in &self.extensions {
            parts.push(name.clone());
            parts.push(value.clone());
        }

        parts.join(" ")
    }

    pub fn is_server_reflexive(&self) -> bool {
        self.typ == CandidateType::ServerReflexive
    }

    /// Store key for the connection address and port
    pub fn correlation_key(&self) -> CorrelationKey {
        match &self.connection_address {
            ConnectionAddress::Ip(ip) => CorrelationKey::new(*ip, self.port),
            ConnectionAddress::Host(host) => CorrelationKey::from_host(host, self.port),
        }
    }
}

impl FromStr for Candidate {
    type Err = CandidateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_sdp_attribute(s.as_bytes())
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} {}:{} foundation={} component={} priority={}",
            self.typ.to_str(),
            self.transport,
            self.connection_address,
            self.port,
            self.foundation,
            self.component_id,
            self.priority
        )?;
        if let Some((address, port)) = &self.related {
            write!(f, " related={}:{}", address, port)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRFLX: &str = "candidate:842163049 1 udp 1677729535 203.0.113.5 4000 typ srflx raddr 10.0.0.7 rport 54321 generation 0 ufrag EsAw network-cost 999";

    #[test]
    fn test_parse_server_reflexive() {
        let candidate: Candidate = SRFLX.parse().unwrap();

        assert_eq!(candidate.foundation, "842163049");
        assert_eq!(candidate.component_id, 1);
        assert_eq!(candidate.transport, TransportProtocol::Udp);
        assert_eq!(candidate.priority, 1677729535);
        assert_eq!(candidate.port, 4000);
        assert!(candidate.is_server_reflexive());
        assert_eq!(
            candidate.related,
            Some((ConnectionAddress::Ip("10.0.0.7".parse().unwrap()), 54321))
        );
        assert_eq!(candidate.extensions.len(), 3);
        assert_eq!(candidate.correlation_key().as_str(), "203.0.113.5:4000");
        assert_eq!(candidate.raw, SRFLX);
    }

    #[test]
    fn test_candidate_sdp_format() {
        let candidate: Candidate = SRFLX.parse().unwrap();
        let sdp = candidate.to_sdp_attribute();
        assert_eq!(sdp, SRFLX);
    }

    #[test]
    fn test_parse_host_variants() {
        let mdns: Candidate = "candidate:1 1 UDP 2122252543 3f1c5a3e-1b7e-4a2c-9b0f-6d2f7b1c0e11.local 61711 typ host"
            .parse()
            .unwrap();
        assert_eq!(mdns.typ, CandidateType::Host);
        assert_eq!(
            mdns.connection_address,
            ConnectionAddress::Host("3f1c5a3e-1b7e-4a2c-9b0f-6d2f7b1c0e11.local".to_string())
        );

        let tcp: Candidate = "candidate:2 1 TCP 1518280447 192.0.2.10 9 typ host tcptype active"
            .parse()
            .unwrap();
        assert_eq!(tcp.transport, TransportProtocol::Tcp);
        assert_eq!(tcp.tcp_type, Some(TcpType::Active));
    }

    #[test]
    fn test_ipv6_key_is_canonical() {
        let candidate: Candidate = "candidate:3 1 udp 1686052607 2001:DB8:0:0::5%eth0 4000 typ srflx"
            .parse()
            .unwrap();
        assert_eq!(candidate.correlation_key().as_str(), "2001:db8::5:4000");

        let peer: std::net::SocketAddr = "[2001:db8::5]:4000".parse().unwrap();
        assert_eq!(candidate.correlation_key(), CorrelationKey::from_socket_addr(peer));
    }

    #[test]
    fn test_parse_errors() {
        let cases: &[(&str, CandidateParseError)] = &[
            ("ice-ufrag:abcd", CandidateParseError::MissingPrefix),
            ("candidate:1 1 udp 100", CandidateParseError::TooFewFields(4)),
            (
                "candidate:1 x udp 100 192.0.2.1 9 typ host",
                CandidateParseError::InvalidComponent("x".to_string()),
            ),
            (
                "candidate:1 1 sctp 100 192.0.2.1 9 typ host",
                CandidateParseError::InvalidTransport("sctp".to_string()),
            ),
            (
                "candidate:1 1 udp high 192.0.2.1 9 typ host",
                CandidateParseError::InvalidPriority("high".to_string()),
            ),
            (
                "candidate:1 1 udp 100 192.0.2.1 99999 typ host",
                CandidateParseError::InvalidPort("99999".to_string()),
            ),
            (
                "candidate:1 1 udp 100 bad:addr 9 typ host",
                CandidateParseError::InvalidAddress("bad:addr".to_string()),
            ),
            (
                "candidate:1 1 udp 100 192.0.2.1 9 type host",
                CandidateParseError::MissingType("type".to_string()),
            ),
            (
                "candidate:1 1 udp 100 192.0.2.1 9 typ bogus",
                CandidateParseError::UnknownType("bogus".to_string()),
            ),
            (
                "candidate:1 1 udp 100 192.0.2.1 9 typ host generation",
                CandidateParseError::DanglingExtension("generation".to_string()),
            ),
        ];

        for (input, expected) in cases {
            assert_eq!(&input.parse::<Candidate>().unwrap_err(), expected, "{}", input);
        }

        assert_eq!(
            Candidate::from_sdp_attribute(&[b'c', 0xFF]).unwrap_err(),
            CandidateParseError::InvalidUtf8
        );
    }
}
