//! Responder configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NatError, NatResult};
use crate::stun::{DEFAULT_PORT, SOFTWARE};
use crate::storage::{DEFAULT_COLLECT_INTERVAL, DEFAULT_ENTRY_TTL};

/// Responder, store and audit settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// UDP listen address
    pub listen_addr: SocketAddr,
    /// How long a request waits to be claimed by a candidate
    pub entry_ttl: Duration,
    /// Period of the expiry sweep
    pub collect_interval: Duration,
    /// CSV audit log; in-memory when unset
    pub audit_log: Option<PathBuf>,
    /// SOFTWARE attribute in responses
    pub software: String,
    /// ICE server handed out when the Origin header is unusable
    pub ice_fallback: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            entry_ttl: DEFAULT_ENTRY_TTL,
            collect_interval: DEFAULT_COLLECT_INTERVAL,
            audit_log: None,
            software: SOFTWARE.to_string(),
            ice_fallback: "stun:stun.l.google.com:19302".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> NatResult<()> {
        if self.entry_ttl.is_zero() {
            return Err(NatError::Configuration("entry TTL must be positive".to_string()));
        }
        if self.collect_interval.is_zero() {
            return Err(NatError::Configuration(
                "collect interval must be positive".to_string(),
            ));
        }
        if self.collect_interval > self.entry_ttl {
            return Err(NatError::Configuration(format!(
                "collect interval {:?} exceeds entry TTL {:?}",
                self.collect_interval, self.entry_ttl
            )));
        }
        if !self.ice_fallback.starts_with("stun:") {
            return Err(NatError::Configuration(format!(
                "ICE fallback {:?} is not a stun: URL",
                self.ice_fallback
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_addr.port(), 3478);
        assert_eq!(config.entry_ttl, Duration::from_secs(60));
        assert_eq!(config.collect_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_rejects_bad_timing() {
        let cases = [
            (Duration::ZERO, Duration::from_secs(2)),
            (Duration::from_secs(60), Duration::ZERO),
            (Duration::from_secs(1), Duration::from_secs(2)),
        ];

        for (entry_ttl, collect_interval) in cases {
            let config = ServerConfig {
                entry_ttl,
                collect_interval,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(NatError::Configuration(_))));
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"listen_addr":"127.0.0.1:3479","audit_log":"packets.log"}"#).unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:3479".parse().unwrap());
        assert_eq!(config.audit_log, Some(PathBuf::from("packets.log")));
        assert_eq!(config.entry_ttl, DEFAULT_ENTRY_TTL);
        assert_eq!(config.software, SOFTWARE);
    }
}
