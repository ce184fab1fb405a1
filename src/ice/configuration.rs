// src/ice/configuration.rs
//! `RTCConfiguration` ICE server list handed to browsers

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

/// One entry of `iceServers`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
}

/// `{"iceServers":[{"urls":[...]}]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceConfiguration {
    #[serde(rename = "iceServers")]
    pub ice_servers: Vec<IceServer>,
}

impl IceConfiguration {
    /// Single STUN server configuration
    pub fn single(url: impl Into<String>) -> Self {
        Self {
            ice_servers: vec![IceServer { urls: vec![url.into()] }],
        }
    }

    /// Point the browser at this responder on the host it loaded the page from
    ///
    /// `origin` is the value of the HTTP `Origin` header. When it is missing,
    /// fails to parse as a URL or has no host, `fallback` (a complete `stun:`
    /// URL) is used instead.
    pub fn for_origin(origin: Option<&str>, stun_port: u16, fallback: &str) -> Self {
        let origin = match origin.map(str::trim).filter(|o| !o.is_empty()) {
            Some(origin) => origin,
            None => return Self::single(fallback),
        };

        match origin_host(origin) {
            Some(host) => {
                let url = format!("stun:{}:{}", host, stun_port);
                debug!("ice: sending ice-server {:?} for origin {:?}", url, origin);
                Self::single(url)
            }
            None => {
                warn!("ice: failed to parse origin {:?}", origin);
                Self::single(fallback)
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Host of an absolute origin URL, port removed; IPv6 literals keep their brackets
fn origin_host(origin: &str) -> Option<String> {
    let url = match Url::parse(origin) {
        Ok(url) => url,
        Err(e) => {
            debug!("ice: origin {:?}: {}", origin, e);
            return None;
        }
    };

    url.host_str().filter(|h| !h.is_empty()).map(str::to_string)
}
