//! LAN peer transfer: every device serves its photos over plain HTTP and
//! pulls missing ones from the others.

pub mod client;
pub mod server;

pub use client::PeerClient;
pub use server::{build_router, PeerServer, ServerState};

use crate::{PhotoSyncError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Route prefix of the peer wire protocol.
pub const PHOTO_ROUTE_PREFIX: &str = "/photo";

/// Another device's peer transfer server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerEndpoint {
    pub host: String,
    pub port: u16,
}

impl PeerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Base URL of the peer, bracketing IPv6 literals.
    pub fn base_url(&self) -> String {
        format!("http://{}", self)
    }
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for PeerEndpoint {
    type Err = PhotoSyncError;

    /// Parse `host:port` or `[v6]:port`.
    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| PhotoSyncError::InvalidInput(format!("peer {:?} has no port", s)))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(PhotoSyncError::InvalidInput(format!("peer {:?} has no host", s)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| PhotoSyncError::InvalidInput(format!("peer {:?}: {}", s, e)))?;
        Ok(Self::new(host, port))
    }
}
