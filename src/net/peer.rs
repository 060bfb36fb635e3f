use crate::key::Point;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use std::fmt::Display;

/// Transport identity of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Peer id of a node owning `public` key: hex sha256 of the compressed point.
    pub fn from_public_key(public: &Point) -> Self {
        Self(hex::encode(Sha256::digest(public.compressed())))
    }

    /// Extracts the peer id from the last `/p2p/<id>` (or legacy `/ipfs/<id>`) component.
    pub fn from_connection(p2p_connection: &str) -> Result<Self, InvalidMultiaddr> {
        Multiaddr::parse(p2p_connection).map(|addr| addr.peer_id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport strings of a node: consensus layer and peer-to-peer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionDetails {
    pub tm_connection: String,
    pub p2p_connection: String,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("invalid p2p connection string: {0}")]
pub struct InvalidMultiaddr(pub String);

/// Parsed `/<ip4|ip6|dns4|dns6>/<host>/tcp/<port>/p2p/<peer id>` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Multiaddr {
    pub host: String,
    pub port: u16,
    pub peer_id: PeerId,
}

impl Multiaddr {
    pub fn parse(raw: &str) -> Result<Self, InvalidMultiaddr> {
        let invalid = || InvalidMultiaddr(raw.to_owned());
        let parts: Vec<&str> = raw.split('/').collect();
        // Leading '/' yields an empty first segment.
        if parts.first() != Some(&"") {
            return Err(invalid());
        }

        let mut host = None;
        let mut port = None;
        let mut peer_id = None;
        let mut segments = parts[1..].iter();
        while let Some(protocol) = segments.next() {
            let value = segments.next().filter(|v| !v.is_empty()).ok_or_else(invalid)?;
            match *protocol {
                "ip4" | "dns4" | "dns6" | "dns" => host = Some((*value).to_owned()),
                "ip6" => host = Some(format!("[{value}]")),
                "tcp" => port = Some(value.parse::<u16>().map_err(|_| invalid())?),
                "p2p" | "ipfs" => peer_id = Some(PeerId((*value).to_owned())),
                _ => return Err(invalid()),
            }
        }

        match (host, port, peer_id) {
            (Some(host), Some(port), Some(peer_id)) => Ok(Self {
                host,
                port,
                peer_id,
            }),
            _ => Err(invalid()),
        }
    }

    /// `host:port` suitable for a TCP connect.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn format(host: &str, port: u16, peer_id: &PeerId) -> String {
        let protocol = if host.parse::<std::net::Ipv4Addr>().is_ok() {
            "ip4"
        } else if host.parse::<std::net::Ipv6Addr>().is_ok() {
            "ip6"
        } else {
            "dns4"
        };
        format!("/{protocol}/{host}/tcp/{port}/p2p/{peer_id}")
    }
}
