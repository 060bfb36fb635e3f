//! Signed exchange of connection details between nodes.

use super::peer::ConnectionDetails;
use crate::key::verify;
use crate::key::ChainAddress;
use crate::key::Pair;
use crate::key::Point;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing::warn;

pub const CONNECTION_DETAILS_METHOD: &str = "ConnectionDetails";
/// Separator of signed message fields.
pub const DELIMITER: &str = "\x1c";
/// Requests signed earlier than this are rejected.
pub const MAX_MESSAGE_AGE: Duration = Duration::from_secs(10 * 60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-RPC error codes.
pub const INVALID_PARAMS: i64 = -32602;
pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDetailsMessage {
    pub timestamp: String,
    pub message: String,
    pub node_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDetailsParams {
    pub pubkeyx: String,
    pub pubkeyy: String,
    pub connection_details_message: ConnectionDetailsMessage,
    #[serde(with = "hex_signature")]
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDetailsResult {
    pub tm_p2p_connection: String,
    pub p2p_connection: String,
}

impl From<ConnectionDetailsResult> for ConnectionDetails {
    fn from(r: ConnectionDetailsResult) -> Self {
        Self {
            tm_connection: r.tm_p2p_connection,
            p2p_connection: r.p2p_connection,
        }
    }
}

impl From<ConnectionDetails> for ConnectionDetailsResult {
    fn from(d: ConnectionDetails) -> Self {
        Self {
            tm_p2p_connection: d.tm_connection,
            p2p_connection: d.p2p_connection,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest<P> {
    pub jsonrpc: String,
    pub method: String,
    pub id: serde_json::Value,
    pub params: P,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse<R> {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<R>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PeerError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("request to {url}: {reason}")]
    Request { url: String, reason: String },
    #[error("peer answered with error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("message is not ConnectionDetails")]
    WrongMessage,
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("signature expired")]
    Expired,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("signing: {0}")]
    Signing(String),
}

impl ConnectionDetailsMessage {
    pub fn new(node_address: ChainAddress, timestamp: i64) -> Self {
        Self {
            timestamp: timestamp.to_string(),
            message: CONNECTION_DETAILS_METHOD.into(),
            node_address: node_address.to_string(),
        }
    }

    /// Bytes covered by the signature.
    pub fn signed_string(&self) -> String {
        [
            self.timestamp.as_str(),
            self.message.as_str(),
            self.node_address.as_str(),
        ]
        .join(DELIMITER)
    }

    /// Checks message text, age relative to `now` (unix seconds), and signature.
    pub fn validate(&self, public: &Point, signature: &[u8], now: i64) -> Result<(), PeerError> {
        if self.message != CONNECTION_DETAILS_METHOD {
            return Err(PeerError::WrongMessage);
        }
        let signed_at: i64 = self
            .timestamp
            .parse()
            .map_err(|_| PeerError::InvalidTimestamp(self.timestamp.clone()))?;
        let max_age = i64::try_from(MAX_MESSAGE_AGE.as_secs()).unwrap_or(i64::MAX);
        if signed_at.saturating_add(max_age) < now {
            return Err(PeerError::Expired);
        }
        if !verify(public, signature, self.signed_string().as_bytes()) {
            return Err(PeerError::InvalidSignature);
        }

        Ok(())
    }
}

impl ConnectionDetailsParams {
    pub fn signed(pair: &Pair, now: i64) -> Result<Self, PeerError> {
        let message = ConnectionDetailsMessage::new(pair.address(), now);
        let signature = pair
            .sign(message.signed_string().as_bytes())
            .map_err(|e| PeerError::Signing(e.to_string()))?;

        Ok(Self {
            pubkeyx: pair.public().x_hex(),
            pubkeyy: pair.public().y_hex(),
            connection_details_message: message,
            signature: signature.to_vec(),
        })
    }

    pub fn public_key(&self) -> Result<Point, PeerError> {
        Point::from_hex(&self.pubkeyx, &self.pubkeyy).map_err(|_| PeerError::InvalidPublicKey)
    }
}

/// Fetches connection details directly from a peer.
#[async_trait]
pub trait PeerClient: Send + Sync + 'static {
    /// `endpoint` is the declared `host[:port]` of the peer HTTP server.
    async fn request_connection_details(
        &self,
        endpoint: &str,
    ) -> Result<ConnectionDetails, PeerError>;
}

pub struct HttpPeerClient {
    client: reqwest::Client,
    signer: Arc<Pair>,
}

impl HttpPeerClient {
    pub fn new(signer: Arc<Pair>) -> Result<Self, PeerError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PeerError::Request {
                url: String::new(),
                reason: e.to_string(),
            })?;

        Ok(Self { client, signer })
    }

    async fn post(
        &self,
        url: &str,
        body: &RpcRequest<ConnectionDetailsParams>,
    ) -> Result<ConnectionDetails, PeerError> {
        let request_err = |reason: String| PeerError::Request {
            url: url.to_owned(),
            reason,
        };

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| request_err(e.to_string()))?;
        if response.status().as_u16() >= 400 {
            return Err(request_err(format!("status {}", response.status())));
        }

        let response: RpcResponse<ConnectionDetailsResult> = response
            .json()
            .await
            .map_err(|e| request_err(e.to_string()))?;
        if let Some(err) = response.error {
            return Err(PeerError::Remote {
                code: err.code,
                message: err.data.unwrap_or(err.message),
            });
        }
        response
            .result
            .map(ConnectionDetails::from)
            .ok_or_else(|| request_err("response without result".into()))
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn request_connection_details(
        &self,
        endpoint: &str,
    ) -> Result<ConnectionDetails, PeerError> {
        let now = chrono::Utc::now().timestamp();
        let body = RpcRequest {
            jsonrpc: "2.0".into(),
            method: CONNECTION_DETAILS_METHOD.into(),
            id: serde_json::json!(10),
            params: ConnectionDetailsParams::signed(&self.signer, now)?,
        };

        let mut last_err = PeerError::InvalidEndpoint(endpoint.to_owned());
        for url in candidate_urls(endpoint)? {
            match self.post(&url, &body).await {
                Ok(details) => {
                    debug!("connection details from {url}: {details:?}");
                    return Ok(details);
                }
                // Authentication errors will not change with another scheme.
                Err(e @ PeerError::Remote { .. }) => return Err(e),
                Err(e) => {
                    warn!("could not get connection details: {e}");
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }
}

/// Urls tried in order: `http://host:port/rpc`, `https://host/rpc`, `http://host/rpc`.
pub fn candidate_urls(endpoint: &str) -> Result<Vec<String>, PeerError> {
    let mut parts = endpoint.split(':');
    let host = parts
        .next()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| PeerError::InvalidEndpoint(endpoint.to_owned()))?;

    let mut urls = Vec::with_capacity(3);
    if let Some(port) = parts.next().filter(|p| !p.is_empty()) {
        urls.push(format!("http://{host}:{port}/rpc"));
    }
    urls.push(format!("https://{host}/rpc"));
    urls.push(format!("http://{host}/rpc"));
    Ok(urls)
}

mod hex_signature {
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(sig: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(sig)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(d)?;
        hex::decode(raw.strip_prefix("0x").unwrap_or(&raw)).map_err(serde::de::Error::custom)
    }
}
