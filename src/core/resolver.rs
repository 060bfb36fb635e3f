//! Turns an on-ledger node address into a reachable [`NodeReference`].

use super::retry::with_retry;
use super::state::NodeReference;
use crate::chain::Ledger;
use crate::chain::LedgerError;
use crate::config::RetryPolicy;
use crate::key::ChainAddress;
use crate::net::details::PeerClient;
use crate::net::peer::ConnectionDetails;
use crate::net::peer::InvalidMultiaddr;
use crate::net::peer::PeerId;
use crate::store::Store;

use std::sync::Arc;
use tracing::debug;
use tracing::warn;
use tracing::Span;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("node metadata: {0}")]
    Ledger(#[from] LedgerError),
    #[error("connection details of {0} are unavailable")]
    Unavailable(ChainAddress),
    #[error(transparent)]
    InvalidConnection(#[from] InvalidMultiaddr),
}

pub struct Resolver {
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn Store>,
    peers: Arc<dyn PeerClient>,
    retry: RetryPolicy,
}

impl Resolver {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn Store>,
        peers: Arc<dyn PeerClient>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            store,
            peers,
            retry,
        }
    }

    /// Ledger announced transport strings are used as is. Otherwise the node is asked
    /// directly over its declared endpoint, and the local cache serves as a fallback.
    pub async fn resolve(
        &self,
        address: ChainAddress,
        span: &Span,
    ) -> Result<NodeReference, ResolveError> {
        let meta = self.ledger.node_metadata(address).await?;

        let details = match meta.announced_connection() {
            Some((tm, p2p)) => ConnectionDetails {
                tm_connection: tm.to_owned(),
                p2p_connection: p2p.to_owned(),
            },
            None => self.request_details(address, &meta.declared_ip, span).await?,
        };
        let peer_id = PeerId::from_connection(&details.p2p_connection)?;

        Ok(NodeReference {
            address,
            peer_id,
            index: meta.position,
            public_key: meta.public_key,
            tm_connection: details.tm_connection,
            p2p_connection: details.p2p_connection,
        })
    }

    async fn request_details(
        &self,
        address: ChainAddress,
        endpoint: &str,
        span: &Span,
    ) -> Result<ConnectionDetails, ResolveError> {
        let live = if endpoint.is_empty() {
            None
        } else {
            let label = format!("connection details of {address}");
            match with_retry(&self.retry, &label, span, || {
                self.peers.request_connection_details(endpoint)
            })
            .await
            {
                Ok(details) => Some(details),
                Err(e) => {
                    warn!(parent: span, "{label} from {endpoint}: {e}");
                    None
                }
            }
        };

        if let Some(details) = live {
            if let Err(e) = self.store.put_connection_details(address, &details).await {
                warn!(parent: span, "caching connection details of {address}: {e}");
            }
            return Ok(details);
        }

        match self.store.get_connection_details(address).await {
            Ok(details) => {
                debug!(parent: span, "using cached connection details of {address}");
                Ok(details)
            }
            Err(_) => Err(ResolveError::Unavailable(address)),
        }
    }
}
