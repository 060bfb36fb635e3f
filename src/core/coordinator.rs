//! Epoch and committee coordination of a single node.

use super::resolver::Resolver;
use super::retry::with_retry;
use super::state::CoordinatorState;
use super::state::NodeDetails;
use super::state::NodeReference;
use crate::chain::EpochCache;
use crate::chain::EpochError;
use crate::chain::EpochInfo;
use crate::chain::Ledger;
use crate::chain::LedgerError;
use crate::chain::DEFAULT_KEY_BUFFER;
use crate::config::NodeConfig;
use crate::key::verify;
use crate::key::ChainAddress;
use crate::key::KeyError;
use crate::key::Pair;
use crate::key::Point;
use crate::key::SIGNATURE_LEN;
use crate::log::Logger;
use crate::net::details::PeerClient;
use crate::net::peer::ConnectionDetails;
use crate::net::peer::Multiaddr;
use crate::net::peer::PeerId;
use crate::net::transport::Transport;
use crate::store::StorageError;
use crate::store::Store;

use anyhow::bail;
use anyhow::Context;
use serde::Deserialize;
use serde::Serialize;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;
use tracing::warn;

const EVENTS_CAPACITY: usize = 16;

/// Collaborators driven by the coordinator.
#[derive(Clone)]
pub struct Collaborators {
    pub ledger: Arc<dyn Ledger>,
    pub store: Arc<dyn Store>,
    pub transport: Arc<dyn Transport>,
    pub peers: Arc<dyn PeerClient>,
}

/// Ledger signalled share handover between two committees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handover {
    pub old_epoch: u64,
    pub new_epoch: u64,
    pub is_new_committee: bool,
}

/// Reason for the node to stop serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shutdown {
    /// Committee of this node is no longer current.
    Superseded { self_epoch: u64, current_epoch: u64 },
    /// Start-up precondition could not be met.
    Fatal(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum VerifyError {
    #[error("public key does not belong to a known committee member")]
    UnknownNode,
    #[error("invalid signature")]
    InvalidSignature,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
#[error("coordinator is stopped")]
pub struct Stopped;

/// Snapshot served by the control endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub address: String,
    pub peer_id: String,
    pub self_epoch: u64,
    pub current_epoch: u64,
    pub is_new_committee: bool,
    pub is_whitelisted: bool,
    pub is_registered: bool,
    pub pss_running: bool,
    pub self_index: Option<u64>,
    pub published_epochs: Vec<u64>,
}

#[derive(Clone)]
pub struct Coordinator(Arc<InnerCoordinator>);

pub struct InnerCoordinator {
    pub(super) pair: Arc<Pair>,
    pub(super) config: NodeConfig,
    pub(super) ledger: Arc<dyn Ledger>,
    pub(super) store: Arc<dyn Store>,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) resolver: Resolver,
    pub(super) epochs: EpochCache,
    pub(super) state: Mutex<CoordinatorState>,
    pub(super) handover: broadcast::Sender<Handover>,
    pub(super) shutdown: broadcast::Sender<Shutdown>,
    pub(super) token: CancellationToken,
    pub(super) tracker: TaskTracker,
    pub(super) log: Logger,
}

impl Deref for Coordinator {
    type Target = InnerCoordinator;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Coordinator {
    /// Reads the active epoch from the ledger. A node provisioned for an
    /// epoch older than the current one must not start.
    pub async fn new(
        pair: Arc<Pair>,
        config: NodeConfig,
        collaborators: Collaborators,
        log: Logger,
    ) -> anyhow::Result<Self> {
        let Collaborators {
            ledger,
            store,
            transport,
            peers,
        } = collaborators;

        let current_epoch = with_retry(&config.retry, "current epoch", &log.span, || {
            ledger.current_epoch()
        })
        .await
        .context("failed to read current epoch")?;

        let self_epoch = config.node.self_epoch;
        if self_epoch < current_epoch {
            bail!("node epoch {self_epoch} is older than current epoch {current_epoch}")
        }
        let state = CoordinatorState::new(self_epoch, current_epoch);
        info!(parent: &log.span, "coordinator: self epoch {self_epoch}, current epoch {current_epoch}, new committee: {}", state.is_new_committee);

        let resolver = Resolver::new(
            Arc::clone(&ledger),
            Arc::clone(&store),
            peers,
            config.retry.clone(),
        );
        let (handover, _) = broadcast::channel(EVENTS_CAPACITY);
        let (shutdown, _) = broadcast::channel(EVENTS_CAPACITY);

        Ok(Self(Arc::new(InnerCoordinator {
            pair,
            config,
            ledger,
            store,
            transport,
            resolver,
            epochs: EpochCache::new(),
            state: Mutex::new(state),
            handover,
            shutdown,
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            log,
        })))
    }

    /// Cancels all monitors and waits for them to finish.
    pub async fn stop(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!(parent: &self.log.span, "coordinator stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Authenticates `msg` as sent by a committee member.
    ///
    /// Only identities published in the registry are trusted: `key` is searched
    /// in the register of `epoch`, or in every register if `epoch` is `None`.
    pub async fn verify(
        &self,
        key: &Point,
        signature: &[u8],
        msg: &[u8],
        epoch: Option<u64>,
    ) -> Result<NodeDetails, VerifyError> {
        let details = self
            .state
            .lock()
            .await
            .find_by_key(key, epoch)
            .map(NodeReference::details)
            .ok_or(VerifyError::UnknownNode)?;

        if !verify(&details.public_key, signature, msg) {
            return Err(VerifyError::InvalidSignature);
        }
        Ok(details)
    }

    pub fn sign(&self, msg: &[u8]) -> Result<[u8; SIGNATURE_LEN], KeyError> {
        self.pair.sign(msg)
    }

    pub fn self_public_key(&self) -> &Point {
        self.pair.public()
    }

    pub fn self_address(&self) -> ChainAddress {
        self.pair.address()
    }

    pub fn self_peer_id(&self) -> PeerId {
        self.transport.self_peer_id()
    }

    pub fn logger(&self) -> &Logger {
        &self.log
    }

    pub fn self_epoch(&self) -> u64 {
        self.config.node.self_epoch
    }

    pub async fn current_epoch(&self) -> u64 {
        self.state.lock().await.current_epoch
    }

    pub async fn is_new_committee(&self) -> bool {
        self.state.lock().await.is_new_committee
    }

    pub async fn is_pss_running(&self) -> bool {
        self.state.lock().await.pss_running
    }

    pub async fn self_index(&self) -> Option<u64> {
        self.state.lock().await.self_index
    }

    pub async fn await_self_index(&self) -> Result<u64, Stopped> {
        loop {
            if let Some(index) = self.self_index().await {
                return Ok(index);
            }
            self.pause().await?;
        }
    }

    /// Waits until the register of `epoch` is published.
    pub async fn await_registry_populated(&self, epoch: u64) -> Result<(), Stopped> {
        self.await_complete_node_list(epoch).await.map(|_| ())
    }

    pub async fn await_complete_node_list(&self, epoch: u64) -> Result<Vec<NodeReference>, Stopped> {
        loop {
            if let Some(list) = self.state.lock().await.node_list(epoch) {
                return Ok(list.to_vec());
            }
            self.pause().await?;
        }
    }

    pub async fn node_by_address(&self, address: ChainAddress) -> Option<NodeReference> {
        self.state.lock().await.find_by_address(address).cloned()
    }

    pub async fn node_by_epoch_and_index(&self, epoch: u64, index: u64) -> Option<NodeReference> {
        self.state.lock().await.find_by_index(epoch, index).cloned()
    }

    /// Epoch record, memoized unless `skip_cache` is set.
    pub async fn epoch_info(&self, epoch: u64, skip_cache: bool) -> Result<EpochInfo, EpochError> {
        self.epochs.get(self.ledger.as_ref(), epoch, skip_cache).await
    }

    pub async fn previous_epoch(&self) -> Result<u64, EpochError> {
        let current = self.current_epoch().await;
        Ok(self.epoch_info(current, false).await?.prev_epoch)
    }

    pub async fn next_epoch(&self) -> Result<u64, EpochError> {
        let current = self.current_epoch().await;
        Ok(self.epoch_info(current, false).await?.next_epoch)
    }

    /// Checks `key` against the local key index only.
    pub async fn validate_epoch_pub_key(&self, address: ChainAddress, key: &Point) -> bool {
        match self.store.get_node_pub_key(address).await {
            Ok(known) => known == *key,
            Err(_) => false,
        }
    }

    /// Public key recorded for `address`: local key index, or the ledger on a miss.
    /// Keys fetched from the ledger are written back to the index.
    pub async fn node_pub_key(&self, address: ChainAddress) -> Result<Point, LookupError> {
        match self.store.get_node_pub_key(address).await {
            Ok(key) => return Ok(key),
            Err(StorageError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let key = self.ledger.node_metadata(address).await?.public_key;
        self.store.put_node_pub_key(address, key).await?;
        Ok(key)
    }

    pub async fn key_buffer(&self) -> u64 {
        match self.ledger.key_buffer().await {
            Ok(size) => size,
            Err(e) => {
                warn!(parent: &self.log.span, "key buffer: {e}, using default {DEFAULT_KEY_BUFFER}");
                DEFAULT_KEY_BUFFER
            }
        }
    }

    /// Transport strings of this node served to its peers.
    pub fn connection_details(&self) -> ConnectionDetails {
        ConnectionDetails {
            tm_connection: self.config.tm_p2p_connection(),
            p2p_connection: Multiaddr::format(
                &self.config.node.ip_address,
                self.config.node.p2p_port,
                &self.self_peer_id(),
            ),
        }
    }

    pub async fn status(&self) -> Status {
        let state = self.state.lock().await;
        Status {
            address: self.self_address().to_string(),
            peer_id: self.self_peer_id().to_string(),
            self_epoch: state.self_epoch,
            current_epoch: state.current_epoch,
            is_new_committee: state.is_new_committee,
            is_whitelisted: state.is_whitelisted,
            is_registered: state.is_registered,
            pss_running: state.pss_running,
            self_index: state.self_index,
            published_epochs: state
                .registry
                .iter()
                .filter(|(_, r)| r.is_published())
                .map(|(epoch, _)| *epoch)
                .collect(),
        }
    }

    pub fn subscribe_handover(&self) -> broadcast::Receiver<Handover> {
        self.handover.subscribe()
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<Shutdown> {
        self.shutdown.subscribe()
    }

    pub(super) fn signal_shutdown(&self, reason: Shutdown) {
        if self.shutdown.send(reason).is_err() {
            warn!(parent: &self.log.span, "shutdown signal has no receivers");
        }
    }

    async fn pause(&self) -> Result<(), Stopped> {
        tokio::select! {
            () = self.token.cancelled() => Err(Stopped),
            () = tokio::time::sleep(self.config.intervals.await_poll) => Ok(()),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LookupError {
    #[error("key index: {0}")]
    Storage(#[from] StorageError),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
}
