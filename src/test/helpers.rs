//! In-memory collaborators for coordinator tests.

use crate::chain::EpochInfo;
use crate::chain::Ledger;
use crate::chain::LedgerError;
use crate::chain::NodeMetadata;
use crate::chain::Registration;
use crate::key::ChainAddress;
use crate::key::Pair;
use crate::net::details::PeerClient;
use crate::net::details::PeerError;
use crate::net::peer::ConnectionDetails;
use crate::net::peer::Multiaddr;
use crate::net::peer::PeerId;
use crate::net::transport::Transport;
use crate::net::transport::TransportError;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Ledger metadata of a committee member announcing both transport strings.
pub fn node_metadata(pair: &Pair, position: u64) -> NodeMetadata {
    let host = format!("10.0.0.{position}");
    let peer_id = PeerId::from_public_key(pair.public());
    NodeMetadata {
        declared_ip: format!("{host}:8080"),
        position,
        public_key: *pair.public(),
        tm_connection: Some(format!("tm{position}@{host}:26656")),
        p2p_connection: Some(Multiaddr::format(&host, 1080, &peer_id)),
    }
}

#[derive(Default)]
struct LedgerState {
    current_epoch: u64,
    epochs: BTreeMap<u64, EpochInfo>,
    whitelist: BTreeSet<(u64, ChainAddress)>,
    registered: BTreeSet<(u64, ChainAddress)>,
    registrations: Vec<(u64, Registration)>,
    reject_registration: bool,
    /// Scripted PSS flag values, the last one is repeated once exhausted.
    pss: VecDeque<bool>,
    pss_last: bool,
    members: BTreeMap<u64, Vec<ChainAddress>>,
    metadata: BTreeMap<ChainAddress, NodeMetadata>,
    key_buffer: Option<u64>,
    epoch_info_calls: usize,
    pss_calls: usize,
}

pub struct MemLedger(Mutex<LedgerState>);

impl MemLedger {
    pub fn new(current_epoch: u64) -> Self {
        Self(Mutex::new(LedgerState {
            current_epoch,
            ..Default::default()
        }))
    }

    fn with<T>(&self, f: impl FnOnce(&mut LedgerState) -> T) -> T {
        f(&mut self.0.lock().unwrap())
    }

    pub fn set_current_epoch(&self, epoch: u64) {
        self.with(|s| s.current_epoch = epoch);
    }

    pub fn set_epoch_info(&self, info: EpochInfo) {
        self.with(|s| s.epochs.insert(info.id, info));
    }

    pub fn epoch_info_calls(&self) -> usize {
        self.with(|s| s.epoch_info_calls)
    }

    pub fn whitelist(&self, epoch: u64, node: ChainAddress) {
        self.with(|s| s.whitelist.insert((epoch, node)));
    }

    pub fn set_registered(&self, epoch: u64, node: ChainAddress) {
        self.with(|s| s.registered.insert((epoch, node)));
    }

    pub fn reject_registration(&self, reject: bool) {
        self.with(|s| s.reject_registration = reject);
    }

    pub fn registrations(&self) -> Vec<(u64, Registration)> {
        self.with(|s| s.registrations.clone())
    }

    pub fn script_pss(&self, values: &[bool]) {
        self.with(|s| s.pss.extend(values));
    }

    pub fn pss_calls(&self) -> usize {
        self.with(|s| s.pss_calls)
    }

    pub fn set_members(&self, epoch: u64, members: Vec<ChainAddress>) {
        self.with(|s| s.members.insert(epoch, members));
    }

    pub fn set_node_metadata(&self, node: ChainAddress, meta: NodeMetadata) {
        self.with(|s| s.metadata.insert(node, meta));
    }

    pub fn set_key_buffer(&self, size: u64) {
        self.with(|s| s.key_buffer = Some(size));
    }
}

#[async_trait]
impl Ledger for MemLedger {
    async fn dial(&self) -> Result<(), LedgerError> {
        Ok(())
    }

    async fn current_epoch(&self) -> Result<u64, LedgerError> {
        Ok(self.with(|s| s.current_epoch))
    }

    async fn epoch_info(&self, epoch: u64) -> Result<EpochInfo, LedgerError> {
        Ok(self.with(|s| {
            s.epoch_info_calls += 1;
            s.epochs.get(&epoch).copied().unwrap_or_default()
        }))
    }

    async fn is_whitelisted(&self, epoch: u64, node: ChainAddress) -> Result<bool, LedgerError> {
        Ok(self.with(|s| s.whitelist.contains(&(epoch, node))))
    }

    async fn is_registered(&self, epoch: u64, node: ChainAddress) -> Result<bool, LedgerError> {
        Ok(self.with(|s| s.registered.contains(&(epoch, node))))
    }

    async fn register(&self, epoch: u64, reg: &Registration) -> Result<String, LedgerError> {
        self.with(|s| {
            if s.reject_registration {
                return Err(LedgerError::Rejected("execution reverted".into()));
            }
            s.registered.insert((epoch, reg.public_key.address()));
            s.registrations.push((epoch, reg.clone()));
            Ok(format!("0x{:064x}", s.registrations.len()))
        })
    }

    async fn pss_status(&self, _old_epoch: u64, _new_epoch: u64) -> Result<bool, LedgerError> {
        Ok(self.with(|s| {
            s.pss_calls += 1;
            if let Some(value) = s.pss.pop_front() {
                s.pss_last = value;
            }
            s.pss_last
        }))
    }

    async fn members_of(&self, epoch: u64) -> Result<Vec<ChainAddress>, LedgerError> {
        Ok(self.with(|s| s.members.get(&epoch).cloned().unwrap_or_default()))
    }

    async fn node_metadata(&self, node: ChainAddress) -> Result<NodeMetadata, LedgerError> {
        self.with(|s| s.metadata.get(&node).cloned())
            .ok_or(LedgerError::UnknownNode(node))
    }

    async fn key_buffer(&self) -> Result<u64, LedgerError> {
        self.with(|s| s.key_buffer)
            .ok_or_else(|| LedgerError::Rpc("bufferSize reverted".into()))
    }
}

/// Transport reaching every peer except those marked unreachable.
pub struct MockTransport {
    self_id: PeerId,
    unreachable: Mutex<BTreeSet<PeerId>>,
    dialed: Mutex<Vec<PeerId>>,
}

impl MockTransport {
    pub fn new(self_id: PeerId) -> Self {
        Self {
            self_id,
            unreachable: Mutex::default(),
            dialed: Mutex::default(),
        }
    }

    pub fn set_reachable(&self, peer: &PeerId, reachable: bool) {
        let mut unreachable = self.unreachable.lock().unwrap();
        if reachable {
            unreachable.remove(peer);
        } else {
            unreachable.insert(peer.clone());
        }
    }

    pub fn dialed(&self) -> Vec<PeerId> {
        self.dialed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn dial(&self, peer: &PeerId, p2p_connection: &str) -> Result<(), TransportError> {
        if PeerId::from_connection(p2p_connection)? != *peer {
            return Err(TransportError::Io("peer id mismatch".into()));
        }
        self.dialed.lock().unwrap().push(peer.clone());
        if self.unreachable.lock().unwrap().contains(peer) {
            return Err(TransportError::Timeout);
        }
        Ok(())
    }

    fn self_peer_id(&self) -> PeerId {
        self.self_id.clone()
    }
}

/// Peer client answering from a fixed table keyed by endpoint.
#[derive(Default)]
pub struct MockPeerClient {
    details: Mutex<BTreeMap<String, ConnectionDetails>>,
    calls: Mutex<usize>,
}

impl MockPeerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_details(&self, endpoint: &str, details: ConnectionDetails) {
        self.details
            .lock()
            .unwrap()
            .insert(endpoint.to_owned(), details);
    }

    pub fn remove_details(&self, endpoint: &str) {
        self.details.lock().unwrap().remove(endpoint);
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl PeerClient for MockPeerClient {
    async fn request_connection_details(
        &self,
        endpoint: &str,
    ) -> Result<ConnectionDetails, PeerError> {
        *self.calls.lock().unwrap() += 1;
        self.details
            .lock()
            .unwrap()
            .get(endpoint)
            .cloned()
            .ok_or_else(|| PeerError::Request {
                url: endpoint.to_owned(),
                reason: "connection refused".into(),
            })
    }
}
