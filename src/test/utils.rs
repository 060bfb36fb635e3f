//! Helpers for coordinator scenario tests.

use super::helpers::node_metadata;
use super::helpers::MemLedger;
use super::helpers::MockPeerClient;
use super::helpers::MockTransport;
use crate::chain::EpochInfo;
use crate::config::ChainSection;
use crate::config::Intervals;
use crate::config::NodeConfig;
use crate::config::NodeSection;
use crate::config::RetryPolicy;
use crate::core::Collaborators;
use crate::core::Coordinator;
use crate::key::Pair;
use crate::log::Logger;
use crate::net::peer::PeerId;
use crate::store::memstore::MemStore;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const TICK: Duration = Duration::from_millis(10);
const WAIT_LIMIT: Duration = Duration::from_secs(5);

pub fn test_config(self_epoch: u64) -> NodeConfig {
    NodeConfig {
        node: NodeSection {
            ip_address: "127.0.0.1".into(),
            domain: None,
            http_port: 8080,
            control_port: 8888,
            p2p_port: 1080,
            tm_p2p_port: 26656,
            tm_node_id: "self".into(),
            data_dir: std::env::temp_dir(),
            self_epoch,
            announce_connection_details: false,
        },
        chain: ChainSection {
            rpc_url: "http://127.0.0.1:8545".into(),
            contract_address: "0x5fbdb2315678afecb367f032d93f642f64180aa3"
                .parse()
                .unwrap(),
        },
        intervals: Intervals {
            whitelist: TICK,
            registration: TICK,
            membership: TICK,
            pss: TICK,
            epoch: TICK,
            await_poll: Duration::from_millis(5),
        },
        retry: RetryPolicy {
            attempts: 2,
            delay: Duration::from_millis(1),
        },
    }
}

pub fn epoch_info(id: u64, n: u64) -> EpochInfo {
    EpochInfo {
        id,
        n,
        k: n / 2 + 1,
        t: n / 4,
        prev_epoch: id - 1,
        next_epoch: id + 1,
    }
}

/// Node under test with in-memory collaborators.
pub struct TestNode {
    pub pair: Arc<Pair>,
    pub coordinator: Coordinator,
    pub ledger: Arc<MemLedger>,
    pub store: Arc<MemStore>,
    pub transport: Arc<MockTransport>,
    pub peers: Arc<MockPeerClient>,
}

impl TestNode {
    pub async fn start(ledger: Arc<MemLedger>, config: NodeConfig) -> anyhow::Result<Self> {
        Self::with_pair(Pair::generate(), ledger, config).await
    }

    pub async fn with_pair(
        pair: Pair,
        ledger: Arc<MemLedger>,
        config: NodeConfig,
    ) -> anyhow::Result<Self> {
        let pair = Arc::new(pair);
        let store = Arc::new(MemStore::new());
        let transport = Arc::new(MockTransport::new(PeerId::from_public_key(pair.public())));
        let peers = Arc::new(MockPeerClient::new());

        let collaborators = Collaborators {
            ledger: ledger.clone(),
            store: store.clone(),
            transport: transport.clone(),
            peers: peers.clone(),
        };
        let logger = Logger::register_node(&pair.address().to_string());
        let coordinator = Coordinator::new(Arc::clone(&pair), config, collaborators, logger).await?;

        Ok(Self {
            pair,
            coordinator,
            ledger,
            store,
            transport,
            peers,
        })
    }
}

/// Lists `n` generated members (positions `1..=n`) of `epoch` on the ledger.
/// Member at `self_position` uses `self_pair`.
pub fn committee(ledger: &MemLedger, epoch: u64, n: u64, self_pair: Option<(&Pair, u64)>) -> Vec<Pair> {
    let mut pairs = Vec::new();
    let mut members = Vec::new();
    for position in 1..=n {
        let pair = match self_pair {
            Some((own, own_position)) if own_position == position => {
                Pair::from_bytes(&own.private_bytes()).unwrap()
            }
            _ => Pair::generate(),
        };
        ledger.set_node_metadata(pair.address(), node_metadata(&pair, position));
        members.push(pair.address());
        pairs.push(pair);
    }
    ledger.set_members(epoch, members);
    ledger.set_epoch_info(epoch_info(epoch, n));
    pairs
}

/// Polls `check` until it holds or a generous limit elapses.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(TICK / 2).await;
    }
    false
}
