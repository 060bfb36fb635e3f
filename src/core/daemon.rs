use super::coordinator::Collaborators;
use super::coordinator::Coordinator;
use super::coordinator::Shutdown;
use crate::chain::eth::EthLedger;
use crate::chain::Ledger;
use crate::config::NodeConfig;
use crate::key::store::KeyStore;
use crate::log::Logger;
use crate::net::control::start_control;
use crate::net::details::HttpPeerClient;
use crate::net::peer::PeerId;
use crate::net::public::start_public;
use crate::net::transport::TcpTransport;
use crate::net::utils::ControlListener;
use crate::net::utils::NewTcpListener;
use crate::net::utils::NodeListener;
use crate::net::utils::StartServerError;
use crate::store::file::FileStore;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::error;
use tracing::info;

pub struct Daemon {
    coordinator: Coordinator,
    transport: Arc<TcpTransport>,
    logger: Logger,
    pub stop_daemon: broadcast::Sender<()>,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl Daemon {
    /// Builds node collaborators from `config`. Unreachable ledger or a node
    /// epoch older than the current one are start-up fatal.
    pub async fn new(config: NodeConfig) -> Result<Self> {
        let data_dir = config.node.data_dir.clone();
        let pair = KeyStore::set(&data_dir)
            .load_pair()
            .with_context(|| format!("loading node key from {}", data_dir.display()))?;
        let pair = Arc::new(pair);
        let logger = Logger::register_node(&pair.address().to_string());
        info!(parent: &logger.span, "daemon initializing: data_dir {}, endpoint {}", data_dir.display(), config.public_endpoint());

        let ledger = EthLedger::new(
            &config.chain.rpc_url,
            config.chain.contract_address,
            Arc::clone(&pair),
        )?;
        ledger
            .dial()
            .await
            .with_context(|| format!("ledger {} is unreachable", config.chain.rpc_url))?;

        let store = FileStore::open(&data_dir).await?;
        let transport = TcpTransport::start(
            PeerId::from_public_key(pair.public()),
            config.node.p2p_port,
            logger.new_child("transport").span,
        )
        .await?;
        let transport = Arc::new(transport);
        let peers = HttpPeerClient::new(Arc::clone(&pair))?;

        let collaborators = Collaborators {
            ledger: Arc::new(ledger),
            store: Arc::new(store),
            transport: Arc::clone(&transport) as _,
            peers: Arc::new(peers),
        };
        let coordinator = Coordinator::new(pair, config, collaborators, logger.clone()).await?;
        let (stop_daemon, _) = broadcast::channel(1);

        Ok(Self {
            coordinator,
            transport,
            logger,
            stop_daemon,
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Serves until interrupted, stopped over the control port, or told to
    /// shut down by the coordinator. Fatal coordinator shutdown is an error.
    pub async fn run(self, control_port: u16, http_port: u16) -> Result<()> {
        let control = ControlListener::bind(control_port)
            .await
            .map_err(StartServerError::FailedToStartControl)?;
        let public = NodeListener::bind(http_port)
            .await
            .map_err(StartServerError::FailedToStartNode)?;

        self.tracker.spawn(start_control(
            self.coordinator.clone(),
            control,
            self.stop_daemon.clone(),
            self.token.clone(),
        ));
        self.tracker.spawn(start_public(
            self.coordinator.clone(),
            public,
            self.token.clone(),
        ));

        let mut shutdown = self.coordinator.subscribe_shutdown();
        let mut stop = self.stop_daemon.subscribe();
        self.coordinator.start_monitors().await;

        let outcome = tokio::select! {
            interrupted = tokio::signal::ctrl_c() => match interrupted {
                Ok(()) => {
                    info!(parent: &self.logger.span, "interrupted, stopping");
                    Ok(())
                }
                Err(e) => Err(anyhow::anyhow!("listening for interrupt: {e}")),
            },
            _ = stop.recv() => {
                info!(parent: &self.logger.span, "stop requested");
                Ok(())
            }
            reason = shutdown.recv() => self.on_shutdown(reason),
        };

        self.stop().await;
        outcome
    }

    fn on_shutdown(&self, reason: Result<Shutdown, RecvError>) -> Result<()> {
        match reason {
            Ok(Shutdown::Superseded {
                self_epoch,
                current_epoch,
            }) => {
                info!(parent: &self.logger.span, "epoch {self_epoch} superseded by {current_epoch}, stopping");
                Ok(())
            }
            Ok(Shutdown::Fatal(reason)) => {
                error!(parent: &self.logger.span, "fatal: {reason}");
                bail!(reason)
            }
            Err(e) => bail!("shutdown channel: {e}"),
        }
    }

    async fn stop(&self) {
        self.coordinator.stop().await;
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.transport.stop().await;
        info!(parent: &self.logger.span, "daemon stopped");
    }
}

pub async fn start(config_path: &Path) -> Result<()> {
    let config = NodeConfig::load(config_path)?;
    let (control_port, http_port) = (config.node.control_port, config.node.http_port);

    Daemon::new(config).await?.run(control_port, http_port).await
}
