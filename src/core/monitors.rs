//! Polling tasks driving the coordinator state.
//!
//! Every monitor copies what it needs out of the shared state, performs ledger
//! and network I/O without holding the lock, then writes results back.

use super::coordinator::Coordinator;
use super::coordinator::Handover;
use super::coordinator::LookupError;
use super::coordinator::Shutdown;
use super::resolver::ResolveError;
use super::retry::with_retry;
use super::state::EpochTransition;
use crate::chain::EpochError;
use crate::chain::LedgerError;
use crate::chain::Registration;
use crate::log::Logger;

use std::future::Future;
use std::time::Duration;
use tokio::time::Interval;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

#[derive(thiserror::Error, Debug)]
enum DiscoveryError {
    #[error(transparent)]
    Epoch(#[from] EpochError),
    #[error("members: {0}")]
    Ledger(#[from] LedgerError),
    #[error("priming key: {0}")]
    Lookup(#[from] LookupError),
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

impl Coordinator {
    /// Spawns whitelist, registration, own membership, PSS and epoch monitors.
    pub async fn start_monitors(&self) {
        self.spawn_monitor(self.clone().whitelist_monitor());
        self.spawn_monitor(self.clone().registration_monitor());
        self.spawn_membership(self.self_epoch()).await;
        self.spawn_monitor(self.clone().pss_monitor());
        self.spawn_monitor(self.clone().epoch_monitor());
    }

    fn spawn_monitor<F>(&self, monitor: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = monitor => {}
            }
        });
    }

    /// Starts membership discovery for `epoch` unless it is running or already converged.
    pub async fn spawn_membership(&self, epoch: u64) {
        if !self.state.lock().await.begin_discovery(epoch) {
            debug!(parent: &self.log.span, "membership of epoch {epoch} is already discovered or in progress");
            return;
        }
        self.spawn_monitor(self.clone().membership_monitor(epoch));
    }

    async fn whitelist_monitor(self) {
        let log = self.log.new_child("whitelist");
        let epoch = self.self_epoch();
        let address = self.self_address();
        let mut ticker = ticker(self.config.intervals.whitelist);

        loop {
            ticker.tick().await;
            match self.ledger.is_whitelisted(epoch, address).await {
                Ok(true) => {
                    self.state.lock().await.is_whitelisted = true;
                    info!(parent: &log.span, "node is whitelisted for epoch {epoch}");
                    return;
                }
                Ok(false) => debug!(parent: &log.span, "not whitelisted for epoch {epoch} yet"),
                Err(e) => warn!(parent: &log.span, "whitelist status: {e}"),
            }
        }
    }

    async fn registration_monitor(self) {
        let log = self.log.new_child("registration");
        let epoch = self.self_epoch();
        let address = self.self_address();
        let mut ticker = ticker(self.config.intervals.registration);

        loop {
            ticker.tick().await;
            if self.state.lock().await.is_whitelisted {
                break;
            }
            debug!(parent: &log.span, "waiting for whitelist");
        }

        let retry = &self.config.retry;
        let registered = with_retry(retry, "registration status", &log.span, || {
            self.ledger.is_registered(epoch, address)
        })
        .await;
        match registered {
            Ok(true) => info!(parent: &log.span, "node is already registered for epoch {epoch}"),
            Ok(false) => {
                let registration = self.registration();
                info!(parent: &log.span, "registering for epoch {epoch} as {}", registration.declared_ip);
                let submitted = with_retry(retry, "registration", &log.span, || {
                    self.ledger.register(epoch, &registration)
                })
                .await;
                match submitted {
                    Ok(tx) => info!(parent: &log.span, "registered for epoch {epoch}, tx {tx}"),
                    Err(e) => return self.fatal(&log, format!("registration failed: {e}")),
                }
            }
            Err(e) => return self.fatal(&log, format!("registration status: {e}")),
        }

        self.state.lock().await.is_registered = true;
    }

    fn registration(&self) -> Registration {
        let (tm_connection, p2p_connection) = if self.config.node.announce_connection_details {
            let details = self.connection_details();
            (details.tm_connection, details.p2p_connection)
        } else {
            Default::default()
        };

        Registration {
            declared_ip: self.config.public_endpoint(),
            public_key: *self.self_public_key(),
            tm_connection,
            p2p_connection,
        }
    }

    async fn membership_monitor(self, epoch: u64) {
        let log = self.log.new_child(&format!("membership.{epoch}"));
        let mut ticker = ticker(self.config.intervals.membership);

        loop {
            ticker.tick().await;
            match self.discover(epoch, &log).await {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => warn!(parent: &log.span, "membership of epoch {epoch}: {e}"),
            }
        }
    }

    /// One discovery pass. Returns `true` once the register of `epoch` is published.
    async fn discover(&self, epoch: u64, log: &Logger) -> Result<bool, DiscoveryError> {
        let info = self.epoch_info(epoch, true).await?;
        let members = self.ledger.members_of(epoch).await?;
        if members.len() as u64 != info.n {
            info!(parent: &log.span, "epoch {epoch} lists {} members, expected {}, retrying", members.len(), info.n);
            return Ok(false);
        }

        // Keys of all members must be known before any reference is resolved.
        for address in &members {
            self.node_pub_key(*address).await?;
        }

        let mut nodes = Vec::with_capacity(members.len());
        for address in members {
            match self.resolver.resolve(address, &log.span).await {
                Ok(node) => nodes.push(node),
                Err(e @ ResolveError::Unavailable(_)) => debug!(parent: &log.span, "{e}"),
                Err(e) => warn!(parent: &log.span, "resolving {address}: {e}"),
            }
        }
        if nodes.len() as u64 != info.n {
            info!(parent: &log.span, "resolved {} of {} members of epoch {epoch}, retrying", nodes.len(), info.n);
            return Ok(false);
        }

        let self_peer = self.self_peer_id();
        let mut all_connected = true;
        for node in &nodes {
            if node.peer_id == self_peer {
                self.state.lock().await.self_index = Some(node.index);
                continue;
            }
            if let Err(e) = self
                .transport
                .dial(&node.peer_id, &node.p2p_connection)
                .await
            {
                debug!(parent: &log.span, "dial {} ({}): {e}", node.address, node.peer_id);
                all_connected = false;
            }
        }
        if !all_connected {
            info!(parent: &log.span, "not all members of epoch {epoch} are reachable, retrying");
            return Ok(false);
        }

        self.state.lock().await.publish(epoch, nodes);
        info!(parent: &log.span, "registry of epoch {epoch} is complete, {} members", info.n);
        Ok(true)
    }

    async fn pss_monitor(self) {
        let log = self.log.new_child("pss");
        let self_epoch = self.self_epoch();
        let mut ticker = ticker(self.config.intervals.pss);

        loop {
            ticker.tick().await;
            let current = self.current_epoch().await;
            let (current_info, own_info) = match tokio::try_join!(
                self.epoch_info(current, false),
                self.epoch_info(self_epoch, false)
            ) {
                Ok(infos) => infos,
                Err(e) => {
                    warn!(parent: &log.span, "epoch info: {e}");
                    continue;
                }
            };
            if current_info.next_epoch == 0 {
                debug!(parent: &log.span, "epoch {current} has no successor yet");
                continue;
            }

            let running = match self.ledger.pss_status(current, current_info.next_epoch).await {
                Ok(running) => running,
                Err(e) => {
                    warn!(parent: &log.span, "pss status: {e}");
                    continue;
                }
            };

            let (rising, target, is_new_committee) = {
                let mut state = self.state.lock().await;
                let rising = state.observe_pss(running);
                (rising, state.handover_target(&own_info), state.is_new_committee)
            };
            if !rising {
                continue;
            }

            info!(parent: &log.span, "pss started: {current} -> {}", current_info.next_epoch);
            match target {
                Some(target) => self.spawn_membership(target).await,
                None => warn!(parent: &log.span, "no adjacent committee for epoch {self_epoch}"),
            }
            let handover = Handover {
                old_epoch: current,
                new_epoch: current_info.next_epoch,
                is_new_committee,
            };
            if self.handover.send(handover).is_err() {
                debug!(parent: &log.span, "handover has no subscribers");
            }
        }
    }

    async fn epoch_monitor(self) {
        let log = self.log.new_child("epoch");
        let mut ticker = ticker(self.config.intervals.epoch);

        loop {
            ticker.tick().await;
            let epoch = match self.ledger.current_epoch().await {
                Ok(epoch) => epoch,
                Err(e) => {
                    warn!(parent: &log.span, "current epoch: {e}");
                    continue;
                }
            };

            let (transition, self_epoch) = {
                let mut state = self.state.lock().await;
                (state.observe_epoch(epoch), state.self_epoch)
            };
            match transition {
                EpochTransition::Unchanged => {}
                EpochTransition::Advanced {
                    superseded: true, ..
                } => {
                    info!(parent: &log.span, "epoch {self_epoch} is superseded by {epoch}");
                    self.signal_shutdown(Shutdown::Superseded {
                        self_epoch,
                        current_epoch: epoch,
                    });
                    return;
                }
                EpochTransition::Advanced { activated, .. } => {
                    info!(parent: &log.span, "current epoch is {epoch}");
                    if activated {
                        info!(parent: &log.span, "committee of epoch {self_epoch} is now active");
                    }
                }
            }
        }
    }

    fn fatal(&self, log: &Logger, reason: String) {
        error!(parent: &log.span, "{reason}");
        self.signal_shutdown(Shutdown::Fatal(reason));
    }
}
