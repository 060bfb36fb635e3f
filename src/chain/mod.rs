// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

//! Read/write access to the on-chain committee registry.

pub mod abi;
mod cache;
pub mod eth;

pub use cache::EpochCache;
pub use cache::EpochError;

use crate::key::ChainAddress;
use crate::key::Point;

use async_trait::async_trait;

/// Fallback for [`Ledger::key_buffer`] when the contract call fails.
pub const DEFAULT_KEY_BUFFER: u64 = 50_000;

/// Committee parameters of a single epoch. Never changes once created on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EpochInfo {
    pub id: u64,
    /// Committee size.
    pub n: u64,
    /// Reconstruction threshold.
    pub k: u64,
    /// Corruption threshold.
    pub t: u64,
    pub prev_epoch: u64,
    pub next_epoch: u64,
}

/// Node record as listed on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMetadata {
    /// Endpoint hint of the node HTTP server: domain or `ip:port`.
    pub declared_ip: String,
    /// Committee index.
    pub position: u64,
    pub public_key: Point,
    pub tm_connection: Option<String>,
    pub p2p_connection: Option<String>,
}

impl NodeMetadata {
    /// Both transport strings, if the node has announced them on the ledger.
    pub fn announced_connection(&self) -> Option<(&str, &str)> {
        match (self.tm_connection.as_deref(), self.p2p_connection.as_deref()) {
            (Some(tm), Some(p2p)) if !tm.is_empty() && !p2p.is_empty() => Some((tm, p2p)),
            _ => None,
        }
    }
}

/// Registration payload of this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub declared_ip: String,
    pub public_key: Point,
    /// Empty unless the node announces its transport strings on the ledger.
    pub tm_connection: String,
    pub p2p_connection: String,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("rpc transport: {0}")]
    Rpc(String),
    #[error("rpc error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("malformed contract response: {0}")]
    Decode(&'static str),
    #[error("node {0} is not listed")]
    UnknownNode(ChainAddress),
    #[error("transaction rejected: {0}")]
    Rejected(String),
    #[error("signing transaction: {0}")]
    Signing(String),
}

/// Contract interface of the node list.
#[async_trait]
pub trait Ledger: Send + Sync + 'static {
    /// Checks the ledger endpoint is reachable.
    async fn dial(&self) -> Result<(), LedgerError>;
    async fn current_epoch(&self) -> Result<u64, LedgerError>;
    /// Raw epoch record. Uninitialized epochs are returned with `id == 0`.
    async fn epoch_info(&self, epoch: u64) -> Result<EpochInfo, LedgerError>;
    async fn is_whitelisted(&self, epoch: u64, node: ChainAddress) -> Result<bool, LedgerError>;
    async fn is_registered(&self, epoch: u64, node: ChainAddress) -> Result<bool, LedgerError>;
    /// Submits registration transaction, returns its hash.
    async fn register(&self, epoch: u64, reg: &Registration) -> Result<String, LedgerError>;
    async fn pss_status(&self, old_epoch: u64, new_epoch: u64) -> Result<bool, LedgerError>;
    async fn members_of(&self, epoch: u64) -> Result<Vec<ChainAddress>, LedgerError>;
    async fn node_metadata(&self, node: ChainAddress) -> Result<NodeMetadata, LedgerError>;
    async fn key_buffer(&self) -> Result<u64, LedgerError>;
}
