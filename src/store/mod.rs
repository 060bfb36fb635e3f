//! Durable local cache of peer data keyed by chain address.

use crate::key::ChainAddress;
use crate::key::Point;
use crate::net::peer::ConnectionDetails;

use async_trait::async_trait;

pub mod file;
pub mod memstore;

#[cfg(test)]
pub mod testing;

/// Each key is written atomically, there are no cross-key transactions.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn get_connection_details(
        &self,
        node: ChainAddress,
    ) -> Result<ConnectionDetails, StorageError>;
    async fn put_connection_details(
        &self,
        node: ChainAddress,
        details: &ConnectionDetails,
    ) -> Result<(), StorageError>;
    async fn get_node_pub_key(&self, node: ChainAddress) -> Result<Point, StorageError>;
    async fn put_node_pub_key(&self, node: ChainAddress, key: Point) -> Result<(), StorageError>;
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("IoError:: {0}")]
    IoError(String),
    #[error("Not found")]
    NotFound,
    #[error("KeyError:: {0}")]
    KeyError(String),
}
