use super::StorageError;
use super::Store;
use crate::key::ChainAddress;
use crate::key::Point;
use crate::net::peer::ConnectionDetails;

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemStore {
    details: RwLock<BTreeMap<ChainAddress, ConnectionDetails>>,
    keys: RwLock<BTreeMap<ChainAddress, Point>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.keys.read().await.len()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn get_connection_details(
        &self,
        node: ChainAddress,
    ) -> Result<ConnectionDetails, StorageError> {
        let datastore = self.details.read().await;
        datastore.get(&node).cloned().ok_or(StorageError::NotFound)
    }

    async fn put_connection_details(
        &self,
        node: ChainAddress,
        details: &ConnectionDetails,
    ) -> Result<(), StorageError> {
        let mut datastore = self.details.write().await;
        datastore.insert(node, details.clone());
        Ok(())
    }

    async fn get_node_pub_key(&self, node: ChainAddress) -> Result<Point, StorageError> {
        let datastore = self.keys.read().await;
        datastore.get(&node).copied().ok_or(StorageError::NotFound)
    }

    async fn put_node_pub_key(&self, node: ChainAddress, key: Point) -> Result<(), StorageError> {
        let mut datastore = self.keys.write().await;
        datastore.insert(node, key);
        Ok(())
    }
}
