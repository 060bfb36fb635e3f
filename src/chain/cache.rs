use super::EpochInfo;
use super::Ledger;
use super::LedgerError;

use arc_swap::ArcSwap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EpochError {
    #[error("epoch 0 is invalid")]
    InvalidEpoch,
    #[error("epoch {0} has not been initialized")]
    NotInitialized(u64),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
}

/// Memoized epoch records keyed by epoch id.
///
/// Readers never block: the map is swapped as a whole on insert. Epoch records
/// are immutable on the ledger so concurrent fetches may overwrite each other freely.
#[derive(Default)]
pub struct EpochCache(ArcSwap<BTreeMap<u64, EpochInfo>>);

impl EpochCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached(&self, epoch: u64) -> Option<EpochInfo> {
        self.0.load().get(&epoch).copied()
    }

    pub async fn get<L: Ledger + ?Sized>(
        &self,
        ledger: &L,
        epoch: u64,
        skip_cache: bool,
    ) -> Result<EpochInfo, EpochError> {
        if !skip_cache {
            if let Some(info) = self.cached(epoch) {
                return Ok(info);
            }
        }
        if epoch == 0 {
            return Err(EpochError::InvalidEpoch);
        }

        let info = ledger.epoch_info(epoch).await?;
        debug!("epoch info fetched: {info:?}");
        if info.id == 0 {
            return Err(EpochError::NotInitialized(epoch));
        }

        self.0.rcu(|current| {
            let mut updated = BTreeMap::clone(current);
            updated.insert(epoch, info);
            updated
        });

        Ok(info)
    }
}
