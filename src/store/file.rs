use super::StorageError;
use super::Store;
use crate::config::toml::get_opt;
use crate::config::toml::FromToml;
use crate::config::toml::IntoToml;
use crate::config::ConfigError;
use crate::key::ChainAddress;
use crate::key::Point;
use crate::net::peer::ConnectionDetails;

use async_trait::async_trait;
use std::path::Path;
use std::path::PathBuf;
use tokio::sync::Mutex;
use toml::Table;
use toml::Value;

const PEERS_FOLDER: &str = "peers";

/// One TOML file per node under `<base>/peers/`.
pub struct FileStore {
    folder: PathBuf,
    /// Serializes read-modify-write of peer files.
    write_lock: Mutex<()>,
}

#[derive(Default, Debug, PartialEq)]
struct PeerRecord {
    details: Option<ConnectionDetails>,
    key: Option<Point>,
}

impl FileStore {
    pub async fn open(base_folder: &Path) -> Result<Self, StorageError> {
        let folder = base_folder.join(PEERS_FOLDER);
        tokio::fs::create_dir_all(&folder)
            .await
            .map_err(|e| StorageError::IoError(format!("{}: {e}", folder.display())))?;

        Ok(Self {
            folder,
            write_lock: Mutex::new(()),
        })
    }

    fn path(&self, node: ChainAddress) -> PathBuf {
        self.folder.join(format!("{node}.toml"))
    }

    async fn read(&self, node: ChainAddress) -> Result<PeerRecord, StorageError> {
        let path = self.path(node);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                PeerRecord::from_toml(&raw).map_err(|e| StorageError::KeyError(e.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PeerRecord::default()),
            Err(e) => Err(StorageError::IoError(format!("{}: {e}", path.display()))),
        }
    }

    /// Writes into a temporary file first, the rename makes the update atomic.
    async fn write(&self, node: ChainAddress, record: &PeerRecord) -> Result<(), StorageError> {
        let path = self.path(node);
        let tmp = path.with_extension("toml.tmp");
        let raw = record
            .to_toml()
            .map_err(|e| StorageError::KeyError(e.to_string()))?;

        tokio::fs::write(&tmp, raw)
            .await
            .map_err(|e| StorageError::IoError(format!("{}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StorageError::IoError(format!("{}: {e}", path.display())))
    }

    async fn update<F>(&self, node: ChainAddress, f: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut PeerRecord) + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut record = self.read(node).await?;
        f(&mut record);
        self.write(node, &record).await
    }
}

#[async_trait]
impl Store for FileStore {
    async fn get_connection_details(
        &self,
        node: ChainAddress,
    ) -> Result<ConnectionDetails, StorageError> {
        self.read(node).await?.details.ok_or(StorageError::NotFound)
    }

    async fn put_connection_details(
        &self,
        node: ChainAddress,
        details: &ConnectionDetails,
    ) -> Result<(), StorageError> {
        let details = details.clone();
        self.update(node, move |r| r.details = Some(details)).await
    }

    async fn get_node_pub_key(&self, node: ChainAddress) -> Result<Point, StorageError> {
        self.read(node).await?.key.ok_or(StorageError::NotFound)
    }

    async fn put_node_pub_key(&self, node: ChainAddress, key: Point) -> Result<(), StorageError> {
        self.update(node, move |r| r.key = Some(key)).await
    }
}

impl IntoToml for PeerRecord {
    fn to_value(&self) -> Value {
        let mut table = Table::new();
        if let Some(d) = &self.details {
            table.insert("tm_connection".into(), d.tm_connection.clone().into());
            table.insert("p2p_connection".into(), d.p2p_connection.clone().into());
        }
        if let Some(key) = &self.key {
            table.insert("x".into(), key.x_hex().into());
            table.insert("y".into(), key.y_hex().into());
        }
        Value::Table(table)
    }
}

impl FromToml for PeerRecord {
    fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let tm = get_opt!(value, "tm_connection", as_str)?;
        let p2p = get_opt!(value, "p2p_connection", as_str)?;
        let details = match (tm, p2p) {
            (Some(tm), Some(p2p)) => Some(ConnectionDetails {
                tm_connection: tm.to_owned(),
                p2p_connection: p2p.to_owned(),
            }),
            _ => None,
        };

        let x = get_opt!(value, "x", as_str)?;
        let y = get_opt!(value, "y", as_str)?;
        let key = match (x, y) {
            (Some(x), Some(y)) => {
                Some(
                    Point::from_hex(x, y).map_err(|e| ConfigError::InvalidValue {
                        key: "x,y",
                        value: e.to_string(),
                    })?,
                )
            }
            _ => None,
        };

        Ok(Self { details, key })
    }
}
