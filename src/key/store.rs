use super::keys::Pair;
use super::keys::Point;
use super::ChainAddress;
use crate::config::toml::get;
use crate::config::toml::map;
use crate::config::toml::FromToml;
use crate::config::toml::IntoToml;
use crate::config::ConfigError;

use anyhow::bail;
use anyhow::Result;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use toml::Value;

const KEY_FOLDER: &str = "key";
const PRIVATE_ID_FILE: &str = "node.private";
const PUBLIC_ID_FILE: &str = "node.public";

/// Location of the node long-term key inside the data folder.
#[derive(Debug, Clone)]
pub struct KeyStore {
    inner: Arc<InnerKS>,
}

#[derive(Debug)]
pub struct InnerKS {
    key_folder: PathBuf,
    private_key_file: PathBuf,
    public_key_file: PathBuf,
}

impl KeyStore {
    pub fn set(base_folder: &Path) -> Self {
        let key_folder = base_folder.join(KEY_FOLDER);
        let private_key_file = key_folder.join(PRIVATE_ID_FILE);
        let public_key_file = key_folder.join(PUBLIC_ID_FILE);

        Self {
            inner: Arc::new(InnerKS {
                key_folder,
                private_key_file,
                public_key_file,
            }),
        }
    }

    pub fn create_new(base_folder: &Path) -> Result<Self> {
        let store = Self::set(base_folder);
        if store.private_key_file.exists() {
            bail!(
                "Keypair already present in {}\nRemove it before generating new one",
                store.key_folder.display()
            )
        }
        std::fs::create_dir_all(&store.key_folder)?;

        Ok(store)
    }

    pub fn save_pair(&self, pair: &Pair) -> Result<()> {
        let private = PrivateToml(pair.private_bytes());
        let public = PublicToml(*pair.public());
        std::fs::write(&self.private_key_file, private.to_toml()?)?;
        std::fs::write(&self.public_key_file, public.to_toml()?)?;
        restrict_permissions(&self.private_key_file)?;

        Ok(())
    }

    pub fn load_pair(&self) -> Result<Pair> {
        let private_str = read_to_string(&self.private_key_file)?;
        let private = PrivateToml::from_toml(&private_str)?;
        let pair = Pair::from_bytes(&private.0)?;

        // Public file is informational, but must agree with the private key if present.
        if self.public_key_file.exists() {
            let public = PublicToml::from_toml(&read_to_string(&self.public_key_file)?)?;
            if public.0 != *pair.public() {
                bail!(
                    "public key in {} does not match private key",
                    self.public_key_file.display()
                )
            }
        }

        Ok(pair)
    }

    pub fn key_folder(&self) -> &Path {
        &self.key_folder
    }
}

struct PrivateToml([u8; 32]);

struct PublicToml(Point);

impl IntoToml for PrivateToml {
    fn to_value(&self) -> Value {
        Value::Table(map! {"private": hex::encode(self.0)})
    }
}

impl FromToml for PrivateToml {
    fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let raw = get!(value, "private", as_str)?;
        let mut scalar = [0u8; 32];
        hex::decode_to_slice(raw, &mut scalar).map_err(|_| ConfigError::InvalidValue {
            key: "private",
            value: "<redacted>".into(),
        })?;

        Ok(Self(scalar))
    }
}

impl IntoToml for PublicToml {
    fn to_value(&self) -> Value {
        Value::Table(map! {
            "x":       self.0.x_hex(),
            "y":       self.0.y_hex(),
            "address": self.0.address().to_string(),
        })
    }
}

impl FromToml for PublicToml {
    fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let x = get!(value, "x", as_str)?;
        let y = get!(value, "y", as_str)?;
        let point = Point::from_hex(x, y).map_err(|e| ConfigError::InvalidValue {
            key: "public",
            value: e.to_string(),
        })?;
        if let Some(address) = value.get("address").and_then(Value::as_str) {
            let parsed: ChainAddress = address.parse().map_err(|_| ConfigError::InvalidValue {
                key: "address",
                value: address.to_owned(),
            })?;
            if parsed != point.address() {
                return Err(ConfigError::InvalidValue {
                    key: "address",
                    value: address.to_owned(),
                });
            }
        }

        Ok(Self(point))
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn read_to_string(p: &Path) -> Result<String> {
    std::fs::read_to_string(p)
        .map_err(|e| anyhow::anyhow!("Error reading: {}, :{e:?}", p.display()))
}

impl std::ops::Deref for KeyStore {
    type Target = InnerKS;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
