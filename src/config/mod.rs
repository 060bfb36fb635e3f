//! Node configuration loaded from a TOML file.
//!
//! ```toml
//! [node]
//! ip_address = "10.0.0.7"
//! http_port = 8080
//! self_epoch = 1
//! tm_node_id = "8f2c...e1"
//!
//! [chain]
//! rpc_url = "http://127.0.0.1:8545"
//! contract_address = "0x5fbdb2315678afecb367f032d93f642f64180aa3"
//!
//! [intervals]
//! whitelist = "10s"
//! pss = "10s"
//! ```
pub mod toml;

use self::toml::get;
use self::toml::get_opt;
use self::toml::map;
use self::toml::section;
use self::toml::FromToml;
use self::toml::IntoToml;
use crate::key::ChainAddress;

use ::toml::Table;
use ::toml::Value;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_CONTROL_PORT: u16 = 8888;
pub const DEFAULT_P2P_PORT: u16 = 1080;
pub const DEFAULT_TM_P2P_PORT: u16 = 26656;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_AWAIT_POLL: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 10;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_FOLDER: &str = ".dkgnode";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("expected {0}")]
    Missing(&'static str),
    #[error("invalid type for {0}")]
    InvalidType(&'static str),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("toml decode: {0}")]
    Decode(String),
    #[error("toml encode: {0}")]
    Encode(String),
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub chain: ChainSection,
    pub intervals: Intervals,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeSection {
    /// Externally reachable IP of this node, also used in the transport strings.
    pub ip_address: String,
    /// Takes precedence over `ip_address:http_port` as the registered endpoint.
    pub domain: Option<String>,
    pub http_port: u16,
    pub control_port: u16,
    pub p2p_port: u16,
    pub tm_p2p_port: u16,
    pub tm_node_id: String,
    pub data_dir: PathBuf,
    /// Epoch this node was provisioned for.
    pub self_epoch: u64,
    /// Publish transport strings on the ledger instead of serving them on request.
    pub announce_connection_details: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainSection {
    pub rpc_url: String,
    pub contract_address: ChainAddress,
}

/// Polling periods of the coordinator monitors.
#[derive(Debug, Clone, PartialEq)]
pub struct Intervals {
    pub whitelist: Duration,
    pub registration: Duration,
    pub membership: Duration,
    pub pss: Duration,
    pub epoch: Duration,
    /// Poll period used by `await_*` accessors.
    pub await_poll: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            whitelist: DEFAULT_INTERVAL,
            registration: DEFAULT_INTERVAL,
            membership: DEFAULT_INTERVAL,
            pss: DEFAULT_INTERVAL,
            epoch: DEFAULT_INTERVAL,
            await_poll: DEFAULT_AWAIT_POLL,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Initial delay, doubled after each failed attempt.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&raw)?;
        config.verify_required()?;

        Ok(config)
    }

    pub fn verify_required(&self) -> Result<(), ConfigError> {
        if self.node.ip_address.is_empty() {
            return Err(ConfigError::Missing("node.ip_address"));
        }
        if self.chain.rpc_url.is_empty() {
            return Err(ConfigError::Missing("chain.rpc_url"));
        }
        if self.node.self_epoch == 0 {
            return Err(ConfigError::InvalidValue {
                key: "node.self_epoch",
                value: "0".into(),
            });
        }
        Ok(())
    }

    /// Endpoint registered on the ledger: configured domain or `ip:port`.
    pub fn public_endpoint(&self) -> String {
        match self.node.domain.as_deref() {
            Some(domain) if !domain.is_empty() => domain.to_owned(),
            _ => format!("{}:{}", self.node.ip_address, self.node.http_port),
        }
    }

    /// Consensus-layer connection string `<node id>@<ip>:<port>`.
    pub fn tm_p2p_connection(&self) -> String {
        format!(
            "{}@{}:{}",
            self.node.tm_node_id, self.node.ip_address, self.node.tm_p2p_port
        )
    }

    pub fn default_home() -> PathBuf {
        match home::home_dir() {
            Some(path) => path.join(DEFAULT_FOLDER),
            None => PathBuf::from("/tmp").join(DEFAULT_FOLDER),
        }
    }
}

impl FromToml for NodeConfig {
    fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let node = section(value, "node")?;
        let chain = section(value, "chain")?;
        let intervals = section(value, "intervals")?;
        let retry = section(value, "retry")?;

        let node = NodeSection {
            ip_address: get!(node, "ip_address", as_str)?.to_owned(),
            domain: get_opt!(node, "domain", as_str)?.map(str::to_owned),
            http_port: port(node, "http_port", DEFAULT_HTTP_PORT)?,
            control_port: port(node, "control_port", DEFAULT_CONTROL_PORT)?,
            p2p_port: port(node, "p2p_port", DEFAULT_P2P_PORT)?,
            tm_p2p_port: port(node, "tm_p2p_port", DEFAULT_TM_P2P_PORT)?,
            tm_node_id: get_opt!(node, "tm_node_id", as_str)?
                .unwrap_or_default()
                .to_owned(),
            data_dir: get_opt!(node, "data_dir", as_str)?
                .map_or_else(NodeConfig::default_home, PathBuf::from),
            self_epoch: unsigned(get!(node, "self_epoch", as_integer)?, "self_epoch")?,
            announce_connection_details: get_opt!(node, "announce_connection_details", as_bool)?
                .unwrap_or(false),
        };

        let contract = get!(chain, "contract_address", as_str)?;
        let chain = ChainSection {
            rpc_url: get!(chain, "rpc_url", as_str)?.to_owned(),
            contract_address: contract.parse().map_err(|_| ConfigError::InvalidValue {
                key: "contract_address",
                value: contract.to_owned(),
            })?,
        };

        let intervals = Intervals {
            whitelist: interval(intervals, "whitelist", DEFAULT_INTERVAL)?,
            registration: interval(intervals, "registration", DEFAULT_INTERVAL)?,
            membership: interval(intervals, "membership", DEFAULT_INTERVAL)?,
            pss: interval(intervals, "pss", DEFAULT_INTERVAL)?,
            epoch: interval(intervals, "epoch", DEFAULT_INTERVAL)?,
            await_poll: interval(intervals, "await_poll", DEFAULT_AWAIT_POLL)?,
        };

        let retry = RetryPolicy {
            attempts: match get_opt!(retry, "attempts", as_integer)? {
                Some(v) => u32::try_from(v).map_err(|_| ConfigError::InvalidValue {
                    key: "attempts",
                    value: v.to_string(),
                })?,
                None => DEFAULT_RETRY_ATTEMPTS,
            },
            delay: interval(retry, "delay", DEFAULT_RETRY_DELAY)?,
        };

        Ok(Self {
            node,
            chain,
            intervals,
            retry,
        })
    }
}

impl IntoToml for NodeConfig {
    fn to_value(&self) -> Value {
        let mut node = map! {
            "ip_address":                  self.node.ip_address.as_str(),
            "http_port":                   i64::from(self.node.http_port),
            "control_port":                i64::from(self.node.control_port),
            "p2p_port":                    i64::from(self.node.p2p_port),
            "tm_p2p_port":                 i64::from(self.node.tm_p2p_port),
            "tm_node_id":                  self.node.tm_node_id.as_str(),
            "data_dir":                    self.node.data_dir.display().to_string(),
            "self_epoch":                  self.node.self_epoch as i64,
            "announce_connection_details": self.node.announce_connection_details,
        };
        if let Some(domain) = &self.node.domain {
            node.insert("domain".into(), Value::String(domain.clone()));
        }

        let chain = map! {
            "rpc_url":          self.chain.rpc_url.as_str(),
            "contract_address": self.chain.contract_address.to_string(),
        };
        let intervals = map! {
            "whitelist":    format_interval(self.intervals.whitelist),
            "registration": format_interval(self.intervals.registration),
            "membership":   format_interval(self.intervals.membership),
            "pss":          format_interval(self.intervals.pss),
            "epoch":        format_interval(self.intervals.epoch),
            "await_poll":   format_interval(self.intervals.await_poll),
        };
        let retry = map! {
            "attempts": i64::from(self.retry.attempts),
            "delay":    format_interval(self.retry.delay),
        };

        let mut config = Table::new();
        config.insert("node".into(), Value::Table(node));
        config.insert("chain".into(), Value::Table(chain));
        config.insert("intervals".into(), Value::Table(intervals));
        config.insert("retry".into(), Value::Table(retry));
        Value::Table(config)
    }
}

fn port(table: &Table, key: &'static str, default: u16) -> Result<u16, ConfigError> {
    match get_opt!(table, key, as_integer)? {
        Some(v) => u16::try_from(v).map_err(|_| ConfigError::InvalidValue {
            key,
            value: v.to_string(),
        }),
        None => Ok(default),
    }
}

fn unsigned(value: i64, key: &'static str) -> Result<u64, ConfigError> {
    u64::try_from(value).map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn interval(table: &Table, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match get_opt!(table, key, as_str)? {
        Some(v) => parse_interval(v).ok_or_else(|| ConfigError::InvalidValue {
            key,
            value: v.to_owned(),
        }),
        None => Ok(default),
    }
}

/// Parses `"<n>s"` or `"<n>ms"`.
pub fn parse_interval(value: &str) -> Option<Duration> {
    if let Some(ms) = value.strip_suffix("ms") {
        return ms.parse().ok().map(Duration::from_millis);
    }
    value
        .strip_suffix('s')?
        .parse()
        .ok()
        .map(Duration::from_secs)
}

fn format_interval(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = r#"
        [node]
        ip_address = "10.0.0.7"
        http_port = 9000
        tm_node_id = "abcd"
        data_dir = "/var/lib/dkgnode"
        self_epoch = 5

        [chain]
        rpc_url = "http://127.0.0.1:8545"
        contract_address = "0x5fbdb2315678afecb367f032d93f642f64180aa3"

        [intervals]
        pss = "500ms"
        epoch = "3s"
    "#;

    #[test]
    fn parse_node_config() {
        let config = NodeConfig::from_toml(RAW).unwrap();
        assert!(config.verify_required().is_ok());
        assert_eq!(config.node.self_epoch, 5);
        assert_eq!(config.node.p2p_port, DEFAULT_P2P_PORT);
        assert_eq!(config.intervals.pss, Duration::from_millis(500));
        assert_eq!(config.intervals.epoch, Duration::from_secs(3));
        assert_eq!(config.intervals.whitelist, DEFAULT_INTERVAL);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.public_endpoint(), "10.0.0.7:9000");
        assert_eq!(config.tm_p2p_connection(), "abcd@10.0.0.7:26656");
        assert!(!config.node.announce_connection_details);
    }

    #[test]
    fn config_toml_roundtrip() {
        let mut config = NodeConfig::from_toml(RAW).unwrap();
        config.node.domain = Some("node.example.org".into());

        let encoded = config.to_toml().unwrap();
        let decoded = NodeConfig::from_toml(&encoded).unwrap();
        assert_eq!(config, decoded);
        assert_eq!(decoded.public_endpoint(), "node.example.org");
    }

    #[test]
    fn missing_and_invalid_fields() {
        let no_chain = "[node]\nip_address = \"1.2.3.4\"\nself_epoch = 1\n";
        assert!(matches!(
            NodeConfig::from_toml(no_chain),
            Err(ConfigError::Missing("contract_address"))
        ));

        let bad_interval = RAW.replace("\"500ms\"", "\"soon\"");
        assert!(matches!(
            NodeConfig::from_toml(&bad_interval),
            Err(ConfigError::InvalidValue { key: "pss", .. })
        ));

        let zero_epoch = RAW.replace("self_epoch = 5", "self_epoch = 0");
        let config = NodeConfig::from_toml(&zero_epoch).unwrap();
        assert!(config.verify_required().is_err());
    }

    #[test]
    fn intervals() {
        assert_eq!(parse_interval("10s"), Some(Duration::from_secs(10)));
        assert_eq!(parse_interval("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_interval("10"), None);
        assert_eq!(format_interval(Duration::from_millis(1500)), "1500ms");
    }
}
