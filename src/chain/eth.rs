//! Node-list contract client over Ethereum JSON-RPC.

use super::abi;
use super::abi::Decoder;
use super::abi::LegacyTx;
use super::abi::Token;
use super::EpochInfo;
use super::Ledger;
use super::LedgerError;
use super::NodeMetadata;
use super::Registration;
use crate::key::ChainAddress;
use crate::key::Pair;
use crate::key::Point;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use serde_json::Value;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing::info;

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

const CURRENT_EPOCH: &str = "currentEpoch()";
const EPOCH_INFO: &str = "epochInfo(uint256)";
const IS_WHITELISTED: &str = "isWhitelisted(uint256,address)";
const NODE_REGISTERED: &str = "nodeRegistered(uint256,address)";
const GET_PSS_STATUS: &str = "getPssStatus(uint256,uint256)";
const GET_NODES: &str = "getNodes(uint256)";
const NODE_DETAILS: &str = "nodeDetails(address)";
const BUFFER_SIZE: &str = "bufferSize()";
const LIST_NODE: &str = "listNode(uint256,string,uint256,uint256,string,string)";

pub struct EthLedger {
    client: reqwest::Client,
    rpc_url: String,
    contract: ChainAddress,
    signer: Arc<Pair>,
    request_id: AtomicU64,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl EthLedger {
    pub fn new(rpc_url: &str, contract: ChainAddress, signer: Arc<Pair>) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;

        Ok(Self {
            client,
            rpc_url: rpc_url.to_owned(),
            contract,
            signer,
            request_id: AtomicU64::new(1),
        })
    }

    async fn rpc<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, LedgerError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response: RpcResponse<T> = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?
            .json()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;

        if let Some(RpcError { code, message }) = response.error {
            return Err(LedgerError::Remote { code, message });
        }
        response
            .result
            .ok_or(LedgerError::Decode("response without result"))
    }

    /// Read-only contract call, returns raw ABI output.
    async fn call(&self, signature: &str, args: &[Token]) -> Result<Vec<u8>, LedgerError> {
        let data = abi::encode_call(signature, args);
        let params = json!([{
            "from": self.signer.address().to_string(),
            "to": self.contract.to_string(),
            "data": format!("0x{}", hex::encode(data)),
        }, "latest"]);
        let raw: String = self.rpc("eth_call", params).await?;

        decode_hex(&raw)
    }

    async fn quantity(&self, method: &str, params: Value) -> Result<u128, LedgerError> {
        let raw: String = self.rpc(method, params).await?;
        parse_quantity(&raw)
    }

    async fn chain_id(&self) -> Result<u64, LedgerError> {
        let id = self.quantity("eth_chainId", json!([])).await?;
        u64::try_from(id).map_err(|_| LedgerError::Decode("chain id overflows u64"))
    }

    /// Signs and submits a contract transaction, returns its hash.
    async fn transact(&self, data: Vec<u8>) -> Result<String, LedgerError> {
        let from = self.signer.address().to_string();
        let to = self.contract.to_string();
        let data_hex = format!("0x{}", hex::encode(&data));

        let nonce = self
            .quantity("eth_getTransactionCount", json!([from, "pending"]))
            .await?;
        let gas_price = self.quantity("eth_gasPrice", json!([])).await?;
        let gas = self
            .quantity(
                "eth_estimateGas",
                json!([{"from": from, "to": to, "data": data_hex}]),
            )
            .await?;
        let chain_id = self.chain_id().await?;

        let tx = LegacyTx {
            nonce: u64::try_from(nonce).map_err(|_| LedgerError::Decode("nonce overflows u64"))?,
            gas_price,
            gas: u64::try_from(gas).map_err(|_| LedgerError::Decode("gas overflows u64"))?,
            to: self.contract,
            value: 0,
            data,
            chain_id,
        };
        let signature = self
            .signer
            .sign_prehash(&tx.signing_hash())
            .map_err(|e| LedgerError::Signing(e.to_string()))?;
        let raw = format!("0x{}", hex::encode(tx.encode_signed(&signature)));

        debug!("sending transaction: nonce {}, gas {}, chain {chain_id}", tx.nonce, tx.gas);
        self.rpc("eth_sendRawTransaction", json!([raw]))
            .await
            .map_err(|e| match e {
                LedgerError::Remote { message, .. } => LedgerError::Rejected(message),
                other => other,
            })
    }
}

#[async_trait]
impl Ledger for EthLedger {
    async fn dial(&self) -> Result<(), LedgerError> {
        let chain_id = self.chain_id().await?;
        info!("connected to ledger {}, chain id {chain_id}", self.rpc_url);
        Ok(())
    }

    async fn current_epoch(&self) -> Result<u64, LedgerError> {
        let out = self.call(CURRENT_EPOCH, &[]).await?;
        Decoder::new(&out).uint(0)
    }

    async fn epoch_info(&self, epoch: u64) -> Result<EpochInfo, LedgerError> {
        let out = self.call(EPOCH_INFO, &[Token::Uint(epoch)]).await?;
        let d = Decoder::new(&out);

        Ok(EpochInfo {
            id: d.uint(0)?,
            n: d.uint(1)?,
            k: d.uint(2)?,
            t: d.uint(3)?,
            prev_epoch: d.uint(4)?,
            next_epoch: d.uint(5)?,
        })
    }

    async fn is_whitelisted(&self, epoch: u64, node: ChainAddress) -> Result<bool, LedgerError> {
        let out = self
            .call(IS_WHITELISTED, &[Token::Uint(epoch), Token::Address(node)])
            .await?;
        Decoder::new(&out).bool(0)
    }

    async fn is_registered(&self, epoch: u64, node: ChainAddress) -> Result<bool, LedgerError> {
        let out = self
            .call(NODE_REGISTERED, &[Token::Uint(epoch), Token::Address(node)])
            .await?;
        Decoder::new(&out).bool(0)
    }

    async fn register(&self, epoch: u64, reg: &Registration) -> Result<String, LedgerError> {
        let data = abi::encode_call(
            LIST_NODE,
            &[
                Token::Uint(epoch),
                Token::String(reg.declared_ip.clone()),
                Token::Word(reg.public_key.x),
                Token::Word(reg.public_key.y),
                Token::String(reg.tm_connection.clone()),
                Token::String(reg.p2p_connection.clone()),
            ],
        );
        self.transact(data).await
    }

    async fn pss_status(&self, old_epoch: u64, new_epoch: u64) -> Result<bool, LedgerError> {
        let out = self
            .call(GET_PSS_STATUS, &[Token::Uint(old_epoch), Token::Uint(new_epoch)])
            .await?;
        // Any non-zero status word means the handover is running.
        Decoder::new(&out).bool(0)
    }

    async fn members_of(&self, epoch: u64) -> Result<Vec<ChainAddress>, LedgerError> {
        let out = self.call(GET_NODES, &[Token::Uint(epoch)]).await?;
        Decoder::new(&out).address_array(0)
    }

    async fn node_metadata(&self, node: ChainAddress) -> Result<NodeMetadata, LedgerError> {
        let out = self.call(NODE_DETAILS, &[Token::Address(node)]).await?;
        let d = Decoder::new(&out);
        let public_key = Point {
            x: d.word(2)?,
            y: d.word(3)?,
        };
        if public_key == (Point { x: [0; 32], y: [0; 32] }) {
            return Err(LedgerError::UnknownNode(node));
        }

        Ok(NodeMetadata {
            declared_ip: d.string(0)?,
            position: d.uint(1)?,
            public_key,
            tm_connection: non_empty(d.string(4)?),
            p2p_connection: non_empty(d.string(5)?),
        })
    }

    async fn key_buffer(&self) -> Result<u64, LedgerError> {
        let out = self.call(BUFFER_SIZE, &[]).await?;
        Decoder::new(&out).uint(0)
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn decode_hex(raw: &str) -> Result<Vec<u8>, LedgerError> {
    hex::decode(raw.strip_prefix("0x").unwrap_or(raw)).map_err(|_| LedgerError::Decode("invalid hex"))
}

/// Parses JSON-RPC quantity (`0x`-prefixed hex without leading zeros).
fn parse_quantity(raw: &str) -> Result<u128, LedgerError> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or(LedgerError::Decode("quantity without 0x prefix"))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).map_err(|_| LedgerError::Decode("invalid quantity"))
}
