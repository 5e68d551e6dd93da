/// Injected chain capabilities.
///
/// The pipeline never owns a node connection: it receives a [`ChainClient`]
/// for read-only calls, broadcast, and receipt waiting, and (optionally) a
/// narrower [`BalanceProvider`] for the amount resolver. The bundled
/// [`HttpRpcChainClient`] speaks JSON-RPC over HTTP with an optional
/// fallback endpoint; it submits via `eth_sendTransaction` and therefore
/// delegates signing to the node's managed accounts. Externally-signed
/// flows implement [`ChainClient`] on top of their own signer.
use crate::abi::{parse_signature, parse_u256_from_decimal_or_hex};
use crate::domain::types::ResolvedTransaction;
use crate::error::{Error, Result};
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

const RECEIPT_POLL_ATTEMPTS: u32 = 120;
const RECEIPT_POLL_INTERVAL_MS: u64 = 500;

/// Minimal receipt view the driver needs.
#[derive(Clone, Debug)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: Option<U256>,
}

/// Read-only calls, balance queries, and transaction submission.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// `eth_call` against `to` with the given 0x-prefixed calldata; returns
    /// the raw 0x-prefixed result.
    async fn call(&self, to: Address, data: &str) -> Result<String>;

    /// Native-asset balance of an account.
    async fn native_balance(&self, address: Address) -> Result<U256>;

    /// Broadcast a resolved transaction; returns the transaction hash.
    async fn send_transaction(&self, tx: &ResolvedTransaction) -> Result<String>;

    /// Block until a receipt is available (bounded internally).
    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<TxReceipt>;
}

/// Narrow balance oracle used only by the amount resolver:
/// `(token address) -> integer balance` for the configured account.
#[async_trait]
pub trait BalanceProvider: Send + Sync {
    async fn balance_of(&self, token: Address) -> Result<U256>;
}

// ── HTTP JSON-RPC client ─────────────────────────────────────────────────────

/// JSON-RPC chain client with primary/fallback endpoints.
#[derive(Clone, Debug)]
pub struct HttpRpcChainClient {
    rpc_url: String,
    fallback_rpc_url: Option<String>,
    /// Sender account for `eth_sendTransaction`; must be managed by the node.
    from: Option<Address>,
}

impl HttpRpcChainClient {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        HttpRpcChainClient {
            rpc_url: rpc_url.into(),
            fallback_rpc_url: None,
            from: None,
        }
    }

    pub fn with_fallback(mut self, fallback_rpc_url: impl Into<String>) -> Self {
        self.fallback_rpc_url = Some(fallback_rpc_url.into());
        self
    }

    pub fn with_sender(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    fn rpc_call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = match self.try_post(&self.rpc_url, &body) {
            Ok(value) => value,
            Err(primary_error) => match self.fallback_rpc_url.as_deref() {
                Some(fallback_url) => self.try_post(fallback_url, &body).map_err(
                    |fallback_error| {
                        Error::Rpc(format!(
                            "primary rpc failed: {primary_error}; fallback rpc failed: {fallback_error}"
                        ))
                    },
                )?,
                None => return Err(primary_error),
            },
        };

        if let Some(error) = response.get("error") {
            return Err(Error::Rpc(format!("rpc returned error for {method}: {error}")));
        }
        Ok(response)
    }

    fn try_post(&self, url: &str, body: &Value) -> Result<Value> {
        let response = ureq::post(url)
            .set("content-type", "application/json")
            .send_json(body.clone())
            .map_err(|error| match error {
                ureq::Error::Status(status, _) => {
                    Error::Rpc(format!("rpc returned status {status}"))
                }
                ureq::Error::Transport(transport) => {
                    Error::Rpc(format!("rpc transport failed: {transport}"))
                }
            })?;
        response
            .into_json::<Value>()
            .map_err(|error| Error::Rpc(format!("failed to parse rpc response JSON: {error}")))
    }

    fn result_str(response: &Value, method: &str) -> Result<String> {
        response
            .get("result")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Rpc(format!("{method} result was missing")))
    }
}

#[async_trait]
impl ChainClient for HttpRpcChainClient {
    async fn call(&self, to: Address, data: &str) -> Result<String> {
        let response = self.rpc_call(
            "eth_call",
            json!([{ "to": format!("{to:#x}"), "data": data }, "latest"]),
        )?;
        Self::result_str(&response, "eth_call")
    }

    async fn native_balance(&self, address: Address) -> Result<U256> {
        let response = self.rpc_call(
            "eth_getBalance",
            json!([format!("{address:#x}"), "latest"]),
        )?;
        let raw = Self::result_str(&response, "eth_getBalance")?;
        parse_u256_from_decimal_or_hex(&raw, "eth_getBalance result").map_err(Error::Rpc)
    }

    async fn send_transaction(&self, tx: &ResolvedTransaction) -> Result<String> {
        let mut request = serde_json::Map::new();
        if let Some(from) = self.from {
            request.insert("from".to_string(), json!(format!("{from:#x}")));
        }
        request.insert("to".to_string(), json!(format!("{:#x}", tx.to)));
        request.insert("data".to_string(), json!(tx.data));
        if tx.value > U256::ZERO {
            request.insert("value".to_string(), json!(format!("{:#x}", tx.value)));
        }

        let response = self.rpc_call("eth_sendTransaction", json!([request]))?;
        Self::result_str(&response, "eth_sendTransaction")
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<TxReceipt> {
        for _ in 0..RECEIPT_POLL_ATTEMPTS {
            let response =
                self.rpc_call("eth_getTransactionReceipt", json!([tx_hash]))?;
            let result = response.get("result").cloned().unwrap_or(Value::Null);
            if !result.is_null() {
                return parse_receipt(tx_hash, &result);
            }
            std::thread::sleep(Duration::from_millis(RECEIPT_POLL_INTERVAL_MS));
        }
        Err(Error::ExecutionError(format!(
            "no receipt for {tx_hash} after {RECEIPT_POLL_ATTEMPTS} polls"
        )))
    }
}

fn parse_receipt(tx_hash: &str, result: &Value) -> Result<TxReceipt> {
    let status = result
        .get("status")
        .and_then(Value::as_str)
        .map(|raw| raw == "0x1")
        .unwrap_or(false);
    let block_number = result
        .get("blockNumber")
        .and_then(Value::as_str)
        .and_then(|raw| u64::from_str_radix(raw.trim_start_matches("0x"), 16).ok());
    let gas_used = result
        .get("gasUsed")
        .and_then(Value::as_str)
        .and_then(|raw| parse_u256_from_decimal_or_hex(raw, "gasUsed").ok());
    Ok(TxReceipt {
        tx_hash: tx_hash.to_string(),
        success: status,
        block_number,
        gas_used,
    })
}

// ── ERC-20 balance provider over a chain client ──────────────────────────────

/// Balance oracle for one account, answering native and ERC-20 balances
/// through a [`ChainClient`].
pub struct Erc20BalanceProvider<'a> {
    chain: &'a dyn ChainClient,
    owner: Address,
}

impl<'a> Erc20BalanceProvider<'a> {
    pub fn new(chain: &'a dyn ChainClient, owner: Address) -> Self {
        Erc20BalanceProvider { chain, owner }
    }
}

#[async_trait]
impl BalanceProvider for Erc20BalanceProvider<'_> {
    async fn balance_of(&self, token: Address) -> Result<U256> {
        if token == Address::ZERO {
            return self.chain.native_balance(self.owner).await;
        }
        let function = parse_signature("balanceOf(address owner) returns (uint256)")
            .map_err(Error::Rpc)?;
        let calldata = function
            .encode_call(&[json!(format!("{:#x}", self.owner))])
            .map_err(Error::Rpc)?;
        let raw = self
            .chain
            .call(token, &format!("0x{}", hex::encode(calldata)))
            .await?;
        parse_u256_from_decimal_or_hex(&raw, "balanceOf result").map_err(Error::Rpc)
    }
}
