/// Test doubles for the injected chain capabilities. Exported so both the
/// unit tests and the end-to-end pipeline tests drive the compiler without a
/// node.
use crate::chain::{BalanceProvider, ChainClient, TxReceipt};
use crate::domain::types::ResolvedTransaction;
use crate::error::{Error, Result};
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Chain client with scripted call results and recorded broadcasts.
#[derive(Default)]
pub struct MockChainClient {
    call_results: Mutex<HashMap<Address, String>>,
    sent: Mutex<Vec<ResolvedTransaction>>,
    fail_sends: bool,
    fail_receipts: bool,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the `eth_call` result for a target address.
    pub fn set_call_result(&self, to: Address, result_hex: impl Into<String>) {
        self.call_results
            .lock()
            .expect("call results lock should not be poisoned")
            .insert(to, result_hex.into());
    }

    /// Script a uint256 call result for a target address.
    pub fn set_call_result_uint(&self, to: Address, value: U256) {
        self.set_call_result(to, format!("0x{:064x}", value));
    }

    pub fn failing_sends() -> Self {
        MockChainClient {
            fail_sends: true,
            ..Self::default()
        }
    }

    pub fn reverting_receipts() -> Self {
        MockChainClient {
            fail_receipts: true,
            ..Self::default()
        }
    }

    pub fn sent_transactions(&self) -> Vec<ResolvedTransaction> {
        self.sent
            .lock()
            .expect("sent lock should not be poisoned")
            .clone()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn call(&self, to: Address, _data: &str) -> Result<String> {
        let scripted = self
            .call_results
            .lock()
            .expect("call results lock should not be poisoned")
            .get(&to)
            .cloned();
        Ok(scripted.unwrap_or_else(|| "0x".to_string()))
    }

    async fn native_balance(&self, _address: Address) -> Result<U256> {
        Ok(U256::ZERO)
    }

    async fn send_transaction(&self, tx: &ResolvedTransaction) -> Result<String> {
        if self.fail_sends {
            return Err(Error::ExecutionError("mock send refused".to_string()));
        }
        let mut sent = self.sent.lock().expect("sent lock should not be poisoned");
        sent.push(tx.clone());
        Ok(format!("0x{:064x}", sent.len()))
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<TxReceipt> {
        Ok(TxReceipt {
            tx_hash: tx_hash.to_string(),
            success: !self.fail_receipts,
            block_number: Some(1),
            gas_used: Some(U256::from(21_000u64)),
        })
    }
}

/// Balance oracle answering from a fixed table.
#[derive(Default)]
pub struct MockBalanceProvider {
    balances: HashMap<Address, U256>,
}

impl MockBalanceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(mut self, token: Address, balance: U256) -> Self {
        self.balances.insert(token, balance);
        self
    }
}

#[async_trait]
impl BalanceProvider for MockBalanceProvider {
    async fn balance_of(&self, token: Address) -> Result<U256> {
        Ok(self.balances.get(&token).copied().unwrap_or(U256::ZERO))
    }
}
