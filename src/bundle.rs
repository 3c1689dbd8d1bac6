//! Execution bundles: commitment hashing, verification against on-chain commitments, and
//! the calldata needed to execute them one index at a time.

use crate::contracts::{self, IRealityModule, Transaction};
use crate::error::{BundleMismatch, RpcError};
use crate::utils::rpc::RpcAccess;
use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol_types::{eip712_domain, Eip712Domain, SolCall, SolStruct};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Call,
    DelegateCall,
}

impl Operation {
    pub fn as_u8(self) -> u8 {
        match self {
            Operation::Call => 0,
            Operation::DelegateCall => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleTransaction {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub operation: Operation,
}

/// Caller supplied bundle for one proposal. Replaced wholesale on re-import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxBundle {
    pub proposal_id: String,
    pub transactions: Vec<BundleTransaction>,
    /// `hashes[i]` commits to `transactions[i]` at nonce `i`.
    pub hashes: Vec<B256>,
}

/// EIP-712 domain the module signs transaction commitments under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitmentDomain {
    pub chain_id: u64,
    pub module: Address,
}

impl CommitmentDomain {
    pub fn new(chain_id: u64, module: Address) -> Self {
        Self { chain_id, module }
    }

    /// Chain id and module only; the module signs without a name or version.
    pub fn eip712_domain(&self) -> Eip712Domain {
        eip712_domain! {
            chain_id: self.chain_id,
            verifying_contract: self.module,
        }
    }

    pub fn separator(&self) -> B256 {
        self.eip712_domain().separator()
    }

    pub fn transaction_hash(&self, tx: &BundleTransaction, nonce: usize) -> B256 {
        Transaction {
            to: tx.to,
            value: tx.value,
            data: tx.data.clone(),
            operation: tx.operation.as_u8(),
            nonce: U256::from(nonce),
        }
        .eip712_signing_hash(&self.eip712_domain())
    }

    pub fn build_bundle(&self, proposal_id: &str, transactions: Vec<BundleTransaction>) -> TxBundle {
        let hashes = transactions
            .iter()
            .enumerate()
            .map(|(nonce, tx)| self.transaction_hash(tx, nonce))
            .collect();
        TxBundle {
            proposal_id: proposal_id.to_string(),
            transactions,
            hashes,
        }
    }
}

/// Count first, then the first differing index.
pub fn verify_bundle(bundle: &TxBundle, expected: &[B256]) -> Result<(), BundleMismatch> {
    if bundle.hashes.len() != expected.len() {
        return Err(BundleMismatch::Count {
            expected: expected.len(),
            actual: bundle.hashes.len(),
        });
    }
    match bundle
        .hashes
        .iter()
        .zip(expected)
        .position(|(actual, expected)| actual != expected)
    {
        Some(index) => Err(BundleMismatch::Hash {
            index,
            expected: expected[index],
            actual: bundle.hashes[index],
        }),
        None => Ok(()),
    }
}

pub fn encode_execute_proposal_with_index(
    proposal_id: &str,
    tx_hashes: &[B256],
    tx: &BundleTransaction,
    index: usize,
) -> Bytes {
    IRealityModule::executeProposalWithIndexCall {
        proposalId: proposal_id.to_string(),
        txHashes: tx_hashes.to_vec(),
        to: tx.to,
        value: tx.value,
        data: tx.data.clone(),
        operation: tx.operation.as_u8(),
        txIndex: U256::from(index),
    }
    .abi_encode()
    .into()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionProgress {
    pub executed: Vec<bool>,
    /// The module only executes index `i` after `i - 1`.
    pub next_index: Option<usize>,
}

impl ExecutionProgress {
    pub fn from_flags(executed: Vec<bool>) -> Self {
        let next_index = executed.iter().position(|done| !done);
        Self {
            executed,
            next_index,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.next_index.is_none()
    }
}

/// Reads `executedProposalTransactions(keccak(questionText), txHash)` for every commitment.
pub async fn load_execution_progress(
    rpc: &RpcAccess,
    module: Address,
    question_text: &str,
    tx_hashes: &[B256],
) -> Result<ExecutionProgress, RpcError> {
    let question_hash = keccak256(question_text.as_bytes());
    let mut executed = Vec::with_capacity(tx_hashes.len());
    for tx_hash in tx_hashes {
        let raw = rpc
            .call(
                module,
                contracts::encode_executed_transaction(question_hash, *tx_hash),
            )
            .await?;
        let done = IRealityModule::executedProposalTransactionsCall::abi_decode_returns(&raw, true)
            .map(|ret| ret._0)
            .map_err(|err| RpcError::Rejected {
                context: "executedProposalTransactions".to_string(),
                message: err.to_string(),
            })?;
        executed.push(done);
    }
    Ok(ExecutionProgress::from_flags(executed))
}
