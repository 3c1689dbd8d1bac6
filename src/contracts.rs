//! ABI surface of the Reality module and the Reality.eth v3 oracle it routes through.

use crate::error::DecodeError;
use alloy::primitives::{b256, keccak256, Address, Bytes, B256, U256};
use alloy::sol_types::SolCall;

alloy::sol! {
    /// EIP-712 struct the module hashes each bundle transaction as.
    struct Transaction {
        address to;
        uint256 value;
        bytes data;
        uint8 operation;
        uint256 nonce;
    }

    interface IRealityModule {
        event ProposalQuestionCreated(bytes32 indexed questionId, string indexed proposalId);

        function addProposal(string proposalId, bytes32[] txHashes) external;
        function addProposalWithNonce(string proposalId, bytes32[] txHashes, uint256 nonce) external;
        function buildQuestion(string proposalId, bytes32[] txHashes) external view returns (string);
        function questionCooldown() external view returns (uint32);
        function answerExpiration() external view returns (uint32);
        function minimumBond() external view returns (uint256);
        function oracle() external view returns (address);
        function executedProposalTransactions(bytes32 questionHash, bytes32 txHash) external view returns (bool);
        function executeProposalWithIndex(
            string proposalId,
            bytes32[] txHashes,
            address to,
            uint256 value,
            bytes data,
            uint8 operation,
            uint256 txIndex
        ) external;
    }

    interface IRealitio {
        event LogNewAnswer(
            bytes32 answer,
            bytes32 indexed question_id,
            bytes32 history_hash,
            address indexed user,
            uint256 bond,
            uint256 ts,
            bool is_commitment
        );

        function questions(bytes32 question_id) external view returns (
            bytes32 content_hash,
            address arbitrator,
            uint32 opening_ts,
            uint32 timeout,
            uint32 finalize_ts,
            bool is_pending_arbitration,
            uint256 bounty,
            bytes32 best_answer,
            bytes32 history_hash,
            uint256 bond,
            uint256 min_bond
        );
        function isFinalized(bytes32 question_id) external view returns (bool);
        function resultFor(bytes32 question_id) external view returns (bytes32);
        function submitAnswer(bytes32 question_id, bytes32 answer, uint256 max_previous) external payable;
        function claimWinnings(
            bytes32 question_id,
            bytes32[] history_hashes,
            address[] addrs,
            uint256[] bonds,
            bytes32[] answers
        ) external;
    }
}

pub const PROPOSAL_QUESTION_CREATED: &str = "ProposalQuestionCreated(bytes32,string)";
pub const LOG_NEW_ANSWER: &str =
    "LogNewAnswer(bytes32,bytes32,bytes32,address,uint256,uint256,bool)";

/// Boolean "yes" as the oracle encodes it.
pub const YES_ANSWER: B256 =
    b256!("0000000000000000000000000000000000000000000000000000000000000001");
pub const INVALID_ANSWER: B256 =
    b256!("ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff");

pub fn event_topic(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

pub fn proposal_created_topic() -> B256 {
    event_topic(PROPOSAL_QUESTION_CREATED)
}

pub fn new_answer_topic() -> B256 {
    event_topic(LOG_NEW_ANSWER)
}

/// Signature first, then the indexed arguments. Checked before handing the log to the
/// ABI decoder so shape errors stay specific.
pub fn check_event_topics(
    topics: &[B256],
    signature: B256,
    expected: usize,
) -> Result<(), DecodeError> {
    let topic0 = topics.first().copied().ok_or(DecodeError::TopicCount { expected, got: 0 })?;
    if topic0 != signature {
        return Err(DecodeError::UnexpectedTopic(topic0));
    }
    if topics.len() != expected {
        return Err(DecodeError::TopicCount {
            expected,
            got: topics.len(),
        });
    }
    Ok(())
}

/// Indexed `string` arguments are stored as their keccak hash.
pub fn proposal_id_topic(proposal_id: &str) -> B256 {
    keccak256(proposal_id.as_bytes())
}

pub fn encode_build_question(proposal_id: &str, tx_hashes: &[B256]) -> Bytes {
    IRealityModule::buildQuestionCall {
        proposalId: proposal_id.to_string(),
        txHashes: tx_hashes.to_vec(),
    }
    .abi_encode()
    .into()
}

pub fn encode_questions(question_id: B256) -> Bytes {
    IRealitio::questionsCall {
        question_id,
    }
    .abi_encode()
    .into()
}

pub fn encode_is_finalized(question_id: B256) -> Bytes {
    IRealitio::isFinalizedCall { question_id }.abi_encode().into()
}

pub fn encode_result_for(question_id: B256) -> Bytes {
    IRealitio::resultForCall { question_id }.abi_encode().into()
}

pub fn encode_executed_transaction(question_hash: B256, tx_hash: B256) -> Bytes {
    IRealityModule::executedProposalTransactionsCall {
        questionHash: question_hash,
        txHash: tx_hash,
    }
    .abi_encode()
    .into()
}

pub fn encode_question_cooldown() -> Bytes {
    IRealityModule::questionCooldownCall {}.abi_encode().into()
}

pub fn encode_answer_expiration() -> Bytes {
    IRealityModule::answerExpirationCall {}.abi_encode().into()
}

pub fn encode_minimum_bond() -> Bytes {
    IRealityModule::minimumBondCall {}.abi_encode().into()
}

pub fn encode_oracle() -> Bytes {
    IRealityModule::oracleCall {}.abi_encode().into()
}

/// Proposal creation calldata, either flavour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalCall {
    pub proposal_id: String,
    pub tx_hashes: Vec<B256>,
    pub nonce: Option<U256>,
}

pub fn decode_proposal_call(input: &[u8]) -> Option<ProposalCall> {
    let selector: [u8; 4] = input.get(..4)?.try_into().ok()?;
    if selector == IRealityModule::addProposalCall::SELECTOR {
        let call = IRealityModule::addProposalCall::abi_decode(input, true).ok()?;
        return Some(ProposalCall {
            proposal_id: call.proposalId,
            tx_hashes: call.txHashes,
            nonce: None,
        });
    }
    if selector == IRealityModule::addProposalWithNonceCall::SELECTOR {
        let call = IRealityModule::addProposalWithNonceCall::abi_decode(input, true).ok()?;
        return Some(ProposalCall {
            proposal_id: call.proposalId,
            tx_hashes: call.txHashes,
            nonce: Some(call.nonce),
        });
    }
    None
}

/// Decoded view of the oracle's `questions(bytes32)` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestionRecord {
    pub arbitrator: Address,
    pub finalize_ts: u32,
    pub is_pending_arbitration: bool,
    pub best_answer: B256,
    pub history_hash: B256,
    pub bond: U256,
    pub min_bond: U256,
}

pub fn decode_question_record(data: &[u8]) -> Option<QuestionRecord> {
    let ret = IRealitio::questionsCall::abi_decode_returns(data, true).ok()?;
    Some(QuestionRecord {
        arbitrator: ret.arbitrator,
        finalize_ts: ret.finalize_ts,
        is_pending_arbitration: ret.is_pending_arbitration,
        best_answer: ret.best_answer,
        history_hash: ret.history_hash,
        bond: ret.bond,
        min_bond: ret.min_bond,
    })
}
