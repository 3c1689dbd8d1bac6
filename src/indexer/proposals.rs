use crate::chain::RawLog;
use crate::contracts::{self, IRealityModule};
use crate::error::{DecodeError, MirrorError, RpcError};
use crate::model::{Lookup, Proposal};
use crate::utils::rpc::RpcAccess;
use alloy::primitives::{keccak256, Address, B256};
use alloy::sol_types::{SolCall, SolEvent};
use serde::{Deserialize, Serialize};

/// U+241F SYMBOL FOR UNIT SEPARATOR, between proposal id and bundle hash.
pub const QUESTION_SEPARATOR: char = '\u{241f}';

/// Fields the creation log itself carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreationLog {
    pub question_id: B256,
    pub proposal_id_hash: B256,
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: B256,
}

pub fn parse_creation_log(log: &RawLog) -> Result<CreationLog, DecodeError> {
    contracts::check_event_topics(&log.topics, contracts::proposal_created_topic(), 3)?;
    let event = IRealityModule::ProposalQuestionCreated::decode_raw_log(
        log.topics.iter().copied(),
        &log.data,
        true,
    )
    .map_err(|err| DecodeError::Event(err.to_string()))?;
    Ok(CreationLog {
        question_id: event.questionId,
        // Indexed strings only survive as their keccak hash.
        proposal_id_hash: event.proposalId,
        block_number: log.block_number,
        log_index: log.log_index,
        transaction_hash: log.transaction_hash,
    })
}

/// Unprefixed lowercase hex of `keccak256(concat(tx_hashes))`.
pub fn bundle_hash_text(tx_hashes: &[B256]) -> String {
    let mut packed = Vec::with_capacity(tx_hashes.len() * 32);
    for hash in tx_hashes {
        packed.extend_from_slice(hash.as_slice());
    }
    hex::encode(keccak256(packed))
}

/// Local mirror of the module's `buildQuestion`.
pub fn build_question_text(proposal_id: &str, tx_hashes: &[B256]) -> String {
    format!(
        "{proposal_id}{QUESTION_SEPARATOR}{}",
        bundle_hash_text(tx_hashes)
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedQuestion {
    pub proposal_id: String,
    pub bundle_hash: String,
}

impl ParsedQuestion {
    pub fn commits_to(&self, tx_hashes: &[B256]) -> bool {
        self.bundle_hash
            .trim_start_matches("0x")
            .eq_ignore_ascii_case(&bundle_hash_text(tx_hashes))
    }
}

/// Splits on the last separator. Proposal ids are opaque and may contain anything else.
pub fn parse_question_text(text: &str) -> Option<ParsedQuestion> {
    let (proposal_id, bundle_hash) = text.rsplit_once(QUESTION_SEPARATOR)?;
    if bundle_hash.is_empty() {
        return None;
    }
    Some(ParsedQuestion {
        proposal_id: proposal_id.to_string(),
        bundle_hash: bundle_hash.to_string(),
    })
}

impl Proposal {
    /// Record as known from the log alone. Enrichment fields start `Pending`.
    pub fn from_creation(creation: &CreationLog) -> Self {
        Self {
            question_id: creation.question_id,
            proposal_id: Lookup::Pending,
            tx_hashes: Lookup::Pending,
            question_text: Lookup::Pending,
            created_block: creation.block_number,
            created_log_index: creation.log_index,
            created_tx_hash: creation.transaction_hash,
            created_timestamp: Lookup::Pending,
        }
    }
}

pub struct ProposalDecoder<'a> {
    rpc: &'a RpcAccess,
    module: Address,
}

impl<'a> ProposalDecoder<'a> {
    pub fn new(rpc: &'a RpcAccess, module: Address) -> Self {
        Self { rpc, module }
    }

    /// Decodes one creation log into a fully enriched proposal.
    ///
    /// Malformed logs fail with [`MirrorError::DecodeFailed`]. Exhausted RPC calls while
    /// fetching the creating transaction propagate so the range is retried later. Every
    /// other enrichment failure degrades the matching field to `Unavailable`.
    pub async fn decode(&self, log: &RawLog) -> Result<Proposal, MirrorError> {
        let creation = parse_creation_log(log)?;
        let mut proposal = Proposal::from_creation(&creation);

        match self.recover_call(&creation).await? {
            Some((proposal_id, tx_hashes)) => {
                proposal.question_text = self.question_text(&proposal_id, &tx_hashes).await;
                proposal.proposal_id = Lookup::Found(proposal_id);
                proposal.tx_hashes = Lookup::Found(tx_hashes);
            }
            None => {
                proposal.proposal_id = Lookup::Unavailable;
                proposal.tx_hashes = Lookup::Unavailable;
                proposal.question_text = Lookup::Unavailable;
            }
        }

        proposal.created_timestamp = match self.rpc.block_timestamp(creation.block_number).await {
            Ok(ts) => Lookup::from_option(ts),
            Err(err) => {
                tracing::debug!(
                    "[SCAN] Timestamp for block #{} unavailable: {}",
                    creation.block_number,
                    err
                );
                Lookup::Unavailable
            }
        };
        Ok(proposal)
    }

    async fn recover_call(
        &self,
        creation: &CreationLog,
    ) -> Result<Option<(String, Vec<B256>)>, MirrorError> {
        let input = match self.rpc.transaction_input(creation.transaction_hash).await {
            Ok(Some(input)) => input,
            Ok(None) => {
                tracing::warn!(
                    "[SCAN] Creating tx {:#x} for question {:#x} not found",
                    creation.transaction_hash,
                    creation.question_id
                );
                return Ok(None);
            }
            Err(err @ RpcError::Exhausted { .. }) => return Err(err.into()),
            Err(err) => {
                tracing::warn!(
                    "[SCAN] Creating tx {:#x} unreadable: {}",
                    creation.transaction_hash,
                    err
                );
                return Ok(None);
            }
        };

        match decode_creation_input(&input, creation.proposal_id_hash) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(err) => {
                // Calls routed through a Safe or another wrapper land here.
                tracing::warn!(
                    "[SCAN] Question {:#x}: {}",
                    creation.question_id,
                    err
                );
                Ok(None)
            }
        }
    }

    async fn question_text(&self, proposal_id: &str, tx_hashes: &[B256]) -> Lookup<String> {
        let raw = match self
            .rpc
            .call(
                self.module,
                contracts::encode_build_question(proposal_id, tx_hashes),
            )
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                tracing::debug!("[SCAN] buildQuestion for `{}` failed: {}", proposal_id, err);
                return Lookup::Unavailable;
            }
        };
        match IRealityModule::buildQuestionCall::abi_decode_returns(&raw, true) {
            Ok(ret) => Lookup::Found(ret._0),
            Err(err) => {
                tracing::debug!("[SCAN] buildQuestion for `{}` undecodable: {}", proposal_id, err);
                Lookup::Unavailable
            }
        }
    }
}

/// Decodes creation calldata and checks it against the log's hashed proposal id.
pub fn decode_creation_input(
    input: &[u8],
    proposal_id_hash: B256,
) -> Result<(String, Vec<B256>), DecodeError> {
    let call = contracts::decode_proposal_call(input).ok_or_else(|| {
        DecodeError::Calldata(format!(
            "{} byte(s) match neither addProposal nor addProposalWithNonce",
            input.len()
        ))
    })?;
    if contracts::proposal_id_topic(&call.proposal_id) != proposal_id_hash {
        return Err(DecodeError::Calldata(format!(
            "proposal id `{}` does not hash to the logged topic",
            call.proposal_id
        )));
    }
    Ok((call.proposal_id, call.tx_hashes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockChain, MockConnector, ProposalFixture};
    use crate::utils::rpc::RetryPolicy;
    use alloy::primitives::Bytes;
    use std::sync::Arc;

    const MODULE: Address = Address::repeat_byte(0x4d);

    fn access(chain: &Arc<MockChain>) -> RpcAccess {
        RpcAccess::connect(
            Arc::new(MockConnector::single("mock", chain.clone())),
            "mock",
            RetryPolicy {
                attempts: 2,
                base_delay_ms: 1,
                max_delay_ms: 1,
                call_timeout_ms: 1_000,
            },
        )
        .expect("connect")
    }

    fn fixture() -> ProposalFixture {
        ProposalFixture {
            module: MODULE,
            question_id: B256::repeat_byte(0x51),
            proposal_id: "QmProposal".to_string(),
            tx_hashes: vec![B256::repeat_byte(0xa0), B256::repeat_byte(0xa1)],
            block: 40,
            log_index: 2,
            tx_hash: B256::repeat_byte(0x77),
        }
    }

    fn creation_log(chain: &MockChain) -> RawLog {
        chain.recorded_logs().remove(0)
    }

    #[test]
    fn test_question_text_parse_and_commitment() {
        let hashes = vec![B256::repeat_byte(1)];
        let text = build_question_text("Qm\u{241f}odd", &hashes);
        let parsed = parse_question_text(&text).expect("separator present");
        assert_eq!(parsed.proposal_id, "Qm\u{241f}odd");
        assert!(parsed.commits_to(&hashes));
        assert!(!parsed.commits_to(&[]));
        assert!(parse_question_text("no separator").is_none());
        assert!(parse_question_text("trailing\u{241f}").is_none());
    }

    #[test]
    fn test_strict_creation_log_parse() {
        let mut log = RawLog {
            address: MODULE,
            topics: vec![contracts::proposal_created_topic(), B256::repeat_byte(1)],
            data: Bytes::new(),
            block_number: 1,
            log_index: 0,
            transaction_hash: B256::ZERO,
            transaction_index: 0,
        };
        assert_eq!(
            parse_creation_log(&log),
            Err(DecodeError::TopicCount {
                expected: 3,
                got: 2
            })
        );
        log.topics.push(contracts::proposal_id_topic("QmTopic"));
        let parsed = parse_creation_log(&log).expect("well formed");
        assert_eq!(parsed.question_id, B256::repeat_byte(1));
        assert_eq!(parsed.proposal_id_hash, contracts::proposal_id_topic("QmTopic"));

        log.topics[0] = B256::repeat_byte(9);
        assert_eq!(
            parse_creation_log(&log),
            Err(DecodeError::UnexpectedTopic(B256::repeat_byte(9)))
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_decode_recovers_fields_from_transaction() {
        let chain = Arc::new(MockChain::new(100, 1_600_000_000, 5));
        let fx = fixture();
        chain.add_proposal(&fx);
        let rpc = access(&chain);
        let proposal = ProposalDecoder::new(&rpc, MODULE)
            .decode(&creation_log(&chain))
            .await
            .expect("decodes");

        assert_eq!(proposal.question_id, fx.question_id);
        assert_eq!(proposal.proposal_id, Lookup::Found(fx.proposal_id.clone()));
        assert_eq!(proposal.tx_hashes, Lookup::Found(fx.tx_hashes.clone()));
        assert_eq!(
            proposal.question_text,
            Lookup::Found(build_question_text(&fx.proposal_id, &fx.tx_hashes))
        );
        assert_eq!(proposal.created_timestamp, Lookup::Found(1_600_000_200));
        assert_eq!((proposal.created_block, proposal.created_log_index), (40, 2));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_undecodable_input_degrades_instead_of_failing() {
        let chain = Arc::new(MockChain::new(100, 1_600_000_000, 5));
        let fx = fixture();
        chain.add_proposal(&fx);
        chain.add_transaction(fx.tx_hash, Bytes::from(vec![0x12, 0x34, 0x56, 0x78]));
        chain.remove_block(fx.block);
        let rpc = access(&chain);
        let proposal = ProposalDecoder::new(&rpc, MODULE)
            .decode(&creation_log(&chain))
            .await
            .expect("degrades");
        assert_eq!(proposal.proposal_id, Lookup::Unavailable);
        assert_eq!(proposal.tx_hashes, Lookup::Unavailable);
        assert_eq!(proposal.question_text, Lookup::Unavailable);
        assert_eq!(proposal.created_timestamp, Lookup::Unavailable);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_mismatched_proposal_hash_is_rejected() {
        let fx = fixture();
        let input = IRealityModule::addProposalCall {
            proposalId: "QmOther".to_string(),
            txHashes: fx.tx_hashes.clone(),
        }
        .abi_encode();
        let err = decode_creation_input(&input, contracts::proposal_id_topic(&fx.proposal_id))
            .expect_err("hash mismatch");
        assert!(matches!(err, DecodeError::Calldata(_)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_failed_question_build_leaves_other_fields() {
        let chain = Arc::new(MockChain::new(100, 1_600_000_000, 5));
        let fx = fixture();
        chain.add_proposal(&fx);
        chain.set_call_revert(
            MODULE,
            contracts::encode_build_question(&fx.proposal_id, &fx.tx_hashes),
            "execution reverted",
        );
        let rpc = access(&chain);
        let proposal = ProposalDecoder::new(&rpc, MODULE)
            .decode(&creation_log(&chain))
            .await
            .expect("decodes");
        assert!(proposal.tx_hashes.is_found());
        assert_eq!(proposal.question_text, Lookup::Unavailable);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_exhausted_transaction_fetch_propagates() {
        let chain = Arc::new(MockChain::new(100, 1_600_000_000, 5));
        let fx = fixture();
        chain.add_proposal(&fx);
        chain.fail_next("eth_getTransactionByHash", 2, "connection refused");
        let rpc = access(&chain);
        let err = ProposalDecoder::new(&rpc, MODULE)
            .decode(&creation_log(&chain))
            .await
            .expect_err("exhausted");
        assert!(err.is_transient());
    }
}
