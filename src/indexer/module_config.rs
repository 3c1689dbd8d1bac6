use crate::contracts::{self, IRealityModule};
use crate::error::{DecodeError, MirrorError};
use crate::utils::rpc::RpcAccess;
use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use serde::{Deserialize, Serialize};

/// Module parameters that gate execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Seconds after finalization before a proposal may execute.
    pub question_cooldown: u64,
    /// Seconds after finalization a yes-answer stays valid. Zero disables expiry.
    pub answer_expiration: u64,
    pub minimum_bond: U256,
    pub oracle: Address,
}

fn decode_failed(field: &'static str, err: impl std::fmt::Display) -> MirrorError {
    MirrorError::DecodeFailed(DecodeError::InvalidField {
        field,
        reason: err.to_string(),
    })
}

impl ModuleConfig {
    pub async fn load(rpc: &RpcAccess, module: Address) -> Result<Self, MirrorError> {
        let raw = rpc
            .call(module, contracts::encode_question_cooldown())
            .await?;
        let question_cooldown = IRealityModule::questionCooldownCall::abi_decode_returns(&raw, true)
            .map_err(|e| decode_failed("questionCooldown", e))?
            ._0;

        let raw = rpc
            .call(module, contracts::encode_answer_expiration())
            .await?;
        let answer_expiration = IRealityModule::answerExpirationCall::abi_decode_returns(&raw, true)
            .map_err(|e| decode_failed("answerExpiration", e))?
            ._0;

        let raw = rpc.call(module, contracts::encode_minimum_bond()).await?;
        let minimum_bond = IRealityModule::minimumBondCall::abi_decode_returns(&raw, true)
            .map_err(|e| decode_failed("minimumBond", e))?
            ._0;

        let raw = rpc.call(module, contracts::encode_oracle()).await?;
        let oracle = IRealityModule::oracleCall::abi_decode_returns(&raw, true)
            .map_err(|e| decode_failed("oracle", e))?
            ._0;

        let config = Self {
            question_cooldown: u64::from(question_cooldown),
            answer_expiration: u64::from(answer_expiration),
            minimum_bond,
            oracle,
        };
        tracing::info!(
            "[SYNC] Module {:#x}: cooldown={}s expiration={}s minimum_bond={} oracle={:#x}",
            module,
            config.question_cooldown,
            config.answer_expiration,
            config.minimum_bond,
            config.oracle
        );
        Ok(config)
    }
}
