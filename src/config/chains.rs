#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    /// Nominal block interval used to seed the block-time estimator.
    pub block_time_ms: u64,
}

impl ChainConfig {
    pub fn get(chain_id: u64) -> Self {
        match chain_id {
            1 => Self::mainnet(),
            100 => Self::gnosis(),
            137 => Self::polygon(),
            10 => Self::optimism(),
            8453 => Self::base(),
            42161 => Self::arbitrum(),
            11155111 => Self::sepolia(),
            other => Self {
                chain_id: other,
                name: format!("Chain {other}"),
                block_time_ms: 12_000,
            },
        }
    }

    pub fn mainnet() -> Self {
        Self {
            chain_id: 1,
            name: "Ethereum Mainnet".to_string(),
            block_time_ms: 12_000,
        }
    }

    pub fn sepolia() -> Self {
        Self {
            chain_id: 11155111,
            name: "Sepolia".to_string(),
            block_time_ms: 12_000,
        }
    }

    pub fn gnosis() -> Self {
        Self {
            chain_id: 100,
            name: "Gnosis Chain".to_string(),
            block_time_ms: 5_000,
        }
    }

    pub fn polygon() -> Self {
        Self {
            chain_id: 137,
            name: "Polygon PoS".to_string(),
            block_time_ms: 2_000,
        }
    }

    pub fn optimism() -> Self {
        Self {
            chain_id: 10,
            name: "OP Mainnet".to_string(),
            block_time_ms: 2_000,
        }
    }

    pub fn base() -> Self {
        Self {
            chain_id: 8453,
            name: "Base".to_string(),
            block_time_ms: 2_000,
        }
    }

    pub fn arbitrum() -> Self {
        Self {
            chain_id: 42161,
            name: "Arbitrum One".to_string(),
            block_time_ms: 250,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_presets() {
        assert_eq!(ChainConfig::get(1).block_time_ms, 12_000);
        assert_eq!(ChainConfig::get(100).block_time_ms, 5_000);
        assert_eq!(ChainConfig::get(42161).block_time_ms, 250);
    }

    #[test]
    fn test_unknown_chain_falls_back_to_twelve_seconds() {
        let cfg = ChainConfig::get(31337);
        assert_eq!(cfg.chain_id, 31337);
        assert_eq!(cfg.block_time_ms, 12_000);
    }
}
