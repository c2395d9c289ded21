use ethereum_types::Address;
use serde::{Deserialize, Serialize};

/// Chain-wide parameters, fixed at genesis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    /// Aggregate gas limit for the payload transactions of one block.
    pub block_gas_limit: u64,
    /// Recipient of the proposer reward, if any.
    pub coinbase: Address,
    /// The fixed validator set.
    pub validators: Vec<Address>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            chain_id: 8848,
            block_gas_limit: 30_000_000,
            coinbase: Address::zero(),
            validators: Vec::new(),
        }
    }
}

impl ChainConfig {
    pub fn is_validator(&self, address: &Address) -> bool {
        self.validators.contains(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_json_roundtrip() {
        let config = ChainConfig {
            validators: vec![Address::from_low_u64_be(1), Address::from_low_u64_be(2)],
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: ChainConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
        assert!(back.is_validator(&Address::from_low_u64_be(1)));
        assert!(!back.is_validator(&Address::from_low_u64_be(3)));
    }
}
