use serde::{Deserialize, Serialize};

use ep1_core::types::{Address, Amount};

/// Coarse balance banding kept for future stake/stimulus weighting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WealthCategory {
    Low,
    Medium,
    High,
}

impl WealthCategory {
    pub fn from_balance(balance: Amount) -> Self {
        match balance {
            0..=999 => WealthCategory::Low,
            1_000..=999_999 => WealthCategory::Medium,
            _ => WealthCategory::High,
        }
    }
}

/// Cached per-address record derived from UTXO activity. The authoritative
/// balance is always the sum of owned UTXOs; the copy here is a read cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub balance: Amount,
    /// Replay-protection counter, bumped once per committed outgoing tx.
    pub nonce: u64,
    pub wealth_category: Option<WealthCategory>,
    /// Optional did:key binding.
    pub did: Option<String>,
}

impl Account {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            balance: 0,
            nonce: 0,
            wealth_category: None,
            did: None,
        }
    }
}
