use serde::{Deserialize, Serialize};
use std::fmt;

use ep1_core::types::{Address, Amount, TxId};

/// Key of an unspent output: the creating transaction plus output index.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtxoKey {
    pub tx_id: TxId,
    pub vout: u32,
}

impl UtxoKey {
    pub fn new(tx_id: TxId, vout: u32) -> Self {
        Self { tx_id, vout }
    }
}

impl fmt::Display for UtxoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_id, self.vout)
    }
}

impl fmt::Debug for UtxoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UtxoKey({}…:{})", &self.tx_id.to_hex()[..12], self.vout)
    }
}

/// An unspent output: value owned by a recipient address.
///
/// Lives from the block that creates it until a later committed transaction
/// spends it. Values are always positive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub value: Amount,
    pub recipient: Address,
}
