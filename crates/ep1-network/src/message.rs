use serde::{Deserialize, Serialize};

use ep1_core::block::Block;
use ep1_core::transaction::Transaction;

/// Tagged peer traffic. One enum, one channel; the intake loop matches on
/// the variant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum NetworkMessage {
    Block(Block),
    Transaction(Transaction),
}
