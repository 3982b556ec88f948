pub mod pool;

pub use pool::{FifoPolicy, Mempool, SelectionPolicy};
