pub mod adapter;
pub mod message;

pub use adapter::{Broadcaster, InProcessHub, NetworkReceiver};
pub use message::NetworkMessage;
