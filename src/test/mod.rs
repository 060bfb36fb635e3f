pub mod helpers;
pub mod utils;

pub use helpers::node_metadata;
pub use helpers::MemLedger;
pub use helpers::MockPeerClient;
pub use helpers::MockTransport;
