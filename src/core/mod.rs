mod coordinator;
pub mod daemon;
mod monitors;
pub mod resolver;
mod retry;
pub mod state;

pub use coordinator::Collaborators;
pub use coordinator::Coordinator;
pub use coordinator::Handover;
pub use coordinator::LookupError;
pub use coordinator::Shutdown;
pub use coordinator::Status;
pub use coordinator::Stopped;
pub use coordinator::VerifyError;
