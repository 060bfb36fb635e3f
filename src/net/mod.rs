pub mod control;
pub mod details;
pub mod peer;
pub mod public;
pub mod transport;
pub mod utils;
