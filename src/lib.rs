pub mod chain;
pub mod cli;
pub mod config;
pub mod core;
pub mod key;
pub mod log;
pub mod net;
pub mod store;
#[cfg(test)]
mod test;
