pub mod keys;
pub mod store;

pub use keys::keccak256;
pub use keys::verify;
pub use keys::ChainAddress;
pub use keys::Pair;
pub use keys::Point;
pub use keys::SIGNATURE_LEN;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum KeyError {
    #[error("invalid curve point")]
    InvalidPoint,
    #[error("invalid private scalar")]
    InvalidScalar,
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("invalid chain address: {0}")]
    InvalidAddress(String),
    #[error("signing failed")]
    Signing,
}
