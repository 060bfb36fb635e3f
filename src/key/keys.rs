use super::KeyError;

use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::RecoveryId;
use k256::ecdsa::Signature;
use k256::ecdsa::SigningKey;
use k256::ecdsa::VerifyingKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::EncodedPoint;
use k256::FieldBytes;
use sha3::Digest;
use sha3::Keccak256;
use std::fmt::Debug;
use std::fmt::Display;
use std::str::FromStr;

/// Length of `r || s || v` signature.
pub const SIGNATURE_LEN: usize = 65;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Affine secp256k1 point, coordinates are big-endian.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Point {
    pub x: [u8; 32],
    pub y: [u8; 32],
}

impl Point {
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let encoded = key.to_encoded_point(false);
        // Uncompressed SEC1: 0x04 || x || y
        let bytes = encoded.as_bytes();
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        x.copy_from_slice(&bytes[1..33]);
        y.copy_from_slice(&bytes[33..65]);

        Self { x, y }
    }

    pub fn to_verifying_key(&self) -> Result<VerifyingKey, KeyError> {
        let encoded = EncodedPoint::from_affine_coordinates(
            FieldBytes::from_slice(&self.x),
            FieldBytes::from_slice(&self.y),
            false,
        );
        VerifyingKey::from_encoded_point(&encoded).map_err(|_| KeyError::InvalidPoint)
    }

    /// Parses point from hex coordinates, leading zeros may be omitted.
    pub fn from_hex(x: &str, y: &str) -> Result<Self, KeyError> {
        Ok(Self {
            x: coordinate_from_hex(x)?,
            y: coordinate_from_hex(y)?,
        })
    }

    pub fn x_hex(&self) -> String {
        hex::encode(self.x)
    }

    pub fn y_hex(&self) -> String {
        hex::encode(self.y)
    }

    /// SEC1 compressed encoding.
    pub fn compressed(&self) -> [u8; 33] {
        let mut out = [0u8; 33];
        out[0] = if self.y[31] & 1 == 0 { 0x02 } else { 0x03 };
        out[1..].copy_from_slice(&self.x);
        out
    }

    /// Ledger account of the key holder: last 20 bytes of keccak(x || y).
    pub fn address(&self) -> ChainAddress {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&self.x);
        buf[32..].copy_from_slice(&self.y);
        let hash = keccak256(&buf);
        let mut address = [0u8; 20];
        address.copy_from_slice(&hash[12..]);

        ChainAddress(address)
    }
}

impl Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x_hex(), self.y_hex())
    }
}

impl Debug for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Point{self}")
    }
}

fn coordinate_from_hex(value: &str) -> Result<[u8; 32], KeyError> {
    let value = value.strip_prefix("0x").unwrap_or(value);
    if value.len() > 64 {
        return Err(KeyError::InvalidHex(value.into()));
    }
    let padded = format!("{value:0>64}");
    let mut out = [0u8; 32];
    hex::decode_to_slice(padded, &mut out).map_err(|_| KeyError::InvalidHex(value.into()))?;

    Ok(out)
}

/// 20-byte ledger account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ChainAddress(pub [u8; 20]);

impl ChainAddress {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl Display for ChainAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Debug for ChainAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl FromStr for ChainAddress {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let mut out = [0u8; 20];
        hex::decode_to_slice(raw, &mut out).map_err(|_| KeyError::InvalidAddress(s.into()))?;
        Ok(Self(out))
    }
}

/// Node long-term secp256k1 key pair.
pub struct Pair {
    private: SigningKey,
    public: Point,
    address: ChainAddress,
}

impl Pair {
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut rand::rngs::OsRng))
    }

    pub fn from_bytes(private: &[u8]) -> Result<Self, KeyError> {
        let key = SigningKey::from_slice(private).map_err(|_| KeyError::InvalidScalar)?;
        Ok(Self::from_signing_key(key))
    }

    fn from_signing_key(private: SigningKey) -> Self {
        let public = Point::from_verifying_key(private.verifying_key());
        let address = public.address();
        Self {
            private,
            public,
            address,
        }
    }

    pub fn private_bytes(&self) -> [u8; 32] {
        self.private.to_bytes().into()
    }

    pub fn public(&self) -> &Point {
        &self.public
    }

    pub fn address(&self) -> ChainAddress {
        self.address
    }

    /// Signs keccak256 of `msg`. Output layout is `r || s || v` with `v` in `{0, 1}`.
    pub fn sign(&self, msg: &[u8]) -> Result<[u8; SIGNATURE_LEN], KeyError> {
        self.sign_prehash(&keccak256(msg))
    }

    pub fn sign_prehash(&self, digest: &[u8; 32]) -> Result<[u8; SIGNATURE_LEN], KeyError> {
        let (signature, recovery_id) = self
            .private
            .sign_prehash_recoverable(digest)
            .map_err(|_| KeyError::Signing)?;

        let mut out = [0u8; SIGNATURE_LEN];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = recovery_id.to_byte();
        Ok(out)
    }
}

impl Debug for Pair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pair")
            .field("public", &self.public)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Verifies `r || s || v` signature of keccak256(`msg`) under `public`.
///
/// The recovery byte is checked as well: the key recovered from the signature
/// must be `public`, so no byte of the signature is malleable.
pub fn verify(public: &Point, sig: &[u8], msg: &[u8]) -> bool {
    if sig.len() != SIGNATURE_LEN {
        return false;
    }
    let Ok(key) = public.to_verifying_key() else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig[..64]) else {
        return false;
    };
    let v = if sig[64] >= 27 { sig[64] - 27 } else { sig[64] };
    let Some(recovery_id) = RecoveryId::from_byte(v).filter(|_| v <= 1) else {
        return false;
    };

    let digest = keccak256(msg);
    if key.verify_prehash(&digest, &signature).is_err() {
        return false;
    }
    match VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id) {
        Ok(recovered) => recovered == key,
        Err(_) => false,
    }
}
