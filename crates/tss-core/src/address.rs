//! Ethereum-style wallet address derivation

use tiny_keccak::{Hasher, Keccak};

use crate::curve;
use crate::Result;

/// Derive the address for public key coordinates `(X, Y)`.
///
/// Keccak-256 over `X || Y` (64 bytes, no SEC1 tag), keep the low 20 bytes,
/// render as `0x`-prefixed lowercase hex.
pub fn derive(x: &[u8; 32], y: &[u8; 32]) -> String {
    let mut hasher = Keccak::v256();
    hasher.update(x);
    hasher.update(y);

    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);

    format!("0x{}", hex::encode(&hash[12..]))
}

/// Derive the address for a SEC1-encoded public key
pub fn from_public_key(public_key: &[u8]) -> Result<String> {
    let point = curve::decode_point(public_key)?;
    let (x, y) = curve::coordinates(&point);
    Ok(derive(&x, &y))
}

/// Whether `address` has the `0x` + 40 lowercase hex shape
pub fn is_well_formed(address: &str) -> bool {
    address
        .strip_prefix("0x")
        .map(|hex| hex.len() == 40 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')))
        .unwrap_or(false)
}
