//! secp256k1 helpers shared by the protocol engines

use k256::{
    elliptic_curve::{
        bigint::U256,
        ops::Reduce,
        sec1::{FromEncodedPoint, ToEncodedPoint},
    },
    AffinePoint, EncodedPoint, ProjectivePoint, Scalar,
};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Domain separator for the Schnorr challenge hash
const CHALLENGE_TAG: &[u8] = b"tss-wallet/schnorr";

/// Reduce 32 big-endian bytes to a scalar
pub fn scalar_from_bytes(bytes: &[u8; 32]) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(&(*bytes).into())
}

/// Big-endian bytes of a scalar
pub fn scalar_to_bytes(scalar: &Scalar) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(scalar.to_bytes().as_slice());
    out
}

/// Parse a 32-byte slice received from a peer
pub fn scalar_from_slice(bytes: &[u8]) -> Option<Scalar> {
    let array: [u8; 32] = bytes.try_into().ok()?;
    Some(scalar_from_bytes(&array))
}

/// Compressed SEC1 encoding of a point
pub fn encode_point(point: &ProjectivePoint) -> Vec<u8> {
    point.to_affine().to_encoded_point(true).as_bytes().to_vec()
}

/// Decode a SEC1 point (compressed or uncompressed)
pub fn decode_point(bytes: &[u8]) -> Result<ProjectivePoint> {
    let encoded =
        EncodedPoint::from_bytes(bytes).map_err(|e| Error::Internal(format!("Invalid point: {}", e)))?;
    let affine_opt = AffinePoint::from_encoded_point(&encoded);
    let affine: AffinePoint = Option::<AffinePoint>::from(affine_opt)
        .ok_or_else(|| Error::Internal("Point is not on the curve".into()))?;
    Ok(ProjectivePoint::from(affine))
}

/// Affine X and Y coordinates, fixed-width big-endian
pub fn coordinates(point: &ProjectivePoint) -> ([u8; 32], [u8; 32]) {
    let uncompressed = point.to_affine().to_encoded_point(false);
    let bytes = uncompressed.as_bytes();
    let mut x = [0u8; 32];
    let mut y = [0u8; 32];
    // The identity encodes as a single byte; it has no coordinates.
    if bytes.len() == 65 {
        x.copy_from_slice(&bytes[1..33]);
        y.copy_from_slice(&bytes[33..65]);
    }
    (x, y)
}

/// Evaluate a polynomial at `x` (Horner's rule)
pub fn evaluate_polynomial(coefficients: &[Scalar], x: &Scalar) -> Scalar {
    coefficients
        .iter()
        .rev()
        .fold(Scalar::ZERO, |acc, coef| acc * x + coef)
}

/// Evaluate committed coefficients `Σ C_k · x^k`
pub fn evaluate_commitments(commitments: &[ProjectivePoint], x: &Scalar) -> ProjectivePoint {
    commitments
        .iter()
        .rev()
        .fold(ProjectivePoint::IDENTITY, |acc, c| acc * x + c)
}

/// Lagrange coefficient at zero for `x_i` over the evaluation points `xs`
pub fn lagrange_at_zero(x_i: &Scalar, xs: &[Scalar]) -> Option<Scalar> {
    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;

    for x_j in xs.iter().filter(|x_j| *x_j != x_i) {
        numerator *= x_j;
        denominator *= *x_j - x_i;
    }

    Option::<Scalar>::from(denominator.invert()).map(|inv| numerator * inv)
}

/// Schnorr challenge `e = H(tag || R || P || digest)`
pub fn challenge(r_point: &ProjectivePoint, public_key: &ProjectivePoint, digest: &[u8; 32]) -> Scalar {
    let mut hasher = Sha256::new();
    hasher.update(CHALLENGE_TAG);
    hasher.update(encode_point(r_point));
    hasher.update(encode_point(public_key));
    hasher.update(digest);
    let hash: [u8; 32] = hasher.finalize().into();
    scalar_from_bytes(&hash)
}

/// Commitment to a nonce point
pub fn commit_point(point: &ProjectivePoint) -> [u8; 32] {
    Sha256::digest(encode_point(point)).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polynomial_evaluation() {
        // 3 + 2x + x^2 at x = 4
        let poly = [Scalar::from(3u64), Scalar::from(2u64), Scalar::from(1u64)];
        assert_eq!(evaluate_polynomial(&poly, &Scalar::from(4u64)), Scalar::from(27u64));

        let commitments: Vec<_> = poly.iter().map(|c| ProjectivePoint::GENERATOR * c).collect();
        assert_eq!(
            evaluate_commitments(&commitments, &Scalar::from(4u64)),
            ProjectivePoint::GENERATOR * Scalar::from(27u64)
        );
    }

    #[test]
    fn test_lagrange_interpolation() {
        // f(x) = 11 + 5x, shares at x = 2, 9
        let poly = [Scalar::from(11u64), Scalar::from(5u64)];
        let xs = [Scalar::from(2u64), Scalar::from(9u64)];

        let secret = xs.iter().fold(Scalar::ZERO, |acc, x| {
            let lambda = lagrange_at_zero(x, &xs).unwrap();
            acc + lambda * evaluate_polynomial(&poly, x)
        });

        assert_eq!(secret, Scalar::from(11u64));
    }

    #[test]
    fn test_point_roundtrip_and_coordinates() {
        let point = ProjectivePoint::GENERATOR * Scalar::from(5u64);
        assert_eq!(decode_point(&encode_point(&point)).unwrap(), point);

        let (x, _) = coordinates(&ProjectivePoint::GENERATOR);
        assert_eq!(
            hex::encode(x),
            "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
        assert!(decode_point(&[0x02; 5]).is_err());
    }
}
