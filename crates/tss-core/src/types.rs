//! Core types for threshold wallet sessions

use std::collections::BTreeMap;
use std::fmt;

use k256::{elliptic_curve::Field, ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::curve;
use crate::{Error, Result};

/// Share identifier: a non-zero secp256k1 scalar, stored big-endian.
///
/// Ordering is numeric, so sorting by `ShareId` sorts by the integer value used
/// as the polynomial evaluation point.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShareId([u8; 32]);

impl ShareId {
    /// Draw a fresh random share identifier
    pub fn random() -> Self {
        loop {
            let scalar = Scalar::random(&mut OsRng);
            if !bool::from(scalar.is_zero()) {
                return Self(curve::scalar_to_bytes(&scalar));
            }
        }
    }

    /// Build an identifier from a small integer (fixtures and tests)
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    /// Big-endian bytes of the identifier
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The identifier as a curve scalar
    pub fn to_scalar(&self) -> Scalar {
        curve::scalar_from_bytes(&self.0)
    }
}

impl fmt::Display for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShareId({}..)", &hex::encode(&self.0[..6]))
    }
}

impl Serialize for ShareId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for ShareId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes: [u8; 32] = hex::decode(&s)
            .map_err(serde::de::Error::custom)?
            .try_into()
            .map_err(|_| serde::de::Error::custom("Invalid share id length"))?;
        Ok(Self(bytes))
    }
}

/// Identity of one participant within a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartyId {
    /// Share identifier (evaluation point)
    pub share_id: ShareId,
    /// Display moniker
    pub moniker: String,
    /// Position in the session's participant ordering
    pub index: usize,
}

impl PartyId {
    pub fn new(share_id: ShareId, moniker: impl Into<String>, index: usize) -> Self {
        Self {
            share_id,
            moniker: moniker.into(),
            index,
        }
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{},{}}}", self.index, self.moniker)
    }
}

/// Protocol message exchanged between parties of one session
#[derive(Debug, Clone)]
pub struct Message<T> {
    /// Sending party
    pub from: PartyId,
    /// Recipients; `None` broadcasts to every other participant
    pub to: Option<Vec<PartyId>>,
    /// Engine-specific content
    pub payload: T,
}

impl<T> Message<T> {
    /// Message for every other participant
    pub fn broadcast(from: PartyId, payload: T) -> Self {
        Self {
            from,
            to: None,
            payload,
        }
    }

    /// Point-to-point message
    pub fn direct(from: PartyId, to: PartyId, payload: T) -> Self {
        Self {
            from,
            to: Some(vec![to]),
            payload,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }
}

/// Kind of protocol round a session drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionKind {
    Keygen,
    Signing,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Keygen => write!(f, "keygen"),
            SessionKind::Signing => write!(f, "signing"),
        }
    }
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Running,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

/// Key share held by a party after keygen
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyShare {
    /// This party's share identifier
    #[zeroize(skip)]
    pub share_id: ShareId,

    /// Total number of parties
    pub n_parties: usize,

    /// Threshold; `threshold + 1` shares are needed to sign
    pub threshold: usize,

    /// This party's secret share (x_i), big-endian
    secret_share: [u8; 32],

    /// Aggregated public key (compressed)
    #[zeroize(skip)]
    pub public_key: Vec<u8>,

    /// Public key shares of all parties (compressed)
    #[zeroize(skip)]
    pub public_shares: BTreeMap<ShareId, Vec<u8>>,
}

impl KeyShare {
    pub fn new(
        share_id: ShareId,
        n_parties: usize,
        threshold: usize,
        secret_share: &Scalar,
        public_key: Vec<u8>,
        public_shares: BTreeMap<ShareId, Vec<u8>>,
    ) -> Self {
        Self {
            share_id,
            n_parties,
            threshold,
            secret_share: curve::scalar_to_bytes(secret_share),
            public_key,
            public_shares,
        }
    }

    /// This party's secret share as a scalar
    pub fn secret_scalar(&self) -> Scalar {
        curve::scalar_from_bytes(&self.secret_share)
    }

    /// Get the public key as a ProjectivePoint
    pub fn public_key_point(&self) -> Result<ProjectivePoint> {
        curve::decode_point(&self.public_key)
    }

    /// Public share of the party holding `share_id`
    pub fn public_share_point(&self, share_id: &ShareId) -> Result<ProjectivePoint> {
        let bytes = self.public_shares.get(share_id).ok_or_else(|| {
            Error::InvalidWalletRecord(format!("no public share for {}", share_id))
        })?;
        curve::decode_point(bytes)
    }
}

impl fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyShare")
            .field("share_id", &self.share_id)
            .field("n_parties", &self.n_parties)
            .field("threshold", &self.threshold)
            .field("public_key", &hex::encode(&self.public_key))
            .finish_non_exhaustive()
    }
}

/// Aggregated Schnorr signature over secp256k1
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Nonce commitment R (compressed)
    pub r: Vec<u8>,
    /// Response scalar s
    pub s: [u8; 32],
}

impl Signature {
    pub fn new(r_point: &ProjectivePoint, s: &Scalar) -> Self {
        Self {
            r: curve::encode_point(r_point),
            s: curve::scalar_to_bytes(s),
        }
    }

    /// Convert to bytes (R || s)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.r.len() + self.s.len());
        bytes.extend_from_slice(&self.r);
        bytes.extend_from_slice(&self.s);
        bytes
    }

    /// Hex encoding of `R || s`
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Check `s·G == R + e·P` for the given public key and message digest
    pub fn verify(&self, public_key: &ProjectivePoint, digest: &[u8; 32]) -> Result<()> {
        let r_point = curve::decode_point(&self.r)?;
        let s = curve::scalar_from_bytes(&self.s);
        let e = curve::challenge(&r_point, public_key, digest);

        if ProjectivePoint::GENERATOR * s != r_point + *public_key * e {
            return Err(Error::Internal("Signature does not verify".into()));
        }
        Ok(())
    }
}
