//! DKG message types

use serde::{Deserialize, Serialize};

/// Round 1 message: Commitment to secret polynomial
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkgRound1Message {
    /// Commitments to polynomial coefficients (Feldman VSS), compressed points
    pub commitments: Vec<Vec<u8>>,
}

/// Round 2 message: Secret share
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkgRound2Message {
    /// Sender's polynomial evaluated at the receiver's share id
    pub share: Vec<u8>,
}

/// Payload of a keygen session message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KeygenMessage {
    /// Broadcast
    Commitment(DkgRound1Message),
    /// Point-to-point
    Share(DkgRound2Message),
}
