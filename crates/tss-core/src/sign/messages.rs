//! DSG message types

use serde::{Deserialize, Serialize};

/// Round 1 message: Commitment to the nonce point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DsgRound1Message {
    /// SHA-256 of the compressed nonce point R_i
    pub nonce_commitment: [u8; 32],
}

/// Round 2 message: Nonce reveal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DsgRound2Message {
    /// Compressed nonce point R_i
    pub nonce_point: Vec<u8>,
}

/// Round 3 message: Partial signature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DsgPartialMessage {
    /// Sigma share s_i
    pub sigma_share: Vec<u8>,
}

/// Payload of a signing session message; every round is broadcast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SigningMessage {
    Commitment(DsgRound1Message),
    Reveal(DsgRound2Message),
    Partial(DsgPartialMessage),
}
