//! Distributed Signature Generation (DSG) module
//!
//! Threshold Schnorr signing over secp256k1 in three broadcast rounds
//! (nonce commitment, nonce reveal, partial signature), plus the quorum
//! selection that decides which shares take part.

mod dsg;
mod messages;
pub mod quorum;

pub use dsg::SigningParty;
pub use messages::*;
pub use quorum::{Quorum, QuorumSelector};
