//! Distributed Key Generation (DKG) module
//!
//! Feldman-VSS key generation over secp256k1, driven one message at a time
//! so a session can route for every participant in-process.

mod dkg;
mod messages;

pub use dkg::KeygenParty;
pub use messages::*;
