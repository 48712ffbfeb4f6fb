//! # TSS Core
//!
//! Threshold wallet sessions over secp256k1.
//!
//! This crate provides:
//! - Distributed Key Generation (Feldman VSS)
//! - Threshold signing by a randomly selected quorum
//! - In-process routing between the simulated parties of one session
//! - A concurrent registry of the resulting wallets
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tss_core::{SessionController, SessionSettings, WalletRegistry};
//!
//! let controller = SessionController::new(Arc::new(WalletRegistry::new()), SessionSettings::default());
//!
//! // 4 parties, any 3 of them can sign
//! let address = controller.run_keygen(4, 2).await?;
//!
//! let signature = controller.run_signing(&address, b"hello").await?;
//! println!("{}", signature.to_hex());
//! ```

pub mod address;
pub mod config;
pub mod curve;
pub mod error;
pub mod keygen;
pub mod mpc;
pub mod session;
pub mod sign;
pub mod types;
pub mod wallet;

pub use config::SessionSettings;
pub use error::{Error, Result};
pub use session::{Session, SessionController};
pub use types::{KeyShare, Message, PartyId, SessionKind, SessionState, ShareId, Signature};
pub use wallet::{Wallet, WalletRegistry};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default number of parties in a new wallet
pub const DEFAULT_PARTICIPANTS: usize = 4;

/// Default threshold; `threshold + 1` parties sign
pub const DEFAULT_THRESHOLD: usize = 2;

/// Largest wallet a keygen session will set up
pub const MAX_PARTICIPANTS: usize = 64;
