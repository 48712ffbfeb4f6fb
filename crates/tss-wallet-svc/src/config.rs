//! Command-line and environment configuration

use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use tss_core::{SessionSettings, DEFAULT_PARTICIPANTS, DEFAULT_THRESHOLD, MAX_PARTICIPANTS};

/// Threshold wallet service CLI arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "tss-wallet-svc")]
#[command(about = "HTTP service for threshold wallet creation and signing")]
#[command(version)]
pub struct Args {
    /// Listen address
    #[arg(short, long, env = "TSS_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// Parties in each new wallet
    #[arg(long, env = "TSS_PARTICIPANTS", default_value_t = DEFAULT_PARTICIPANTS)]
    pub participants: usize,

    /// Threshold of each new wallet; threshold + 1 parties sign
    #[arg(long, env = "TSS_THRESHOLD", default_value_t = DEFAULT_THRESHOLD)]
    pub threshold: usize,

    /// Upper bound on one keygen or signing round, in seconds
    #[arg(long, env = "TSS_SESSION_TIMEOUT_SECS", default_value_t = 30)]
    pub session_timeout_secs: u64,

    /// Emit logs as JSON
    #[arg(long, env = "TSS_LOG_JSON")]
    pub log_json: bool,
}

impl Args {
    /// Reject a wallet shape that every `POST /wallet` would fail on
    pub fn validate(&self) -> Result<()> {
        if !(2..=MAX_PARTICIPANTS).contains(&self.participants) {
            bail!(
                "--participants must be in 2..={}, got {}",
                MAX_PARTICIPANTS,
                self.participants
            );
        }
        if self.threshold == 0 || self.threshold >= self.participants {
            bail!(
                "--threshold must be in 1..{}, got {}",
                self.participants,
                self.threshold
            );
        }
        Ok(())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings::default().with_timeout(Duration::from_secs(self.session_timeout_secs))
    }
}
