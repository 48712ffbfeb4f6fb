//! Session configuration

use std::time::Duration;

/// Default upper bound on one keygen or signing round
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings shared by every session a controller runs
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// A session that has not reached its expected terminal count by now fails
    pub timeout: Duration,
}

impl SessionSettings {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }
}
