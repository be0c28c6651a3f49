use std::time::{SystemTime, UNIX_EPOCH};

use rsntp::SntpClient;

use crate::errors::StorefrontError;

/// Wall-clock source used for token expiry checks.
pub trait Clock: Send + Sync {
    /// Seconds since the unix epoch.
    fn now(&self) -> u64;
}

/// The local system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// System clock corrected by an offset measured once against an NTP server.
/// Useful when the local clock is skewed enough to misjudge token expiry.
#[derive(Debug, Clone, Copy)]
pub struct NtpClock {
    offset_secs: i64,
}

impl NtpClock {
    /// Query `server` (e.g. `time.cloudflare.com`) and remember the offset.
    pub fn synchronize(server: &str) -> Result<Self, StorefrontError> {
        let result = SntpClient::new()
            .synchronize(server)
            .map_err(|e| StorefrontError::Network(format!("NTP sync with {} failed: {}", server, e)))?;

        Ok(Self {
            offset_secs: result.clock_offset().as_secs_f64().round() as i64,
        })
    }

    pub fn with_offset(offset_secs: i64) -> Self {
        Self { offset_secs }
    }
}

impl Clock for NtpClock {
    fn now(&self) -> u64 {
        let local = SystemClock.now() as i64;
        local.saturating_add(self.offset_secs).max(0) as u64
    }
}
