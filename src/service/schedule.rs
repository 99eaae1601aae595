//! How often the background task re-runs a full sync.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::MuddError;

/// Full-sync frequency, as written in `[sync] frequency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncFrequency {
    /// Only the initial sync runs.
    Disabled,
    Every5Minutes,
    Every15Minutes,
    Every30Minutes,
    Hourly,
}

impl SyncFrequency {
    pub fn minutes(&self) -> u32 {
        match self {
            SyncFrequency::Disabled => 0,
            SyncFrequency::Every5Minutes => 5,
            SyncFrequency::Every15Minutes => 15,
            SyncFrequency::Every30Minutes => 30,
            SyncFrequency::Hourly => 60,
        }
    }

    /// Tick period, or `None` when periodic syncs are off.
    pub fn interval(&self) -> Option<Duration> {
        match self.minutes() {
            0 => None,
            m => Some(Duration::from_secs(u64::from(m) * 60)),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SyncFrequency::Disabled => "Disabled",
            SyncFrequency::Every5Minutes => "Every 5 minutes",
            SyncFrequency::Every15Minutes => "Every 15 minutes",
            SyncFrequency::Every30Minutes => "Every 30 minutes",
            SyncFrequency::Hourly => "Every hour",
        }
    }
}

/// Case-insensitive; accepts the short and long spellings used in config files.
impl FromStr for SyncFrequency {
    type Err = MuddError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" | "disabled" | "none" => Ok(SyncFrequency::Disabled),
            "5min" | "5m" => Ok(SyncFrequency::Every5Minutes),
            "15min" | "15m" => Ok(SyncFrequency::Every15Minutes),
            "30min" | "30m" => Ok(SyncFrequency::Every30Minutes),
            "1hour" | "1h" | "60min" | "hourly" => Ok(SyncFrequency::Hourly),
            _ => Err(MuddError::Configuration(format!(
                "unknown sync frequency '{}'",
                s
            ))),
        }
    }
}

impl Default for SyncFrequency {
    fn default() -> Self {
        SyncFrequency::Every15Minutes
    }
}

/// What the sync task has done so far.
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    pub passes: u64,
    pub failures: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SyncStatus {
    pub fn record_success(&mut self) {
        self.passes += 1;
        self.last_success = Some(Utc::now());
        self.last_error = None;
    }

    pub fn record_failure(&mut self, error: &str) {
        self.passes += 1;
        self.failures += 1;
        self.last_error = Some(error.to_string());
    }
}
