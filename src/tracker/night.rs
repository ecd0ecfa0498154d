use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;

use crate::config::{ConfigError, NightModeConfig};

/// Local hours `[start_hour, end_hour)` during which night-mode targets are
/// checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NightWindow {
    start_hour: u32,
    end_hour: u32,
    tz: Tz,
}

impl NightWindow {
    pub fn new(start_hour: u32, end_hour: u32, tz: Tz) -> Self {
        Self {
            start_hour,
            end_hour,
            tz,
        }
    }

    pub fn from_config(config: &NightModeConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.start_hour, config.end_hour, config.tz()?))
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        let hour = now.with_timezone(&self.tz).hour();
        hour >= self.start_hour && hour < self.end_hour
    }

    pub fn suppresses(&self, night_mode: bool, now: DateTime<Utc>) -> bool {
        night_mode && !self.is_active(now)
    }
}
