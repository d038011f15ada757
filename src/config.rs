use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::{BrowserFamily, EnvironmentState};

/// Storage key of the single persisted preference
pub const STORAGE_KEY: &str = "blockShorts";

/// Tuning for the blocker. Only `default_blocking` relates to the persisted
/// preference; everything else is fixed at construction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockerConfig {
    pub storage_key: String,
    pub default_blocking: bool,
    pub throttle_interval_ms: u64,
    pub observer_delay_ms: u64,
    pub resize_debounce_ms: u64,
    /// Viewports at or below this width use the mobile layout
    pub mobile_breakpoint: u32,
    pub hide_sections: bool,
    pub hide_individual: bool,
    pub hide_navigation: bool,
    pub hide_filter_chips: bool,
    pub redirect_shorts_urls: bool,
    pub inject_notice: bool,
}

impl Default for BlockerConfig {
    fn default() -> Self {
        Self {
            storage_key: STORAGE_KEY.to_string(),
            default_blocking: true,
            throttle_interval_ms: 300,
            observer_delay_ms: 1000,
            resize_debounce_ms: 300,
            mobile_breakpoint: 768,
            hide_sections: true,
            hide_individual: true,
            hide_navigation: true,
            hide_filter_chips: true,
            redirect_shorts_urls: true,
            inject_notice: false,
        }
    }
}

impl BlockerConfig {
    /// Timings adjusted for the detected platform. Handheld devices get a
    /// longer throttle and a later observer start.
    pub fn for_environment(env: &EnvironmentState) -> Self {
        let mut config = Self::default();
        if env.is_android() {
            config.throttle_interval_ms = 500;
            config.observer_delay_ms = 1500;
        } else if env.browser == BrowserFamily::Firefox {
            config.throttle_interval_ms = 300;
        }
        config
    }

    /// Hide whole sections and navigation entries only; individual items
    /// and filter chips stay visible.
    pub fn minimal() -> Self {
        Self {
            hide_individual: false,
            hide_filter_chips: false,
            ..Self::default()
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config = serde_json::from_str(raw)?;
        Ok(config)
    }

    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_interval_ms)
    }

    pub fn observer_delay(&self) -> Duration {
        Duration::from_millis(self.observer_delay_ms)
    }

    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }
}
