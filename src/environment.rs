//! Environment detection from runtime signals.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{BrowserFamily, EnvironmentState, PlatformFamily};

/// Default width (logical pixels) at or below which the mobile layout applies
pub const MOBILE_BREAKPOINT: u32 = 768;

/// Raw signals the runtime exposes about itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signals {
    pub user_agent: String,
    /// `None` when the viewport is not known yet
    pub viewport_width: Option<u32>,
    pub host: String,
}

/// Derive the environment using the default breakpoint
pub fn detect(signals: &Signals) -> EnvironmentState {
    detect_with_breakpoint(signals, MOBILE_BREAKPOINT)
}

pub fn detect_with_breakpoint(signals: &Signals, breakpoint: u32) -> EnvironmentState {
    let ua = signals.user_agent.as_str();

    let browser = if ua.contains("Firefox") || ua.contains("FxiOS") {
        BrowserFamily::Firefox
    } else if ua.contains("Chrome") || ua.contains("Chromium") || ua.contains("Edg") {
        BrowserFamily::Chromium
    } else if ua.contains("Safari") {
        BrowserFamily::Safari
    } else {
        BrowserFamily::Other
    };

    let platform = if ua.contains("Android") {
        PlatformFamily::Android
    } else {
        PlatformFamily::Other
    };

    let is_mobile_layout = is_mobile_host(&signals.host)
        || platform == PlatformFamily::Android
        || ua.contains("Mobi")
        || signals.viewport_width.is_some_and(|width| width <= breakpoint);

    let env = EnvironmentState {
        is_mobile_layout,
        platform,
        browser,
    };
    debug!(?env, host = %signals.host, width = ?signals.viewport_width, "environment detected");
    env
}

fn is_mobile_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host.starts_with("m.") || host.contains(".m.")
}
