use serde::{Deserialize, Serialize};
use url::Url;

/// Handheld platform family, as far as layout decisions care
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlatformFamily {
    Android,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BrowserFamily {
    Firefox,
    Chromium,
    Safari,
    Other,
}

/// Coarse layout classification driving selector caching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bucket {
    Mobile,
    Desktop,
}

/// What the runtime looks like right now. Derived on demand, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentState {
    pub is_mobile_layout: bool,
    pub platform: PlatformFamily,
    pub browser: BrowserFamily,
}

impl EnvironmentState {
    pub fn bucket(&self) -> Bucket {
        if self.is_mobile_layout {
            Bucket::Mobile
        } else {
            Bucket::Desktop
        }
    }

    pub fn is_android(&self) -> bool {
        self.platform == PlatformFamily::Android
    }
}

impl Default for EnvironmentState {
    fn default() -> Self {
        Self {
            is_mobile_layout: false,
            platform: PlatformFamily::Other,
            browser: BrowserFamily::Other,
        }
    }
}

/// The two states of the filtering engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockingState {
    Blocking,
    Visible,
}

impl BlockingState {
    pub fn is_blocking(self) -> bool {
        self == BlockingState::Blocking
    }
}

impl From<bool> for BlockingState {
    fn from(blocking: bool) -> Self {
        if blocking {
            BlockingState::Blocking
        } else {
            BlockingState::Visible
        }
    }
}

/// Outcome of a single filter or restore pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    pub sections_hidden: u32,
    pub items_hidden: u32,
    pub navigation_hidden: u32,
    pub controls_hidden: u32,
    pub notices_added: u32,
    pub redirected_to: Option<Url>,
    pub restored: u32,
    pub notices_removed: u32,
    /// Failures contained inside the pass (bad selector, detached node)
    pub failures: u32,
}

impl PassReport {
    pub fn hidden_total(&self) -> u32 {
        self.sections_hidden + self.items_hidden + self.navigation_hidden + self.controls_hidden
    }
}

/// Cumulative statistics across every pass the engine ran
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub filter_passes: u64,
    pub restore_passes: u64,
    pub elements_hidden: u64,
    pub elements_restored: u64,
    pub redirects: u64,
    pub failures: u64,
}

impl EngineStats {
    pub(crate) fn record(&mut self, report: &PassReport) {
        self.elements_hidden += u64::from(report.hidden_total());
        self.elements_restored += u64::from(report.restored);
        self.failures += u64::from(report.failures);
        if report.redirected_to.is_some() {
            self.redirects += 1;
        }
    }
}
