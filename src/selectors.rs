use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::SelectorError;
use crate::pattern::Pattern;
use crate::types::{Bucket, EnvironmentState};

/// Raw selector lists for one layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorSources {
    pub items: Vec<String>,
    pub sections: Vec<String>,
    pub navigation: Vec<String>,
    pub filter_controls: Vec<String>,
}

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl SelectorSources {
    pub fn desktop() -> Self {
        Self {
            sections: owned(&[
                "ytd-rich-section-renderer[is-shorts]",
                "ytd-rich-section-renderer:has(ytd-rich-shelf-renderer[is-shorts])",
                "ytd-rich-shelf-renderer[is-shorts]",
                "ytd-reel-shelf-renderer",
            ]),
            items: owned(&[
                r#"ytd-rich-item-renderer:has(a[href*="/shorts/"])"#,
                r#"ytd-video-renderer:has(a[href*="/shorts/"])"#,
                r#"ytd-compact-video-renderer:has(a[href*="/shorts/"])"#,
                r#"ytd-grid-video-renderer:has(a[href*="/shorts/"])"#,
                "ytd-reel-item-renderer",
            ]),
            navigation: owned(&[
                r#"ytd-mini-guide-entry-renderer[aria-label*="Shorts"]"#,
                r#"ytd-guide-entry-renderer[aria-label*="Shorts"]"#,
                r#"ytd-guide-entry-renderer:has(a[title="Shorts"])"#,
                r#"a[href="/shorts"]"#,
                r#"a[href="/feed/trending?bp=4gINGgt2d2bi1aWX1QeQ%3D%3D"]"#,
            ]),
            filter_controls: owned(&["yt-chip-cloud-chip-renderer", "ytd-chip-cloud-chip-renderer"]),
        }
    }

    pub fn mobile() -> Self {
        Self {
            sections: owned(&[
                "ytm-reel-shelf-renderer",
                "ytm-rich-section-renderer:has(ytm-reel-shelf-renderer)",
                "ytm-rich-section-renderer[is-shorts]",
            ]),
            items: owned(&[
                "ytm-reel-item-renderer",
                "ytm-shorts-lockup-view-model",
                r#"ytm-video-with-context-renderer:has(a[href*="/shorts/"])"#,
                r#"ytm-compact-video-renderer:has(a[href*="/shorts/"])"#,
                r#"ytm-rich-item-renderer:has(a[href*="/shorts/"])"#,
                r#"[data-content-type="shorts"]"#,
            ]),
            navigation: owned(&[
                "ytm-pivot-bar-item-renderer:has(.pivot-shorts)",
                r#"a[href="/shorts"]"#,
            ]),
            filter_controls: owned(&["ytm-chip-cloud-chip-renderer", "yt-chip-cloud-chip-renderer"]),
        }
    }
}

/// One selector with its compilation outcome. A malformed selector is kept
/// so every pass can report and skip it.
#[derive(Debug, Clone)]
pub struct CompiledSelector {
    pub source: String,
    pub pattern: Result<Pattern, SelectorError>,
}

#[derive(Debug, Clone)]
pub struct SelectorSet {
    pub bucket: Bucket,
    pub items: Vec<CompiledSelector>,
    pub sections: Vec<CompiledSelector>,
    pub navigation: Vec<CompiledSelector>,
    pub filter_controls: Vec<CompiledSelector>,
}

impl SelectorSet {
    pub fn compile(bucket: Bucket, sources: &SelectorSources) -> Self {
        Self {
            bucket,
            items: compile_all(&sources.items),
            sections: compile_all(&sources.sections),
            navigation: compile_all(&sources.navigation),
            filter_controls: compile_all(&sources.filter_controls),
        }
    }
}

fn compile_all(sources: &[String]) -> Vec<CompiledSelector> {
    sources
        .iter()
        .map(|source| {
            let pattern = Pattern::parse(source);
            if let Err(e) = &pattern {
                warn!(selector = %source, error = %e, "selector does not compile");
            }
            CompiledSelector {
                source: source.clone(),
                pattern,
            }
        })
        .collect()
}

/// Picks the selector set for an environment, memoized per bucket
pub struct SelectorStrategy {
    desktop: SelectorSources,
    mobile: SelectorSources,
    cache: HashMap<Bucket, Arc<SelectorSet>>,
}

impl SelectorStrategy {
    pub fn new() -> Self {
        Self::with_sources(SelectorSources::desktop(), SelectorSources::mobile())
    }

    pub fn with_sources(desktop: SelectorSources, mobile: SelectorSources) -> Self {
        Self {
            desktop,
            mobile,
            cache: HashMap::new(),
        }
    }

    /// Only `is_mobile_layout` affects the choice
    pub fn selectors_for(&mut self, env: &EnvironmentState) -> Arc<SelectorSet> {
        let bucket = env.bucket();
        if let Some(cached) = self.cache.get(&bucket) {
            return Arc::clone(cached);
        }
        let sources = match bucket {
            Bucket::Mobile => &self.mobile,
            Bucket::Desktop => &self.desktop,
        };
        debug!(?bucket, "compiling selector set");
        let set = Arc::new(SelectorSet::compile(bucket, sources));
        self.cache.insert(bucket, Arc::clone(&set));
        set
    }

    /// Drop every cached set
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }

    pub fn is_cached(&self, bucket: Bucket) -> bool {
        self.cache.contains_key(&bucket)
    }
}

impl Default for SelectorStrategy {
    fn default() -> Self {
        Self::new()
    }
}
