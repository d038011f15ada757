use crate::classifier::Classifier;
use crate::config::BlockerConfig;
use crate::dom::{NodeId, Page};
use crate::environment::detect_with_breakpoint;
use crate::pattern::select_all;
use crate::redirect::RedirectGuard;
use crate::selectors::{CompiledSelector, SelectorSet, SelectorStrategy};
use crate::types::{BlockingState, EngineStats, EnvironmentState, PassReport};

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Set on every element this engine hid; holds the inline `display` value
/// the element had before (possibly empty).
pub const HIDDEN_MARKER: &str = "data-shorts-blocker-hidden";

/// Set on notice elements the engine injected
pub const NOTICE_MARKER: &str = "data-shorts-blocker-notice";

const NOTICE_TEXT: &str = "Shorts hidden";

/// The filtering engine. Owns the on/off state and runs filter and restore
/// passes over whatever the page looks like right now; no node references
/// survive between passes.
pub struct ShortsBlocker {
    config: BlockerConfig,
    state: BlockingState,
    environment: EnvironmentState,
    strategy: SelectorStrategy,
    classifier: Classifier,
    redirect: RedirectGuard,
    stats: EngineStats,
}

impl ShortsBlocker {
    /// Create an engine. Blocking starts enabled; nothing touches the page
    /// until the first pass.
    pub fn new(config: BlockerConfig) -> Result<Self> {
        Self::with_strategy(config, SelectorStrategy::new())
    }

    pub fn with_strategy(config: BlockerConfig, strategy: SelectorStrategy) -> Result<Self> {
        Ok(Self {
            config,
            state: BlockingState::Blocking,
            environment: EnvironmentState::default(),
            strategy,
            classifier: Classifier::new()?,
            redirect: RedirectGuard::new()?,
            stats: EngineStats::default(),
        })
    }

    pub fn state(&self) -> BlockingState {
        self.state
    }

    pub fn is_blocking(&self) -> bool {
        self.state.is_blocking()
    }

    pub fn environment(&self) -> EnvironmentState {
        self.environment
    }

    pub fn config(&self) -> &BlockerConfig {
        &self.config
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn strategy(&self) -> &SelectorStrategy {
        &self.strategy
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Selector set for the current environment
    pub fn selectors(&mut self) -> Arc<SelectorSet> {
        self.strategy.selectors_for(&self.environment)
    }

    /// Re-read the environment from the page's signals and remember it
    pub fn detect_environment<P: Page + ?Sized>(&mut self, page: &P) -> EnvironmentState {
        self.environment = detect_with_breakpoint(&page.signals(), self.config.mobile_breakpoint);
        self.environment
    }

    /// Switch state and run the matching pass. Calling it twice with the
    /// same target only repeats the scan.
    pub fn set_state<P: Page + ?Sized>(&mut self, page: &mut P, target: BlockingState) -> PassReport {
        if self.state != target {
            info!(from = ?self.state, to = ?target, "blocking state changed");
        }
        self.state = target;
        match target {
            BlockingState::Blocking => self.filter_pass(page),
            BlockingState::Visible => self.restore_pass(page),
        }
    }

    /// Take on a persisted state at load. Nothing has been hidden yet, so
    /// only the blocking state needs a pass.
    pub fn adopt_state<P: Page + ?Sized>(
        &mut self,
        page: &mut P,
        state: BlockingState,
    ) -> Option<PassReport> {
        self.state = state;
        self.refilter(page)
    }

    /// Filter again if blocking; used for mutation-driven passes
    pub fn refilter<P: Page + ?Sized>(&mut self, page: &mut P) -> Option<PassReport> {
        if self.is_blocking() {
            Some(self.filter_pass(page))
        } else {
            None
        }
    }

    /// Re-detect after a viewport change. A flip between the mobile and
    /// desktop layouts invalidates the selector cache and, when blocking,
    /// filters immediately.
    pub fn handle_viewport_change<P: Page + ?Sized>(&mut self, page: &mut P) -> Option<PassReport> {
        let previous = self.environment.bucket();
        let current = self.detect_environment(page).bucket();
        if previous == current {
            return None;
        }
        info!(?previous, ?current, "layout bucket changed, refreshing selectors");
        self.strategy.invalidate();
        self.refilter(page)
    }

    /// Sections, then items, then navigation, then filter controls, then
    /// the redirect guard.
    pub fn filter_pass<P: Page + ?Sized>(&mut self, page: &mut P) -> PassReport {
        let mut report = PassReport::default();
        let Some(body) = page.body() else {
            debug!("no body yet, skipping filter pass");
            return report;
        };

        let selectors = self.selectors();
        if self.environment.is_android() {
            debug!(bucket = ?selectors.bucket, "filter pass on handheld platform");
        }

        if self.config.hide_sections {
            for node in matching(page, &selectors.sections, &mut report) {
                if self.hide(page, node, &mut report) {
                    report.sections_hidden += 1;
                }
            }
        }

        if self.config.hide_individual {
            for node in matching(page, &selectors.items, &mut report) {
                if !self
                    .classifier
                    .is_filtered_item(page, node, &self.environment)
                {
                    continue;
                }
                if self.hide(page, node, &mut report) {
                    report.items_hidden += 1;
                }
            }
        }

        if self.config.hide_navigation {
            for node in matching(page, &selectors.navigation, &mut report) {
                if self.hide(page, node, &mut report) {
                    report.navigation_hidden += 1;
                }
            }
        }

        if self.config.hide_filter_chips {
            for node in matching(page, &selectors.filter_controls, &mut report) {
                if !self.classifier.is_category_label(page, node) {
                    continue;
                }
                if self.hide(page, node, &mut report) {
                    report.controls_hidden += 1;
                }
            }
        }

        if self.config.inject_notice && report.sections_hidden + report.items_hidden > 0 {
            self.inject_notice(page, body, &mut report);
        }

        if self.config.redirect_shorts_urls {
            if let Some(target) = self.redirect.check(&page.location()) {
                page.navigate(target.clone());
                report.redirected_to = Some(target);
            }
        }

        if report.hidden_total() > 0 || report.failures > 0 {
            info!(
                sections = report.sections_hidden,
                items = report.items_hidden,
                navigation = report.navigation_hidden,
                controls = report.controls_hidden,
                failures = report.failures,
                "filter pass"
            );
        }
        self.stats.filter_passes += 1;
        self.stats.record(&report);
        report
    }

    /// Reveal everything this engine hid, plus anything suppressed that
    /// looks category related, and drop injected notices.
    pub fn restore_pass<P: Page + ?Sized>(&mut self, page: &mut P) -> PassReport {
        let mut report = PassReport::default();
        let Some(body) = page.body() else {
            return report;
        };

        for node in page.descendants(body) {
            if page.has_attribute(node, NOTICE_MARKER) {
                match page.detach(node) {
                    Ok(()) => report.notices_removed += 1,
                    Err(e) => {
                        warn!(node, error = %e, "could not remove notice");
                        report.failures += 1;
                    }
                }
                continue;
            }

            let prior = page.attribute(node, HIDDEN_MARKER);
            if !page.is_display_suppressed(node) {
                // Host page re-rendered the style; the marker is stale
                if prior.is_some() {
                    if let Err(e) = page.remove_attribute(node, HIDDEN_MARKER) {
                        debug!(node, error = %e, "could not clear stale marker");
                    }
                }
                continue;
            }
            if prior.is_none() && !self.classifier.is_category_related(page, node) {
                continue;
            }

            let restored = page
                .set_inline_display(node, prior.as_deref())
                .and_then(|()| page.remove_attribute(node, HIDDEN_MARKER));
            match restored {
                Ok(()) => report.restored += 1,
                Err(e) => {
                    warn!(node, error = %e, "could not restore element");
                    report.failures += 1;
                }
            }
        }

        info!(
            restored = report.restored,
            notices = report.notices_removed,
            "restore pass"
        );
        self.stats.restore_passes += 1;
        self.stats.record(&report);
        report
    }

    /// Hide one element, remembering its previous inline display. Returns
    /// false when there was nothing to do or the write failed.
    fn hide<P: Page + ?Sized>(&self, page: &mut P, node: NodeId, report: &mut PassReport) -> bool {
        if page.is_display_suppressed(node) {
            // Either already ours, or hidden by the host page; leave both
            return false;
        }
        if has_hidden_ancestor(page, node) {
            return false;
        }
        // Not suppressed here, so any marker left on the node is stale
        let prior = page.inline_display(node).unwrap_or_default();
        let hidden = page
            .set_attribute(node, HIDDEN_MARKER, &prior)
            .and_then(|()| page.set_inline_display(node, Some("none")));
        match hidden {
            Ok(()) => true,
            Err(e) => {
                warn!(node, error = %e, "could not hide element");
                report.failures += 1;
                false
            }
        }
    }

    fn inject_notice<P: Page + ?Sized>(&self, page: &mut P, body: NodeId, report: &mut PassReport) {
        let exists = page
            .descendants(body)
            .into_iter()
            .any(|node| page.has_attribute(node, NOTICE_MARKER));
        if exists {
            return;
        }
        let notice = page.create_element("div");
        let injected = page
            .set_attribute(notice, NOTICE_MARKER, "")
            .and_then(|()| page.set_attribute(notice, "role", "status"))
            .and_then(|()| page.set_text_content(notice, NOTICE_TEXT))
            .and_then(|()| page.insert_child(body, notice, 0));
        match injected {
            Ok(()) => report.notices_added += 1,
            Err(e) => {
                warn!(error = %e, "could not inject notice");
                report.failures += 1;
            }
        }
    }
}

fn matching<P: Page + ?Sized>(
    page: &P,
    selectors: &[CompiledSelector],
    report: &mut PassReport,
) -> Vec<NodeId> {
    let mut nodes = Vec::new();
    for selector in selectors {
        match &selector.pattern {
            Ok(pattern) => nodes.extend(select_all(page, pattern)),
            Err(e) => {
                warn!(selector = %selector.source, error = %e, "skipping selector");
                report.failures += 1;
            }
        }
    }
    nodes
}

fn has_hidden_ancestor<P: Page + ?Sized>(page: &P, node: NodeId) -> bool {
    page.ancestors(node)
        .into_iter()
        .any(|ancestor| page.has_attribute(ancestor, HIDDEN_MARKER) && page.is_display_suppressed(ancestor))
}
