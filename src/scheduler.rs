//! Keeps filtering consistent while the host page keeps changing.
//!
//! The scheduler itself never touches the page or the engine: it turns
//! mutation and resize notifications into [`Due`] work at explicit instants,
//! so the timing rules can be driven by a real clock or by a test.

use std::future::pending;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::BlockerConfig;
use crate::dom::{MutationRecord, Page, Subscription};

/// Spacing of animation-frame-equivalent boundaries
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub throttle: Duration,
    pub startup_delay: Duration,
    pub resize_debounce: Duration,
    pub frame: Duration,
}

impl Timings {
    pub fn from_config(config: &BlockerConfig) -> Self {
        Self {
            throttle: config.throttle_interval(),
            startup_delay: config.observer_delay(),
            resize_debounce: config.resize_debounce(),
            frame: FRAME_INTERVAL,
        }
    }
}

/// Work that has come due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Due {
    /// Startup delay elapsed; filter and begin watching
    Startup,
    /// A throttled mutation pass reached its frame boundary
    Frame,
    /// Resizing went quiet; re-check the layout bucket
    ResizeSettled,
}

pub struct ReactiveScheduler {
    timings: Timings,
    last_pass_at: Option<Instant>,
    frame_at: Option<Instant>,
    startup_at: Option<Instant>,
    resize_at: Option<Instant>,
    subscription: Option<Subscription>,
}

impl ReactiveScheduler {
    pub fn new(timings: Timings) -> Self {
        Self {
            timings,
            last_pass_at: None,
            frame_at: None,
            startup_at: None,
            resize_at: None,
            subscription: None,
        }
    }

    pub fn timings(&self) -> Timings {
        self.timings
    }

    /// Start the startup countdown
    pub fn arm(&mut self, now: Instant) {
        self.startup_at = Some(now + self.timings.startup_delay);
    }

    pub fn is_watching(&self) -> bool {
        self.subscription.is_some()
    }

    /// Subscribe to structural changes once the page has a body. Returns
    /// whether watching is now active.
    pub fn watch<P: Page + ?Sized>(&mut self, page: &mut P) -> bool {
        if self.subscription.is_some() {
            return true;
        }
        if page.body().is_none() {
            return false;
        }
        self.subscription = Some(page.observe());
        debug!("watching document for structural changes");
        true
    }

    /// A structural change arrived. Returns true when it scheduled a pass
    /// for the next frame; bursts inside the throttle interval and triggers
    /// while a pass is pending are dropped.
    pub fn on_mutation(&mut self, now: Instant) -> bool {
        if self.frame_at.is_some() {
            trace!("pass already pending, dropping trigger");
            return false;
        }
        if let Some(last) = self.last_pass_at {
            if now.saturating_duration_since(last) < self.timings.throttle {
                trace!("inside throttle interval, dropping trigger");
                return false;
            }
        }
        self.last_pass_at = Some(now);
        self.frame_at = Some(now + self.timings.frame);
        true
    }

    /// Restart the resize quiescence window
    pub fn on_resize(&mut self, now: Instant) {
        self.resize_at = Some(now + self.timings.resize_debounce);
    }

    pub fn is_pass_pending(&self) -> bool {
        self.frame_at.is_some()
    }

    /// Earliest instant at which something comes due
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.startup_at, self.frame_at, self.resize_at]
            .into_iter()
            .flatten()
            .min()
    }

    /// Take the earliest piece of work due at `now`, if any
    pub fn take_due(&mut self, now: Instant) -> Option<Due> {
        let mut candidates = [
            (self.startup_at, Due::Startup),
            (self.frame_at, Due::Frame),
            (self.resize_at, Due::ResizeSettled),
        ];
        candidates.sort_by_key(|(at, _)| *at);
        let (_, due) = candidates
            .into_iter()
            .find(|(at, _)| at.is_some_and(|at| at <= now))?;
        match due {
            Due::Startup => self.startup_at = None,
            Due::Frame => self.frame_at = None,
            Due::ResizeSettled => self.resize_at = None,
        }
        Some(due)
    }

    /// Pull one pending mutation record without waiting
    pub fn try_next_mutation(&mut self) -> Option<MutationRecord> {
        self.subscription.as_mut()?.try_next()
    }

    /// Wait for the next mutation record; never resolves while not watching
    pub async fn next_mutation(&mut self) -> Option<MutationRecord> {
        match self.subscription.as_mut() {
            Some(subscription) => subscription.changed().await,
            None => pending().await,
        }
    }

    /// Stop watching and forget every timer
    pub fn destroy(&mut self) {
        if self.subscription.take().is_some() {
            debug!("stopped watching document");
        }
        self.startup_at = None;
        self.frame_at = None;
        self.resize_at = None;
    }
}

impl Drop for ReactiveScheduler {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Dom;

    fn timings() -> Timings {
        Timings {
            throttle: Duration::from_millis(300),
            startup_delay: Duration::from_millis(1000),
            resize_debounce: Duration::from_millis(300),
            frame: FRAME_INTERVAL,
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn burst_inside_interval_collapses_to_one_pass() {
        let mut scheduler = ReactiveScheduler::new(timings());
        let t0 = Instant::now();

        let scheduled = (0..10u64)
            .filter(|i| scheduler.on_mutation(t0 + ms(*i * 20)))
            .count();
        assert_eq!(scheduled, 1);

        assert_eq!(scheduler.take_due(t0 + ms(5)), None);
        assert_eq!(scheduler.take_due(t0 + FRAME_INTERVAL), Some(Due::Frame));
        assert!(!scheduler.is_pass_pending());

        // Still inside the interval after the pass ran
        assert!(!scheduler.on_mutation(t0 + ms(250)));
        // Next interval
        assert!(scheduler.on_mutation(t0 + ms(300)));
    }

    #[test]
    fn trigger_while_pending_is_dropped_not_queued() {
        let mut scheduler = ReactiveScheduler::new(Timings {
            throttle: Duration::ZERO,
            ..timings()
        });
        let t0 = Instant::now();
        assert!(scheduler.on_mutation(t0));
        assert!(!scheduler.on_mutation(t0 + ms(1)));
        assert_eq!(scheduler.take_due(t0 + ms(100)), Some(Due::Frame));
        assert_eq!(scheduler.take_due(t0 + ms(100)), None);
    }

    #[test]
    fn resize_is_debounced() {
        let mut scheduler = ReactiveScheduler::new(timings());
        let t0 = Instant::now();
        scheduler.on_resize(t0);
        scheduler.on_resize(t0 + ms(200));
        assert_eq!(scheduler.take_due(t0 + ms(350)), None);
        assert_eq!(scheduler.next_deadline(), Some(t0 + ms(500)));
        assert_eq!(scheduler.take_due(t0 + ms(500)), Some(Due::ResizeSettled));
    }

    #[test]
    fn startup_comes_due_after_delay() {
        let mut scheduler = ReactiveScheduler::new(timings());
        let t0 = Instant::now();
        scheduler.arm(t0);
        assert_eq!(scheduler.take_due(t0 + ms(999)), None);
        assert_eq!(scheduler.take_due(t0 + ms(1000)), Some(Due::Startup));
        assert_eq!(scheduler.next_deadline(), None);
    }

    #[test]
    fn watch_requires_body_and_destroy_releases_subscription() {
        let mut scheduler = ReactiveScheduler::new(timings());
        let location = url::Url::parse("https://www.youtube.com/").unwrap();
        assert!(!scheduler.watch(&mut Dom::empty(location)));

        let mut dom = Dom::parse_str("<p>x</p>", "https://www.youtube.com/").unwrap();
        assert!(scheduler.watch(&mut dom));
        assert_eq!(dom.observer_count(), 1);

        scheduler.destroy();
        assert!(!scheduler.is_watching());
        assert_eq!(dom.observer_count(), 0);
    }
}
