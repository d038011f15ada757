//! One page's worth of blocking: the engine, the scheduler that keeps it
//! current, and the driver loop that feeds both from the outside world.

use anyhow::Result;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info};

use crate::blocker::ShortsBlocker;
use crate::config::BlockerConfig;
use crate::dom::Page;
use crate::environment::detect;
use crate::relay::{Command, Response};
use crate::scheduler::{Due, ReactiveScheduler, Timings};
use crate::store::{PreferenceStore, initialize_settings, read_blocking_state, write_blocking_state};
use crate::types::{BlockingState, PassReport};

/// What a session's driver can be told
#[derive(Debug)]
pub enum Inbound {
    Command {
        command: Command,
        reply: oneshot::Sender<Response>,
    },
    /// The viewport changed size
    Resize,
}

pub struct Session<P: Page> {
    page: P,
    config: BlockerConfig,
    engine: ShortsBlocker,
    scheduler: ReactiveScheduler,
}

impl<P: Page> Session<P> {
    pub fn new(page: P, config: BlockerConfig) -> Result<Self> {
        let mut engine = ShortsBlocker::new(config.clone())?;
        let environment = engine.detect_environment(&page);
        debug!(?environment, "session created");
        Ok(Self {
            page,
            scheduler: ReactiveScheduler::new(Timings::from_config(&config)),
            config,
            engine,
        })
    }

    /// Session with the timings suited to the page's platform
    pub fn for_page(page: P) -> Result<Self> {
        let environment = detect(&page.signals());
        Self::new(page, BlockerConfig::for_environment(&environment))
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    pub fn page_mut(&mut self) -> &mut P {
        &mut self.page
    }

    pub fn engine(&self) -> &ShortsBlocker {
        &self.engine
    }

    pub fn scheduler(&self) -> &ReactiveScheduler {
        &self.scheduler
    }

    pub fn config(&self) -> &BlockerConfig {
        &self.config
    }

    /// Load the stored preference, filter right away when blocking, and
    /// start the countdown to watching the page.
    pub async fn initialize<S: PreferenceStore>(
        &mut self,
        store: &S,
        now: Instant,
    ) -> Option<PassReport> {
        initialize_settings(store, &self.config).await;
        let blocking = read_blocking_state(store, &self.config).await;
        let report = self.engine.adopt_state(&mut self.page, blocking.into());
        self.scheduler.arm(now);
        info!(blocking, "shorts blocker initialized");
        report
    }

    /// Answer a command from the relay
    pub fn handle(&mut self, command: Command) -> Response {
        match command {
            Command::ToggleShorts { is_blocking } => {
                let report = self.engine.set_state(&mut self.page, is_blocking.into());
                debug!(?report, "toggled by message");
                Response::ack()
            }
            Command::GetStatus => Response::status(self.engine.is_blocking()),
        }
    }

    /// Apply a local toggle and persist it
    pub async fn toggle<S: PreferenceStore>(&mut self, store: &S, blocking: bool) -> PassReport {
        let report = self.engine.set_state(&mut self.page, blocking.into());
        if let Err(e) = write_blocking_state(store, &self.config, blocking).await {
            debug!(error = %e, "toggle applied to the page but not persisted");
        }
        report
    }

    /// A structural change was observed. Ignored while visible.
    pub fn on_mutation(&mut self, now: Instant) -> bool {
        self.engine.is_blocking() && self.scheduler.on_mutation(now)
    }

    /// Feed every queued mutation record through the throttle
    pub fn drain_mutations(&mut self, now: Instant) {
        while self.scheduler.try_next_mutation().is_some() {
            self.on_mutation(now);
        }
    }

    pub fn on_resize(&mut self, now: Instant) {
        self.scheduler.on_resize(now);
    }

    /// Run whatever has come due. Returns the reports of the passes made.
    pub fn poll(&mut self, now: Instant) -> Vec<PassReport> {
        let mut reports = Vec::new();
        while let Some(due) = self.scheduler.take_due(now) {
            let report = match due {
                Due::Startup => {
                    if !self.scheduler.watch(&mut self.page) {
                        debug!("document has no body yet, waiting again");
                        self.scheduler.arm(now);
                        continue;
                    }
                    self.engine.refilter(&mut self.page)
                }
                Due::Frame => self.engine.refilter(&mut self.page),
                Due::ResizeSettled => self.engine.handle_viewport_change(&mut self.page),
            };
            reports.extend(report);
        }
        reports
    }

    pub fn state(&self) -> BlockingState {
        self.engine.state()
    }

    /// Stop watching and drop pending timers. Hidden elements stay hidden.
    pub fn destroy(&mut self) {
        self.scheduler.destroy();
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Drive a session until its inbox closes, then tear it down and hand it
/// back.
pub async fn run<P: Page>(mut session: Session<P>, mut inbox: mpsc::UnboundedReceiver<Inbound>) -> Session<P> {
    loop {
        let deadline = session.scheduler.next_deadline();
        tokio::select! {
            biased;

            message = inbox.recv() => match message {
                Some(Inbound::Command { command, reply }) => {
                    let response = session.handle(command);
                    if reply.send(response).is_err() {
                        debug!("sender went away before the reply");
                    }
                }
                Some(Inbound::Resize) => session.on_resize(Instant::now()),
                None => break,
            },
            Some(_) = session.scheduler.next_mutation() => {
                let now = Instant::now();
                session.on_mutation(now);
                session.drain_mutations(now);
            }
            () = sleep_until_deadline(deadline) => {
                for report in session.poll(Instant::now()) {
                    debug!(hidden = report.hidden_total(), failures = report.failures, "scheduled pass");
                }
            }
        }
    }
    session.destroy();
    info!("session closed");
    session
}
