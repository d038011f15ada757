//! Cross-context messaging: the wire commands every context understands,
//! and the hub that persists toggles and fans them out to every open
//! context on the site.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::BlockerConfig;
use crate::error::RelayError;
use crate::session::Inbound;
use crate::store::{PreferenceStore, initialize_settings, read_blocking_state, write_blocking_state};

pub type ContextId = u32;

/// Site whose contexts receive broadcasts
pub const SITE_DOMAIN: &str = "youtube.com";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Command {
    #[serde(rename = "toggleShorts")]
    ToggleShorts {
        #[serde(rename = "isBlocking")]
        is_blocking: bool,
    },
    #[serde(rename = "getStatus")]
    GetStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Status {
        #[serde(rename = "isBlocking")]
        is_blocking: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Ack {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Response {
    pub fn ack() -> Self {
        Response::Ack {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Response::Ack {
            success: false,
            error: Some(error.into()),
        }
    }

    pub fn status(is_blocking: bool) -> Self {
        Response::Status {
            is_blocking,
            error: None,
        }
    }
}

/// Delivers a command to one context and waits for its answer
#[allow(async_fn_in_trait)]
pub trait Messenger {
    async fn send(&self, context: ContextId, command: &Command) -> Result<Response, RelayError>;
}

/// Messenger over in-process channels feeding session drivers
#[derive(Debug, Default)]
pub struct ChannelMessenger {
    routes: RwLock<HashMap<ContextId, mpsc::UnboundedSender<Inbound>>>,
}

impl ChannelMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(&self, context: ContextId, inbox: mpsc::UnboundedSender<Inbound>) {
        self.routes.write().await.insert(context, inbox);
    }

    pub async fn disconnect(&self, context: ContextId) {
        self.routes.write().await.remove(&context);
    }
}

impl Messenger for ChannelMessenger {
    async fn send(&self, context: ContextId, command: &Command) -> Result<Response, RelayError> {
        let inbox = self
            .routes
            .read()
            .await
            .get(&context)
            .cloned()
            .ok_or(RelayError::NoReceiver(context))?;
        let (reply, response) = oneshot::channel();
        inbox
            .send(Inbound::Command {
                command: command.clone(),
                reply,
            })
            .map_err(|_| RelayError::NoReceiver(context))?;
        response.await.map_err(|_| RelayError::Closed(context))
    }
}

/// The on/off badge shown for the best-known state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Indicator {
    pub badge: &'static str,
    pub color: &'static str,
}

impl Indicator {
    pub fn for_state(blocking: bool) -> Self {
        if blocking {
            Self {
                badge: "ON",
                color: "#4CAF50",
            }
        } else {
            Self {
                badge: "OFF",
                color: "#F44336",
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub id: ContextId,
    pub url: Url,
}

pub fn is_site_url(url: &Url) -> bool {
    url.host_str().is_some_and(|host| {
        let host = host.to_ascii_lowercase();
        host == SITE_DOMAIN || host.ends_with(&format!(".{SITE_DOMAIN}"))
    })
}

/// Owns the persisted preference and keeps every context in step with it
pub struct Hub<S, M> {
    store: S,
    messenger: M,
    config: BlockerConfig,
    contexts: RwLock<Vec<Context>>,
    indicator: RwLock<Indicator>,
}

impl<S: PreferenceStore, M: Messenger> Hub<S, M> {
    pub fn new(store: S, messenger: M, config: BlockerConfig) -> Self {
        let indicator = Indicator::for_state(config.default_blocking);
        Self {
            store,
            messenger,
            config,
            contexts: RwLock::new(Vec::new()),
            indicator: RwLock::new(indicator),
        }
    }

    /// Seed the preference if absent and show the stored state
    pub async fn initialize(&self) -> bool {
        initialize_settings(&self.store, &self.config).await;
        let blocking = read_blocking_state(&self.store, &self.config).await;
        *self.indicator.write().await = Indicator::for_state(blocking);
        info!(blocking, "relay initialized");
        blocking
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn messenger(&self) -> &M {
        &self.messenger
    }

    pub async fn register(&self, id: ContextId, url: Url) {
        let mut contexts = self.contexts.write().await;
        contexts.retain(|context| context.id != id);
        contexts.push(Context { id, url });
    }

    pub async fn unregister(&self, id: ContextId) {
        self.contexts.write().await.retain(|context| context.id != id);
    }

    pub async fn indicator(&self) -> Indicator {
        *self.indicator.read().await
    }

    pub async fn handle(&self, command: &Command) -> Response {
        debug!(?command, "relay received command");
        match command {
            Command::GetStatus => {
                Response::status(read_blocking_state(&self.store, &self.config).await)
            }
            Command::ToggleShorts { is_blocking } => match self.apply(*is_blocking).await {
                Ok(()) => Response::ack(),
                Err(e) => Response::failed(e),
            },
        }
    }

    /// Browser-action click: flip the stored state. Ignored outside the site.
    pub async fn action_clicked(&self, context: ContextId) -> Option<bool> {
        let url = self
            .contexts
            .read()
            .await
            .iter()
            .find(|candidate| candidate.id == context)
            .map(|candidate| candidate.url.clone())?;
        if !is_site_url(&url) {
            debug!(%url, "not a site context, ignoring click");
            return None;
        }
        let current = read_blocking_state(&self.store, &self.config).await;
        let next = !current;
        info!(current, next, "action click toggle");
        self.apply(next).await.ok()?;
        Some(next)
    }

    /// Send the state to every site context. Returns how many answered.
    pub async fn broadcast(&self, blocking: bool) -> usize {
        let targets: Vec<ContextId> = self
            .contexts
            .read()
            .await
            .iter()
            .filter(|context| is_site_url(&context.url))
            .map(|context| context.id)
            .collect();
        let command = Command::ToggleShorts {
            is_blocking: blocking,
        };

        let mut delivered = 0;
        for context in targets {
            match self.messenger.send(context, &command).await {
                Ok(_) => delivered += 1,
                // Contexts that have not loaded the engine yet are expected
                Err(e) => debug!(context, error = %e, "could not message context"),
            }
        }
        debug!(delivered, "broadcast finished");
        delivered
    }

    async fn apply(&self, blocking: bool) -> Result<(), String> {
        if let Err(e) = write_blocking_state(&self.store, &self.config, blocking).await {
            warn!(error = %e, "toggle not persisted");
            return Err(e.to_string());
        }
        *self.indicator.write().await = Indicator::for_state(blocking);
        self.broadcast(blocking).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMessenger {
        sent: Mutex<Vec<(ContextId, Command)>>,
        offline: Vec<ContextId>,
    }

    impl Messenger for RecordingMessenger {
        async fn send(&self, context: ContextId, command: &Command) -> Result<Response, RelayError> {
            if self.offline.contains(&context) {
                return Err(RelayError::NoReceiver(context));
            }
            self.sent.lock().unwrap().push((context, command.clone()));
            Ok(Response::ack())
        }
    }

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    async fn hub(offline: Vec<ContextId>) -> Hub<MemoryStore, RecordingMessenger> {
        let hub = Hub::new(
            MemoryStore::new(),
            RecordingMessenger {
                offline,
                ..Default::default()
            },
            BlockerConfig::default(),
        );
        hub.register(1, url("https://www.youtube.com/")).await;
        hub.register(2, url("https://m.youtube.com/feed")).await;
        hub.register(3, url("https://example.com/")).await;
        hub.register(4, url("https://www.youtube.com/watch?v=x")).await;
        hub
    }

    #[test]
    fn wire_format() {
        let toggle: Command =
            serde_json::from_str(r#"{"action":"toggleShorts","isBlocking":false}"#).unwrap();
        assert_eq!(toggle, Command::ToggleShorts { is_blocking: false });
        let status: Command = serde_json::from_str(r#"{"action":"getStatus"}"#).unwrap();
        assert_eq!(status, Command::GetStatus);

        assert_eq!(
            serde_json::to_string(&Response::status(true)).unwrap(),
            r#"{"isBlocking":true}"#
        );
        assert_eq!(
            serde_json::to_string(&Response::ack()).unwrap(),
            r#"{"success":true}"#
        );
        let parsed: Response = serde_json::from_str(r#"{"success":false,"error":"x"}"#).unwrap();
        assert_eq!(parsed, Response::failed("x"));
    }

    #[test]
    fn site_matching() {
        assert!(is_site_url(&url("https://youtube.com/")));
        assert!(is_site_url(&url("https://m.youtube.com/")));
        assert!(!is_site_url(&url("https://notyoutube.com/")));
        assert!(!is_site_url(&url("https://youtube.com.evil.net/")));
    }

    #[tokio::test]
    async fn toggle_persists_updates_indicator_and_broadcasts() {
        let hub = hub(vec![4]).await;
        hub.initialize().await;
        assert_eq!(hub.indicator().await.badge, "ON");

        let response = hub
            .handle(&Command::ToggleShorts { is_blocking: false })
            .await;
        assert_eq!(response, Response::ack());
        assert_eq!(hub.handle(&Command::GetStatus).await, Response::status(false));
        assert_eq!(hub.indicator().await, Indicator::for_state(false));

        let sent = hub.messenger().sent.lock().unwrap().clone();
        let targets: Vec<_> = sent.iter().map(|(id, _)| *id).collect();
        assert_eq!(targets, vec![1, 2]);
        assert!(sent
            .iter()
            .all(|(_, command)| *command == Command::ToggleShorts { is_blocking: false }));
    }

    #[tokio::test]
    async fn status_is_fail_safe_when_store_fails() {
        let hub = hub(vec![]).await;
        hub.store().fail_reads(true);
        assert_eq!(hub.handle(&Command::GetStatus).await, Response::status(true));
    }

    #[tokio::test]
    async fn failed_write_reports_and_skips_broadcast() {
        let hub = hub(vec![]).await;
        hub.store().fail_writes(true);
        let response = hub.handle(&Command::ToggleShorts { is_blocking: false }).await;
        assert!(matches!(response, Response::Ack { success: false, .. }));
        assert!(hub.messenger().sent.lock().unwrap().is_empty());
        assert_eq!(hub.indicator().await.badge, "ON");
    }

    #[tokio::test]
    async fn action_click_flips_state_on_site_only() {
        let hub = hub(vec![]).await;
        assert_eq!(hub.action_clicked(3).await, None);
        assert_eq!(hub.action_clicked(1).await, Some(false));
        assert_eq!(hub.action_clicked(1).await, Some(true));
        assert_eq!(hub.action_clicked(99).await, None);
    }
}
