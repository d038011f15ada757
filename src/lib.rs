//! Shorts Blocker Library
//!
//! Hides YouTube Shorts from a page: shelves, individual items, navigation
//! entries and filter chips. It can restore everything it hid and keeps
//! up with a page that rebuilds itself.
//!
//! # Quick Start
//!
//! ```rust
//! use shorts_blocker::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut page = Dom::parse_str(
//!         r#"<body><ytd-video-renderer><a href="/shorts/abc">clip</a></ytd-video-renderer></body>"#,
//!         "https://www.youtube.com/",
//!     )?;
//!
//!     let mut blocker = ShortsBlocker::new(BlockerConfig::default())?;
//!     blocker.detect_environment(&page);
//!
//!     let report = blocker.set_state(&mut page, BlockingState::Blocking);
//!     assert_eq!(report.items_hidden, 1);
//!
//!     let report = blocker.set_state(&mut page, BlockingState::Visible);
//!     assert_eq!(report.restored, 1);
//!     Ok(())
//! }
//! ```

pub mod blocker;
pub mod classifier;
pub mod config;
pub mod dom;
pub mod environment;
pub mod error;
pub mod pattern;
pub mod redirect;
pub mod relay;
pub mod scheduler;
pub mod selectors;
pub mod session;
pub mod store;
pub mod types;

pub use blocker::ShortsBlocker;
pub use classifier::Classifier;
pub use config::BlockerConfig;
pub use dom::{Dom, Page, SharedDom};
pub use environment::{Signals, detect};
pub use error::{DomError, RelayError, SelectorError, StoreError};
pub use relay::{ChannelMessenger, Command, Hub, Messenger, Response};
pub use scheduler::ReactiveScheduler;
pub use selectors::SelectorStrategy;
pub use session::{Inbound, Session};
pub use store::{JsonFileStore, MemoryStore, PreferenceStore};
pub use types::{BlockingState, Bucket, EngineStats, EnvironmentState, PassReport};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        BlockerConfig, BlockingState, Command, Dom, EnvironmentState, Page, PassReport,
        PreferenceStore, Response, Session, ShortsBlocker,
    };
}
