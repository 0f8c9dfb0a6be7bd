//! # chatplus
//!
//! A client-side enhancement layer for live-chat widgets. It sits between the
//! host page's chat renderer and the viewer, and applies per-viewer rules to
//! every incoming message:
//!
//! - **Block lists**: messages from blocked user ids or names never render
//! - **Word filters**: literal words (word-boundary, case-insensitive) and
//!   `/pattern/flags` regex specs are masked
//! - **Team badges**: assigned per user id, injected into the host's badge dictionary
//! - **Community emotes**: BTTV and 7TV catalogs substituted into message text
//!
//! Messages are caught twice over: decorators around the host's append and
//! emote hooks see the data record before rendering, and a mutation observer
//! processes anything that reaches the DOM another way. A processed marker
//! keeps the two paths from handling the same message twice.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chatplus::prelude::*;
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EnhancerConfig::from_env().await?;
//!     let store = JsonFileStore::new(&config.storage.state_dir)?;
//!     let repository = StateRepository::new(Box::new(store), &config.storage.key);
//!     let enhancer = ChatEnhancer::new(config, repository).into_shared();
//!
//!     let dom = Rc::new(RefCell::new(Document::parse(r#"<div id="message-list"></div>"#)));
//!     let list = dom.borrow().children(dom.borrow().root())[0];
//!     let widget = ChatWidget::new(dom.clone(), list);
//!
//!     let mut sink = install(widget, &enhancer, None);
//!     sink.add_message(MessageRecord::new(Some("42"), Some("bob"), "hello LUL"));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod enhancer;
pub mod host;
pub mod observer;
pub mod providers;
pub mod types;

// Re-export commonly used items
pub mod prelude {
    pub use crate::config::EnhancerConfig;
    pub use crate::enhancer::commands::{CommandReply, SettingsCommands};
    pub use crate::enhancer::emotes::EmoteCatalog;
    pub use crate::enhancer::persistence::{JsonFileStore, KeyValueStore, MemoryStore, StateRepository};
    pub use crate::enhancer::{ChatEnhancer, SharedEnhancer};
    pub use crate::host::{ChatDom, ChatSelectors, ChatWidget, Document, EmoteRenderer, MessageSink};
    pub use crate::observer::{install, MessageObserver, StartupProbe};
    pub use crate::providers::{default_providers, EmoteProvider};
    pub use crate::types::{EnhancerError, MessageRecord, Outcome};
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
