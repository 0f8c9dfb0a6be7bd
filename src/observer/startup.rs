// src/observer/startup.rs - Bounded polling for the host chat container

use log::{debug, info, warn};
use std::cell::RefCell;
use std::time::Duration;

use crate::config::StartupConfig;
use crate::host::{ChatDom, ChatSelectors, NodeId, Selector};
use crate::types::EnhancerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Searching { attempts: u32 },
    Found(NodeId),
    TimedOut { attempts: u32 },
}

/// Find the message container, preferring the inner list when the host
/// wraps it (`#message-cont` around `#message-list`).
pub fn locate_container<D: ChatDom + ?Sized>(dom: &D, selectors: &ChatSelectors) -> Option<NodeId> {
    let found = dom.query_first_of(dom.root(), &selectors.list)?;
    if dom.attribute(found, "id").as_deref() == Some("message-cont") {
        if let Ok(inner) = Selector::parse("#message-list") {
            if let Some(list) = dom.query_selector(found, &inner) {
                return Some(list);
            }
        }
    }
    Some(found)
}

/// Polls for the container at a fixed interval, giving up after a bounded
/// number of attempts.
#[derive(Debug, Clone)]
pub struct StartupProbe {
    interval: Duration,
    max_attempts: u32,
    state: ProbeState,
}

impl StartupProbe {
    pub fn new(config: &StartupConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_attempts: config.max_attempts,
            state: ProbeState::Searching { attempts: 0 },
        }
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    /// One lookup. Terminal states are sticky.
    pub fn poll<D: ChatDom + ?Sized>(&mut self, dom: &D, selectors: &ChatSelectors) -> ProbeState {
        let ProbeState::Searching { attempts } = self.state else {
            return self.state;
        };

        let attempts = attempts + 1;
        self.state = match locate_container(dom, selectors) {
            Some(node) => {
                info!("Found chat container after {} attempt(s)", attempts);
                ProbeState::Found(node)
            }
            None if attempts >= self.max_attempts => ProbeState::TimedOut { attempts },
            None => {
                debug!("Chat container not present yet (attempt {})", attempts);
                ProbeState::Searching { attempts }
            }
        };
        self.state
    }

    /// Poll until the container shows up or the attempt budget is spent.
    ///
    /// The document is borrowed only for the duration of each lookup.
    pub async fn wait<D: ChatDom>(&mut self, dom: &RefCell<D>, selectors: &ChatSelectors) -> Result<NodeId, EnhancerError> {
        loop {
            let state = match dom.try_borrow() {
                Ok(dom) => self.poll(&*dom, selectors),
                Err(_) => self.skip_attempt(),
            };

            match state {
                ProbeState::Found(node) => return Ok(node),
                ProbeState::TimedOut { attempts } => {
                    warn!("Giving up on chat container after {} attempts", attempts);
                    return Err(EnhancerError::HostNotFound { attempts });
                }
                ProbeState::Searching { .. } => tokio::time::sleep(self.interval).await,
            }
        }
    }

    fn skip_attempt(&mut self) -> ProbeState {
        if let ProbeState::Searching { attempts } = self.state {
            let attempts = attempts + 1;
            self.state = if attempts >= self.max_attempts {
                ProbeState::TimedOut { attempts }
            } else {
                ProbeState::Searching { attempts }
            };
        }
        self.state
    }
}
