// src/enhancer/mod.rs - ChatEnhancer: moderation state, matchers, catalog and badges

use log::{info, warn};
use std::cell::RefCell;
use std::rc::Rc;

use crate::config::EnhancerConfig;
use crate::types::EnhancerError;

pub mod badges;
pub mod commands;
pub mod emotes;
pub mod html;
pub mod matcher;
pub mod moderation;
pub mod persistence;
pub mod pipeline;

use badges::BadgeDictionary;
use emotes::EmoteCatalog;
use matcher::WordFilter;
use moderation::{Moderation, ModerationState, StateListener};
use persistence::{parse_state, StateRepository};

pub use pipeline::PROCESSED_MARKER;

/// The enhancer as shared between interception decorators and the observer.
/// Everything runs on one UI thread.
pub type SharedEnhancer = Rc<RefCell<ChatEnhancer>>;

/// How many known users the settings surface lists.
pub const KNOWN_USER_LIMIT: usize = 50;

/// Running pipeline counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub evaluated: u64,
    pub suppressed: u64,
    pub rendered: u64,
    pub passed_through: u64,
    pub skipped: u64,
}

pub struct ChatEnhancer {
    config: EnhancerConfig,
    moderation: Moderation,
    filters: WordFilter,
    catalog: EmoteCatalog,
    badges: BadgeDictionary,
    stats: PipelineStats,
}

impl ChatEnhancer {
    /// Load persisted state (migrating the legacy cookie if configured) and
    /// compile the filters. The emote catalog starts empty.
    pub fn new(config: EnhancerConfig, repository: StateRepository) -> Self {
        let moderation = Moderation::load(repository, config.storage.legacy_cookie.as_deref());
        let filters = WordFilter::compile(&moderation.state().filtered_words, &config.filters.mask);
        let catalog = EmoteCatalog::new(config.emotes.case_sensitive);
        let badges = BadgeDictionary::with_team_badges(&config.badges.prefix);

        Self {
            config,
            moderation,
            filters,
            catalog,
            badges,
            stats: PipelineStats::default(),
        }
    }

    pub fn into_shared(self) -> SharedEnhancer {
        Rc::new(RefCell::new(self))
    }

    pub fn config(&self) -> &EnhancerConfig {
        &self.config
    }

    pub fn state(&self) -> &ModerationState {
        self.moderation.state()
    }

    pub fn moderation(&self) -> &Moderation {
        &self.moderation
    }

    pub fn filters(&self) -> &WordFilter {
        &self.filters
    }

    pub fn catalog(&self) -> &EmoteCatalog {
        &self.catalog
    }

    pub fn badges(&self) -> &BadgeDictionary {
        &self.badges
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Swap in a freshly fetched catalog.
    pub fn set_catalog(&mut self, catalog: EmoteCatalog) {
        info!("Installed emote catalog with {} emotes", catalog.len());
        self.catalog = catalog;
    }

    pub fn emotes_enabled(&self) -> bool {
        self.config.emotes.enabled
    }

    pub fn set_emotes_enabled(&mut self, enabled: bool) {
        self.config.emotes.enabled = enabled;
    }

    pub fn set_listener(&mut self, listener: Box<dyn StateListener>) {
        self.moderation.set_listener(listener);
    }

    pub fn is_blocked(&self, user_id: Option<&str>, username: Option<&str>) -> bool {
        self.moderation.is_blocked(user_id, username)
    }

    pub fn block(&mut self, user_id: Option<&str>, username: Option<&str>) -> bool {
        self.moderation.block(user_id, username)
    }

    pub fn unblock(&mut self, identifier: &str) -> bool {
        self.moderation.unblock(identifier)
    }

    pub fn add_filter_word(&mut self, word: &str) -> bool {
        let changed = self.moderation.add_filter_word(word);
        if changed {
            self.recompile_filters();
        }
        changed
    }

    pub fn remove_filter_word(&mut self, word: &str) -> bool {
        let changed = self.moderation.remove_filter_word(word);
        if changed {
            self.recompile_filters();
        }
        changed
    }

    pub fn assign_badge(&mut self, user_id: &str, badge_key: Option<&str>) -> bool {
        self.moderation.assign_badge(user_id, badge_key)
    }

    pub fn set_self(&mut self, user_id: Option<&str>, badge_key: Option<&str>) -> bool {
        self.moderation.set_self(user_id, badge_key)
    }

    /// Known users for display, owned so callers can drop the borrow.
    pub fn known_users(&self) -> Vec<(String, String)> {
        self.state()
            .known_users(KNOWN_USER_LIMIT)
            .into_iter()
            .map(|(id, name)| (id.to_string(), name.to_string()))
            .collect()
    }

    /// Full snapshot as pretty-printed JSON in the persisted layout.
    pub fn export_state(&self) -> Result<String, EnhancerError> {
        serde_json::to_string_pretty(self.state()).map_err(|e| EnhancerError::Persistence(e.to_string()))
    }

    /// Replace the state with an exported snapshot. Malformed fields fall back
    /// to their defaults; an unparsable blob is rejected and nothing changes.
    pub fn import_state(&mut self, raw: &str) -> Result<bool, EnhancerError> {
        let state = parse_state(raw)?;
        let changed = self.moderation.replace(state);
        if changed {
            info!("Imported moderation state");
            self.recompile_filters();
        }
        Ok(changed)
    }

    /// Drop every rule and assignment.
    pub fn reset(&mut self) -> bool {
        let changed = self.moderation.replace(ModerationState::default());
        if changed {
            warn!("Moderation state reset");
            self.recompile_filters();
        }
        changed
    }

    fn recompile_filters(&mut self) {
        self.filters = WordFilter::compile(&self.moderation.state().filtered_words, &self.config.filters.mask);
    }
}
