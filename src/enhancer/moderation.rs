// src/enhancer/moderation.rs - Block lists, filtered words and badge assignments

use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::enhancer::matcher::is_regex_spec;
use crate::enhancer::persistence::StateRepository;

/// Blocked authors. Name and id blocking are independent; either one hides a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedUsers {
    pub ids: Vec<String>,
    pub names: Vec<String>,
}

/// Locally assigned team badges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamBadges {
    #[serde(rename = "selfBadge")]
    pub self_badge: Option<String>,
    #[serde(rename = "selfUserId")]
    pub self_user_id: Option<String>,
    pub assignments: BTreeMap<String, String>,
    /// Last display name seen per user id. Observational only.
    #[serde(rename = "knownUsers")]
    pub known_users: BTreeMap<String, String>,
}

/// Full moderation snapshot, persisted as one JSON blob.
///
/// All operations here are pure; they report whether anything changed so the
/// owning [`Moderation`] knows when to persist and notify.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationState {
    pub blocked: BlockedUsers,
    #[serde(rename = "filteredWords")]
    pub filtered_words: Vec<String>,
    #[serde(rename = "teamBadges")]
    pub team_badges: TeamBadges,
}

/// Canonical form of a filtered word: trimmed, and lower-cased unless it is a
/// `/pattern/flags` spec (lower-casing would change character classes like `\D`).
pub fn normalize_word(word: &str) -> String {
    let trimmed = word.trim();
    if is_regex_spec(trimmed) {
        trimmed.to_string()
    } else {
        trimmed.to_lowercase()
    }
}

impl ModerationState {
    /// True if the id is blocked or the lower-cased name is blocked.
    /// Missing signals never block.
    pub fn is_blocked(&self, user_id: Option<&str>, username: Option<&str>) -> bool {
        if let Some(id) = user_id.map(str::trim).filter(|id| !id.is_empty()) {
            if self.blocked.ids.iter().any(|blocked| blocked == id) {
                return true;
            }
        }
        if let Some(name) = username.map(|n| n.trim().to_lowercase()).filter(|n| !n.is_empty()) {
            if self.blocked.names.contains(&name) {
                return true;
            }
        }
        false
    }

    pub fn block(&mut self, user_id: Option<&str>, username: Option<&str>) -> bool {
        let mut changed = false;

        if let Some(id) = user_id.map(str::trim).filter(|id| !id.is_empty()) {
            if !self.blocked.ids.iter().any(|blocked| blocked == id) {
                self.blocked.ids.push(id.to_string());
                changed = true;
            }
        }
        if let Some(name) = username.map(|n| n.trim().to_lowercase()).filter(|n| !n.is_empty()) {
            if !self.blocked.names.contains(&name) {
                self.blocked.names.push(name);
                changed = true;
            }
        }

        changed
    }

    /// Remove an identifier from both lists. Ids match exactly or lower-cased.
    pub fn unblock(&mut self, identifier: &str) -> bool {
        let identifier = identifier.trim();
        let lowered = identifier.to_lowercase();
        let before = self.blocked.ids.len() + self.blocked.names.len();

        self.blocked.names.retain(|name| *name != lowered);
        self.blocked.ids.retain(|id| id != identifier && *id != lowered);

        before != self.blocked.ids.len() + self.blocked.names.len()
    }

    pub fn add_filter_word(&mut self, word: &str) -> bool {
        let normalized = normalize_word(word);
        if normalized.is_empty() || self.filtered_words.contains(&normalized) {
            return false;
        }
        self.filtered_words.push(normalized);
        true
    }

    pub fn remove_filter_word(&mut self, word: &str) -> bool {
        let normalized = normalize_word(word);
        let before = self.filtered_words.len();
        self.filtered_words.retain(|entry| *entry != normalized);
        before != self.filtered_words.len()
    }

    /// Remember the display name for an id. Both parts are required.
    pub fn record_known_user(&mut self, user_id: &str, username: &str) -> bool {
        let id = user_id.trim();
        if id.is_empty() || username.is_empty() {
            return false;
        }
        match self.team_badges.known_users.get(id) {
            Some(existing) if existing == username => false,
            _ => {
                self.team_badges
                    .known_users
                    .insert(id.to_string(), username.to_string());
                true
            }
        }
    }

    /// Assign a badge key to a user, or clear the assignment with `None`.
    pub fn assign_badge(&mut self, user_id: &str, badge_key: Option<&str>) -> bool {
        let id = user_id.trim();
        if id.is_empty() {
            return false;
        }
        match badge_key.map(str::trim).filter(|key| !key.is_empty()) {
            Some(key) => {
                let previous = self
                    .team_badges
                    .assignments
                    .insert(id.to_string(), key.to_string());
                previous.as_deref() != Some(key)
            }
            None => self.team_badges.assignments.remove(id).is_some(),
        }
    }

    /// Configure the operating user and their badge.
    pub fn set_self(&mut self, user_id: Option<&str>, badge_key: Option<&str>) -> bool {
        let id = user_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let badge = badge_key
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string);

        let changed = self.team_badges.self_user_id != id || self.team_badges.self_badge != badge;
        self.team_badges.self_user_id = id;
        self.team_badges.self_badge = badge;
        changed
    }

    /// Explicit assignment first, then the self badge for the operating user.
    pub fn resolve_badge(&self, user_id: Option<&str>) -> Option<&str> {
        let id = user_id.map(str::trim).filter(|id| !id.is_empty())?;

        if let Some(key) = self.team_badges.assignments.get(id) {
            return Some(key.as_str());
        }
        match (&self.team_badges.self_user_id, &self.team_badges.self_badge) {
            (Some(self_id), Some(badge)) if self_id == id => Some(badge.as_str()),
            _ => None,
        }
    }

    /// Known users sorted by id, capped at `limit`.
    pub fn known_users(&self, limit: usize) -> Vec<(&str, &str)> {
        self.team_badges
            .known_users
            .iter()
            .take(limit)
            .map(|(id, name)| (id.as_str(), name.as_str()))
            .collect()
    }

    /// Blocked ids and names merged for display, without duplicates.
    pub fn blocked_entries(&self) -> Vec<&str> {
        let mut entries: Vec<&str> = Vec::new();
        for entry in self.blocked.ids.iter().chain(self.blocked.names.iter()) {
            if !entries.contains(&entry.as_str()) {
                entries.push(entry.as_str());
            }
        }
        entries
    }
}

/// Receives a snapshot after every persisted change (the settings UI hook).
pub trait StateListener {
    fn state_changed(&self, state: &ModerationState);
}

/// Moderation state with write-through persistence.
///
/// Every mutation runs read-modify-persist-notify inside one call, so the UI
/// thread never observes a half-applied update.
pub struct Moderation {
    state: ModerationState,
    repository: StateRepository,
    listener: Option<Box<dyn StateListener>>,
}

impl Moderation {
    pub fn new(state: ModerationState, repository: StateRepository) -> Self {
        Self {
            state,
            repository,
            listener: None,
        }
    }

    /// Load from the repository; corrupt data degrades to an empty state.
    pub fn load(repository: StateRepository, legacy_cookie: Option<&str>) -> Self {
        let state = repository.load_or_migrate(legacy_cookie);
        info!(
            "Loaded moderation state: {} blocked ids, {} blocked names, {} filtered words, {} badge assignments",
            state.blocked.ids.len(),
            state.blocked.names.len(),
            state.filtered_words.len(),
            state.team_badges.assignments.len()
        );
        Self::new(state, repository)
    }

    pub fn set_listener(&mut self, listener: Box<dyn StateListener>) {
        self.listener = Some(listener);
    }

    pub fn state(&self) -> &ModerationState {
        &self.state
    }

    pub fn is_blocked(&self, user_id: Option<&str>, username: Option<&str>) -> bool {
        self.state.is_blocked(user_id, username)
    }

    pub fn resolve_badge(&self, user_id: Option<&str>) -> Option<&str> {
        self.state.resolve_badge(user_id)
    }

    pub fn block(&mut self, user_id: Option<&str>, username: Option<&str>) -> bool {
        let changed = self.state.block(user_id, username);
        if changed {
            info!("Blocked user id={:?} name={:?}", user_id, username);
        }
        self.commit(changed)
    }

    pub fn unblock(&mut self, identifier: &str) -> bool {
        let changed = self.state.unblock(identifier);
        if changed {
            info!("Unblocked '{}'", identifier);
        }
        self.commit(changed)
    }

    pub fn add_filter_word(&mut self, word: &str) -> bool {
        let changed = self.state.add_filter_word(word);
        self.commit(changed)
    }

    pub fn remove_filter_word(&mut self, word: &str) -> bool {
        let changed = self.state.remove_filter_word(word);
        self.commit(changed)
    }

    pub fn record_known_user(&mut self, user_id: &str, username: &str) -> bool {
        let changed = self.state.record_known_user(user_id, username);
        if changed {
            debug!("Recorded known user {} as '{}'", user_id, username);
        }
        self.commit(changed)
    }

    pub fn assign_badge(&mut self, user_id: &str, badge_key: Option<&str>) -> bool {
        let changed = self.state.assign_badge(user_id, badge_key);
        self.commit(changed)
    }

    pub fn set_self(&mut self, user_id: Option<&str>, badge_key: Option<&str>) -> bool {
        let changed = self.state.set_self(user_id, badge_key);
        self.commit(changed)
    }

    /// Replace the whole snapshot (import or reset).
    pub fn replace(&mut self, state: ModerationState) -> bool {
        let changed = self.state != state;
        self.state = state;
        self.commit(changed)
    }

    fn commit(&mut self, changed: bool) -> bool {
        if !changed {
            return false;
        }
        if let Err(e) = self.repository.save(&self.state) {
            error!("Failed to persist moderation state: {}", e);
        }
        if let Some(listener) = &self.listener {
            listener.state_changed(&self.state);
        }
        true
    }
}
