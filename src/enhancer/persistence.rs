// src/enhancer/persistence.rs - Key-value storage collaborator and tolerant state loading

use anyhow::{Context, Result};
use log::{info, warn};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::enhancer::moderation::{normalize_word, ModerationState};
use crate::types::{normalize_user_id, EnhancerError};

/// Browser-storage style key-value collaborator.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Rc<RefCell<HashMap<String, String>>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

/// One JSON file per key inside a state directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create state directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(raw))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
        }
        Ok(())
    }
}

/// Loads and saves the moderation snapshot under one fixed key.
pub struct StateRepository {
    store: Box<dyn KeyValueStore>,
    key: String,
}

impl StateRepository {
    pub fn new(store: Box<dyn KeyValueStore>, key: &str) -> Self {
        Self {
            store,
            key: key.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stored snapshot, `None` if nothing was ever saved.
    pub fn try_load(&self) -> Result<Option<ModerationState>, EnhancerError> {
        let raw = self
            .store
            .get(&self.key)
            .map_err(|e| EnhancerError::Persistence(format!("{:#}", e)))?;
        match raw {
            Some(raw) => parse_state(&raw).map(Some),
            None => Ok(None),
        }
    }

    /// Never fails. Unreadable or corrupt data resets to the empty state.
    pub fn load(&self) -> ModerationState {
        match self.try_load() {
            Ok(Some(state)) => state,
            Ok(None) => ModerationState::default(),
            Err(e) => {
                warn!("Resetting moderation state: {}", e);
                ModerationState::default()
            }
        }
    }

    /// Load, migrating the legacy mute cookie when nothing is stored yet.
    pub fn load_or_migrate(&self, legacy_cookie: Option<&str>) -> ModerationState {
        match self.try_load() {
            Ok(Some(state)) => state,
            Ok(None) => {
                let mut state = ModerationState::default();
                if let Some(cookie) = legacy_cookie {
                    let ids = parse_legacy_mutes(cookie);
                    if !ids.is_empty() {
                        for id in &ids {
                            state.block(Some(id.as_str()), None);
                        }
                        info!("Migrated {} muted users from legacy cookie", ids.len());
                        if let Err(e) = self.save(&state) {
                            warn!("Failed to persist migrated state: {}", e);
                        }
                    }
                }
                state
            }
            Err(e) => {
                warn!("Resetting moderation state: {}", e);
                ModerationState::default()
            }
        }
    }

    pub fn save(&self, state: &ModerationState) -> Result<(), EnhancerError> {
        let raw = serde_json::to_string(state).map_err(|e| EnhancerError::Persistence(e.to_string()))?;
        self.store
            .set(&self.key, &raw)
            .map_err(|e| EnhancerError::Persistence(format!("{:#}", e)))
    }

    pub fn clear(&self) -> Result<(), EnhancerError> {
        self.store
            .remove(&self.key)
            .map_err(|e| EnhancerError::Persistence(format!("{:#}", e)))
    }
}

/// Parse a stored blob. Only unparsable or non-object blobs are errors;
/// malformed fields fall back to their empty defaults one by one.
pub fn parse_state(raw: &str) -> Result<ModerationState, EnhancerError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| EnhancerError::PersistenceCorruption(e.to_string()))?;
    if !value.is_object() {
        return Err(EnhancerError::PersistenceCorruption(
            "top-level value is not an object".to_string(),
        ));
    }
    Ok(state_from_value(&value))
}

/// Build a state from any JSON value, substituting defaults per field.
pub fn state_from_value(value: &Value) -> ModerationState {
    let mut state = ModerationState::default();

    let blocked = &value["blocked"];
    for id in array_items(&blocked["ids"]) {
        if let Ok(Some(id)) = normalize_user_id(id) {
            if !state.blocked.ids.contains(&id) {
                state.blocked.ids.push(id);
            }
        }
    }
    for name in array_items(&blocked["names"]).filter_map(Value::as_str) {
        let name = name.trim().to_lowercase();
        if !name.is_empty() && !state.blocked.names.contains(&name) {
            state.blocked.names.push(name);
        }
    }

    for word in array_items(&value["filteredWords"]).filter_map(Value::as_str) {
        let word = normalize_word(word);
        if !word.is_empty() && !state.filtered_words.contains(&word) {
            state.filtered_words.push(word);
        }
    }

    let badges = &value["teamBadges"];
    state.team_badges.self_badge = badges["selfBadge"]
        .as_str()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string);
    state.team_badges.self_user_id = normalize_user_id(&badges["selfUserId"]).ok().flatten();
    state.team_badges.assignments = string_map(&badges["assignments"]);
    state.team_badges.known_users = string_map(&badges["knownUsers"]);

    state
}

fn array_items(value: &Value) -> impl Iterator<Item = &Value> {
    value.as_array().into_iter().flatten()
}

fn string_map(value: &Value) -> BTreeMap<String, String> {
    value
        .as_object()
        .into_iter()
        .flatten()
        .filter_map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_string())))
        .filter(|(key, value)| !key.trim().is_empty() && !value.is_empty())
        .collect()
}

/// Extract numeric ids from a legacy `fs_mute` cookie: a URL-encoded JSON array.
pub fn parse_legacy_mutes(cookie: &str) -> Vec<String> {
    let raw = cookie
        .split(';')
        .map(str::trim)
        .find_map(|pair| pair.strip_prefix("fs_mute="));

    let Some(raw) = raw else {
        return Vec::new();
    };

    let decoded = match urlencoding::decode(raw) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!("Legacy mute cookie is not valid UTF-8: {}", e);
            return Vec::new();
        }
    };

    let parsed: Value = match serde_json::from_str(&decoded) {
        Ok(value) => value,
        Err(e) => {
            warn!("Legacy mute cookie is not JSON: {}", e);
            return Vec::new();
        }
    };

    let mut ids = Vec::new();
    for item in array_items(&parsed) {
        let number = match item {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        if let Some(n) = number.filter(|n| n.is_finite() && n.fract() == 0.0) {
            let id = format!("{}", n as i64);
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample_state() -> ModerationState {
        let mut state = ModerationState::default();
        state.block(Some("42"), Some("Bob"));
        state.add_filter_word("spam");
        state.add_filter_word("/b[a4]d/i");
        state.assign_badge("7", Some("arsenal"));
        state.set_self(Some("1"), Some("chelsea"));
        state.record_known_user("7", "gunner");
        state
    }

    #[test]
    fn test_round_trip_preserves_state() {
        let store = MemoryStore::default();
        let repository = StateRepository::new(Box::new(store), "key");
        let state = sample_state();

        repository.save(&state).unwrap();
        assert_eq!(repository.load(), state);
    }

    #[test]
    fn test_persisted_layout_uses_host_field_names() {
        let raw = serde_json::to_value(sample_state()).unwrap();
        assert_eq!(raw["blocked"]["ids"], json!(["42"]));
        assert_eq!(raw["filteredWords"][0], json!("spam"));
        assert_eq!(raw["teamBadges"]["selfUserId"], json!("1"));
        assert_eq!(raw["teamBadges"]["assignments"]["7"], json!("arsenal"));
        assert_eq!(raw["teamBadges"]["knownUsers"]["7"], json!("gunner"));
    }

    #[test_log::test]
    fn test_corrupt_blob_loads_default() {
        let store = MemoryStore::default();
        store.set("key", "{not json").unwrap();
        let repository = StateRepository::new(Box::new(store.clone()), "key");
        assert_eq!(repository.load(), ModerationState::default());

        store.set("key", "[1, 2, 3]").unwrap();
        assert_eq!(repository.load(), ModerationState::default());
        assert!(matches!(
            repository.try_load(),
            Err(EnhancerError::PersistenceCorruption(_))
        ));
    }

    #[test]
    fn test_malformed_fields_default_individually() {
        let raw = json!({
            "blocked": { "ids": [42, "43", {"x": 1}, null], "names": "bob" },
            "filteredWords": ["  SPAM ", 5, ""],
            "teamBadges": {
                "selfBadge": 3,
                "selfUserId": 99,
                "assignments": { "7": "arsenal", "8": 1 },
                "knownUsers": []
            }
        });
        let state = parse_state(&raw.to_string()).unwrap();

        assert_eq!(state.blocked.ids, vec!["42".to_string(), "43".to_string()]);
        assert!(state.blocked.names.is_empty());
        assert_eq!(state.filtered_words, vec!["spam".to_string()]);
        assert_eq!(state.team_badges.self_badge, None);
        assert_eq!(state.team_badges.self_user_id, Some("99".to_string()));
        assert_eq!(state.team_badges.assignments.len(), 1);
        assert!(state.team_badges.known_users.is_empty());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state")).unwrap();
        let repository = StateRepository::new(Box::new(store.clone()), "ppv-chat-enhancer-state");

        assert_eq!(repository.try_load().unwrap(), None);
        let state = sample_state();
        repository.save(&state).unwrap();
        assert!(dir.path().join("state/ppv-chat-enhancer-state.json").exists());
        assert_eq!(repository.load(), state);

        repository.clear().unwrap();
        assert_eq!(store.get("ppv-chat-enhancer-state").unwrap(), None);
    }

    #[test]
    fn test_legacy_cookie_migration() {
        let cookie = format!(
            "theme=dark; fs_mute={}; other=1",
            urlencoding::encode("[12, \"13\", 12, \"x\", 1.5]")
        );
        assert_eq!(parse_legacy_mutes(&cookie), vec!["12".to_string(), "13".to_string()]);
        assert!(parse_legacy_mutes("theme=dark").is_empty());
        assert!(parse_legacy_mutes("fs_mute=%7Bbroken").is_empty());

        let store = MemoryStore::default();
        let repository = StateRepository::new(Box::new(store.clone()), "key");
        let state = repository.load_or_migrate(Some(cookie.as_str()));
        assert!(state.is_blocked(Some("12"), None));
        assert!(store.get("key").unwrap().is_some());

        // Stored state wins over the cookie once it exists.
        let mut edited = state.clone();
        edited.unblock("12");
        repository.save(&edited).unwrap();
        assert!(!repository.load_or_migrate(Some(cookie.as_str())).is_blocked(Some("12"), None));
    }
}
