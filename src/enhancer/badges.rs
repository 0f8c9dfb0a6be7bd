// src/enhancer/badges.rs - Team badge dictionary and namespaced badge keys

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One entry of the host badge dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeDefinition {
    pub label: String,
    pub image: String,
}

struct TeamBadge {
    key: &'static str,
    abbreviation: &'static str,
    primary: &'static str,
    secondary: &'static str,
}

const TEAM_BADGES: &[TeamBadge] = &[
    TeamBadge { key: "arsenal", abbreviation: "ARS", primary: "#EF0107", secondary: "#063672" },
    TeamBadge { key: "astonvilla", abbreviation: "AVL", primary: "#95BFE5", secondary: "#670E36" },
    TeamBadge { key: "brighton", abbreviation: "BHA", primary: "#0057B8", secondary: "#FFE900" },
    TeamBadge { key: "brentford", abbreviation: "BRE", primary: "#E30613", secondary: "#FFFFFF" },
    TeamBadge { key: "chelsea", abbreviation: "CHE", primary: "#034694", secondary: "#FFFFFF" },
    TeamBadge { key: "everton", abbreviation: "EVE", primary: "#003399", secondary: "#FFFFFF" },
    TeamBadge { key: "fulham", abbreviation: "FUL", primary: "#000000", secondary: "#FFFFFF" },
    TeamBadge { key: "liverpool", abbreviation: "LIV", primary: "#C8102E", secondary: "#00A398" },
    TeamBadge { key: "mancity", abbreviation: "MCI", primary: "#6CABDD", secondary: "#1C2C5B" },
    TeamBadge { key: "manunited", abbreviation: "MUN", primary: "#DA291C", secondary: "#FBE122" },
    TeamBadge { key: "newcastle", abbreviation: "NEW", primary: "#241F20", secondary: "#FFFFFF" },
    TeamBadge { key: "tottenham", abbreviation: "TOT", primary: "#001C58", secondary: "#FFFFFF" },
    TeamBadge { key: "westham", abbreviation: "WHU", primary: "#7A263A", secondary: "#1BB1E7" },
    TeamBadge { key: "wolves", abbreviation: "WOL", primary: "#FDB913", secondary: "#231F20" },
];

/// Circular two-colour crest with the team abbreviation, as an SVG data URI.
pub fn team_badge_image(abbreviation: &str, primary: &str, secondary: &str) -> String {
    let svg = format!(
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="18" height="18" viewBox="0 0 18 18">"#,
            r#"<circle cx="9" cy="9" r="8.5" fill="{p}" stroke="{s}" stroke-width="1"/>"#,
            r#"<text x="9" y="12" font-family="Arial,sans-serif" font-size="6" font-weight="bold" "#,
            r#"text-anchor="middle" fill="{s}">{a}</text></svg>"#
        ),
        p = primary,
        s = secondary,
        a = abbreviation
    );
    format!("data:image/svg+xml;base64,{}", STANDARD.encode(svg))
}

/// Badge definitions keyed by their namespaced key (`<prefix><team>`).
#[derive(Debug, Clone)]
pub struct BadgeDictionary {
    prefix: String,
    entries: BTreeMap<String, BadgeDefinition>,
}

impl BadgeDictionary {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            entries: BTreeMap::new(),
        }
    }

    /// Dictionary preloaded with the built-in team badges.
    pub fn with_team_badges(prefix: &str) -> Self {
        let mut dictionary = Self::new(prefix);
        for team in TEAM_BADGES {
            dictionary.insert(
                team.key,
                BadgeDefinition {
                    label: format!("{} Supporter", team.abbreviation),
                    image: team_badge_image(team.abbreviation, team.primary, team.secondary),
                },
            );
        }
        dictionary
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn insert(&mut self, badge_key: &str, definition: BadgeDefinition) {
        let key = self.namespaced_key(badge_key);
        self.entries.insert(key, definition);
    }

    /// Namespaced form of a badge key. Already namespaced keys pass through.
    pub fn namespaced_key(&self, badge_key: &str) -> String {
        if badge_key.starts_with(&self.prefix) {
            badge_key.to_string()
        } else {
            format!("{}{}", self.prefix, badge_key)
        }
    }

    /// Lookup by raw or namespaced key.
    pub fn get(&self, badge_key: &str) -> Option<&BadgeDefinition> {
        self.entries.get(&self.namespaced_key(badge_key))
    }

    pub fn contains(&self, badge_key: &str) -> bool {
        self.get(badge_key).is_some()
    }

    /// Display label; unknown keys fall back to the raw key.
    pub fn label_for(&self, badge_key: &str) -> String {
        match self.get(badge_key) {
            Some(definition) => definition.label.clone(),
            None => badge_key
                .strip_prefix(&self.prefix)
                .unwrap_or(badge_key)
                .to_string(),
        }
    }

    /// Raw (un-prefixed) team keys in dictionary order.
    pub fn keys(&self) -> Vec<&str> {
        self.entries
            .keys()
            .map(|key| key.strip_prefix(&self.prefix).unwrap_or(key))
            .collect()
    }

    /// Write every definition into the host badge dictionary. Entries under
    /// our prefix are always ours, so a stale host copy is replaced; keys
    /// outside the prefix are left alone.
    pub fn inject_into(&self, host: &mut HashMap<String, BadgeDefinition>) -> usize {
        for (key, definition) in &self.entries {
            host.insert(key.clone(), definition.clone());
        }
        self.entries.len()
    }
}
