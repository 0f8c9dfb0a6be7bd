// src/enhancer/emotes.rs - Merged emote catalog and HTML-safe emote substitution

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use log::{debug, info, warn};
use std::collections::HashSet;

use crate::enhancer::html::{escape_html, transform_text_segments, unescape_html};
use crate::enhancer::matcher::{CompiledPattern, MatchPolicy};
use crate::providers::{EmoteDescriptor, EmoteProvider};
use crate::types::EnhancerError;

/// Marker attribute carried by every image the catalog inserts.
pub const EMOTE_MARKER: &str = "data-enhancer-emote";

#[derive(Debug, Clone)]
pub struct EmoteEntry {
    pub code: String,
    pub image_url: String,
    pub provider: String,
    matcher: CompiledPattern,
}

impl EmoteEntry {
    pub fn matcher(&self) -> &CompiledPattern {
        &self.matcher
    }
}

/// Ordered, deduplicated emote catalog.
///
/// Codes are unique ignoring case; the first provider in priority order wins.
/// An empty catalog makes substitution a no-op.
#[derive(Debug, Clone)]
pub struct EmoteCatalog {
    entries: Vec<EmoteEntry>,
    case_sensitive: bool,
    refreshed_at: Option<DateTime<Utc>>,
}

enum Piece {
    Text(String),
    Emote(String),
}

impl EmoteCatalog {
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            entries: Vec::new(),
            case_sensitive,
            refreshed_at: None,
        }
    }

    /// Merge per-provider descriptor lists given in priority order.
    pub fn from_sources(sources: &[(String, Vec<EmoteDescriptor>)], case_sensitive: bool) -> Self {
        let mut catalog = Self::new(case_sensitive);
        catalog.entries = merge_sources(sources, case_sensitive);
        catalog
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[EmoteEntry] {
        &self.entries
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    /// Lookup ignoring case.
    pub fn get(&self, code: &str) -> Option<&EmoteEntry> {
        let code = code.to_lowercase();
        self.entries.iter().find(|entry| entry.code.to_lowercase() == code)
    }

    /// Build a catalog from all providers in parallel.
    pub async fn fetch(providers: &[Box<dyn EmoteProvider>], case_sensitive: bool) -> Self {
        let mut catalog = Self::new(case_sensitive);
        catalog.refresh(providers).await;
        catalog
    }

    /// Query every provider concurrently and rebuild the catalog.
    ///
    /// Failed providers contribute nothing. If every provider failed the
    /// previous entries are kept. Returns the resulting entry count.
    pub async fn refresh(&mut self, providers: &[Box<dyn EmoteProvider>]) -> usize {
        let results = join_all(providers.iter().map(|provider| async move {
            (provider.name().to_string(), provider.fetch().await)
        }))
        .await;

        let mut sources = Vec::with_capacity(results.len());
        let mut failures = 0;
        for (name, result) in results {
            match result {
                Ok(descriptors) => {
                    info!("Loaded {} emotes from {}", descriptors.len(), name);
                    sources.push((name, descriptors));
                }
                Err(e) => {
                    failures += 1;
                    let error = EnhancerError::ProviderUnavailable {
                        provider: name,
                        reason: format!("{:#}", e),
                    };
                    warn!("{}", error);
                }
            }
        }

        if !providers.is_empty() && failures == providers.len() {
            warn!("All emote providers failed, keeping {} cached emotes", self.entries.len());
            return self.entries.len();
        }

        self.entries = merge_sources(&sources, self.case_sensitive);
        self.refreshed_at = Some(Utc::now());
        info!("Emote catalog ready with {} emotes", self.entries.len());
        self.entries.len()
    }

    /// Substitute emotes in plain text.
    ///
    /// Returns escaped HTML with `<img>` references, or `None` if no code matched.
    /// Entries apply in catalog order and only to text not already replaced.
    pub fn substitute_text(&self, text: &str) -> Option<String> {
        if self.entries.is_empty() || text.is_empty() {
            return None;
        }

        let mut pieces = vec![Piece::Text(text.to_string())];
        let mut matched = false;

        for entry in &self.entries {
            let mut next = Vec::with_capacity(pieces.len());
            for piece in pieces {
                let Piece::Text(segment) = piece else {
                    next.push(piece);
                    continue;
                };

                let ranges = entry.matcher.match_ranges(&segment);
                if ranges.is_empty() {
                    next.push(Piece::Text(segment));
                    continue;
                }

                matched = true;
                let mut last = 0;
                for (start, end) in ranges {
                    if start > last {
                        next.push(Piece::Text(segment[last..start].to_string()));
                    }
                    next.push(Piece::Emote(emote_image(&segment[start..end], &entry.image_url)));
                    last = end;
                }
                if last < segment.len() {
                    next.push(Piece::Text(segment[last..].to_string()));
                }
            }
            pieces = next;
        }

        if !matched {
            return None;
        }

        let mut html = String::with_capacity(text.len() * 2);
        for piece in &pieces {
            match piece {
                Piece::Text(segment) => html.push_str(&escape_html(segment)),
                Piece::Emote(markup) => html.push_str(markup),
            }
        }
        Some(html)
    }

    /// Substitute emotes in the text segments of an HTML fragment, leaving tags
    /// and attribute values untouched.
    pub fn apply_to_html(&self, html: &str) -> String {
        if self.entries.is_empty() {
            return html.to_string();
        }
        transform_text_segments(html, |segment| self.substitute_text(&unescape_html(segment))).into_owned()
    }
}

fn merge_sources(sources: &[(String, Vec<EmoteDescriptor>)], case_sensitive: bool) -> Vec<EmoteEntry> {
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for (provider, descriptors) in sources {
        for descriptor in descriptors {
            let code = descriptor.code.trim();
            if code.is_empty() || descriptor.image_url.is_empty() {
                continue;
            }
            if !seen.insert(code.to_lowercase()) {
                continue;
            }

            let matcher = match CompiledPattern::literal(code, MatchPolicy::Substring { case_sensitive }) {
                Ok(matcher) => matcher,
                Err(e) => {
                    debug!("Skipping {} emote: {}", provider, e);
                    continue;
                }
            };
            entries.push(EmoteEntry {
                code: code.to_string(),
                image_url: descriptor.image_url.clone(),
                provider: provider.clone(),
                matcher,
            });
        }
    }
    entries
}

fn emote_image(matched: &str, image_url: &str) -> String {
    let alt = escape_html(matched);
    format!(
        r#"<img class="chat-icon chat-enhancer-emote" {}="1" alt="{}" title="{}" src="{}" />"#,
        EMOTE_MARKER,
        alt,
        alt,
        escape_html(image_url)
    )
}
