// src/enhancer/pipeline.rs - Per-message pipeline over data records and rendered nodes

use log::{debug, error};
use serde_json::Value;
use std::borrow::Cow;

use crate::config::FilterMode;
use crate::enhancer::html::{escape_html, transform_text_segments, unescape_html};
use crate::enhancer::ChatEnhancer;
use crate::host::{ChatDom, ChatSelectors, InsertPosition, NodeId, Selector};
use crate::types::{EnhancerError, MessageRecord, Outcome};

/// Attribute set on every message node the pipeline has handled.
pub const PROCESSED_MARKER: &str = "data-enhanced";

/// Attribute naming the badge key on rendered badge images.
pub const BADGE_ATTRIBUTE: &str = "data-badge";

impl ChatEnhancer {
    /// Steps 1-4 on a host data record, before the host renders it.
    ///
    /// The record is only rewritten when evaluation succeeds; on any fault it
    /// passes through exactly as the host supplied it.
    pub fn process_record(&mut self, record: &mut MessageRecord) -> Outcome {
        if record.evaluated {
            self.stats.skipped += 1;
            return Outcome::AlreadyEvaluated;
        }

        let mut working = record.clone();
        let outcome = match self.evaluate_record(&mut working) {
            Ok(outcome) => {
                *record = working;
                outcome
            }
            Err(e) => {
                error!("Passing message through unmodified: {}", e);
                Outcome::PassedThrough
            }
        };

        record.evaluated = true;
        self.count(outcome);
        outcome
    }

    fn evaluate_record(&mut self, record: &mut MessageRecord) -> Result<Outcome, EnhancerError> {
        let user_id = record.user_id()?;
        let username = record.username()?;
        let text = match &record.message {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(text.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(other) => {
                return Err(EnhancerError::PerMessageFault(format!(
                    "message text has unsupported type: {}",
                    other
                )))
            }
        };

        if let (Some(id), Some(name)) = (&user_id, &username) {
            self.moderation.record_known_user(id, name);
        }

        if self.moderation.is_blocked(user_id.as_deref(), username.as_deref()) {
            debug!("Suppressed record from id={:?} name={:?}", user_id, username);
            return Ok(Outcome::Suppressed);
        }

        if let Some(text) = text {
            if self.config.filters.mode == FilterMode::Hide && self.filters.is_hit(&text) {
                debug!("Hid filtered record from id={:?}", user_id);
                return Ok(Outcome::Suppressed);
            }
            if let Cow::Owned(redacted) = self.filters.redact(&text) {
                record.set_text(redacted);
            }
        }

        if let Some(key) = self.badge_for(user_id.as_deref()) {
            let mut badges = record.badge_list();
            if !badges.contains(&key) {
                badges.push(key);
                record.set_badges(badges);
            }
        }

        Ok(Outcome::Rendered)
    }

    /// Step 5 on host-rendered markup. No-op while emotes are disabled or the
    /// catalog is empty.
    pub fn render_emotes_html(&self, html: &str) -> String {
        if !self.config.emotes.enabled {
            return html.to_string();
        }
        self.catalog.apply_to_html(html)
    }

    /// Steps 1-6 directly against a rendered message node.
    ///
    /// The processed marker is set before anything else, so a node is handled
    /// at most once even when evaluation fails.
    pub fn process_node<D: ChatDom + ?Sized>(&mut self, dom: &mut D, node: NodeId, selectors: &ChatSelectors) -> Outcome {
        if dom.attribute(node, PROCESSED_MARKER).is_some() {
            self.stats.skipped += 1;
            return Outcome::AlreadyEvaluated;
        }
        dom.set_attribute(node, PROCESSED_MARKER, "1");

        let outcome = match self.evaluate_node(dom, node, selectors) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Leaving message node {} unmodified: {}", node, e);
                Outcome::PassedThrough
            }
        };
        self.count(outcome);
        outcome
    }

    fn evaluate_node<D: ChatDom + ?Sized>(
        &mut self,
        dom: &mut D,
        node: NodeId,
        selectors: &ChatSelectors,
    ) -> Result<Outcome, EnhancerError> {
        if !dom.is_connected(node) {
            return Err(EnhancerError::PerMessageFault(format!("node {} is detached", node)));
        }

        let (user_id, username) = selectors.author(dom, node);
        if let (Some(id), Some(name)) = (&user_id, &username) {
            self.moderation.record_known_user(id, name);
        }

        if self.moderation.is_blocked(user_id.as_deref(), username.as_deref()) {
            dom.remove(node);
            return Ok(Outcome::Suppressed);
        }

        if let Some(text_element) = selectors.text_element(dom, node) {
            if self.config.filters.mode == FilterMode::Hide && self.filters.is_hit(&dom.text_content(text_element)) {
                dom.remove(node);
                return Ok(Outcome::Suppressed);
            }

            let html = dom.inner_html(text_element);
            let redacted = transform_text_segments(&html, |segment| match self.filters.redact(&unescape_html(segment)) {
                Cow::Owned(redacted) => Some(escape_html(&redacted).into_owned()),
                Cow::Borrowed(_) => None,
            });
            let rendered = self.render_emotes_html(&redacted);
            if rendered != html {
                dom.set_inner_html(text_element, &rendered);
            }
        }

        if let Some(key) = self.badge_for(user_id.as_deref()) {
            self.insert_badge(dom, node, selectors, &key)?;
        }

        Ok(Outcome::Rendered)
    }

    /// Namespaced badge key for an author, if any.
    fn badge_for(&self, user_id: Option<&str>) -> Option<String> {
        self.moderation
            .resolve_badge(user_id)
            .map(|key| self.badges.namespaced_key(key))
    }

    fn insert_badge<D: ChatDom + ?Sized>(
        &self,
        dom: &mut D,
        node: NodeId,
        selectors: &ChatSelectors,
        key: &str,
    ) -> Result<(), EnhancerError> {
        let badges = Selector::parse(&format!("[{}]", BADGE_ATTRIBUTE))?;
        let present = dom
            .query_selector_all(node, &badges)
            .into_iter()
            .any(|badge| dom.attribute(badge, BADGE_ATTRIBUTE).as_deref() == Some(key));
        if present {
            return Ok(());
        }

        let Some(badge) = self.badges.get(key) else {
            debug!("No badge definition for '{}'", key);
            return Ok(());
        };
        let label = escape_html(&badge.label);
        let markup = format!(
            r#"<img class="chat-badge chat-enhancer-badge" {}="{}" src="{}" alt="{}" title="{}" />"#,
            BADGE_ATTRIBUTE,
            escape_html(key),
            escape_html(&badge.image),
            label,
            label
        );

        match selectors.user_element(dom, node) {
            Some(user) => dom.insert_adjacent_html(user, InsertPosition::BeforeBegin, &markup),
            None => dom.insert_adjacent_html(node, InsertPosition::AfterBegin, &markup),
        };
        Ok(())
    }

    fn count(&mut self, outcome: Outcome) {
        self.stats.evaluated += 1;
        match outcome {
            Outcome::Suppressed => self.stats.suppressed += 1,
            Outcome::Rendered => self.stats.rendered += 1,
            Outcome::PassedThrough => self.stats.passed_through += 1,
            Outcome::AlreadyEvaluated => self.stats.skipped += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnhancerConfig;
    use crate::enhancer::emotes::EmoteCatalog;
    use crate::enhancer::persistence::{MemoryStore, StateRepository};
    use crate::host::Document;
    use crate::providers::EmoteDescriptor;
    use serde_json::json;

    fn enhancer() -> ChatEnhancer {
        enhancer_with(EnhancerConfig::default())
    }

    fn enhancer_with(config: EnhancerConfig) -> ChatEnhancer {
        let repository = StateRepository::new(Box::new(MemoryStore::default()), "pipeline-test");
        ChatEnhancer::new(config, repository)
    }

    fn with_lul(enhancer: &mut ChatEnhancer) {
        enhancer.set_catalog(EmoteCatalog::from_sources(
            &[(
                "test".to_string(),
                vec![EmoteDescriptor {
                    code: "LUL".to_string(),
                    image_url: "https://cdn/x.png".to_string(),
                }],
            )],
            false,
        ));
    }

    fn selectors() -> ChatSelectors {
        ChatSelectors::from_config(&EnhancerConfig::default().chat).unwrap()
    }

    fn message_dom(inner: &str) -> (Document, NodeId) {
        let dom = Document::parse(&format!(r#"<div id="message-list"><div class="message">{}</div></div>"#, inner));
        let list = dom.children(dom.root())[0];
        let node = dom.children(list)[0];
        (dom, node)
    }

    #[test]
    fn test_blocked_record_is_suppressed() {
        let mut enhancer = enhancer();
        enhancer.block(Some("42"), None);

        let mut record = MessageRecord::new(Some("42"), Some("bob"), "hi");
        assert_eq!(enhancer.process_record(&mut record), Outcome::Suppressed);
        assert_eq!(enhancer.process_record(&mut record), Outcome::AlreadyEvaluated);
    }

    #[test]
    fn test_numeric_ids_match_string_blocks() {
        let mut enhancer = enhancer();
        enhancer.block(Some("42"), None);

        let mut record: MessageRecord =
            serde_json::from_value(json!({"system_user_id": 42, "username": "x", "message": "hi"})).unwrap();
        assert_eq!(enhancer.process_record(&mut record), Outcome::Suppressed);
    }

    #[test]
    fn test_record_text_is_redacted() {
        let mut enhancer = enhancer();
        enhancer.add_filter_word("spam");

        let mut record = MessageRecord::new(Some("1"), Some("a"), "no spam here");
        assert_eq!(enhancer.process_record(&mut record), Outcome::Rendered);
        assert_eq!(record.text(), Some("no *** here"));
    }

    #[test]
    fn test_badge_is_added_once() {
        let mut enhancer = enhancer();
        enhancer.assign_badge("7", Some("arsenal"));

        let mut record = MessageRecord::new(Some("7"), Some("a"), "hi");
        enhancer.process_record(&mut record);
        assert_eq!(enhancer.process_record(&mut record), Outcome::AlreadyEvaluated);

        // A fresh copy of the same host record must not duplicate the badge either.
        let mut copy = record.clone();
        copy.evaluated = false;
        enhancer.process_record(&mut copy);

        assert_eq!(copy.badge_list(), vec!["chat-enhancer-team-arsenal".to_string()]);
    }

    #[test_log::test]
    fn test_fault_passes_record_through() {
        let mut enhancer = enhancer();
        enhancer.add_filter_word("spam");

        let mut record: MessageRecord =
            serde_json::from_value(json!({"system_user_id": {"nested": true}, "message": "spam"})).unwrap();
        let original = record.clone();

        assert_eq!(enhancer.process_record(&mut record), Outcome::PassedThrough);
        assert_eq!(record.message, original.message);
        assert!(record.evaluated);

        // The next message is unaffected.
        let mut next = MessageRecord::new(Some("2"), None, "spam");
        assert_eq!(enhancer.process_record(&mut next), Outcome::Rendered);
        assert_eq!(enhancer.stats().passed_through, 1);
    }

    #[test]
    fn test_hide_mode_suppresses_filter_hits() {
        let mut config = EnhancerConfig::default();
        config.filters.mode = FilterMode::Hide;
        let mut enhancer = enhancer_with(config);
        enhancer.add_filter_word("spam");

        let mut record = MessageRecord::new(Some("1"), None, "buy spam");
        assert_eq!(enhancer.process_record(&mut record), Outcome::Suppressed);
    }

    #[test]
    fn test_render_emotes_html_respects_toggle() {
        let mut enhancer = enhancer();
        with_lul(&mut enhancer);

        let html = enhancer.render_emotes_html("that&#39;s LUL funny");
        assert!(html.contains(r#"alt="LUL""#));
        assert!(html.starts_with("that&#39;s "));
        assert!(html.ends_with(" funny"));

        enhancer.set_emotes_enabled(false);
        assert_eq!(enhancer.render_emotes_html("LUL"), "LUL");
    }

    #[test]
    fn test_node_for_blocked_user_is_removed() {
        let mut enhancer = enhancer();
        enhancer.block(None, Some("bob"));
        let (mut dom, node) = message_dom(r#"<span class="username" data-user-id="5">Bob</span><span class="message-text">hi</span>"#);

        assert_eq!(enhancer.process_node(&mut dom, node, &selectors()), Outcome::Suppressed);
        assert!(!dom.is_connected(node));
        assert_eq!(enhancer.state().team_badges.known_users.get("5").map(String::as_str), Some("Bob"));
    }

    #[test]
    fn test_node_text_is_filtered_and_emotes_applied() {
        let mut enhancer = enhancer();
        enhancer.add_filter_word("spam");
        with_lul(&mut enhancer);
        let (mut dom, node) = message_dom(
            r#"<span class="username" data-user-id="5">eve</span><span class="message-text">spam &amp; LUL <a href="spam">link</a></span>"#,
        );

        assert_eq!(enhancer.process_node(&mut dom, node, &selectors()), Outcome::Rendered);
        let text = selectors().text_element(&dom, node).unwrap();
        let html = dom.inner_html(text);

        assert!(html.starts_with("*** &amp; <img "));
        assert!(html.contains(r#"<a href="spam">link</a>"#));
        assert_eq!(dom.attribute(node, PROCESSED_MARKER).as_deref(), Some("1"));
    }

    #[test]
    fn test_node_pipeline_is_idempotent() {
        let mut enhancer = enhancer();
        enhancer.assign_badge("7", Some("arsenal"));
        with_lul(&mut enhancer);
        let (mut dom, node) = message_dom(r#"<span class="username" data-user-id="7">a</span><span class="message-text">LUL</span>"#);
        let selectors = selectors();

        enhancer.process_node(&mut dom, node, &selectors);
        let once = dom.outer_html(node);
        assert_eq!(enhancer.process_node(&mut dom, node, &selectors), Outcome::AlreadyEvaluated);
        assert_eq!(dom.outer_html(node), once);

        assert_eq!(once.matches("chat-enhancer-emote").count(), 1);
        assert_eq!(once.matches("chat-enhancer-badge").count(), 1);
    }

    #[test]
    fn test_existing_badge_is_not_duplicated() {
        let mut enhancer = enhancer();
        enhancer.assign_badge("7", Some("arsenal"));
        let (mut dom, node) = message_dom(
            r#"<img class="chat-badge" data-badge="chat-enhancer-team-arsenal" src="x.png" /><span class="username" data-user-id="7">a</span><span class="message-text">hi</span>"#,
        );

        enhancer.process_node(&mut dom, node, &selectors());
        let badges = Selector::parse("[data-badge]").unwrap();
        assert_eq!(dom.query_selector_all(node, &badges).len(), 1);
    }

    #[test]
    fn test_badge_inserted_before_username() {
        let mut enhancer = enhancer();
        enhancer.set_self(Some("3"), Some("wolves"));
        let (mut dom, node) = message_dom(r#"<span class="username" data-user-id="3">me</span><span class="message-text">hi</span>"#);

        enhancer.process_node(&mut dom, node, &selectors());
        let first = dom.children(node)[0];
        assert_eq!(dom.tag_name(first), Some("img"));
        assert_eq!(
            dom.attribute(first, BADGE_ATTRIBUTE).as_deref(),
            Some("chat-enhancer-team-wolves")
        );
        assert_eq!(dom.attribute(first, "alt").as_deref(), Some("WOL Supporter"));
    }

    #[test]
    fn test_detached_node_passes_through() {
        let mut enhancer = enhancer();
        let (mut dom, node) = message_dom(r#"<span class="message-text">hi</span>"#);
        dom.remove(node);

        assert_eq!(enhancer.process_node(&mut dom, node, &selectors()), Outcome::PassedThrough);
    }
}
