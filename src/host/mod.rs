// src/host/mod.rs - Contract between the enhancer and the host chat widget

use std::collections::HashMap;

use crate::config::ChatConfig;
use crate::enhancer::badges::BadgeDefinition;
use crate::types::{EnhancerError, MessageRecord};

pub mod document;
pub mod selector;
pub mod widget;

pub use document::Document;
pub use selector::Selector;
pub use widget::{ChatWidget, PlainTextRenderer};

/// Handle to a node inside a [`ChatDom`].
pub type NodeId = usize;

/// Where `insert_adjacent_html` places new nodes relative to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    BeforeBegin,
    AfterBegin,
    BeforeEnd,
    AfterEnd,
}

/// Child-list mutation on an observed node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub added: Vec<NodeId>,
}

/// The slice of the host document the enhancer touches.
///
/// Implementors provide the primitives; selector queries are derived from them.
pub trait ChatDom {
    fn root(&self) -> NodeId;

    /// Lower-case tag name, `None` for text nodes.
    fn tag_name(&self, node: NodeId) -> Option<&str>;

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Element children in document order.
    fn children(&self, node: NodeId) -> Vec<NodeId>;

    fn attribute(&self, node: NodeId, name: &str) -> Option<String>;

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str);

    fn text_content(&self, node: NodeId) -> String;

    fn inner_html(&self, node: NodeId) -> String;

    fn set_inner_html(&mut self, node: NodeId, html: &str);

    /// Parse `html` and insert it. Returns the inserted top-level nodes.
    fn insert_adjacent_html(&mut self, node: NodeId, position: InsertPosition, html: &str) -> Vec<NodeId>;

    /// Detach a node from the document.
    fn remove(&mut self, node: NodeId);

    fn is_connected(&self, node: NodeId) -> bool;

    /// Start recording child-list mutations of `target`.
    fn observe(&mut self, target: NodeId);

    /// Drain queued mutation records.
    fn take_records(&mut self) -> Vec<MutationRecord>;

    fn matches(&self, node: NodeId, selector: &Selector) -> bool {
        selector.matches(self, node)
    }

    /// Descendants of `scope` matching `selector`, in document order.
    fn query_selector_all(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = self.children(scope).into_iter().rev().collect();
        while let Some(node) = stack.pop() {
            if selector.matches(self, node) {
                found.push(node);
            }
            stack.extend(self.children(node).into_iter().rev());
        }
        found
    }

    fn query_selector(&self, scope: NodeId, selector: &Selector) -> Option<NodeId> {
        let mut stack: Vec<NodeId> = self.children(scope).into_iter().rev().collect();
        while let Some(node) = stack.pop() {
            if selector.matches(self, node) {
                return Some(node);
            }
            stack.extend(self.children(node).into_iter().rev());
        }
        None
    }

    /// First match of the first selector that matches anything.
    fn query_first_of(&self, scope: NodeId, selectors: &[Selector]) -> Option<NodeId> {
        selectors
            .iter()
            .find_map(|selector| self.query_selector(scope, selector))
    }
}

/// The host's message-append function.
pub trait MessageSink {
    fn add_message(&mut self, record: MessageRecord);
}

/// The host's optional text-to-markup hook.
pub trait EmoteRenderer {
    fn replace_emotes(&self, text: &str) -> String;

    /// True for renderers already wrapped by the enhancer.
    fn is_enhanced(&self) -> bool {
        false
    }
}

/// Host extension points the enhancer installs itself into.
pub trait HostHooks {
    fn take_emote_renderer(&mut self) -> Option<Box<dyn EmoteRenderer>>;

    fn set_emote_renderer(&mut self, renderer: Box<dyn EmoteRenderer>);

    fn badge_dictionary_mut(&mut self) -> &mut HashMap<String, BadgeDefinition>;
}

/// Parsed host markup conventions.
#[derive(Debug, Clone)]
pub struct ChatSelectors {
    pub list: Vec<Selector>,
    pub message: Selector,
    pub user: Vec<Selector>,
    pub text: Vec<Selector>,
    pub user_id_attribute: String,
}

impl ChatSelectors {
    pub fn from_config(config: &ChatConfig) -> Result<Self, EnhancerError> {
        let parse_all = |sources: &[String]| -> Result<Vec<Selector>, EnhancerError> {
            sources.iter().map(|source| Selector::parse(source)).collect()
        };

        Ok(Self {
            list: parse_all(&config.selectors.list)?,
            message: Selector::parse(&config.selectors.message)?,
            user: parse_all(&config.selectors.user)?,
            text: parse_all(&config.selectors.text)?,
            user_id_attribute: config.user_id_attribute.clone(),
        })
    }

    pub fn is_message<D: ChatDom + ?Sized>(&self, dom: &D, node: NodeId) -> bool {
        self.message.matches(dom, node)
    }

    pub fn user_element<D: ChatDom + ?Sized>(&self, dom: &D, message: NodeId) -> Option<NodeId> {
        dom.query_first_of(message, &self.user)
    }

    pub fn text_element<D: ChatDom + ?Sized>(&self, dom: &D, message: NodeId) -> Option<NodeId> {
        dom.query_first_of(message, &self.text)
    }

    /// Author id and trimmed display name of a rendered message.
    pub fn author<D: ChatDom + ?Sized>(&self, dom: &D, message: NodeId) -> (Option<String>, Option<String>) {
        let user = self.user_element(dom, message);

        let user_id = dom
            .attribute(message, &self.user_id_attribute)
            .or_else(|| user.and_then(|el| dom.attribute(el, &self.user_id_attribute)))
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        let username = user
            .map(|el| dom.text_content(el).trim().to_string())
            .filter(|name| !name.is_empty());

        (user_id, username)
    }
}
