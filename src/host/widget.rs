// src/host/widget.rs - In-memory chat widget exposing the host render functions

use log::warn;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::enhancer::badges::BadgeDefinition;
use crate::enhancer::html::escape_html;
use crate::host::{ChatDom, EmoteRenderer, HostHooks, InsertPosition, MessageSink, NodeId};
use crate::types::MessageRecord;

/// Host text hook that only escapes.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextRenderer;

impl EmoteRenderer for PlainTextRenderer {
    fn replace_emotes(&self, text: &str) -> String {
        escape_html(text).into_owned()
    }
}

/// Renders message records into a list node, the way the host widget does:
///
/// ```text
/// <div class="message"><img class="chat-badge" .../><span class="username" data-user-id="..">name</span><span class="message-text">..</span></div>
/// ```
pub struct ChatWidget<D: ChatDom> {
    dom: Rc<RefCell<D>>,
    list: NodeId,
    renderer: Option<Box<dyn EmoteRenderer>>,
    badges: HashMap<String, BadgeDefinition>,
    rendered: usize,
}

impl<D: ChatDom> ChatWidget<D> {
    pub fn new(dom: Rc<RefCell<D>>, list: NodeId) -> Self {
        Self {
            dom,
            list,
            renderer: None,
            badges: HashMap::new(),
            rendered: 0,
        }
    }

    pub fn with_renderer(mut self, renderer: Box<dyn EmoteRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn list(&self) -> NodeId {
        self.list
    }

    pub fn badge_dictionary(&self) -> &HashMap<String, BadgeDefinition> {
        &self.badges
    }

    /// Messages appended so far.
    pub fn rendered(&self) -> usize {
        self.rendered
    }

    fn render(&self, record: &MessageRecord) -> String {
        let mut html = String::from(r#"<div class="message">"#);

        for key in record.badge_list() {
            if let Some(badge) = self.badges.get(&key) {
                let label = escape_html(&badge.label);
                html.push_str(&format!(
                    r#"<img class="chat-badge" data-badge="{}" src="{}" alt="{}" title="{}" />"#,
                    escape_html(&key),
                    escape_html(&badge.image),
                    label,
                    label
                ));
            }
        }

        let username = record.username().ok().flatten().unwrap_or_default();
        match record.user_id().ok().flatten() {
            Some(id) => html.push_str(&format!(
                r#"<span class="username" data-user-id="{}">{}</span>"#,
                escape_html(&id),
                escape_html(&username)
            )),
            None => html.push_str(&format!(r#"<span class="username">{}</span>"#, escape_html(&username))),
        }

        let text = record.text().unwrap_or_default();
        let body = match &self.renderer {
            Some(renderer) => renderer.replace_emotes(text),
            None => escape_html(text).into_owned(),
        };
        html.push_str(&format!(r#"<span class="message-text">{}</span></div>"#, body));
        html
    }
}

impl<D: ChatDom> MessageSink for ChatWidget<D> {
    fn add_message(&mut self, record: MessageRecord) {
        let html = self.render(&record);
        match self.dom.try_borrow_mut() {
            Ok(mut dom) => {
                dom.insert_adjacent_html(self.list, InsertPosition::BeforeEnd, &html);
                self.rendered += 1;
            }
            Err(e) => warn!("Chat widget could not append message: {}", e),
        }
    }
}

impl<D: ChatDom> HostHooks for ChatWidget<D> {
    fn take_emote_renderer(&mut self) -> Option<Box<dyn EmoteRenderer>> {
        self.renderer.take()
    }

    fn set_emote_renderer(&mut self, renderer: Box<dyn EmoteRenderer>) {
        self.renderer = Some(renderer);
    }

    fn badge_dictionary_mut(&mut self) -> &mut HashMap<String, BadgeDefinition> {
        &mut self.badges
    }
}
