// src/observer/intercept.rs - Decorators around the host's append and emote hooks

use log::{debug, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::enhancer::badges::BadgeDefinition;
use crate::enhancer::html::escape_html;
use crate::enhancer::SharedEnhancer;
use crate::host::{ChatDom, EmoteRenderer, HostHooks, MessageSink};
use crate::observer::MessageObserver;
use crate::types::{MessageRecord, Outcome};

/// Called around every delegated append.
pub trait AppendHook {
    fn before_append(&self) {}
    fn after_append(&self) {}
}

/// Flush what the observer has not seen yet, then claim what the host appends,
/// so a message rendered from an intercepted record is never handled twice.
impl<D: ChatDom> AppendHook for RefCell<MessageObserver<D>> {
    fn before_append(&self) {
        if let Ok(mut observer) = self.try_borrow_mut() {
            observer.deliver();
        }
    }

    fn after_append(&self) {
        match self.try_borrow_mut() {
            Ok(mut observer) => {
                observer.claim_appended();
            }
            Err(e) => debug!("Observer busy during append: {}", e),
        }
    }
}

/// Wraps the host's add-message entry point.
pub struct InterceptedSink<S: MessageSink> {
    inner: S,
    enhancer: SharedEnhancer,
    hook: Option<Rc<dyn AppendHook>>,
}

impl<S: MessageSink> InterceptedSink<S> {
    pub fn new(inner: S, enhancer: SharedEnhancer) -> Self {
        Self {
            inner,
            enhancer,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: Rc<dyn AppendHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S: MessageSink> MessageSink for InterceptedSink<S> {
    fn add_message(&mut self, mut record: MessageRecord) {
        // The borrow must end before delegating: the host calls back into the
        // emote renderer, which borrows the enhancer again.
        let outcome = match self.enhancer.try_borrow_mut() {
            Ok(mut enhancer) => Some(enhancer.process_record(&mut record)),
            Err(e) => {
                warn!("Enhancer busy, delegating message unmodified: {}", e);
                None
            }
        };

        if outcome == Some(Outcome::Suppressed) {
            return;
        }

        if let Some(hook) = &self.hook {
            hook.before_append();
        }
        self.inner.add_message(record);
        if let Some(hook) = &self.hook {
            hook.after_append();
        }
    }
}

impl<S: MessageSink + HostHooks> HostHooks for InterceptedSink<S> {
    fn take_emote_renderer(&mut self) -> Option<Box<dyn EmoteRenderer>> {
        self.inner.take_emote_renderer()
    }

    fn set_emote_renderer(&mut self, renderer: Box<dyn EmoteRenderer>) {
        self.inner.set_emote_renderer(renderer);
    }

    fn badge_dictionary_mut(&mut self) -> &mut HashMap<String, BadgeDefinition> {
        self.inner.badge_dictionary_mut()
    }
}

/// Wraps the host's emote text hook: host output first, then catalog emotes.
pub struct InterceptedRenderer {
    inner: Option<Box<dyn EmoteRenderer>>,
    enhancer: SharedEnhancer,
}

impl InterceptedRenderer {
    pub fn new(inner: Option<Box<dyn EmoteRenderer>>, enhancer: SharedEnhancer) -> Self {
        Self { inner, enhancer }
    }
}

impl EmoteRenderer for InterceptedRenderer {
    fn replace_emotes(&self, text: &str) -> String {
        let html = match &self.inner {
            Some(inner) => inner.replace_emotes(text),
            None => escape_html(text).into_owned(),
        };
        match self.enhancer.try_borrow() {
            Ok(enhancer) => enhancer.render_emotes_html(&html),
            Err(_) => html,
        }
    }

    fn is_enhanced(&self) -> bool {
        true
    }
}

/// Install the decorators on a host. Installing twice leaves a single
/// renderer wrapper, and records are evaluated once however many sinks wrap
/// each other.
pub fn install<H>(mut host: H, enhancer: &SharedEnhancer, hook: Option<Rc<dyn AppendHook>>) -> InterceptedSink<H>
where
    H: MessageSink + HostHooks,
{
    match enhancer.try_borrow() {
        Ok(enhancer) => {
            let added = enhancer.badges().inject_into(host.badge_dictionary_mut());
            debug!("Injected {} badge definitions into host dictionary", added);
        }
        Err(e) => warn!("Could not inject badge definitions: {}", e),
    }

    let renderer: Box<dyn EmoteRenderer> = match host.take_emote_renderer() {
        Some(renderer) if renderer.is_enhanced() => renderer,
        existing => Box::new(InterceptedRenderer::new(existing, enhancer.clone())),
    };
    host.set_emote_renderer(renderer);

    let sink = InterceptedSink::new(host, enhancer.clone());
    match hook {
        Some(hook) => sink.with_hook(hook),
        None => sink,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnhancerConfig;
    use crate::enhancer::emotes::EmoteCatalog;
    use crate::enhancer::persistence::{MemoryStore, StateRepository};
    use crate::enhancer::ChatEnhancer;
    use crate::host::{ChatSelectors, ChatWidget, Document, InsertPosition, NodeId, PlainTextRenderer};
    use crate::providers::EmoteDescriptor;

    struct Fixture {
        dom: Rc<RefCell<Document>>,
        list: NodeId,
        enhancer: SharedEnhancer,
        observer: Rc<RefCell<MessageObserver<Document>>>,
    }

    fn fixture() -> Fixture {
        let config = EnhancerConfig::default();
        let selectors = ChatSelectors::from_config(&config.chat).unwrap();
        let repository = StateRepository::new(Box::new(MemoryStore::default()), "intercept-test");
        let mut enhancer = ChatEnhancer::new(config, repository);
        enhancer.set_catalog(EmoteCatalog::from_sources(
            &[(
                "test".to_string(),
                vec![EmoteDescriptor {
                    code: "LUL".to_string(),
                    image_url: "https://cdn/lul.png".to_string(),
                }],
            )],
            false,
        ));
        let enhancer = enhancer.into_shared();

        let dom = Rc::new(RefCell::new(Document::parse(r#"<div id="message-list"></div>"#)));
        let list = {
            let dom = dom.borrow();
            dom.children(dom.root())[0]
        };
        let observer = MessageObserver::new(dom.clone(), enhancer.clone(), selectors, 150).into_shared();
        observer.borrow_mut().attach(list);

        Fixture {
            dom,
            list,
            enhancer,
            observer,
        }
    }

    fn installed(fixture: &Fixture) -> InterceptedSink<ChatWidget<Document>> {
        let widget = ChatWidget::new(fixture.dom.clone(), fixture.list).with_renderer(Box::new(PlainTextRenderer));
        let hook: Rc<dyn AppendHook> = fixture.observer.clone();
        install(widget, &fixture.enhancer, Some(hook))
    }

    #[test]
    fn test_blocked_record_never_reaches_host() {
        let fixture = fixture();
        fixture.enhancer.borrow_mut().block(Some("42"), None);
        let mut sink = installed(&fixture);

        sink.add_message(MessageRecord::new(Some("42"), Some("troll"), "hi"));
        sink.add_message(MessageRecord::new(Some("7"), Some("friend"), "hello"));

        assert_eq!(sink.inner().rendered(), 1);
        assert_eq!(fixture.dom.borrow().children(fixture.list).len(), 1);
    }

    #[test]
    fn test_intercepted_message_is_filtered_and_emoted() {
        let fixture = fixture();
        fixture.enhancer.borrow_mut().add_filter_word("spam");
        let mut sink = installed(&fixture);

        sink.add_message(MessageRecord::new(Some("1"), Some("a"), "spam <3 LUL"));

        let html = fixture.dom.borrow().inner_html(fixture.list);
        assert!(html.contains("*** &lt;3 <img"));
        assert!(html.contains(r#"src="https://cdn/lul.png""#));
    }

    #[test]
    fn test_observer_does_not_reprocess_intercepted_messages() {
        let fixture = fixture();
        let mut sink = installed(&fixture);
        sink.add_message(MessageRecord::new(Some("1"), Some("a"), "LUL"));

        assert!(!fixture.observer.borrow_mut().deliver());
        let report = fixture.observer.borrow_mut().run_frame();
        assert_eq!(report.processed, 0);
        assert_eq!(fixture.dom.borrow().inner_html(fixture.list).matches("<img").count(), 1);
        assert_eq!(fixture.enhancer.borrow().stats().evaluated, 1);
    }

    #[test]
    fn test_direct_host_appends_still_go_through_observer() {
        let fixture = fixture();
        fixture.enhancer.borrow_mut().add_filter_word("spam");
        let mut sink = installed(&fixture);

        fixture.dom.borrow_mut().insert_adjacent_html(
            fixture.list,
            InsertPosition::BeforeEnd,
            r#"<div class="message"><span class="username">x</span><span class="message-text">spam</span></div>"#,
        );
        sink.add_message(MessageRecord::new(Some("1"), Some("a"), "fine"));

        let report = fixture.observer.borrow_mut().run_frame();
        assert_eq!(report.processed, 1);
        assert_eq!(fixture.dom.borrow().text_content(fixture.list), "x***afine");
    }

    #[test]
    fn test_install_is_idempotent() {
        let fixture = fixture();
        let sink = installed(&fixture);
        let mut twice = install(sink, &fixture.enhancer, None);
        fixture.enhancer.borrow_mut().add_filter_word("spam");

        twice.add_message(MessageRecord::new(Some("1"), Some("a"), "spam LUL"));

        let html = fixture.dom.borrow().inner_html(fixture.list);
        assert_eq!(html.matches("<img").count(), 1);
        assert_eq!(fixture.enhancer.borrow().stats().evaluated, 1);
        assert_eq!(fixture.enhancer.borrow().stats().skipped, 1);
    }

    #[test]
    fn test_team_badges_are_injected_and_rendered() {
        let fixture = fixture();
        fixture.enhancer.borrow_mut().assign_badge("7", Some("arsenal"));
        let mut sink = installed(&fixture);
        assert!(sink.badge_dictionary_mut().contains_key("chat-enhancer-team-arsenal"));

        sink.add_message(MessageRecord::new(Some("7"), Some("gooner"), "hi"));
        let html = fixture.dom.borrow().inner_html(fixture.list);
        assert!(html.contains(r#"data-badge="chat-enhancer-team-arsenal""#));
    }
}
