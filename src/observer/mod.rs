// src/observer/mod.rs - Mutation-driven discovery, frame batching and list trimming

use log::{debug, info, warn};
use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;

use crate::enhancer::{SharedEnhancer, PROCESSED_MARKER};
use crate::host::{ChatDom, ChatSelectors, MutationRecord, NodeId};
use crate::types::Outcome;

pub mod intercept;
pub mod startup;

pub use intercept::{install, AppendHook, InterceptedRenderer, InterceptedSink};
pub use startup::{locate_container, ProbeState, StartupProbe};

/// What one frame of batched processing did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub suppressed: usize,
    pub skipped: usize,
    pub faults: usize,
    pub trimmed: usize,
}

/// Watches the message container and runs the node pipeline on new messages.
///
/// Mutation delivery only queues nodes and requests a frame; the work happens
/// in [`MessageObserver::run_frame`], at most once per frame, in arrival order.
pub struct MessageObserver<D: ChatDom> {
    dom: Rc<RefCell<D>>,
    enhancer: SharedEnhancer,
    selectors: ChatSelectors,
    max_messages: usize,
    container: Option<NodeId>,
    pending: VecDeque<NodeId>,
    queued: HashSet<NodeId>,
    frame_requested: bool,
}

impl<D: ChatDom> MessageObserver<D> {
    pub fn new(dom: Rc<RefCell<D>>, enhancer: SharedEnhancer, selectors: ChatSelectors, max_messages: usize) -> Self {
        Self {
            dom,
            enhancer,
            selectors,
            max_messages,
            container: None,
            pending: VecDeque::new(),
            queued: HashSet::new(),
            frame_requested: false,
        }
    }

    pub fn into_shared(self) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(self))
    }

    pub fn container(&self) -> Option<NodeId> {
        self.container
    }

    pub fn selectors(&self) -> &ChatSelectors {
        &self.selectors
    }

    pub fn frame_requested(&self) -> bool {
        self.frame_requested
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Start observing `container` and queue the messages already in it.
    pub fn attach(&mut self, container: NodeId) -> bool {
        match self.dom.try_borrow_mut() {
            Ok(mut dom) => dom.observe(container),
            Err(e) => {
                warn!("Cannot attach observer: {}", e);
                return false;
            }
        }
        self.container = Some(container);
        info!("Observing chat container node {}", container);
        self.initial_sweep();
        true
    }

    /// Queue every unprocessed message currently in the container.
    pub fn initial_sweep(&mut self) -> usize {
        let Some(container) = self.container else {
            return 0;
        };
        let existing = match self.dom.try_borrow() {
            Ok(dom) => self.message_children(&*dom, container),
            Err(_) => return 0,
        };
        let count = existing.len();
        for node in existing {
            self.enqueue(node);
        }
        count
    }

    /// Drain the document's mutation records.
    pub fn deliver(&mut self) -> bool {
        let records = match self.dom.try_borrow_mut() {
            Ok(mut dom) => dom.take_records(),
            Err(_) => return false,
        };
        self.on_mutations(records)
    }

    /// Queue added message nodes from `records`.
    ///
    /// Returns true only when this call requested a new frame.
    pub fn on_mutations(&mut self, records: Vec<MutationRecord>) -> bool {
        let Some(container) = self.container else {
            return false;
        };

        let candidates: Vec<NodeId> = match self.dom.try_borrow() {
            Ok(dom) => records
                .into_iter()
                .filter(|record| record.target == container)
                .flat_map(|record| record.added)
                .flat_map(|node| self.messages_in(&*dom, node))
                .collect(),
            Err(_) => return false,
        };

        let mut requested = false;
        for node in candidates {
            requested |= self.enqueue(node);
        }
        requested
    }

    /// Mark messages the host appended during an intercepted call as handled.
    ///
    /// They already went through the record pipeline; the observer only has to
    /// count them towards the retention cap.
    pub fn claim_appended(&mut self) -> usize {
        let Some(container) = self.container else {
            return 0;
        };
        let mut dom = match self.dom.try_borrow_mut() {
            Ok(dom) => dom,
            Err(_) => return 0,
        };

        let mut claimed = 0;
        for record in dom.take_records() {
            if record.target != container {
                continue;
            }
            let messages: Vec<NodeId> = record
                .added
                .into_iter()
                .flat_map(|node| self.messages_in(&*dom, node))
                .collect();
            for node in messages {
                if dom.attribute(node, PROCESSED_MARKER).is_none() {
                    dom.set_attribute(node, PROCESSED_MARKER, "1");
                    claimed += 1;
                }
            }
        }
        drop(dom);

        if claimed > 0 {
            self.request_frame();
        }
        claimed
    }

    fn enqueue(&mut self, node: NodeId) -> bool {
        if self.queued.insert(node) {
            self.pending.push_back(node);
            return self.request_frame();
        }
        false
    }

    fn request_frame(&mut self) -> bool {
        if self.frame_requested {
            return false;
        }
        self.frame_requested = true;
        true
    }

    /// Process queued nodes in arrival order, then trim the container.
    pub fn run_frame(&mut self) -> BatchReport {
        self.frame_requested = false;
        let mut report = BatchReport::default();

        let batch: Vec<NodeId> = self.pending.drain(..).collect();
        self.queued.clear();

        let busy = match (self.dom.try_borrow_mut(), self.enhancer.try_borrow_mut()) {
            (Ok(mut dom), Ok(mut enhancer)) => {
                for &node in &batch {
                    if !dom.is_connected(node) {
                        report.skipped += 1;
                        continue;
                    }
                    match enhancer.process_node(&mut *dom, node, &self.selectors) {
                        Outcome::Rendered => report.processed += 1,
                        Outcome::Suppressed => report.suppressed += 1,
                        Outcome::PassedThrough => report.faults += 1,
                        Outcome::AlreadyEvaluated => report.skipped += 1,
                    }
                }
                false
            }
            _ => true,
        };

        if busy {
            warn!("Deferring {} queued messages: host state is busy", batch.len());
            for node in batch {
                self.enqueue(node);
            }
            return report;
        }

        report.trimmed = self.trim();
        report
    }

    /// Remove the oldest messages beyond the retention cap.
    pub fn trim(&mut self) -> usize {
        let Some(container) = self.container else {
            return 0;
        };
        let Ok(mut dom) = self.dom.try_borrow_mut() else {
            return 0;
        };

        let messages = self.message_children(&*dom, container);
        if messages.len() <= self.max_messages {
            return 0;
        }

        let excess = messages.len() - self.max_messages;
        for &node in &messages[..excess] {
            dom.remove(node);
        }
        debug!("Trimmed {} old messages", excess);
        excess
    }

    /// Remove already rendered messages whose author is now blocked.
    pub fn sweep_blocked(&mut self) -> usize {
        let Some(container) = self.container else {
            return 0;
        };
        let (Ok(mut dom), Ok(enhancer)) = (self.dom.try_borrow_mut(), self.enhancer.try_borrow()) else {
            return 0;
        };

        let mut removed = 0;
        for node in self.message_children(&*dom, container) {
            let (user_id, username) = self.selectors.author(&*dom, node);
            if enhancer.is_blocked(user_id.as_deref(), username.as_deref()) {
                dom.remove(node);
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Removed {} messages from newly blocked users", removed);
        }
        removed
    }

    /// Messages in the container, including ones nested in wrappers, in
    /// document order.
    fn message_children(&self, dom: &D, container: NodeId) -> Vec<NodeId> {
        dom.children(container)
            .into_iter()
            .flat_map(|node| self.messages_in(dom, node))
            .collect()
    }

    /// `node` itself if it is a message, otherwise the messages inside it.
    fn messages_in(&self, dom: &D, node: NodeId) -> Vec<NodeId> {
        if self.selectors.is_message(dom, node) {
            vec![node]
        } else {
            dom.query_selector_all(node, &self.selectors.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnhancerConfig;
    use crate::enhancer::persistence::{MemoryStore, StateRepository};
    use crate::enhancer::ChatEnhancer;
    use crate::host::{Document, InsertPosition};

    fn setup(max_messages: usize) -> (Rc<RefCell<Document>>, SharedEnhancer, MessageObserver<Document>, NodeId) {
        let config = EnhancerConfig::default();
        let selectors = ChatSelectors::from_config(&config.chat).unwrap();
        let repository = StateRepository::new(Box::new(MemoryStore::default()), "observer-test");
        let enhancer = ChatEnhancer::new(config, repository).into_shared();

        let dom = Rc::new(RefCell::new(Document::parse(r#"<div id="message-list"></div>"#)));
        let list = {
            let dom = dom.borrow();
            dom.children(dom.root())[0]
        };
        let mut observer = MessageObserver::new(dom.clone(), enhancer.clone(), selectors, max_messages);
        observer.attach(list);
        (dom, enhancer, observer, list)
    }

    fn append(dom: &Rc<RefCell<Document>>, list: NodeId, id: &str, name: &str, text: &str) {
        let html = format!(
            r#"<div class="message"><span class="username" data-user-id="{}">{}</span><span class="message-text">{}</span></div>"#,
            id, name, text
        );
        dom.borrow_mut().insert_adjacent_html(list, InsertPosition::BeforeEnd, &html);
    }

    #[test]
    fn test_burst_requests_a_single_frame() {
        let (dom, enhancer, mut observer, list) = setup(150);
        enhancer.borrow_mut().add_filter_word("spam");

        append(&dom, list, "1", "a", "spam");
        append(&dom, list, "2", "b", "fine");
        assert!(observer.deliver());
        append(&dom, list, "3", "c", "spam again");
        assert!(!observer.deliver());
        assert_eq!(observer.pending(), 3);

        let report = observer.run_frame();
        assert_eq!(report.processed, 3);
        assert!(!observer.frame_requested());
        assert_eq!(dom.borrow().text_content(list), "a***bfinec*** again");
    }

    #[test]
    fn test_blocked_nodes_are_removed() {
        let (dom, enhancer, mut observer, list) = setup(150);
        enhancer.borrow_mut().block(Some("1"), None);

        append(&dom, list, "1", "a", "x");
        append(&dom, list, "2", "b", "y");
        observer.deliver();
        let report = observer.run_frame();

        assert_eq!(report.suppressed, 1);
        assert_eq!(dom.borrow().children(list).len(), 1);
    }

    #[test]
    fn test_trim_discards_oldest() {
        let (dom, _enhancer, mut observer, list) = setup(2);
        for i in 0..5 {
            append(&dom, list, &i.to_string(), "u", &format!("m{}", i));
        }
        observer.deliver();
        let report = observer.run_frame();

        assert_eq!(report.trimmed, 3);
        let dom = dom.borrow();
        let texts: Vec<String> = dom.children(list).iter().map(|&n| dom.text_content(n)).collect();
        assert_eq!(texts, vec!["um3".to_string(), "um4".to_string()]);
    }

    #[test]
    fn test_messages_inside_appended_wrapper_are_processed() {
        let (dom, enhancer, mut observer, list) = setup(150);
        enhancer.borrow_mut().block(Some("42"), None);
        enhancer.borrow_mut().add_filter_word("spam");

        dom.borrow_mut().insert_adjacent_html(
            list,
            InsertPosition::BeforeEnd,
            concat!(
                r#"<div class="history">"#,
                r#"<div class="message"><span class="username" data-user-id="42">troll</span><span class="message-text">spam</span></div>"#,
                r#"<div class="message"><span class="username" data-user-id="7">friend</span><span class="message-text">no spam</span></div>"#,
                r#"</div>"#
            ),
        );

        assert!(observer.deliver());
        let report = observer.run_frame();
        assert_eq!(report.suppressed, 1);
        assert_eq!(report.processed, 1);

        let html = dom.borrow().inner_html(list);
        assert!(!html.contains("troll"));
        assert!(html.contains("no ***"));
    }

    #[test]
    fn test_wrapped_messages_count_towards_trim() {
        let (dom, _enhancer, mut observer, list) = setup(1);
        dom.borrow_mut().insert_adjacent_html(
            list,
            InsertPosition::BeforeEnd,
            r#"<div class="history"><div class="message"><span class="message-text">old</span></div><div class="message"><span class="message-text">new</span></div></div>"#,
        );
        observer.deliver();

        assert_eq!(observer.run_frame().trimmed, 1);
        assert_eq!(dom.borrow().text_content(list), "new");
    }

    #[test]
    fn test_non_message_nodes_are_ignored() {
        let (dom, _enhancer, mut observer, list) = setup(150);
        dom.borrow_mut()
            .insert_adjacent_html(list, InsertPosition::BeforeEnd, r#"<div class="system-notice">hi</div>"#);

        assert!(!observer.deliver());
        assert_eq!(observer.pending(), 0);
    }

    #[test]
    fn test_existing_messages_are_swept_on_attach() {
        let config = EnhancerConfig::default();
        let selectors = ChatSelectors::from_config(&config.chat).unwrap();
        let repository = StateRepository::new(Box::new(MemoryStore::default()), "observer-test");
        let enhancer = ChatEnhancer::new(config, repository).into_shared();
        let dom = Rc::new(RefCell::new(Document::parse(
            r#"<div id="message-list"><div class="message"><span class="message-text">old</span></div></div>"#,
        )));
        let list = {
            let dom = dom.borrow();
            dom.children(dom.root())[0]
        };

        let mut observer = MessageObserver::new(dom.clone(), enhancer, selectors, 150);
        observer.attach(list);
        assert_eq!(observer.pending(), 1);
        assert_eq!(observer.run_frame().processed, 1);
    }

    #[test]
    fn test_claimed_nodes_are_not_reprocessed() {
        let (dom, enhancer, mut observer, list) = setup(150);
        enhancer.borrow_mut().add_filter_word("spam");

        append(&dom, list, "1", "a", "spam");
        assert_eq!(observer.claim_appended(), 1);
        assert!(observer.frame_requested());

        observer.deliver();
        let report = observer.run_frame();
        assert_eq!(report.processed, 0);
        // The claimed node keeps its text; only the record path rewrites it.
        assert_eq!(dom.borrow().text_content(list), "aspam");
    }

    #[test]
    fn test_sweep_blocked_removes_rendered_messages() {
        let (dom, enhancer, mut observer, list) = setup(150);
        append(&dom, list, "1", "spammer", "buy");
        append(&dom, list, "2", "friend", "hi");
        observer.deliver();
        observer.run_frame();

        enhancer.borrow_mut().block(None, Some("Spammer"));
        assert_eq!(observer.sweep_blocked(), 1);
        assert_eq!(dom.borrow().children(list).len(), 1);
    }

    #[test]
    fn test_frame_is_deferred_while_enhancer_is_borrowed() {
        let (dom, enhancer, mut observer, list) = setup(150);
        append(&dom, list, "1", "a", "x");
        observer.deliver();

        let guard = enhancer.borrow_mut();
        let report = observer.run_frame();
        assert_eq!(report, BatchReport::default());
        assert_eq!(observer.pending(), 1);
        drop(guard);

        assert_eq!(observer.run_frame().processed, 1);
    }
}
