// src/host/document.rs - In-memory document implementing ChatDom

use std::collections::HashSet;

use crate::enhancer::html::{escape_html, unescape_html};
use crate::host::{ChatDom, InsertPosition, MutationRecord, NodeId};

const VOID_ELEMENTS: &[&str] = &[
    "area", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "wbr",
];

#[derive(Debug, Clone)]
enum NodeData {
    Element {
        tag: String,
        attributes: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// A small arena-backed DOM with a lenient HTML parser and
/// MutationObserver-style child-list records.
///
/// Removed nodes stay in the arena, detached; their ids are never reused.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    observed: HashSet<NodeId>,
    records: Vec<MutationRecord>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Empty document with a `<body>` root.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                data: NodeData::Element {
                    tag: "body".to_string(),
                    attributes: Vec::new(),
                },
                parent: None,
                children: Vec::new(),
            }],
            root: 0,
            observed: HashSet::new(),
            records: Vec::new(),
        }
    }

    /// Document whose body holds the parsed `html`.
    pub fn parse(html: &str) -> Self {
        let mut document = Self::new();
        let root = document.root;
        let nodes = document.parse_fragment(html);
        document.insert_children(root, 0, &nodes);
        document
    }

    /// Serialized markup of a node including itself.
    pub fn outer_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.serialize_into(node, &mut out);
        out
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        self.nodes.len() - 1
    }

    fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.nodes.get(node).and_then(|n| n.parent) else {
            return;
        };
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.children.retain(|&child| child != node);
        }
        self.nodes[node].parent = None;
    }

    fn insert_children(&mut self, parent: NodeId, index: usize, nodes: &[NodeId]) {
        if nodes.is_empty() || parent >= self.nodes.len() {
            return;
        }
        for &node in nodes {
            self.detach(node);
            self.nodes[node].parent = Some(parent);
        }
        let children = &mut self.nodes[parent].children;
        let index = index.min(children.len());
        children.splice(index..index, nodes.iter().copied());

        if self.observed.contains(&parent) {
            self.records.push(MutationRecord {
                target: parent,
                added: nodes.to_vec(),
            });
        }
    }

    /// Parse into detached nodes; returns the top-level ones in order.
    fn parse_fragment(&mut self, html: &str) -> Vec<NodeId> {
        let mut top = Vec::new();
        let mut stack: Vec<NodeId> = Vec::new();
        let mut rest = html;

        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix("<!--") {
                rest = match after.find("-->") {
                    Some(end) => &after[end + 3..],
                    None => "",
                };
                continue;
            }

            if let Some(after) = rest.strip_prefix("</") {
                let end = after.find('>').unwrap_or(after.len());
                let name = after[..end].trim().to_ascii_lowercase();
                if let Some(pos) = stack
                    .iter()
                    .rposition(|&id| self.tag_name(id) == Some(name.as_str()))
                {
                    stack.truncate(pos);
                }
                rest = after.get(end + 1..).unwrap_or("");
                continue;
            }

            if rest.starts_with('<') && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
                let (tag, attributes, self_closing, tail) = parse_tag(&rest[1..]);
                let opens = !self_closing && !VOID_ELEMENTS.contains(&tag.as_str());
                let id = self.alloc(NodeData::Element { tag, attributes });
                self.attach_parsed(&mut top, &stack, id);
                if opens {
                    stack.push(id);
                }
                rest = tail;
                continue;
            }

            let end = markup_start(rest);
            let id = self.alloc(NodeData::Text(unescape_html(&rest[..end]).into_owned()));
            self.attach_parsed(&mut top, &stack, id);
            rest = &rest[end..];
        }

        top
    }

    fn attach_parsed(&mut self, top: &mut Vec<NodeId>, stack: &[NodeId], id: NodeId) {
        match stack.last() {
            Some(&parent) => {
                self.nodes[parent].children.push(id);
                self.nodes[id].parent = Some(parent);
            }
            None => top.push(id),
        }
    }

    fn serialize_into(&self, node: NodeId, out: &mut String) {
        let Some(n) = self.nodes.get(node) else {
            return;
        };
        match &n.data {
            NodeData::Text(text) => out.push_str(&escape_html(text)),
            NodeData::Element { tag, attributes } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attributes {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&escape_html(value));
                    out.push('"');
                }
                if VOID_ELEMENTS.contains(&tag.as_str()) {
                    out.push_str(" />");
                    return;
                }
                out.push('>');
                for &child in &n.children {
                    self.serialize_into(child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        let Some(n) = self.nodes.get(node) else {
            return;
        };
        match &n.data {
            NodeData::Text(text) => out.push_str(text),
            NodeData::Element { .. } => {
                for &child in &n.children {
                    self.collect_text(child, out);
                }
            }
        }
    }
}

/// Byte offset of the next tag, comment or end tag after the first character.
fn markup_start(rest: &str) -> usize {
    for (index, c) in rest.char_indices().skip(1) {
        if c == '<' {
            let next = rest[index + 1..].chars().next();
            if matches!(next, Some(n) if n.is_ascii_alphabetic() || n == '/' || n == '!') {
                return index;
            }
        }
    }
    rest.len()
}

/// Parse `name attr="v" ...>` (the part after `<`).
fn parse_tag(source: &str) -> (String, Vec<(String, String)>, bool, &str) {
    let name_end = source
        .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .unwrap_or(source.len());
    let tag = source[..name_end].to_ascii_lowercase();
    let mut rest = &source[name_end..];
    let mut attributes: Vec<(String, String)> = Vec::new();
    let mut self_closing = false;

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        if let Some(tail) = rest.strip_prefix("/>") {
            self_closing = true;
            rest = tail;
            break;
        }
        if let Some(tail) = rest.strip_prefix('>') {
            rest = tail;
            break;
        }
        if let Some(tail) = rest.strip_prefix('/').or_else(|| rest.strip_prefix('=')) {
            rest = tail;
            continue;
        }

        let name_end = rest
            .find(|c: char| c.is_whitespace() || c == '=' || c == '>' || c == '/')
            .unwrap_or(rest.len());
        let name = rest[..name_end].to_ascii_lowercase();
        rest = rest[name_end..].trim_start();

        let mut value = String::new();
        if let Some(tail) = rest.strip_prefix('=') {
            let tail = tail.trim_start();
            match tail.chars().next() {
                Some(quote) if quote == '"' || quote == '\'' => {
                    let body = &tail[1..];
                    let end = body.find(quote).unwrap_or(body.len());
                    value = unescape_html(&body[..end]).into_owned();
                    rest = body.get(end + 1..).unwrap_or("");
                }
                _ => {
                    let end = tail
                        .find(|c: char| c.is_whitespace() || c == '>')
                        .unwrap_or(tail.len());
                    value = unescape_html(&tail[..end]).into_owned();
                    rest = &tail[end..];
                }
            }
        }

        if !attributes.iter().any(|(existing, _)| *existing == name) {
            attributes.push((name, value));
        }
    }

    (tag, attributes, self_closing, rest)
}

impl ChatDom for Document {
    fn root(&self) -> NodeId {
        self.root
    }

    fn tag_name(&self, node: NodeId) -> Option<&str> {
        match &self.nodes.get(node)?.data {
            NodeData::Element { tag, .. } => Some(tag.as_str()),
            NodeData::Text(_) => None,
        }
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node)?.parent
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        match self.nodes.get(node) {
            Some(n) => n
                .children
                .iter()
                .copied()
                .filter(|&child| matches!(self.nodes[child].data, NodeData::Element { .. }))
                .collect(),
            None => Vec::new(),
        }
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        match &self.nodes.get(node)?.data {
            NodeData::Element { attributes, .. } => attributes
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone()),
            NodeData::Text(_) => None,
        }
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        let Some(NodeData::Element { attributes, .. }) = self.nodes.get_mut(node).map(|n| &mut n.data) else {
            return;
        };
        let name = name.to_ascii_lowercase();
        match attributes.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = value.to_string(),
            None => attributes.push((name, value.to_string())),
        }
    }

    fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    fn inner_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        if let Some(n) = self.nodes.get(node) {
            for &child in &n.children {
                self.serialize_into(child, &mut out);
            }
        }
        out
    }

    fn set_inner_html(&mut self, node: NodeId, html: &str) {
        if self.tag_name(node).is_none() {
            return;
        }
        let old = std::mem::take(&mut self.nodes[node].children);
        for child in old {
            self.nodes[child].parent = None;
        }
        let nodes = self.parse_fragment(html);
        self.insert_children(node, 0, &nodes);
    }

    fn insert_adjacent_html(&mut self, node: NodeId, position: InsertPosition, html: &str) -> Vec<NodeId> {
        if node >= self.nodes.len() {
            return Vec::new();
        }

        let target = match position {
            InsertPosition::AfterBegin => Some((node, 0)),
            InsertPosition::BeforeEnd => Some((node, self.nodes[node].children.len())),
            InsertPosition::BeforeBegin | InsertPosition::AfterEnd => self.parent(node).and_then(|parent| {
                let index = self.nodes[parent].children.iter().position(|&c| c == node)?;
                Some((parent, if position == InsertPosition::AfterEnd { index + 1 } else { index }))
            }),
        };

        let Some((parent, index)) = target else {
            return Vec::new();
        };
        let nodes = self.parse_fragment(html);
        self.insert_children(parent, index, &nodes);
        nodes
    }

    fn remove(&mut self, node: NodeId) {
        self.detach(node);
    }

    fn is_connected(&self, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == self.root {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    fn observe(&mut self, target: NodeId) {
        self.observed.insert(target);
    }

    fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Selector;

    #[test]
    fn test_parse_and_serialize() {
        let html = r#"<div class="message"><img src="a.png" alt="x y" /><span>a &amp; b</span><br></div>"#;
        let dom = Document::parse(html);
        let div = dom.children(dom.root())[0];

        assert_eq!(dom.tag_name(div), Some("div"));
        assert_eq!(dom.children(div).len(), 3);
        assert_eq!(dom.text_content(div), "a & b");
        assert_eq!(
            dom.outer_html(div),
            r#"<div class="message"><img src="a.png" alt="x y" /><span>a &amp; b</span><br /></div>"#
        );
    }

    #[test]
    fn test_lenient_parsing() {
        let dom = Document::parse("<p>1 < 2 <b>bold<i>nested</p>tail<!-- gone -->");
        let root = dom.root();
        assert_eq!(dom.text_content(root), "1 < 2 boldnestedtail");
        assert_eq!(dom.children(root).len(), 1);
    }

    #[test]
    fn test_attributes_unquoted_and_duplicate() {
        let dom = Document::parse("<span data-user-id=42 class='a' class=\"b\">x</span>");
        let span = dom.children(dom.root())[0];
        assert_eq!(dom.attribute(span, "data-user-id").as_deref(), Some("42"));
        assert_eq!(dom.attribute(span, "class").as_deref(), Some("a"));
    }

    #[test]
    fn test_mutation_records_for_observed_nodes() {
        let mut dom = Document::parse(r#"<div id="list"></div><div id="other"></div>"#);
        let root = dom.root();
        let list = dom.query_selector(root, &Selector::parse("#list").unwrap()).unwrap();
        let other = dom.query_selector(root, &Selector::parse("#other").unwrap()).unwrap();
        dom.observe(list);

        let added = dom.insert_adjacent_html(list, InsertPosition::BeforeEnd, "<p>1</p><p>2</p>");
        dom.insert_adjacent_html(other, InsertPosition::BeforeEnd, "<p>3</p>");

        let records = dom.take_records();
        assert_eq!(records, vec![MutationRecord { target: list, added }]);
        assert!(dom.take_records().is_empty());
    }

    #[test]
    fn test_remove_and_connectivity() {
        let mut dom = Document::parse("<div><span>x</span></div>");
        let div = dom.children(dom.root())[0];
        let span = dom.children(div)[0];

        assert!(dom.is_connected(span));
        dom.remove(div);
        assert!(!dom.is_connected(span));
        assert!(dom.children(dom.root()).is_empty());
    }

    #[test]
    fn test_insert_positions_and_inner_html() {
        let mut dom = Document::parse("<div><span class=\"u\">bob</span></div>");
        let div = dom.children(dom.root())[0];
        let span = dom.children(div)[0];

        dom.insert_adjacent_html(span, InsertPosition::BeforeBegin, "<img src=\"b.svg\" />");
        dom.insert_adjacent_html(span, InsertPosition::AfterEnd, "<em>!</em>");
        assert_eq!(dom.inner_html(div), r#"<img src="b.svg" /><span class="u">bob</span><em>!</em>"#);

        dom.set_inner_html(span, "<b>alice</b>");
        assert_eq!(dom.text_content(div), "alice!");
    }
}
