// src/host/selector.rs - The CSS selector subset used by host conventions
//
// Supported: `tag`, `*`, `#id`, `.class`, `[attr]`, `[attr=value]`,
// `:first-child`, `:last-child`, and comma-separated lists. No combinators.

use std::fmt;
use std::str::FromStr;

use crate::host::{ChatDom, NodeId};
use crate::types::EnhancerError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Condition {
    Tag(String),
    Id(String),
    Class(String),
    Attribute { name: String, value: Option<String> },
    FirstChild,
    LastChild,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Compound {
    conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    alternatives: Vec<Compound>,
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self, EnhancerError> {
        let mut alternatives = Vec::new();
        for part in source.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(invalid(source, "empty selector"));
            }
            alternatives.push(parse_compound(source, part)?);
        }

        Ok(Self {
            source: source.trim().to_string(),
            alternatives,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches<D: ChatDom + ?Sized>(&self, dom: &D, node: NodeId) -> bool {
        let Some(tag) = dom.tag_name(node) else {
            return false;
        };
        self.alternatives
            .iter()
            .any(|compound| compound.conditions.iter().all(|c| condition_holds(c, dom, node, tag)))
    }
}

impl FromStr for Selector {
    type Err = EnhancerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn condition_holds<D: ChatDom + ?Sized>(condition: &Condition, dom: &D, node: NodeId, tag: &str) -> bool {
    match condition {
        Condition::Tag(expected) => tag == expected,
        Condition::Id(id) => dom.attribute(node, "id").as_deref() == Some(id.as_str()),
        Condition::Class(class) => dom
            .attribute(node, "class")
            .map_or(false, |classes| classes.split_whitespace().any(|c| c == class)),
        Condition::Attribute { name, value } => match (dom.attribute(node, name), value) {
            (Some(_), None) => true,
            (Some(actual), Some(expected)) => actual == *expected,
            (None, _) => false,
        },
        Condition::FirstChild => dom
            .parent(node)
            .map_or(false, |parent| dom.children(parent).first() == Some(&node)),
        Condition::LastChild => dom
            .parent(node)
            .map_or(false, |parent| dom.children(parent).last() == Some(&node)),
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn take_ident<'a>(source: &str, rest: &'a str) -> Result<(&'a str, &'a str), EnhancerError> {
    let end = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
    if end == 0 {
        return Err(invalid(source, "expected a name"));
    }
    Ok((&rest[..end], &rest[end..]))
}

fn parse_compound(source: &str, part: &str) -> Result<Compound, EnhancerError> {
    let mut conditions = Vec::new();
    let mut rest = part;

    if let Some(stripped) = rest.strip_prefix('*') {
        rest = stripped;
    } else if rest.starts_with(|c: char| c.is_ascii_alphabetic()) {
        let (tag, tail) = take_ident(source, rest)?;
        conditions.push(Condition::Tag(tag.to_ascii_lowercase()));
        rest = tail;
    }

    while let Some(c) = rest.chars().next() {
        match c {
            '#' => {
                let (id, tail) = take_ident(source, &rest[1..])?;
                conditions.push(Condition::Id(id.to_string()));
                rest = tail;
            }
            '.' => {
                let (class, tail) = take_ident(source, &rest[1..])?;
                conditions.push(Condition::Class(class.to_string()));
                rest = tail;
            }
            '[' => {
                let close = rest
                    .find(']')
                    .ok_or_else(|| invalid(source, "unterminated attribute selector"))?;
                conditions.push(parse_attribute(source, &rest[1..close])?);
                rest = &rest[close + 1..];
            }
            ':' => {
                let (pseudo, tail) = take_ident(source, &rest[1..])?;
                match pseudo {
                    "first-child" => conditions.push(Condition::FirstChild),
                    "last-child" => conditions.push(Condition::LastChild),
                    other => return Err(invalid(source, &format!("unsupported pseudo-class ':{}'", other))),
                }
                rest = tail;
            }
            _ if c.is_whitespace() => return Err(invalid(source, "combinators are not supported")),
            other => return Err(invalid(source, &format!("unexpected character '{}'", other))),
        }
    }

    if conditions.is_empty() && part != "*" {
        return Err(invalid(source, "empty selector"));
    }
    Ok(Compound { conditions })
}

fn parse_attribute(source: &str, body: &str) -> Result<Condition, EnhancerError> {
    let body = body.trim();
    match body.split_once('=') {
        None => {
            let (name, tail) = take_ident(source, body)?;
            if !tail.is_empty() {
                return Err(invalid(source, "unsupported attribute operator"));
            }
            Ok(Condition::Attribute {
                name: name.to_ascii_lowercase(),
                value: None,
            })
        }
        Some((name, value)) => {
            let (name, tail) = take_ident(source, name.trim())?;
            if !tail.is_empty() {
                return Err(invalid(source, "unsupported attribute operator"));
            }
            let value = value.trim();
            let unquoted = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            Ok(Condition::Attribute {
                name: name.to_ascii_lowercase(),
                value: Some(unquoted.to_string()),
            })
        }
    }
}

fn invalid(source: &str, reason: &str) -> EnhancerError {
    EnhancerError::Config(format!("invalid selector '{}': {}", source, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Document;

    #[test]
    fn test_parse_rejects_unsupported_syntax() {
        assert!(Selector::parse("div span").is_err());
        assert!(Selector::parse("[data-x").is_err());
        assert!(Selector::parse("a:hover").is_err());
        assert!(Selector::parse(".a,").is_err());
        assert!(Selector::parse("[a~=b]").is_err());
        assert!("span:last-child".parse::<Selector>().is_ok());
    }

    #[test]
    fn test_matching_against_document() {
        let dom = Document::parse(
            r#"<div id="list" class="chat-body"><div class="message big" data-user-id="7"><span class="username">a</span><span>text</span></div></div>"#,
        );
        let root = dom.root();
        let list = dom.query_selector(root, &Selector::parse("#list").unwrap()).unwrap();
        let message = dom.children(list)[0];

        assert!(dom.matches(list, &Selector::parse("div.chat-body").unwrap()));
        assert!(dom.matches(message, &Selector::parse(".chat-message, .message").unwrap()));
        assert!(dom.matches(message, &Selector::parse("[data-user-id]").unwrap()));
        assert!(dom.matches(message, &Selector::parse("[data-user-id='7']").unwrap()));
        assert!(!dom.matches(message, &Selector::parse("[data-user-id=8]").unwrap()));
        assert!(!dom.matches(message, &Selector::parse("span").unwrap()));

        let last = dom.query_selector(message, &Selector::parse("span:last-child").unwrap()).unwrap();
        assert_eq!(dom.text_content(last), "text");
        let first = dom.query_selector(message, &Selector::parse("span:first-child").unwrap()).unwrap();
        assert_eq!(dom.text_content(first), "a");
    }
}
