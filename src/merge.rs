//! Merge Engine
//!
//! Appends normalized units to the live list model, preserving order and
//! never touching previously merged units. Incoming markup is owned
//! (sliced out of the response body into fresh strings), so the parsed
//! response never shares storage with the live model.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

lazy_static! {
    static ref CLASS_ATTR_RE: Regex = Regex::new(r#"class\s*=\s*"([^"]*)""#).unwrap();
}

/// Identity of a merged unit: the server-provided id when present, else
/// the unit's global position in the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKey {
    Id(String),
    Position(usize),
}

/// One catalog item's renderable fragment plus its identity. Immutable
/// once merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub key: UnitKey,
    pub html: String,
}

/// A unit as extracted by the normalizer, before identity assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct RawUnit {
    pub server_id: Option<String>,
    pub html: String,
}

/// The live list model the loader grows. The embedder renders from this;
/// the merge engine is the only writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListContainer {
    /// Container identity: its markup id when present, else synthesized
    /// at bind time.
    pub id: String,
    units: Vec<ContentUnit>,
}

impl ListContainer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            units: Vec::new(),
        }
    }

    pub fn units(&self) -> &[ContentUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn keys(&self) -> Vec<UnitKey> {
        self.units.iter().map(|u| u.key.clone()).collect()
    }
}

/// Append `incoming` to the container in order, assigning identities and
/// stripping animation-helper classes from unit roots. Returns the count
/// merged. Never reorders or rewrites existing units.
pub fn merge(container: &mut ListContainer, incoming: Vec<RawUnit>, strip_classes: &[String]) -> usize {
    let count = incoming.len();
    for raw in incoming {
        let key = match raw.server_id {
            Some(id) => UnitKey::Id(id),
            None => UnitKey::Position(container.units.len()),
        };
        let html = strip_root_classes(&raw.html, strip_classes);
        container.units.push(ContentUnit { key, html });
    }
    debug!(container = %container.id, count, total = container.units.len(), "merged units");
    count
}

/// Remove the given class tokens from the first class attribute of the
/// fragment's opening tag. The original markup removed entrance-animation
/// hooks the same way before re-inserting fetched cards.
fn strip_root_classes(html: &str, strip: &[String]) -> String {
    if strip.is_empty() {
        return html.to_string();
    }
    let open_end = match html.find('>') {
        Some(i) => i,
        None => return html.to_string(),
    };
    let open_tag = &html[..open_end];
    let caps = match CLASS_ATTR_RE.captures(open_tag) {
        Some(c) => c,
        None => return html.to_string(),
    };
    let attr = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
    let kept: Vec<&str> = caps[1]
        .split_whitespace()
        .filter(|t| !strip.iter().any(|s| s == t))
        .collect();
    let mut out = String::with_capacity(html.len());
    out.push_str(&html[..attr.start]);
    out.push_str(&format!("class=\"{}\"", kept.join(" ")));
    out.push_str(&html[attr.end..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: Option<&str>, html: &str) -> RawUnit {
        RawUnit {
            server_id: id.map(|s| s.to_string()),
            html: html.to_string(),
        }
    }

    #[test]
    fn test_merge_appends_in_order_and_returns_count() {
        let mut container = ListContainer::new("grid-1");
        let count = merge(
            &mut container,
            vec![raw(Some("a"), "<li>A</li>"), raw(Some("b"), "<li>B</li>")],
            &[],
        );
        assert_eq!(count, 2);
        assert_eq!(container.len(), 2);
        assert_eq!(container.units()[0].key, UnitKey::Id("a".to_string()));
        assert_eq!(container.units()[1].key, UnitKey::Id("b".to_string()));
    }

    #[test]
    fn test_merge_is_append_only() {
        let mut container = ListContainer::new("grid-1");
        merge(&mut container, vec![raw(Some("a"), "<li>A</li>")], &[]);
        let before = container.keys();
        merge(
            &mut container,
            vec![raw(Some("b"), "<li>B</li>"), raw(None, "<li>C</li>")],
            &[],
        );
        let after = container.keys();
        assert_eq!(&after[..before.len()], &before[..]);
    }

    #[test]
    fn test_positional_keys_are_global() {
        let mut container = ListContainer::new("grid-1");
        merge(
            &mut container,
            vec![raw(None, "<li>A</li>"), raw(None, "<li>B</li>")],
            &[],
        );
        merge(&mut container, vec![raw(None, "<li>C</li>")], &[]);
        assert_eq!(container.units()[2].key, UnitKey::Position(2));
    }

    #[test]
    fn test_strips_animation_classes_from_root() {
        let mut container = ListContainer::new("grid-1");
        merge(
            &mut container,
            vec![raw(
                None,
                r#"<li class="grid__item scroll-trigger"><div class="scroll-trigger">x</div></li>"#,
            )],
            &["scroll-trigger".to_string()],
        );
        let html = &container.units()[0].html;
        assert!(html.starts_with(r#"<li class="grid__item">"#));
        // Only the root tag is rewritten.
        assert!(html.contains(r#"<div class="scroll-trigger">"#));
    }

    #[test]
    fn test_fragment_without_class_attr_is_untouched() {
        let mut container = ListContainer::new("grid-1");
        merge(
            &mut container,
            vec![raw(None, "<li data-x=\"1\">A</li>")],
            &["scroll-trigger".to_string()],
        );
        assert_eq!(container.units()[0].html, "<li data-x=\"1\">A</li>");
    }
}
