//! Markup Scanner
//!
//! Minimal HTML scanning for the normalizer: locate elements by tag, class,
//! id, or attribute, slice out balanced tag regions, and read decoded
//! attribute values. This is not a DOM; it is a forward scanner tuned for
//! the three response shapes the loader has to tolerate, so it stays
//! tolerant of comments, doctypes, void tags, and raw-text elements without
//! building a tree.

use lazy_static::lazy_static;
use regex::Regex;
use std::ops::Range;

lazy_static! {
    static ref ATTR_RE: Regex = Regex::new(
        r#"([a-zA-Z_][a-zA-Z0-9_:.-]*)\s*(?:=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+)))?"#
    )
    .unwrap();
}

/// Tags that never have a closing counterpart.
const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Tags whose content is raw text and must not be tokenized.
const RAW_TEXT_TAGS: &[&str] = &["script", "style"];

/// How to pick an element while scanning.
#[derive(Debug, Clone, Copy)]
pub enum Locator<'a> {
    Tag(&'a str),
    Class(&'a str),
    Id(&'a str),
    Attr(&'a str, &'a str),
}

/// A located element: byte spans into the source plus decoded attributes.
#[derive(Debug, Clone)]
pub struct Element {
    pub tag: String,
    attrs: Vec<(String, String)>,
    /// Span of the whole element including its tags.
    pub span: Range<usize>,
    /// Span of the content between the opening and closing tag.
    pub inner: Range<usize>,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .map(|c| c.split_whitespace().any(|t| t == class))
            .unwrap_or(false)
    }

    pub fn outer_html<'a>(&self, source: &'a str) -> &'a str {
        &source[self.span.clone()]
    }

    pub fn inner_html<'a>(&self, source: &'a str) -> &'a str {
        &source[self.inner.clone()]
    }
}

struct Tag {
    name: String,
    attrs_span: Range<usize>,
    span: Range<usize>,
    closing: bool,
    self_closing: bool,
}

/// Scan forward from `pos` to the next tag token, skipping comments,
/// doctypes, and stray `<` characters.
fn next_tag(html: &str, mut pos: usize) -> Option<Tag> {
    let bytes = html.as_bytes();
    loop {
        let lt = html.get(pos..)?.find('<')? + pos;
        let rest = &html[lt..];
        if rest.starts_with("<!--") {
            pos = match html[lt + 4..].find("-->") {
                Some(i) => lt + 4 + i + 3,
                None => return None,
            };
            continue;
        }
        if rest.starts_with("<!") || rest.starts_with("<?") {
            pos = lt + html[lt..].find('>')? + 1;
            continue;
        }
        let closing = rest.starts_with("</");
        let name_start = lt + if closing { 2 } else { 1 };
        match bytes.get(name_start) {
            Some(c) if c.is_ascii_alphabetic() => {}
            _ => {
                pos = lt + 1;
                continue;
            }
        }
        let mut name_end = name_start;
        while name_end < html.len()
            && (bytes[name_end].is_ascii_alphanumeric()
                || bytes[name_end] == b'-'
                || bytes[name_end] == b':')
        {
            name_end += 1;
        }
        // Find the closing '>' while honoring quoted attribute values.
        let mut i = name_end;
        let mut quote: Option<u8> = None;
        let gt = loop {
            if i >= html.len() {
                return None;
            }
            let c = bytes[i];
            match quote {
                Some(q) => {
                    if c == q {
                        quote = None;
                    }
                }
                None => {
                    if c == b'"' || c == b'\'' {
                        quote = Some(c);
                    } else if c == b'>' {
                        break i;
                    }
                }
            }
            i += 1;
        };
        let self_closing = !closing && html[name_end..gt].trim_end().ends_with('/');
        return Some(Tag {
            name: html[name_start..name_end].to_ascii_lowercase(),
            attrs_span: name_end..gt,
            span: lt..gt + 1,
            closing,
            self_closing,
        });
    }
}

fn parse_attrs(raw: &str) -> Vec<(String, String)> {
    ATTR_RE
        .captures_iter(raw)
        .map(|c| {
            let name = c[1].to_ascii_lowercase();
            let value = c
                .get(2)
                .or_else(|| c.get(3))
                .or_else(|| c.get(4))
                .map(|m| html_escape::decode_html_entities(m.as_str()).into_owned())
                .unwrap_or_default();
            (name, value)
        })
        .collect()
}

fn is_void(name: &str) -> bool {
    VOID_TAGS.contains(&name)
}

fn is_raw_text(name: &str) -> bool {
    RAW_TEXT_TAGS.contains(&name)
}

/// Locate the close tag of a raw-text element whose opening tag ends at
/// `from`. Returns the span start of `</name` and the position just past
/// its `>`. `None` when the close tag is missing.
fn raw_text_close(html: &str, from: usize, name: &str) -> Option<(usize, usize)> {
    let bytes = html.as_bytes();
    let mut i = from;
    while i + 2 + name.len() <= html.len() {
        if bytes[i] == b'<' && bytes[i + 1] == b'/' {
            // Compare on bytes: the candidate range may fall inside a
            // multibyte character, so it must not be sliced as a str.
            let candidate = &bytes[i + 2..i + 2 + name.len()];
            if candidate.eq_ignore_ascii_case(name.as_bytes()) {
                let end = match html[i..].find('>') {
                    Some(gt) => i + gt + 1,
                    None => html.len(),
                };
                return Some((i, end));
            }
        }
        i += 1;
    }
    None
}

/// Position just past a raw-text element's close tag, for scan resumption.
fn skip_raw_text(html: &str, from: usize, name: &str) -> usize {
    raw_text_close(html, from, name)
        .map(|(_, end)| end)
        .unwrap_or(html.len())
}

/// Build a balanced element from an opening tag, counting depth across all
/// nested tags. Unclosed elements claim the rest of the input rather than
/// failing, which matches how browsers recover.
fn element_from(html: &str, open: &Tag) -> Element {
    let attrs = parse_attrs(&html[open.attrs_span.clone()]);
    if open.self_closing || is_void(&open.name) {
        return Element {
            tag: open.name.clone(),
            attrs,
            span: open.span.clone(),
            inner: open.span.end..open.span.end,
        };
    }
    if is_raw_text(&open.name) {
        let (inner_end, end) = raw_text_close(html, open.span.end, &open.name)
            .unwrap_or((html.len(), html.len()));
        return Element {
            tag: open.name.clone(),
            attrs,
            span: open.span.start..end,
            inner: open.span.end..inner_end,
        };
    }
    let mut depth = 1usize;
    let mut pos = open.span.end;
    while let Some(t) = next_tag(html, pos) {
        pos = t.span.end;
        if t.closing {
            depth -= 1;
            if depth == 0 {
                return Element {
                    tag: open.name.clone(),
                    attrs,
                    span: open.span.start..t.span.end,
                    inner: open.span.end..t.span.start,
                };
            }
        } else if is_raw_text(&t.name) {
            pos = skip_raw_text(html, t.span.end, &t.name);
        } else if !(t.self_closing || is_void(&t.name)) {
            depth += 1;
        }
    }
    Element {
        tag: open.name.clone(),
        attrs,
        span: open.span.start..html.len(),
        inner: open.span.end..html.len(),
    }
}

fn locator_matches(locator: Locator<'_>, tag: &str, attrs: &[(String, String)]) -> bool {
    let attr = |name: &str| {
        attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    };
    match locator {
        Locator::Tag(name) => tag.eq_ignore_ascii_case(name),
        Locator::Id(id) => attr("id") == Some(id),
        Locator::Class(class) => attr("class")
            .map(|c| c.split_whitespace().any(|t| t == class))
            .unwrap_or(false),
        Locator::Attr(name, value) => attr(name) == Some(value),
    }
}

/// First element matching `locator` anywhere in `html`.
pub fn find_first(html: &str, locator: &Locator<'_>) -> Option<Element> {
    find_first_in(html, 0..html.len(), locator)
}

/// First element whose opening tag starts inside `range`.
pub fn find_first_in(html: &str, range: Range<usize>, locator: &Locator<'_>) -> Option<Element> {
    let mut pos = range.start;
    while let Some(t) = next_tag(html, pos) {
        if t.span.start >= range.end {
            return None;
        }
        pos = t.span.end;
        if t.closing {
            continue;
        }
        let attrs = parse_attrs(&html[t.attrs_span.clone()]);
        if locator_matches(*locator, &t.name, &attrs) {
            return Some(element_from(html, &t));
        }
        // Skip raw-text content only after the element itself had its
        // chance to match, so script/style remain locatable.
        if is_raw_text(&t.name) {
            pos = skip_raw_text(html, t.span.end, &t.name);
        }
    }
    None
}

/// All non-overlapping elements matching `locator` whose opening tags start
/// inside `range`. Scanning resumes after each match, so nested matches
/// inside an already-matched element are not reported twice.
pub fn find_all_in(html: &str, range: Range<usize>, locator: &Locator<'_>) -> Vec<Element> {
    let mut found = Vec::new();
    let mut pos = range.start;
    while let Some(el) = find_first_in(html, pos..range.end, locator) {
        pos = el.span.end.max(pos + 1);
        found.push(el);
    }
    found
}

/// Whether the input carries a document wrapper (`<html>` or `<body>`),
/// as opposed to being a bare fragment.
pub fn is_document(html: &str) -> bool {
    let mut pos = 0;
    while let Some(t) = next_tag(html, pos) {
        if !t.closing && (t.name == "html" || t.name == "body") {
            return true;
        }
        pos = t.span.end;
    }
    false
}

/// Inner span of the `<body>` element, when present.
pub fn body_range(html: &str) -> Option<Range<usize>> {
    find_first(html, &Locator::Tag("body")).map(|el| el.inner)
}

/// Wrap a bare fragment in a synthetic root so container location works the
/// same way on all response shapes.
pub fn wrap_fragment(html: &str) -> String {
    format!("<div id=\"synthetic-root\">{}</div>", html)
}
