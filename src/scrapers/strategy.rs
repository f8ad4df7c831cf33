//! Ordered selector strategies for pulling single fields out of HTML.
//!
//! Each field of a scraped page gets its own [`FieldChain`]: a primary
//! selector followed by fallbacks, tried in order until one yields a
//! non-empty value. Adding a fallback for one field never touches another.

use scraper::{ElementRef, Html, Node, Selector};
use tracing::{trace, warn};

/// One way of locating a field in a parsed document.
pub trait FieldExtractor: Send + Sync {
    type Output;

    /// `None` when this strategy finds nothing usable.
    fn try_extract(&self, doc: &Html) -> Option<Self::Output>;
}

fn parse_selector(css: &'static str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(sel) => Some(sel),
        Err(e) => {
            warn!(css, error = %e, "Invalid selector; strategy disabled");
            None
        }
    }
}

/// Collapse whitespace runs into single spaces and trim.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "p" | "div"
            | "br"
            | "li"
            | "ul"
            | "ol"
            | "pre"
            | "blockquote"
            | "section"
            | "article"
            | "table"
            | "tr"
            | "td"
            | "th"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
    )
}

/// Visible text of an element, whitespace collapsed.
///
/// Text nodes are concatenated as-is, so inline markup inside a word
/// (`Hel<b>lo</b>`, `中<em>文</em>`) does not split it. Block-level
/// elements are separated by a space. `script`/`style`/`noscript`
/// subtrees are skipped.
pub fn visible_text(element: ElementRef<'_>) -> String {
    fn walk(element: ElementRef<'_>, out: &mut String) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => out.push_str(text),
                Node::Element(el) if matches!(el.name(), "script" | "style" | "noscript") => {}
                Node::Element(el) => {
                    let block = is_block(el.name());
                    if block {
                        out.push(' ');
                    }
                    if let Some(child) = ElementRef::wrap(child) {
                        walk(child, out);
                    }
                    if block {
                        out.push(' ');
                    }
                }
                _ => {}
            }
        }
    }

    let mut out = String::new();
    walk(element, &mut out);
    normalize_whitespace(&out)
}

/// Text and markup of one matched element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementContent {
    pub text: String,
    pub html: String,
}

/// Visible text and inner HTML of the first matching element with
/// non-empty text. Both come from the same element.
pub struct SelectorContent {
    css: &'static str,
    selector: Option<Selector>,
}

impl SelectorContent {
    pub fn new(css: &'static str) -> Self {
        Self {
            css,
            selector: parse_selector(css),
        }
    }
}

impl FieldExtractor for SelectorContent {
    type Output = ElementContent;

    fn try_extract(&self, doc: &Html) -> Option<ElementContent> {
        let selector = self.selector.as_ref()?;
        let found = doc.select(selector).find_map(|el| {
            let text = visible_text(el);
            (!text.is_empty()).then(|| ElementContent {
                text,
                html: el.inner_html().trim().to_string(),
            })
        });
        trace!(css = self.css, hit = found.is_some(), "SelectorContent");
        found
    }
}

/// Text of the first matching element with non-empty text.
pub struct SelectorText {
    css: &'static str,
    selector: Option<Selector>,
}

impl SelectorText {
    pub fn new(css: &'static str) -> Self {
        Self {
            css,
            selector: parse_selector(css),
        }
    }
}

impl FieldExtractor for SelectorText {
    type Output = String;

    fn try_extract(&self, doc: &Html) -> Option<String> {
        let selector = self.selector.as_ref()?;
        let found = doc
            .select(selector)
            .map(visible_text)
            .find(|text| !text.is_empty());
        trace!(css = self.css, hit = found.is_some(), "SelectorText");
        found
    }
}

/// An attribute of the first matching element, e.g. `meta[name=author]@content`.
pub struct SelectorAttr {
    selector: Option<Selector>,
    attr: &'static str,
}

impl SelectorAttr {
    pub fn new(css: &'static str, attr: &'static str) -> Self {
        Self {
            selector: parse_selector(css),
            attr,
        }
    }
}

impl FieldExtractor for SelectorAttr {
    type Output = String;

    fn try_extract(&self, doc: &Html) -> Option<String> {
        let selector = self.selector.as_ref()?;
        doc.select(selector)
            .filter_map(|el| el.value().attr(self.attr))
            .map(normalize_whitespace)
            .find(|value| !value.is_empty())
    }
}

/// Text of every matching element, empties dropped.
pub struct SelectorTextList {
    selector: Option<Selector>,
}

impl SelectorTextList {
    pub fn new(css: &'static str) -> Self {
        Self {
            selector: parse_selector(css),
        }
    }
}

impl FieldExtractor for SelectorTextList {
    type Output = Vec<String>;

    fn try_extract(&self, doc: &Html) -> Option<Vec<String>> {
        let selector = self.selector.as_ref()?;
        let values: Vec<String> = doc
            .select(selector)
            .map(visible_text)
            .filter(|text| !text.is_empty())
            .collect();
        (!values.is_empty()).then_some(values)
    }
}

/// An attribute holding a delimited list (`meta[name=keywords]@content`).
/// Splits on ASCII and full-width commas.
pub struct SelectorAttrList {
    inner: SelectorAttr,
}

impl SelectorAttrList {
    pub fn new(css: &'static str, attr: &'static str) -> Self {
        Self {
            inner: SelectorAttr::new(css, attr),
        }
    }
}

impl FieldExtractor for SelectorAttrList {
    type Output = Vec<String>;

    fn try_extract(&self, doc: &Html) -> Option<Vec<String>> {
        let raw = self.inner.try_extract(doc)?;
        let values: Vec<String> = raw
            .split([',', '，'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        (!values.is_empty()).then_some(values)
    }
}

/// Strategies for one field, tried in order.
pub struct FieldChain<T> {
    field: &'static str,
    strategies: Vec<Box<dyn FieldExtractor<Output = T>>>,
}

impl<T> FieldChain<T> {
    pub fn new(field: &'static str) -> Self {
        Self {
            field,
            strategies: Vec::new(),
        }
    }

    pub fn then(mut self, strategy: impl FieldExtractor<Output = T> + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn extract(&self, doc: &Html) -> Option<T> {
        for (index, strategy) in self.strategies.iter().enumerate() {
            if let Some(value) = strategy.try_extract(doc) {
                if index > 0 {
                    trace!(field = self.field, strategy = index, "Primary selector missed; fallback matched");
                }
                return Some(value);
            }
        }
        trace!(field = self.field, "No strategy matched");
        None
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }
}
