//! CSDN blog article extractor.
//!
//! CSDN publishes no API, so articles are scraped from the rendered page.
//! The markup drifts over time, so every field is read through a
//! [`FieldChain`] of selectors (primary first, then fallbacks) and degrades
//! to a default on its own. The only hard failure is a page where neither
//! the title nor the body can be found.
//!
//! # URL Pattern
//!
//! Articles live at `https://blog.csdn.net/<user>/article/details/<id>`;
//! some users have their own `<user>.blog.csdn.net` subdomain.

use crate::error::ParseError;
use crate::models::{ExtractedArticle, RawDocument};
use crate::scrapers::strategy::{
    ElementContent, FieldChain, SelectorAttr, SelectorAttrList, SelectorContent, SelectorText,
    SelectorTextList,
};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use tracing::{debug, instrument, warn};

/// Tags used when the page carries none.
pub const FALLBACK_TAGS: [&str; 2] = ["CSDN", "技术"];
pub const DEFAULT_TITLE: &str = "无标题";
pub const DEFAULT_AUTHOR: &str = "未知作者";

/// Publish times on CSDN pages are Beijing time.
const CSDN_UTC_OFFSET_SECS: i32 = 8 * 3600;

static DATETIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4})-(\d{1,2})-(\d{1,2})(?:[ T]+(\d{1,2}):(\d{2})(?::(\d{2}))?)?")
        .expect("static regex")
});

/// True for `csdn.net` and any of its subdomains.
pub fn is_csdn_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host == "csdn.net" || host.ends_with(".csdn.net")
}

/// Parse an engagement counter by keeping only its digits. Anything
/// unparsable is 0.
pub fn parse_counter(text: &str) -> u64 {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

/// Parse a publish time as RFC 3339, or as the first
/// `YYYY-MM-DD[ HH:MM[:SS]]` found in the text (read as UTC+8).
pub fn parse_publish_time(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text.trim()) {
        return Some(dt.with_timezone(&Utc));
    }

    let caps = DATETIME_RE.captures(text)?;
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let date = NaiveDate::from_ymd_opt(num(1)? as i32, num(2)?, num(3)?)?;
    let naive: NaiveDateTime = date.and_hms_opt(num(4).unwrap_or(0), num(5).unwrap_or(0), num(6).unwrap_or(0))?;
    let offset = FixedOffset::east_opt(CSDN_UTC_OFFSET_SECS)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Selector chains for every field of a CSDN article page.
///
/// Build once and reuse; parsing the selectors is the expensive part.
pub struct CsdnExtractor {
    title: FieldChain<String>,
    body: FieldChain<ElementContent>,
    author: FieldChain<String>,
    published: FieldChain<String>,
    tags: FieldChain<Vec<String>>,
    views: FieldChain<String>,
    likes: FieldChain<String>,
    collections: FieldChain<String>,
}

impl Default for CsdnExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl CsdnExtractor {
    pub fn new() -> Self {
        Self {
            title: FieldChain::new("title")
                .then(SelectorText::new("h1.title-article"))
                .then(SelectorText::new("#articleContentId"))
                .then(SelectorText::new(".article-title-box h1"))
                .then(SelectorAttr::new(r#"meta[property="og:title"]"#, "content")),
            body: FieldChain::new("body")
                .then(SelectorContent::new("#article_content"))
                .then(SelectorContent::new("#content_views"))
                .then(SelectorContent::new(".blog-content-box article"))
                .then(SelectorContent::new("article")),
            author: FieldChain::new("author")
                .then(SelectorText::new(".follow-nickName"))
                .then(SelectorText::new(".user-name"))
                .then(SelectorText::new(".profile-name"))
                .then(SelectorAttr::new(r#"meta[name="author"]"#, "content")),
            published: FieldChain::new("published")
                .then(SelectorText::new(".time"))
                .then(SelectorText::new(".date-box"))
                .then(SelectorAttr::new(r#"meta[property="article:published_time"]"#, "content")),
            tags: FieldChain::new("tags")
                .then(SelectorTextList::new(".tag-link"))
                .then(SelectorTextList::new(".blog-tags-box a"))
                .then(SelectorAttrList::new(r#"meta[name="keywords"]"#, "content")),
            views: FieldChain::new("views")
                .then(SelectorText::new(".read-count"))
                .then(SelectorText::new(".article-read-count")),
            likes: FieldChain::new("likes")
                .then(SelectorText::new(".tool-item-vote .count"))
                .then(SelectorText::new("#spanCount")),
            collections: FieldChain::new("collections")
                .then(SelectorText::new(".tool-item-collect .count"))
                .then(SelectorText::new(".get-collection")),
        }
    }

    /// Parse a fetched CSDN page into an [`ExtractedArticle`].
    ///
    /// # Errors
    ///
    /// [`ParseError::NoContentFound`] when no strategy locates either the
    /// title or the body. Every other field falls back to its default.
    #[instrument(level = "debug", skip_all, fields(url = %doc.url))]
    pub fn extract(&self, doc: &RawDocument) -> Result<ExtractedArticle, ParseError> {
        let html = Html::parse_document(&doc.body);

        let title = self.title.extract(&html);
        let body = self.body.extract(&html);
        if title.is_none() && body.is_none() {
            warn!("Neither title nor body found");
            return Err(ParseError::NoContentFound {
                url: doc.url.clone(),
            });
        }

        let tags: Vec<String> = self
            .tags
            .extract(&html)
            .map(|tags| tags.into_iter().unique().collect())
            .unwrap_or_else(|| FALLBACK_TAGS.iter().map(|t| t.to_string()).collect());

        let published_at = self
            .published
            .extract(&html)
            .and_then(|text| parse_publish_time(&text));

        let counter = |chain: &FieldChain<String>| {
            chain.extract(&html).map(|t| parse_counter(&t)).unwrap_or(0)
        };

        let (body_text, content_html) = body
            .map(|content| (content.text, content.html))
            .unwrap_or_default();
        let article = ExtractedArticle {
            title: title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            author: self
                .author
                .extract(&html)
                .unwrap_or_else(|| DEFAULT_AUTHOR.to_string()),
            published_at,
            tags,
            body_text,
            content_html,
            view_count: counter(&self.views),
            like_count: counter(&self.likes),
            collection_count: counter(&self.collections),
            source_url: doc.url.clone(),
        };

        debug!(
            title = %article.title,
            chars = article.body_text.chars().count(),
            tags = article.tags.len(),
            "Parsed CSDN article"
        );
        Ok(article)
    }
}
