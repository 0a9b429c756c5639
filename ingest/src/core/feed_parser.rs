//! Tolerant RSS/Atom extraction.
//!
//! Item boundaries are found with non-strict delimiter search and each field
//! is pulled out by its own extractor returning `Option<String>`. Nothing here
//! validates the document: a broken block only loses that block.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use crate::core::text::{clean_text, decode_entities, plain_text, strip_cdata};

pub const DESCRIPTION_MAX_CHARS: usize = 500;
pub const CONTENT_MAX_CHARS: usize = 2000;

/// One candidate article as found in the feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawFeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub content: String,
    pub pub_date: Option<String>,
    pub image_url: Option<String>,
}

fn block(tag: &str) -> Regex {
    Regex::new(&format!(r"(?is)<{0}(?:\s[^>]*)?>(.*?)</{0}>", regex::escape(tag)))
        .expect("block pattern")
}

/// Matches `<tag ...>text</tag>` or a self-closing `<tag .../>` (no capture).
fn element(tag: &str) -> Regex {
    Regex::new(&format!(
        r"(?is)<{0}(?:\s[^>]*?)?(?:/>|>(.*?)</{0}>)",
        regex::escape(tag)
    ))
    .expect("element pattern")
}

fn attribute(tag: &str, attr: &str) -> Regex {
    Regex::new(&format!(
        r#"(?is)<{0}\b[^>]*?\b{1}\s*=\s*["']([^"']+)["']"#,
        regex::escape(tag),
        regex::escape(attr)
    ))
    .expect("attribute pattern")
}

static ITEM_BLOCK: LazyLock<Regex> = LazyLock::new(|| block("item"));
static ENTRY_BLOCK: LazyLock<Regex> = LazyLock::new(|| block("entry"));

static TITLE: LazyLock<Regex> = LazyLock::new(|| element("title"));
static LINK: LazyLock<Regex> = LazyLock::new(|| element("link"));
static LINK_HREF: LazyLock<Regex> = LazyLock::new(|| attribute("link", "href"));
static DESCRIPTION: LazyLock<Regex> = LazyLock::new(|| element("description"));
static SUMMARY: LazyLock<Regex> = LazyLock::new(|| element("summary"));
static CONTENT_ENCODED: LazyLock<Regex> = LazyLock::new(|| element("content:encoded"));
static CONTENT: LazyLock<Regex> = LazyLock::new(|| element("content"));
static PUB_DATE: LazyLock<Regex> = LazyLock::new(|| element("pubDate"));
static PUBLISHED: LazyLock<Regex> = LazyLock::new(|| element("published"));
static UPDATED: LazyLock<Regex> = LazyLock::new(|| element("updated"));

static MEDIA_CONTENT: LazyLock<Regex> = LazyLock::new(|| attribute("media:content", "url"));
static MEDIA_THUMBNAIL: LazyLock<Regex> = LazyLock::new(|| attribute("media:thumbnail", "url"));
static ENCLOSURE_TYPE_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<enclosure\b[^>]*?\btype\s*=\s*["']image/[^"']*["'][^>]*?\burl\s*=\s*["']([^"']+)["']"#)
        .expect("enclosure pattern")
});
static ENCLOSURE_URL_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<enclosure\b[^>]*?\burl\s*=\s*["']([^"']+)["'][^>]*?\btype\s*=\s*["']image/"#)
        .expect("enclosure pattern")
});
static IMG_SRC: LazyLock<Regex> = LazyLock::new(|| attribute("img", "src"));

/// Parses raw feed text into candidate items. `<item>` blocks come first,
/// then `<entry>` blocks. Items without both a title and a link are dropped.
pub fn parse(xml: &str) -> Vec<RawFeedItem> {
    ITEM_BLOCK
        .captures_iter(xml)
        .chain(ENTRY_BLOCK.captures_iter(xml))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .filter_map(parse_block)
        .collect()
}

fn parse_block(block: &str) -> Option<RawFeedItem> {
    let title = extract_title(block)?;
    let link = extract_link(block)?;

    let raw_description = first_text(block, &[&*DESCRIPTION, &*SUMMARY]);
    let raw_content = first_text(block, &[&*CONTENT_ENCODED, &*CONTENT]);

    let description = raw_description
        .as_deref()
        .map(|d| clean_text(d, DESCRIPTION_MAX_CHARS))
        .unwrap_or_default();
    let content = raw_content
        .as_deref()
        .map(|c| clean_text(c, CONTENT_MAX_CHARS))
        .unwrap_or_default();

    let pub_date = first_text(block, &[&*PUB_DATE, &*PUBLISHED, &*UPDATED])
        .map(|d| strip_cdata(&d).trim().to_string())
        .filter(|d| !d.is_empty());

    let image_url = extract_image(block, raw_content.as_deref(), raw_description.as_deref());

    Some(RawFeedItem {
        title,
        link,
        description,
        content,
        pub_date,
        image_url,
    })
}

/// Inner text of the first pattern that matches with a non-self-closing tag.
fn first_text(block: &str, patterns: &[&Regex]) -> Option<String> {
    patterns.iter().find_map(|re| {
        re.captures(block)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    })
}

fn capture_attr(block: &str, re: &Regex) -> Option<String> {
    re.captures(block)
        .and_then(|caps| caps.get(1))
        .map(|m| decode_entities(m.as_str().trim()))
        .filter(|s| !s.is_empty())
}

fn extract_title(block: &str) -> Option<String> {
    first_text(block, &[&*TITLE])
        .map(|t| plain_text(&t))
        .filter(|t| !t.is_empty())
}

fn extract_link(block: &str) -> Option<String> {
    first_text(block, &[&*LINK])
        .map(|l| decode_entities(strip_cdata(&l).trim()))
        .filter(|l| !l.is_empty())
        .or_else(|| capture_attr(block, &LINK_HREF))
}

fn extract_image(block: &str, content: Option<&str>, description: Option<&str>) -> Option<String> {
    capture_attr(block, &MEDIA_CONTENT)
        .or_else(|| capture_attr(block, &MEDIA_THUMBNAIL))
        .or_else(|| capture_attr(block, &ENCLOSURE_TYPE_FIRST))
        .or_else(|| capture_attr(block, &ENCLOSURE_URL_FIRST))
        .or_else(|| {
            [content, description]
                .into_iter()
                .flatten()
                .map(|html| decode_entities(&strip_cdata(html)))
                .find_map(|html| capture_attr(&html, &IMG_SRC))
        })
}

/// Parses the feed date string: RFC 2822 (RSS), RFC 3339 (Atom), then a few
/// variants seen in the wild. Unparseable input gives `None`.
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%a, %d %b %Y %H:%M:%S %z", "%Y-%m-%d %H:%M:%S %z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}
