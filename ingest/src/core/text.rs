use regex::{Captures, Regex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").expect("entity pattern"));
/// Only `<` followed by a name, `/name` or `!` opens a tag, so `3 < 5 > 2` survives.
static TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(?:/?[a-zA-Z]|!)[^<>]*>").expect("tag pattern"));
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("space pattern"));
static SLUG_STRIP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_\s-]").expect("slug strip pattern"));
static HYPHENS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+").expect("hyphen pattern"));

const SLUG_MAX_CHARS: usize = 100;

/// Last suffix handed out by `generate_slug`, in milliseconds.
static LAST_SLUG_STAMP: AtomicU64 = AtomicU64::new(0);

/// Decodes the named entities feeds actually use plus decimal and hex
/// character references. Single pass, so `&amp;lt;` becomes `&lt;`.
pub fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }

    ENTITY
        .replace_all(input, |caps: &Captures| {
            let body = &caps[1];
            let decoded = if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match body {
                    "nbsp" => Some(' '),
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    _ => None,
                }
            };

            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

pub fn strip_cdata(input: &str) -> String {
    input.replace("<![CDATA[", "").replace("]]>", "")
}

pub fn strip_tags(input: &str) -> String {
    TAGS.replace_all(input, " ").into_owned()
}

pub fn collapse_whitespace(input: &str) -> String {
    SPACES.replace_all(input, " ").trim().to_string()
}

/// Char-boundary safe truncation.
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => input[..idx].to_string(),
        None => input.to_string(),
    }
}

/// Feed markup to plain text: CDATA off, literal tags stripped, entities
/// decoded, entity-encoded tags stripped, whitespace collapsed, then cut to
/// `max_chars`.
pub fn clean_text(input: &str, max_chars: usize) -> String {
    let literal = strip_tags(&strip_cdata(input));
    let plain = collapse_whitespace(&strip_tags(&decode_entities(&literal)));
    truncate_chars(&plain, max_chars)
}

/// Text-only fields such as titles: CDATA off, entities decoded, whitespace
/// collapsed. Angle brackets that come out of decoding are kept.
pub fn plain_text(input: &str) -> String {
    collapse_whitespace(&decode_entities(&strip_cdata(input)))
}

/// URL-safe slug with a base-36 millisecond suffix. The suffix is strictly
/// increasing within the process, so two calls never return the same slug.
pub fn generate_slug(title: &str) -> String {
    let base = slug_base(title);
    let suffix = to_base36(next_slug_stamp());

    if base.is_empty() {
        suffix
    } else {
        format!("{}-{}", base, suffix)
    }
}

fn slug_base(title: &str) -> String {
    let lowered = decode_entities(title).to_lowercase();
    let stripped = SLUG_STRIP.replace_all(&lowered, "");
    let hyphenated = SPACES.replace_all(stripped.trim(), "-");
    let collapsed = HYPHENS.replace_all(&hyphenated, "-");
    let trimmed = collapsed.trim_matches('-');
    truncate_chars(trimmed, SLUG_MAX_CHARS).trim_end_matches('-').to_string()
}

fn next_slug_stamp() -> u64 {
    let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let mut last = LAST_SLUG_STAMP.load(Ordering::Relaxed);
    loop {
        let next = if now > last { now } else { last + 1 };
        match LAST_SLUG_STAMP.compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(current) => last = current,
        }
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_named_and_numeric_entities() {
        assert_eq!(
            decode_entities("Tom &amp; Jerry &lt;3 &quot;hi&quot; it&#39;s it&#x27;s&nbsp;ok"),
            "Tom & Jerry <3 \"hi\" it's it's ok"
        );
        assert_eq!(decode_entities("&#8212; &#x2014;"), "\u{2014} \u{2014}");
    }

    #[test]
    fn decoding_is_single_pass() {
        assert_eq!(decode_entities("&amp;lt;b&amp;gt;"), "&lt;b&gt;");
    }

    #[test]
    fn unknown_entities_are_left_alone() {
        assert_eq!(decode_entities("a &bogus; b &#xZZ;"), "a &bogus; b &#xZZ;");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("привіт світ", 6), "привіт");
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[test]
    fn clean_text_strips_markup() {
        let raw = "<![CDATA[<p>Hello&nbsp;<b>world</b></p>\n\n<p>again</p>]]>";
        assert_eq!(clean_text(raw, 500), "Hello world again");
        assert_eq!(clean_text("&lt;p&gt;Encoded&lt;/p&gt;", 500), "Encoded");
    }

    #[test]
    fn clean_text_keeps_comparison_operators() {
        assert_eq!(clean_text("Rates: 3 &lt; 5 and 8 &gt; 2", 500), "Rates: 3 < 5 and 8 > 2");
        assert_eq!(clean_text("<p>if a < b</p>", 500), "if a < b");
    }

    #[test]
    fn plain_text_keeps_decoded_brackets() {
        assert_eq!(plain_text("<![CDATA[ &lt;BREAKING&gt;  news ]]>"), "<BREAKING> news");
    }

    #[test]
    fn slug_starts_with_normalized_title() {
        let slug = generate_slug("Hello, World!");
        assert!(slug.starts_with("hello-world-"), "{}", slug);
        let suffix = &slug["hello-world-".len()..];
        assert!(!suffix.is_empty());
        assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn slugs_are_unique_for_identical_titles() {
        let a = generate_slug("Hello, World!");
        let b = generate_slug("Hello, World!");
        assert_ne!(a, b);
    }

    #[test]
    fn slug_collapses_separators_and_keeps_ascii_only() {
        let slug = generate_slug("  Київ --  News &amp; Events 2025  ");
        assert!(slug.starts_with("news-events-2025-"), "{}", slug);
        assert!(slug.is_ascii());
    }

    #[test]
    fn non_latin_title_falls_back_to_suffix_only() {
        let slug = generate_slug("Київ новини події");
        assert!(!slug.is_empty());
        assert!(slug.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()), "{}", slug);
    }

    #[test]
    fn slug_base_is_capped() {
        let title = "word ".repeat(60);
        let base = slug_base(&title);
        assert!(base.chars().count() <= SLUG_MAX_CHARS);
        assert!(!base.ends_with('-'));
    }

    #[test]
    fn base36_encoding() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }
}
