//! Small, forgiving helpers for the RSS and HTML published by wtp.waw.pl.
//!
//! The pages are generated by a single CMS with a stable layout, so tag
//! matching by regex and depth counting is enough; nothing here tries to be a
//! general HTML parser.

use std::borrow::Cow;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::{LazyLock, Mutex, PoisonError};

use regex::Regex;

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<.*?>").unwrap());
static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").unwrap());
static CDATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*<!\[CDATA\[(.*)\]\]>\s*$").unwrap());
static IMG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<img\b[^>]*>").unwrap());
static HR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<hr\s*/?>").unwrap());
static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</p>|<br\s*/?>").unwrap());

/// Patterns built from tag and attribute names, compiled once each.
static COMPILED: LazyLock<Mutex<HashMap<String, Regex>>> = LazyLock::new(Default::default);

fn compiled(pattern: String) -> Option<Regex> {
    let mut cache = COMPILED.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(re) = cache.get(&pattern) {
        return Some(re.clone());
    }
    let re = Regex::new(&pattern).ok()?;
    cache.insert(pattern, re.clone());
    Some(re)
}

/// Decodes numeric and the common named character references.
///
/// Unknown named references are left untouched.
pub fn unescape(text: &str) -> Cow<'_, str> {
    ENTITY.replace_all(text, |caps: &regex::Captures| {
        let name = &caps[1];
        let decoded = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
            u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
        } else if let Some(dec) = name.strip_prefix('#') {
            dec.parse().ok().and_then(char::from_u32)
        } else {
            match name {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                "ndash" => Some('\u{2013}'),
                "mdash" => Some('\u{2014}'),
                _ => None,
            }
        };
        decoded.map_or_else(|| caps[0].to_string(), String::from)
    })
}

/// Removes every tag, keeping the text between them.
pub fn strip_tags(html: &str) -> Cow<'_, str> {
    TAG.replace_all(html, "")
}

/// Unwraps a `<![CDATA[...]]>` section, or decodes entities otherwise.
pub fn text_content(raw: &str) -> String {
    match CDATA.captures(raw) {
        Some(caps) => caps[1].trim().to_string(),
        None => unescape(raw.trim()).into_owned(),
    }
}

/// Content of the first `<tag>` child, as text.
pub fn child_text(xml: &str, tag: &str) -> Option<String> {
    let tag = regex::escape(tag);
    let open = compiled(format!(r"(?s)<{tag}(?:\s[^>]*)?>(.*?)</{tag}>"))?;
    open.captures(xml).map(|caps| text_content(&caps[1]))
}

/// Whether the opening tag `open` carries `class` among its classes.
fn has_class(open: &str, class: &str) -> bool {
    static CLASS_ATTR: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#"(?i)\bclass\s*=\s*["']([^"']*)["']"#).unwrap());
    CLASS_ATTR
        .captures(open)
        .is_some_and(|caps| caps[1].split_whitespace().any(|c| c == class))
}

fn attribute<'a>(open: &'a str, name: &str) -> Option<&'a str> {
    let name = regex::escape(name);
    let re = compiled(format!(r#"(?i)\b{name}\s*=\s*["']([^"']*)["']"#))?;
    re.captures(open).and_then(|caps| caps.get(1)).map(|m| m.as_str())
}

/// Byte range of the first `<tag class="... class ...">...</tag>` element,
/// including its own tags. Nested elements of the same name are balanced.
pub fn element_range(html: &str, tag: &str, class: &str) -> Option<Range<usize>> {
    let tags = compiled(format!(r"(?is)<(/?){}\b[^>]*>", regex::escape(tag)))?;

    let start = tags
        .find_iter(html)
        .find(|m| !m.as_str().starts_with("</") && has_class(m.as_str(), class))?;
    if start.as_str().ends_with("/>") {
        return Some(start.range());
    }

    let mut depth = 0usize;
    for m in tags.find_iter(&html[start.start()..]) {
        if m.as_str().starts_with("</") {
            depth -= 1;
            if depth == 0 {
                return Some(start.start()..start.start() + m.end());
            }
        } else if !m.as_str().ends_with("/>") {
            depth += 1;
        }
    }

    // Unclosed element: take the rest of the document.
    Some(start.start()..html.len())
}

/// The first element of `tag` with `class`, as raw HTML.
pub fn element_by_class<'a>(html: &'a str, tag: &str, class: &str) -> Option<&'a str> {
    element_range(html, tag, class).map(|range| &html[range])
}

/// Removes every element of `tag` with `class`.
pub fn remove_elements(html: &str, tag: &str, class: &str) -> String {
    let mut html = html.to_string();
    while let Some(range) = element_range(&html, tag, class) {
        html.replace_range(range, "");
    }
    html
}

/// `alt` texts of every `<img>` carrying `class`.
pub fn image_alts(html: &str, class: &str) -> Vec<String> {
    IMG.find_iter(html)
        .filter(|m| has_class(m.as_str(), class))
        .filter_map(|m| attribute(m.as_str(), "alt"))
        .map(|alt| unescape(alt).trim().to_lowercase())
        .collect()
}

/// Drops everything from the last `<hr>` onwards.
pub fn cut_at_last_hr(html: &str) -> &str {
    match HR.find_iter(html).last() {
        Some(hr) => &html[..hr.start()],
        None => html,
    }
}

/// Plain text rendering: paragraphs and line breaks become newlines.
pub fn to_plain_text(html: &str) -> String {
    let broken = LINE_BREAK.replace_all(html, "\n");
    let stripped = strip_tags(&broken);
    unescape(&stripped)
        .replace('\u{a0}', " ")
        .replace("  ", " ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns_compiled_once() {
        let pattern = r"(?s)<guid(?:\s[^>]*)?>(.*?)</guid>".to_string();
        let xml = "<item><guid>https://wtp/?p=1</guid></item>";

        assert_eq!(child_text(xml, "guid").as_deref(), Some("https://wtp/?p=1"));
        let first = compiled(pattern.clone()).unwrap();
        assert!(COMPILED.lock().unwrap().contains_key(&pattern));
        assert_eq!(compiled(pattern).unwrap().as_str(), first.as_str());
        assert_eq!(child_text(xml, "guid").as_deref(), Some("https://wtp/?p=1"));
    }

    #[test]
    fn test_tag_names_are_literal() {
        assert_eq!(child_text("<axb>no</axb><a.b>yes</a.b>", "a.b").as_deref(), Some("yes"));
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("A &amp; B &#8211; C &#x41; &unknown;"), "A & B \u{2013} C A &unknown;");
        assert!(matches!(unescape("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_text_content() {
        assert_eq!(text_content(" <![CDATA[ <b>bold</b> ]]> "), "<b>bold</b>");
        assert_eq!(text_content("Zmiany &amp; utrudnienia"), "Zmiany & utrudnienia");
    }

    #[test]
    fn test_child_text() {
        let xml = r#"<item><title>T</title><guid isPermaLink="false">https://x/?p=12</guid></item>"#;
        assert_eq!(child_text(xml, "title").as_deref(), Some("T"));
        assert_eq!(child_text(xml, "guid").as_deref(), Some("https://x/?p=12"));
        assert_eq!(child_text(xml, "link"), None);
    }

    #[test]
    fn test_element_by_class_balances_nesting() {
        let html = r#"<div class="a"><div class="impediment-content big"><div>x</div>y</div>z</div>"#;
        assert_eq!(
            element_by_class(html, "div", "impediment-content"),
            Some(r#"<div class="impediment-content big"><div>x</div>y</div>"#)
        );
        assert_eq!(element_by_class(html, "main", "page-main"), None);
    }

    #[test]
    fn test_remove_elements() {
        let html = r#"<main><p>keep</p><div class="is-style-small">drop</div><div class="is-style-small"><div>2</div></div></main>"#;
        assert_eq!(remove_elements(html, "div", "is-style-small"), "<main><p>keep</p></main>");
    }

    #[test]
    fn test_image_alts() {
        let html = r#"<img src="a.svg" class="impediment-category-icon" alt="Tramwaje">
            <img class="other" alt="metro"><img alt="autobusy" class="impediment-category-icon"/>"#;
        assert_eq!(image_alts(html, "impediment-category-icon"), vec!["tramwaje", "autobusy"]);
    }

    #[test]
    fn test_cut_and_plain_text() {
        let html = "<p>Line&nbsp;one</p><p>Two<br/>three</p><hr><p>x</p><hr /><p>footer</p>";
        let cut = cut_at_last_hr(html);
        assert_eq!(cut, "<p>Line&nbsp;one</p><p>Two<br/>three</p><hr><p>x</p>");
        assert_eq!(to_plain_text(cut), "Line one\nTwo\nthree\nx");
    }
}
