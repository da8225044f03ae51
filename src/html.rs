//! Minimal HTML text extraction.
//!
//! Search result pages, technique pages and article heads are scraped with
//! targeted regexes rather than a DOM. These helpers turn an HTML fragment
//! into plain text and pull `<title>` and `<meta>` values.

use std::sync::OnceLock;

use regex::Regex;

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"))
}

fn title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title regex"))
}

fn meta_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<meta\s[^>]*>").expect("valid meta regex"))
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)([a-z:_-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid attr regex")
    })
}

fn entity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").expect("valid entity regex"))
}

fn named_entity(name: &str) -> Option<char> {
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "hellip" => '\u{2026}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201C}',
        "rdquo" => '\u{201D}',
        "copy" => '\u{A9}',
        _ => return None,
    })
}

fn numeric_entity(body: &str) -> Option<char> {
    let code = match body.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => body.parse().ok()?,
    };
    match char::from_u32(code)? {
        '\0' => None,
        '\u{A0}' => Some(' '),
        c => Some(c),
    }
}

/// Decode named entities common in titles and snippets, plus decimal
/// (`&#8211;`) and hex (`&#x2F;`) character references. Single pass, so
/// `&amp;lt;` becomes `&lt;`. Unknown or invalid references are kept.
pub fn decode_entities(s: &str) -> String {
    entity_re()
        .replace_all(s, |c: &regex::Captures| {
            let body = &c[1];
            let decoded = match body.strip_prefix('#') {
                Some(num) => numeric_entity(num),
                None => named_entity(body),
            };
            decoded.map_or_else(|| c[0].to_string(), String::from)
        })
        .into_owned()
}

/// Tags removed, entities decoded, whitespace collapsed.
pub fn text_of(fragment: &str) -> String {
    let stripped = tag_re().replace_all(fragment, " ");
    decode_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Attributes of a single tag, names lower-cased.
pub fn attributes(tag: &str) -> Vec<(String, String)> {
    attr_re()
        .captures_iter(tag)
        .map(|c| {
            let value = c.get(2).or_else(|| c.get(3)).map(|m| m.as_str()).unwrap_or("");
            (c[1].to_ascii_lowercase(), decode_entities(value))
        })
        .collect()
}

pub fn attribute(tag: &str, name: &str) -> Option<String> {
    attributes(tag)
        .into_iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v)
}

/// Text of the document `<title>`.
pub fn page_title(html: &str) -> Option<String> {
    let t = text_of(title_re().captures(html)?.get(1)?.as_str());
    (!t.is_empty()).then_some(t)
}

/// `content` of the first `<meta>` whose `name` or `property` equals `key`.
pub fn meta_content(html: &str, key: &str) -> Option<String> {
    meta_re().find_iter(html).find_map(|m| {
        let attrs = attributes(m.as_str());
        let matches = attrs
            .iter()
            .any(|(k, v)| (k == "name" || k == "property") && v.eq_ignore_ascii_case(key));
        if !matches {
            return None;
        }
        attrs
            .into_iter()
            .find(|(k, _)| k == "content")
            .map(|(_, v)| v.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|v| !v.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_strips_tags_and_entities() {
        assert_eq!(
            text_of("<b>DCSync</b> &amp; DCShadow:\n  <i>detection</i>&nbsp;notes"),
            "DCSync & DCShadow: detection notes"
        );
        assert_eq!(decode_entities("&amp;lt;"), "&lt;");
    }

    #[test]
    fn numeric_references_decode() {
        assert_eq!(decode_entities("Mimikatz DCSync &#8211; Blog"), "Mimikatz DCSync \u{2013} Blog");
        assert_eq!(decode_entities("It&#39;s &#x27;quoted&#X27;"), "It's 'quoted'");
        assert_eq!(decode_entities("a&#x2F;b&#47;c"), "a/b/c");
        assert_eq!(decode_entities("x&#160;y"), "x y");
        // Out of range, surrogate and NUL references stay as written.
        assert_eq!(decode_entities("&#1114112; &#xD800; &#0;"), "&#1114112; &#xD800; &#0;");
        assert_eq!(decode_entities("&bogus; & done"), "&bogus; & done");
    }

    #[test]
    fn title_and_meta() {
        let html = r#"<html><head>
            <title> Mimikatz DCSync &#8211; Blog </title>
            <meta property="og:title" content="Mimikatz DCSync">
            <meta content='How attackers replicate secrets.' name="description" />
        </head></html>"#;
        assert_eq!(page_title(html).as_deref(), Some("Mimikatz DCSync \u{2013} Blog"));
        assert_eq!(meta_content(html, "og:title").as_deref(), Some("Mimikatz DCSync"));
        assert_eq!(
            meta_content(html, "description").as_deref(),
            Some("How attackers replicate secrets.")
        );
        assert_eq!(meta_content(html, "og:description"), None);
    }

    #[test]
    fn attribute_lookup() {
        let tag = r#"<a class="result__a" href="//duckduckgo.com/l/?uddg=x&amp;rut=y">"#;
        assert_eq!(attribute(tag, "class").as_deref(), Some("result__a"));
        assert_eq!(attribute(tag, "href").as_deref(), Some("//duckduckgo.com/l/?uddg=x&rut=y"));
    }
}
