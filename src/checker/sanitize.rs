//! Content sanitation
//!
//! Fetched pages are reduced to an allowlist of formatting tags before they
//! are stored. Relative links are made absolute against the article URL, and
//! plain-text bodies are escaped into a `<pre>` block.

use scraper::{ElementRef, Html};
use url::Url;

/// Elements removed together with everything inside them
const DROPPED: &[&str] = &[
    "applet", "base", "embed", "form", "frame", "frameset", "head", "iframe", "link", "meta",
    "noscript", "object", "script", "style", "template", "title",
];

/// Elements kept (with filtered attributes); anything else is unwrapped
const ALLOWED: &[&str] = &[
    "a", "abbr", "article", "aside", "b", "blockquote", "br", "caption", "cite", "code", "dd",
    "del", "details", "div", "dl", "dt", "em", "figcaption", "figure", "footer", "h1", "h2", "h3",
    "h4", "h5", "h6", "header", "hr", "i", "img", "ins", "kbd", "li", "mark", "ol", "p", "picture",
    "pre", "q", "s", "section", "small", "source", "span", "strong", "sub", "summary", "sup",
    "table", "tbody", "td", "tfoot", "th", "thead", "time", "tr", "u", "ul",
];

const ALLOWED_ATTRS: &[&str] = &[
    "alt", "colspan", "datetime", "height", "href", "rowspan", "src", "title", "width",
];

const URL_ATTRS: &[&str] = &["href", "src"];

const SAFE_SCHEMES: &[&str] = &["http", "https", "mailto"];

const VOID: &[&str] = &["br", "hr", "img", "source"];

/// Elements whose boundaries separate words in extracted text
const BLOCK: &[&str] = &[
    "article", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption", "figure", "footer", "h1",
    "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "ol", "p", "pre", "section", "table", "td",
    "th", "tr", "ul",
];

/// Sanitizes a fetched body for storage
///
/// # Arguments
///
/// * `body` - Raw response body
/// * `base` - Article URL, used to absolutize `href`/`src`
/// * `content_type` - Response `Content-Type`, if any
pub fn sanitize_html(body: &str, base: &Url, content_type: Option<&str>) -> String {
    if is_plain_text(body, content_type) {
        return format!("<pre>{}</pre>", escape_text(body));
    }

    let fragment = Html::parse_fragment(body);
    let mut out = String::with_capacity(body.len());
    write_children(fragment.root_element(), base, &mut out);
    out.trim().to_string()
}

/// Plain text of an HTML fragment with whitespace collapsed
pub fn strip_markup(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut text = String::new();
    collect_text(fragment.root_element(), &mut text);
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Description for a sanitized page
///
/// Falls back to the raw body when the sanitized content has no text.
pub fn derive_description(sanitized: &str, raw: &str) -> String {
    let description = strip_markup(sanitized);
    if description.is_empty() {
        strip_markup(raw)
    } else {
        description
    }
}

fn is_plain_text(body: &str, content_type: Option<&str>) -> bool {
    let declared_plain = content_type
        .map(|value| value.trim().to_ascii_lowercase().starts_with("text/plain"))
        .unwrap_or(false);
    declared_plain || !body.contains('<')
}

fn write_children(parent: ElementRef<'_>, base: &Url, out: &mut String) {
    for child in parent.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(&escape_text(text));
        } else if let Some(element) = ElementRef::wrap(child) {
            write_element(element, base, out);
        }
    }
}

fn write_element(element: ElementRef<'_>, base: &Url, out: &mut String) {
    let name = element.value().name();
    if DROPPED.contains(&name) {
        return;
    }

    if !ALLOWED.contains(&name) {
        write_children(element, base, out);
        return;
    }

    out.push('<');
    out.push_str(name);
    for (attr, value) in element.value().attrs() {
        if let Some(value) = filter_attr(attr, value, base) {
            out.push(' ');
            out.push_str(attr);
            out.push_str("=\"");
            out.push_str(&escape_attr(&value));
            out.push('"');
        }
    }
    out.push('>');

    if VOID.contains(&name) {
        return;
    }

    write_children(element, base, out);
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

/// Returns the value to emit for an attribute, or `None` to drop it
fn filter_attr(name: &str, value: &str, base: &Url) -> Option<String> {
    if !ALLOWED_ATTRS.contains(&name) {
        return None;
    }
    if !URL_ATTRS.contains(&name) {
        return Some(value.to_string());
    }

    let resolved = base.join(value.trim()).ok()?;
    if SAFE_SCHEMES.contains(&resolved.scheme()) {
        Some(resolved.to_string())
    } else {
        None
    }
}

fn collect_text(parent: ElementRef<'_>, out: &mut String) {
    for child in parent.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
            continue;
        }
        let Some(element) = ElementRef::wrap(child) else {
            continue;
        };

        let name = element.value().name();
        if DROPPED.contains(&name) {
            continue;
        }
        let block = BLOCK.contains(&name);
        if block {
            out.push(' ');
        }
        collect_text(element, out);
        if block {
            out.push(' ');
        }
    }
}

fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}
