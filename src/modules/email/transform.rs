// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use regex::Regex;
use std::sync::LazyLock;

// Rich-text editors mark formatting with internal classes; mail clients strip
// <style> blocks and unknown classes, so everything must become inline CSS.
// This is a heuristic, ordered text transform over editor-shaped HTML, not an
// HTML parser.

static ALIGN_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"class="([^"]*)ql-align-(center|right|justify)([^"]*)""#).unwrap()
});

static FONT_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"class="([^"]*)ql-font-(serif|monospace)([^"]*)""#).unwrap());

static SIZE_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"class="([^"]*)ql-size-(small|large|huge)([^"]*)""#).unwrap());

static CLASS_ATTR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"\s*class="([^"]*)""#).unwrap());

static PARAGRAPH_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<p(\s[^>]*)?>").unwrap());

static STYLE_ATTR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"style="([^"]*)""#).unwrap());

static EMPTY_PARAGRAPH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<p[^>]*>\s*<br\s*/?>\s*</p>").unwrap());

static LIST_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<(ul|ol)(\s[^>]*)?>").unwrap());

static LIST_ITEM_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<li(\s[^>]*)?>").unwrap());

static HEADER_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<h([1-3])(\s[^>]*)?>").unwrap());

const PARAGRAPH_STYLE: &str = "margin: 0 0 10px 0; padding: 0; line-height: 1.4;";
const SPACER_PARAGRAPH: &str =
    r#"<p style="margin: 0; padding: 0; line-height: 11pt; height: 11pt;">&nbsp;</p>"#;
const LIST_STYLE: &str = "margin: 0 0 10px 0; padding-left: 24px;";
const LIST_ITEM_STYLE: &str = "margin: 0 0 4px 0; line-height: 1.4;";
const WRAPPER_STYLE: &str =
    "font-family: Calibri, Arial, sans-serif; font-size: 11pt; color: #000000;";

/// Rewrites editor HTML into an email-client-safe, self-contained fragment
/// and appends the open-tracking pixel. Each step consumes the output of the
/// previous one; malformed input passes through best-effort.
pub fn render_email_html(raw_html: &str, pixel_url: &str) -> String {
    let html = inline_alignment(raw_html);
    let html = inline_fonts(&html);
    let html = inline_sizes(&html);
    let html = strip_editor_classes(&html);
    let html = normalize_paragraphs(&html);
    let html = collapse_empty_paragraphs(&html);
    let html = style_lists_and_headers(&html);
    let html = wrap_fragment(&html);
    append_tracking_pixel(&html, pixel_url)
}

fn inline_alignment(html: &str) -> String {
    ALIGN_CLASS
        .replace_all(html, |caps: &regex::Captures| {
            let align = &caps[2];
            rewrite_marker_class(&caps[1], &caps[3], &format!("text-align: {align};"))
        })
        .into_owned()
}

fn inline_fonts(html: &str) -> String {
    FONT_CLASS
        .replace_all(html, |caps: &regex::Captures| {
            let family = match &caps[2] {
                "serif" => "Georgia, 'Times New Roman', serif",
                _ => "Monaco, 'Courier New', monospace",
            };
            rewrite_marker_class(&caps[1], &caps[3], &format!("font-family: {family};"))
        })
        .into_owned()
}

fn inline_sizes(html: &str) -> String {
    SIZE_CLASS
        .replace_all(html, |caps: &regex::Captures| {
            let size = match &caps[2] {
                "small" => "10px",
                "large" => "18px",
                _ => "32px",
            };
            rewrite_marker_class(&caps[1], &caps[3], &format!("font-size: {size};"))
        })
        .into_owned()
}

/// Replaces one recognized marker class with an inline style, keeping any
/// other classes on the element.
fn rewrite_marker_class(before: &str, after: &str, style: &str) -> String {
    let rest = format!("{before} {after}");
    let rest = rest.split_whitespace().collect::<Vec<_>>().join(" ");
    if rest.is_empty() {
        format!(r#"style="{style}""#)
    } else {
        format!(r#"class="{rest}" style="{style}""#)
    }
}

/// Drops leftover `ql-*` marker classes; removes the attribute entirely when
/// nothing is left.
fn strip_editor_classes(html: &str) -> String {
    CLASS_ATTR
        .replace_all(html, |caps: &regex::Captures| {
            let kept: Vec<&str> = caps[1]
                .split_whitespace()
                .filter(|token| !token.starts_with("ql-"))
                .collect();
            if kept.is_empty() {
                String::new()
            } else {
                format!(r#" class="{}""#, kept.join(" "))
            }
        })
        .into_owned()
}

/// Every paragraph gets the fixed margin/padding/line-height. An existing
/// inline style is appended after the fixed one so it keeps precedence.
fn normalize_paragraphs(html: &str) -> String {
    PARAGRAPH_TAG
        .replace_all(html, |caps: &regex::Captures| match caps.get(1) {
            None => format!(r#"<p style="{PARAGRAPH_STYLE}">"#),
            Some(attrs) => {
                let attrs = attrs.as_str();
                if let Some(style) = STYLE_ATTR.captures(attrs) {
                    let existing = style[1].trim().trim_end_matches(';').to_string();
                    let merged = format!("{PARAGRAPH_STYLE} {existing};");
                    let rewritten =
                        STYLE_ATTR.replace(attrs, format!(r#"style="{merged}""#).as_str());
                    format!("<p{rewritten}>")
                } else {
                    format!(r#"<p{attrs} style="{PARAGRAPH_STYLE}">"#)
                }
            }
        })
        .into_owned()
}

/// Editors emit `<p><br></p>` for blank lines; mail clients render those with
/// wildly different heights, so they are collapsed to a fixed spacer.
fn collapse_empty_paragraphs(html: &str) -> String {
    EMPTY_PARAGRAPH.replace_all(html, SPACER_PARAGRAPH).into_owned()
}

fn style_lists_and_headers(html: &str) -> String {
    let html = LIST_TAG
        .replace_all(html, |caps: &regex::Captures| {
            let tag = &caps[1];
            let attrs = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            format!(r#"<{tag}{attrs} style="{LIST_STYLE}">"#)
        })
        .into_owned();
    let html = LIST_ITEM_TAG
        .replace_all(&html, |caps: &regex::Captures| {
            let attrs = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            format!(r#"<li{attrs} style="{LIST_ITEM_STYLE}">"#)
        })
        .into_owned();
    HEADER_TAG
        .replace_all(&html, |caps: &regex::Captures| {
            let level = &caps[1];
            let attrs = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let size = match level {
                "1" => "24px",
                "2" => "20px",
                _ => "16px",
            };
            format!(r#"<h{level}{attrs} style="font-size: {size}; margin: 16px 0 8px 0;">"#)
        })
        .into_owned()
}

/// Desktop mail clients default to this stack; carrying it on the wrapper
/// keeps the fragment self-contained.
fn wrap_fragment(html: &str) -> String {
    format!(r#"<div style="{WRAPPER_STYLE}">{html}</div>"#)
}

fn append_tracking_pixel(html: &str, pixel_url: &str) -> String {
    let tracking_pixel = format!(
        r#"<img src="{pixel_url}" width="1" height="1" style="opacity:0; position:absolute; left:-9999px;" alt="" />"#
    );

    if html.contains("</body>") {
        return html.replace("</body>", &format!("{tracking_pixel}</body>"));
    }
    if html.contains("</html>") {
        return html.replace("</html>", &format!("{tracking_pixel}</html>"));
    }
    let mut out = html.to_string();
    out.push_str(&tracking_pixel);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIXEL: &str = "http://localhost:15810/track-email-open?id=1";

    #[test]
    fn alignment_class_becomes_inline_style() {
        let out = inline_alignment(r#"<p class="ql-align-center">Hi</p>"#);
        assert_eq!(out, r#"<p style="text-align: center;">Hi</p>"#);
    }

    #[test]
    fn alignment_preserves_other_classes() {
        let out = inline_alignment(r#"<p class="intro ql-align-right">Hi</p>"#);
        assert_eq!(out, r#"<p class="intro" style="text-align: right;">Hi</p>"#);
    }

    #[test]
    fn font_and_size_classes_use_fixed_maps() {
        let out = inline_fonts(r#"<span class="ql-font-monospace">x</span>"#);
        assert!(out.contains("font-family: Monaco, 'Courier New', monospace;"));

        let out = inline_sizes(r#"<span class="ql-size-huge">x</span>"#);
        assert!(out.contains("font-size: 32px;"));
        let out = inline_sizes(r#"<span class="ql-size-small">x</span>"#);
        assert!(out.contains("font-size: 10px;"));
    }

    #[test]
    fn leftover_editor_classes_are_stripped() {
        let out = strip_editor_classes(r#"<span class="ql-cursor note">x</span><p class="ql-indent-1">y</p>"#);
        assert_eq!(out, r#"<span class="note">x</span><p>y</p>"#);
    }

    #[test]
    fn paragraph_style_merges_with_existing() {
        let out = normalize_paragraphs(r#"<p style="text-align: center;">Hi</p>"#);
        assert_eq!(
            out,
            r#"<p style="margin: 0 0 10px 0; padding: 0; line-height: 1.4; text-align: center;">Hi</p>"#
        );
    }

    #[test]
    fn bare_paragraph_gets_fixed_style() {
        let out = normalize_paragraphs("<p>Hi</p>");
        assert_eq!(
            out,
            r#"<p style="margin: 0 0 10px 0; padding: 0; line-height: 1.4;">Hi</p>"#
        );
    }

    #[test]
    fn empty_paragraph_becomes_spacer() {
        let styled = normalize_paragraphs("<p><br></p>");
        let out = collapse_empty_paragraphs(&styled);
        assert_eq!(out, SPACER_PARAGRAPH);
    }

    #[test]
    fn headers_get_decreasing_sizes() {
        let out = style_lists_and_headers("<h1>A</h1><h2>B</h2><h3>C</h3>");
        assert!(out.contains(r#"<h1 style="font-size: 24px"#));
        assert!(out.contains(r#"<h2 style="font-size: 20px"#));
        assert!(out.contains(r#"<h3 style="font-size: 16px"#));
    }

    #[test]
    fn lists_get_inline_styles() {
        let out = style_lists_and_headers("<ul><li>a</li></ul>");
        assert!(out.contains(r#"<ul style="margin: 0 0 10px 0; padding-left: 24px;">"#));
        assert!(out.contains(r#"<li style="margin: 0 0 4px 0; line-height: 1.4;">"#));
    }

    #[test]
    fn full_pipeline_wraps_and_appends_pixel() {
        let out = render_email_html(r#"<p class="ql-align-center">Hello</p><p><br></p>"#, PIXEL);
        assert!(out.starts_with(
            r#"<div style="font-family: Calibri, Arial, sans-serif; font-size: 11pt; color: #000000;">"#
        ));
        assert!(out.contains("text-align: center;"));
        assert!(out.contains(r#"line-height: 11pt; height: 11pt;"#));
        assert!(out.ends_with(r#"style="opacity:0; position:absolute; left:-9999px;" alt="" />"#));
        assert!(out.contains(PIXEL));
        assert!(!out.contains("ql-"));
    }

    #[test]
    fn pixel_lands_before_closing_body_when_present() {
        let out = append_tracking_pixel("<html><body>Hello</body></html>", PIXEL);
        assert!(out.contains(r#"alt="" /></body>"#));
    }
}
