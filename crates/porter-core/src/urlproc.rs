//! Streaming, position-aware URL matching and rewriting in semi-structured
//! markup.
//!
//! [`UrlProcessor`] walks a document once, left to right, locating URLs in
//! the dialect's URL-bearing positions without parsing the markup into a
//! tree. Replacements are staged against the matched byte spans and applied
//! in a single splice by [`UrlProcessor::updated_markup`], so every byte
//! outside a matched span is reproduced exactly. The pass is O(n) in
//! document size regardless of how many URLs match.
//!
//! URL-bearing positions per dialect:
//!
//! - **HTML**: `src`, `href`, and `poster` attributes of element tags, plus
//!   `"url"`/`"href"`/`"src"` string values inside block-annotation comments
//!   (`<!-- wp:image {"url":"…"} -->`). Script and style bodies are skipped.
//! - **Markdown**: inline image (`![alt](dest)`) and link (`[text](dest)`)
//!   destinations, autolinks (`<https://…>`), and raw inline HTML tags,
//!   which are scanned with the HTML rules.
//!
//! Attribute values are entity-decoded before URL parsing; the raw span is
//! preserved untouched and replacements are re-encoded for the context they
//! land in.

use crate::error::{Error, Result};
use memchr::{memchr, memchr2, memchr3};
use std::borrow::Cow;
use url::Url;

/// The markup dialect a document is scanned as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkupDialect {
    /// HTML or HTML-with-block-annotations.
    Html,
    /// CommonMark-style markdown (raw inline HTML included).
    Markdown,
}

/// How a staged replacement must be encoded for the span it replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpanContext {
    /// Double-quoted HTML attribute value.
    DoubleQuotedAttr,
    /// Single-quoted HTML attribute value.
    SingleQuotedAttr,
    /// Unquoted HTML attribute value.
    UnquotedAttr,
    /// JSON string value inside a block-annotation comment.
    JsonString,
    /// Markdown destination or autolink; written verbatim.
    Plain,
}

#[derive(Debug)]
struct UrlMatch {
    start: usize,
    end: usize,
    parsed: Url,
    tag: String,
    attr: String,
    context: SpanContext,
}

#[derive(Debug)]
struct Edit {
    start: usize,
    end: usize,
    replacement: String,
}

/// Attribute names whose values are treated as URLs.
const URL_ATTRIBUTES: [&str; 3] = ["src", "href", "poster"];

/// JSON keys inside block-annotation comments whose values are URLs.
const URL_JSON_KEYS: [&str; 3] = ["url", "href", "src"];

/// A single-pass URL matcher/rewriter over one markup document.
pub struct UrlProcessor<'a> {
    markup: &'a str,
    dialect: MarkupDialect,
    base: Option<Url>,
    pos: usize,
    /// When inside an element tag's attribute list, the lowercased tag name.
    open_tag: Option<String>,
    /// When inside a block-annotation comment, (block name, end of body).
    open_comment: Option<(String, usize)>,
    current: Option<UrlMatch>,
    edits: Vec<Edit>,
}

impl<'a> UrlProcessor<'a> {
    /// Creates a processor over `markup`, resolving relative references
    /// against `base` (typically the migrated-from site URL).
    #[must_use]
    pub fn new(markup: &'a str, dialect: MarkupDialect, base: Option<Url>) -> Self {
        Self {
            markup,
            dialect,
            base,
            pos: 0,
            open_tag: None,
            open_comment: None,
            current: None,
            edits: Vec::new(),
        }
    }

    /// Advances to the next URL reference. Returns `false` when none remain.
    pub fn next_url(&mut self) -> bool {
        self.current = None;
        while self.current.is_none() && self.pos < self.markup.len() {
            if self.open_tag.is_some() {
                self.scan_attributes();
            } else if self.open_comment.is_some() {
                self.scan_comment_body();
            } else {
                match self.dialect {
                    MarkupDialect::Html => self.scan_html(),
                    MarkupDialect::Markdown => self.scan_markdown(),
                }
            }
        }
        self.current.is_some()
    }

    /// Lowercased tag name (or block name, e.g. `wp:image`) that produced
    /// the current match.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.current.as_ref().map(|m| m.tag.as_str())
    }

    /// The attribute name (or JSON key) whose value is the current match.
    #[must_use]
    pub fn inspected_attribute_name(&self) -> Option<&str> {
        self.current.as_ref().map(|m| m.attr.as_str())
    }

    /// Structured decomposition of the current URL, resolved against the
    /// base URL for relative references.
    #[must_use]
    pub fn parsed_url(&self) -> Option<&Url> {
        self.current.as_ref().map(|m| &m.parsed)
    }

    /// The exact original text span of the current match, before any
    /// decoding or normalization.
    #[must_use]
    pub fn raw_url(&self) -> Option<&str> {
        self.current.as_ref().map(|m| &self.markup[m.start..m.end])
    }

    /// Stages `text` as the replacement for the current match, encoded for
    /// the span's context. Calling again for the same match replaces the
    /// previously staged text.
    pub fn set_raw_url(&mut self, text: &str) -> Result<()> {
        let m = self
            .current
            .as_ref()
            .ok_or_else(|| Error::Rewrite("no current URL match to replace".to_string()))?;
        let replacement = match m.context {
            SpanContext::DoubleQuotedAttr => {
                html_escape::encode_double_quoted_attribute(text).into_owned()
            },
            SpanContext::SingleQuotedAttr => {
                html_escape::encode_single_quoted_attribute(text).into_owned()
            },
            SpanContext::UnquotedAttr => {
                html_escape::encode_unquoted_attribute(text).into_owned()
            },
            SpanContext::JsonString => {
                let quoted = serde_json::to_string(text)?;
                quoted[1..quoted.len() - 1].to_string()
            },
            SpanContext::Plain => text.to_string(),
        };
        let (start, end) = (m.start, m.end);
        if let Some(edit) = self.edits.iter_mut().rev().find(|e| e.start == start) {
            edit.replacement = replacement;
        } else {
            self.edits.push(Edit {
                start,
                end,
                replacement,
            });
        }
        Ok(())
    }

    /// Stages the serialized form of `url` as the replacement for the
    /// current match.
    pub fn rewrite_url_components(&mut self, url: &Url) -> Result<()> {
        self.set_raw_url(url.as_str())
    }

    /// Serializes the markup with only matched-and-replaced spans altered.
    /// All untouched bytes are reproduced exactly.
    #[must_use]
    pub fn updated_markup(&self) -> String {
        let mut out = String::with_capacity(self.markup.len());
        let mut cursor = 0;
        for edit in &self.edits {
            out.push_str(&self.markup[cursor..edit.start]);
            out.push_str(&edit.replacement);
            cursor = edit.end;
        }
        out.push_str(&self.markup[cursor..]);
        out
    }

    fn rest(&self) -> &'a str {
        &self.markup[self.pos..]
    }

    fn parse_candidate(&self, raw: &str) -> Option<Url> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let options = Url::options().base_url(self.base.as_ref());
        options.parse(trimmed).ok()
    }

    // --- HTML scanning -----------------------------------------------------

    fn scan_html(&mut self) {
        let Some(offset) = memchr(b'<', self.rest().as_bytes()) else {
            self.pos = self.markup.len();
            return;
        };
        self.pos += offset;
        let rest = self.rest();

        if rest.starts_with("<!--") {
            self.enter_comment();
        } else if rest.starts_with("</") || rest.starts_with("<!") || rest.starts_with("<?") {
            self.skip_past(b'>');
        } else if let Some(name) = tag_name(&rest[1..]) {
            self.pos += 1 + name.len();
            self.open_tag = Some(name);
        } else {
            // Stray '<' (e.g. inside script text); not a tag.
            self.pos += 1;
        }
    }

    /// Parses attributes from `self.pos` until the tag closes, yielding the
    /// next URL-bearing attribute value if one exists.
    fn scan_attributes(&mut self) {
        let bytes = self.markup.as_bytes();
        loop {
            while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            if self.pos >= bytes.len() {
                self.open_tag = None;
                return;
            }
            if bytes[self.pos] == b'>' {
                self.pos += 1;
                self.leave_tag();
                return;
            }
            if bytes[self.pos] == b'/' {
                self.pos += 1;
                continue;
            }

            let name_start = self.pos;
            while self.pos < bytes.len()
                && !bytes[self.pos].is_ascii_whitespace()
                && !matches!(bytes[self.pos], b'=' | b'>' | b'/')
            {
                self.pos += 1;
            }
            let attr_name = self.markup[name_start..self.pos].to_ascii_lowercase();

            while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            if self.pos >= bytes.len() || bytes[self.pos] != b'=' {
                // Boolean attribute; keep scanning.
                continue;
            }
            self.pos += 1;
            while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            if self.pos >= bytes.len() {
                self.open_tag = None;
                return;
            }

            let (value_start, value_end, context) = match bytes[self.pos] {
                quote @ (b'"' | b'\'') => {
                    let start = self.pos + 1;
                    let Some(off) = memchr(quote, &bytes[start..]) else {
                        self.pos = self.markup.len();
                        self.open_tag = None;
                        return;
                    };
                    self.pos = start + off + 1;
                    let context = if quote == b'"' {
                        SpanContext::DoubleQuotedAttr
                    } else {
                        SpanContext::SingleQuotedAttr
                    };
                    (start, start + off, context)
                },
                _ => {
                    let start = self.pos;
                    while self.pos < bytes.len()
                        && !bytes[self.pos].is_ascii_whitespace()
                        && bytes[self.pos] != b'>'
                    {
                        self.pos += 1;
                    }
                    (start, self.pos, SpanContext::UnquotedAttr)
                },
            };

            if !URL_ATTRIBUTES.contains(&attr_name.as_str()) {
                continue;
            }
            let raw = &self.markup[value_start..value_end];
            let decoded: Cow<'_, str> = html_escape::decode_html_entities(raw);
            if let Some(parsed) = self.parse_candidate(&decoded) {
                // The tag stays open; the next call resumes attribute
                // scanning where this value ended.
                let tag = self.open_tag.clone().unwrap_or_default();
                self.current = Some(UrlMatch {
                    start: value_start,
                    end: value_end,
                    parsed,
                    tag,
                    attr: attr_name,
                    context,
                });
                return;
            }
        }
    }

    /// On closing a tag, skip raw-text element bodies entirely.
    fn leave_tag(&mut self) {
        if let Some(tag) = self.open_tag.take() {
            if tag == "script" || tag == "style" {
                let close = format!("</{tag}");
                if let Some(off) = self.rest().find(&close) {
                    self.pos += off;
                } else {
                    self.pos = self.markup.len();
                }
            }
        }
    }

    fn enter_comment(&mut self) {
        let body_start = self.pos + 4;
        let body_end = self.markup[body_start..]
            .find("-->")
            .map_or(self.markup.len(), |off| body_start + off);

        let body = &self.markup[body_start..body_end];
        let trimmed = body.trim_start();
        if let Some(after) = trimmed.strip_prefix("wp:") {
            let name_len = after
                .find(|c: char| c.is_whitespace() || c == '{')
                .unwrap_or(after.len());
            let block = format!("wp:{}", &after[..name_len]);
            self.pos = body_start;
            self.open_comment = Some((block, body_end));
        } else {
            // Plain comment; not scanned.
            self.pos = (body_end + 3).min(self.markup.len());
        }
    }

    /// Scans a block-annotation comment body for URL-valued JSON keys.
    fn scan_comment_body(&mut self) {
        let Some((block, body_end)) = self.open_comment.clone() else {
            return;
        };
        let bytes = self.markup.as_bytes();

        while self.pos < body_end {
            let Some(off) = memchr(b'"', &bytes[self.pos..body_end]) else {
                break;
            };
            let key_start = self.pos + off + 1;
            let Some(key_off) = memchr(b'"', &bytes[key_start..body_end]) else {
                break;
            };
            let key_end = key_start + key_off;
            let key = &self.markup[key_start..key_end];
            self.pos = key_end + 1;

            if !URL_JSON_KEYS.contains(&key) {
                continue;
            }

            // Expect `: "` next; anything else means this quoted run was a
            // value, not a key.
            let mut probe = self.pos;
            while probe < body_end && bytes[probe].is_ascii_whitespace() {
                probe += 1;
            }
            if probe >= body_end || bytes[probe] != b':' {
                continue;
            }
            probe += 1;
            while probe < body_end && bytes[probe].is_ascii_whitespace() {
                probe += 1;
            }
            if probe >= body_end || bytes[probe] != b'"' {
                continue;
            }
            let value_start = probe + 1;
            let Some(value_len) = json_string_end(&self.markup[value_start..body_end]) else {
                continue;
            };
            let value_end = value_start + value_len;
            self.pos = value_end + 1;

            let raw = &self.markup[value_start..value_end];
            let decoded = match serde_json::from_str::<String>(&format!("\"{raw}\"")) {
                Ok(s) => s,
                Err(_) => continue,
            };
            if let Some(parsed) = self.parse_candidate(&decoded) {
                self.current = Some(UrlMatch {
                    start: value_start,
                    end: value_end,
                    parsed,
                    tag: block,
                    attr: key.to_string(),
                    context: SpanContext::JsonString,
                });
                return;
            }
        }

        self.open_comment = None;
        self.pos = (body_end + 3).min(self.markup.len());
    }

    // --- Markdown scanning -------------------------------------------------

    fn scan_markdown(&mut self) {
        let Some(offset) = memchr3(b'<', b'!', b'[', self.rest().as_bytes()) else {
            self.pos = self.markup.len();
            return;
        };
        self.pos += offset;
        let rest = self.rest();

        match rest.as_bytes()[0] {
            b'<' => {
                if let Some((url_text, len)) = autolink(rest) {
                    let start = self.pos + 1;
                    let end = start + url_text.len();
                    self.pos += len;
                    if let Some(parsed) = self.parse_candidate(url_text) {
                        self.current = Some(UrlMatch {
                            start,
                            end,
                            parsed,
                            tag: "a".to_string(),
                            attr: "href".to_string(),
                            context: SpanContext::Plain,
                        });
                    }
                } else {
                    // Raw inline HTML inside markdown: HTML rules apply.
                    self.scan_html();
                }
            },
            b'!' => {
                if rest.len() > 1 && rest.as_bytes()[1] == b'[' {
                    self.scan_markdown_ref(self.pos + 1, "img", "src");
                } else {
                    self.pos += 1;
                }
            },
            _ => self.scan_markdown_ref(self.pos, "a", "href"),
        }
    }

    /// Parses `[text](dest …)` starting at the `[` at `bracket`, yielding
    /// the destination if one exists.
    fn scan_markdown_ref(&mut self, bracket: usize, tag: &str, attr: &str) {
        let after_bracket = bracket + 1;
        let Some(close_off) = memchr(b']', self.markup[after_bracket..].as_bytes()) else {
            self.pos = self.markup.len();
            return;
        };
        let after_close = after_bracket + close_off + 1;
        if self.markup[after_close..].as_bytes().first() != Some(&b'(') {
            self.pos = after_close;
            return;
        }
        let dest_start = after_close + 1;
        let Some(paren_off) = memchr2(b')', b'\n', self.markup[dest_start..].as_bytes()) else {
            self.pos = self.markup.len();
            return;
        };
        if self.markup.as_bytes()[dest_start + paren_off] == b'\n' {
            // Destinations never span lines; treat as plain text.
            self.pos = dest_start + paren_off;
            return;
        }
        let inline_end = dest_start + paren_off;
        self.pos = inline_end + 1;

        // Destination runs to the first whitespace (a quoted title may
        // follow) or to the closing paren.
        let inline = &self.markup[dest_start..inline_end];
        let dest_len = inline
            .find(|c: char| c.is_ascii_whitespace())
            .unwrap_or(inline.len());
        let (dest_start, dest_end) = match inline.strip_prefix('<') {
            // Angle-bracketed destination: `![alt](<dest with spaces>)`.
            Some(rest) => match rest.find('>') {
                Some(end) => (dest_start + 1, dest_start + 1 + end),
                None => (dest_start, dest_start + dest_len),
            },
            None => (dest_start, dest_start + dest_len),
        };

        let raw = &self.markup[dest_start..dest_end];
        if let Some(parsed) = self.parse_candidate(raw) {
            self.current = Some(UrlMatch {
                start: dest_start,
                end: dest_end,
                parsed,
                tag: tag.to_string(),
                attr: attr.to_string(),
                context: SpanContext::Plain,
            });
        }
    }

    fn skip_past(&mut self, byte: u8) {
        match memchr(byte, self.rest().as_bytes()) {
            Some(off) => self.pos += off + 1,
            None => self.pos = self.markup.len(),
        }
    }
}

/// Leading tag name of an element tag body, lowercased, or `None` if this is
/// not a tag start.
fn tag_name(after_lt: &str) -> Option<String> {
    let bytes = after_lt.as_bytes();
    if bytes.first().is_none_or(|b| !b.is_ascii_alphabetic()) {
        return None;
    }
    let len = bytes
        .iter()
        .position(|b| !(b.is_ascii_alphanumeric() || *b == b'-'))
        .unwrap_or(bytes.len());
    Some(after_lt[..len].to_ascii_lowercase())
}

/// Recognizes `<scheme://…>` autolinks; returns the URL text and the total
/// consumed length including both angle brackets.
fn autolink(rest: &str) -> Option<(&str, usize)> {
    let inner = &rest[1..];
    let end = memchr(b'>', inner.as_bytes())?;
    let candidate = &inner[..end];
    if candidate.contains(char::is_whitespace) || !candidate.contains("://") {
        return None;
    }
    Some((candidate, end + 2))
}

/// Length of a JSON string body up to its closing unescaped quote.
fn json_string_end(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Whether two URLs share an origin (scheme, host, and effective port).
#[must_use]
pub fn url_matches_origin(url: &Url, origin: &Url) -> bool {
    url.scheme() == origin.scheme()
        && url.host_str() == origin.host_str()
        && url.port_or_known_default() == origin.port_or_known_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn base() -> Option<Url> {
        Some(Url::parse("https://source.example/").unwrap())
    }

    fn collect_matches(markup: &str, dialect: MarkupDialect) -> Vec<(String, String, String)> {
        let mut p = UrlProcessor::new(markup, dialect, base());
        let mut out = Vec::new();
        while p.next_url() {
            out.push((
                p.tag().unwrap().to_string(),
                p.inspected_attribute_name().unwrap().to_string(),
                p.raw_url().unwrap().to_string(),
            ));
        }
        out
    }

    #[test]
    fn test_finds_img_src_in_html() {
        let matches = collect_matches(
            r#"<p>Hi</p><img alt="x" src="https://source.example/a.png">"#,
            MarkupDialect::Html,
        );
        assert_eq!(
            matches,
            vec![(
                "img".to_string(),
                "src".to_string(),
                "https://source.example/a.png".to_string()
            )]
        );
    }

    #[test]
    fn test_finds_multiple_url_attributes_in_one_tag() {
        let matches = collect_matches(
            r#"<video src="/v.mp4" poster="/p.jpg" controls></video>"#,
            MarkupDialect::Html,
        );
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].1, "src");
        assert_eq!(matches[1].1, "poster");
    }

    #[test]
    fn test_relative_urls_resolve_against_base() {
        let markup = r#"<a href="/about">About</a>"#;
        let mut p = UrlProcessor::new(markup, MarkupDialect::Html, base());
        assert!(p.next_url());
        assert_eq!(
            p.parsed_url().unwrap().as_str(),
            "https://source.example/about"
        );
        assert_eq!(p.raw_url().unwrap(), "/about");
    }

    #[test]
    fn test_relative_url_without_base_is_skipped() {
        let markup = r#"<img src="img/a.png"><img src="https://ok.example/b.png">"#;
        let mut p = UrlProcessor::new(markup, MarkupDialect::Html, None);
        assert!(p.next_url());
        assert_eq!(p.raw_url().unwrap(), "https://ok.example/b.png");
        assert!(!p.next_url());
    }

    #[test]
    fn test_entity_encoded_attribute_is_decoded_for_parsing() {
        let markup = r#"<a href="https://source.example/?a=1&amp;b=2">x</a>"#;
        let mut p = UrlProcessor::new(markup, MarkupDialect::Html, base());
        assert!(p.next_url());
        assert_eq!(p.raw_url().unwrap(), "https://source.example/?a=1&amp;b=2");
        assert_eq!(p.parsed_url().unwrap().query(), Some("a=1&b=2"));
    }

    #[test]
    fn test_block_comment_json_urls_are_found() {
        let markup = r#"<!-- wp:image {"id":7,"url":"https://source.example/img.png"} -->
<figure><img src="https://source.example/img.png"></figure>
<!-- /wp:image -->"#;
        let matches = collect_matches(markup, MarkupDialect::Html);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].0, "wp:image");
        assert_eq!(matches[0].1, "url");
        assert_eq!(matches[1].0, "img");
    }

    #[test]
    fn test_plain_comments_and_script_bodies_are_skipped() {
        let markup = r#"<!-- <img src="https://no.example/x.png"> -->
<script>var a = "<img src='https://no.example/y.png'>";</script>
<img src="https://yes.example/z.png">"#;
        let matches = collect_matches(markup, MarkupDialect::Html);
        assert_eq!(matches.len(), 1);
        assert!(matches[0].2.contains("yes.example"));
    }

    #[test]
    fn test_markdown_image_and_link() {
        let markup = "Intro ![alt](https://source.example/img1.png) and [docs](/guide).";
        let matches = collect_matches(markup, MarkupDialect::Markdown);
        assert_eq!(
            matches,
            vec![
                (
                    "img".to_string(),
                    "src".to_string(),
                    "https://source.example/img1.png".to_string()
                ),
                ("a".to_string(), "href".to_string(), "/guide".to_string()),
            ]
        );
    }

    #[test]
    fn test_markdown_image_with_title_and_autolink() {
        let markup = r#"![x](https://source.example/a.png "Title") see <https://other.example/>"#;
        let matches = collect_matches(markup, MarkupDialect::Markdown);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].2, "https://source.example/a.png");
        assert_eq!(matches[1], (
            "a".to_string(),
            "href".to_string(),
            "https://other.example/".to_string()
        ));
    }

    #[test]
    fn test_markdown_inline_html_is_scanned() {
        let markup = r#"Text with <img src="https://source.example/raw.png"> inline."#;
        let matches = collect_matches(markup, MarkupDialect::Markdown);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].0, "img");
    }

    #[test]
    fn test_round_trip_without_matches_is_identity() {
        let markup = "<p>No URLs here &amp; none expected — just text.</p>";
        let mut p = UrlProcessor::new(markup, MarkupDialect::Html, base());
        while p.next_url() {}
        assert_eq!(p.updated_markup(), markup);
    }

    #[test]
    fn test_rewrite_changes_only_the_matched_span() {
        let markup = r#"<p>a</p><img src="http://source.example/a.png"><p>b</p>"#;
        let mut p = UrlProcessor::new(markup, MarkupDialect::Html, base());
        assert!(p.next_url());
        let replacement = Url::parse("http://dest.example/assets/a.png").unwrap();
        p.rewrite_url_components(&replacement).unwrap();
        assert_eq!(
            p.updated_markup(),
            r#"<p>a</p><img src="http://dest.example/assets/a.png"><p>b</p>"#
        );
    }

    #[test]
    fn test_rewrite_staged_last_call_wins() {
        let markup = r#"<img src="/a.png">"#;
        let mut p = UrlProcessor::new(markup, MarkupDialect::Html, base());
        assert!(p.next_url());
        p.set_raw_url("/first.png").unwrap();
        p.set_raw_url("/second.png").unwrap();
        assert_eq!(p.updated_markup(), r#"<img src="/second.png">"#);
    }

    #[test]
    fn test_rewrite_encodes_for_attribute_context() {
        let markup = r#"<a href="/x">y</a>"#;
        let mut p = UrlProcessor::new(markup, MarkupDialect::Html, base());
        assert!(p.next_url());
        p.set_raw_url("/q?a=1&b=2").unwrap();
        assert_eq!(p.updated_markup(), r#"<a href="/q?a=1&amp;b=2">y</a>"#);
    }

    #[test]
    fn test_rewrite_inside_block_comment_json() {
        let markup = r#"<!-- wp:image {"url":"https://source.example/i.png"} --><!-- /wp:image -->"#;
        let mut p = UrlProcessor::new(markup, MarkupDialect::Html, base());
        assert!(p.next_url());
        p.set_raw_url("https://dest.example/assets/i.png").unwrap();
        assert_eq!(
            p.updated_markup(),
            r#"<!-- wp:image {"url":"https://dest.example/assets/i.png"} --><!-- /wp:image -->"#
        );
    }

    #[test]
    fn test_set_raw_url_without_match_is_an_error() {
        let mut p = UrlProcessor::new("<p>x</p>", MarkupDialect::Html, base());
        assert!(!p.next_url());
        assert!(matches!(p.set_raw_url("/x"), Err(Error::Rewrite(_))));
    }

    #[test]
    fn test_multiple_rewrites_in_one_pass() {
        let markup = "![a](http://source.example/1.png) mid ![b](http://source.example/2.png)";
        let mut p = UrlProcessor::new(markup, MarkupDialect::Markdown, base());
        let mut n = 0;
        while p.next_url() {
            n += 1;
            p.set_raw_url(&format!("http://dest.example/{n}.png")).unwrap();
        }
        assert_eq!(n, 2);
        assert_eq!(
            p.updated_markup(),
            "![a](http://dest.example/1.png) mid ![b](http://dest.example/2.png)"
        );
    }

    #[test]
    fn test_url_matches_origin() {
        let a = Url::parse("https://site.example/path/x.png").unwrap();
        let same = Url::parse("https://site.example:443/other").unwrap();
        let other = Url::parse("https://elsewhere.example/path/x.png").unwrap();
        assert!(url_matches_origin(&a, &same));
        assert!(!url_matches_origin(&a, &other));
    }

    proptest! {
        /// Scan-only passes never alter the document.
        #[test]
        fn test_scan_only_round_trip_fidelity(markup in r"[ -~\n]{0,300}") {
            for dialect in [MarkupDialect::Html, MarkupDialect::Markdown] {
                let mut p = UrlProcessor::new(&markup, dialect, None);
                let mut guard = 0;
                while p.next_url() {
                    guard += 1;
                    prop_assert!(guard < 10_000);
                }
                prop_assert_eq!(p.updated_markup(), markup.clone());
            }
        }
    }
}
