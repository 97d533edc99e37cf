//! Source document formats and per-format field extraction.
//!
//! The directory-tree reader picks a [`SourceFormat`] per file extension and
//! uses it to pull post fields out of the document. The format also names
//! the [`MarkupDialect`] the URL processor scans the body as. Matches over
//! the enum are exhaustive, so adding a format is a compile-checked change.
//!
//! Bodies are carried verbatim in their source dialect; porter does not
//! convert between markup grammars.

use crate::urlproc::MarkupDialect;

/// A supported source document format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    /// CommonMark-style markdown, optionally with a `---` front matter
    /// block.
    Markdown,
    /// Static HTML.
    Html,
}

/// Post fields extracted from one source document.
#[derive(Debug, Clone, Default)]
pub struct DocumentFields {
    /// Title from front matter, the first heading, or `<title>`.
    pub title: Option<String>,
    /// Publication timestamp from front matter, if present.
    pub date_gmt: Option<String>,
    /// Ordering hint from front matter, if present.
    pub menu_order: Option<i64>,
    /// The document body, verbatim, minus any front matter block.
    pub body: String,
}

impl SourceFormat {
    /// Maps a file extension to its format. Unknown extensions are not
    /// convertible and the file is skipped by the reader.
    #[must_use]
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "md" | "markdown" => Some(Self::Markdown),
            "html" | "htm" => Some(Self::Html),
            _ => None,
        }
    }

    /// The dialect the URL processor scans this format's body as.
    #[must_use]
    pub const fn dialect(self) -> MarkupDialect {
        match self {
            Self::Markdown => MarkupDialect::Markdown,
            Self::Html => MarkupDialect::Html,
        }
    }

    /// Extracts post fields from a document of this format.
    #[must_use]
    pub fn extract_fields(self, content: &str) -> DocumentFields {
        match self {
            Self::Markdown => extract_markdown_fields(content),
            Self::Html => extract_html_fields(content),
        }
    }
}

fn extract_markdown_fields(content: &str) -> DocumentFields {
    let mut fields = DocumentFields::default();
    let body = match parse_front_matter(content, &mut fields) {
        Some(rest) => rest,
        None => content,
    };
    fields.body = body.to_string();

    if fields.title.is_none() {
        fields.title = body
            .lines()
            .find_map(|line| line.strip_prefix("# "))
            .map(|heading| heading.trim().to_string());
    }
    fields
}

/// Parses a leading `---` front matter block of `key: value` lines,
/// returning the remaining body on success.
fn parse_front_matter<'a>(content: &'a str, fields: &mut DocumentFields) -> Option<&'a str> {
    let after_open = content.strip_prefix("---\n")?;
    let close = after_open.find("\n---")?;
    let block = &after_open[..close];
    let mut rest = &after_open[close + 4..];
    if let Some(stripped) = rest.strip_prefix('\n') {
        rest = stripped;
    }

    for line in block.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        match key.trim() {
            "title" | "post_title" => fields.title = Some(value.to_string()),
            "date" | "post_date_gmt" => fields.date_gmt = Some(value.to_string()),
            "menu_order" => fields.menu_order = value.parse().ok(),
            _ => {},
        }
    }
    Some(rest)
}

fn extract_html_fields(content: &str) -> DocumentFields {
    let title = element_text(content, "title").or_else(|| element_text(content, "h1"));
    DocumentFields {
        title,
        body: content.to_string(),
        ..DocumentFields::default()
    }
}

/// Text content of the first `<name …>…</name>` element, entity-decoded.
fn element_text(content: &str, name: &str) -> Option<String> {
    let lower = content.to_ascii_lowercase();
    let open_at = lower.find(&format!("<{name}"))?;
    let body_at = open_at + content[open_at..].find('>')? + 1;
    let close_off = lower[body_at..].find(&format!("</{name}"))?;
    let text = content[body_at..body_at + close_off].trim();
    if text.is_empty() {
        None
    } else {
        Some(html_escape::decode_html_entities(text).into_owned())
    }
}
