//! Streaming entity reader for XML export files.
//!
//! [`WxrReader`] consumes an export stream in appended byte chunks — the
//! whole file never needs to fit in memory. Bytes are buffered until a
//! complete `<item>` element is available, then the item is decoded into
//! entities: the post itself, followed by its terms, post meta, and
//! comments. Chunk boundaries therefore fall only between entities, never
//! inside one entity's data.
//!
//! Consumed bytes are dropped from the buffer as items complete; the cursor
//! is the absolute stream offset just past the last fully consumed item, so
//! a resuming caller can re-feed the stream from that offset.

use crate::entity::{Entity, EntityData, EntityKind};
use crate::error::Error;
use crate::reader::{Cursor, EntityReader};
use memchr::memmem;
use quick_xml::Reader;
use quick_xml::events::Event;
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Streaming reader over an XML export (WXR-style `<rss><channel><item>`).
pub struct WxrReader {
    buffer: Vec<u8>,
    /// Absolute stream offset of `buffer[0]`.
    stream_base: u64,
    input_done: bool,
    ready: VecDeque<Entity>,
    current: Option<Entity>,
    finished: bool,
    error: Option<Error>,
}

impl WxrReader {
    /// Creates an empty reader; feed it with [`append_bytes`](Self::append_bytes).
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            stream_base: 0,
            input_done: false,
            ready: VecDeque::new(),
            current: None,
            finished: false,
            error: None,
        }
    }

    /// Creates a reader resuming at an absolute stream offset previously
    /// returned by [`EntityReader::cursor`]. The caller re-feeds the stream
    /// starting from that offset.
    #[must_use]
    pub fn resume_from(cursor: &Cursor) -> Self {
        let mut reader = Self::new();
        reader.stream_base = cursor.as_str().parse().unwrap_or(0);
        reader
    }

    /// Appends the next chunk of the export stream.
    pub fn append_bytes(&mut self, chunk: &[u8]) {
        if self.input_done {
            warn!("append_bytes after input_finished; chunk ignored");
            return;
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// Signals that no further bytes will arrive.
    pub fn input_finished(&mut self) {
        self.input_done = true;
    }

    /// Attempts to locate and decode the next complete `<item>` in the
    /// buffer, pushing its entities onto the ready queue.
    fn decode_next_item(&mut self) {
        let Some(open_rel) = find_item_open(&self.buffer) else {
            if self.input_done {
                self.finished = true;
            }
            return;
        };
        let Some(close_off) = memmem::find(&self.buffer[open_rel..], b"</item>") else {
            if self.input_done {
                self.fail(Error::Source(format!(
                    "truncated <item> at stream offset {}",
                    self.stream_base + open_rel as u64
                )));
            }
            return;
        };
        let end_rel = open_rel + close_off + "</item>".len();
        let identity = format!("item:{}", self.stream_base + open_rel as u64);

        let decoded = std::str::from_utf8(&self.buffer[open_rel..end_rel])
            .map_err(|e| Error::Source(format!("export is not valid UTF-8: {e}")))
            .and_then(|item_xml| decode_item(item_xml, &identity));
        match decoded {
            Ok(entities) => {
                debug!(identity = %identity, count = entities.len(), "decoded item");
                self.ready.extend(entities);
                self.buffer.drain(..end_rel);
                self.stream_base += end_rel as u64;
            },
            Err(error) => self.fail(error),
        }
    }

    fn fail(&mut self, error: Error) {
        self.error = Some(error);
        self.finished = true;
        self.current = None;
        self.ready.clear();
    }
}

impl Default for WxrReader {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityReader for WxrReader {
    fn next_entity(&mut self) -> bool {
        if self.finished {
            return false;
        }
        if self.ready.is_empty() {
            self.decode_next_item();
        }
        match self.ready.pop_front() {
            Some(entity) => {
                self.current = Some(entity);
                true
            },
            None => {
                self.current = None;
                false
            },
        }
    }

    fn entity(&self) -> Option<&Entity> {
        self.current.as_ref()
    }

    fn is_finished(&self) -> bool {
        self.finished && self.ready.is_empty()
    }

    fn last_error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    fn cursor(&self) -> Cursor {
        Cursor::at(self.stream_base.to_string())
    }
}

/// Start offset of the next `<item>` or `<item …>` tag.
fn find_item_open(buffer: &[u8]) -> Option<usize> {
    let mut from = 0;
    while let Some(off) = memmem::find(&buffer[from..], b"<item") {
        let at = from + off;
        match buffer.get(at + 5) {
            Some(b'>' | b' ' | b'\t' | b'\r' | b'\n') => return Some(at),
            // Incomplete tail; wait for more bytes.
            None => return None,
            _ => from = at + 5,
        }
    }
    None
}

/// Item sub-elements that map straight onto post fields, in the order the
/// fields appear in the produced entity.
const POST_FIELDS: [(&str, &str); 10] = [
    ("title", "post_title"),
    ("guid", "guid"),
    ("content:encoded", "post_content"),
    ("excerpt:encoded", "post_excerpt"),
    ("wp:post_date_gmt", "post_date_gmt"),
    ("wp:status", "post_status"),
    ("wp:post_type", "post_type"),
    ("wp:post_name", "slug"),
    ("wp:menu_order", "menu_order"),
    ("wp:attachment_url", "attachment_url"),
];

/// Decodes one complete `<item>` element into its entities: the post first,
/// then terms, post meta, and comments.
fn decode_item(item_xml: &str, identity: &str) -> Result<Vec<Entity>, Error> {
    let mut reader = Reader::from_str(item_xml);
    let mut fields: Vec<(String, String)> = Vec::new();
    let mut terms: Vec<EntityData> = Vec::new();
    let mut metas: Vec<EntityData> = Vec::new();
    let mut comments: Vec<EntityData> = Vec::new();

    // Element path inside the item, e.g. ["item", "wp:postmeta", "wp:meta_key"].
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    // In-progress nested structures.
    let mut meta: EntityData = EntityData::new();
    let mut comment: EntityData = EntityData::new();
    let mut term_attrs: Option<(String, String)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                if name == "category" {
                    let domain = attribute(&start, "domain")?.unwrap_or_else(|| "category".to_string());
                    let nicename = attribute(&start, "nicename")?.unwrap_or_default();
                    term_attrs = Some((domain, nicename));
                }
                path.push(name);
                text.clear();
            },
            Ok(Event::Text(t)) => {
                let unescaped = t
                    .unescape()
                    .map_err(|e| Error::Source(format!("bad text in {identity}: {e}")))?;
                text.push_str(&unescaped);
            },
            Ok(Event::CData(cdata)) => {
                text.push_str(&String::from_utf8_lossy(&cdata.into_inner()));
            },
            Ok(Event::End(_)) => {
                let Some(name) = path.pop() else {
                    break;
                };
                let value = text.trim().to_string();
                text.clear();
                match name.as_str() {
                    "category" => {
                        if let Some((domain, nicename)) = term_attrs.take() {
                            let mut data = EntityData::new();
                            data.insert("taxonomy".to_string(), Value::String(domain));
                            data.insert("slug".to_string(), Value::String(nicename));
                            data.insert("name".to_string(), Value::String(value));
                            terms.push(data);
                        }
                    },
                    "wp:meta_key" if in_element(&path, "wp:postmeta") => {
                        meta.insert("meta_key".to_string(), Value::String(value));
                    },
                    "wp:meta_value" if in_element(&path, "wp:postmeta") => {
                        meta.insert("meta_value".to_string(), Value::String(value));
                    },
                    "wp:postmeta" => {
                        metas.push(std::mem::take(&mut meta));
                    },
                    "wp:comment" => {
                        comments.push(std::mem::take(&mut comment));
                    },
                    other if in_element(&path, "wp:comment") => {
                        if let Some(field) = other.strip_prefix("wp:") {
                            comment.insert(field.to_string(), Value::String(value));
                        }
                    },
                    other if path.len() == 1 => {
                        if let Some((_, field)) =
                            POST_FIELDS.iter().find(|(element, _)| *element == other)
                        {
                            fields.push(((*field).to_string(), value));
                        }
                    },
                    _ => {},
                }
            },
            Ok(Event::Eof) => break,
            Ok(_) => {},
            Err(e) => {
                return Err(Error::Source(format!("malformed XML in {identity}: {e}")));
            },
        }
    }

    let mut data = EntityData::new();
    for (_, field) in POST_FIELDS {
        if let Some((_, value)) = fields.iter().find(|(name, _)| name == field) {
            if field == "menu_order" {
                if let Ok(order) = value.parse::<i64>() {
                    data.insert(field.to_string(), Value::from(order));
                    continue;
                }
            }
            data.insert(field.to_string(), Value::String(value.clone()));
        }
    }

    let mut entities = vec![Entity::post(data, identity)];
    for (index, term) in terms.into_iter().enumerate() {
        entities.push(Entity::new(EntityKind::Term, term, format!("{identity}#term{index}")));
    }
    for (index, meta) in metas.into_iter().enumerate() {
        entities.push(Entity::new(
            EntityKind::PostMeta,
            meta,
            format!("{identity}#meta{index}"),
        ));
    }
    for (index, comment) in comments.into_iter().enumerate() {
        entities.push(Entity::new(
            EntityKind::Comment,
            comment,
            format!("{identity}#comment{index}"),
        ));
    }
    Ok(entities)
}

fn in_element(path: &[String], name: &str) -> bool {
    path.last().is_some_and(|last| last == name)
}

fn attribute(start: &quick_xml::events::BytesStart<'_>, name: &str) -> Result<Option<String>, Error> {
    start
        .try_get_attribute(name)
        .map_err(|e| Error::Source(format!("bad attribute {name}: {e}")))?
        .map(|attr| {
            attr.unescape_value()
                .map(|value| value.into_owned())
                .map_err(|e| Error::Source(format!("bad attribute value {name}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const ITEM: &str = r#"<item>
      <title>First Post</title>
      <guid>https://legacy.example/?p=10</guid>
      <content:encoded><![CDATA[<p>Hello <img src="https://legacy.example/a.png"></p>]]></content:encoded>
      <wp:post_date_gmt>2024-02-03 04:05:06</wp:post_date_gmt>
      <wp:status>publish</wp:status>
      <wp:post_type>post</wp:post_type>
      <wp:post_name>first-post</wp:post_name>
      <category domain="category" nicename="news">News</category>
      <wp:postmeta>
        <wp:meta_key>_thumbnail_id</wp:meta_key>
        <wp:meta_value>42</wp:meta_value>
      </wp:postmeta>
      <wp:comment>
        <wp:comment_author>Ada</wp:comment_author>
        <wp:comment_content>Nice!</wp:comment_content>
      </wp:comment>
    </item>"#;

    fn wrap(items: &str) -> String {
        format!("<rss><channel><title>Site</title>{items}</channel></rss>")
    }

    fn drain(reader: &mut WxrReader) -> Vec<Entity> {
        let mut out = Vec::new();
        while reader.next_entity() {
            out.push(reader.entity().unwrap().clone());
        }
        out
    }

    #[test]
    fn test_single_item_decodes_post_terms_meta_comments() {
        let mut reader = WxrReader::new();
        reader.append_bytes(wrap(ITEM).as_bytes());
        reader.input_finished();

        let entities = drain(&mut reader);
        assert!(reader.is_finished());
        assert!(reader.last_error().is_none());

        let kinds: Vec<EntityKind> = entities.iter().map(Entity::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EntityKind::Post,
                EntityKind::Term,
                EntityKind::PostMeta,
                EntityKind::Comment
            ]
        );

        let post = &entities[0];
        assert_eq!(post.str_field("post_title"), Some("First Post"));
        assert_eq!(post.str_field("slug"), Some("first-post"));
        assert!(post.str_field("post_content").unwrap().contains("legacy.example/a.png"));

        let term = &entities[1];
        assert_eq!(term.str_field("taxonomy"), Some("category"));
        assert_eq!(term.str_field("slug"), Some("news"));
        assert_eq!(term.str_field("name"), Some("News"));

        assert_eq!(entities[2].str_field("meta_key"), Some("_thumbnail_id"));
        assert_eq!(entities[3].str_field("comment_author"), Some("Ada"));
    }

    #[test]
    fn test_chunked_feeding_pauses_between_entities() {
        let document = wrap(&format!("{ITEM}{}", ITEM.replace("First", "Second")));
        let bytes = document.as_bytes();
        let mut reader = WxrReader::new();

        let mut produced = 0;
        for chunk in bytes.chunks(64) {
            // Between chunks the reader either produces entities or reports
            // that it needs more bytes; it never errors on a partial item.
            while reader.next_entity() {
                produced += 1;
            }
            assert!(reader.last_error().is_none());
            assert!(!reader.is_finished());
            reader.append_bytes(chunk);
        }
        reader.input_finished();
        while reader.next_entity() {
            produced += 1;
        }

        assert_eq!(produced, 8);
        assert!(reader.is_finished());
        assert!(reader.last_error().is_none());
    }

    #[test]
    fn test_attachment_post_carries_attachment_url() {
        let item = r#"<item>
          <title>Logo</title>
          <wp:post_type>attachment</wp:post_type>
          <wp:attachment_url>https://legacy.example/uploads/logo.png</wp:attachment_url>
        </item>"#;
        let mut reader = WxrReader::new();
        reader.append_bytes(wrap(item).as_bytes());
        reader.input_finished();

        let entities = drain(&mut reader);
        assert_eq!(entities.len(), 1);
        assert!(entities[0].is_attachment_post());
        assert_eq!(
            entities[0].str_field("attachment_url"),
            Some("https://legacy.example/uploads/logo.png")
        );
    }

    #[test]
    fn test_truncated_item_sets_sticky_error() {
        let mut reader = WxrReader::new();
        reader.append_bytes(b"<rss><channel><item><title>Broken</title>");
        reader.input_finished();

        assert!(!reader.next_entity());
        assert!(reader.is_finished());
        assert!(matches!(reader.last_error(), Some(Error::Source(_))));
    }

    #[test]
    fn test_cursor_advances_past_consumed_items() {
        let document = wrap(ITEM);
        let mut reader = WxrReader::new();
        reader.append_bytes(document.as_bytes());
        reader.input_finished();

        assert_eq!(reader.cursor().as_str(), "0");
        while reader.next_entity() {}
        let resumed_at: u64 = reader.cursor().as_str().parse().unwrap();
        let item_end = document.find("</item>").unwrap() + "</item>".len();
        assert_eq!(resumed_at, item_end as u64);
    }

    #[test]
    fn test_append_after_finish_is_ignored() {
        let mut reader = WxrReader::new();
        reader.append_bytes(wrap("").as_bytes());
        reader.input_finished();
        reader.append_bytes(b"<item>late</item>");

        assert!(!reader.next_entity());
        assert!(reader.is_finished());
        assert!(reader.last_error().is_none());
    }
}
