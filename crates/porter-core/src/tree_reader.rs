//! Entity reader over a filesystem tree of documents.
//!
//! Walks a directory recursively in deterministic (sorted, depth-first)
//! order and produces one `Post` entity per convertible file. Discovery is
//! chunked: the walk pauses once roughly `chunk_size` pending file paths are
//! buffered, so arbitrarily large trees stream without unbounded buffering
//! of the whole listing. Re-reading
//! the same tree yields entities in the same order, which is what makes the
//! count-based cursor meaningful.

use crate::entity::{Entity, EntityData};
use crate::error::Error;
use crate::format::SourceFormat;
use crate::reader::{Cursor, EntityReader};
use serde_json::Value;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default number of file paths discovered per refill.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Recursive directory reader producing one `Post` entity per document.
pub struct DirectoryTreeReader {
    root: PathBuf,
    /// Directories awaiting descent, most recently discovered last.
    dirs: Vec<PathBuf>,
    /// Discovered files not yet turned into entities.
    pending: VecDeque<PathBuf>,
    chunk_size: usize,
    /// Entities to silently skip before producing (cursor resumption).
    skip: u64,
    emitted: u64,
    current: Option<Entity>,
    finished: bool,
    error: Option<Error>,
}

impl DirectoryTreeReader {
    /// Creates a reader over `root` with the default discovery chunk size.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_chunk_size(root, DEFAULT_CHUNK_SIZE)
    }

    /// Creates a reader over `root`, pausing discovery once `chunk_size`
    /// file paths are buffered (the bound is per directory, so a single
    /// large directory may briefly exceed it).
    #[must_use]
    pub fn with_chunk_size(root: impl Into<PathBuf>, chunk_size: usize) -> Self {
        let root = root.into();
        Self {
            dirs: vec![root.clone()],
            root,
            pending: VecDeque::new(),
            chunk_size: chunk_size.max(1),
            skip: 0,
            emitted: 0,
            current: None,
            finished: false,
            error: None,
        }
    }

    /// Resumes from a cursor previously returned by [`EntityReader::cursor`].
    ///
    /// Entities before the cursor position are skipped without reading their
    /// file contents. An unparseable cursor resumes from the start.
    #[must_use]
    pub fn resume_from(mut self, cursor: &Cursor) -> Self {
        self.skip = cursor.as_str().parse().unwrap_or(0);
        self.emitted = self.skip;
        self
    }

    /// Discovers more files until the pending set reaches the chunk size or
    /// the walk is exhausted.
    fn refill(&mut self) {
        while self.pending.len() < self.chunk_size {
            let Some(dir) = self.dirs.pop() else {
                return;
            };
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    self.fail(Error::Source(format!(
                        "cannot list {}: {e}",
                        dir.display()
                    )));
                    return;
                },
            };

            let mut paths: Vec<PathBuf> = entries
                .filter_map(std::result::Result::ok)
                .map(|entry| entry.path())
                .filter(|path| !is_hidden(path))
                .collect();
            paths.sort();

            // Descend into subdirectories after this directory's own files;
            // pushing in reverse keeps the walk in ascending order.
            for path in paths.iter().rev().filter(|p| p.is_dir()) {
                self.dirs.push(path.clone());
            }
            for path in paths.into_iter().filter(|p| p.is_file()) {
                if extension_format(&path).is_some() {
                    self.pending.push_back(path);
                } else {
                    debug!(path = %path.display(), "skipping non-convertible file");
                }
            }
        }
    }

    fn produce(&mut self, path: &Path) -> Result<Entity, Error> {
        let format = extension_format(path)
            .ok_or_else(|| Error::Source(format!("no converter for {}", path.display())))?;
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Source(format!("cannot read {}: {e}", path.display())))?;
        let fields = format.extract_fields(&content);

        let relative = path
            .strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();
        let slug = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut data = EntityData::new();
        data.insert(
            "post_title".to_string(),
            Value::String(fields.title.unwrap_or_else(|| slug.clone())),
        );
        data.insert("post_content".to_string(), Value::String(fields.body));
        data.insert("post_status".to_string(), Value::String("publish".to_string()));
        data.insert("post_type".to_string(), Value::String("post".to_string()));
        data.insert("slug".to_string(), Value::String(slug));
        if let Some(date) = fields.date_gmt {
            data.insert("post_date_gmt".to_string(), Value::String(date));
        }
        if let Some(order) = fields.menu_order {
            data.insert("menu_order".to_string(), Value::from(order));
        }
        data.insert(
            "source_format".to_string(),
            Value::String(
                match format {
                    SourceFormat::Markdown => "markdown",
                    SourceFormat::Html => "html",
                }
                .to_string(),
            ),
        );

        Ok(Entity::post(data, relative))
    }

    fn fail(&mut self, error: Error) {
        self.error = Some(error);
        self.finished = true;
        self.current = None;
        self.pending.clear();
        self.dirs.clear();
    }
}

impl EntityReader for DirectoryTreeReader {
    fn next_entity(&mut self) -> bool {
        if self.finished {
            return false;
        }
        loop {
            if self.pending.is_empty() {
                self.refill();
                if self.error.is_some() {
                    return false;
                }
            }
            let Some(path) = self.pending.pop_front() else {
                self.finished = true;
                self.current = None;
                return false;
            };
            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }
            match self.produce(&path) {
                Ok(entity) => {
                    self.emitted += 1;
                    self.current = Some(entity);
                    return true;
                },
                Err(error) => {
                    self.fail(error);
                    return false;
                },
            }
        }
    }

    fn entity(&self) -> Option<&Entity> {
        self.current.as_ref()
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn last_error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    fn cursor(&self) -> Cursor {
        Cursor::at(self.emitted.to_string())
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

fn extension_format(path: &Path) -> Option<SourceFormat> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(SourceFormat::from_extension)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.md"), "# Bravo\n\nBody b.").unwrap();
        fs::write(dir.path().join("a.md"), "# Alpha\n\nBody a.").unwrap();
        fs::write(dir.path().join("notes.txt"), "not convertible").unwrap();
        fs::write(dir.path().join(".hidden.md"), "# Hidden").unwrap();
        fs::create_dir(dir.path().join("guides")).unwrap();
        fs::write(
            dir.path().join("guides").join("c.html"),
            "<title>Charlie</title><p>Body c.</p>",
        )
        .unwrap();
        dir
    }

    fn drain(reader: &mut DirectoryTreeReader) -> Vec<(String, String)> {
        let mut out = Vec::new();
        while reader.next_entity() {
            let entity = reader.entity().unwrap();
            out.push((
                entity.str_field("post_title").unwrap().to_string(),
                entity.source_identity().to_string(),
            ));
        }
        out
    }

    #[test]
    fn test_walks_in_sorted_order_one_entity_per_file() {
        let dir = fixture_tree();
        let mut reader = DirectoryTreeReader::new(dir.path());
        let entities = drain(&mut reader);

        assert_eq!(
            entities,
            vec![
                ("Alpha".to_string(), "a.md".to_string()),
                ("Bravo".to_string(), "b.md".to_string()),
                ("Charlie".to_string(), format!("guides{}c.html", std::path::MAIN_SEPARATOR)),
            ]
        );
        assert!(reader.is_finished());
        assert!(reader.last_error().is_none());
    }

    #[test]
    fn test_small_chunk_size_streams_everything() {
        let dir = fixture_tree();
        let mut reader = DirectoryTreeReader::with_chunk_size(dir.path(), 1);
        assert_eq!(drain(&mut reader).len(), 3);
    }

    #[test]
    fn test_two_instances_yield_identical_streams() {
        let dir = fixture_tree();
        let first = drain(&mut DirectoryTreeReader::new(dir.path()));
        let second = drain(&mut DirectoryTreeReader::new(dir.path()));
        assert_eq!(first, second);
    }

    #[test]
    fn test_cursor_resumption_skips_consumed_entities() {
        let dir = fixture_tree();
        let mut reader = DirectoryTreeReader::new(dir.path());
        assert!(reader.next_entity());
        assert!(reader.next_entity());
        let cursor = reader.cursor();
        assert_eq!(cursor.as_str(), "2");

        let mut resumed = DirectoryTreeReader::new(dir.path()).resume_from(&cursor);
        let remaining = drain(&mut resumed);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0, "Charlie");
    }

    #[test]
    fn test_missing_root_sets_sticky_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let mut reader = DirectoryTreeReader::new(&missing);

        assert!(!reader.next_entity());
        assert!(reader.is_finished());
        assert!(matches!(reader.last_error(), Some(Error::Source(_))));
        // The error is sticky.
        assert!(!reader.next_entity());
        assert!(reader.last_error().is_some());
    }

    #[test]
    fn test_markdown_front_matter_fields_flow_through() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("post.md"),
            "---\ntitle: Styled\nmenu_order: 7\n---\nBody.",
        )
        .unwrap();
        let mut reader = DirectoryTreeReader::new(dir.path());
        assert!(reader.next_entity());
        let entity = reader.entity().unwrap();
        assert_eq!(entity.str_field("post_title"), Some("Styled"));
        assert_eq!(
            entity.data().get("menu_order").and_then(serde_json::Value::as_i64),
            Some(7)
        );
        assert_eq!(entity.str_field("source_format"), Some("markdown"));
    }
}
