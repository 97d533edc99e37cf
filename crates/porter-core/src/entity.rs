//! Core data types for migrated content.
//!
//! An [`Entity`] is one typed, ordered unit of imported content: a post, a
//! comment, a term, a piece of post meta, or an attachment record. Entities
//! are produced by readers in source order, rewritten by the orchestrator,
//! and consumed by the importer — they are never retained past one pipeline
//! pass.

use serde::{Deserialize, Serialize};

/// Ordered field map carried by an [`Entity`].
///
/// `serde_json::Map` preserves insertion order (the `preserve_order`
/// feature), which keeps entity fields in the order the source produced
/// them.
pub type EntityData = serde_json::Map<String, serde_json::Value>;

/// The type of a migrated content unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A post, page, or attachment post record.
    Post,
    /// A comment attached to a post.
    Comment,
    /// A taxonomy term (category, tag).
    Term,
    /// A single post meta key/value.
    PostMeta,
    /// A standalone attachment reference.
    Attachment,
}

impl EntityKind {
    /// Stable identifier used in logs and serialized output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Comment => "comment",
            Self::Term => "term",
            Self::PostMeta => "post_meta",
            Self::Attachment => "attachment",
        }
    }
}

/// One structured unit of migrated content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    kind: EntityKind,
    data: EntityData,
    /// Opaque token identifying this entity's place in the source (file
    /// path, XML byte offset). Used for dedup and cursor resumption.
    source_identity: String,
}

impl Entity {
    /// Creates an entity of the given kind.
    #[must_use]
    pub fn new(kind: EntityKind, data: EntityData, source_identity: impl Into<String>) -> Self {
        Self {
            kind,
            data,
            source_identity: source_identity.into(),
        }
    }

    /// Shorthand for a `Post` entity.
    #[must_use]
    pub fn post(data: EntityData, source_identity: impl Into<String>) -> Self {
        Self::new(EntityKind::Post, data, source_identity)
    }

    /// The entity's kind.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        self.kind
    }

    /// The ordered field map.
    #[must_use]
    pub const fn data(&self) -> &EntityData {
        &self.data
    }

    /// Replaces the field map wholesale.
    ///
    /// The orchestrator replaces (never merges) entity data after URL
    /// rewriting.
    pub fn set_data(&mut self, data: EntityData) {
        self.data = data;
    }

    /// The opaque source position token.
    #[must_use]
    pub fn source_identity(&self) -> &str {
        &self.source_identity
    }

    /// A string field, if present and a string.
    #[must_use]
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(serde_json::Value::as_str)
    }

    /// Whether this entity is an attachment-type post (a post record whose
    /// binary lives at `attachment_url`).
    #[must_use]
    pub fn is_attachment_post(&self) -> bool {
        self.kind == EntityKind::Attachment
            || (self.kind == EntityKind::Post
                && self.str_field("post_type") == Some("attachment"))
    }
}
