//! The entity reader contract.
//!
//! A reader turns one import source into a pull-based stream of
//! [`Entity`](crate::Entity) values. The contract is deliberately shaped for
//! chunked, resumable consumption:
//!
//! - [`next_entity`](EntityReader::next_entity) returns `false` both at end
//!   of input **and** when a chunked source needs more bytes before the next
//!   entity can be decoded — callers distinguish the two via
//!   [`is_finished`](EntityReader::is_finished).
//! - Errors are sticky: once [`last_error`](EntityReader::last_error) is
//!   set, the stream is over and `is_finished` reports `true`. Drivers must
//!   check `last_error` after every loop exit, not rely on `is_finished`
//!   alone.
//! - Chunk boundaries fall only between entities, never inside one entity's
//!   data.

use crate::entity::Entity;
use crate::error::Error;
use serde::{Deserialize, Serialize};

/// Opaque, serializable position marker for resuming a reader.
///
/// Owned by the reader, exposed read-only to the orchestrator. Readers that
/// cannot support resumption return [`Cursor::none`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor(String);

impl Cursor {
    /// A cursor at the given opaque position.
    #[must_use]
    pub fn at(position: impl Into<String>) -> Self {
        Self(position.into())
    }

    /// The sentinel "no resumption supported" cursor.
    #[must_use]
    pub const fn none() -> Self {
        Self(String::new())
    }

    /// Whether this is the no-resume sentinel.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    /// The opaque position token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A pull-based, restartable-per-cursor producer of entities.
pub trait EntityReader {
    /// Attempts to produce the next entity.
    ///
    /// Returns `false` if no more input is currently available: either the
    /// source is exhausted, or (for chunked sources) more bytes are needed
    /// before the next entity can be decoded.
    fn next_entity(&mut self) -> bool;

    /// The most recently produced entity.
    ///
    /// Valid only after [`next_entity`](Self::next_entity) returned `true`.
    fn entity(&self) -> Option<&Entity>;

    /// True once the source is fully consumed and no further entities will
    /// ever be produced.
    fn is_finished(&self) -> bool;

    /// Sticky error describing why advancement stopped producing results
    /// before the source was exhausted.
    fn last_error(&self) -> Option<&Error>;

    /// Best-effort resumable position.
    fn cursor(&self) -> Cursor;
}
