//! The entity importer seam.
//!
//! Persistence into the target content store is a consumed capability, not
//! something porter implements: the orchestrator hands each rewritten
//! entity to an [`EntityImporter`] exactly once during the rewrite pass and
//! surfaces its errors as pipeline failures. The store's schema is the
//! importer's business.
//!
//! Two implementations ship with the toolkit: [`JsonLinesImporter`], a
//! filesystem sink that gives the CLI a working end-to-end target, and
//! [`RecordingImporter`], a test double.

use crate::entity::Entity;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Identity assigned to an entity by the target store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityId(pub u64);

/// Persists one entity into the target content store.
pub trait EntityImporter {
    /// Imports a single entity, returning its identity in the store.
    ///
    /// An `Err` means the store rejected the entity; whether that aborts
    /// the run is the orchestrator's caller's policy.
    fn import_entity(&mut self, entity: Entity) -> Result<EntityId>;
}

/// Appends accepted entities as JSON lines to `entities.jsonl` in a target
/// directory.
pub struct JsonLinesImporter {
    writer: BufWriter<File>,
    next_id: u64,
}

#[derive(Serialize)]
struct ImportedRecord<'a> {
    id: u64,
    kind: &'a str,
    source_identity: &'a str,
    imported_at: DateTime<Utc>,
    data: &'a crate::entity::EntityData,
}

impl JsonLinesImporter {
    /// Opens (creating or appending) `entities.jsonl` under `target_dir`.
    pub fn new(target_dir: impl AsRef<Path>) -> Result<Self> {
        let target_dir = target_dir.as_ref();
        std::fs::create_dir_all(target_dir)
            .map_err(|e| Error::Storage(format!("cannot create target dir: {e}")))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(target_dir.join("entities.jsonl"))
            .map_err(|e| Error::Storage(format!("cannot open entities.jsonl: {e}")))?;
        Ok(Self {
            writer: BufWriter::new(file),
            next_id: 1,
        })
    }
}

impl EntityImporter for JsonLinesImporter {
    fn import_entity(&mut self, entity: Entity) -> Result<EntityId> {
        let id = self.next_id;
        let record = ImportedRecord {
            id,
            kind: entity.kind().as_str(),
            source_identity: entity.source_identity(),
            imported_at: Utc::now(),
            data: entity.data(),
        };
        let line = serde_json::to_string(&record)?;
        self.writer
            .write_all(line.as_bytes())
            .and_then(|()| self.writer.write_all(b"\n"))
            .and_then(|()| self.writer.flush())
            .map_err(|e| Error::Import(format!("cannot persist entity: {e}")))?;
        self.next_id += 1;
        Ok(EntityId(id))
    }
}

/// Test importer that records everything it accepts and can be told to
/// reject a specific entity by its source identity.
#[derive(Default)]
pub struct RecordingImporter {
    accepted: Vec<Entity>,
    reject_identity: Option<String>,
}

impl RecordingImporter {
    /// A recorder that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A recorder that rejects the entity with the given source identity.
    #[must_use]
    pub fn rejecting(identity: impl Into<String>) -> Self {
        Self {
            accepted: Vec::new(),
            reject_identity: Some(identity.into()),
        }
    }

    /// Entities accepted so far, in import order.
    #[must_use]
    pub fn accepted(&self) -> &[Entity] {
        &self.accepted
    }
}

impl EntityImporter for RecordingImporter {
    fn import_entity(&mut self, entity: Entity) -> Result<EntityId> {
        if self.reject_identity.as_deref() == Some(entity.source_identity()) {
            return Err(Error::Import(format!(
                "rejected entity '{}'",
                entity.source_identity()
            )));
        }
        self.accepted.push(entity);
        Ok(EntityId(self.accepted.len() as u64))
    }
}
