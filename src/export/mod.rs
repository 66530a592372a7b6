//! Document mutation engine: applies approved fix operations to the parsed
//! export tree and re-serializes it for re-import.
//!
//! The two schemas disagree on every mapping detail (attribute names,
//! precision, units, key encoding), so each lives behind its own
//! `DialectMapping`; the apply loop itself is schema-agnostic. Entries are
//! indexed once into stable child positions rather than re-queried per
//! operation.

pub mod rekordbox;
pub mod traktor;

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::fixes::{FixEntry, FixOperation};
use crate::library::xml::{self, XmlDocument, XmlElement, XmlNode};
use crate::library::Dialect;
use crate::{qualified_id, LibraryError, Result, TrackSource};

/// What happened when the approved operations were applied.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MutationReport {
    pub applied_count: usize,
    /// Operations whose target was absent or whose mutation the schema
    /// cannot express. Recorded, never thrown.
    pub skipped_track_ids: Vec<String>,
    pub removed_track_ids: Vec<String>,
}

pub enum ApplyOutcome {
    Applied,
    Unsupported(&'static str),
}

/// Schema-specific half of the mutation protocol.
pub trait DialectMapping: Sync {
    fn source(&self) -> TrackSource;
    fn declaration(&self) -> &'static str;
    fn entry_name(&self) -> &'static str;
    /// Name of the collection's total-entry-count attribute.
    fn count_attr(&self) -> &'static str;
    fn native_id(&self, el: &XmlElement) -> Option<String>;
    /// Applies one value mutation to a track element. Removal is structural
    /// and handled by the engine itself.
    fn apply(&self, el: &mut XmlElement, operation: &FixOperation) -> ApplyOutcome;
}

pub fn mapping_for(dialect: Dialect) -> &'static dyn DialectMapping {
    match dialect {
        Dialect::Rekordbox => &rekordbox::RekordboxMapping,
        Dialect::Traktor => &traktor::TraktorMapping,
    }
}

pub struct MutationEngine<'a> {
    mapping: &'a dyn DialectMapping,
    doc: &'a mut XmlDocument,
    /// Source-qualified track id -> child position inside the collection.
    index: HashMap<String, usize>,
    tombstones: HashSet<usize>,
}

impl<'a> MutationEngine<'a> {
    pub fn new(doc: &'a mut XmlDocument, mapping: &'a dyn DialectMapping) -> Result<Self> {
        let collection = doc
            .root
            .child("COLLECTION")
            .ok_or_else(|| LibraryError::UnsupportedDocument("missing COLLECTION".into()))?;

        let mut index = HashMap::new();
        for (position, node) in collection.children.iter().enumerate() {
            let XmlNode::Element(el) = node else {
                continue;
            };
            if el.name != mapping.entry_name() {
                continue;
            }
            if let Some(native) = mapping.native_id(el) {
                // First occurrence wins for colliding native ids.
                index
                    .entry(qualified_id(mapping.source(), &native))
                    .or_insert(position);
            }
        }

        Ok(Self {
            mapping,
            doc,
            index,
            tombstones: HashSet::new(),
        })
    }

    pub fn track_count(&self) -> usize {
        self.index.len()
    }

    /// Applies the given operations in order. Callers pass approved entries
    /// only; a missing or already-removed target lands in the report, never
    /// in an error.
    pub fn apply(&mut self, entries: &[FixEntry]) -> MutationReport {
        let mapping = self.mapping;
        let mut report = MutationReport::default();
        for entry in entries {
            let Some(&position) = self.index.get(&entry.track_id) else {
                log::warn!("fix target {} not in document; skipping", entry.track_id);
                report.skipped_track_ids.push(entry.track_id.clone());
                continue;
            };
            match &entry.operation {
                FixOperation::DuplicateRemove => {
                    self.tombstones.insert(position);
                    self.index.remove(&entry.track_id);
                    self.decrement_count();
                    report.removed_track_ids.push(entry.track_id.clone());
                    report.applied_count += 1;
                }
                operation => {
                    let Some(el) = self.entry_mut(position) else {
                        report.skipped_track_ids.push(entry.track_id.clone());
                        continue;
                    };
                    match mapping.apply(el, operation) {
                        ApplyOutcome::Applied => report.applied_count += 1,
                        ApplyOutcome::Unsupported(reason) => {
                            log::warn!(
                                "{} fix unsupported for {}: {}",
                                operation.label(),
                                entry.track_id,
                                reason
                            );
                            report.skipped_track_ids.push(entry.track_id.clone());
                        }
                    }
                }
            }
        }
        log::info!(
            "applied {} fix(es), skipped {}, removed {}",
            report.applied_count,
            report.skipped_track_ids.len(),
            report.removed_track_ids.len()
        );
        report
    }

    /// Drops removed entries and serializes the document, prefixing the
    /// dialect's declaration when the original had none.
    pub fn finish(self) -> Result<String> {
        if !self.tombstones.is_empty() {
            if let Some(collection) = self.doc.root.child_mut("COLLECTION") {
                let tombstones = &self.tombstones;
                let mut position = 0;
                collection.children.retain(|_| {
                    let keep = !tombstones.contains(&position);
                    position += 1;
                    keep
                });
            }
        }
        xml::to_string(self.doc, self.mapping.declaration())
    }

    fn entry_mut(&mut self, position: usize) -> Option<&mut XmlElement> {
        let collection = self.doc.root.child_mut("COLLECTION")?;
        match collection.children.get_mut(position) {
            Some(XmlNode::Element(el)) => Some(el),
            _ => None,
        }
    }

    fn decrement_count(&mut self) {
        let attr = self.mapping.count_attr();
        if let Some(collection) = self.doc.root.child_mut("COLLECTION") {
            if let Some(current) = collection.parse_attr::<i64>(attr) {
                collection.set_attr(attr, (current - 1).max(0).to_string());
            }
        }
    }
}

/// One-shot convenience over parse -> apply -> serialize.
pub fn apply_fixes(
    doc: &mut XmlDocument,
    dialect: Dialect,
    entries: &[FixEntry],
) -> Result<(String, MutationReport)> {
    let mapping = mapping_for(dialect);
    let mut engine = MutationEngine::new(doc, mapping)?;
    let report = engine.apply(entries);
    let text = engine.finish()?;
    Ok((text, report))
}
