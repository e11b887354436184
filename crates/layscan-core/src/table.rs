//! Output assembly: ordered tabular output from a batch of records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One flattened entry of the record stream the image pipeline emits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordEntry {
    /// Record (document) identifier.
    pub document: String,
    /// Section the category belongs to.
    pub section: String,
    /// Field name within the section.
    pub category: String,
    /// Raw extracted value.
    pub value: String,
}

/// A batch of records sharing one schema section.
///
/// Records are keyed by identifier; each record's fields keep their
/// insertion order, which is the source order used for columns the
/// priority list does not mention.
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    records: BTreeMap<String, Vec<(String, String)>>,
}

impl RecordBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace one field of one record.
    pub fn insert(&mut self, id: &str, field: &str, value: impl Into<String>) {
        let fields = self.records.entry(id.to_string()).or_default();
        match fields.iter_mut().find(|(name, _)| name == field) {
            Some((_, existing)) => *existing = value.into(),
            None => fields.push((field.to_string(), value.into())),
        }
    }

    /// Add a whole record, replacing any previous fields for `id`.
    pub fn insert_record(&mut self, id: &str, fields: Vec<(String, String)>) {
        self.records.insert(id.to_string(), fields);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Records in identifier order, mutably; used to evaluate derived
    /// values in place before assembly.
    pub fn records_mut(&mut self) -> impl Iterator<Item = (&String, &mut Vec<(String, String)>)> {
        self.records.iter_mut()
    }
}

/// An assembled table: header row plus data rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Assemble a batch into an ordered table.
///
/// The first column is the record identifier under `id_header`. The
/// remaining columns are every distinct field name observed across the
/// batch: fields on the priority list come first in list order, the
/// rest follow in source order. Rows are sorted by identifier,
/// case-sensitive lexical order. A record missing a field yields an
/// empty cell.
pub fn assemble(batch: &RecordBatch, id_header: &str, priority: &[String]) -> Table {
    let mut observed: Vec<String> = Vec::new();
    for fields in batch.records.values() {
        for (name, _) in fields {
            if !observed.contains(name) {
                observed.push(name.clone());
            }
        }
    }

    let mut ranked: Vec<((usize, usize), String)> = observed
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let key = match priority.iter().position(|p| *p == name) {
                Some(p) => (0, p),
                None => (1, i),
            };
            (key, name)
        })
        .collect();
    ranked.sort_by_key(|(key, _)| *key);
    let observed: Vec<String> = ranked.into_iter().map(|(_, name)| name).collect();

    let mut headers = Vec::with_capacity(observed.len() + 1);
    headers.push(id_header.to_string());
    headers.extend(observed.iter().cloned());

    let rows = batch
        .records
        .iter()
        .map(|(id, fields)| {
            let mut row = Vec::with_capacity(headers.len());
            row.push(id.clone());
            for column in &observed {
                let value = fields
                    .iter()
                    .find(|(name, _)| name == column)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default();
                row.push(value);
            }
            row
        })
        .collect();

    Table { headers, rows }
}

/// Group a flattened record stream by section, preserving entry order
/// within each record.
pub fn group_by_section(entries: &[RecordEntry]) -> BTreeMap<String, RecordBatch> {
    let mut sections: BTreeMap<String, RecordBatch> = BTreeMap::new();
    for entry in entries {
        sections
            .entry(entry.section.clone())
            .or_default()
            .insert(&entry.document, &entry.category, entry.value.clone());
    }
    sections
}
