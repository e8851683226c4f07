//! Run-wide classification tables
//!
//! A [`ResultSet`] is created by the orchestrator, shared with every service
//! and dependency task through cheap clones, and read back once all tasks
//! have finished. Appends take a single run-wide lock for the duration of the
//! append only.

use crate::coordinate::Coordinate;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// One of the outcome tables a coordinate can land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// Every coordinate a service declared
    Known,
    /// Resolved, but no source artifact was found
    WithoutSource,
    /// Internal project exists, no tag matches the version
    UnknownInternalVersion,
    /// Not found in any external repository
    Unknown,
    /// Internal namespace, project does not exist (or its download failed twice)
    UnknownInternal,
}

impl Bucket {
    pub const ALL: [Bucket; 5] = [
        Bucket::Known,
        Bucket::WithoutSource,
        Bucket::UnknownInternalVersion,
        Bucket::Unknown,
        Bucket::UnknownInternal,
    ];
}

type Table = BTreeMap<String, Vec<String>>;

#[derive(Debug, Default)]
struct Tables {
    known: Table,
    without_source: Table,
    unknown_internal_version: Table,
    unknown: Table,
    unknown_internal: Table,
    unknown_projects: Vec<String>,
}

impl Tables {
    fn table_mut(&mut self, bucket: Bucket) -> &mut Table {
        match bucket {
            Bucket::Known => &mut self.known,
            Bucket::WithoutSource => &mut self.without_source,
            Bucket::UnknownInternalVersion => &mut self.unknown_internal_version,
            Bucket::Unknown => &mut self.unknown,
            Bucket::UnknownInternal => &mut self.unknown_internal,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    inner: Arc<Mutex<Tables>>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // A panicking appender cannot leave a table half-written.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, service: &str, bucket: Bucket, coordinate: &Coordinate) {
        self.lock()
            .table_mut(bucket)
            .entry(service.to_string())
            .or_default()
            .push(coordinate.to_string());
    }

    /// Records `coordinate` in several buckets under one lock acquisition.
    pub fn record_all(&self, service: &str, buckets: &[Bucket], coordinate: &Coordinate) {
        let gav = coordinate.to_string();
        let mut tables = self.lock();
        for bucket in buckets {
            tables
                .table_mut(*bucket)
                .entry(service.to_string())
                .or_default()
                .push(gav.clone());
        }
    }

    pub fn record_unknown_project(&self, service: &str) {
        self.lock().unknown_projects.push(service.to_string());
    }

    /// Deduplicated copy of all tables.
    pub fn snapshot(&self) -> ResultSnapshot {
        let tables = self.lock();
        ResultSnapshot {
            known: dedup_table(&tables.known),
            without_source: dedup_table(&tables.without_source),
            unknown_internal_version: dedup_table(&tables.unknown_internal_version),
            unknown: dedup_table(&tables.unknown),
            unknown_internal: dedup_table(&tables.unknown_internal),
            unknown_projects: dedup(&tables.unknown_projects),
        }
    }
}

/// Immutable, deduplicated view handed to the report writer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultSnapshot {
    pub known: Table,
    pub without_source: Table,
    pub unknown_internal_version: Table,
    pub unknown: Table,
    pub unknown_internal: Table,
    pub unknown_projects: Vec<String>,
}

impl ResultSnapshot {
    pub fn table(&self, bucket: Bucket) -> &Table {
        match bucket {
            Bucket::Known => &self.known,
            Bucket::WithoutSource => &self.without_source,
            Bucket::UnknownInternalVersion => &self.unknown_internal_version,
            Bucket::Unknown => &self.unknown,
            Bucket::UnknownInternal => &self.unknown_internal,
        }
    }

    pub fn entries(&self, bucket: Bucket, service: &str) -> &[String] {
        self.table(bucket)
            .get(service)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Order-preserving deduplication.
pub fn dedup(items: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}

fn dedup_table(table: &Table) -> Table {
    table
        .iter()
        .map(|(service, entries)| (service.clone(), dedup(entries)))
        .collect()
}
