//! In-memory record cache keyed by ingestion timestamp.
//!
//! Keys are issued strictly increasing, so iterating the map in key order is
//! iterating in insertion order. Two records stamped in the same microsecond
//! (or across a backwards clock step) get consecutive keys instead of
//! overwriting each other.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use contracts::{ContractError, DestinationId, Record, RecordKey};
use serde_json::Value;
use tracing::{debug, info};

/// One buffered record and the destinations that already attempted it
#[derive(Debug, Clone)]
pub struct CacheEntry {
    record: Record,
    attempted_by: HashSet<DestinationId>,
}

impl CacheEntry {
    fn new(record: Record) -> Self {
        Self {
            record,
            attempted_by: HashSet::new(),
        }
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn is_attempted_by(&self, destination: &str) -> bool {
        self.attempted_by.contains(destination)
    }

    pub fn attempted_by(&self) -> impl Iterator<Item = &DestinationId> {
        self.attempted_by.iter()
    }
}

/// Timestamp-keyed record buffer
#[derive(Default)]
pub struct RecordCache {
    entries: BTreeMap<RecordKey, CacheEntry>,
    /// Last issued key; survives `clear` so keys never repeat
    last_key: Option<RecordKey>,
    max_records: Option<usize>,
    evicted_count: u64,
}

impl fmt::Debug for RecordCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordCache")
            .field("len", &self.entries.len())
            .field("max_records", &self.max_records)
            .field("evicted", &self.evicted_count)
            .finish()
    }
}

impl RecordCache {
    /// Unbounded cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache holding at most `max_records` entries (None = unbounded)
    pub fn with_limit(max_records: Option<usize>) -> Self {
        Self {
            max_records,
            ..Self::default()
        }
    }

    /// Validate, stamp and insert a producer payload
    ///
    /// # Errors
    /// [`ContractError::InvalidInput`] if `value` is not a JSON object; the
    /// cache is left untouched.
    pub fn append(&mut self, value: Value, at: DateTime<Utc>) -> Result<RecordKey, ContractError> {
        let record = Record::try_from_value(value)?;
        Ok(self.insert(record, at))
    }

    /// Stamp and insert an already-validated record
    pub fn insert(&mut self, mut record: Record, at: DateTime<Utc>) -> RecordKey {
        let key = self.next_key(at);
        record.stamp(key);

        info!(
            key = %key,
            fields = record.len(),
            cache_size = self.entries.len() + 1,
            "Added record"
        );

        self.entries.insert(key, CacheEntry::new(record));
        key
    }

    fn next_key(&mut self, at: DateTime<Utc>) -> RecordKey {
        let stamped = RecordKey::from_datetime(at);
        let key = match self.last_key {
            Some(last) if stamped <= last => {
                debug!(stamped = %stamped, issued = %last.successor(), "Timestamp collision, bumping key");
                last.successor()
            }
            _ => stamped,
        };
        self.last_key = Some(key);
        key
    }

    /// Entries not yet attempted by `destination`, in insertion order
    pub fn unattempted_for<'a>(
        &'a self,
        destination: &'a str,
    ) -> impl Iterator<Item = (RecordKey, &'a Record)> + 'a {
        self.entries
            .iter()
            .filter(move |(_, entry)| !entry.is_attempted_by(destination))
            .map(|(key, entry)| (*key, &entry.record))
    }

    /// Record that `destination` attempted these entries
    ///
    /// Unknown keys are ignored. Returns how many entries were marked.
    pub fn mark_attempted(&mut self, keys: &[RecordKey], destination: &DestinationId) -> usize {
        let mut marked = 0;
        for key in keys {
            if let Some(entry) = self.entries.get_mut(key) {
                entry.attempted_by.insert(destination.clone());
                marked += 1;
            }
        }
        marked
    }

    /// Drop every entry; returns how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    /// Evict down to the configured limit
    ///
    /// Prefers the oldest entry every destination has attempted, then the
    /// oldest entry overall. Returns the evicted keys.
    pub fn evict_to_limit(&mut self, destinations: &[DestinationId]) -> Vec<RecordKey> {
        let Some(limit) = self.max_records else {
            return Vec::new();
        };

        let mut evicted = Vec::new();
        while self.entries.len() > limit {
            let victim = self
                .entries
                .iter()
                .find(|(_, entry)| destinations.iter().all(|d| entry.is_attempted_by(d)))
                .map(|(key, _)| *key)
                .or_else(|| self.entries.keys().next().copied());

            match victim {
                Some(key) => {
                    self.entries.remove(&key);
                    evicted.push(key);
                }
                None => break,
            }
        }

        self.evicted_count += evicted.len() as u64;
        evicted
    }

    pub fn get(&self, key: &RecordKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RecordKey, &CacheEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_records(&self) -> Option<usize> {
        self.max_records
    }

    /// Total entries evicted by the size limit
    pub fn evicted_count(&self) -> u64 {
        self.evicted_count
    }
}
