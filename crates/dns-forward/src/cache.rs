use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use dns_wire::protocol::types::{Question, ResourceRecord, Section, SectionCounts};

/// A convenience wrapper around a `Cache` which lets it be shared
/// between tasks.
///
/// Invoking `clone` on a `SharedCache` gives a new instance which
/// refers to the same underlying `Cache` object.
///
/// One mutex covers both the insert and the read path: a reader can
/// never observe a partially replaced record set, and two concurrent
/// refreshes of the same key simply overwrite each other, last writer
/// wins.
#[derive(Debug, Clone, Default)]
pub struct SharedCache {
    cache: Arc<Mutex<Cache>>,
}

const MUTEX_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] cache mutex poisoned, cannot recover from this - aborting";

impl SharedCache {
    /// Make a new, empty, shared cache.
    pub fn new() -> Self {
        SharedCache {
            cache: Arc::new(Mutex::new(Cache::new())),
        }
    }

    /// Replace the record set stored under a question, wholesale.
    ///
    /// # Panics
    ///
    /// If the mutex has been poisoned.
    pub fn put(&self, key: Question, records: Vec<ResourceRecord>) {
        self.cache
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .put(key, records);
    }

    /// True iff a non-empty record set is stored under the question.
    ///
    /// # Panics
    ///
    /// If the mutex has been poisoned.
    pub fn contains(&self, key: &Question) -> bool {
        self.cache.lock().expect(MUTEX_POISON_MESSAGE).contains(key)
    }

    /// Get an entry from the cache, aged down to now.
    ///
    /// The TTLs in the returned records are relative to the current
    /// time - not to when the records were inserted into the cache.
    ///
    /// # Panics
    ///
    /// If the mutex has been poisoned.
    pub fn get(&self, key: &Question) -> Option<(Vec<ResourceRecord>, SectionCounts)> {
        self.cache.lock().expect(MUTEX_POISON_MESSAGE).get(key)
    }

    /// The records under the question whose residual TTL has dropped
    /// below the refresh threshold.
    ///
    /// # Panics
    ///
    /// If the mutex has been poisoned.
    pub fn obsolete_records(&self, key: &Question) -> Vec<ResourceRecord> {
        self.cache
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .obsolete_records(key)
    }
}

/// Caching for record sets, keyed by question.
///
/// You probably want to use `SharedCache` instead.
///
/// There is no size limit and no background sweeper: an entry lives
/// until its question is queried again and found stale, at which point
/// the whole set is replaced by the fresh upstream answer.
#[derive(Debug, Default)]
pub struct Cache {
    entries: HashMap<Question, Vec<ResourceRecord>>,
}

impl Cache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Replace the record set for a question atomically.
    pub fn put(&mut self, key: Question, records: Vec<ResourceRecord>) {
        self.entries.insert(key, records);
    }

    /// True iff a non-empty record set is currently stored.
    pub fn contains(&self, key: &Question) -> bool {
        self.entries.get(key).is_some_and(|records| !records.is_empty())
    }

    /// Age every record in the set down to now, then return a snapshot
    /// of the set along with the per-section counts of countable
    /// records.  Opaque records stay in the snapshot (they are
    /// re-emitted verbatim) but are excluded from the counts.
    pub fn get(&mut self, key: &Question) -> Option<(Vec<ResourceRecord>, SectionCounts)> {
        let now = Instant::now();
        let records = self.entries.get_mut(key)?;

        let mut counts = SectionCounts::default();
        for record in records.iter_mut() {
            record.age(now);
            if record.is_opaque() {
                continue;
            }
            match record.section {
                Section::Answer => counts.ancount += 1,
                Section::Authority => counts.nscount += 1,
                Section::Additional => counts.arcount += 1,
            }
        }

        Some((records.clone(), counts))
    }

    /// The subset of records under the question whose residual TTL is
    /// below the refresh threshold.  Does not age anything.
    pub fn obsolete_records(&self, key: &Question) -> Vec<ResourceRecord> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(records) => records
                .iter()
                .filter(|record| record.is_obsolete(now))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }
}
