//! # Bus persistence
//!
//! Durable storage for critical tier events. The contract is exactly `save(topic, timestamp_us,
//! payload)` and `load(topic)`, returning records in ascending timestamp order, so any storage
//! engine satisfying it can be substituted.
//!
//! Retention is count based: at most `max_records_per_topic` records are returned per topic, the
//! oldest are dropped first.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::bus::Payload;
use log::{debug, trace};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{hash_map::Entry, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use util::archive::{self, ArchiveError, Archiver};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Default number of records kept per topic.
pub const DEFAULT_MAX_RECORDS_PER_TOPIC: usize = 10_000;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Storage for persistent bus events.
pub trait PersistenceLayer: Send + Sync {
    /// Store one event.
    fn save(&self, topic: &str, timestamp_us: i64, payload: &Payload) -> Result<(), PersistenceError>;

    /// Load the stored events of a topic in ascending timestamp order.
    fn load(&self, topic: &str) -> Result<Vec<StoredEvent>, PersistenceError>;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub timestamp_us: i64,
    pub payload: Payload,
}

/// In-memory store, trims on save.
pub struct MemoryStore {
    max_records_per_topic: usize,
    topics: Mutex<HashMap<String, Vec<StoredEvent>>>,
}

/// File backed store, one CSV archive per topic under a root directory.
pub struct ArchiveStore {
    root: PathBuf,
    max_records_per_topic: usize,
    writers: Mutex<HashMap<String, Archiver>>,
}

/// A row of a topic archive, the payload is stored as JSON text.
#[derive(Debug, Serialize, Deserialize)]
struct ArchiveRecord {
    timestamp_us: i64,
    payload: String,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Cannot create the archive directory {0:?}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Stored payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MemoryStore {
    pub fn new(max_records_per_topic: usize) -> Self {
        Self {
            max_records_per_topic,
            topics: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORDS_PER_TOPIC)
    }
}

impl PersistenceLayer for MemoryStore {
    fn save(&self, topic: &str, timestamp_us: i64, payload: &Payload) -> Result<(), PersistenceError> {
        let mut topics = self.topics.lock();
        let records = topics.entry(topic.to_string()).or_default();

        records.push(StoredEvent {
            timestamp_us,
            payload: payload.clone(),
        });

        if records.len() > self.max_records_per_topic {
            let excess = records.len() - self.max_records_per_topic;
            records.drain(..excess);
        }

        Ok(())
    }

    fn load(&self, topic: &str) -> Result<Vec<StoredEvent>, PersistenceError> {
        let mut records = self.topics.lock().get(topic).cloned().unwrap_or_default();
        records.sort_by_key(|r| r.timestamp_us);
        Ok(records)
    }
}

impl ArchiveStore {
    /// Open a store rooted at the given directory, creating it if needed.
    pub fn new<P: AsRef<Path>>(root: P, max_records_per_topic: usize) -> Result<Self, PersistenceError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| PersistenceError::CreateDir(root.clone(), e))?;

        debug!("Bus archive store opened at {:?}", root);

        Ok(Self {
            root,
            max_records_per_topic,
            writers: Mutex::new(HashMap::new()),
        })
    }

    /// Path of the archive file backing a topic.
    pub fn topic_path(&self, topic: &str) -> PathBuf {
        self.root.join(format!("{}.csv", topic))
    }

    /// Rewrite a topic's archive keeping only the records within the retention bound.
    ///
    /// Returns the number of records dropped.
    pub fn compact(&self, topic: &str) -> Result<usize, PersistenceError> {
        // Holding the writers lock keeps saves out while the file is replaced
        let mut writers = self.writers.lock();

        let path = self.topic_path(topic);
        let records: Vec<ArchiveRecord> = archive::read_records(&path)?;
        if records.len() <= self.max_records_per_topic {
            return Ok(0);
        }

        let dropped = records.len() - self.max_records_per_topic;
        archive::rewrite_records(&path, &records[dropped..])?;

        // The open writer appends to the replaced file, reopen on next save
        writers.remove(topic);

        debug!("Compacted {} records from {:?}", dropped, path);
        Ok(dropped)
    }
}

impl PersistenceLayer for ArchiveStore {
    fn save(&self, topic: &str, timestamp_us: i64, payload: &Payload) -> Result<(), PersistenceError> {
        let record = ArchiveRecord {
            timestamp_us,
            payload: serde_json::to_string(payload)?,
        };

        let mut writers = self.writers.lock();
        let writer = match writers.entry(topic.to_string()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(Archiver::from_path(self.topic_path(topic))?),
        };

        writer.serialise(record)?;
        trace!("Archived {} event at {}", topic, timestamp_us);

        Ok(())
    }

    fn load(&self, topic: &str) -> Result<Vec<StoredEvent>, PersistenceError> {
        // Saves flush every record, so reading the file sees them all
        let records: Vec<ArchiveRecord> = {
            let _writers = self.writers.lock();
            archive::read_records(self.topic_path(topic))?
        };

        let mut events = records
            .into_iter()
            .map(|r| {
                Ok(StoredEvent {
                    timestamp_us: r.timestamp_us,
                    payload: serde_json::from_str(&r.payload)?,
                })
            })
            .collect::<Result<Vec<_>, PersistenceError>>()?;

        events.sort_by_key(|e| e.timestamp_us);

        if events.len() > self.max_records_per_topic {
            let excess = events.len() - self.max_records_per_topic;
            events.drain(..excess);
        }

        Ok(events)
    }
}
