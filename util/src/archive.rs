//! Timestamped CSV archives
//!
//! An [`Archiver`] appends flat serde records to a CSV file, writing the header row only when
//! the file is new so that an archive survives process restarts. [`read_records`] loads the
//! whole file back.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use csv::{ReaderBuilder, WriterBuilder};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use csv::Writer;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// An object used to write CSV archive files.
pub struct Archiver {
    path: PathBuf,
    writer: Writer<File>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors that can occur while reading or writing an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Cannot open the archive file {0:?}: {1}")]
    OpenError(PathBuf, std::io::Error),

    #[error("Cannot serialise record into the archive: {0}")]
    WriteError(csv::Error),

    #[error("Cannot flush the archive: {0}")]
    FlushError(std::io::Error),

    #[error("Cannot read record from the archive: {0}")]
    ReadError(csv::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Archiver {
    /// Open (creating if needed) an archive at the given path in append mode.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();

        // Only write the header row into a fresh file
        let is_new = std::fs::metadata(&path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ArchiveError::OpenError(path.clone(), e))?;

        let writer = WriterBuilder::new().has_headers(is_new).from_writer(file);

        Ok(Self { path, writer })
    }

    /// Serialise a record into the archive and flush it to disk.
    pub fn serialise<T: Serialize>(&mut self, record: T) -> Result<(), ArchiveError> {
        self.writer
            .serialize(record)
            .map_err(ArchiveError::WriteError)?;
        self.writer.flush().map_err(ArchiveError::FlushError)
    }

    /// The path of the file backing this archive.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Read every record from an archive. A missing file is an empty archive.
pub fn read_records<T, P>(path: P) -> Result<Vec<T>, ArchiveError>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();

    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(ArchiveError::ReadError)?;

    reader
        .deserialize()
        .collect::<Result<Vec<T>, csv::Error>>()
        .map_err(ArchiveError::ReadError)
}

/// Replace the contents of an archive with the given records.
pub fn rewrite_records<T, P>(path: P, records: &[T]) -> Result<(), ArchiveError>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = path.as_ref();

    let file = File::create(path).map_err(|e| ArchiveError::OpenError(path.to_path_buf(), e))?;
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);

    for record in records {
        writer.serialize(record).map_err(ArchiveError::WriteError)?;
    }

    writer.flush().map_err(ArchiveError::FlushError)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        time_us: i64,
        data: String,
    }

    #[test]
    fn test_append_across_reopen() -> Result<(), ArchiveError> {
        let dir = tempfile::tempdir().map_err(|e| ArchiveError::OpenError(PathBuf::new(), e))?;
        let path = dir.path().join("samples.csv");

        {
            let mut arch = Archiver::from_path(&path)?;
            arch.serialise(Sample { time_us: 1, data: "{\"a\":1}".into() })?;
        }
        {
            // Reopening must not write a second header row
            let mut arch = Archiver::from_path(&path)?;
            arch.serialise(Sample { time_us: 2, data: "b,c".into() })?;
        }

        let records: Vec<Sample> = read_records(&path)?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].data, "{\"a\":1}");
        assert_eq!(records[1], Sample { time_us: 2, data: "b,c".into() });

        rewrite_records(&path, &records[1..])?;
        let records: Vec<Sample> = read_records(&path)?;
        assert_eq!(records.len(), 1);

        Ok(())
    }

    #[test]
    fn test_missing_archive_is_empty() -> Result<(), ArchiveError> {
        let records: Vec<Sample> = read_records("/nonexistent/archive.csv")?;
        assert!(records.is_empty());
        Ok(())
    }
}
