//! Feed acquisition seam
//!
//! The core only needs "raw record plus its data-spec classification". Where
//! the bytes come from is a [`RecordSource`]; what to fetch is an explicit
//! [`FeedSession`] value handed to it.

use chrono::NaiveDate;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::data::spec::DataSpec;
use crate::error::FeedError;

/// One line from the feed, consumed by the decoder and then dropped
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub record_tag: String,
    pub data_spec: DataSpec,
    pub bytes: Vec<u8>,
}

impl RawRecord {
    pub fn new(data_spec: DataSpec, bytes: Vec<u8>) -> Self {
        let record_tag = bytes
            .get(..2)
            .map(|t| String::from_utf8_lossy(t).into_owned())
            .unwrap_or_default();
        Self {
            record_tag,
            data_spec,
            bytes,
        }
    }
}

/// What to fetch: directory, inclusive date range and data specs
#[derive(Debug, Clone)]
pub struct FeedSession {
    pub feed_dir: PathBuf,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub data_specs: Vec<DataSpec>,
}

impl FeedSession {
    /// Session over every data spec the engine consumes
    pub fn new<P: AsRef<Path>>(feed_dir: P, date_from: NaiveDate, date_to: NaiveDate) -> Self {
        Self {
            feed_dir: feed_dir.as_ref().to_path_buf(),
            date_from,
            date_to,
            data_specs: DataSpec::ALL.to_vec(),
        }
    }

    pub fn with_data_specs(mut self, data_specs: &[DataSpec]) -> Self {
        self.data_specs = data_specs.to_vec();
        self
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.date_from
            .iter_days()
            .take_while(move |d| *d <= self.date_to)
    }
}

/// Supplier of raw records for a session
pub trait RecordSource {
    fn fetch(&self, session: &FeedSession) -> Result<Vec<RawRecord>, FeedError>;
}

/// Reads `<feed id>_<YYYYMMDD>.txt` files, one Shift-JIS record per line
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedDirectory;

impl FeedDirectory {
    pub fn file_name(feed_id: &str, date: NaiveDate) -> String {
        format!("{}_{}.txt", feed_id, date.format("%Y%m%d"))
    }

    /// Split file contents into records, dropping CR/LF and blank lines
    pub fn split_records(data_spec: DataSpec, contents: &[u8]) -> Vec<RawRecord> {
        contents
            .split(|b| *b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
            .filter(|line| !line.is_empty())
            .map(|line| RawRecord::new(data_spec, line.to_vec()))
            .collect()
    }
}

impl RecordSource for FeedDirectory {
    fn fetch(&self, session: &FeedSession) -> Result<Vec<RawRecord>, FeedError> {
        if !session.feed_dir.is_dir() {
            return Err(FeedError::MissingDirectory(session.feed_dir.clone()));
        }

        let mut records = Vec::new();
        for date in session.dates() {
            for &data_spec in &session.data_specs {
                for feed_id in data_spec.feed_ids() {
                    let path = session.feed_dir.join(Self::file_name(feed_id, date));
                    let contents = match fs::read(&path) {
                        Ok(contents) => contents,
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {
                            debug!("No {} ({}) feed for {}", data_spec, feed_id, date);
                            continue;
                        }
                        Err(source) => return Err(FeedError::Io { path, source }),
                    };
                    let batch = Self::split_records(data_spec, &contents);
                    debug!("{:?}: {} records", path, batch.len());
                    records.extend(batch);
                }
            }
        }

        info!(
            "Fetched {} records for {}..={}",
            records.len(),
            session.date_from,
            session.date_to
        );
        Ok(records)
    }
}
