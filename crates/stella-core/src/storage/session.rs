//! Data file selection.
//!
//! Records go to one CSV per day and batch, named
//! `{device}_data_{YYYYMMDD}-{batch}.csv`. The name currently in use is kept
//! in [`LAST_FILENAME_FILE`] so appending resumes across reboots. A new file
//! is started when the day changes or when the header it would need no longer
//! matches the file's first line (a sensor was plugged in or pulled).

use alloc::format;
use alloc::string::{String, ToString};

use log::{error, info, warn};

use super::{LAST_FILENAME_FILE, Storage, StorageError};
use crate::clock::Timestamp;
use crate::config::Identity;

pub fn filename_of_the_day(identity: &Identity, timestamp: &Timestamp, batch: u32) -> String {
    format!(
        "{}_data_{}-{}.csv",
        identity.device_type,
        timestamp.datestamp(),
        batch
    )
}

/// Used when there is no remembered file yet; its date never matches today.
pub fn placeholder_filename(identity: &Identity) -> String {
    format!("{}_data_20000101-0.csv", identity.device_type)
}

/// Records taken without a valid clock all go here.
pub fn unset_clock_filename(identity: &Identity) -> String {
    format!("{}_data_no_timestamp.csv", identity.device_type)
}

/// The date embedded in a data file name: after the last `_`, before the first `-`.
pub fn embedded_datestamp(filename: &str) -> &str {
    let tail = filename.rsplit('_').next().unwrap_or(filename);
    tail.split('-').next().unwrap_or(tail)
}

#[derive(Default)]
pub struct FileSession {
    /// Header of the no-timestamp file as written this boot.
    unset_clock_header: Option<String>,
}

impl FileSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the data file for a record with `header`, creating it if needed.
    ///
    /// Returns the name to append to. The caller appends the record itself.
    pub fn resolve<S: Storage>(
        &mut self,
        storage: &mut S,
        identity: &Identity,
        timestamp: &Timestamp,
        batch: u32,
        header: &str,
    ) -> Result<String, StorageError> {
        if !timestamp.is_set() {
            return self.resolve_unset_clock(storage, identity, header);
        }

        let last = match storage.read_first_line(LAST_FILENAME_FILE) {
            Ok(Some(line)) if !line.trim().is_empty() => line.trim().to_string(),
            Ok(_) => placeholder_filename(identity),
            Err(e) => {
                warn!("Could not read {}: {}", LAST_FILENAME_FILE, e);
                placeholder_filename(identity)
            }
        };

        let today = timestamp.datestamp();
        if embedded_datestamp(&last) == today.as_str() {
            match storage.read_first_line(&last)? {
                Some(existing) if existing == header => return Ok(last),
                Some(_) => info!("Header changed; starting a new data file"),
                None => warn!("{} is gone; starting a new data file", last),
            }
        } else {
            info!("New day; starting a new data file");
        }

        let filename = self.unused_name(storage, &filename_of_the_day(identity, timestamp, batch))?;
        storage.write(&filename, &format!("{}\n", header))?;
        info!("Created {}", filename);

        if let Err(e) = storage.write(LAST_FILENAME_FILE, &format!("{}\n", filename)) {
            error!("Could not remember {}: {}", filename, e);
        }

        Ok(filename)
    }

    fn resolve_unset_clock<S: Storage>(
        &mut self,
        storage: &mut S,
        identity: &Identity,
        header: &str,
    ) -> Result<String, StorageError> {
        let filename = unset_clock_filename(identity);
        if self.unset_clock_header.as_deref() != Some(header) {
            storage.write(&filename, &format!("{}\n", header))?;
            warn!("Clock not set; recording to {}", filename);
            self.unset_clock_header = Some(header.to_string());
        }
        Ok(filename)
    }

    /// `candidate`, or `candidate` with a `-1`, `-2`, ... revision when taken.
    fn unused_name<S: Storage>(&self, storage: &mut S, candidate: &str) -> Result<String, StorageError> {
        if !storage.exists(candidate)? {
            return Ok(candidate.to_string());
        }

        let stem = candidate.strip_suffix(".csv").unwrap_or(candidate);
        let mut revision = 1u32;
        loop {
            let name = format!("{}-{}.csv", stem, revision);
            if !storage.exists(&name)? {
                return Ok(name);
            }
            revision += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    const DAY_ONE: Timestamp = Timestamp {
        year: 2025,
        month: 6,
        day: 1,
        hour: 10,
        minute: 0,
        second: 0,
        weekday: 0,
    };

    const DAY_TWO: Timestamp = Timestamp {
        day: 2,
        weekday: 1,
        ..DAY_ONE
    };

    fn identity() -> Identity {
        Identity::new(42)
    }

    #[test]
    fn test_embedded_datestamp() {
        assert_eq!(embedded_datestamp("STELLA-1.1_data_20250601-3.csv"), "20250601");
        assert_eq!(embedded_datestamp("STELLA-1.1_data_20250601-3-1.csv"), "20250601");
        assert_eq!(embedded_datestamp("STELLA-1.1_data_20000101-0.csv"), "20000101");
    }

    #[test]
    fn test_first_record_creates_file_and_pointer() {
        let mut storage = MemoryStorage::new();
        let mut session = FileSession::new();

        let name = session
            .resolve(&mut storage, &identity(), &DAY_ONE, 0, "a, b")
            .unwrap();

        assert_eq!(name, "STELLA-1.1_data_20250601-0.csv");
        assert_eq!(storage.contents(&name), Some("a, b\n"));
        assert_eq!(
            storage.contents(LAST_FILENAME_FILE),
            Some("STELLA-1.1_data_20250601-0.csv\n")
        );
    }

    #[test]
    fn test_same_day_same_header_reuses_file() {
        let mut storage = MemoryStorage::new();
        let mut session = FileSession::new();
        let first = session
            .resolve(&mut storage, &identity(), &DAY_ONE, 0, "a, b")
            .unwrap();
        storage.append(&first, "1, 2\n").unwrap();

        // A later batch on the same day keeps appending to the open file.
        let second = session
            .resolve(&mut storage, &identity(), &DAY_ONE, 1, "a, b")
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(storage.contents(&first), Some("a, b\n1, 2\n"));
    }

    #[test]
    fn test_header_change_starts_a_revision() {
        let mut storage = MemoryStorage::new();
        let mut session = FileSession::new();
        let first = session
            .resolve(&mut storage, &identity(), &DAY_ONE, 0, "a, b")
            .unwrap();
        storage.append(&first, "1, 2\n").unwrap();

        let second = session
            .resolve(&mut storage, &identity(), &DAY_ONE, 0, "a, b, gps")
            .unwrap();

        assert_eq!(second, "STELLA-1.1_data_20250601-0-1.csv");
        assert_eq!(storage.contents(&first), Some("a, b\n1, 2\n"));
        assert_eq!(storage.contents(&second), Some("a, b, gps\n"));
    }

    #[test]
    fn test_new_day_starts_new_file() {
        let mut storage = MemoryStorage::new();
        let mut session = FileSession::new();
        session
            .resolve(&mut storage, &identity(), &DAY_ONE, 4, "a, b")
            .unwrap();

        let name = session
            .resolve(&mut storage, &identity(), &DAY_TWO, 0, "a, b")
            .unwrap();
        assert_eq!(name, "STELLA-1.1_data_20250602-0.csv");
    }

    #[test]
    fn test_corrupt_pointer_counts_as_missing() {
        let mut storage = MemoryStorage::new().with_file(LAST_FILENAME_FILE, "\n");
        let name = FileSession::new()
            .resolve(&mut storage, &identity(), &DAY_ONE, 2, "a")
            .unwrap();
        assert_eq!(name, "STELLA-1.1_data_20250601-2.csv");
    }

    #[test]
    fn test_unset_clock_writes_header_once() {
        let mut storage = MemoryStorage::new();
        let mut session = FileSession::new();

        let name = session
            .resolve(&mut storage, &identity(), &Timestamp::UNSET, 0, "a")
            .unwrap();
        assert_eq!(name, "STELLA-1.1_data_no_timestamp.csv");
        storage.append(&name, "1\n").unwrap();

        session
            .resolve(&mut storage, &identity(), &Timestamp::UNSET, 0, "a")
            .unwrap();
        assert_eq!(storage.contents(&name), Some("a\n1\n"));
        assert_eq!(storage.contents(LAST_FILENAME_FILE), None);
    }

    #[test]
    fn test_storage_failure_propagates() {
        let mut storage = MemoryStorage::new();
        storage.set_ejected(true);
        assert!(
            FileSession::new()
                .resolve(&mut storage, &identity(), &DAY_ONE, 0, "a")
                .is_err()
        );
    }
}
