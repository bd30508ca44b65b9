//! Batch numbering.
//!
//! A batch groups the records of one measurement run. Numbers restart at 0
//! each calendar day and the last one handed out is kept in a one-line file
//! (`YYYYMMDDnnn`) so they survive a reboot.

use alloc::format;

use log::{error, info, warn};

use super::{BATCH_FILE, Storage};

pub struct BatchTracker {
    file: &'static str,
}

impl Default for BatchTracker {
    fn default() -> Self {
        Self { file: BATCH_FILE }
    }
}

/// Split a `YYYYMMDDnnn` record into its date and sequence number.
fn parse_record(line: &str) -> Option<(&str, u32)> {
    let line = line.trim();
    let (date, sequence) = (line.get(..8)?, line.get(8..)?);
    if !date.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((date, sequence.trim().parse().ok()?))
}

impl BatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next batch number for `datestamp` and persist it.
    ///
    /// A missing or unreadable record starts the day at 0. Failing to persist
    /// is logged; the number is still returned.
    pub fn next_batch<S: Storage>(&self, storage: &mut S, datestamp: &str) -> u32 {
        let line = match storage.read_first_line(self.file) {
            Ok(line) => line,
            Err(e) => {
                warn!("Could not read {}: {}", self.file, e);
                None
            }
        };

        let batch = match line.as_deref().and_then(parse_record) {
            Some((date, last)) if date == datestamp => last.saturating_add(1),
            Some(_) => 0,
            None => {
                if line.is_some() {
                    warn!("Malformed {}; starting batch numbering at 0", self.file);
                }
                0
            }
        };

        if let Err(e) = storage.write(self.file, &format!("{}{:03}\n", datestamp, batch)) {
            error!("Failed to persist batch {}: {}", batch, e);
        }

        info!("Batch {} for {}", batch, datestamp);
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_first_batch_of_the_day() {
        let mut storage = MemoryStorage::new();
        let tracker = BatchTracker::new();

        assert_eq!(tracker.next_batch(&mut storage, "20250601"), 0);
        assert_eq!(storage.contents(BATCH_FILE), Some("20250601000\n"));
    }

    #[test]
    fn test_same_day_increments() {
        let mut storage = MemoryStorage::new().with_file(BATCH_FILE, "20250601007\n");
        let tracker = BatchTracker::new();

        assert_eq!(tracker.next_batch(&mut storage, "20250601"), 8);
        assert_eq!(tracker.next_batch(&mut storage, "20250601"), 9);
        assert_eq!(storage.contents(BATCH_FILE), Some("20250601009\n"));
    }

    #[test]
    fn test_new_day_resets() {
        let mut storage = MemoryStorage::new().with_file(BATCH_FILE, "20250601007\n");
        assert_eq!(BatchTracker::new().next_batch(&mut storage, "20250602"), 0);
    }

    #[test]
    fn test_large_sequence_keeps_all_digits() {
        let mut storage = MemoryStorage::new().with_file(BATCH_FILE, "202506011234\n");
        assert_eq!(BatchTracker::new().next_batch(&mut storage, "20250601"), 1235);
        assert_eq!(storage.contents(BATCH_FILE), Some("202506011235\n"));
    }

    #[test]
    fn test_corrupt_record_counts_as_absent() {
        for junk in ["", "2025", "abcdefgh001", "20250601xyz"] {
            let mut storage = MemoryStorage::new().with_file(BATCH_FILE, junk);
            assert_eq!(BatchTracker::new().next_batch(&mut storage, "20250601"), 0);
        }
    }

    #[test]
    fn test_unwritable_storage_still_returns_a_batch() {
        let mut storage = MemoryStorage::new();
        storage.set_ejected(true);
        assert_eq!(BatchTracker::new().next_batch(&mut storage, "20250601"), 0);
    }
}
