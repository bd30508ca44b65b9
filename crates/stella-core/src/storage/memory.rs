//! RAM-backed [`Storage`], used by tests and as a stand-in when no card is fitted.

use alloc::collections::BTreeMap;
use alloc::string::String;

use super::{ErrorDetails, Storage, StorageError};

#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: BTreeMap<String, String>,
    ejected: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, name: &str, contents: &str) -> Self {
        self.files.insert(String::from(name), String::from(contents));
        self
    }

    pub fn contents(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    /// Simulate pulling the card: every operation fails until reinserted.
    pub fn set_ejected(&mut self, ejected: bool) {
        self.ejected = ejected;
    }

    fn check_ready(&self) -> Result<(), StorageError> {
        if self.ejected {
            let mut details = ErrorDetails::new();
            let _ = details.push_str("card ejected");
            return Err(StorageError::NotReady { details });
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn exists(&mut self, name: &str) -> Result<bool, StorageError> {
        self.check_ready()?;
        Ok(self.files.contains_key(name))
    }

    fn read_prefix(&mut self, name: &str, limit: usize) -> Result<Option<String>, StorageError> {
        self.check_ready()?;
        Ok(self.files.get(name).map(|text| {
            let mut end = limit.min(text.len());
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            String::from(&text[..end])
        }))
    }

    fn write(&mut self, name: &str, contents: &str) -> Result<(), StorageError> {
        self.check_ready()?;
        self.files.insert(String::from(name), String::from(contents));
        Ok(())
    }

    fn append(&mut self, name: &str, contents: &str) -> Result<(), StorageError> {
        self.check_ready()?;
        self.files
            .entry(String::from(name))
            .or_default()
            .push_str(contents);
        Ok(())
    }
}
