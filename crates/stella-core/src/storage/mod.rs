pub mod batch;
pub mod memory;
pub mod sd_card;
pub mod session;

use alloc::string::String;
use core::fmt::{Debug, Write};

use thiserror_no_std::Error;

pub use batch::BatchTracker;
pub use memory::MemoryStorage;
pub use sd_card::SdCardStorage;
pub use session::FileSession;

pub const BATCH_FILE: &str = "batch.txt";
pub const LAST_FILENAME_FILE: &str = "last_filename.txt";
pub const CONFIG_FILE: &str = "STELLA_config.txt";

/// Enough of a data file to hold any header line we write.
pub const HEADER_READ_LIMIT: usize = 4096;

pub type ErrorDetails = heapless::String<64>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage not ready: {details}")]
    NotReady { details: ErrorDetails },

    #[error("failed to {operation} {file}: {details}")]
    Io {
        operation: &'static str,
        file: String,
        details: ErrorDetails,
    },
}

impl StorageError {
    pub fn io(operation: &'static str, file: &str, cause: impl Debug) -> Self {
        Self::Io {
            operation,
            file: String::from(file),
            details: error_details(cause),
        }
    }
}

/// Render an error for logging, truncated to fit [`ErrorDetails`].
pub fn error_details(cause: impl Debug) -> ErrorDetails {
    let mut details = ErrorDetails::new();
    let _ = write!(details, "{:?}", cause);
    details
}

/// The persistent medium: a flat namespace of small text files.
pub trait Storage {
    fn exists(&mut self, name: &str) -> Result<bool, StorageError>;

    /// Read at most `limit` bytes from the start of `name`.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    fn read_prefix(&mut self, name: &str, limit: usize) -> Result<Option<String>, StorageError>;

    /// Replace the contents of `name`, creating it if needed.
    fn write(&mut self, name: &str, contents: &str) -> Result<(), StorageError>;

    /// Append to `name`, creating it if needed.
    fn append(&mut self, name: &str, contents: &str) -> Result<(), StorageError>;

    /// First line of `name` without its line terminator.
    fn read_first_line(&mut self, name: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .read_prefix(name, HEADER_READ_LIMIT)?
            .map(|text| String::from(first_line(&text))))
    }
}

pub fn first_line(text: &str) -> &str {
    let line = text.split('\n').next().unwrap_or_default();
    line.strip_suffix('\r').unwrap_or(line)
}
