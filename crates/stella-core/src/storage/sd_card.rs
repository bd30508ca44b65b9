use alloc::collections::BTreeSet;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;

use embedded_sdmmc::{Mode, SdCard, SdCardError, TimeSource, VolumeIdx, VolumeManager};
use log::warn;

use super::{Storage, StorageError};
use crate::clock::{ClockSource, SystemClock};

/// Long names seen on this card, one `alias,long name` line each.
pub const NAME_INDEX_FILE: &str = "NAMES.CSV";

pub type ShortName = heapless::String<12>;

const READ_CHUNK: usize = 128;

type SdResult<T> = Result<T, embedded_sdmmc::Error<SdCardError>>;

fn fnv1a(name: &str) -> u32 {
    name.bytes().fold(0x811c_9dc5, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}

fn is_short_component(part: &str, max: usize) -> bool {
    part.len() <= max
        && part
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Map a file name onto FAT 8.3.
///
/// Names that already fit are upper-cased. Longer ones become an 8-digit hash
/// of the full name plus the first three characters of the extension.
pub fn short_name(name: &str) -> ShortName {
    let (base, ext) = name.rsplit_once('.').unwrap_or((name, ""));
    let mut out = ShortName::new();

    if !base.is_empty() && is_short_component(base, 8) && is_short_component(ext, 3) {
        for ch in name.chars() {
            let _ = out.push(ch.to_ascii_uppercase());
        }
        return out;
    }

    let _ = write!(out, "{:08X}", fnv1a(name));
    let ext: String = ext
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(3)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();
    if !ext.is_empty() {
        let _ = write!(out, ".{}", ext);
    }
    out
}

/// FAT timestamps for files written on the card.
impl TimeSource for SystemClock {
    fn get_timestamp(&self) -> embedded_sdmmc::Timestamp {
        let now = self.now();
        embedded_sdmmc::Timestamp::from_calendar(
            now.year,
            now.month,
            now.day,
            now.hour,
            now.minute,
            now.second,
        )
        .unwrap_or(embedded_sdmmc::Timestamp {
            year_since_1970: 50,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        })
    }
}

/// For NOW, these SD card operations are blocking, BUT every record is a few
/// hundred bytes and the acquisition loop has nothing else to do meanwhile.
///
/// Every call opens and closes the volume so a card pulled between cycles
/// only fails the operations attempted while it is out.
pub struct SdCardStorage<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    volume_mgr: VolumeManager<SdCard<S, D>, T, 4, 4, 1>,
    indexed: BTreeSet<String>,
}

impl<S, D, T> SdCardStorage<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    /// Create a new SD card storage manager
    pub fn new(sd_card: SdCard<S, D>, ts: T) -> Self {
        let volume_mgr = VolumeManager::new(sd_card, ts);

        Self {
            volume_mgr,
            indexed: BTreeSet::new(),
        }
    }

    fn file_exists(&self, short: &str) -> SdResult<bool> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;

        let found = match root_dir.find_directory_entry(short) {
            Ok(_) => true,
            Err(embedded_sdmmc::Error::NotFound) => false,
            Err(e) => return Err(e),
        };

        root_dir.close()?;
        volume0.close()?;
        Ok(found)
    }

    fn write_with_mode(&self, short: &str, mode: Mode, contents: &[u8]) -> SdResult<()> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;
        let file = root_dir.open_file_in_dir(short, mode)?;

        file.write(contents)?;

        // Resources are closed on drop too, but explicit closes surface errors
        file.close()?;
        root_dir.close()?;
        volume0.close()?;

        Ok(())
    }

    fn read_up_to(&self, short: &str, limit: usize) -> SdResult<Option<Vec<u8>>> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;

        let file = match root_dir.open_file_in_dir(short, Mode::ReadOnly) {
            Ok(file) => file,
            Err(embedded_sdmmc::Error::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut bytes = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        while bytes.len() < limit {
            let read = file.read(&mut chunk)?;
            if read == 0 {
                break; // EOF
            }
            bytes.extend_from_slice(&chunk[..read]);
        }
        bytes.truncate(limit);

        file.close()?;
        root_dir.close()?;
        volume0.close()?;

        Ok(Some(bytes))
    }

    /// Note an aliased name in the index the first time it is written to.
    fn index_alias(&mut self, name: &str, short: &str) {
        if short.eq_ignore_ascii_case(name) || self.indexed.contains(name) {
            return;
        }

        let recorded = self.file_exists(short).and_then(|exists| {
            if exists {
                return Ok(());
            }
            let line = format!("{},{}\n", short, name);
            self.write_with_mode(NAME_INDEX_FILE, Mode::ReadWriteCreateOrAppend, line.as_bytes())
        });

        match recorded {
            Ok(()) => {
                self.indexed.insert(String::from(name));
            }
            Err(e) => warn!("Could not index {} as {}: {:?}", name, short, e),
        }
    }
}

impl<S, D, T> Storage for SdCardStorage<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    fn exists(&mut self, name: &str) -> Result<bool, StorageError> {
        self.file_exists(&short_name(name))
            .map_err(|e| StorageError::io("look up", name, e))
    }

    fn read_prefix(&mut self, name: &str, limit: usize) -> Result<Option<String>, StorageError> {
        let bytes = self
            .read_up_to(&short_name(name), limit)
            .map_err(|e| StorageError::io("read", name, e))?;
        Ok(bytes.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn write(&mut self, name: &str, contents: &str) -> Result<(), StorageError> {
        let short = short_name(name);
        self.index_alias(name, &short);
        self.write_with_mode(&short, Mode::ReadWriteCreateOrTruncate, contents.as_bytes())
            .map_err(|e| StorageError::io("write", name, e))
    }

    fn append(&mut self, name: &str, contents: &str) -> Result<(), StorageError> {
        let short = short_name(name);
        self.index_alias(name, &short);
        self.write_with_mode(&short, Mode::ReadWriteCreateOrAppend, contents.as_bytes())
            .map_err(|e| StorageError::io("append to", name, e))
    }
}
