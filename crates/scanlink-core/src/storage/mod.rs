//! Checksummed persistence for the two configuration records.
//!
//! Each record lives in its own fixed-size block at a fixed offset inside the
//! storage region. Block layout (little-endian):
//!
//! | offset        | width | field                                |
//! |---------------|-------|--------------------------------------|
//! | 0             | 4     | record magic                         |
//! | 4             | 1     | layout / schema version              |
//! | 5             | ..    | record fields (see [`records`])      |
//! | LEN - 4       | 4     | CRC-32 of the block with this zeroed |
//!
//! A block is distrusted until the magic, version, checksum and the
//! record's own validity flag all agree. Anything else reads as "no record"
//! and the caller synthesizes defaults.

pub mod block;
pub mod memory;
pub mod records;

pub use block::{BlockReader, BlockWriter, bounded, fitted};
pub use memory::{MemoryFlash, MemoryFlashError};
pub use records::{DeviceSettings, NetworkCredentials, SETTINGS_SCHEMA_VERSION, Security};

use core::fmt::Debug;

use embedded_storage::Storage;
use log::{debug, info, warn};
use thiserror_no_std::Error;

use crate::checksum::crc32;
use crate::config::{CREDENTIALS_SLOT_OFFSET, RECORD_BLOCK_LEN, SETTINGS_SLOT_OFFSET};

/// Offset of the checksum field inside every block.
pub const CHECKSUM_OFFSET: usize = RECORD_BLOCK_LEN - 4;

pub type RecordBlock = [u8; RECORD_BLOCK_LEN];

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage read failed")]
    Read,
    #[error("storage write failed")]
    Write,
}

/// Why a stored block was not trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Never written (erased flash or zeroed by a factory reset).
    Blank,
    BadMagic,
    /// Written by a different layout version. Old state is not migrated.
    VersionMismatch(u8),
    ChecksumMismatch,
    Malformed,
    /// Checksum fine but the record's validity flag is not set.
    NotValid,
}

/// A fixed-layout record stored in one block.
pub trait PersistedRecord: Sized {
    const NAME: &'static str;
    const SLOT_OFFSET: u32;
    const MAGIC: u32;
    const VERSION: u8;

    fn encode_fields(&self, writer: &mut BlockWriter<'_>);
    fn decode_fields(reader: &mut BlockReader<'_>) -> Option<Self>;

    /// The record-specific validity flag.
    fn is_valid(&self) -> bool;

    fn checksum(&self) -> u32;
    fn set_checksum(&mut self, checksum: u32);
}

/// Serialize a record into a block and stamp the checksum into both the
/// block and the record.
pub fn encode_block<R: PersistedRecord>(record: &mut R) -> RecordBlock {
    let mut block = [0u8; RECORD_BLOCK_LEN];
    {
        let mut writer = BlockWriter::new(&mut block[..CHECKSUM_OFFSET]);
        writer.put_u32(R::MAGIC);
        writer.put_u8(R::VERSION);
        record.encode_fields(&mut writer);
    }

    // Checksum field is still zero here
    let checksum = crc32(&block);
    block[CHECKSUM_OFFSET..].copy_from_slice(&checksum.to_le_bytes());
    record.set_checksum(checksum);
    block
}

/// Validate and decode a block read back from storage.
pub fn decode_block<R: PersistedRecord>(block: &RecordBlock) -> Result<R, Rejection> {
    if block.iter().all(|b| *b == 0xFF) || block.iter().all(|b| *b == 0x00) {
        return Err(Rejection::Blank);
    }

    let mut reader = BlockReader::new(&block[..CHECKSUM_OFFSET]);
    if reader.get_u32() != Some(R::MAGIC) {
        return Err(Rejection::BadMagic);
    }
    let version = reader.get_u8().ok_or(Rejection::Malformed)?;
    if version != R::VERSION {
        return Err(Rejection::VersionMismatch(version));
    }

    let stored = u32::from_le_bytes([
        block[CHECKSUM_OFFSET],
        block[CHECKSUM_OFFSET + 1],
        block[CHECKSUM_OFFSET + 2],
        block[CHECKSUM_OFFSET + 3],
    ]);
    let mut scratch = *block;
    scratch[CHECKSUM_OFFSET..].fill(0);
    if crc32(&scratch) != stored {
        return Err(Rejection::ChecksumMismatch);
    }

    let mut record = R::decode_fields(&mut reader).ok_or(Rejection::Malformed)?;
    record.set_checksum(stored);
    if !record.is_valid() {
        return Err(Rejection::NotValid);
    }
    Ok(record)
}

/// Persistent store over any `embedded-storage` backend.
///
/// `base` is the offset of the 1 KiB storage region inside the backend; the
/// credential and settings slots sit at fixed offsets within it.
pub struct PersistentStore<S> {
    flash: S,
    base: u32,
}

impl<S> PersistentStore<S>
where
    S: Storage,
    S::Error: Debug,
{
    pub fn new(flash: S, base: u32) -> Self {
        Self { flash, base }
    }

    /// Read one record. `Ok(None)` means the slot holds nothing trustworthy.
    pub fn load<R: PersistedRecord>(&mut self) -> Result<Option<R>, StoreError> {
        let mut block = [0u8; RECORD_BLOCK_LEN];
        self.flash
            .read(self.base + R::SLOT_OFFSET, &mut block)
            .map_err(|e| {
                warn!("store: {} read failed: {:?}", R::NAME, e);
                StoreError::Read
            })?;

        match decode_block::<R>(&block) {
            Ok(record) => Ok(Some(record)),
            Err(reason) => {
                debug!("store: {} slot rejected: {:?}", R::NAME, reason);
                Ok(None)
            }
        }
    }

    /// Checksum and write one record. The record's checksum field is updated
    /// to the value written.
    pub fn save<R: PersistedRecord>(&mut self, record: &mut R) -> Result<(), StoreError> {
        let block = encode_block(record);
        self.flash
            .write(self.base + R::SLOT_OFFSET, &block)
            .map_err(|e| {
                warn!("store: {} write failed: {:?}", R::NAME, e);
                StoreError::Write
            })
    }

    /// Load a record, or synthesize defaults and persist them immediately.
    ///
    /// Corruption and read failures are absorbed here; the caller always
    /// gets a usable record.
    pub fn load_or_init<R, F>(&mut self, defaults: F) -> R
    where
        R: PersistedRecord,
        F: FnOnce() -> R,
    {
        if let Ok(Some(record)) = self.load::<R>() {
            return record;
        }

        info!("store: no valid {} record, writing defaults", R::NAME);
        let mut record = defaults();
        if let Err(e) = self.save(&mut record) {
            warn!("store: could not persist default {}: {}", R::NAME, e);
        }
        record
    }

    /// Zero both slots.
    pub fn wipe(&mut self) -> Result<(), StoreError> {
        let zeros = [0u8; RECORD_BLOCK_LEN];
        for slot in [CREDENTIALS_SLOT_OFFSET, SETTINGS_SLOT_OFFSET] {
            self.flash.write(self.base + slot, &zeros).map_err(|e| {
                warn!("store: wipe at {:#x} failed: {:?}", slot, e);
                StoreError::Write
            })?;
        }
        info!("store: both records wiped");
        Ok(())
    }

    pub fn flash(&self) -> &S {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut S {
        &mut self.flash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendDefaults, STORAGE_REGION_LEN};
    use crate::scan_router::ScanMode;

    fn store() -> PersistentStore<MemoryFlash> {
        PersistentStore::new(MemoryFlash::new(STORAGE_REGION_LEN), 0)
    }

    fn sample_settings() -> DeviceSettings {
        let mac = [0x24, 0x6F, 0x28, 0xAB, 0xCD, 0xEF];
        let mut settings = DeviceSettings::defaults_for(&mac, &BackendDefaults::default());
        settings.mode = ScanMode::Attendance;
        settings.api_key = bounded("secret-key");
        settings
    }

    fn sample_credentials() -> NetworkCredentials {
        NetworkCredentials::new("MyNet", "secret", Security::Wpa)
    }

    #[test]
    fn test_settings_round_trip() {
        let mut store = store();
        let mut settings = sample_settings();
        store.save(&mut settings).unwrap();

        let loaded: DeviceSettings = store.load().unwrap().unwrap();
        assert_eq!(loaded, settings);
        assert_ne!(loaded.checksum, 0);
    }

    #[test]
    fn test_credentials_round_trip() {
        let mut store = store();
        let mut creds = sample_credentials();
        store.save(&mut creds).unwrap();

        let loaded: NetworkCredentials = store.load().unwrap().unwrap();
        assert_eq!(loaded, creds);
    }

    #[test]
    fn test_slots_are_independent() {
        let mut store = store();
        let mut creds = sample_credentials();
        let mut settings = sample_settings();
        store.save(&mut creds).unwrap();
        store.save(&mut settings).unwrap();

        // Corrupt only the settings slot
        store.flash_mut().bytes_mut()[SETTINGS_SLOT_OFFSET as usize + 40] ^= 0xFF;

        assert!(store.load::<DeviceSettings>().unwrap().is_none());
        assert_eq!(store.load::<NetworkCredentials>().unwrap(), Some(creds));
    }

    #[test]
    fn test_any_flipped_byte_invalidates() {
        let mut settings = sample_settings();
        let block = encode_block(&mut settings);

        for index in 0..RECORD_BLOCK_LEN {
            let mut corrupted = block;
            corrupted[index] ^= 0x01;
            assert!(
                decode_block::<DeviceSettings>(&corrupted).is_err(),
                "flip at byte {} went undetected",
                index
            );
        }
    }

    #[test]
    fn test_flipped_checksum_is_mismatch() {
        let mut creds = sample_credentials();
        let mut block = encode_block(&mut creds);
        block[CHECKSUM_OFFSET] ^= 0x80;
        assert_eq!(
            decode_block::<NetworkCredentials>(&block),
            Err(Rejection::ChecksumMismatch)
        );
    }

    #[test]
    fn test_blank_flash_reads_as_none() {
        let mut store = store();
        assert!(store.load::<DeviceSettings>().unwrap().is_none());
        assert!(store.load::<NetworkCredentials>().unwrap().is_none());
    }

    #[test]
    fn test_invalid_flag_rejected_even_with_good_checksum() {
        let mut creds = NetworkCredentials::empty();
        let block = encode_block(&mut creds);
        assert_eq!(
            decode_block::<NetworkCredentials>(&block),
            Err(Rejection::NotValid)
        );
    }

    #[test]
    fn test_schema_version_mismatch_is_not_migrated() {
        let mut settings = sample_settings();
        let mut block = encode_block(&mut settings);
        block[4] = SETTINGS_SCHEMA_VERSION.wrapping_sub(1);
        // Re-stamp a correct checksum so only the version differs
        block[CHECKSUM_OFFSET..].fill(0);
        let checksum = crc32(&block);
        block[CHECKSUM_OFFSET..].copy_from_slice(&checksum.to_le_bytes());

        assert_eq!(
            decode_block::<DeviceSettings>(&block),
            Err(Rejection::VersionMismatch(SETTINGS_SCHEMA_VERSION.wrapping_sub(1)))
        );
    }

    #[test]
    fn test_load_or_init_repairs_corruption() {
        let mut store = store();
        let mut settings = sample_settings();
        store.save(&mut settings).unwrap();
        store.flash_mut().bytes_mut()[SETTINGS_SLOT_OFFSET as usize + 9] ^= 0x10;

        let mac = [1, 2, 3, 4, 5, 6];
        let recovered: DeviceSettings =
            store.load_or_init(|| DeviceSettings::defaults_for(&mac, &BackendDefaults::default()));
        assert_eq!(recovered.device_id.as_str(), "ESP32-010203040506");

        // The defaults were written back and now load cleanly
        let reloaded: DeviceSettings = store.load().unwrap().unwrap();
        assert_eq!(reloaded, recovered);
    }

    #[test]
    fn test_wipe_clears_both_slots() {
        let mut store = store();
        store.save(&mut sample_credentials()).unwrap();
        store.save(&mut sample_settings()).unwrap();

        store.wipe().unwrap();

        assert!(store.load::<NetworkCredentials>().unwrap().is_none());
        assert!(store.load::<DeviceSettings>().unwrap().is_none());
    }

    #[test]
    fn test_region_base_offset_is_respected() {
        let mut store = PersistentStore::new(MemoryFlash::new(4096), 2048);
        store.save(&mut sample_credentials()).unwrap();
        assert!(store.flash().bytes()[..2048].iter().all(|b| *b == 0xFF));
        assert!(store.load::<NetworkCredentials>().unwrap().is_some());
    }

    #[test]
    fn test_read_error_surfaces_as_store_error() {
        let mut store = PersistentStore::new(MemoryFlash::new(16), 0);
        assert_eq!(store.load::<DeviceSettings>(), Err(StoreError::Read));
    }
}
