//! Flash image kept in a file so configuration survives restarts.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use embedded_storage::{ReadStorage, Storage};
use scanlink_core::config::STORAGE_REGION_LEN;
use scanlink_core::storage::{MemoryFlash, MemoryFlashError};

#[derive(Debug)]
pub enum FileFlashError {
    Range(MemoryFlashError),
    Io(io::ErrorKind),
}

/// Writes go to memory first and are then flushed to the file whole.
pub struct FileFlash {
    image: MemoryFlash,
    path: PathBuf,
}

impl FileFlash {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let image = match fs::read(path) {
            Ok(bytes) => MemoryFlash::from_image(bytes, STORAGE_REGION_LEN),
            Err(e) if e.kind() == io::ErrorKind::NotFound => MemoryFlash::new(STORAGE_REGION_LEN),
            Err(e) => {
                return Err(e).with_context(|| format!("reading flash image {}", path.display()));
            }
        };
        Ok(Self {
            image,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), FileFlashError> {
        fs::write(&self.path, self.image.bytes()).map_err(|e| FileFlashError::Io(e.kind()))
    }
}

impl ReadStorage for FileFlash {
    type Error = FileFlashError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.image
            .read(offset, bytes)
            .map_err(FileFlashError::Range)
    }

    fn capacity(&self) -> usize {
        self.image.capacity()
    }
}

impl Storage for FileFlash {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.image
            .write(offset, bytes)
            .map_err(FileFlashError::Range)?;
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanlink_core::config::BackendDefaults;
    use scanlink_core::storage::{DeviceSettings, NetworkCredentials, PersistentStore, Security};

    const MAC: [u8; 6] = [0x24, 0x6F, 0x28, 0x01, 0x02, 0x03];

    #[test]
    fn test_missing_file_starts_erased() {
        let dir = tempfile::tempdir().unwrap();
        let mut flash = FileFlash::open(&dir.path().join("flash.bin")).unwrap();

        let mut buf = [0u8; 8];
        flash.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0xFF; 8]);
        assert_eq!(flash.capacity(), STORAGE_REGION_LEN);
        assert!(!flash.path().exists());
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flash.bin");

        let mut store = PersistentStore::new(FileFlash::open(&path).unwrap(), 0);
        store
            .save(&mut NetworkCredentials::new("Lab", "hunter22", Security::Wpa))
            .unwrap();
        let mut settings = DeviceSettings::defaults_for(&MAC, &BackendDefaults::default());
        store.save(&mut settings).unwrap();

        let mut reopened = PersistentStore::new(FileFlash::open(&path).unwrap(), 0);
        let credentials = reopened.load::<NetworkCredentials>().unwrap().unwrap();
        assert_eq!(credentials.ssid.as_str(), "Lab");
        assert_eq!(credentials.password.as_str(), "hunter22");
        assert_eq!(reopened.load::<DeviceSettings>().unwrap(), Some(settings));
    }

    #[test]
    fn test_out_of_range_write_leaves_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flash.bin");
        let mut flash = FileFlash::open(&path).unwrap();

        let result = flash.write(STORAGE_REGION_LEN as u32 - 2, &[0; 4]);
        assert!(matches!(result, Err(FileFlashError::Range(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_unwritable_path_reports_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut flash = FileFlash::open(&dir.path().join("missing").join("flash.bin")).unwrap();
        assert!(matches!(
            flash.write(0, &[1, 2, 3]),
            Err(FileFlashError::Io(_))
        ));
    }
}
