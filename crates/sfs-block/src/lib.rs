#![forbid(unsafe_code)]
//! Backing store for SimFS.
//!
//! Provides the `ByteDevice` trait (flat, byte-addressed storage with
//! pread/pwrite semantics), an in-memory and a file-backed implementation,
//! and [`BlockStore`], which binds a device to a [`Geometry`] and refuses any
//! access that would straddle a block boundary.

use parking_lot::Mutex;
use sfs_error::{Result, SfsError};
use sfs_types::{ByteOffset, Geometry};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Byte-addressed device for fixed-offset I/O (pread/pwrite semantics).
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all bytes in `buf` to `offset`.
    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

fn checked_range(offset: u64, len: usize, device_len: u64, op: &str) -> Result<u64> {
    let end = offset
        .checked_add(
            u64::try_from(len)
                .map_err(|_| SfsError::InvalidArgument(format!("{op} length overflows u64")))?,
        )
        .ok_or_else(|| SfsError::InvalidArgument(format!("{op} range overflows u64")))?;
    if end > device_len {
        return Err(SfsError::Corruption {
            block: 0,
            detail: format!("{op} out of bounds: offset={offset} len={len} device_len={device_len}"),
        });
    }
    Ok(end)
}

/// Zero-initialised in-memory device.
#[derive(Debug)]
pub struct MemByteDevice {
    bytes: Mutex<Vec<u8>>,
}

impl MemByteDevice {
    /// Allocate `len` zero bytes.
    pub fn zeroed(len: u64) -> Result<Self> {
        let too_big = || SfsError::InvalidGeometry(format!("store of {len} bytes does not fit memory"));
        let size = usize::try_from(len).map_err(|_| too_big())?;
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(size).map_err(|_| too_big())?;
        bytes.resize(size, 0_u8);
        Ok(Self {
            bytes: Mutex::new(bytes),
        })
    }

    /// Copy of the whole device contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

impl ByteDevice for MemByteDevice {
    fn len_bytes(&self) -> u64 {
        u64::try_from(self.bytes.lock().len()).unwrap_or(u64::MAX)
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.lock();
        let device_len = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        let end = checked_range(offset, buf.len(), device_len, "read")?;
        // Both bounds are <= bytes.len(), which is a usize.
        #[expect(clippy::cast_possible_truncation)]
        buf.copy_from_slice(&bytes[offset as usize..end as usize]);
        drop(bytes);
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.lock();
        let device_len = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        let end = checked_range(offset, buf.len(), device_len, "write")?;
        #[expect(clippy::cast_possible_truncation)]
        bytes[offset as usize..end as usize].copy_from_slice(buf);
        drop(bytes);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// File-backed byte device using positioned I/O.
///
/// This uses `std::os::unix::fs::FileExt`, which does not require a shared
/// seek position. A device made with [`FileByteDevice::create`] removes its
/// image file when dropped unless [`FileByteDevice::keep`] was called.
#[derive(Debug)]
pub struct FileByteDevice {
    file: File,
    path: PathBuf,
    len: u64,
    remove_on_drop: bool,
}

impl FileByteDevice {
    /// Create (or truncate) an image file of `len` zero bytes.
    pub fn create(path: impl AsRef<Path>, len: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        // Extending with set_len zero-fills the new region.
        file.set_len(len)?;
        debug!(path = %path.display(), len, "image_created");
        Ok(Self {
            file,
            path,
            len,
            remove_on_drop: true,
        })
    }

    /// Keep the image file on disk after the device is dropped.
    #[must_use]
    pub fn keep(mut self) -> Self {
        self.remove_on_drop = false;
        self
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        checked_range(offset, buf.len(), self.len, "read")?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        checked_range(offset, buf.len(), self.len, "write")?;
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for FileByteDevice {
    fn drop(&mut self) {
        if self.remove_on_drop {
            if let Err(err) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %err, "image_remove_failed");
            }
        }
    }
}

/// Block-bounded view of a byte device.
///
/// Every access must stay inside a single block; the driver splits requests
/// at block boundaries itself and a crossing access is reported as
/// corruption.
pub struct BlockStore {
    geometry: Geometry,
    dev: Box<dyn ByteDevice>,
}

impl std::fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStore")
            .field("geometry", &self.geometry)
            .field("dev_len", &self.dev.len_bytes())
            .finish()
    }
}

impl BlockStore {
    /// Bind `dev` to `geometry`. The device must cover every block.
    pub fn new(geometry: Geometry, dev: Box<dyn ByteDevice>) -> Result<Self> {
        let needed = geometry.total_bytes();
        let have = dev.len_bytes();
        if have < needed {
            return Err(SfsError::InvalidGeometry(format!(
                "device too small: len_bytes={have} needed={needed}"
            )));
        }
        Ok(Self { geometry, dev })
    }

    /// Zero-filled in-memory store sized for `geometry`.
    pub fn in_memory(geometry: Geometry) -> Result<Self> {
        let dev = MemByteDevice::zeroed(geometry.total_bytes())?;
        Self::new(geometry, Box::new(dev))
    }

    #[must_use]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    fn check_within_block(&self, addr: ByteOffset, len: usize) -> Result<()> {
        let in_block = self.geometry.offset_in_block(addr.0);
        let len = u64::try_from(len).unwrap_or(u64::MAX);
        if in_block.saturating_add(len) > self.geometry.block_size_u64() {
            return Err(SfsError::Corruption {
                block: addr.0 / self.geometry.block_size_u64(),
                detail: format!(
                    "access crosses block boundary: addr={} len={len}",
                    addr.0
                ),
            });
        }
        Ok(())
    }

    /// Read `buf.len()` bytes at `addr`, within one block.
    pub fn read_at(&self, addr: ByteOffset, buf: &mut [u8]) -> Result<()> {
        self.check_within_block(addr, buf.len())?;
        self.dev.read_exact_at(addr.0, buf)
    }

    /// Write `buf` at `addr`, within one block.
    pub fn write_at(&self, addr: ByteOffset, buf: &[u8]) -> Result<()> {
        self.check_within_block(addr, buf.len())?;
        self.dev.write_all_at(addr.0, buf)
    }

    pub fn sync(&self) -> Result<()> {
        self.dev.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> Geometry {
        Geometry::new(16 * 4, 16, 2).expect("geometry")
    }

    #[test]
    fn mem_device_starts_zeroed_and_round_trips() {
        let dev = MemByteDevice::zeroed(64).unwrap();
        assert_eq!(dev.len_bytes(), 64);
        assert!(dev.snapshot().iter().all(|&b| b == 0));

        dev.write_all_at(10, b"abc").unwrap();
        let mut buf = [0_u8; 3];
        dev.read_exact_at(10, &mut buf).unwrap();
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn mem_device_rejects_out_of_bounds() {
        let dev = MemByteDevice::zeroed(8).unwrap();
        let mut buf = [0_u8; 4];
        assert!(dev.read_exact_at(6, &mut buf).is_err());
        assert!(dev.write_all_at(u64::MAX, b"x").is_err());
    }

    #[test]
    fn mem_device_too_large_for_memory_is_invalid_geometry() {
        let err = MemByteDevice::zeroed(u64::MAX).unwrap_err();
        assert!(matches!(err, SfsError::InvalidGeometry(_)));
    }

    #[test]
    fn block_store_rejects_boundary_crossing() {
        let store = BlockStore::in_memory(geometry()).unwrap();
        store.write_at(ByteOffset(16), &[7_u8; 16]).unwrap();
        store.write_at(ByteOffset(20), &[1_u8; 12]).unwrap();

        let err = store.write_at(ByteOffset(20), &[1_u8; 13]).unwrap_err();
        assert!(matches!(err, SfsError::Corruption { block: 1, .. }));

        let mut buf = [0_u8; 17];
        assert!(store.read_at(ByteOffset(0), &mut buf).is_err());
    }

    #[test]
    fn block_store_requires_device_to_cover_geometry() {
        let dev = MemByteDevice::zeroed(32).unwrap();
        let err = BlockStore::new(geometry(), Box::new(dev)).unwrap_err();
        assert!(matches!(err, SfsError::InvalidGeometry(_)));
    }

    #[test]
    fn file_device_is_zero_filled_and_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        {
            let dev = FileByteDevice::create(&path, 128).unwrap();
            assert_eq!(dev.len_bytes(), 128);
            let mut buf = [0xFF_u8; 8];
            dev.read_exact_at(120, &mut buf).unwrap();
            assert_eq!(buf, [0_u8; 8]);

            dev.write_all_at(3, b"hello").unwrap();
            dev.sync().unwrap();
            let mut back = [0_u8; 5];
            dev.read_exact_at(3, &mut back).unwrap();
            assert_eq!(&back, b"hello");
            assert!(dev.write_all_at(126, b"xyz").is_err());
        }
        assert!(!path.exists());
    }

    #[test]
    fn file_device_keep_leaves_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kept.img");
        {
            let dev = FileByteDevice::create(&path, 32).unwrap().keep();
            dev.write_all_at(0, b"z").unwrap();
        }
        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), 32);
        assert_eq!(data[0], b'z');
    }
}
