//! Block device interface.

use crate::error::Result;

/// Something that looks like a regular file opened read-write: byte-addressable,
/// block-aligned reads and writes. The core is generic over this trait so that
/// tests can back it with a [`tempfile`](https://docs.rs/tempfile) image instead
/// of a real disk.
pub trait BlockDevice {
    /// Read block(s) from the device.
    ///
    /// - `offset` must be a multiple of `BLOCK_SIZE`.
    /// - `buf.len()` must be a multiple of `BLOCK_SIZE`.
    fn read_blocks(&self, buf: &mut [u8], offset: usize) -> Result<()>;

    /// Write block(s) to the device.
    ///
    /// - `offset` must be a multiple of `BLOCK_SIZE`.
    /// - `buf.len()` must be a multiple of `BLOCK_SIZE`.
    fn write_blocks(&self, buf: &[u8], offset: usize) -> Result<()>;
}

/// A [`BlockDevice`] backed directly by a `std::fs::File` opened read-write.
///
/// This is the only device implementation the crate ships: the target
/// environment is a regular user-space process, so there is no need for the
/// `no_std` device abstraction the source this was adapted from carried.
pub mod file {
    use super::BlockDevice;
    use crate::error::Result;
    use std::cell::RefCell;
    use std::fs::{File, OpenOptions};
    use std::io::{Read, Seek, SeekFrom, Write};
    use std::path::Path;

    pub struct FileDevice {
        file: RefCell<File>,
    }

    impl FileDevice {
        pub fn open(path: impl AsRef<Path>) -> Result<Self> {
            let file = OpenOptions::new().read(true).write(true).open(path)?;
            Ok(Self {
                file: RefCell::new(file),
            })
        }

        pub fn create_with_size(path: impl AsRef<Path>, size: u64) -> Result<Self> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            file.set_len(size)?;
            Ok(Self {
                file: RefCell::new(file),
            })
        }
    }

    impl BlockDevice for FileDevice {
        fn read_blocks(&self, buf: &mut [u8], offset: usize) -> Result<()> {
            let mut file = self.file.borrow_mut();
            file.seek(SeekFrom::Start(offset as u64))?;
            file.read_exact(buf)?;
            Ok(())
        }

        fn write_blocks(&self, buf: &[u8], offset: usize) -> Result<()> {
            let mut file = self.file.borrow_mut();
            file.seek(SeekFrom::Start(offset as u64))?;
            file.write_all(buf)?;
            Ok(())
        }
    }
}
