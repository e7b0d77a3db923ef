//! Sector cache shared by the FAT accessor and the directory engine.
//!
//! A `BlockCache` owns one sector-sized buffer. Reads go through
//! [`SectorCache::get`], which loads on miss and promotes on hit. Writes are
//! the caller's choice: [`fat::FatTable::put_cell`] bypasses this cache
//! entirely and writes the device directly (see that module), so this cache
//! never has to reason about write-allocate. Everything here is
//! single-mount, single-thread state -- `Rc<RefCell<_>>`, not
//! `Arc<RwLock<_>>`, and no process-wide singleton.

use std::cell::RefCell;
use std::num::NonZeroUsize;
use std::rc::Rc;

use lru::LruCache;

use crate::device::BlockDevice;
use crate::error::Result;

pub const SECTOR_SIZE: usize = 512;

pub trait Cache {
    fn read<T, V>(&self, offset: usize, f: impl FnOnce(&T) -> V) -> V;
    fn modify<T, V>(&mut self, offset: usize, f: impl FnOnce(&mut T) -> V) -> V;
    fn sync(&mut self) -> Result<()>;
}

pub struct BlockCache {
    buf: Vec<u8>,
    sector: usize,
    device: Rc<dyn BlockDevice>,
    dirty: bool,
}

impl BlockCache {
    fn load(sector: usize, device: Rc<dyn BlockDevice>) -> Result<Self> {
        let mut buf = vec![0u8; SECTOR_SIZE];
        device.read_blocks(&mut buf, sector * SECTOR_SIZE)?;
        Ok(Self {
            buf,
            sector,
            device,
            dirty: false,
        })
    }

    fn addr_of(&self, offset: usize) -> usize {
        &self.buf[offset] as *const u8 as usize
    }

    fn get_ref<T: Sized>(&self, offset: usize) -> &T {
        assert!(offset + std::mem::size_of::<T>() <= SECTOR_SIZE);
        unsafe { &*(self.addr_of(offset) as *const T) }
    }

    fn get_mut<T: Sized>(&mut self, offset: usize) -> &mut T {
        assert!(offset + std::mem::size_of::<T>() <= SECTOR_SIZE);
        self.dirty = true;
        unsafe { &mut *(self.addr_of(offset) as *mut T) }
    }

    pub fn raw(&self) -> &[u8] {
        &self.buf
    }

    pub fn raw_mut(&mut self) -> &mut [u8] {
        self.dirty = true;
        &mut self.buf
    }
}

impl Cache for BlockCache {
    fn read<T, V>(&self, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        f(self.get_ref(offset))
    }

    fn modify<T, V>(&mut self, offset: usize, f: impl FnOnce(&mut T) -> V) -> V {
        f(self.get_mut(offset))
    }

    fn sync(&mut self) -> Result<()> {
        if self.dirty {
            self.dirty = false;
            self.device.write_blocks(&self.buf, self.sector * SECTOR_SIZE)?;
        }
        Ok(())
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        let _ = self.sync();
    }
}

/// Bounded LRU of [`BlockCache`] entries keyed by sector index.
pub struct SectorCache {
    lru: LruCache<usize, Rc<RefCell<BlockCache>>>,
    device: Rc<dyn BlockDevice>,
}

impl SectorCache {
    pub fn new(device: Rc<dyn BlockDevice>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            lru: LruCache::new(capacity),
            device,
        }
    }

    /// Return the cache entry for `sector`, loading it on miss and evicting
    /// the least-recently-used entry if the cache is full and the evictee
    /// isn't currently held elsewhere.
    pub fn get(&mut self, sector: usize) -> Result<Rc<RefCell<BlockCache>>> {
        if let Some(entry) = self.lru.get(&sector) {
            return Ok(Rc::clone(entry));
        }
        let entry = Rc::new(RefCell::new(BlockCache::load(sector, Rc::clone(&self.device))?));
        if self.lru.len() == self.lru.cap().get() {
            if let Some((_, evictee)) = self.lru.peek_lru() {
                if Rc::strong_count(evictee) == 1 {
                    self.lru.pop_lru();
                }
            }
        }
        self.lru.put(sector, Rc::clone(&entry));
        Ok(entry)
    }

    /// Update the cached copy of `sector` in place, if present, without
    /// pulling it in on a miss. Used by writers that already wrote the
    /// device directly and only need the cache to stay coherent.
    pub fn update_if_present(&mut self, sector: usize, f: impl FnOnce(&mut [u8])) {
        if let Some(entry) = self.lru.peek_mut(&sector) {
            f(entry.borrow_mut().raw_mut());
        }
    }

    pub fn sync_all(&mut self) -> Result<()> {
        for (_, entry) in self.lru.iter() {
            entry.borrow_mut().sync()?;
        }
        Ok(())
    }
}
