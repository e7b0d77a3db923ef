//! FAT accessor: single-cell reads/writes and cluster-chain traversal.
//!
//! Reads go through the shared sector cache ([`crate::cache::SectorCache`]);
//! a miss loads and an LRU hit is free. Writes bypass the cache and hit the
//! device directly -- read the old 32-bit cell, preserve its reserved top
//! nibble, splice in the new value, write it back -- and only patch the
//! cached copy of the sector if one is already resident. There is no
//! write-allocate: a `put_cell` never pulls a sector into the cache that
//! wasn't already there. Both on-disk FAT copies are written on every
//! `put_cell`; the source this was grounded on wrote only the first copy,
//! but a driver that owns its own mirroring gets to keep the second FAT
//! copy live as an actual backup, so this one writes both.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bpb::BIOSParameterBlock;
use crate::cache::{SectorCache, SECTOR_SIZE};
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::{read_le_u32, write_le_u32, MAX_CHAIN_LEN};
use crate::{BAD_CLUSTER, END_OF_CHAIN_MIN, FAT_ENTRY_MASK, FAT_RESERVED_MASK, FREE_CLUSTER};

pub struct FatTable {
    device: Rc<dyn BlockDevice>,
    cache: Rc<RefCell<SectorCache>>,
    bytes_per_sector: usize,
    fat1_sector: usize,
    fat2_sector: usize,
    fat_cnt: usize,
    sectors_per_fat: usize,
    max_cluster: u32,
}

impl FatTable {
    pub fn new(
        bpb: &BIOSParameterBlock,
        device: Rc<dyn BlockDevice>,
        cache: Rc<RefCell<SectorCache>>,
    ) -> Self {
        Self {
            device,
            cache,
            bytes_per_sector: bpb.bytes_per_sector(),
            fat1_sector: bpb.fat1_sector(),
            fat2_sector: bpb.fat2_sector(),
            fat_cnt: bpb.fat_cnt(),
            sectors_per_fat: bpb.sectors_per_fat(),
            max_cluster: bpb.data_cluster_cnt() as u32 + 1,
        }
    }

    fn locate(&self, cluster: u32) -> (usize, usize) {
        let byte_offset = cluster as usize * 4;
        let sector = self.fat1_sector + byte_offset / self.bytes_per_sector;
        let in_sector = byte_offset % self.bytes_per_sector;
        (sector, in_sector)
    }

    fn check_range(&self, cluster: u32) -> Result<()> {
        if cluster < 2 || cluster > self.max_cluster {
            return Err(Error::corrupt(format!(
                "cluster {cluster} out of range (max {})",
                self.max_cluster
            )));
        }
        Ok(())
    }

    /// Read the 28-bit value of a FAT cell.
    pub fn get_cell(&self, cluster: u32) -> Result<u32> {
        self.check_range(cluster)?;
        let (sector, in_sector) = self.locate(cluster);
        let entry = self.cache.borrow_mut().get(sector)?;
        let value = read_le_u32(&entry.borrow().raw()[in_sector..in_sector + 4]);
        Ok(value & FAT_ENTRY_MASK)
    }

    /// Write the 28-bit value of a FAT cell to both on-disk FAT copies,
    /// preserving each copy's reserved top nibble. Never pulls a sector
    /// into the cache; if a sector is already cached, its copy is patched
    /// so later reads stay coherent.
    pub fn put_cell(&self, cluster: u32, value: u32) -> Result<()> {
        self.check_range(cluster)?;
        let (sector1, in_sector) = self.locate(cluster);
        for copy in 0..self.fat_cnt.max(1) {
            let sector = sector1 + copy * self.sectors_per_fat;
            self.write_cell_direct(sector, in_sector, value)?;
        }
        Ok(())
    }

    fn write_cell_direct(&self, sector: usize, in_sector: usize, value: u32) -> Result<()> {
        let mut buf = vec![0u8; SECTOR_SIZE];
        self.device.read_blocks(&mut buf, sector * SECTOR_SIZE)?;
        let old = read_le_u32(&buf[in_sector..in_sector + 4]);
        let merged = (old & FAT_RESERVED_MASK) | (value & FAT_ENTRY_MASK);
        write_le_u32(&mut buf[in_sector..in_sector + 4], merged);
        self.device.write_blocks(&buf, sector * SECTOR_SIZE)?;

        self.cache.borrow_mut().update_if_present(sector, |cached| {
            cached[in_sector..in_sector + 4].copy_from_slice(&merged.to_le_bytes());
        });
        Ok(())
    }

    pub fn is_free(value: u32) -> bool {
        value & FAT_ENTRY_MASK == FREE_CLUSTER
    }

    pub fn is_bad(value: u32) -> bool {
        value & FAT_ENTRY_MASK == BAD_CLUSTER
    }

    pub fn is_end_of_chain(value: u32) -> bool {
        value & FAT_ENTRY_MASK >= END_OF_CHAIN_MIN
    }

    /// Walk the cluster chain starting at `start`, returning every cluster
    /// in order. Stops at end-of-chain; fails if the chain is longer than
    /// could ever be valid for this volume, which means the FAT is corrupt
    /// (a cycle, most likely) rather than ask the caller to loop forever.
    pub fn chain(&self, start: u32) -> Result<Vec<u32>> {
        let mut clusters = Vec::new();
        let mut current = start;
        loop {
            clusters.push(current);
            if clusters.len() > MAX_CHAIN_LEN {
                return Err(Error::corrupt("cluster chain exceeds volume size, likely a cycle"));
            }
            let next = self.get_cell(current)?;
            if Self::is_end_of_chain(next) || Self::is_free(next) {
                break;
            }
            if Self::is_bad(next) {
                return Err(Error::corrupt(format!("chain runs into bad cluster {next}")));
            }
            current = next;
        }
        Ok(clusters)
    }

    /// Append `new_cluster` to the chain ending at `last_cluster` and mark
    /// `new_cluster` as the new end of chain.
    pub fn link(&self, last_cluster: u32, new_cluster: u32) -> Result<()> {
        self.put_cell(last_cluster, new_cluster)?;
        self.put_cell(new_cluster, crate::END_CLUSTER_MARK)
    }

    /// Free every cluster in `clusters` by zeroing its cell. Does not touch
    /// the free-space manager's bookkeeping; callers reconcile that
    /// separately via [`crate::freespace::FreeSpaceManager::release`].
    pub fn free_chain(&self, clusters: &[u32]) -> Result<()> {
        for &c in clusters {
            self.put_cell(c, FREE_CLUSTER)?;
        }
        Ok(())
    }

    pub fn max_cluster(&self) -> u32 {
        self.max_cluster
    }
}
