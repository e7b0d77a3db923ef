//! Cluster-chain I/O: the read/write transfer loop shared by plain files
//! and directories (a directory's "content" is just its run of 32-byte
//! entries, so it is read and written through the exact same loop).
//!
//! A read or write walks the chain cluster by cluster, translating a
//! logical byte offset into a cluster index, a sector within that
//! cluster, and a byte offset within that sector, copying as much as fits
//! in the current sector before crossing into the next one. A write past
//! the current end of the chain extends it one cluster at a time via the
//! free-space manager, linking each new cluster onto the tail via the FAT.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bpb::BIOSParameterBlock;
use crate::cache::SectorCache;
use crate::error::Result;
use crate::fat::FatTable;
use crate::freespace::FreeSpaceManager;

pub struct Geometry {
    pub bytes_per_sector: usize,
    pub sectors_per_cluster: usize,
}

impl Geometry {
    pub fn from_bpb(bpb: &BIOSParameterBlock) -> Self {
        Self {
            bytes_per_sector: bpb.bytes_per_sector(),
            sectors_per_cluster: bpb.sectors_per_cluster(),
        }
    }

    pub fn cluster_size(&self) -> usize {
        self.bytes_per_sector * self.sectors_per_cluster
    }
}

/// Read up to `buf.len()` bytes starting at `offset` bytes into the chain
/// rooted at `first_cluster`. Returns the number of bytes actually read,
/// which is short if `offset + buf.len()` runs past `size`.
pub fn read_at(
    geometry: &Geometry,
    bpb: &BIOSParameterBlock,
    cache: &Rc<RefCell<SectorCache>>,
    fat: &FatTable,
    first_cluster: u32,
    size: u32,
    offset: u64,
    buf: &mut [u8],
) -> Result<usize> {
    if first_cluster == 0 || offset >= size as u64 {
        return Ok(0);
    }
    let to_read = buf.len().min((size as u64 - offset) as usize);
    if to_read == 0 {
        return Ok(0);
    }
    let chain = fat.chain(first_cluster)?;
    let cluster_size = geometry.cluster_size();

    let mut done = 0;
    while done < to_read {
        let abs = offset as usize + done;
        let cluster_index = abs / cluster_size;
        let Some(&cluster) = chain.get(cluster_index) else {
            break;
        };
        let in_cluster = abs % cluster_size;
        let sector_index = in_cluster / geometry.bytes_per_sector;
        let in_sector = in_cluster % geometry.bytes_per_sector;
        let sector = bpb.first_sector_of_cluster(cluster) + sector_index;

        let chunk = (geometry.bytes_per_sector - in_sector).min(to_read - done);
        let entry = cache.borrow_mut().get(sector)?;
        buf[done..done + chunk].copy_from_slice(&entry.borrow().raw()[in_sector..in_sector + chunk]);
        done += chunk;
    }
    Ok(done)
}

/// Write `buf` at `offset` bytes into the chain rooted at `*first_cluster`,
/// extending the chain (and updating `*first_cluster`) if the write runs
/// past the current allocation. Returns the number of bytes written and
/// the new logical size, which the caller persists into the directory
/// entry.
pub fn write_at(
    geometry: &Geometry,
    bpb: &BIOSParameterBlock,
    cache: &Rc<RefCell<SectorCache>>,
    fat: &FatTable,
    freespace: &mut FreeSpaceManager,
    first_cluster: &mut u32,
    size: u32,
    offset: u64,
    buf: &[u8],
) -> Result<(usize, u32)> {
    let cluster_size = geometry.cluster_size();
    let needed_end = offset + buf.len() as u64;

    if *first_cluster == 0 {
        *first_cluster = freespace.allocate_for_new_file()?;
        fat.put_cell(*first_cluster, crate::END_CLUSTER_MARK)?;
    }

    let mut chain = fat.chain(*first_cluster)?;
    let needed_clusters = ((needed_end as usize) + cluster_size - 1) / cluster_size;
    while chain.len() < needed_clusters {
        let last = *chain.last().unwrap();
        let new_cluster = freespace.allocate_near(last)?;
        fat.link(last, new_cluster)?;
        chain.push(new_cluster);
    }

    let mut done = 0;
    while done < buf.len() {
        let abs = offset as usize + done;
        let cluster_index = abs / cluster_size;
        let cluster = chain[cluster_index];
        let in_cluster = abs % cluster_size;
        let sector_index = in_cluster / geometry.bytes_per_sector;
        let in_sector = in_cluster % geometry.bytes_per_sector;
        let sector = bpb.first_sector_of_cluster(cluster) + sector_index;

        let chunk = (geometry.bytes_per_sector - in_sector).min(buf.len() - done);
        let entry = cache.borrow_mut().get(sector)?;
        entry.borrow_mut().raw_mut()[in_sector..in_sector + chunk]
            .copy_from_slice(&buf[done..done + chunk]);
        done += chunk;
    }

    let new_size = size.max(needed_end as u32);
    Ok((done, new_size))
}

/// Free every cluster in the chain rooted at `first_cluster` and report
/// them to the free-space manager. A no-op for an already-empty file.
pub fn truncate_to_empty(
    fat: &FatTable,
    freespace: &mut FreeSpaceManager,
    first_cluster: u32,
) -> Result<()> {
    if first_cluster == 0 {
        return Ok(());
    }
    let chain = fat.chain(first_cluster)?;
    fat.free_chain(&chain)?;
    for cluster in chain {
        freespace.release(cluster);
    }
    Ok(())
}
