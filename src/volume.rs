//! Mounted-volume facade: the one entry point a host adapter talks to.
//!
//! `VolumeContext` owns every piece of per-mount state -- the device
//! handle, the parsed BPB, the sector cache, the FAT accessor, the
//! free-space manager and the open-file table -- and exposes the
//! operations a FUSE-style host needs (open/read/write/close, readdir,
//! getattr, mkdir, unlink, rmdir, rename, truncate, utimens, statfs).
//! Everything below it (`dir`, `io`, `fat`, `freespace`) only knows about
//! clusters and directory slots; this module is where a path string and a
//! POSIX-shaped operation turn into calls against those primitives.
//!
//! Grounded on `FileSystem::open` in the source this was distilled from:
//! read the boot sector's BPB out of sector 0, check the FSInfo sector's
//! signature, build the FAT accessor over it, and scan for free space.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::bpb::{BIOSParameterBlock, FSInfo};
use crate::cache::{Cache, SectorCache};
use crate::device::BlockDevice;
use crate::dir::{self, DirCtx};
use crate::entry::ShortDirEntry;
use crate::error::{Error, Result};
use crate::fat::FatTable;
use crate::freespace::FreeSpaceManager;
use crate::io::{self, Geometry};
use crate::openfile::{self, OpenFileTable};
use crate::{ATTR_ARCHIVE, DEFAULT_CACHE_CAPACITY};

/// High bit set on an inode that doesn't correspond to a real cluster
/// number (every real cluster fits in 28 bits, so this bit is never set
/// by an on-disk `fst_clus_hi`/`fst_clus_lo` pair). Used for entries whose
/// `first_cluster` is still 0 -- an empty file, or a directory nobody has
/// added a child to yet -- which otherwise couldn't be told apart by
/// cluster number alone.
const SYNTHETIC_INODE_BIT: u32 = 0x8000_0000;

fn entry_inode(parent_cluster: u32, entry_index: usize, first_cluster: u32) -> u32 {
    if first_cluster != 0 {
        first_cluster
    } else {
        let salt = (entry_index as u32).wrapping_mul(0x9E37_79B1);
        SYNTHETIC_INODE_BIT | ((parent_cluster ^ salt) & !SYNTHETIC_INODE_BIT)
    }
}

/// Reference point for a [`VolumeContext::seek`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    /// `size - 1 + offset`, matching the source this was distilled from --
    /// not `size + offset`, so `Whence::End` with `offset == 0` lands on
    /// the last byte of the file rather than one past it.
    End,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Attributes a host `getattr` call needs, translated out of a
/// [`ShortDirEntry`] (or synthesized for the root directory, which has no
/// entry of its own).
#[derive(Debug, Clone, Copy)]
pub struct Attr {
    pub inode: u32,
    pub is_dir: bool,
    pub read_only: bool,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

/// Volume-wide space accounting, as reported to a host's `statfs`.
#[derive(Debug, Clone, Copy)]
pub struct StatFs {
    pub bytes_per_sector: u64,
    pub sectors_per_cluster: u64,
    pub total_clusters: u64,
    pub free_clusters: u64,
}

struct Located {
    parent_cluster: u32,
    entry_index: usize,
    entry: ShortDirEntry,
}

pub struct VolumeContext {
    device: Rc<dyn BlockDevice>,
    cache: Rc<RefCell<SectorCache>>,
    bpb: BIOSParameterBlock,
    geometry: Geometry,
    fat: FatTable,
    freespace: FreeSpaceManager,
    open_files: OpenFileTable,
    root_cluster: u32,
}

impl VolumeContext {
    /// Mount a volume: read the BPB out of sector 0, validate the FSInfo
    /// sector, and scan the FAT once to build the free-space map.
    pub fn mount(device: Rc<dyn BlockDevice>) -> Result<Self> {
        Self::mount_with_cache_capacity(device, DEFAULT_CACHE_CAPACITY)
    }

    pub fn mount_with_cache_capacity(device: Rc<dyn BlockDevice>, cache_capacity: usize) -> Result<Self> {
        let cache = Rc::new(RefCell::new(SectorCache::new(Rc::clone(&device), cache_capacity)));

        let bpb = {
            let entry = cache.borrow_mut().get(0)?;
            entry.borrow().read(0, |bpb: &BIOSParameterBlock| *bpb)
        };
        if !bpb.is_valid() {
            return Err(Error::corrupt("boot sector does not look like a FAT32 BPB"));
        }

        let fsinfo_valid = {
            let entry = cache.borrow_mut().get(bpb.fs_info_sector())?;
            entry.borrow().read(0, |fsinfo: &FSInfo| fsinfo.check_signature())
        };
        if !fsinfo_valid {
            log::warn!("FSInfo sector has an invalid signature; trusting a full FAT scan instead");
        }

        let geometry = Geometry::from_bpb(&bpb);
        let fat = FatTable::new(&bpb, Rc::clone(&device), Rc::clone(&cache));
        let freespace = FreeSpaceManager::scan(&fat)?;
        let root_cluster = bpb.root_cluster();

        log::info!(
            "mounted FAT32 volume: {} bytes/sector, {} sectors/cluster, root cluster {}",
            bpb.bytes_per_sector(),
            bpb.sectors_per_cluster(),
            root_cluster
        );

        Ok(Self {
            device,
            cache,
            bpb,
            geometry,
            fat,
            freespace,
            open_files: OpenFileTable::new(),
            root_cluster,
        })
    }

    fn dir_ctx(&mut self) -> DirCtx<'_> {
        DirCtx {
            bpb: &self.bpb,
            geometry: &self.geometry,
            cache: &self.cache,
            fat: &self.fat,
            freespace: &mut self.freespace,
        }
    }

    /// Look up `path`, returning `None` only for the root itself (which
    /// has no directory entry of its own) and an error if an intermediate
    /// component doesn't resolve.
    fn locate(&mut self, path: &str) -> Result<Option<Located>> {
        if path.is_empty() || path == "/" {
            return Ok(None);
        }
        let ctx = self.dir_ctx();
        let resolved = dir::resolve(&ctx, self.root_cluster, path)?;
        let (entry_index, entry) = resolved
            .found
            .ok_or_else(|| Error::not_found(String::from_utf8_lossy(&resolved.name).into_owned()))?;
        Ok(Some(Located {
            parent_cluster: resolved.parent_cluster,
            entry_index,
            entry,
        }))
    }

    fn attr_of(&self, parent_cluster: u32, entry_index: usize, entry: &ShortDirEntry) -> Attr {
        let (wrt_date, wrt_time) = entry.write_time();
        let (crt_date, crt_time) = entry.create_time();
        Attr {
            inode: entry_inode(parent_cluster, entry_index, entry.first_cluster()),
            is_dir: entry.is_dir(),
            read_only: entry.is_read_only(),
            size: entry.file_size() as u64,
            atime: crate::dostime::decode(entry.access_date(), 0),
            mtime: crate::dostime::decode(wrt_date, wrt_time),
            ctime: crate::dostime::decode(crt_date, crt_time),
        }
    }

    fn root_attr(&self) -> Attr {
        Attr {
            inode: self.root_cluster,
            is_dir: true,
            read_only: false,
            size: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
        }
    }

    pub fn getattr(&mut self, path: &str) -> Result<Attr> {
        match self.locate(path)? {
            None => Ok(self.root_attr()),
            Some(located) => Ok(self.attr_of(located.parent_cluster, located.entry_index, &located.entry)),
        }
    }

    pub fn statfs(&self) -> StatFs {
        StatFs {
            bytes_per_sector: self.bpb.bytes_per_sector() as u64,
            sectors_per_cluster: self.bpb.sectors_per_cluster() as u64,
            total_clusters: self.freespace.free_clusters() + self.freespace.used_clusters(),
            free_clusters: self.freespace.free_clusters(),
        }
    }

    /// Open `path` as a directory, returning the fd subsequent `readdir`/
    /// `releasedir` calls use. Pins the directory in the open table for
    /// the duration, the same way `open` pins a file, so a concurrent
    /// `rmdir`/`rename` can't invalidate it mid-listing.
    pub fn opendir(&mut self, path: &str) -> Result<u32> {
        let (inode, parent_cluster, entry_index, first_cluster) = match self.locate(path)? {
            None => (self.root_cluster, self.root_cluster, usize::MAX, self.root_cluster),
            Some(located) => {
                if !located.entry.is_dir() {
                    return Err(Error::NotDir(path.to_string()));
                }
                let inode = entry_inode(located.parent_cluster, located.entry_index, located.entry.first_cluster());
                (inode, located.parent_cluster, located.entry_index, located.entry.first_cluster())
            }
        };
        self.open_files.acquire(inode, parent_cluster, entry_index, true, 0, first_cluster);
        Ok(inode)
    }

    /// Release a handle acquired through `opendir`.
    pub fn releasedir(&mut self, fd: u32) -> Result<()> {
        self.release_handle(fd)
    }

    /// List the entries of a directory already open via `opendir`.
    pub fn readdir(&mut self, fd: u32) -> Result<Vec<(String, Attr)>> {
        let handle = self.open_files.lookup(fd).ok_or_else(|| Error::invalid("readdir on an unopened directory"))?;
        let (parent_cluster, entry_index, is_dir) = {
            let h = handle.borrow();
            (h.parent_inode, h.entry_index, h.is_dir)
        };
        if !is_dir {
            return Err(Error::NotDir(format!("fd {fd}")));
        }
        let dir_cluster = if entry_index == usize::MAX {
            self.root_cluster
        } else {
            let ctx = self.dir_ctx();
            let entry = dir::read_entry(&ctx, parent_cluster, entry_index)?
                .ok_or_else(|| Error::corrupt("open directory's entry disappeared"))?;
            entry.first_cluster()
        };
        let ctx = self.dir_ctx();
        let entries = dir::list(&ctx, dir_cluster)?;
        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(index, (name, entry))| {
                let attr = self.attr_of(dir_cluster, index, &entry);
                (String::from_utf8_lossy(&name).into_owned(), attr)
            })
            .collect())
    }

    /// Open `path` for I/O, returning the inode a host adapter should use
    /// for subsequent `read`/`write`/`seek`/`close` calls. The handle's
    /// cursor starts at offset 0, sitting on the file's first cluster.
    pub fn open(&mut self, path: &str) -> Result<u32> {
        let located = self.locate(path)?.ok_or_else(|| Error::IsDir(path.to_string()))?;
        if located.entry.is_dir() {
            return Err(Error::IsDir(path.to_string()));
        }
        let inode = entry_inode(located.parent_cluster, located.entry_index, located.entry.first_cluster());
        self.open_files.acquire(
            inode,
            located.parent_cluster,
            located.entry_index,
            located.entry.is_dir(),
            located.entry.file_size(),
            located.entry.first_cluster(),
        );
        Ok(inode)
    }

    fn release_handle(&mut self, inode: u32) -> Result<()> {
        let Some(released) = self.open_files.release(inode) else {
            return Ok(());
        };
        if Rc::strong_count(&released) > 1 {
            // Another handle is still live; nothing to tear down yet.
            self.cache.borrow_mut().sync_all()?;
            return Ok(());
        }
        let entry = released.borrow();
        if entry.delete_on_release {
            let first_cluster = entry.clusters.first().copied().unwrap_or(0);
            if first_cluster != 0 {
                io::truncate_to_empty(&self.fat, &mut self.freespace, first_cluster)?;
            }
        }
        drop(entry);
        // Writes must reach media (or the host's durable cache) by close
        // time at the latest; the sector cache is write-back, so this is
        // the last point that's guaranteed.
        self.cache.borrow_mut().sync_all()?;
        Ok(())
    }

    /// Close `inode`. On the last matching `open`, flushes the sector
    /// cache and, if the entry was unlinked while still open, frees its
    /// clusters.
    pub fn close(&mut self, inode: u32) -> Result<()> {
        self.release_handle(inode)
    }

    /// Reposition `inode`'s cursor and return the new offset. `INVAL` if
    /// the result would fall outside `0..=size`.
    pub fn seek(&mut self, inode: u32, offset: i64, whence: Whence) -> Result<u64> {
        let handle = self.open_files.lookup(inode).ok_or_else(|| Error::invalid("seek on an unopened inode"))?;
        let (is_dir, size, cur_offset) = {
            let h = handle.borrow();
            (h.is_dir, h.size, h.offset)
        };
        if is_dir {
            return Err(Error::IsDir(format!("inode {inode}")));
        }

        let base: i64 = match whence {
            Whence::Start => 0,
            Whence::Current => cur_offset as i64,
            Whence::End => size as i64 - 1,
        };
        let target = base
            .checked_add(offset)
            .ok_or_else(|| Error::invalid(format!("seek overflow on inode {inode}")))?;
        if target < 0 || target as u64 > size as u64 {
            return Err(Error::invalid(format!("seek out of range for inode {inode}")));
        }
        let new_offset = target as u64;

        let current_cluster = self.cluster_at_offset(&handle, new_offset)?;
        let mut h = handle.borrow_mut();
        h.offset = new_offset;
        h.current_cluster = current_cluster;
        Ok(new_offset)
    }

    /// The cluster `new_offset` bytes into the handle's file falls in, 0 if
    /// the file has no clusters yet or the offset runs past its last one.
    fn cluster_at_offset(&mut self, handle: &Rc<RefCell<openfile::OpenEntry>>, new_offset: u64) -> Result<u32> {
        let (parent_cluster, entry_index, delete_on_release, chain_head) = {
            let h = handle.borrow();
            (h.parent_inode, h.entry_index, h.delete_on_release, h.clusters.first().copied().unwrap_or(0))
        };
        let first_cluster = if delete_on_release {
            chain_head
        } else {
            let ctx = self.dir_ctx();
            let entry = dir::read_entry(&ctx, parent_cluster, entry_index)?
                .ok_or_else(|| Error::corrupt("open file's directory entry disappeared"))?;
            entry.first_cluster()
        };
        if first_cluster == 0 {
            return Ok(0);
        }
        let cluster_index = (new_offset as usize) / self.geometry.cluster_size();
        let chain = self.fat.chain(first_cluster)?;
        Ok(chain.get(cluster_index).copied().unwrap_or(0))
    }

    /// Read into `buf` at the handle's current offset, advancing it by the
    /// number of bytes actually read. Also stamps the entry's access-date.
    pub fn read(&mut self, inode: u32, buf: &mut [u8]) -> Result<usize> {
        let handle = self.open_files.lookup(inode).ok_or_else(|| Error::invalid("read on an unopened inode"))?;
        let (parent_cluster, entry_index, is_dir, delete_on_release, chain_head, size, offset) = {
            let h = handle.borrow();
            (
                h.parent_inode,
                h.entry_index,
                h.is_dir,
                h.delete_on_release,
                h.clusters.first().copied().unwrap_or(0),
                h.size,
                h.offset,
            )
        };
        if is_dir {
            return Err(Error::IsDir(format!("inode {inode}")));
        }

        // The directory entry is the source of truth for which cluster a
        // file starts at -- unless it's been unlinked, in which case the
        // slot may belong to someone else now and the handle's own record
        // is all that's left.
        let first_cluster = if delete_on_release {
            chain_head
        } else {
            let mut parent_cluster_mut = parent_cluster;
            let ctx0 = self.dir_ctx();
            let mut entry = dir::read_entry(&ctx0, parent_cluster_mut, entry_index)?
                .ok_or_else(|| Error::corrupt("open file's directory entry disappeared"))?;
            let first_cluster = entry.first_cluster();
            let (date, _) = crate::dostime::encode(unix_now());
            entry.set_access_date(date);
            let mut ctx = self.dir_ctx();
            dir::write_entry(&mut ctx, &mut parent_cluster_mut, entry_index, &entry)?;
            first_cluster
        };

        let read = io::read_at(&self.geometry, &self.bpb, &self.cache, &self.fat, first_cluster, size, offset, buf)?;

        let new_offset = offset + read as u64;
        let current_cluster = self.cluster_at_offset(&handle, new_offset)?;
        let mut h = handle.borrow_mut();
        h.offset = new_offset;
        h.current_cluster = current_cluster;
        Ok(read)
    }

    /// Write `buf` at the handle's current offset, extending the chain as
    /// needed, persisting the new size back into the parent directory's
    /// entry, and advancing the cursor by the number of bytes written.
    pub fn write(&mut self, inode: u32, buf: &[u8]) -> Result<usize> {
        let handle = self.open_files.lookup(inode).ok_or_else(|| Error::invalid("write on an unopened inode"))?;
        let (parent_cluster, entry_index, is_dir, size, delete_on_release, chain_head, offset) = {
            let h = handle.borrow();
            (
                h.parent_inode,
                h.entry_index,
                h.is_dir,
                h.size,
                h.delete_on_release,
                h.clusters.first().copied().unwrap_or(0),
                h.offset,
            )
        };
        if is_dir {
            return Err(Error::IsDir(format!("inode {inode}")));
        }

        // Once unlinked, the directory slot this handle used to own may
        // already hold an unrelated entry (swap-with-last reused it), so
        // writes go straight to the chain and stay off the directory
        // entirely until the final close frees it.
        let written = if delete_on_release {
            let mut first_cluster = chain_head;
            let (written, new_size) = io::write_at(
                &self.geometry,
                &self.bpb,
                &self.cache,
                &self.fat,
                &mut self.freespace,
                &mut first_cluster,
                size,
                offset,
                buf,
            )?;
            let mut h = handle.borrow_mut();
            h.clusters = vec![first_cluster];
            h.size = new_size;
            written
        } else {
            let mut parent_cluster_mut = parent_cluster;
            let ctx0 = self.dir_ctx();
            let mut entry = dir::read_entry(&ctx0, parent_cluster_mut, entry_index)?
                .ok_or_else(|| Error::corrupt("open file's directory entry disappeared"))?;
            if entry.is_read_only() {
                return Err(Error::Access(format!("inode {inode}")));
            }

            let mut first_cluster = entry.first_cluster();
            let (written, new_size) = io::write_at(
                &self.geometry,
                &self.bpb,
                &self.cache,
                &self.fat,
                &mut self.freespace,
                &mut first_cluster,
                size,
                offset,
                buf,
            )?;

            entry.set_first_cluster(first_cluster);
            entry.set_file_size(new_size);
            let (date, time) = crate::dostime::encode(unix_now());
            entry.set_write_time(date, time);

            let mut ctx = self.dir_ctx();
            dir::write_entry(&mut ctx, &mut parent_cluster_mut, entry_index, &entry)?;

            handle.borrow_mut().size = new_size;
            written
        };

        let new_offset = offset + written as u64;
        let current_cluster = self.cluster_at_offset(&handle, new_offset)?;
        let mut h = handle.borrow_mut();
        h.offset = new_offset;
        h.current_cluster = current_cluster;
        Ok(written)
    }

    pub fn truncate(&mut self, path: &str, new_size: u32) -> Result<()> {
        let located = self.locate(path)?.ok_or_else(|| Error::IsDir(path.to_string()))?;
        if located.entry.is_dir() {
            return Err(Error::IsDir(path.to_string()));
        }
        if located.entry.is_read_only() {
            return Err(Error::Access(path.to_string()));
        }

        let mut entry = located.entry;
        let mut parent_cluster = located.parent_cluster;
        let old_size = entry.file_size();
        let mut first_cluster = entry.first_cluster();

        if new_size == 0 {
            io::truncate_to_empty(&self.fat, &mut self.freespace, first_cluster)?;
            first_cluster = 0;
        } else if new_size < old_size && first_cluster != 0 {
            let cluster_size = self.geometry.cluster_size() as u32;
            let needed_clusters = ((new_size + cluster_size - 1) / cluster_size) as usize;
            let chain = self.fat.chain(first_cluster)?;
            if needed_clusters < chain.len() {
                let (keep, shed) = chain.split_at(needed_clusters);
                self.fat.put_cell(*keep.last().unwrap(), crate::END_CLUSTER_MARK)?;
                self.fat.free_chain(shed)?;
                for &cluster in shed {
                    self.freespace.release(cluster);
                }
            }
        } else if new_size > old_size {
            // Grow without touching existing bytes: an empty write at the
            // new end just extends the chain up to that offset.
            io::write_at(
                &self.geometry,
                &self.bpb,
                &self.cache,
                &self.fat,
                &mut self.freespace,
                &mut first_cluster,
                old_size,
                new_size as u64,
                &[],
            )?;
        }

        entry.set_first_cluster(first_cluster);
        entry.set_file_size(new_size);
        let mut ctx = self.dir_ctx();
        dir::write_entry(&mut ctx, &mut parent_cluster, located.entry_index, &entry)?;
        Ok(())
    }

    pub fn utimens(&mut self, path: &str, atime: Option<i64>, mtime: Option<i64>) -> Result<()> {
        let located = self.locate(path)?.ok_or_else(|| Error::invalid("utimens on root"))?;
        let mut entry = located.entry;
        let mut parent_cluster = located.parent_cluster;
        if let Some(atime) = atime {
            let (date, _) = crate::dostime::encode(atime);
            entry.set_access_date(date);
        }
        if let Some(mtime) = mtime {
            let (date, time) = crate::dostime::encode(mtime);
            entry.set_write_time(date, time);
        }
        let mut ctx = self.dir_ctx();
        dir::write_entry(&mut ctx, &mut parent_cluster, located.entry_index, &entry)?;
        Ok(())
    }

    fn create(&mut self, path: &str, is_dir: bool) -> Result<Attr> {
        let ctx0 = self.dir_ctx();
        let resolved = dir::resolve(&ctx0, self.root_cluster, path)?;
        if resolved.found.is_some() {
            return Err(Error::Exists(path.to_string()));
        }

        let mut entry = ShortDirEntry::new(&resolved.name, 0, is_dir);
        if !is_dir {
            entry.set_attr(ATTR_ARCHIVE);
        }
        let now = unix_now();
        let (date, time) = crate::dostime::encode(now);
        entry.set_create_time(date, time);
        entry.set_write_time(date, time);
        entry.set_access_date(date);

        let mut parent_cluster = resolved.parent_cluster;
        let mut ctx = self.dir_ctx();
        let entry_index = dir::append_entry(&mut ctx, &mut parent_cluster, &entry)?;
        Ok(self.attr_of(parent_cluster, entry_index, &entry))
    }

    pub fn create_file(&mut self, path: &str) -> Result<Attr> {
        self.create(path, false)
    }

    pub fn mkdir(&mut self, path: &str) -> Result<Attr> {
        self.create(path, true)
    }

    /// Remove a plain file. If it's currently open, the clusters are freed
    /// on the final `close` instead of right now.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let located = self.locate(path)?.ok_or_else(|| Error::IsDir(path.to_string()))?;
        if located.entry.is_dir() {
            return Err(Error::IsDir(path.to_string()));
        }
        if located.entry.is_read_only() {
            return Err(Error::Access(path.to_string()));
        }

        let inode = entry_inode(located.parent_cluster, located.entry_index, located.entry.first_cluster());
        if let Some(open) = self.open_files.lookup(inode) {
            let mut open = open.borrow_mut();
            open.delete_on_release = true;
            open.clusters = vec![located.entry.first_cluster()];
        } else if located.entry.first_cluster() != 0 {
            io::truncate_to_empty(&self.fat, &mut self.freespace, located.entry.first_cluster())?;
        }

        let mut parent_cluster = located.parent_cluster;
        let mut ctx = self.dir_ctx();
        dir::delete_entry(&mut ctx, &mut parent_cluster, located.entry_index)
    }

    /// Remove an empty directory.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let located = self.locate(path)?.ok_or_else(|| Error::invalid("cannot remove root"))?;
        if !located.entry.is_dir() {
            return Err(Error::NotDir(path.to_string()));
        }
        let child_cluster = located.entry.first_cluster();
        if child_cluster != 0 {
            let ctx = self.dir_ctx();
            if !dir::list(&ctx, child_cluster)?.is_empty() {
                return Err(Error::NotEmpty(path.to_string()));
            }
            io::truncate_to_empty(&self.fat, &mut self.freespace, child_cluster)?;
        }

        let mut parent_cluster = located.parent_cluster;
        let mut ctx = self.dir_ctx();
        dir::delete_entry(&mut ctx, &mut parent_cluster, located.entry_index)
    }

    /// Move the entry at `from` to `to`: append a copy under the new name
    /// at the destination, then delete the source slot. `to` must not
    /// already exist.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let source = self.locate(from)?.ok_or_else(|| Error::invalid("cannot rename root"))?;

        let ctx0 = self.dir_ctx();
        let dest_resolved = dir::resolve(&ctx0, self.root_cluster, to)?;
        if dest_resolved.found.is_some() {
            return Err(Error::Exists(to.to_string()));
        }

        let mut moved = source.entry;
        moved.set_name(&dest_resolved.name);

        let mut dest_parent = dest_resolved.parent_cluster;
        let mut ctx = self.dir_ctx();
        dir::append_entry(&mut ctx, &mut dest_parent, &moved)?;

        let mut source_parent = source.parent_cluster;
        let mut ctx = self.dir_ctx();
        dir::delete_entry(&mut ctx, &mut source_parent, source.entry_index)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.cache.borrow_mut().sync_all()
    }

    /// The underlying block device, for a host adapter that needs to flush
    /// or query it directly (e.g. `fsync`).
    pub fn device(&self) -> &Rc<dyn BlockDevice> {
        &self.device
    }

    /// Unmount the volume: flush every dirty sector to the device. Takes
    /// `self` by value, so the device handle drops with it and the
    /// context can't be used for another call afterward.
    pub fn unmount(self) -> Result<()> {
        self.cache.borrow_mut().sync_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::file::FileDevice;
    use std::fs;

    fn mounted_image() -> (tempfile::TempDir, VolumeContext) {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("disk.img");
        crate::test_support::format_minimal_fat32(&image_path);
        let device = Rc::new(FileDevice::open(&image_path).unwrap());
        let vol = VolumeContext::mount(device).unwrap();
        (dir, vol)
    }

    /// `opendir`/`readdir`/`releasedir` in one shot, for tests that just
    /// want the listing.
    fn list_dir(vol: &mut VolumeContext, path: &str) -> Vec<(String, Attr)> {
        let fd = vol.opendir(path).unwrap();
        let entries = vol.readdir(fd).unwrap();
        vol.releasedir(fd).unwrap();
        entries
    }

    #[test]
    fn mount_reads_root_and_reports_statfs() {
        let (_dir, mut vol) = mounted_image();
        let attr = vol.getattr("/").unwrap();
        assert!(attr.is_dir);
        let stat = vol.statfs();
        assert!(stat.free_clusters > 0);
        assert_eq!(list_dir(&mut vol, "/").len(), 0);
    }

    #[test]
    fn create_write_read_and_close_round_trips() {
        let (_dir, mut vol) = mounted_image();
        vol.create_file("/hello.txt").unwrap();
        let inode = vol.open("/hello.txt").unwrap();
        let written = vol.write(inode, b"hello world").unwrap();
        assert_eq!(written, 11);
        vol.seek(inode, 0, Whence::Start).unwrap();
        let mut buf = [0u8; 11];
        let read = vol.read(inode, &mut buf).unwrap();
        assert_eq!(read, 11);
        assert_eq!(&buf, b"hello world");
        vol.close(inode).unwrap();

        let attr = vol.getattr("/hello.txt").unwrap();
        assert_eq!(attr.size, 11);
        assert!(!attr.is_dir);
    }

    #[test]
    fn seek_rejects_offsets_past_the_end_of_the_file() {
        let (_dir, mut vol) = mounted_image();
        vol.create_file("/seek.txt").unwrap();
        let inode = vol.open("/seek.txt").unwrap();
        vol.write(inode, b"12345").unwrap();

        assert_eq!(vol.seek(inode, 0, Whence::Start).unwrap(), 0);
        assert_eq!(vol.seek(inode, 5, Whence::Start).unwrap(), 5);
        assert!(matches!(vol.seek(inode, 6, Whence::Start), Err(Error::Invalid(_))));
        assert_eq!(vol.seek(inode, 0, Whence::End).unwrap(), 4);
        assert_eq!(vol.seek(inode, -2, Whence::Current).unwrap(), 2);
        vol.close(inode).unwrap();
    }

    #[test]
    fn mkdir_then_rmdir_requires_empty() {
        let (_dir, mut vol) = mounted_image();
        vol.mkdir("/sub").unwrap();
        let entries = list_dir(&mut vol, "/");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "sub");

        vol.create_file("/sub/inner.txt").unwrap();
        assert!(matches!(vol.rmdir("/sub"), Err(Error::NotEmpty(_))));
        vol.unlink("/sub/inner.txt").unwrap();
        vol.rmdir("/sub").unwrap();
        assert_eq!(list_dir(&mut vol, "/").len(), 0);
    }

    #[test]
    fn unlink_of_open_file_defers_cluster_release_to_close() {
        let (_dir, mut vol) = mounted_image();
        vol.create_file("/doomed.txt").unwrap();
        let inode = vol.open("/doomed.txt").unwrap();
        vol.write(inode, b"data").unwrap();
        vol.unlink("/doomed.txt").unwrap();
        assert!(vol.getattr("/doomed.txt").is_err());
        vol.close(inode).unwrap();
    }

    #[test]
    fn rename_moves_entry_and_rejects_existing_destination() {
        let (_dir, mut vol) = mounted_image();
        vol.create_file("/a.txt").unwrap();
        vol.create_file("/b.txt").unwrap();
        assert!(matches!(vol.rename("/a.txt", "/b.txt"), Err(Error::Exists(_))));
        vol.rename("/a.txt", "/c.txt").unwrap();
        assert!(vol.getattr("/a.txt").is_err());
        assert!(vol.getattr("/c.txt").is_ok());
        let _ = fs::metadata(_dir.path());
    }
}
