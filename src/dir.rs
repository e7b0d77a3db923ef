//! Directory engine: path resolution and entry management.
//!
//! A directory's content is a flat run of 32-byte entries read and written
//! through the same cluster-chain transfer loop as file content (see
//! [`crate::io`]); there is no separate "directory block" format. Path
//! resolution walks one component at a time the way the source's
//! `fat_lookup_dir` does, opening each intermediate directory and closing
//! it once its child has been found, and a deleted entry is reclaimed by
//! swapping the last live entry into its slot and zeroing the vacated
//! last slot, exactly as the source's `dir_delete_entry` does, rather
//! than leaving a tombstone to skip over on every later scan.
//!
//! A newly created directory starts with zero entries and an unallocated
//! (`first_cluster == 0`) chain -- this driver does not synthesize `.`
//! and `..` bootstrap entries, matching the source it was grounded on.
//! Path resolution therefore never special-cases `.`/`..` as directory
//! entries; `.` is skipped as a path component and `..` is not supported
//! (the host adapter is expected to resolve `..` itself via its own path
//! cache before calling in).

use std::cell::RefCell;
use std::rc::Rc;

use crate::bpb::BIOSParameterBlock;
use crate::cache::SectorCache;
use crate::entry::ShortDirEntry;
use crate::error::{Error, Result};
use crate::fat::FatTable;
use crate::freespace::FreeSpaceManager;
use crate::io::{self, Geometry};
use crate::{DIRENT_SIZE, SHORT_NAME_LEN};

pub struct DirCtx<'a> {
    pub bpb: &'a BIOSParameterBlock,
    pub geometry: &'a Geometry,
    pub cache: &'a Rc<RefCell<SectorCache>>,
    pub fat: &'a FatTable,
    pub freespace: &'a mut FreeSpaceManager,
}

/// Truncate or space-pad `name` into the fixed 11-byte on-disk slot width
/// used for byte-exact comparison.
pub fn normalize_name(name: &[u8]) -> [u8; SHORT_NAME_LEN] {
    let mut slot = [b' '; SHORT_NAME_LEN];
    let len = name.len().min(SHORT_NAME_LEN);
    slot[..len].copy_from_slice(&name[..len]);
    slot
}

fn capacity(ctx: &DirCtx<'_>, first_cluster: u32) -> Result<u32> {
    if first_cluster == 0 {
        return Ok(0);
    }
    let chain = ctx.fat.chain(first_cluster)?;
    Ok((chain.len() * ctx.geometry.cluster_size()) as u32)
}

/// Read the entry at slot `index` within the directory rooted at
/// `first_cluster`. `None` means this slot and everything after it is
/// free -- either the slot is zeroed or it falls past the chain's
/// currently allocated capacity.
pub fn read_entry(ctx: &DirCtx<'_>, first_cluster: u32, index: usize) -> Result<Option<ShortDirEntry>> {
    let cap = capacity(ctx, first_cluster)?;
    let offset = (index * DIRENT_SIZE) as u64;
    if first_cluster == 0 || offset >= cap as u64 {
        return Ok(None);
    }
    let mut buf = [0u8; DIRENT_SIZE];
    let n = io::read_at(ctx.geometry, ctx.bpb, ctx.cache, ctx.fat, first_cluster, cap, offset, &mut buf)?;
    if n != DIRENT_SIZE {
        return Ok(None);
    }
    let entry = ShortDirEntry::from_bytes(&buf);
    if entry.is_end_marker() {
        Ok(None)
    } else {
        Ok(Some(entry))
    }
}

/// Write `entry` into slot `index`, extending the chain if necessary.
pub fn write_entry(
    ctx: &mut DirCtx<'_>,
    first_cluster: &mut u32,
    index: usize,
    entry: &ShortDirEntry,
) -> Result<()> {
    let offset = (index * DIRENT_SIZE) as u64;
    io::write_at(
        ctx.geometry,
        ctx.bpb,
        ctx.cache,
        ctx.fat,
        ctx.freespace,
        first_cluster,
        0,
        offset,
        entry.as_bytes(),
    )?;
    Ok(())
}

/// Index one past the last occupied slot: where a new entry should land.
fn first_free_index(ctx: &DirCtx<'_>, first_cluster: u32) -> Result<usize> {
    let mut index = 0;
    while read_entry(ctx, first_cluster, index)?.is_some() {
        index += 1;
    }
    Ok(index)
}

/// Append `entry` to the directory rooted at `*first_cluster`, returning
/// the slot index it landed in.
pub fn append_entry(
    ctx: &mut DirCtx<'_>,
    first_cluster: &mut u32,
    entry: &ShortDirEntry,
) -> Result<usize> {
    let index = first_free_index(ctx, *first_cluster)?;
    write_entry(ctx, first_cluster, index, entry)?;
    Ok(index)
}

/// Remove the entry at `index` by swapping the last occupied entry into
/// its slot (or simply clearing it, if it was already last) and zeroing
/// the vacated final slot.
pub fn delete_entry(ctx: &mut DirCtx<'_>, first_cluster: &mut u32, index: usize) -> Result<()> {
    let next_free = first_free_index(ctx, *first_cluster)?;
    let last_index = next_free
        .checked_sub(1)
        .ok_or_else(|| Error::corrupt("delete_entry called on an empty directory"))?;

    if last_index == index {
        write_entry(ctx, first_cluster, index, &ShortDirEntry::empty())?;
    } else {
        let last_entry = read_entry(ctx, *first_cluster, last_index)?
            .ok_or_else(|| Error::corrupt("expected an occupied last directory slot"))?;
        write_entry(ctx, first_cluster, index, &last_entry)?;
        write_entry(ctx, first_cluster, last_index, &ShortDirEntry::empty())?;
    }
    Ok(())
}

/// Linear scan for an entry whose name slot matches `name` byte-for-byte
/// (truncated/padded to 11 bytes, no case folding).
pub fn find_by_name(ctx: &DirCtx<'_>, first_cluster: u32, name: &[u8]) -> Result<Option<(usize, ShortDirEntry)>> {
    let target = normalize_name(name);
    let mut index = 0;
    loop {
        match read_entry(ctx, first_cluster, index)? {
            Some(entry) if *entry.name_slot() == target => return Ok(Some((index, entry))),
            Some(_) => index += 1,
            None => return Ok(None),
        }
    }
}

/// List every live entry in the directory rooted at `first_cluster`.
pub fn list(ctx: &DirCtx<'_>, first_cluster: u32) -> Result<Vec<(Vec<u8>, ShortDirEntry)>> {
    let mut out = Vec::new();
    let mut index = 0;
    while let Some(entry) = read_entry(ctx, first_cluster, index)? {
        out.push((entry.name_bytes().to_vec(), entry));
        index += 1;
    }
    Ok(out)
}

fn split_path(path: &str) -> Vec<&[u8]> {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .map(str::as_bytes)
        .collect()
}

/// Result of resolving a path: the cluster of the final containing
/// directory, the leaf component's name, and the leaf entry itself if it
/// exists.
pub struct Resolved {
    pub parent_cluster: u32,
    pub name: Vec<u8>,
    pub found: Option<(usize, ShortDirEntry)>,
}

/// Walk `path` one component at a time starting at `root_cluster`,
/// opening and closing each intermediate directory. Every component but
/// the last must name an existing directory; the last component is
/// returned unresolved (`found: None`) if it doesn't exist, so callers
/// can use this for both lookup and create.
pub fn resolve(ctx: &DirCtx<'_>, root_cluster: u32, path: &str) -> Result<Resolved> {
    let parts = split_path(path);
    if parts.is_empty() {
        return Err(Error::invalid("empty path"));
    }
    let mut current = root_cluster;
    for component in &parts[..parts.len() - 1] {
        match find_by_name(ctx, current, component)? {
            Some((_, entry)) if entry.is_dir() => current = entry.first_cluster(),
            Some(_) => return Err(Error::not_dir(String::from_utf8_lossy(component))),
            None => return Err(Error::not_found(String::from_utf8_lossy(component))),
        }
    }
    let leaf = parts[parts.len() - 1];
    let found = find_by_name(ctx, current, leaf)?;
    Ok(Resolved {
        parent_cluster: current,
        name: leaf.to_vec(),
        found,
    })
}
