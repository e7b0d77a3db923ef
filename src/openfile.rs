//! Open-file and open-directory table: refcounted handles keyed by inode
//! (this driver's inode number is simply the entry's first cluster, or 0
//! for an empty file).
//!
//! Grounded on the source's `inode_table.c`: a lookup by inode bumps a
//! refcount instead of handing out a fresh handle, and the entry is only
//! torn down once the last handle releases it. The only generalization is
//! the container -- a `Vec` scanned linearly here, same as the source's
//! linked list, since the number of concurrently open files in a FUSE-style
//! workload is small enough that the scan never shows up.

use std::cell::RefCell;
use std::rc::Rc;

/// An open file or directory. `inode` is the stable identity host adapters
/// key their file handles on; `parent` + `entry_index` locate the 32-byte
/// directory entry that describes this file so metadata changes can be
/// written back.
pub struct OpenEntry {
    pub inode: u32,
    pub parent_inode: u32,
    pub entry_index: usize,
    pub is_dir: bool,
    pub size: u32,
    /// Current cursor position, as maintained by `seek` and advanced by
    /// `read`/`write`. Every transfer happens at this offset; there is no
    /// separate offset parameter on the I/O calls themselves.
    pub offset: u64,
    /// The cluster `offset` currently points into -- a cache `seek` fills
    /// in so `read`/`write` don't have to re-walk the chain from the head
    /// on every call.
    pub current_cluster: u32,
    /// Holds exactly the chain's first cluster (or nothing, for an empty
    /// file) once `delete_on_release` is set -- the directory slot this
    /// handle used to own may already belong to a different entry by
    /// then, so this is the only way the final release can still find the
    /// chain to free.
    pub clusters: Vec<u32>,
    /// Set once an unlink has scheduled this entry for removal while it
    /// was still open; consulted on the last release to free its clusters
    /// instead of merely dropping the handle.
    pub delete_on_release: bool,
    refcount: usize,
}

impl OpenEntry {
    fn new(inode: u32, parent_inode: u32, entry_index: usize, is_dir: bool, size: u32, first_cluster: u32) -> Self {
        Self {
            inode,
            parent_inode,
            entry_index,
            is_dir,
            size,
            offset: 0,
            current_cluster: first_cluster,
            clusters: Vec::new(),
            delete_on_release: false,
            refcount: 1,
        }
    }
}

#[derive(Default)]
pub struct OpenFileTable {
    open: Vec<Rc<RefCell<OpenEntry>>>,
}

impl OpenFileTable {
    pub fn new() -> Self {
        Self { open: Vec::new() }
    }

    /// Acquire a handle to `inode`, creating one at refcount 1 if it isn't
    /// already open, or bumping the refcount of the existing handle.
    /// `first_cluster` seeds the new handle's cursor (offset 0, sitting on
    /// the chain's first cluster); it's ignored when the inode is already
    /// open, since the existing handle's cursor is left exactly where it
    /// was.
    pub fn acquire(
        &mut self,
        inode: u32,
        parent_inode: u32,
        entry_index: usize,
        is_dir: bool,
        size: u32,
        first_cluster: u32,
    ) -> Rc<RefCell<OpenEntry>> {
        if let Some(entry) = self.open.iter().find(|e| e.borrow().inode == inode) {
            entry.borrow_mut().refcount += 1;
            return Rc::clone(entry);
        }
        let entry = Rc::new(RefCell::new(OpenEntry::new(
            inode,
            parent_inode,
            entry_index,
            is_dir,
            size,
            first_cluster,
        )));
        self.open.push(Rc::clone(&entry));
        entry
    }

    pub fn lookup(&self, inode: u32) -> Option<Rc<RefCell<OpenEntry>>> {
        self.open.iter().find(|e| e.borrow().inode == inode).map(Rc::clone)
    }

    /// Decrement the refcount on `inode`'s handle, removing it from the
    /// table once it reaches zero. Returns the entry so the caller can
    /// flush metadata or free clusters on the final release.
    pub fn release(&mut self, inode: u32) -> Option<Rc<RefCell<OpenEntry>>> {
        let index = self.open.iter().position(|e| e.borrow().inode == inode)?;
        let last = {
            let mut entry = self.open[index].borrow_mut();
            entry.refcount -= 1;
            entry.refcount == 0
        };
        if last {
            Some(self.open.remove(index))
        } else {
            Some(Rc::clone(&self.open[index]))
        }
    }

    pub fn is_open(&self, inode: u32) -> bool {
        self.open.iter().any(|e| e.borrow().inode == inode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_twice_shares_one_entry_with_refcount_two() {
        let mut table = OpenFileTable::new();
        let a = table.acquire(5, 2, 0, false, 100, 5);
        let b = table.acquire(5, 2, 0, false, 100, 5);
        assert!(Rc::ptr_eq(&a, &b));
        assert!(table.release(5).is_some());
        assert!(table.is_open(5));
        assert!(table.release(5).is_some());
        assert!(!table.is_open(5));
    }
}
