//! End-to-end tests against the public `VolumeContext` API, exercising the
//! same kind of session a FUSE-style host adapter would drive: mount,
//! create, write, read back, list, unlink, rename.

use std::rc::Rc;

use fat32_core::device::file::FileDevice;
use fat32_core::error::Error;
use fat32_core::volume::{Attr, VolumeContext, Whence};

fn mounted() -> (tempfile::TempDir, VolumeContext) {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("disk.img");
    fat32_core::test_support::format_minimal_fat32(&image_path);
    let device = Rc::new(FileDevice::open(&image_path).unwrap());
    let vol = VolumeContext::mount(device).unwrap();
    (dir, vol)
}

/// `opendir`/`readdir`/`releasedir` in one shot, for tests that just want
/// the listing.
fn list_dir(vol: &mut VolumeContext, path: &str) -> Vec<(String, Attr)> {
    let fd = vol.opendir(path).unwrap();
    let entries = vol.readdir(fd).unwrap();
    vol.releasedir(fd).unwrap();
    entries
}

#[test]
fn fresh_volume_has_an_empty_root() {
    let (_dir, mut vol) = mounted();
    let attr = vol.getattr("/").unwrap();
    assert!(attr.is_dir);
    assert_eq!(list_dir(&mut vol, "/").len(), 0);
    let stat = vol.statfs();
    assert_eq!(stat.free_clusters + 1, stat.total_clusters);
}

#[test]
fn nested_directories_hold_their_own_files() {
    let (_dir, mut vol) = mounted();
    vol.mkdir("/a").unwrap();
    vol.mkdir("/a/b").unwrap();
    vol.create_file("/a/b/leaf.txt").unwrap();

    let inode = vol.open("/a/b/leaf.txt").unwrap();
    vol.write(inode, b"nested contents").unwrap();
    vol.close(inode).unwrap();

    let entries = list_dir(&mut vol, "/a/b");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "leaf.txt");
    assert_eq!(entries[0].1.size, 16);

    // "/a" still shows exactly one child, its subdirectory.
    let top = list_dir(&mut vol, "/a");
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].0, "b");
    assert!(top[0].1.is_dir);
}

#[test]
fn write_past_current_end_extends_the_file() {
    let (_dir, mut vol) = mounted();
    vol.create_file("/grow.bin").unwrap();
    let inode = vol.open("/grow.bin").unwrap();

    // `seek` can only land within `0..=size`, so a gap ahead of the
    // current end is filled by writing the padding explicitly rather than
    // seeking past it.
    vol.write(inode, b"abc").unwrap();
    vol.write(inode, &[0u8; 7]).unwrap();
    vol.write(inode, b"xyz").unwrap();
    vol.close(inode).unwrap();

    let attr = vol.getattr("/grow.bin").unwrap();
    assert_eq!(attr.size, 13);

    let inode = vol.open("/grow.bin").unwrap();
    let mut buf = [0u8; 13];
    vol.read(inode, &mut buf).unwrap();
    assert_eq!(&buf[0..3], b"abc");
    assert_eq!(&buf[3..10], &[0u8; 7]);
    assert_eq!(&buf[10..13], b"xyz");
    vol.close(inode).unwrap();
}

#[test]
fn truncate_shrinks_and_frees_clusters() {
    let (_dir, mut vol) = mounted();
    vol.create_file("/big.bin").unwrap();
    let inode = vol.open("/big.bin").unwrap();
    let payload = vec![7u8; 8192];
    vol.write(inode, &payload).unwrap();
    vol.close(inode).unwrap();

    let before = vol.statfs().free_clusters;
    vol.truncate("/big.bin", 512).unwrap();
    let after = vol.statfs().free_clusters;
    assert!(after > before);
    assert_eq!(vol.getattr("/big.bin").unwrap().size, 512);

    vol.truncate("/big.bin", 0).unwrap();
    assert_eq!(vol.getattr("/big.bin").unwrap().size, 0);
}

#[test]
fn rename_across_directories_preserves_contents() {
    let (_dir, mut vol) = mounted();
    vol.mkdir("/dest").unwrap();
    vol.create_file("/note.txt").unwrap();
    let inode = vol.open("/note.txt").unwrap();
    vol.write(inode, b"keep me").unwrap();
    vol.close(inode).unwrap();

    vol.rename("/note.txt", "/dest/note.txt").unwrap();
    assert!(vol.getattr("/note.txt").is_err());

    let inode = vol.open("/dest/note.txt").unwrap();
    let mut buf = [0u8; 7];
    vol.read(inode, &mut buf).unwrap();
    assert_eq!(&buf, b"keep me");
    vol.close(inode).unwrap();
}

#[test]
fn unlink_rejects_directories_and_rmdir_rejects_files() {
    let (_dir, mut vol) = mounted();
    vol.mkdir("/d").unwrap();
    vol.create_file("/f.txt").unwrap();

    assert!(matches!(vol.unlink("/d"), Err(Error::IsDir(_))));
    assert!(matches!(vol.rmdir("/f.txt"), Err(Error::NotDir(_))));

    vol.unlink("/f.txt").unwrap();
    vol.rmdir("/d").unwrap();
    assert_eq!(list_dir(&mut vol, "/").len(), 0);
}

#[test]
fn opening_a_directory_as_a_file_is_rejected() {
    let (_dir, mut vol) = mounted();
    vol.mkdir("/d").unwrap();
    assert!(matches!(vol.open("/d"), Err(Error::IsDir(_))));
}

#[test]
fn reopening_an_already_open_file_shares_state() {
    let (_dir, mut vol) = mounted();
    vol.create_file("/shared.txt").unwrap();
    let a = vol.open("/shared.txt").unwrap();
    let b = vol.open("/shared.txt").unwrap();
    assert_eq!(a, b);

    vol.write(a, b"hi").unwrap();
    vol.close(a).unwrap();
    // `b` is still open; the file's attributes must still be reachable.
    assert_eq!(vol.getattr("/shared.txt").unwrap().size, 2);
    vol.close(b).unwrap();
}

#[test]
fn seek_then_read_picks_up_at_the_new_position() {
    let (_dir, mut vol) = mounted();
    vol.create_file("/seekable.txt").unwrap();
    let inode = vol.open("/seekable.txt").unwrap();
    vol.write(inode, b"0123456789").unwrap();

    vol.seek(inode, 3, Whence::Start).unwrap();
    let mut buf = [0u8; 4];
    vol.read(inode, &mut buf).unwrap();
    assert_eq!(&buf, b"3456");

    // Read left the cursor at offset 7; back up 2 to re-read "56".
    vol.seek(inode, -2, Whence::Current).unwrap();
    let mut buf = [0u8; 2];
    vol.read(inode, &mut buf).unwrap();
    assert_eq!(&buf, b"56");

    assert!(vol.seek(inode, 1, Whence::Start).is_ok());
    assert!(matches!(vol.seek(inode, 100, Whence::Start), Err(Error::Invalid(_))));
    vol.close(inode).unwrap();
}

#[test]
fn reading_a_file_stamps_its_access_date() {
    let (_dir, mut vol) = mounted();
    vol.create_file("/touched.txt").unwrap();
    let inode = vol.open("/touched.txt").unwrap();
    vol.write(inode, b"data").unwrap();
    vol.seek(inode, 0, Whence::Start).unwrap();
    let before = vol.getattr("/touched.txt").unwrap().atime;

    let mut buf = [0u8; 4];
    vol.read(inode, &mut buf).unwrap();
    vol.close(inode).unwrap();

    let after = vol.getattr("/touched.txt").unwrap().atime;
    assert!(after >= before);
}
