//! Builds a minimal, valid FAT32 image for this crate's own tests and for
//! the integration tests under `tests/`: just enough geometry to pass
//! [`crate::bpb::BIOSParameterBlock::is_valid`], with an empty root
//! directory and an otherwise-zeroed data region. `#[doc(hidden)]`, not
//! part of the crate's stable API.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::bpb::{BIOSParameterBlock, BasicBPB, BPB32, FSInfo};
use crate::{END_CLUSTER_MARK, LEAD_SIGNATURE, STRUCT_SIGNATURE, TRAIL_SIGNATURE};

const BYTES_PER_SECTOR: usize = 512;
const SECTORS_PER_CLUSTER: u8 = 1;
const RESERVED_SECTORS: u16 = 32;
const NUM_FATS: u8 = 2;
const SECTORS_PER_FAT: u32 = 513;
/// The smallest cluster count FAT32 is actually defined for.
const DATA_CLUSTERS: u32 = 65_525;

pub fn format_minimal_fat32(path: &Path) {
    let data_sectors = DATA_CLUSTERS * SECTORS_PER_CLUSTER as u32;
    let total_sectors = RESERVED_SECTORS as u32 + NUM_FATS as u32 * SECTORS_PER_FAT + data_sectors;
    let total_bytes = total_sectors as u64 * BYTES_PER_SECTOR as u64;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .unwrap();
    file.set_len(total_bytes).unwrap();

    let bpb = BIOSParameterBlock {
        basic_bpb: BasicBPB {
            bs_jmp_boot: [0xEB, 0x58, 0x90],
            bs_oem_name: *b"MSWIN4.1",
            byts_per_sec: BYTES_PER_SECTOR as u16,
            sec_per_clus: SECTORS_PER_CLUSTER,
            rsvd_sec_cnt: RESERVED_SECTORS,
            num_fats: NUM_FATS,
            root_ent_cnt: 0,
            tot_sec16: 0,
            media: 0xF8,
            fat_sz16: 0,
            sec_per_trk: 0,
            num_heads: 0,
            hidd_sec: 0,
            tot_sec32: total_sectors,
        },
        bpb32: BPB32 {
            fat_sz32: SECTORS_PER_FAT,
            ext_flags: 0,
            fs_ver: 0,
            root_clus: 2,
            fs_info: 1,
            bk_boot_sec: 6,
            reserved: [0; 12],
            bs_drv_num: 0x80,
            bs_reserved1: 0,
            bs_boot_sig: 0x29,
            bs_vol_id: 0,
            bs_vol_lab: *b"NO NAME    ",
            bs_fil_sys_type: *b"FAT32   ",
        },
    };

    let mut sector0 = vec![0u8; BYTES_PER_SECTOR];
    let bpb_bytes = unsafe {
        std::slice::from_raw_parts(
            &bpb as *const BIOSParameterBlock as *const u8,
            std::mem::size_of::<BIOSParameterBlock>(),
        )
    };
    sector0[..bpb_bytes.len()].copy_from_slice(bpb_bytes);
    sector0[510] = 0x55;
    sector0[511] = 0xAA;
    write_sector(&file, 0, &sector0);

    let fsinfo = FSInfo {
        lead_sig: LEAD_SIGNATURE,
        reserved1: [0; 480],
        struc_sig: STRUCT_SIGNATURE,
        free_count: DATA_CLUSTERS - 1,
        nxt_free: 3,
        reserved2: [0; 12],
        trail_sig: TRAIL_SIGNATURE,
    };
    let mut fsinfo_sector = vec![0u8; BYTES_PER_SECTOR];
    let fsinfo_bytes =
        unsafe { std::slice::from_raw_parts(&fsinfo as *const FSInfo as *const u8, std::mem::size_of::<FSInfo>()) };
    fsinfo_sector[..fsinfo_bytes.len()].copy_from_slice(fsinfo_bytes);
    write_sector(&file, 1, &fsinfo_sector);

    // Cluster 2 is the root directory's only cluster; mark it end-of-chain
    // in both FAT copies so it reads as allocated, not free.
    let fat1_sector = RESERVED_SECTORS as usize;
    let fat2_sector = fat1_sector + SECTORS_PER_FAT as usize;
    let mut fat_sector0 = vec![0u8; BYTES_PER_SECTOR];
    fat_sector0[8..12].copy_from_slice(&END_CLUSTER_MARK.to_le_bytes());
    write_sector(&file, fat1_sector, &fat_sector0);
    write_sector(&file, fat2_sector, &fat_sector0);
}

fn write_sector(mut file: &std::fs::File, sector: usize, buf: &[u8]) {
    file.seek(SeekFrom::Start((sector * BYTES_PER_SECTOR) as u64)).unwrap();
    file.write_all(buf).unwrap();
}
