//! Small command-line client over `fat32-core`, for poking at a FAT32
//! image file directly without standing up a FUSE mount. One subcommand
//! per `VolumeContext` operation.

use std::path::PathBuf;
use std::rc::Rc;

use clap::{Parser, Subcommand};
use fat32_core::device::file::FileDevice;
use fat32_core::volume::{VolumeContext, Whence};
use fat32_core::Result;

#[derive(Parser)]
#[command(name = "fat32-cli", about = "Poke at a FAT32 image from the command line")]
struct Cli {
    /// Path to the disk image file.
    image: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List a directory's entries.
    Ls { path: String },
    /// Show an entry's attributes.
    Stat { path: String },
    /// Create an empty directory.
    Mkdir { path: String },
    /// Create an empty file.
    Touch { path: String },
    /// Write a string to a file, starting at `offset`.
    Write {
        path: String,
        data: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
    /// Read `len` bytes from a file, starting at `offset`, to stdout.
    Cat {
        path: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long)]
        len: Option<usize>,
    },
    /// Remove a file.
    Rm { path: String },
    /// Remove an empty directory.
    Rmdir { path: String },
    /// Move or rename an entry.
    Mv { from: String, to: String },
    /// Shrink or grow a file to an exact size.
    Truncate { path: String, size: u32 },
    /// Report free/total space on the volume.
    Statfs,
    /// Create a fresh, minimal FAT32 image at the given path (overwrites it).
    Format,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if matches!(cli.command, Command::Format) {
        fat32_core::test_support::format_minimal_fat32(&cli.image);
        println!("formatted {}", cli.image.display());
        return Ok(());
    }

    let device = Rc::new(FileDevice::open(&cli.image)?);
    let mut vol = VolumeContext::mount(device)?;

    match cli.command {
        Command::Ls { path } => {
            let fd = vol.opendir(&path)?;
            for (name, attr) in vol.readdir(fd)? {
                let kind = if attr.is_dir { "d" } else { "-" };
                println!("{kind} {:>10} {name}", attr.size);
            }
            vol.releasedir(fd)?;
        }
        Command::Stat { path } => {
            let attr = vol.getattr(&path)?;
            println!("inode:   {}", attr.inode);
            println!("kind:    {}", if attr.is_dir { "directory" } else { "file" });
            println!("size:    {}", attr.size);
            println!("mtime:   {}", attr.mtime);
            println!("ctime:   {}", attr.ctime);
            println!("atime:   {}", attr.atime);
            println!("ro:      {}", attr.read_only);
        }
        Command::Mkdir { path } => {
            vol.mkdir(&path)?;
        }
        Command::Touch { path } => {
            vol.create_file(&path)?;
        }
        Command::Write { path, data, offset } => {
            let inode = vol.open(&path)?;
            vol.seek(inode, offset as i64, Whence::Start)?;
            let written = vol.write(inode, data.as_bytes())?;
            vol.close(inode)?;
            eprintln!("wrote {written} bytes");
        }
        Command::Cat { path, offset, len } => {
            let inode = vol.open(&path)?;
            let size = vol.getattr(&path)?.size;
            let want = len.unwrap_or_else(|| size.saturating_sub(offset) as usize);
            vol.seek(inode, offset as i64, Whence::Start)?;
            let mut buf = vec![0u8; want];
            let read = vol.read(inode, &mut buf)?;
            vol.close(inode)?;
            use std::io::Write;
            std::io::stdout().write_all(&buf[..read])?;
        }
        Command::Rm { path } => {
            vol.unlink(&path)?;
        }
        Command::Rmdir { path } => {
            vol.rmdir(&path)?;
        }
        Command::Mv { from, to } => {
            vol.rename(&from, &to)?;
        }
        Command::Truncate { path, size } => {
            vol.truncate(&path, size)?;
        }
        Command::Statfs => {
            let stat = vol.statfs();
            println!("bytes/sector:     {}", stat.bytes_per_sector);
            println!("sectors/cluster:  {}", stat.sectors_per_cluster);
            println!("total clusters:   {}", stat.total_clusters);
            println!("free clusters:    {}", stat.free_clusters);
        }
        Command::Format => unreachable!("handled before mount"),
    }

    vol.unmount()?;
    Ok(())
}
