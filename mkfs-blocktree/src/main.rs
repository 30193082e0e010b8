//! mkfs-blocktree — format tool for the blocktree storage engine.
//!
//! Lays out block 0 (allocation bitmap), block 1 (superblock), block 2
//! (inode bitmap, reserved) and an empty root leaf B-tree node in block 3,
//! then marks all four blocks allocated. Writes directly through
//! `std::fs::File`, bypassing `Cache` entirely — the raw format/open path
//! is explicitly out of scope for the cache/B-tree core this tool
//! accompanies.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;
use log::info;

use blocktree_lib::{
    bitmap, BlockType, Node, SuperBlock, BITMAP_BLOCK, BLOCK_SIZE, FIRST_FREE_BLOCK,
    INODE_BITMAP_BLOCK, SUPERBLOCK_BLOCK,
};

#[derive(Parser, Debug)]
#[command(name = "mkfs-blocktree")]
#[command(about = "Format a file as a blocktree storage device", long_about = None)]
struct Args {
    /// Device or image file to format. Truncated/created if it doesn't
    /// already exist.
    #[arg(value_name = "DEVICE")]
    device: PathBuf,

    /// Total number of blocks on the device.
    #[arg(short = 'b', long, default_value_t = 4096)]
    blocks: u64,

    /// Format without asking for confirmation when the file already exists.
    #[arg(short = 'f', long)]
    force: bool,
}

fn confirm_overwrite(path: &PathBuf) -> io::Result<bool> {
    println!("This will overwrite any existing contents of {:?}.", path);
    print!("Continue? (y/N): ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim(), "y" | "Y" | "yes"))
}

fn format_device(args: &Args) -> io::Result<()> {
    if args.blocks <= FIRST_FREE_BLOCK {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("device must hold more than {FIRST_FREE_BLOCK} blocks"),
        ));
    }

    if args.device.exists() && !args.force && !confirm_overwrite(&args.device)? {
        println!("Aborted.");
        return Ok(());
    }

    let mut file: File = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&args.device)?;

    let total_len = args.blocks * BLOCK_SIZE as u64;
    file.set_len(total_len)?;
    info!("allocated {total_len} bytes ({} blocks) for {:?}", args.blocks, args.device);

    write_block(&mut file, BITMAP_BLOCK, &allocation_bitmap_block(args.blocks))?;
    write_block(&mut file, SUPERBLOCK_BLOCK, &SuperBlock::new(args.blocks, FIRST_FREE_BLOCK).to_bytes())?;
    write_block(&mut file, INODE_BITMAP_BLOCK, &inode_bitmap_block())?;
    write_block(&mut file, FIRST_FREE_BLOCK, &Node::new_leaf(FIRST_FREE_BLOCK).to_bytes())?;

    file.sync_all()?;

    println!("blocktree filesystem created on {:?}", args.device);
    println!("  total blocks: {}", args.blocks);
    println!("  root block:   {FIRST_FREE_BLOCK}");
    Ok(())
}

/// Block 0: every reserved block (0..FIRST_FREE_BLOCK, including block 0
/// itself) marked allocated; everything else clear.
fn allocation_bitmap_block(total_blocks: u64) -> [u8; BLOCK_SIZE] {
    let mut buf = [0u8; BLOCK_SIZE];
    buf[0] = BlockType::Bitmap.as_byte();
    let body = &mut buf[1..];
    for b in 0..FIRST_FREE_BLOCK.min(total_blocks) {
        bitmap::put(body, b as usize, 1);
    }
    buf
}

/// Block 2: reserved, all-clear. Not interpreted by this crate.
fn inode_bitmap_block() -> [u8; BLOCK_SIZE] {
    let mut buf = [0u8; BLOCK_SIZE];
    buf[0] = BlockType::Bitmap.as_byte();
    buf
}

fn write_block(file: &mut File, block_num: u64, buf: &[u8; BLOCK_SIZE]) -> io::Result<()> {
    use std::io::{Seek, SeekFrom};
    file.seek(SeekFrom::Start(block_num * BLOCK_SIZE as u64))?;
    file.write_all(buf)
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = format_device(&args) {
        eprintln!("mkfs-blocktree: {e}");
        std::process::exit(1);
    }
}
