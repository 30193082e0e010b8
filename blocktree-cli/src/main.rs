//! Interactive driver for the blocktree storage engine.
//!
//! Opens one device and reads a loop of verbs from stdin: `insert key
//! value`, `search key`, `print tree`, `delete key`, `sync`, `exit`. Not
//! part of the engine core — a thin dispatcher over `blocktree_lib`.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;
use colored::*;

use blocktree_lib::{BTree, BlockDevice, Cache, CacheConfig, EngineError, MmapBlockDevice, BLOCK_SIZE};

#[derive(Parser)]
#[command(name = "blocktree")]
#[command(about = "Interactive shell over a formatted blocktree device", long_about = None)]
struct Args {
    /// Device or image file, already formatted with mkfs-blocktree.
    #[arg(value_name = "DEVICE")]
    device: PathBuf,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let total_blocks = match std::fs::metadata(&args.device) {
        Ok(meta) => meta.len() / BLOCK_SIZE as u64,
        Err(e) => {
            eprintln!("{} {e}", "blocktree:".red().bold());
            std::process::exit(1);
        }
    };

    let mut device = match MmapBlockDevice::open(&args.device, total_blocks) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("{} {e}", "blocktree:".red().bold());
            std::process::exit(1);
        }
    };

    let mut cache = Cache::alloc_cache(CacheConfig::default());
    let mut tree = match BTree::load(&mut cache, &mut device) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{} {e}", "blocktree:".red().bold());
            std::process::exit(1);
        }
    };

    println!(
        "{} {:?} ({} blocks, root={})",
        "opened".green().bold(),
        args.device,
        total_blocks,
        tree.root_block()
    );

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("blocktree> ");
        let _ = io::stdout().flush();
        line.clear();
        if stdin.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => continue,
            ["insert", key, value] => match (key.parse::<u64>(), value.parse::<u64>()) {
                (Ok(k), Ok(v)) => match tree.insert(&mut cache, &mut device, k, v) {
                    Ok(()) => println!("{} inserted ({k}, {v})", "ok:".green()),
                    Err(e) => print_error(&e),
                },
                _ => println!("{} key and value must be u64", "error:".red()),
            },
            ["search", key] => match key.parse::<u64>() {
                Ok(k) => match tree.search(&mut cache, &mut device, k) {
                    Ok(Some(v)) => println!("{} {v}", "=>".cyan()),
                    Ok(None) => println!("{}", "not found".yellow()),
                    Err(e) => print_error(&e),
                },
                Err(_) => println!("{} key must be a u64", "error:".red()),
            },
            ["delete", key] => match key.parse::<u64>() {
                Ok(k) => match tree.delete(&mut cache, &mut device, k) {
                    Ok(()) => println!("{} deleted {k}", "ok:".green()),
                    Err(e) => print_error(&e),
                },
                Err(_) => println!("{} key must be a u64", "error:".red()),
            },
            ["print", "tree"] | ["print"] => match tree.pairs(&mut cache, &mut device) {
                Ok(pairs) => {
                    if pairs.is_empty() {
                        println!("{}", "(empty)".dimmed());
                    }
                    for (k, v) in pairs {
                        println!("{k} -> {v}");
                    }
                }
                Err(e) => print_error(&e),
            },
            ["sync"] => match cache.sync_all(&mut device) {
                Ok(()) => println!("{}", "ok: synced".green()),
                Err(e) => print_error(&e),
            },
            ["exit"] | ["quit"] => {
                if let Err(e) = cache.sync_all(&mut device) {
                    print_error(&e);
                }
                break;
            }
            _ => println!(
                "{} usage: insert key value | search key | delete key | print tree | sync | exit",
                "error:".red()
            ),
        }
    }

    let _ = device.close();
}

fn print_error(e: &EngineError) {
    println!("{} {e}", "error:".red());
}
