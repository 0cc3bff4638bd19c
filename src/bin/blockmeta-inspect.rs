//! Blockmeta Inspector
//!
//! Reads and writes device labels and prints metadata dumps

use anyhow::{bail, Context};
use blockmeta::core::label::PREAMBLE_SIZE;
use blockmeta::{
    BdevLabel, Blob, BlobUseTracker, CompressionHeader, Decode, Dump, Encode, ExtentRefMap,
    SharedBlob, StoreConfig, WalTransaction,
};
use clap::{Parser, Subcommand};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Bytes read from the start of a device when looking for a label
const LABEL_BLOCK_SIZE: u64 = 4096;

#[derive(Parser, Debug)]
#[command(name = "blockmeta-inspect")]
#[command(about = "Inspect block device labels and space accounting metadata")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode the label at the start of a device or image file
    Label {
        /// Device or image path
        path: PathBuf,
    },

    /// Write a fresh label to the start of a device or image file
    InitLabel {
        /// Device or image path
        path: PathBuf,

        /// Device size in bytes
        #[arg(short, long)]
        size: u64,

        /// Free-form description
        #[arg(short, long, default_value = "main")]
        desc: String,
    },

    /// Print dumps of representative metadata records
    Demo {
        /// Store config (TOML) used for the config-derived blobs
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn read_label(path: &Path) -> anyhow::Result<BdevLabel> {
    let mut head = Vec::with_capacity(LABEL_BLOCK_SIZE as usize);
    File::open(path)
        .with_context(|| format!("opening {}", path.display()))?
        .take(LABEL_BLOCK_SIZE)
        .read_to_end(&mut head)?;

    if head.len() < PREAMBLE_SIZE {
        bail!("{} is too short to hold a label ({} bytes)", path.display(), head.len());
    }
    BdevLabel::from_bytes(&head).with_context(|| format!("decoding label of {}", path.display()))
}

fn write_label(path: &Path, label: &BdevLabel) -> anyhow::Result<()> {
    let bytes = label.to_bytes();
    if bytes.len() as u64 > LABEL_BLOCK_SIZE {
        bail!("label encodes to {} bytes, over the {} byte label block", bytes.len(), LABEL_BLOCK_SIZE);
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    Ok(())
}

fn print_section<T: Dump>(name: &str, items: &[T]) {
    println!("== {} ==", name);
    for item in items {
        println!("{}", item.dump_pretty());
    }
}

fn demo(config: StoreConfig) {
    print_section("ref_map", &ExtentRefMap::sample_instances());
    print_section("use_tracker", &BlobUseTracker::sample_instances());
    print_section("blob", &Blob::sample_instances());
    print_section("shared_blob", &SharedBlob::sample_instances());
    print_section("compression_header", &CompressionHeader::sample_instances());
    print_section("wal_transaction", &WalTransaction::sample_instances());
    print_section("bdev_label", &BdevLabel::sample_instances());

    let blob = config.new_blob(4 * config.min_alloc_size as u64);
    println!("== configured blob ==");
    println!("{}", blob);
    println!("{}", blob.dump_pretty());

    if let Some((blob, header)) =
        config.new_compressed_blob(config.min_alloc_size.saturating_mul(4), config.min_alloc_size)
    {
        println!("== configured compressed blob ==");
        println!("{}", blob);
        println!("{}", header.dump_pretty());
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Label { path } => {
            let label = read_label(&path)?;
            info!("{}: {}", path.display(), label);
            println!("{}", label.dump_pretty());
        }
        Command::InitLabel { path, size, desc } => {
            let label = BdevLabel::new(size, desc);
            write_label(&path, &label)?;
            info!("Wrote {} to {}", label, path.display());
        }
        Command::Demo { config } => {
            let config = match config {
                Some(path) => {
                    info!("Loading store config: {:?}", path);
                    StoreConfig::load(&path)?
                }
                None => StoreConfig::default(),
            };
            demo(config);
        }
    }

    Ok(())
}
