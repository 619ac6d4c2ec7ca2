use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ebdecomp::rom::address::{to_file_offset, to_hardware_address};
use ebdecomp::{Rom, RomSession};
use log::{info, warn};
use std::path::PathBuf;

#[derive(Parser)]
#[command(about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct Location {
    #[arg(long)]
    rom: PathBuf,

    /// Offset of the block in the ROM file
    #[arg(long, value_parser = parse_number, required_unless_present = "snes", conflicts_with = "snes")]
    offset: Option<usize>,

    /// SNES address of the block, e.g. $CADCA1
    #[arg(long, value_parser = parse_number)]
    snes: Option<usize>,

    /// Treat the ROM as having a 512-byte copier header
    #[arg(long, conflicts_with = "no_header")]
    header: bool,

    /// Treat the ROM as unheadered
    #[arg(long)]
    no_header: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Decompress one block and write the decoded bytes to a file
    Decompress {
        #[command(flatten)]
        location: Location,

        #[arg(long, value_parser = parse_number, default_value = "0x10000")]
        capacity: usize,

        #[arg(long)]
        output: PathBuf,
    },
    /// Report the decoded size and compressed length of one block
    Size {
        #[command(flatten)]
        location: Location,
    },
    /// List consecutive compressed blocks
    Scan {
        #[command(flatten)]
        location: Location,

        #[arg(long)]
        max_blocks: Option<usize>,
    },
    /// Convert between SNES addresses and file offsets
    Addr {
        #[arg(long, value_parser = parse_number, required_unless_present = "offset", conflicts_with = "offset")]
        snes: Option<usize>,

        #[arg(long, value_parser = parse_signed, allow_hyphen_values = true)]
        offset: Option<isize>,

        #[arg(long)]
        no_header: bool,
    },
}

fn parse_number(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let (digits, radix) = if let Some(hex) = s.strip_prefix("0x").or(s.strip_prefix("0X")) {
        (hex, 16)
    } else if let Some(hex) = s.strip_prefix('$') {
        (hex, 16)
    } else {
        (s, 10)
    };
    usize::from_str_radix(digits, radix).map_err(|e| format!("invalid number {s:?}: {e}"))
}

fn parse_signed(s: &str) -> Result<isize, String> {
    let s = s.trim();
    let (digits, negative) = match s.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (s, false),
    };
    let x = isize::try_from(parse_number(digits)?)
        .map_err(|_| format!("number out of range: {s:?}"))?;
    if negative {
        x.checked_neg().ok_or_else(|| format!("number out of range: {s:?}"))
    } else {
        Ok(x)
    }
}

fn open_session(location: &Location) -> Result<RomSession> {
    let rom = Rom::load(&location.rom)?;
    let session = if location.header {
        RomSession::with_header(rom, true)
    } else if location.no_header {
        RomSession::with_header(rom, false)
    } else {
        RomSession::new(rom)
    };
    Ok(session)
}

fn resolve_offset(session: &RomSession, location: &Location) -> Result<usize> {
    match (location.offset, location.snes) {
        (Some(offset), _) => Ok(offset),
        (None, Some(snes)) => session.rom.snes_offset(snes, session.has_header),
        (None, None) => bail!("either --offset or --snes is required"),
    }
}

fn format_snes(session: &RomSession, offset: usize) -> String {
    match session.rom.snes_address(offset, session.has_header) {
        Ok(addr) => format!("${addr:06X}"),
        Err(_) => "-".to_string(),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();
    match args.command {
        Command::Decompress {
            location,
            capacity,
            output,
        } => {
            let session = open_session(&location)?;
            let offset = resolve_offset(&session, &location)?;
            let block = session.decompress_at(offset, capacity)?;
            std::fs::write(&output, &block.bytes)
                .with_context(|| format!("Unable to write {}", output.display()))?;
            info!(
                "Decompressed {} bytes from {} compressed bytes at {offset:#x} into {}",
                block.bytes.len(),
                block.consumed,
                output.display()
            );
        }
        Command::Size { location } => {
            let session = open_session(&location)?;
            let offset = resolve_offset(&session, &location)?;
            match session.rom.measure(offset) {
                Ok(size) => {
                    println!("decoded={} consumed={}", size.decoded, size.consumed);
                }
                Err(e) => {
                    println!("{}", e.code());
                    return Err(e).with_context(|| format!("Unable to measure block at {offset:#x}"));
                }
            }
        }
        Command::Scan {
            location,
            max_blocks,
        } => {
            let session = open_session(&location)?;
            let offset = resolve_offset(&session, &location)?;
            let max_blocks = max_blocks.unwrap_or(usize::MAX);
            for block in session.rom.blocks(offset).take(max_blocks) {
                match block {
                    Ok(block_info) => {
                        println!(
                            "{:#08x} {:>8} decoded={:<6} consumed={}",
                            block_info.offset,
                            format_snes(&session, block_info.offset),
                            block_info.decoded,
                            block_info.consumed
                        );
                    }
                    Err((offset, e)) => {
                        warn!("Stopped at {offset:#x}: {e} (code {})", e.code());
                        break;
                    }
                }
            }
        }
        Command::Addr {
            snes,
            offset,
            no_header,
        } => {
            let has_header = !no_header;
            if let Some(snes) = snes {
                println!("{}", to_file_offset(snes, has_header)?);
            } else if let Some(offset) = offset {
                println!("${:06X}", to_hardware_address(offset, has_header)?);
            }
        }
    }
    Ok(())
}
