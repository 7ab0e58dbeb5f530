//! Fami CLI - headless runner for the emulator core

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use fami_core::{Device, HEIGHT, WIDTH};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Run an iNES ROM without a window
#[derive(Parser, Debug)]
#[command(name = "fami-cli")]
#[command(about = "Headless NES emulator runner", long_about = None)]
struct Args {
    /// Path to the iNES ROM file
    #[arg(short, long)]
    rom: PathBuf,

    /// Number of frames to run
    #[arg(short, long, default_value_t = 60, conflicts_with = "seconds")]
    frames: u64,

    /// Run for this many emulated seconds instead of a frame count
    #[arg(short, long)]
    seconds: Option<f64>,

    /// Restore this state before running
    #[arg(long)]
    load_state: Option<PathBuf>,

    /// Write the machine state here after running
    #[arg(long)]
    save_state: Option<PathBuf>,

    /// Write the last frame as a binary PPM image
    #[arg(long)]
    screenshot: Option<PathBuf>,

    /// Dump CPU state after execution
    #[arg(short = 'c', long)]
    dump_cpu: bool,

    /// Dump PPU state after execution
    #[arg(short = 'p', long)]
    dump_ppu: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut device =
        Device::open(&args.rom).with_context(|| format!("failed to load {}", args.rom.display()))?;
    let cartridge = device.cartridge();
    println!("Loaded cartridge:");
    println!("  PRG ROM: {} bytes", cartridge.prg().len());
    println!(
        "  CHR {}: {} bytes",
        if cartridge.has_chr_ram() { "RAM" } else { "ROM" },
        cartridge.chr().len()
    );
    println!("  Mapper: {} ({})", cartridge.mapper_id(), device.mapper().name());

    if let Some(path) = &args.load_state {
        device
            .load_state(path)
            .with_context(|| format!("failed to load state {}", path.display()))?;
    }

    match args.seconds {
        Some(seconds) => {
            info!(seconds, "running");
            device.step_seconds(seconds)?;
        }
        None => {
            info!(frames = args.frames, "running");
            for _ in 0..args.frames {
                device.step_frame()?;
            }
        }
    }
    println!("Stopped at frame {} after {} CPU cycles.", device.ppu().frame(), device.cpu().cycles());

    if let Some(path) = &args.save_state {
        device
            .save_state(path)
            .with_context(|| format!("failed to save state {}", path.display()))?;
    }

    if let Some(path) = &args.screenshot {
        write_ppm(path, device.buffer())
            .with_context(|| format!("failed to write screenshot {}", path.display()))?;
        info!(path = %path.display(), "screenshot written");
    }

    if args.dump_cpu {
        dump_cpu_state(&device);
    }

    if args.dump_ppu {
        dump_ppu_state(&device);
    }

    Ok(())
}

/// Binary PPM (P6) of a 0x00RRGGBB frame
fn write_ppm(path: &Path, pixels: &[u32]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write!(out, "P6\n{} {}\n255\n", WIDTH, HEIGHT)?;
    for pixel in pixels {
        let [_, r, g, b] = pixel.to_be_bytes();
        out.write_all(&[r, g, b])?;
    }
    out.flush()?;
    Ok(())
}

fn dump_cpu_state(device: &Device) {
    let cpu = device.cpu();
    let regs = cpu.registers();
    let status = cpu.status();

    println!("\nCPU State:");
    println!("  A:    ${:02X}", regs.a);
    println!("  X:    ${:02X}", regs.x);
    println!("  Y:    ${:02X}", regs.y);
    println!("  PC:   ${:04X}", regs.pc);
    println!("  SP:   ${:02X}", regs.sp);
    println!("  P:    ${:02X} ({})", status.to_u8(), status);
    println!("  Cycles: {}", cpu.cycles());
    println!("  Stall:  {}", cpu.stall());
}

fn dump_ppu_state(device: &Device) {
    let ppu = device.ppu();

    println!("\nPPU State:");
    println!("  Frame: {}", ppu.frame());
    println!("  Scanline: {}", ppu.scanline());
    println!("  Dot: {}", ppu.cycle());
    println!("  CTRL: ${:02X}", ppu.ctrl().bits());
    println!("  MASK: ${:02X}", ppu.mask().bits());
    println!("  VBLANK: {}", ppu.in_vblank());
    println!("  VRAM address: ${:04X}", ppu.vram_address());
    println!("  Background: #{:06X}", device.background_color());
}
