//! Cartridge loading
//!
//! Parses the iNES container into PRG/CHR storage, battery SRAM and the
//! board description the mappers consume. Bank switching lives in
//! [`crate::mapper`].

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use bincode::{Decode, Encode};
use thiserror::Error;
use tracing::info;

use crate::bus::Mirroring;

/// iNES header size
pub const HEADER_SIZE: usize = 16;

/// "NES\x1A" read as a little-endian u32
pub const INES_MAGIC: u32 = 0x1A53_454E;

/// Trainer block size
pub const TRAINER_SIZE: usize = 512;

pub const PRG_BANK_SIZE: usize = 16 * 1024;
pub const CHR_BANK_SIZE: usize = 8 * 1024;
pub const SRAM_SIZE: usize = 8 * 1024;

/// Cartridge error types
#[derive(Debug, Error)]
pub enum CartridgeError {
    #[error("invalid iNES magic {0:#010x}")]
    InvalidMagic(u32),
    #[error("ROM image truncated in {0}")]
    Truncated(&'static str),
    #[error("failed to read ROM image: {0}")]
    Io(#[from] io::Error),
}

/// iNES header structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InesHeader {
    /// PRG ROM size in 16KB units
    pub prg_banks: u8,
    /// CHR ROM size in 8KB units, zero means the board carries CHR RAM
    pub chr_banks: u8,
    /// Flags 6: mirroring, battery, trainer, mapper low nibble
    pub control1: u8,
    /// Flags 7: mapper high nibble
    pub control2: u8,
    /// PRG RAM size in 8KB units
    pub prg_ram_banks: u8,
}

impl InesHeader {
    /// Parse an iNES header from its 16 raw bytes
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Result<Self, CartridgeError> {
        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != INES_MAGIC {
            return Err(CartridgeError::InvalidMagic(magic));
        }

        Ok(Self {
            prg_banks: bytes[4],
            chr_banks: bytes[5],
            control1: bytes[6],
            control2: bytes[7],
            prg_ram_banks: bytes[8],
        })
    }

    /// Get the mapper number from flags
    pub fn mapper_id(&self) -> u8 {
        (self.control1 >> 4) | (self.control2 & 0xF0)
    }

    /// Nametable arrangement declared by the header
    ///
    /// Bit 0 and bit 3 of flags 6 form a two-bit mode: 0 horizontal,
    /// 1 vertical, 2 single-screen lower, 3 single-screen upper.
    pub fn mirroring(&self) -> Mirroring {
        const MODES: [Mirroring; 4] = [
            Mirroring::Horizontal,
            Mirroring::Vertical,
            Mirroring::SingleLower,
            Mirroring::SingleUpper,
        ];
        let mode = (self.control1 & 0x01) | (((self.control1 >> 3) & 0x01) << 1);
        MODES[mode as usize]
    }

    /// Check if battery-backed SRAM is present
    pub fn has_battery(&self) -> bool {
        self.control1 & 0x02 != 0
    }

    /// Check if trainer is present
    pub fn has_trainer(&self) -> bool {
        self.control1 & 0x04 != 0
    }
}

/// Cartridge contents
#[derive(Debug, Clone)]
pub struct Cartridge {
    prg: Vec<u8>,
    chr: Vec<u8>,
    /// Whether `chr` is writable RAM rather than ROM
    chr_ram: bool,
    sram: Vec<u8>,
    mapper_id: u8,
    mirroring: Mirroring,
    battery: bool,
}

/// Mutable cartridge state carried in save states
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct CartridgeState {
    pub sram: Vec<u8>,
    /// Pattern table contents on CHR RAM boards, empty for CHR ROM
    pub chr_ram: Vec<u8>,
    pub mirroring: Mirroring,
}

impl Cartridge {
    /// Assemble a cartridge from raw parts. An empty `chr` gets 8KB of CHR RAM.
    pub fn new(prg: Vec<u8>, chr: Vec<u8>, mapper_id: u8, mirroring: Mirroring) -> Self {
        let chr_ram = chr.is_empty();
        let chr = if chr_ram { vec![0; CHR_BANK_SIZE] } else { chr };
        Self {
            prg,
            chr,
            chr_ram,
            sram: vec![0; SRAM_SIZE],
            mapper_id,
            mirroring,
            battery: false,
        }
    }

    /// Read an iNES image from any reader
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, CartridgeError> {
        let mut header = [0u8; HEADER_SIZE];
        read_section(reader, &mut header, "header")?;
        let header = InesHeader::parse(&header)?;

        if header.has_trainer() {
            let mut trainer = [0u8; TRAINER_SIZE];
            read_section(reader, &mut trainer, "trainer")?;
        }

        let mut prg = vec![0; header.prg_banks as usize * PRG_BANK_SIZE];
        read_section(reader, &mut prg, "PRG ROM")?;

        let mut chr = vec![0; header.chr_banks as usize * CHR_BANK_SIZE];
        read_section(reader, &mut chr, "CHR ROM")?;

        let mut cartridge = Self::new(prg, chr, header.mapper_id(), header.mirroring());
        cartridge.battery = header.has_battery();

        info!(
            mapper = cartridge.mapper_id,
            prg_kb = cartridge.prg.len() / 1024,
            chr_kb = cartridge.chr.len() / 1024,
            chr_ram = cartridge.chr_ram,
            mirroring = ?cartridge.mirroring,
            "loaded iNES image"
        );
        Ok(cartridge)
    }

    /// Parse an in-memory iNES image
    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self, CartridgeError> {
        Self::read_from(&mut bytes)
    }

    /// Load an iNES file from disk
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CartridgeError> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }

    pub fn prg(&self) -> &[u8] {
        &self.prg
    }

    pub fn chr(&self) -> &[u8] {
        &self.chr
    }

    pub fn has_chr_ram(&self) -> bool {
        self.chr_ram
    }

    pub fn sram(&self) -> &[u8] {
        &self.sram
    }

    pub fn mapper_id(&self) -> u8 {
        self.mapper_id
    }

    pub fn has_battery(&self) -> bool {
        self.battery
    }

    /// Current nametable arrangement
    pub fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    /// Boards with mirroring control update this at runtime
    pub fn set_mirroring(&mut self, mirroring: Mirroring) {
        self.mirroring = mirroring;
    }

    /// Read PRG ROM at an absolute offset, wrapping at its size
    pub fn read_prg(&self, offset: usize) -> u8 {
        if self.prg.is_empty() {
            return 0;
        }
        self.prg[offset % self.prg.len()]
    }

    /// Read CHR at an absolute offset, wrapping at its size
    pub fn read_chr(&self, offset: usize) -> u8 {
        self.chr[offset % self.chr.len()]
    }

    /// Write CHR RAM; CHR ROM ignores writes
    pub fn write_chr(&mut self, offset: usize, value: u8) {
        if self.chr_ram {
            let len = self.chr.len();
            self.chr[offset % len] = value;
        }
    }

    pub fn read_sram(&self, offset: usize) -> u8 {
        self.sram[offset % SRAM_SIZE]
    }

    pub fn write_sram(&mut self, offset: usize, value: u8) {
        self.sram[offset % SRAM_SIZE] = value;
    }

    /// Number of 16KB PRG banks
    pub fn prg_banks(&self) -> usize {
        self.prg.len() / PRG_BANK_SIZE
    }

    /// Number of 8KB CHR banks
    pub fn chr_banks(&self) -> usize {
        self.chr.len() / CHR_BANK_SIZE
    }

    /// Snapshot the mutable part of the cartridge
    pub fn state(&self) -> CartridgeState {
        CartridgeState {
            sram: self.sram.clone(),
            chr_ram: if self.chr_ram { self.chr.clone() } else { Vec::new() },
            mirroring: self.mirroring,
        }
    }

    /// Restore a snapshot taken with [`Cartridge::state`]
    pub fn restore(&mut self, state: CartridgeState) {
        self.sram = state.sram;
        self.sram.resize(SRAM_SIZE, 0);
        if self.chr_ram && state.chr_ram.len() == self.chr.len() {
            self.chr = state.chr_ram;
        }
        self.mirroring = state.mirroring;
    }
}

fn read_section<R: Read>(
    reader: &mut R,
    buffer: &mut [u8],
    section: &'static str,
) -> Result<(), CartridgeError> {
    reader.read_exact(buffer).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => CartridgeError::Truncated(section),
        _ => CartridgeError::Io(err),
    })
}
