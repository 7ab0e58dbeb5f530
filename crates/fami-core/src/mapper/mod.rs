//! Cartridge mappers
//!
//! A mapper decodes cartridge address space ($0000-$1FFF pattern tables on
//! the PPU side, $6000-$FFFF on the CPU side) into the cartridge's PRG, CHR
//! and SRAM arrays. Mappers hold only their bank registers; the cartridge
//! is passed in on every access.
//!
//! Supported boards: 0 (NROM, served by the UxROM logic), 1 (MMC1),
//! 2 (UxROM), 3 (CNROM), 4 (MMC3), 7 (AxROM), 40 (SMB2J conversion) and
//! 225 (multicart).

use bincode::{Decode, Encode};
use thiserror::Error;
use tracing::info;

use crate::bus::BusFault;
use crate::cartridge::Cartridge;
use crate::state::StateError;

pub mod mapper1;
pub mod mapper2;
pub mod mapper3;
pub mod mapper4;
pub mod mapper7;
pub mod mapper40;
pub mod mapper225;

pub use mapper1::Mapper1;
pub use mapper2::Mapper2;
pub use mapper3::Mapper3;
pub use mapper4::Mapper4;
pub use mapper7::Mapper7;
pub use mapper40::Mapper40;
pub use mapper225::Mapper225;

/// Mapper construction errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MapperError {
    #[error("unsupported mapper: {0}")]
    Unsupported(u8),
}

/// PPU position handed to mappers once per PPU dot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PpuTiming {
    /// Dot within the scanline (0-340)
    pub cycle: u16,
    /// Scanline (0-261)
    pub scanline: u16,
    /// Background or sprite rendering is enabled
    pub rendering: bool,
}

/// Trait for cartridge mappers
pub trait Mapper {
    /// Read from CHR ($0000-$1FFF), SRAM ($6000-$7FFF) or PRG ($8000-$FFFF)
    fn read(&self, cartridge: &Cartridge, address: u16) -> Result<u8, BusFault>;

    /// Write CHR RAM, SRAM or a mapper register
    fn write(&mut self, cartridge: &mut Cartridge, address: u16, value: u8) -> Result<(), BusFault>;

    /// Advance by one PPU dot. Returns true when the board asserts IRQ.
    fn step(&mut self, _timing: PpuTiming) -> bool {
        false
    }

    /// Check registers decoded from a save-state against `cartridge`
    fn validate(&self, _cartridge: &Cartridge) -> Result<(), StateError> {
        Ok(())
    }
}

/// Byte offset of a bank, where negative indices count from the end.
/// Indices past the last bank wrap.
pub(crate) fn bank_offset(len: usize, bank_size: usize, index: i32) -> usize {
    let banks = (len / bank_size) as i32;
    if banks == 0 {
        return 0;
    }
    index.rem_euclid(banks) as usize * bank_size
}

/// Every precomputed offset lies inside a `len`-byte array
pub(crate) fn offsets_within(offsets: &[usize], len: usize) -> bool {
    offsets.iter().all(|&offset| offset <= len)
}

/// Register value as a signed bank index
pub(crate) fn signed_bank(value: u8) -> i32 {
    value as i8 as i32
}

/// The mapper installed in a device
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum AnyMapper {
    Mapper1(Mapper1),
    Mapper2(Mapper2),
    Mapper3(Mapper3),
    Mapper4(Mapper4),
    Mapper7(Mapper7),
    Mapper40(Mapper40),
    Mapper225(Mapper225),
}

impl AnyMapper {
    /// Select the board for a cartridge's mapper id
    pub fn new(cartridge: &Cartridge) -> Result<Self, MapperError> {
        let id = cartridge.mapper_id();
        let mapper = match id {
            0 => AnyMapper::Mapper2(Mapper2::nrom(cartridge)),
            1 => AnyMapper::Mapper1(Mapper1::new(cartridge)),
            2 => AnyMapper::Mapper2(Mapper2::new(cartridge)),
            3 => AnyMapper::Mapper3(Mapper3::new(cartridge)),
            4 => AnyMapper::Mapper4(Mapper4::new(cartridge)),
            7 => AnyMapper::Mapper7(Mapper7::new()),
            40 => AnyMapper::Mapper40(Mapper40::new()),
            225 => AnyMapper::Mapper225(Mapper225::new(cartridge)),
            _ => return Err(MapperError::Unsupported(id)),
        };
        info!(id, board = mapper.name(), "selected mapper");
        Ok(mapper)
    }

    /// Board name for logs and debug output
    pub fn name(&self) -> &'static str {
        match self {
            AnyMapper::Mapper1(_) => "MMC1",
            AnyMapper::Mapper2(m) if m.is_nrom() => "NROM",
            AnyMapper::Mapper2(_) => "UxROM",
            AnyMapper::Mapper3(_) => "CNROM",
            AnyMapper::Mapper4(_) => "MMC3",
            AnyMapper::Mapper7(_) => "AxROM",
            AnyMapper::Mapper40(_) => "SMB2J",
            AnyMapper::Mapper225(_) => "225-in-1",
        }
    }

    fn inner(&self) -> &dyn Mapper {
        match self {
            AnyMapper::Mapper1(m) => m,
            AnyMapper::Mapper2(m) => m,
            AnyMapper::Mapper3(m) => m,
            AnyMapper::Mapper4(m) => m,
            AnyMapper::Mapper7(m) => m,
            AnyMapper::Mapper40(m) => m,
            AnyMapper::Mapper225(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Mapper {
        match self {
            AnyMapper::Mapper1(m) => m,
            AnyMapper::Mapper2(m) => m,
            AnyMapper::Mapper3(m) => m,
            AnyMapper::Mapper4(m) => m,
            AnyMapper::Mapper7(m) => m,
            AnyMapper::Mapper40(m) => m,
            AnyMapper::Mapper225(m) => m,
        }
    }
}

impl Mapper for AnyMapper {
    fn read(&self, cartridge: &Cartridge, address: u16) -> Result<u8, BusFault> {
        self.inner().read(cartridge, address)
    }

    fn write(&mut self, cartridge: &mut Cartridge, address: u16, value: u8) -> Result<(), BusFault> {
        self.inner_mut().write(cartridge, address, value)
    }

    fn step(&mut self, timing: PpuTiming) -> bool {
        self.inner_mut().step(timing)
    }

    fn validate(&self, cartridge: &Cartridge) -> Result<(), StateError> {
        self.inner().validate(cartridge)
    }
}
