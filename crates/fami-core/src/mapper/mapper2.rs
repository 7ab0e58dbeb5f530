//! Mapper 2 (UxROM), also used for mapper 0 (NROM)
//!
//! A switchable 16KB PRG bank at $8000 and the last bank fixed at $C000.
//! CHR is a single unbanked 8KB page.

use bincode::{Decode, Encode};

use super::Mapper;
use crate::bus::BusFault;
use crate::cartridge::{Cartridge, PRG_BANK_SIZE};
use crate::state::{ensure, StateError};

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Mapper2 {
    prg_banks: usize,
    prg_bank1: usize,
    prg_bank2: usize,
    /// NROM has no bank register; writes to PRG space are dropped
    switchable: bool,
}

impl Mapper2 {
    pub fn new(cartridge: &Cartridge) -> Self {
        let prg_banks = cartridge.prg_banks().max(1);
        Self {
            prg_banks,
            prg_bank1: 0,
            prg_bank2: prg_banks - 1,
            switchable: true,
        }
    }

    /// NROM layout: 16KB images mirror into both halves, 32KB map linearly
    pub fn nrom(cartridge: &Cartridge) -> Self {
        Self {
            switchable: false,
            ..Self::new(cartridge)
        }
    }

    pub fn is_nrom(&self) -> bool {
        !self.switchable
    }
}

impl Mapper for Mapper2 {
    fn read(&self, cartridge: &Cartridge, address: u16) -> Result<u8, BusFault> {
        match address {
            0x0000..=0x1FFF => Ok(cartridge.read_chr(address as usize)),
            0x6000..=0x7FFF => Ok(cartridge.read_sram(address as usize - 0x6000)),
            0x8000..=0xBFFF => {
                Ok(cartridge.read_prg(self.prg_bank1 * PRG_BANK_SIZE + (address as usize - 0x8000)))
            }
            0xC000..=0xFFFF => {
                Ok(cartridge.read_prg(self.prg_bank2 * PRG_BANK_SIZE + (address as usize - 0xC000)))
            }
            _ => Err(BusFault::read(address)),
        }
    }

    fn write(&mut self, cartridge: &mut Cartridge, address: u16, value: u8) -> Result<(), BusFault> {
        match address {
            0x0000..=0x1FFF => cartridge.write_chr(address as usize, value),
            0x6000..=0x7FFF => cartridge.write_sram(address as usize - 0x6000, value),
            0x8000..=0xFFFF if self.switchable => self.prg_bank1 = value as usize % self.prg_banks,
            0x8000..=0xFFFF => {}
            _ => return Err(BusFault::write(address)),
        }
        Ok(())
    }

    fn validate(&self, cartridge: &Cartridge) -> Result<(), StateError> {
        ensure(self.prg_banks == cartridge.prg_banks().max(1), "UxROM bank count")?;
        ensure(
            self.prg_bank1 < self.prg_banks && self.prg_bank2 < self.prg_banks,
            "UxROM PRG bank",
        )
    }
}
