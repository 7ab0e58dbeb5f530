//! Mapper 3 (CNROM): fixed PRG, switchable 8KB CHR bank

use bincode::{Decode, Encode};

use super::Mapper;
use crate::bus::BusFault;
use crate::cartridge::{Cartridge, CHR_BANK_SIZE, PRG_BANK_SIZE};
use crate::state::{ensure, StateError};

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Mapper3 {
    chr_bank: usize,
    prg_bank1: usize,
    prg_bank2: usize,
}

impl Mapper3 {
    pub fn new(cartridge: &Cartridge) -> Self {
        Self {
            chr_bank: 0,
            prg_bank1: 0,
            prg_bank2: cartridge.prg_banks().max(1) - 1,
        }
    }
}

impl Mapper for Mapper3 {
    fn read(&self, cartridge: &Cartridge, address: u16) -> Result<u8, BusFault> {
        match address {
            0x0000..=0x1FFF => Ok(cartridge.read_chr(self.chr_bank * CHR_BANK_SIZE + address as usize)),
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
            0x0000..=0x1FFF => {
                cartridge.write_chr(self.chr_bank * CHR_BANK_SIZE + address as usize, value)
            }
            0x6000..=0x7FFF => cartridge.write_sram(address as usize - 0x6000, value),
            0x8000..=0xFFFF => self.chr_bank = (value & 0x03) as usize,
            _ => return Err(BusFault::write(address)),
        }
        Ok(())
    }

    fn validate(&self, cartridge: &Cartridge) -> Result<(), StateError> {
        let banks = cartridge.prg_banks().max(1);
        ensure(self.chr_bank < 4, "CNROM CHR bank")?;
        ensure(self.prg_bank1 < banks && self.prg_bank2 < banks, "CNROM PRG bank")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Mirroring;

    #[test]
    fn test_chr_bank_select() {
        let mut chr = vec![0; 4 * CHR_BANK_SIZE];
        for bank in 0..4 {
            chr[bank * CHR_BANK_SIZE + 5] = 0x10 + bank as u8;
        }
        let mut cart = Cartridge::new(vec![0; 2 * PRG_BANK_SIZE], chr, 3, Mirroring::Horizontal);
        let mut mapper = Mapper3::new(&cart);

        assert_eq!(mapper.read(&cart, 0x0005), Ok(0x10));
        mapper.write(&mut cart, 0x8000, 0xFE).unwrap();
        assert_eq!(mapper.read(&cart, 0x0005), Ok(0x12));
    }
}
