//! Mapper 225: 52/64/72-in-1 multicarts
//!
//! Everything is selected by the address of a write to $8000-$FFFF; the
//! data byte is ignored.
//!
//! ```text
//! A~[1H.M PPPP PPCC CCCC]
//!    |  | ++++-++++-++++- P: 16KB PRG bank, C: 8KB CHR bank (low 6 bits)
//!    |  +-------------- M: 1 = 16KB PRG mirrored, 0 = 32KB PRG
//!    +----------------- H: 1 = horizontal mirroring, 0 = vertical
//!   bit 14 supplies bit 6 of both bank numbers
//! ```

use bincode::{Decode, Encode};

use super::Mapper;
use crate::bus::{BusFault, Mirroring};
use crate::cartridge::{Cartridge, CHR_BANK_SIZE, PRG_BANK_SIZE};
use crate::state::{ensure, StateError};

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Mapper225 {
    chr_bank: usize,
    prg_bank1: usize,
    prg_bank2: usize,
}

impl Mapper225 {
    pub fn new(cartridge: &Cartridge) -> Self {
        Self {
            chr_bank: 0,
            prg_bank1: 0,
            prg_bank2: cartridge.prg_banks().max(1) - 1,
        }
    }
}

impl Mapper for Mapper225 {
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
            0x8000..=0xFFFF => {
                let a = address as usize;
                let high = (a >> 14) & 1;
                self.chr_bank = (a & 0x3F) | (high << 6);
                let prg = ((a >> 6) & 0x3F) | (high << 6);
                if (a >> 12) & 1 == 1 {
                    self.prg_bank1 = prg;
                    self.prg_bank2 = prg;
                } else {
                    self.prg_bank1 = prg & !1;
                    self.prg_bank2 = prg | 1;
                }
                let mirroring = if (a >> 13) & 1 == 1 {
                    Mirroring::Horizontal
                } else {
                    Mirroring::Vertical
                };
                cartridge.set_mirroring(mirroring);
            }
            _ => return Err(BusFault::write(address)),
        }
        Ok(())
    }

    fn validate(&self, _cartridge: &Cartridge) -> Result<(), StateError> {
        ensure(self.chr_bank < 0x80, "225 CHR bank")?;
        ensure(self.prg_bank1 < 0x80 && self.prg_bank2 < 0x80, "225 PRG bank")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cartridge() -> Cartridge {
        let mut prg = vec![0; 8 * PRG_BANK_SIZE];
        for bank in 0..8 {
            prg[bank * PRG_BANK_SIZE] = bank as u8;
        }
        let mut chr = vec![0; 4 * CHR_BANK_SIZE];
        for bank in 0..4 {
            chr[bank * CHR_BANK_SIZE] = 0x40 | bank as u8;
        }
        Cartridge::new(prg, chr, 225, Mirroring::Vertical)
    }

    #[test]
    fn test_16k_mode_mirrors_bank() {
        let mut cart = cartridge();
        let mut mapper = Mapper225::new(&cart);
        // M=1, H=1, PRG=3, CHR=2
        mapper.write(&mut cart, 0x8000 | 0x3000 | (3 << 6) | 2, 0).unwrap();
        assert_eq!(mapper.read(&cart, 0x8000), Ok(3));
        assert_eq!(mapper.read(&cart, 0xC000), Ok(3));
        assert_eq!(mapper.read(&cart, 0x0000), Ok(0x42));
        assert_eq!(cart.mirroring(), Mirroring::Horizontal);
    }

    #[test]
    fn test_32k_mode_pairs_banks() {
        let mut cart = cartridge();
        let mut mapper = Mapper225::new(&cart);
        mapper.write(&mut cart, 0x8000 | (5 << 6), 0).unwrap();
        assert_eq!(mapper.read(&cart, 0x8000), Ok(4));
        assert_eq!(mapper.read(&cart, 0xC000), Ok(5));
        assert_eq!(cart.mirroring(), Mirroring::Vertical);
    }
}
