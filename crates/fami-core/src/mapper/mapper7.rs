//! Mapper 7 (AxROM): 32KB PRG switching with single-screen mirroring select

use bincode::{Decode, Encode};

use super::Mapper;
use crate::bus::{BusFault, Mirroring};
use crate::cartridge::Cartridge;
use crate::state::{ensure, StateError};

const PRG_WINDOW: usize = 0x8000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct Mapper7 {
    prg_bank: usize,
}

impl Mapper7 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Mapper for Mapper7 {
    fn read(&self, cartridge: &Cartridge, address: u16) -> Result<u8, BusFault> {
        match address {
            0x0000..=0x1FFF => Ok(cartridge.read_chr(address as usize)),
            0x6000..=0x7FFF => Ok(cartridge.read_sram(address as usize - 0x6000)),
            0x8000..=0xFFFF => {
                Ok(cartridge.read_prg(self.prg_bank * PRG_WINDOW + (address as usize - 0x8000)))
            }
            _ => Err(BusFault::read(address)),
        }
    }

    fn write(&mut self, cartridge: &mut Cartridge, address: u16, value: u8) -> Result<(), BusFault> {
        match address {
            0x0000..=0x1FFF => cartridge.write_chr(address as usize, value),
            0x6000..=0x7FFF => cartridge.write_sram(address as usize - 0x6000, value),
            0x8000..=0xFFFF => {
                self.prg_bank = (value & 0x07) as usize;
                let mirroring = if value & 0x10 == 0 {
                    Mirroring::SingleLower
                } else {
                    Mirroring::SingleUpper
                };
                cartridge.set_mirroring(mirroring);
            }
            _ => return Err(BusFault::write(address)),
        }
        Ok(())
    }

    fn validate(&self, _cartridge: &Cartridge) -> Result<(), StateError> {
        ensure(self.prg_bank < 8, "AxROM PRG bank")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bank_and_mirroring_select() {
        let mut prg = vec![0; 4 * PRG_WINDOW];
        for bank in 0..4 {
            prg[bank * PRG_WINDOW + 0x10] = bank as u8;
        }
        let mut cart = Cartridge::new(prg, vec![], 7, Mirroring::Horizontal);
        let mut mapper = Mapper7::new();

        mapper.write(&mut cart, 0x8000, 0x12).unwrap();
        assert_eq!(mapper.read(&cart, 0x8010), Ok(2));
        assert_eq!(cart.mirroring(), Mirroring::SingleUpper);

        mapper.write(&mut cart, 0xFFFF, 0x01).unwrap();
        assert_eq!(mapper.read(&cart, 0x8010), Ok(1));
        assert_eq!(cart.mirroring(), Mirroring::SingleLower);
    }
}
