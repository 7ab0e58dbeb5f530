//! Mapper 1 (MMC1)
//!
//! Registers are loaded one bit per write through a 5-bit shift register.
//! Writing a value with bit 7 set resets the shift register and forces the
//! PRG mode that fixes the last bank at $C000. The register written on the
//! fifth bit is selected by address bits 13-14:
//!
//! | Address       | Register                      |
//! |---------------|-------------------------------|
//! | $8000-$9FFF   | control (mirroring, modes)    |
//! | $A000-$BFFF   | CHR bank 0                    |
//! | $C000-$DFFF   | CHR bank 1                    |
//! | $E000-$FFFF   | PRG bank                      |

use bincode::{Decode, Encode};
use tracing::debug;

use super::{bank_offset, offsets_within, signed_bank, Mapper};
use crate::bus::{BusFault, Mirroring};
use crate::cartridge::Cartridge;
use crate::state::{ensure, StateError};

const PRG_WINDOW: usize = 0x4000;
const CHR_WINDOW: usize = 0x1000;

/// Shift register value with only the sentinel bit set
const SHIFT_RESET: u8 = 0x10;

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Mapper1 {
    shift_register: u8,
    control: u8,
    prg_mode: u8,
    chr_mode: u8,
    prg_bank: u8,
    chr_bank0: u8,
    chr_bank1: u8,
    prg_offsets: [usize; 2],
    chr_offsets: [usize; 2],
}

impl Mapper1 {
    pub fn new(cartridge: &Cartridge) -> Self {
        Self {
            shift_register: SHIFT_RESET,
            control: 0,
            prg_mode: 0,
            chr_mode: 0,
            prg_bank: 0,
            chr_bank0: 0,
            chr_bank1: 0,
            prg_offsets: [0, bank_offset(cartridge.prg().len(), PRG_WINDOW, -1)],
            chr_offsets: [0, 0],
        }
    }

    fn load_register(&mut self, cartridge: &mut Cartridge, address: u16, value: u8) {
        if value & 0x80 != 0 {
            self.shift_register = SHIFT_RESET;
            self.write_control(cartridge, self.control | 0x0C);
            return;
        }

        let complete = self.shift_register & 1 == 1;
        self.shift_register >>= 1;
        self.shift_register |= (value & 1) << 4;
        if complete {
            let register = self.shift_register;
            self.shift_register = SHIFT_RESET;
            match address {
                0x8000..=0x9FFF => self.write_control(cartridge, register),
                0xA000..=0xBFFF => self.chr_bank0 = register,
                0xC000..=0xDFFF => self.chr_bank1 = register,
                _ => self.prg_bank = register & 0x0F,
            }
            self.update_offsets(cartridge);
        }
    }

    fn write_control(&mut self, cartridge: &mut Cartridge, value: u8) {
        self.control = value;
        self.chr_mode = (value >> 4) & 1;
        self.prg_mode = (value >> 2) & 3;
        let mirroring = match value & 3 {
            0 => Mirroring::SingleLower,
            1 => Mirroring::SingleUpper,
            2 => Mirroring::Vertical,
            _ => Mirroring::Horizontal,
        };
        cartridge.set_mirroring(mirroring);
        debug!(control = value, ?mirroring, "MMC1 control");
        self.update_offsets(cartridge);
    }

    fn update_offsets(&mut self, cartridge: &Cartridge) {
        let prg = |index: i32| bank_offset(cartridge.prg().len(), PRG_WINDOW, index);
        let chr = |index: i32| bank_offset(cartridge.chr().len(), CHR_WINDOW, index);

        self.prg_offsets = match self.prg_mode {
            // 32KB switching ignores the low bank bit
            0 | 1 => [
                prg(signed_bank(self.prg_bank & 0xFE)),
                prg(signed_bank(self.prg_bank | 0x01)),
            ],
            // First bank fixed at $8000
            2 => [0, prg(signed_bank(self.prg_bank))],
            // Last bank fixed at $C000
            _ => [prg(signed_bank(self.prg_bank)), prg(-1)],
        };

        self.chr_offsets = if self.chr_mode == 0 {
            [
                chr(signed_bank(self.chr_bank0 & 0xFE)),
                chr(signed_bank(self.chr_bank0 | 0x01)),
            ]
        } else {
            [chr(signed_bank(self.chr_bank0)), chr(signed_bank(self.chr_bank1))]
        };
    }
}

impl Mapper for Mapper1 {
    fn read(&self, cartridge: &Cartridge, address: u16) -> Result<u8, BusFault> {
        let address = address as usize;
        match address {
            0x0000..=0x1FFF => {
                let bank = address / CHR_WINDOW;
                Ok(cartridge.read_chr(self.chr_offsets[bank] + address % CHR_WINDOW))
            }
            0x6000..=0x7FFF => Ok(cartridge.read_sram(address - 0x6000)),
            0x8000..=0xFFFF => {
                let address = address - 0x8000;
                let bank = address / PRG_WINDOW;
                Ok(cartridge.read_prg(self.prg_offsets[bank] + address % PRG_WINDOW))
            }
            _ => Err(BusFault::read(address as u16)),
        }
    }

    fn write(&mut self, cartridge: &mut Cartridge, address: u16, value: u8) -> Result<(), BusFault> {
        match address {
            0x0000..=0x1FFF => {
                let address = address as usize;
                let bank = address / CHR_WINDOW;
                cartridge.write_chr(self.chr_offsets[bank] + address % CHR_WINDOW, value);
            }
            0x6000..=0x7FFF => cartridge.write_sram(address as usize - 0x6000, value),
            0x8000..=0xFFFF => self.load_register(cartridge, address, value),
            _ => return Err(BusFault::write(address)),
        }
        Ok(())
    }

    fn validate(&self, cartridge: &Cartridge) -> Result<(), StateError> {
        ensure(offsets_within(&self.prg_offsets, cartridge.prg().len()), "MMC1 PRG bank")?;
        ensure(offsets_within(&self.chr_offsets, cartridge.chr().len()), "MMC1 CHR bank")
    }
}
