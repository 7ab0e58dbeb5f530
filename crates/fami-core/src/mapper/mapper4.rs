//! Mapper 4 (MMC3)
//!
//! Eight bank registers R0-R7 selected through $8000 and loaded through
//! $8001. R0/R1 pick 2KB CHR banks, R2-R5 1KB CHR banks, R6/R7 8KB PRG
//! banks. The scanline counter is clocked at dot 280 of every rendered
//! scanline and raises IRQ when it reaches zero with IRQs enabled.

use bincode::{Decode, Encode};
use tracing::debug;

use super::{bank_offset, offsets_within, signed_bank, Mapper, PpuTiming};
use crate::bus::{BusFault, Mirroring};
use crate::cartridge::Cartridge;
use crate::state::{ensure, StateError};

const PRG_WINDOW: usize = 0x2000;
const CHR_WINDOW: usize = 0x0400;

/// PPU dot at which the scanline counter is clocked
const COUNTER_DOT: u16 = 280;

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Mapper4 {
    register: u8,
    registers: [u8; 8],
    prg_mode: u8,
    chr_mode: u8,
    prg_offsets: [usize; 4],
    chr_offsets: [usize; 8],
    reload: u8,
    counter: u8,
    irq_enable: bool,
}

impl Mapper4 {
    pub fn new(cartridge: &Cartridge) -> Self {
        let prg = |index| bank_offset(cartridge.prg().len(), PRG_WINDOW, index);
        Self {
            register: 0,
            registers: [0; 8],
            prg_mode: 0,
            chr_mode: 0,
            prg_offsets: [prg(0), prg(1), prg(-2), prg(-1)],
            chr_offsets: [0; 8],
            reload: 0,
            counter: 0,
            irq_enable: false,
        }
    }

    /// Clock the scanline counter; true when it fires
    fn clock_scanline(&mut self) -> bool {
        if self.counter == 0 {
            self.counter = self.reload;
            false
        } else {
            self.counter -= 1;
            self.counter == 0 && self.irq_enable
        }
    }

    fn write_register(&mut self, cartridge: &mut Cartridge, address: u16, value: u8) {
        let even = address % 2 == 0;
        match (address, even) {
            (0x8000..=0x9FFF, true) => {
                self.prg_mode = (value >> 6) & 1;
                self.chr_mode = (value >> 7) & 1;
                self.register = value & 7;
                self.update_offsets(cartridge);
            }
            (0x8000..=0x9FFF, false) => {
                self.registers[self.register as usize] = value;
                self.update_offsets(cartridge);
            }
            (0xA000..=0xBFFF, true) => {
                let mirroring = if value & 1 == 0 {
                    Mirroring::Vertical
                } else {
                    Mirroring::Horizontal
                };
                cartridge.set_mirroring(mirroring);
            }
            // PRG RAM protect is not emulated
            (0xA000..=0xBFFF, false) => {}
            (0xC000..=0xDFFF, true) => self.reload = value,
            (0xC000..=0xDFFF, false) => self.counter = 0,
            (_, true) => self.irq_enable = false,
            (_, false) => self.irq_enable = true,
        }
        debug!(address, value, "MMC3 register");
    }

    fn update_offsets(&mut self, cartridge: &Cartridge) {
        let prg = |index: i32| bank_offset(cartridge.prg().len(), PRG_WINDOW, index);
        let chr = |index: i32| bank_offset(cartridge.chr().len(), CHR_WINDOW, index);
        let r = |n: usize| signed_bank(self.registers[n]);
        let r_even = |n: usize| signed_bank(self.registers[n] & 0xFE);
        let r_odd = |n: usize| signed_bank(self.registers[n] | 0x01);

        let prg_offsets = if self.prg_mode == 0 {
            [prg(r(6)), prg(r(7)), prg(-2), prg(-1)]
        } else {
            [prg(-2), prg(r(7)), prg(r(6)), prg(-1)]
        };

        let two_k = [chr(r_even(0)), chr(r_odd(0)), chr(r_even(1)), chr(r_odd(1))];
        let one_k = [chr(r(2)), chr(r(3)), chr(r(4)), chr(r(5))];
        let mut chr_offsets = [0; 8];
        if self.chr_mode == 0 {
            chr_offsets[..4].copy_from_slice(&two_k);
            chr_offsets[4..].copy_from_slice(&one_k);
        } else {
            chr_offsets[..4].copy_from_slice(&one_k);
            chr_offsets[4..].copy_from_slice(&two_k);
        }

        self.prg_offsets = prg_offsets;
        self.chr_offsets = chr_offsets;
    }
}

impl Mapper for Mapper4 {
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
            0x8000..=0xFFFF => self.write_register(cartridge, address, value),
            _ => return Err(BusFault::write(address)),
        }
        Ok(())
    }

    fn step(&mut self, timing: PpuTiming) -> bool {
        if timing.cycle != COUNTER_DOT || !timing.rendering {
            return false;
        }
        if (240..=260).contains(&timing.scanline) {
            return false;
        }
        self.clock_scanline()
    }

    fn validate(&self, cartridge: &Cartridge) -> Result<(), StateError> {
        ensure(self.register < 8, "MMC3 bank select")?;
        ensure(offsets_within(&self.prg_offsets, cartridge.prg().len()), "MMC3 PRG bank")?;
        ensure(offsets_within(&self.chr_offsets, cartridge.chr().len()), "MMC3 CHR bank")
    }
}
