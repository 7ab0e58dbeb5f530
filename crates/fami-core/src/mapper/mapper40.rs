//! Mapper 40: Super Mario Bros. 2 (J) conversion board
//!
//! PRG is laid out in 8KB banks: bank 6 at $6000, 4 at $8000, 5 at $A000,
//! a switchable bank at $C000 and bank 7 at $E000. CHR is a fixed 8KB page.
//! A 12-bit CPU cycle counter raises IRQ 4096 cycles after it is enabled;
//! the game uses it to switch back to the fixed layout once its code has
//! left the swapped bank.
//!
//! | Address       | Effect                                  |
//! |---------------|-----------------------------------------|
//! | $8000-$9FFF   | disable and acknowledge IRQ, reset count |
//! | $A000-$BFFF   | enable IRQ counter                      |
//! | $E000-$FFFF   | select the 8KB bank at $C000            |

use bincode::{Decode, Encode};

use super::{Mapper, PpuTiming};
use crate::bus::BusFault;
use crate::cartridge::Cartridge;
use crate::state::{ensure, StateError};

const PRG_WINDOW: usize = 0x2000;

/// CPU cycles from enable to IRQ
pub const IRQ_DELAY_CPU_CYCLES: u32 = 4096;

/// The mapper is stepped once per PPU dot, three per CPU cycle
const IRQ_DELAY_DOTS: u32 = IRQ_DELAY_CPU_CYCLES * 3;

#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct Mapper40 {
    prg_bank: u8,
    counter: u32,
    counting: bool,
    irq_pending: bool,
}

impl Mapper40 {
    pub fn new() -> Self {
        Self::default()
    }

    fn prg_offset(bank: u8, address: u16) -> usize {
        bank as usize * PRG_WINDOW + (address as usize % PRG_WINDOW)
    }
}

impl Mapper for Mapper40 {
    fn read(&self, cartridge: &Cartridge, address: u16) -> Result<u8, BusFault> {
        let bank = match address {
            0x0000..=0x1FFF => return Ok(cartridge.read_chr(address as usize)),
            0x6000..=0x7FFF => 6,
            0x8000..=0x9FFF => 4,
            0xA000..=0xBFFF => 5,
            0xC000..=0xDFFF => self.prg_bank,
            0xE000..=0xFFFF => 7,
            _ => return Err(BusFault::read(address)),
        };
        Ok(cartridge.read_prg(Self::prg_offset(bank, address)))
    }

    fn write(&mut self, cartridge: &mut Cartridge, address: u16, value: u8) -> Result<(), BusFault> {
        match address {
            0x0000..=0x1FFF => cartridge.write_chr(address as usize, value),
            // PRG ROM at $6000; writes have no effect
            0x6000..=0x7FFF => {}
            0x8000..=0x9FFF => {
                self.counting = false;
                self.irq_pending = false;
                self.counter = 0;
            }
            0xA000..=0xBFFF => self.counting = true,
            0xC000..=0xDFFF => {}
            0xE000..=0xFFFF => self.prg_bank = value & 0x07,
            _ => return Err(BusFault::write(address)),
        }
        Ok(())
    }

    /// The IRQ line stays asserted until acknowledged through $8000
    fn step(&mut self, _timing: PpuTiming) -> bool {
        if self.counting {
            self.counter += 1;
            if self.counter >= IRQ_DELAY_DOTS {
                self.counting = false;
                self.irq_pending = true;
            }
        }
        self.irq_pending
    }

    fn validate(&self, _cartridge: &Cartridge) -> Result<(), StateError> {
        ensure(self.counter <= IRQ_DELAY_DOTS, "SMB2J IRQ counter")
    }
}
