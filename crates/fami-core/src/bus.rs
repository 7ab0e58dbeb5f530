//! Memory bus and mapping
//!
//! The console has two address spaces. [`CpuView`] decodes the 64KB CPU map
//! onto work RAM, PPU/APU registers, controllers and the cartridge.
//! [`CartridgeView`] is the narrower window the PPU (pattern tables) and the
//! DMC (sample fetches) see. Views are built per step from disjoint borrows
//! of the device, so no component holds a reference to another.

use bincode::{Decode, Encode};
use thiserror::Error;
use tracing::warn;

use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::controller::Controller;
use crate::cpu::Bus;
use crate::mapper::{AnyMapper, Mapper};
use crate::ppu::{Ppu, PpuBus};

/// Size of the console work RAM
pub const RAM_SIZE: usize = 2048;

/// OAM DMA trigger register
pub const OAM_DMA: u16 = 0x4014;

/// Nametable arrangement of the four logical 1KB tables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Encode, Decode)]
pub enum Mirroring {
    #[default]
    Horizontal,
    Vertical,
    /// All four tables show the first physical table
    SingleLower,
    /// All four tables show the second physical table
    SingleUpper,
    FourScreen,
}

impl Mirroring {
    fn tables(self) -> [u16; 4] {
        match self {
            Mirroring::Horizontal => [0, 0, 1, 1],
            Mirroring::Vertical => [0, 1, 0, 1],
            Mirroring::SingleLower => [0, 0, 0, 0],
            Mirroring::SingleUpper => [1, 1, 1, 1],
            Mirroring::FourScreen => [0, 1, 2, 3],
        }
    }
}

/// Fold a nametable address ($2000-$3EFF) onto the tables backed by the
/// current mirroring mode. The result stays in $2000-$2FFF.
pub fn mirror_address(mode: Mirroring, address: u16) -> u16 {
    let address = address.wrapping_sub(0x2000) % 0x1000;
    let table = address / 0x0400;
    let offset = address % 0x0400;
    0x2000 + mode.tables()[table as usize] * 0x0400 + offset
}

/// Index into the 2KB of console nametable RAM for a nametable address.
/// Four-screen boards fold their upper tables onto the lower two.
pub fn nametable_index(mode: Mirroring, address: u16) -> usize {
    (mirror_address(mode, address) - 0x2000) as usize % 2048
}

/// Direction of a faulting access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// An access to an address no decoder serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unmapped {access:?} at ${address:04X}")]
pub struct BusFault {
    pub address: u16,
    pub access: Access,
}

impl BusFault {
    pub fn read(address: u16) -> Self {
        Self { address, access: Access::Read }
    }

    pub fn write(address: u16) -> Self {
        Self { address, access: Access::Write }
    }
}

/// Record the first fault of a step and substitute open bus
fn latch(slot: &mut Option<BusFault>, result: Result<u8, BusFault>) -> u8 {
    match result {
        Ok(value) => value,
        Err(fault) => {
            if slot.is_none() {
                warn!(%fault, "bus fault");
                *slot = Some(fault);
            }
            0
        }
    }
}

/// Cartridge address space as seen by the PPU and the DMC
pub struct CartridgeView<'a> {
    pub cartridge: &'a mut Cartridge,
    pub mapper: &'a mut AnyMapper,
    pub fault: &'a mut Option<BusFault>,
}

impl PpuBus for CartridgeView<'_> {
    fn read_pattern(&mut self, address: u16) -> u8 {
        let result = self.mapper.read(self.cartridge, address);
        latch(self.fault, result)
    }

    fn write_pattern(&mut self, address: u16, value: u8) {
        let result = self.mapper.write(self.cartridge, address, value);
        latch(self.fault, result.map(|()| 0));
    }

    fn mirroring(&self) -> Mirroring {
        self.cartridge.mirroring()
    }
}

impl Bus for CartridgeView<'_> {
    fn read(&mut self, address: u16) -> u8 {
        let result = self.mapper.read(self.cartridge, address);
        latch(self.fault, result)
    }

    fn write(&mut self, address: u16, value: u8) {
        let result = self.mapper.write(self.cartridge, address, value);
        latch(self.fault, result.map(|()| 0));
    }
}

/// The CPU address space
pub struct CpuView<'a> {
    pub ram: &'a mut [u8; RAM_SIZE],
    pub ppu: &'a mut Ppu,
    pub apu: &'a mut Apu,
    pub controllers: &'a mut [Controller; 2],
    pub cartridge: &'a mut Cartridge,
    pub mapper: &'a mut AnyMapper,
    pub fault: &'a mut Option<BusFault>,
    /// Set when the step wrote $4014; the owner charges the DMA stall
    pub oam_dma: bool,
}

impl CpuView<'_> {
    /// Copy one 256-byte page into OAM
    fn oam_dma(&mut self, page: u8) {
        let base = (page as u16) << 8;
        let mut data = [0u8; 256];
        for (offset, byte) in data.iter_mut().enumerate() {
            *byte = self.read(base | offset as u16);
        }
        self.ppu.write_oam_dma(&data);
        self.oam_dma = true;
    }
}

impl Bus for CpuView<'_> {
    fn read(&mut self, address: u16) -> u8 {
        match address {
            0x0000..=0x1FFF => self.ram[address as usize % RAM_SIZE],
            0x2000..=0x3FFF => {
                let mut view = CartridgeView {
                    cartridge: &mut *self.cartridge,
                    mapper: &mut *self.mapper,
                    fault: &mut *self.fault,
                };
                self.ppu.read_register(0x2000 | (address & 0x0007), &mut view)
            }
            0x4015 => self.apu.read_register(address),
            0x4016 => self.controllers[0].read(),
            0x4017 => self.controllers[1].read(),
            // Write-only APU registers, $4014 and the expansion area read as open bus
            0x4000..=0x5FFF => 0,
            0x6000..=0xFFFF => {
                let result = self.mapper.read(self.cartridge, address);
                latch(self.fault, result)
            }
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x1FFF => self.ram[address as usize % RAM_SIZE] = value,
            0x2000..=0x3FFF => {
                let mut view = CartridgeView {
                    cartridge: &mut *self.cartridge,
                    mapper: &mut *self.mapper,
                    fault: &mut *self.fault,
                };
                self.ppu.write_register(0x2000 | (address & 0x0007), value, &mut view);
            }
            OAM_DMA => self.oam_dma(value),
            0x4016 => {
                for controller in self.controllers.iter_mut() {
                    controller.write(value);
                }
            }
            0x4000..=0x4013 | 0x4015 | 0x4017 => self.apu.write_register(address, value),
            0x4018..=0x5FFF => {}
            0x6000..=0xFFFF => {
                let result = self.mapper.write(self.cartridge, address, value);
                latch(self.fault, result.map(|()| 0));
            }
        }
    }
}
