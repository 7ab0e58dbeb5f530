//! The whole console
//!
//! [`Device`] owns every component and drives them in lock step: each CPU
//! step of N cycles is followed by 3N PPU dots (the mapper sees each one)
//! and N APU cycles. Components never point at each other; the device
//! lends them short-lived bus views built from its own fields.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crossbeam::channel::Sender;
use thiserror::Error;
use tracing::{debug, info};

use crate::apu::{Apu, ApuState, AudioConfig};
use crate::bus::{BusFault, CartridgeView, CpuView, RAM_SIZE};
use crate::cartridge::{Cartridge, CartridgeError, CartridgeState};
use crate::controller::{pack_buttons, Controller, BUTTON_COUNT};
use crate::cpu::{Cpu, CPU_FREQUENCY};
use crate::mapper::{AnyMapper, Mapper, MapperError};
use crate::palette;
use crate::ppu::Ppu;
use crate::state::{self, StateError};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Cartridge(#[from] CartridgeError),
    #[error(transparent)]
    Mapper(#[from] MapperError),
    #[error(transparent)]
    Bus(#[from] BusFault),
    #[error(transparent)]
    State(#[from] StateError),
}

/// NES console
#[derive(Debug)]
pub struct Device {
    cpu: Cpu,
    ppu: Ppu,
    apu: Apu,
    ram: [u8; RAM_SIZE],
    controllers: [Controller; 2],
    cartridge: Cartridge,
    mapper: AnyMapper,
    /// First unmapped access of the current step
    fault: Option<BusFault>,
}

impl Device {
    /// Power on a console with `cartridge` inserted
    pub fn new(cartridge: Cartridge) -> Result<Self, DeviceError> {
        let mapper = AnyMapper::new(&cartridge)?;
        let mut device = Self {
            cpu: Cpu::new(),
            ppu: Ppu::new(),
            apu: Apu::new(),
            ram: [0; RAM_SIZE],
            controllers: [Controller::new(), Controller::new()],
            cartridge,
            mapper,
            fault: None,
        };
        device.reset()?;
        info!(mapper = device.mapper.name(), "console created");
        Ok(device)
    }

    /// Power on with an in-memory iNES image
    pub fn from_bytes(rom: &[u8]) -> Result<Self, DeviceError> {
        Self::new(Cartridge::from_bytes(rom)?)
    }

    /// Power on with an iNES file
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DeviceError> {
        Self::new(Cartridge::open(path)?)
    }

    /// Press the reset button: the CPU reloads PC from the reset vector
    pub fn reset(&mut self) -> Result<(), DeviceError> {
        let mut view = CpuView {
            ram: &mut self.ram,
            ppu: &mut self.ppu,
            apu: &mut self.apu,
            controllers: &mut self.controllers,
            cartridge: &mut self.cartridge,
            mapper: &mut self.mapper,
            fault: &mut self.fault,
            oam_dma: false,
        };
        self.cpu.reset(&mut view);
        info!(pc = format_args!("${:04X}", self.cpu.registers().pc), "reset");
        self.take_fault()
    }

    /// Execute one CPU step and the PPU/APU/mapper cycles it covers.
    /// Returns the CPU cycles consumed.
    ///
    /// An unmapped access does not stop the step; the first one is
    /// reported once the step has finished and the device stays usable.
    pub fn step(&mut self) -> Result<u32, DeviceError> {
        let mut view = CpuView {
            ram: &mut self.ram,
            ppu: &mut self.ppu,
            apu: &mut self.apu,
            controllers: &mut self.controllers,
            cartridge: &mut self.cartridge,
            mapper: &mut self.mapper,
            fault: &mut self.fault,
            oam_dma: false,
        };
        let cpu_cycles = self.cpu.step(&mut view);
        if view.oam_dma {
            debug!(cycle = self.cpu.cycles(), "OAM DMA");
            self.cpu.stall_for_oam_dma();
        }

        for _ in 0..cpu_cycles * 3 {
            let mut view = CartridgeView {
                cartridge: &mut self.cartridge,
                mapper: &mut self.mapper,
                fault: &mut self.fault,
            };
            if self.ppu.step(&mut view) {
                self.cpu.trigger_nmi();
            }
            if self.mapper.step(self.ppu.timing()) {
                self.cpu.trigger_irq();
            }
        }

        for _ in 0..cpu_cycles {
            let mut view = CartridgeView {
                cartridge: &mut self.cartridge,
                mapper: &mut self.mapper,
                fault: &mut self.fault,
            };
            let tick = self.apu.step(&mut view);
            if tick.stall > 0 {
                self.cpu.add_stall(tick.stall);
            }
            if tick.irq {
                self.cpu.trigger_irq();
            }
        }

        self.take_fault()?;
        Ok(cpu_cycles)
    }

    /// Run until the PPU finishes the current frame. Returns CPU cycles consumed.
    pub fn step_frame(&mut self) -> Result<u32, DeviceError> {
        let frame = self.ppu.frame();
        let mut cycles = 0;
        while frame == self.ppu.frame() {
            cycles += self.step()?;
        }
        Ok(cycles)
    }

    /// Run for a wall-clock duration worth of CPU cycles
    pub fn step_seconds(&mut self, seconds: f64) -> Result<(), DeviceError> {
        let mut budget = (CPU_FREQUENCY as f64 * seconds) as i64;
        while budget > 0 {
            budget -= self.step()? as i64;
        }
        Ok(())
    }

    fn take_fault(&mut self) -> Result<(), DeviceError> {
        match self.fault.take() {
            Some(fault) => Err(DeviceError::Bus(fault)),
            None => Ok(()),
        }
    }

    /// Last completed frame, 256x240 pixels of 0x00RRGGBB
    pub fn buffer(&self) -> &[u32] {
        self.ppu.front_buffer()
    }

    /// Universal background colour (palette entry 0)
    pub fn background_color(&self) -> u32 {
        palette::color(self.ppu.read_palette(0))
    }

    /// Set the button vector of controller `port` (0 or 1); bit n is
    /// button n in A, B, Select, Start, Up, Down, Left, Right order
    pub fn set_buttons(&mut self, port: usize, buttons: u8) {
        if let Some(controller) = self.controllers.get_mut(port) {
            controller.set_buttons(buttons);
        }
    }

    pub fn set_buttons1(&mut self, buttons: [bool; BUTTON_COUNT]) {
        self.set_buttons(0, pack_buttons(buttons));
    }

    pub fn set_buttons2(&mut self, buttons: [bool; BUTTON_COUNT]) {
        self.set_buttons(1, pack_buttons(buttons));
    }

    /// Deliver samples to `sender` at `config.sample_rate`
    pub fn set_audio(&mut self, config: AudioConfig, sender: Sender<f32>) {
        info!(sample_rate = config.sample_rate, backpressure = ?config.backpressure, "audio output");
        self.apu.set_audio(config, sender);
    }

    /// Change the output sample rate; zero disables audio
    pub fn set_audio_sample_rate(&mut self, sample_rate: f64) {
        self.apu.set_sample_rate(sample_rate);
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// Direct register access for debuggers and test harnesses
    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn ppu(&self) -> &Ppu {
        &self.ppu
    }

    pub fn apu(&self) -> &Apu {
        &self.apu
    }

    pub fn cartridge(&self) -> &Cartridge {
        &self.cartridge
    }

    pub fn mapper(&self) -> &AnyMapper {
        &self.mapper
    }

    pub fn ram(&self) -> &[u8; RAM_SIZE] {
        &self.ram
    }

    pub fn controller(&self, port: usize) -> Option<&Controller> {
        self.controllers.get(port)
    }

    /// Write the full machine state
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<(), DeviceError> {
        state::encode(writer, &self.ram)?;
        state::encode(writer, &self.cpu)?;
        state::encode(writer, self.apu.state())?;
        state::encode(writer, &self.ppu)?;
        state::encode(writer, &self.cartridge.state())?;
        state::encode(writer, &self.mapper)?;
        state::encode_sentinel(writer)?;
        Ok(())
    }

    /// Read a state written by [`Device::save`]. Nothing changes unless the
    /// whole state decodes and every component passes its range checks.
    pub fn load<R: Read>(&mut self, reader: &mut R) -> Result<(), DeviceError> {
        let ram: [u8; RAM_SIZE] = state::decode(reader)?;
        let cpu: Cpu = state::decode(reader)?;
        let apu: ApuState = state::decode(reader)?;
        let ppu: Ppu = state::decode(reader)?;
        let cartridge: CartridgeState = state::decode(reader)?;
        let mapper: AnyMapper = state::decode(reader)?;
        state::decode_sentinel(reader)?;

        cpu.validate()?;
        apu.validate()?;
        ppu.validate()?;
        state::ensure(
            std::mem::discriminant(&mapper) == std::mem::discriminant(&self.mapper),
            "mapper board",
        )?;
        mapper.validate(&self.cartridge)?;

        self.ram = ram;
        self.cpu = cpu;
        self.apu.restore(apu);
        self.ppu = ppu;
        self.cartridge.restore(cartridge);
        self.mapper = mapper;
        self.fault = None;
        Ok(())
    }

    /// Save to a file, creating its parent directories
    pub fn save_state(&self, path: impl AsRef<Path>) -> Result<(), DeviceError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(StateError::from)?;
        }
        let mut writer = BufWriter::new(File::create(path).map_err(StateError::from)?);
        self.save(&mut writer)?;
        writer.flush().map_err(StateError::from)?;
        info!(path = %path.display(), "saved state");
        Ok(())
    }

    pub fn load_state(&mut self, path: impl AsRef<Path>) -> Result<(), DeviceError> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path).map_err(StateError::from)?);
        self.load(&mut reader)?;
        info!(path = %path.display(), "loaded state");
        Ok(())
    }
}
