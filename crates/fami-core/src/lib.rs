//! Fami Core - cycle-stepped NES emulator library
//!
//! This crate contains the console itself: the 2A03 CPU, the 2C02 PPU, the
//! APU, cartridge mappers and the buses that connect them. It has no
//! windowing or audio-device dependencies; frontends present
//! [`Device::buffer`], feed controller state and drain audio samples.
//!
//! ```no_run
//! use fami_core::Device;
//!
//! let mut device = Device::open("game.nes")?;
//! device.step_frame()?;
//! let pixels: &[u32] = device.buffer();
//! # let _ = pixels;
//! # Ok::<(), fami_core::DeviceError>(())
//! ```

#![forbid(unsafe_code)]

/// CPU module containing the 2A03 (6502 variant) implementation
pub mod cpu;
/// Instruction decode tables
pub mod opcode;
/// Memory bus and mapping
pub mod bus;
/// PPU (Picture Processing Unit) implementation
pub mod ppu;
/// APU (Audio Processing Unit) implementation
pub mod apu;
/// Audio output filters
pub mod filter;
/// iNES cartridge loading
pub mod cartridge;
/// Cartridge bank-switching boards
pub mod mapper;
/// Standard controllers
pub mod controller;
/// NTSC colour palette
pub mod palette;
/// Save-state encoding
pub mod state;
/// Console orchestration
pub mod device;

pub use apu::{AudioConfig, Backpressure};
pub use cartridge::{Cartridge, CartridgeError};
pub use device::{Device, DeviceError};
pub use ppu::{HEIGHT, WIDTH};
