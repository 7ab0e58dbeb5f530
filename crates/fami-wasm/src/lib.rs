//! Fami WASM - JavaScript bindings for the emulator core
//!
//! The host owns the animation loop: it calls `step_seconds` (or
//! `step_frame`) from `requestAnimationFrame`, blits `framebuffer_rgba`
//! into an `ImageData`, and drains `take_audio` into a Web Audio buffer.

use crossbeam::channel::{self, Receiver};
use fami_core::{AudioConfig, Device, HEIGHT, WIDTH};
use js_sys::{Float32Array, Uint8Array};
use wasm_bindgen::prelude::wasm_bindgen;
use wasm_bindgen::JsError;

fn js_error(err: impl std::fmt::Display) -> JsError {
    JsError::new(&err.to_string())
}

/// Expand 0x00RRGGBB pixels to the RGBA byte layout of `ImageData`
fn to_rgba(pixels: &[u32], out: &mut Vec<u8>) {
    out.clear();
    out.reserve(pixels.len() * 4);
    for pixel in pixels {
        let [_, r, g, b] = pixel.to_be_bytes();
        out.extend_from_slice(&[r, g, b, 0xFF]);
    }
}

/// NES emulator wrapper for WASM
#[wasm_bindgen]
pub struct FamiEmulator {
    device: Device,
    audio: Option<Receiver<f32>>,
    rgba: Vec<u8>,
}

#[wasm_bindgen]
impl FamiEmulator {
    /// Power on with an iNES image
    #[wasm_bindgen(constructor)]
    pub fn new(rom: &[u8]) -> Result<FamiEmulator, JsError> {
        Ok(Self {
            device: Device::from_bytes(rom).map_err(js_error)?,
            audio: None,
            rgba: Vec::with_capacity(WIDTH * HEIGHT * 4),
        })
    }

    pub fn reset(&mut self) -> Result<(), JsError> {
        self.device.reset().map_err(js_error)
    }

    /// Execute one CPU step; returns the cycles consumed
    pub fn step(&mut self) -> Result<u32, JsError> {
        self.device.step().map_err(js_error)
    }

    pub fn step_frame(&mut self) -> Result<u32, JsError> {
        self.device.step_frame().map_err(js_error)
    }

    pub fn step_seconds(&mut self, seconds: f64) -> Result<(), JsError> {
        self.device.step_seconds(seconds).map_err(js_error)
    }

    /// Button vector for `port` (0 or 1): bit 0 = A ... bit 7 = Right
    pub fn set_buttons(&mut self, port: usize, buttons: u8) {
        self.device.set_buttons(port, buttons);
    }

    /// Last completed frame as 256x240 RGBA bytes
    pub fn framebuffer_rgba(&mut self) -> Uint8Array {
        to_rgba(self.device.buffer(), &mut self.rgba);
        Uint8Array::from(self.rgba.as_slice())
    }

    #[wasm_bindgen(getter)]
    pub fn width(&self) -> usize {
        WIDTH
    }

    #[wasm_bindgen(getter)]
    pub fn height(&self) -> usize {
        HEIGHT
    }

    /// Universal background colour as 0xRRGGBB
    pub fn background_color(&self) -> u32 {
        self.device.background_color()
    }

    /// Start producing samples at `sample_rate`; 0 stops audio
    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        if sample_rate <= 0.0 {
            self.device.set_audio_sample_rate(0.0);
            self.audio = None;
            return;
        }
        // One second of headroom; samples beyond that are dropped
        let (sender, receiver) = channel::bounded(sample_rate as usize);
        self.device.set_audio(AudioConfig::new(sample_rate), sender);
        self.audio = Some(receiver);
    }

    /// Samples produced since the last call
    pub fn take_audio(&mut self) -> Float32Array {
        let samples: Vec<f32> = match &self.audio {
            Some(receiver) => receiver.try_iter().collect(),
            None => Vec::new(),
        };
        Float32Array::from(samples.as_slice())
    }

    pub fn save_state(&self) -> Result<Vec<u8>, JsError> {
        let mut state = Vec::new();
        self.device.save(&mut state).map_err(js_error)?;
        Ok(state)
    }

    pub fn load_state(&mut self, state: &[u8]) -> Result<(), JsError> {
        let mut reader = state;
        self.device.load(&mut reader).map_err(js_error)
    }

    #[wasm_bindgen(getter)]
    pub fn frame(&self) -> f64 {
        self.device.ppu().frame() as f64
    }

    #[wasm_bindgen(getter)]
    pub fn cpu_cycles(&self) -> f64 {
        self.device.cpu().cycles() as f64
    }

    #[wasm_bindgen(getter)]
    pub fn mapper(&self) -> String {
        self.device.mapper().name().to_string()
    }
}

#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba_layout() {
        let mut out = Vec::new();
        to_rgba(&[0x00123456, 0x00FF0000], &mut out);
        assert_eq!(out, vec![0x12, 0x34, 0x56, 0xFF, 0xFF, 0x00, 0x00, 0xFF]);
    }
}
