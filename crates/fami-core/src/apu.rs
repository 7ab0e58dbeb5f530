//! APU (Audio Processing Unit) implementation
//!
//! The NES APU has five channels:
//! - Pulse 1 and Pulse 2 (square waves with envelope and sweep)
//! - Triangle (32-step waveform gated by a linear counter)
//! - Noise (15-bit LFSR)
//! - DMC (1-bit delta modulation of samples fetched from CPU memory)
//!
//! [`Apu::step`] runs once per CPU cycle. The frame sequencer fires at
//! 240 Hz and clocks envelopes, sweeps and length counters. Mixed samples go
//! through the output [`FilterChain`] and are handed to the host over a
//! bounded crossbeam channel at the configured sample rate.

use bincode::{Decode, Encode};
use crossbeam::channel::{Sender, TrySendError};
use tracing::{debug, warn};

use crate::cpu::{Bus, CPU_FREQUENCY};
use crate::filter::{Filter, FilterChain};
use crate::state::{ensure, StateError};

/// Frame sequencer clock in CPU cycles
const FRAME_COUNTER_RATE: f64 = CPU_FREQUENCY as f64 / 240.0;

/// CPU cycles the DMC steals for each sample byte
pub const DMC_STALL_CYCLES: u32 = 1;

#[rustfmt::skip]
const LENGTH_TABLE: [u8; 32] = [
    10, 254, 20, 2, 40, 4, 80, 6, 160, 8, 60, 10, 14, 12, 26, 14,
    12, 16, 24, 18, 48, 20, 96, 22, 192, 24, 72, 26, 16, 28, 32, 30,
];

const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 1, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 0, 0, 0, 0, 0],
    [0, 1, 1, 1, 1, 0, 0, 0],
    [1, 0, 0, 1, 1, 1, 1, 1],
];

#[rustfmt::skip]
const TRIANGLE_TABLE: [u8; 32] = [
    15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0,
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15,
];

const NOISE_TABLE: [u16; 16] = [
    4, 8, 16, 32, 64, 96, 128, 160, 202, 254, 380, 508, 762, 1016, 2034, 4068,
];

const DMC_TABLE: [u8; 16] = [
    214, 190, 170, 160, 143, 127, 113, 107, 95, 80, 71, 64, 53, 42, 36, 27,
];

/// What the sink does when the host is not draining samples fast enough
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backpressure {
    /// Discard the sample
    #[default]
    Drop,
    /// Wait for room in the channel
    Block,
}

/// Host audio settings
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioConfig {
    /// Host sample rate in Hz; zero disables audio
    pub sample_rate: f64,
    pub backpressure: Backpressure,
}

impl AudioConfig {
    pub fn new(sample_rate: f64) -> Self {
        Self { sample_rate, backpressure: Backpressure::Drop }
    }
}

/// Result of one APU cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApuTick {
    /// Frame counter or DMC interrupt
    pub irq: bool,
    /// CPU cycles stolen by DMC sample fetches
    pub stall: u32,
}

/// Envelope generator shared by the pulse and noise channels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
struct Envelope {
    enabled: bool,
    looping: bool,
    start: bool,
    period: u8,
    value: u8,
    volume: u8,
    constant_volume: u8,
}

impl Envelope {
    /// Bits 0-5 of $4000/$4004/$400C
    fn write_control(&mut self, value: u8) {
        self.looping = (value >> 5) & 1 == 1;
        self.enabled = (value >> 4) & 1 == 0;
        self.period = value & 0x0F;
        self.constant_volume = value & 0x0F;
        self.start = true;
    }

    fn step(&mut self) {
        if self.start {
            self.volume = 15;
            self.value = self.period;
            self.start = false;
        } else if self.value > 0 {
            self.value -= 1;
        } else {
            if self.volume > 0 {
                self.volume -= 1;
            } else if self.looping {
                self.volume = 15;
            }
            self.value = self.period;
        }
    }

    fn output(&self) -> u8 {
        if self.enabled {
            self.volume
        } else {
            self.constant_volume
        }
    }
}

/// Pulse channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct Pulse {
    enabled: bool,
    /// 1 or 2; selects the sweep negate behaviour
    channel: u8,
    length_enabled: bool,
    length_value: u8,
    timer_period: u16,
    timer_value: u16,
    duty_mode: u8,
    duty_value: u8,
    sweep_reload: bool,
    sweep_enabled: bool,
    sweep_negate: bool,
    sweep_shift: u8,
    sweep_period: u8,
    sweep_value: u8,
    envelope: Envelope,
}

impl Pulse {
    fn new(channel: u8) -> Self {
        Self { channel, ..Self::default() }
    }

    fn write_control(&mut self, value: u8) {
        self.duty_mode = (value >> 6) & 3;
        self.length_enabled = (value >> 5) & 1 == 0;
        self.envelope.write_control(value);
    }

    fn write_sweep(&mut self, value: u8) {
        self.sweep_enabled = (value >> 7) & 1 == 1;
        self.sweep_period = ((value >> 4) & 7) + 1;
        self.sweep_negate = (value >> 3) & 1 == 1;
        self.sweep_shift = value & 7;
        self.sweep_reload = true;
    }

    fn write_timer_low(&mut self, value: u8) {
        self.timer_period = (self.timer_period & 0xFF00) | value as u16;
    }

    fn write_timer_high(&mut self, value: u8) {
        self.length_value = LENGTH_TABLE[(value >> 3) as usize];
        self.timer_period = (self.timer_period & 0x00FF) | ((value as u16 & 7) << 8);
        self.envelope.start = true;
        self.duty_value = 0;
    }

    fn step_timer(&mut self) {
        if self.timer_value == 0 {
            self.timer_value = self.timer_period;
            self.duty_value = (self.duty_value + 1) % 8;
        } else {
            self.timer_value -= 1;
        }
    }

    fn step_length(&mut self) {
        if self.length_enabled && self.length_value > 0 {
            self.length_value -= 1;
        }
    }

    fn step_sweep(&mut self) {
        if self.sweep_reload {
            if self.sweep_enabled && self.sweep_value == 0 {
                self.sweep();
            }
            self.sweep_value = self.sweep_period;
            self.sweep_reload = false;
        } else if self.sweep_value > 0 {
            self.sweep_value -= 1;
        } else {
            if self.sweep_enabled {
                self.sweep();
            }
            self.sweep_value = self.sweep_period;
        }
    }

    fn sweep(&mut self) {
        let delta = self.timer_period >> self.sweep_shift;
        if self.sweep_negate {
            self.timer_period = self.timer_period.wrapping_sub(delta);
            // Pulse 1 negates with one's complement
            if self.channel == 1 {
                self.timer_period = self.timer_period.wrapping_sub(1);
            }
        } else {
            self.timer_period = self.timer_period.wrapping_add(delta);
        }
    }

    fn validate(&self) -> Result<(), StateError> {
        ensure(self.duty_mode < 4, "pulse duty mode")?;
        ensure(self.duty_value < 8, "pulse duty step")?;
        ensure(self.sweep_shift < 8, "pulse sweep shift")
    }

    fn output(&self) -> u8 {
        if !self.enabled || self.length_value == 0 {
            return 0;
        }
        if DUTY_TABLE[self.duty_mode as usize][self.duty_value as usize] == 0 {
            return 0;
        }
        if self.timer_period < 8 || self.timer_period > 0x7FF {
            return 0;
        }
        self.envelope.output()
    }
}

/// Triangle channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct Triangle {
    enabled: bool,
    length_enabled: bool,
    length_value: u8,
    timer_period: u16,
    timer_value: u16,
    duty_value: u8,
    counter_period: u8,
    counter_value: u8,
    counter_reload: bool,
}

impl Triangle {
    fn write_control(&mut self, value: u8) {
        self.length_enabled = (value >> 7) & 1 == 0;
        self.counter_period = value & 0x7F;
    }

    fn write_timer_low(&mut self, value: u8) {
        self.timer_period = (self.timer_period & 0xFF00) | value as u16;
    }

    fn write_timer_high(&mut self, value: u8) {
        self.length_value = LENGTH_TABLE[(value >> 3) as usize];
        self.timer_period = (self.timer_period & 0x00FF) | ((value as u16 & 7) << 8);
        self.timer_value = self.timer_period;
        self.counter_reload = true;
    }

    fn step_timer(&mut self) {
        if self.timer_value == 0 {
            self.timer_value = self.timer_period;
            if self.length_value > 0 && self.counter_value > 0 {
                self.duty_value = (self.duty_value + 1) % 32;
            }
        } else {
            self.timer_value -= 1;
        }
    }

    fn step_length(&mut self) {
        if self.length_enabled && self.length_value > 0 {
            self.length_value -= 1;
        }
    }

    fn step_counter(&mut self) {
        if self.counter_reload {
            self.counter_value = self.counter_period;
        } else if self.counter_value > 0 {
            self.counter_value -= 1;
        }
        if self.length_enabled {
            self.counter_reload = false;
        }
    }

    fn output(&self) -> u8 {
        // Ultrasonic periods are muted rather than aliased
        if !self.enabled || self.timer_period < 3 {
            return 0;
        }
        if self.length_value == 0 || self.counter_value == 0 {
            return 0;
        }
        TRIANGLE_TABLE[self.duty_value as usize]
    }
}

/// Noise channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct Noise {
    enabled: bool,
    /// Short mode: feedback from bit 6 instead of bit 1
    mode: bool,
    shift_register: u16,
    length_enabled: bool,
    length_value: u8,
    timer_period: u16,
    timer_value: u16,
    envelope: Envelope,
}

impl Default for Noise {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: false,
            shift_register: 1,
            length_enabled: false,
            length_value: 0,
            timer_period: 0,
            timer_value: 0,
            envelope: Envelope::default(),
        }
    }
}

impl Noise {
    fn write_control(&mut self, value: u8) {
        self.length_enabled = (value >> 5) & 1 == 0;
        self.envelope.write_control(value);
    }

    fn write_period(&mut self, value: u8) {
        self.mode = value & 0x80 == 0x80;
        self.timer_period = NOISE_TABLE[(value & 0x0F) as usize];
    }

    fn write_length(&mut self, value: u8) {
        self.length_value = LENGTH_TABLE[(value >> 3) as usize];
        self.envelope.start = true;
    }

    fn step_timer(&mut self) {
        if self.timer_value == 0 {
            self.timer_value = self.timer_period;
            let shift = if self.mode { 6 } else { 1 };
            let b1 = self.shift_register & 1;
            let b2 = (self.shift_register >> shift) & 1;
            self.shift_register >>= 1;
            self.shift_register |= (b1 ^ b2) << 14;
        } else {
            self.timer_value -= 1;
        }
    }

    fn step_length(&mut self) {
        if self.length_enabled && self.length_value > 0 {
            self.length_value -= 1;
        }
    }

    fn output(&self) -> u8 {
        if !self.enabled || self.length_value == 0 || self.shift_register & 1 == 1 {
            return 0;
        }
        self.envelope.output()
    }
}

/// Delta modulation channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct Dmc {
    enabled: bool,
    /// 7-bit output level
    value: u8,
    sample_address: u16,
    sample_length: u16,
    current_address: u16,
    current_length: u16,
    shift_register: u8,
    bit_count: u8,
    tick_period: u8,
    tick_value: u8,
    looping: bool,
    irq: bool,
}

impl Dmc {
    fn write_control(&mut self, value: u8) {
        self.irq = value & 0x80 == 0x80;
        self.looping = value & 0x40 == 0x40;
        self.tick_period = DMC_TABLE[(value & 0x0F) as usize];
    }

    fn write_value(&mut self, value: u8) {
        self.value = value & 0x7F;
    }

    fn write_address(&mut self, value: u8) {
        // $C000 + A*64
        self.sample_address = 0xC000 | ((value as u16) << 6);
    }

    fn write_length(&mut self, value: u8) {
        // L*16 + 1 bytes
        self.sample_length = ((value as u16) << 4) | 1;
    }

    fn restart(&mut self) {
        self.current_address = self.sample_address;
        self.current_length = self.sample_length;
    }

    /// One CPU cycle of the sample reader and output unit
    fn step_timer(&mut self, bus: &mut impl Bus, tick: &mut ApuTick) {
        if !self.enabled {
            return;
        }
        self.step_reader(bus, tick);
        if self.tick_value == 0 {
            self.tick_value = self.tick_period;
            self.step_shifter();
        } else {
            self.tick_value -= 1;
        }
    }

    fn step_reader(&mut self, bus: &mut impl Bus, tick: &mut ApuTick) {
        if self.current_length == 0 || self.bit_count != 0 {
            return;
        }
        tick.stall += DMC_STALL_CYCLES;
        self.shift_register = bus.read(self.current_address);
        self.bit_count = 8;
        self.current_address = self.current_address.wrapping_add(1);
        if self.current_address == 0 {
            self.current_address = 0x8000;
        }
        self.current_length -= 1;
        if self.current_length == 0 {
            if self.looping {
                self.restart();
            } else if self.irq {
                tick.irq = true;
            }
        }
    }

    fn step_shifter(&mut self) {
        if self.bit_count == 0 {
            return;
        }
        if self.shift_register & 1 == 1 {
            if self.value <= 125 {
                self.value += 2;
            }
        } else if self.value >= 2 {
            self.value -= 2;
        }
        self.shift_register >>= 1;
        self.bit_count -= 1;
    }

    fn output(&self) -> u8 {
        self.value
    }
}

/// Everything in the APU that belongs in a save-state
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ApuState {
    cycle: u64,
    /// 4 or 5 step sequence
    frame_period: u8,
    frame_value: u8,
    frame_irq: bool,
    pulse1: Pulse,
    pulse2: Pulse,
    triangle: Triangle,
    noise: Noise,
    dmc: Dmc,
}

impl Default for ApuState {
    fn default() -> Self {
        Self {
            cycle: 0,
            frame_period: 4,
            frame_value: 0,
            frame_irq: false,
            pulse1: Pulse::new(1),
            pulse2: Pulse::new(2),
            triangle: Triangle::default(),
            noise: Noise::default(),
            dmc: Dmc::default(),
        }
    }
}

impl ApuState {
    /// Check a decoded state before it replaces the live one
    pub fn validate(&self) -> Result<(), StateError> {
        ensure(matches!(self.frame_period, 4 | 5), "frame counter period")?;
        ensure(self.frame_value < 5, "frame counter step")?;
        self.pulse1.validate()?;
        self.pulse2.validate()?;
        ensure(self.triangle.duty_value < 32, "triangle step")
    }
}

/// Host end of the sample stream
#[derive(Debug)]
struct AudioSink {
    sender: Sender<f32>,
    backpressure: Backpressure,
    /// CPU cycles per output sample
    cycles_per_sample: f64,
}

/// APU state
#[derive(Debug, Default)]
pub struct Apu {
    state: ApuState,
    filters: FilterChain,
    sink: Option<AudioSink>,
}

impl Apu {
    /// Create a new APU instance with audio output disabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot for save-states
    pub fn state(&self) -> &ApuState {
        &self.state
    }

    pub fn restore(&mut self, state: ApuState) {
        self.state = state;
    }

    /// Total CPU cycles stepped
    pub fn cycle(&self) -> u64 {
        self.state.cycle
    }

    /// Route samples to `sender`. A zero sample rate removes the sink and
    /// empties the filter chain.
    pub fn set_audio(&mut self, config: AudioConfig, sender: Sender<f32>) {
        if config.sample_rate > 0.0 {
            self.filters = FilterChain::nes(config.sample_rate as f32);
            self.sink = Some(AudioSink {
                sender,
                backpressure: config.backpressure,
                cycles_per_sample: CPU_FREQUENCY as f64 / config.sample_rate,
            });
        } else {
            self.filters = FilterChain::default();
            self.sink = None;
        }
    }

    /// Change the sample rate of an installed sink
    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        if sample_rate <= 0.0 {
            self.filters = FilterChain::default();
            self.sink = None;
            return;
        }
        self.filters = FilterChain::nes(sample_rate as f32);
        if let Some(sink) = self.sink.as_mut() {
            sink.cycles_per_sample = CPU_FREQUENCY as f64 / sample_rate;
        }
    }

    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    /// Advance one CPU cycle. `bus` serves DMC sample fetches.
    pub fn step(&mut self, bus: &mut impl Bus) -> ApuTick {
        let mut tick = ApuTick::default();
        let cycle1 = self.state.cycle;
        self.state.cycle += 1;
        let cycle2 = self.state.cycle;

        self.step_timers(bus, &mut tick);

        let f1 = (cycle1 as f64 / FRAME_COUNTER_RATE) as u64;
        let f2 = (cycle2 as f64 / FRAME_COUNTER_RATE) as u64;
        if f1 != f2 && self.step_frame_counter() {
            tick.irq = true;
        }

        if let Some(cycles_per_sample) = self.sink.as_ref().map(|sink| sink.cycles_per_sample) {
            let s1 = (cycle1 as f64 / cycles_per_sample) as u64;
            let s2 = (cycle2 as f64 / cycles_per_sample) as u64;
            if s1 != s2 {
                self.send_sample();
            }
        }
        tick
    }

    fn send_sample(&mut self) {
        let mixed = self.output();
        let sample = self.filters.step(mixed);
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        let disconnected = match sink.backpressure {
            Backpressure::Drop => matches!(sink.sender.try_send(sample), Err(TrySendError::Disconnected(_))),
            Backpressure::Block => sink.sender.send(sample).is_err(),
        };
        if disconnected {
            warn!("audio receiver disconnected, disabling sample output");
            self.sink = None;
        }
    }

    /// Mixed output of all channels, 0.0 to about 1.0
    pub fn output(&self) -> f32 {
        let s = &self.state;
        let p1 = s.pulse1.output() as f32;
        let p2 = s.pulse2.output() as f32;
        let t = s.triangle.output() as f32;
        let n = s.noise.output() as f32;
        let d = s.dmc.output() as f32;
        mix(p1 + p2, 3.0 * t + 2.0 * n + d)
    }

    fn step_timers(&mut self, bus: &mut impl Bus, tick: &mut ApuTick) {
        let s = &mut self.state;
        if s.cycle % 2 == 0 {
            s.pulse1.step_timer();
            s.pulse2.step_timer();
            s.noise.step_timer();
            s.dmc.step_timer(bus, tick);
        }
        s.triangle.step_timer();
    }

    /// Returns true when the sequence raises the frame IRQ
    fn step_frame_counter(&mut self) -> bool {
        match self.state.frame_period {
            4 => {
                self.state.frame_value = (self.state.frame_value + 1) % 4;
                match self.state.frame_value {
                    0 | 2 => self.step_envelope(),
                    1 => self.step_half_frame(),
                    _ => {
                        self.step_half_frame();
                        return self.state.frame_irq;
                    }
                }
            }
            _ => {
                self.state.frame_value = (self.state.frame_value + 1) % 5;
                match self.state.frame_value {
                    0 | 2 => self.step_envelope(),
                    1 | 3 => self.step_half_frame(),
                    _ => {}
                }
            }
        }
        false
    }

    fn step_half_frame(&mut self) {
        self.step_envelope();
        self.step_sweep();
        self.step_length();
    }

    fn step_envelope(&mut self) {
        let s = &mut self.state;
        s.pulse1.envelope.step();
        s.pulse2.envelope.step();
        s.triangle.step_counter();
        s.noise.envelope.step();
    }

    fn step_sweep(&mut self) {
        self.state.pulse1.step_sweep();
        self.state.pulse2.step_sweep();
    }

    fn step_length(&mut self) {
        let s = &mut self.state;
        s.pulse1.step_length();
        s.pulse2.step_length();
        s.triangle.step_length();
        s.noise.step_length();
    }

    /// $4015 status read
    pub fn read_register(&mut self, address: u16) -> u8 {
        match address {
            0x4015 => self.read_status(),
            _ => 0,
        }
    }

    fn read_status(&self) -> u8 {
        let s = &self.state;
        let mut result = 0;
        if s.pulse1.length_value > 0 {
            result |= 0x01;
        }
        if s.pulse2.length_value > 0 {
            result |= 0x02;
        }
        if s.triangle.length_value > 0 {
            result |= 0x04;
        }
        if s.noise.length_value > 0 {
            result |= 0x08;
        }
        if s.dmc.current_length > 0 {
            result |= 0x10;
        }
        result
    }

    /// Write to an APU register ($4000-$4013, $4015, $4017)
    pub fn write_register(&mut self, address: u16, value: u8) {
        let s = &mut self.state;
        match address {
            0x4000 => s.pulse1.write_control(value),
            0x4001 => s.pulse1.write_sweep(value),
            0x4002 => s.pulse1.write_timer_low(value),
            0x4003 => s.pulse1.write_timer_high(value),
            0x4004 => s.pulse2.write_control(value),
            0x4005 => s.pulse2.write_sweep(value),
            0x4006 => s.pulse2.write_timer_low(value),
            0x4007 => s.pulse2.write_timer_high(value),
            0x4008 => s.triangle.write_control(value),
            0x400A => s.triangle.write_timer_low(value),
            0x400B => s.triangle.write_timer_high(value),
            0x400C => s.noise.write_control(value),
            0x400E => s.noise.write_period(value),
            0x400F => s.noise.write_length(value),
            0x4010 => s.dmc.write_control(value),
            0x4011 => s.dmc.write_value(value),
            0x4012 => s.dmc.write_address(value),
            0x4013 => s.dmc.write_length(value),
            0x4015 => self.write_control(value),
            0x4017 => self.write_frame_counter(value),
            _ => {}
        }
    }

    fn write_control(&mut self, value: u8) {
        let s = &mut self.state;
        s.pulse1.enabled = value & 0x01 != 0;
        s.pulse2.enabled = value & 0x02 != 0;
        s.triangle.enabled = value & 0x04 != 0;
        s.noise.enabled = value & 0x08 != 0;
        s.dmc.enabled = value & 0x10 != 0;
        if !s.pulse1.enabled {
            s.pulse1.length_value = 0;
        }
        if !s.pulse2.enabled {
            s.pulse2.length_value = 0;
        }
        if !s.triangle.enabled {
            s.triangle.length_value = 0;
        }
        if !s.noise.enabled {
            s.noise.length_value = 0;
        }
        if !s.dmc.enabled {
            s.dmc.current_length = 0;
        } else if s.dmc.current_length == 0 {
            s.dmc.restart();
        }
    }

    fn write_frame_counter(&mut self, value: u8) {
        self.state.frame_period = 4 + ((value >> 7) & 1);
        self.state.frame_irq = (value >> 6) & 1 == 0;
        debug!(steps = self.state.frame_period, irq = self.state.frame_irq, "frame counter mode");
        if self.state.frame_period == 5 {
            self.step_half_frame();
        }
    }
}

/// Non-linear mixer: pulse sum 0-30, tnd sum 0-202
fn mix(pulse: f32, tnd: f32) -> f32 {
    let pulse_out = if pulse == 0.0 { 0.0 } else { 95.52 / (8128.0 / pulse + 100.0) };
    let tnd_out = if tnd == 0.0 { 0.0 } else { 163.67 / (24329.0 / tnd + 100.0) };
    pulse_out + tnd_out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::bounded;

    struct SampleBus;

    impl Bus for SampleBus {
        fn read(&mut self, address: u16) -> u8 {
            (address & 0xFF) as u8
        }

        fn write(&mut self, _address: u16, _value: u8) {}
    }

    #[test]
    fn test_status_reports_length_counters() {
        let mut apu = Apu::new();
        apu.write_register(0x4015, 0x0F);
        apu.write_register(0x4003, 0x08);
        apu.write_register(0x400F, 0x08);
        assert_eq!(apu.read_register(0x4015), 0x09);

        apu.write_register(0x4015, 0x00);
        assert_eq!(apu.read_register(0x4015), 0x00);
    }

    #[test]
    fn test_disable_clears_length() {
        let mut apu = Apu::new();
        apu.write_register(0x4003, 0x08);
        assert_eq!(apu.state.pulse1.length_value, LENGTH_TABLE[1]);
        apu.write_register(0x4015, 0x00);
        assert_eq!(apu.read_register(0x4015) & 0x01, 0);
    }

    #[test]
    fn test_five_step_write_clocks_immediately() {
        let mut apu = Apu::new();
        apu.write_register(0x4015, 0x01);
        // Length counter halt off, length index 1 = 254
        apu.write_register(0x4000, 0x00);
        apu.write_register(0x4003, 0x08);
        apu.write_register(0x4017, 0x80);
        assert_eq!(apu.state.frame_period, 5);
        assert_eq!(apu.state.pulse1.length_value, 253);
    }

    #[test]
    fn test_frame_irq_in_four_step_mode() {
        let mut apu = Apu::new();
        let mut bus = SampleBus;
        apu.write_register(0x4017, 0x00);
        let quarter = FRAME_COUNTER_RATE.ceil() as usize;
        let irq = (0..quarter * 4).any(|_| apu.step(&mut bus).irq);
        assert!(irq);
    }

    #[test]
    fn test_frame_irq_inhibited() {
        let mut apu = Apu::new();
        let mut bus = SampleBus;
        apu.write_register(0x4017, 0x40);
        let quarter = FRAME_COUNTER_RATE.ceil() as usize;
        assert!(!(0..quarter * 8).any(|_| apu.step(&mut bus).irq));
    }

    #[test]
    fn test_pulse1_sweep_negate_is_ones_complement() {
        let mut pulse1 = Pulse::new(1);
        let mut pulse2 = Pulse::new(2);
        for pulse in [&mut pulse1, &mut pulse2] {
            pulse.timer_period = 0x100;
            pulse.sweep_negate = true;
            pulse.sweep_shift = 1;
            pulse.sweep();
        }
        assert_eq!(pulse1.timer_period, 0x7F);
        assert_eq!(pulse2.timer_period, 0x80);
    }

    #[test]
    fn test_noise_lfsr_feedback() {
        let mut noise = Noise::default();
        noise.step_timer();
        // bit0 ^ bit1 of 1 is 1, fed into bit 14
        assert_eq!(noise.shift_register, 0x4000);
    }

    #[test]
    fn test_dmc_fetch_stalls_and_raises_irq() {
        let mut apu = Apu::new();
        let mut bus = SampleBus;
        apu.write_register(0x4010, 0x80);
        apu.write_register(0x4012, 0x00);
        apu.write_register(0x4013, 0x00);
        apu.write_register(0x4015, 0x10);
        assert_eq!(apu.read_register(0x4015) & 0x10, 0x10);

        let mut stall = 0;
        let mut irq = false;
        for _ in 0..4 {
            let tick = apu.step(&mut bus);
            stall += tick.stall;
            irq |= tick.irq;
        }
        assert_eq!(stall, 1);
        assert!(irq);
        assert_eq!(apu.read_register(0x4015) & 0x10, 0);
    }

    #[test]
    fn test_mixer_silence_and_peak() {
        assert_eq!(mix(0.0, 0.0), 0.0);
        let peak = mix(30.0, 202.0);
        assert!(peak > 0.9 && peak < 1.1, "peak {peak}");
    }

    #[test]
    fn test_samples_delivered_at_rate() {
        let mut apu = Apu::new();
        let mut bus = SampleBus;
        let (sender, receiver) = bounded(8192);
        apu.set_audio(AudioConfig::new(44_100.0), sender);
        for _ in 0..CPU_FREQUENCY / 10 {
            apu.step(&mut bus);
        }
        let count = receiver.try_iter().count();
        assert!((4409..=4411).contains(&count), "got {count} samples");
    }

    #[test]
    fn test_zero_rate_disables_audio() {
        let mut apu = Apu::new();
        let (sender, receiver) = bounded(16);
        apu.set_audio(AudioConfig::new(0.0), sender);
        assert!(apu.filters().is_empty());
        let mut bus = SampleBus;
        for _ in 0..10_000 {
            apu.step(&mut bus);
        }
        assert!(receiver.try_recv().is_err());
    }
    #[test]
    fn test_validate_rejects_out_of_range_steps() {
        let mut apu = Apu::new();
        apu.write_register(0x4000, 0xC0);
        assert!(apu.state().validate().is_ok());

        let mut state = apu.state().clone();
        state.pulse1.duty_value = 0xFF;
        assert!(matches!(state.validate(), Err(StateError::Invalid(_))));

        let mut state = apu.state().clone();
        state.triangle.duty_value = 32;
        assert!(state.validate().is_err());

        let mut state = apu.state().clone();
        state.frame_period = 0;
        assert!(state.validate().is_err());
    }
}
