//! PPU (Picture Processing Unit) implementation
//!
//! Dot-stepped 2C02. Each call to [`Ppu::step`] advances one dot of the
//! 341x262 NTSC frame:
//! - scanlines 0-239 render, 240 is idle, 241-260 are vertical blank and
//!   261 is the pre-render line
//! - background tiles are fetched every 8 dots into a 64-bit shift register
//!   two tiles ahead of the pixel being drawn
//! - sprites for the next line are evaluated at dot 257
//!
//! Pixels are written to a back buffer that is swapped with the front
//! buffer when the pre-render line wraps to scanline 0.

use bincode::{Decode, Encode};

use crate::bus::{nametable_index, Mirroring};
use crate::mapper::PpuTiming;
use crate::palette;
use crate::state::{ensure, StateError};

/// Visible frame width in pixels
pub const WIDTH: usize = 256;
/// Visible frame height in pixels
pub const HEIGHT: usize = 240;

pub const DOTS_PER_SCANLINE: u16 = 341;
pub const SCANLINES_PER_FRAME: u16 = 262;

pub const NAMETABLE_SIZE: usize = 2048;
pub const PALETTE_SIZE: usize = 32;  // 32 bytes (8 palettes x 4 colors each)
pub const OAM_SIZE: usize = 256;     // Object Attribute Memory

const VBLANK_SCANLINE: u16 = 241;
const PRE_RENDER_SCANLINE: u16 = 261;

/// Dots between the NMI edge and the CPU seeing it
const NMI_DELAY: u8 = 15;

/// Pattern table and nametable mirroring as seen from the PPU
pub trait PpuBus {
    /// Read pattern table memory ($0000-$1FFF)
    fn read_pattern(&mut self, address: u16) -> u8;
    /// Write pattern table memory ($0000-$1FFF)
    fn write_pattern(&mut self, address: u16, value: u8);
    /// Current nametable mirroring
    fn mirroring(&self) -> Mirroring;
}

/// PPU control flags ($2000)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct PpuCtrl(u8);

impl PpuCtrl {
    pub const NMI_ENABLE: u8 = 0b1000_0000;
    pub const MASTER_SLAVE: u8 = 0b0100_0000;
    pub const SPRITE_SIZE: u8 = 0b0010_0000;
    pub const BG_PATTERN_TABLE: u8 = 0b0001_0000;
    pub const SPR_PATTERN_TABLE: u8 = 0b0000_1000;
    pub const VRAM_INC: u8 = 0b0000_0100;
    pub const NAMETABLE: u8 = 0b0000_0011;

    pub fn new(val: u8) -> Self {
        Self(val)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn nmi_enable(&self) -> bool {
        (self.0 & Self::NMI_ENABLE) != 0
    }

    /// 8x16 sprites
    pub fn sprite_size(&self) -> bool {
        (self.0 & Self::SPRITE_SIZE) != 0
    }

    pub fn background_table(&self) -> u16 {
        if self.0 & Self::BG_PATTERN_TABLE != 0 { 0x1000 } else { 0 }
    }

    pub fn sprite_table(&self) -> u16 {
        if self.0 & Self::SPR_PATTERN_TABLE != 0 { 0x1000 } else { 0 }
    }

    /// VRAM address step after a $2007 access
    pub fn increment(&self) -> u16 {
        if self.0 & Self::VRAM_INC != 0 { 32 } else { 1 }
    }

    pub fn nametable(&self) -> u8 {
        self.0 & Self::NAMETABLE
    }
}

/// PPU status flags ($2002)
#[derive(Debug, Clone, Copy)]
pub struct PpuStatus;

impl PpuStatus {
    pub const VBLANK: u8 = 0b1000_0000;
    pub const SPRITE_ZERO_HIT: u8 = 0b0100_0000;
    pub const SPRITE_OVERFLOW: u8 = 0b0010_0000;
}

/// PPU render mask flags ($2001)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct PpuMask(u8);

impl PpuMask {
    pub const BLUE_TINT: u8 = 0b1000_0000;
    pub const GREEN_TINT: u8 = 0b0100_0000;
    pub const RED_TINT: u8 = 0b0010_0000;
    pub const RENDER_SPRITES: u8 = 0b0001_0000;
    pub const RENDER_BG: u8 = 0b0000_1000;
    pub const LEFT_SPRITES: u8 = 0b0000_0100;
    pub const LEFT_BG: u8 = 0b0000_0010;
    pub const GRAYSCALE: u8 = 0b0000_0001;

    pub fn new(val: u8) -> Self {
        Self(val)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn show_background(&self) -> bool {
        self.0 & Self::RENDER_BG != 0
    }

    pub fn show_sprites(&self) -> bool {
        self.0 & Self::RENDER_SPRITES != 0
    }

    pub fn show_left_background(&self) -> bool {
        self.0 & Self::LEFT_BG != 0
    }

    pub fn show_left_sprites(&self) -> bool {
        self.0 & Self::LEFT_SPRITES != 0
    }

    pub fn rendering(&self) -> bool {
        self.show_background() || self.show_sprites()
    }
}

/// Sprites selected for the scanline being drawn
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
struct SpriteLine {
    count: usize,
    patterns: [u32; 8],
    positions: [u8; 8],
    /// 1 = behind background
    priorities: [u8; 8],
    /// OAM index, 0 tracks sprite-zero hits
    indexes: [u8; 8],
}

/// PPU state
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Ppu {
    cycle: u16,
    scanline: u16,
    frame: u64,

    palette: [u8; PALETTE_SIZE],
    nametable: [u8; NAMETABLE_SIZE],
    oam: [u8; OAM_SIZE],
    front: Vec<u32>,
    back: Vec<u32>,

    /// Current VRAM address (15 bit)
    v: u16,
    /// Temporary VRAM address (15 bit)
    t: u16,
    /// Fine X scroll (3 bit)
    x: u8,
    /// Write toggle shared by $2005/$2006
    w: bool,
    /// Odd frame flag
    odd_frame: bool,

    /// Last value written to any register, visible in $2002's low bits
    register: u8,

    nmi_occurred: bool,
    nmi_output: bool,
    nmi_previous: bool,
    nmi_delay: u8,

    // Background fetch pipeline
    nametable_byte: u8,
    attribute_byte: u8,
    low_tile_byte: u8,
    high_tile_byte: u8,
    tile_data: u64,

    sprites: SpriteLine,

    ctrl: PpuCtrl,
    mask: PpuMask,
    sprite_zero_hit: bool,
    sprite_overflow: bool,
    oam_address: u8,
    /// $2007 read-ahead buffer
    buffered_data: u8,
}

impl Ppu {
    /// Create a new PPU in its reset state
    pub fn new() -> Self {
        let mut ppu = Self {
            cycle: 0,
            scanline: 0,
            frame: 0,
            palette: [0; PALETTE_SIZE],
            nametable: [0; NAMETABLE_SIZE],
            oam: [0; OAM_SIZE],
            front: vec![0; WIDTH * HEIGHT],
            back: vec![0; WIDTH * HEIGHT],
            v: 0,
            t: 0,
            x: 0,
            w: false,
            odd_frame: false,
            register: 0,
            nmi_occurred: false,
            nmi_output: false,
            nmi_previous: false,
            nmi_delay: 0,
            nametable_byte: 0,
            attribute_byte: 0,
            low_tile_byte: 0,
            high_tile_byte: 0,
            tile_data: 0,
            sprites: SpriteLine::default(),
            ctrl: PpuCtrl::default(),
            mask: PpuMask::default(),
            sprite_zero_hit: false,
            sprite_overflow: false,
            oam_address: 0,
            buffered_data: 0,
        };
        ppu.reset();
        ppu
    }

    /// Reset to the last dot of the post-render line
    pub fn reset(&mut self) {
        self.cycle = 340;
        self.scanline = 240;
        self.frame = 0;
        self.write_control(0);
        self.mask = PpuMask::new(0);
        self.oam_address = 0;
    }

    /// Check a decoded state before it replaces the live one
    pub fn validate(&self) -> Result<(), StateError> {
        ensure(self.front.len() == WIDTH * HEIGHT, "front buffer size")?;
        ensure(self.back.len() == WIDTH * HEIGHT, "back buffer size")?;
        ensure(self.cycle < DOTS_PER_SCANLINE, "PPU dot")?;
        ensure(self.scanline < SCANLINES_PER_FRAME, "PPU scanline")?;
        ensure(self.x < 8, "fine X scroll")?;
        ensure(self.sprites.count <= 8, "sprite count")
    }

    /// Current dot (0-340)
    pub fn cycle(&self) -> u16 {
        self.cycle
    }

    /// Current scanline (0-261)
    pub fn scanline(&self) -> u16 {
        self.scanline
    }

    /// Completed frames since reset
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn ctrl(&self) -> PpuCtrl {
        self.ctrl
    }

    pub fn mask(&self) -> PpuMask {
        self.mask
    }

    /// Vertical blank flag as $2002 would report it, without the read side effects
    pub fn in_vblank(&self) -> bool {
        self.nmi_occurred
    }

    pub fn sprite_zero_hit(&self) -> bool {
        self.sprite_zero_hit
    }

    pub fn sprite_overflow(&self) -> bool {
        self.sprite_overflow
    }

    /// Current VRAM address
    pub fn vram_address(&self) -> u16 {
        self.v
    }

    pub fn oam(&self) -> &[u8; OAM_SIZE] {
        &self.oam
    }

    /// Last completed frame, 256x240 pixels of 0x00RRGGBB
    pub fn front_buffer(&self) -> &[u32] {
        &self.front
    }

    /// Position handed to mappers after each dot
    pub fn timing(&self) -> PpuTiming {
        PpuTiming {
            cycle: self.cycle,
            scanline: self.scanline,
            rendering: self.mask.rendering(),
        }
    }

    /// Read palette RAM with the sprite backdrop entries folded onto the
    /// background ones
    pub fn read_palette(&self, address: u16) -> u8 {
        self.palette[palette_index(address)]
    }

    fn write_palette(&mut self, address: u16, value: u8) {
        self.palette[palette_index(address)] = value;
    }

    fn read(&mut self, bus: &mut impl PpuBus, address: u16) -> u8 {
        let address = address % 0x4000;
        match address {
            0x0000..=0x1FFF => bus.read_pattern(address),
            0x2000..=0x3EFF => self.nametable[nametable_index(bus.mirroring(), address)],
            _ => self.read_palette(address),
        }
    }

    fn write(&mut self, bus: &mut impl PpuBus, address: u16, value: u8) {
        let address = address % 0x4000;
        match address {
            0x0000..=0x1FFF => bus.write_pattern(address, value),
            0x2000..=0x3EFF => self.nametable[nametable_index(bus.mirroring(), address)] = value,
            _ => self.write_palette(address, value),
        }
    }

    /// CPU read of $2000-$2007
    pub fn read_register(&mut self, address: u16, bus: &mut impl PpuBus) -> u8 {
        match address {
            0x2002 => self.read_status(),
            0x2004 => self.read_oam_data(),
            0x2007 => self.read_data(bus),
            _ => 0,
        }
    }

    /// CPU write of $2000-$2007
    pub fn write_register(&mut self, address: u16, value: u8, bus: &mut impl PpuBus) {
        self.register = value;
        match address {
            0x2000 => self.write_control(value),
            0x2001 => self.mask = PpuMask::new(value),
            0x2003 => self.oam_address = value,
            0x2004 => self.write_oam_data(value),
            0x2005 => self.write_scroll(value),
            0x2006 => self.write_address(value),
            0x2007 => self.write_data(bus, value),
            _ => {}
        }
    }

    /// Copy a 256-byte page into OAM starting at OAMADDR
    pub fn write_oam_dma(&mut self, data: &[u8; OAM_SIZE]) {
        for &byte in data {
            self.oam[self.oam_address as usize] = byte;
            self.oam_address = self.oam_address.wrapping_add(1);
        }
    }

    fn write_control(&mut self, value: u8) {
        self.ctrl = PpuCtrl::new(value);
        self.nmi_output = self.ctrl.nmi_enable();
        self.nmi_change();
        // t: ....BA.. ........ = d: ......BA
        self.t = (self.t & 0xF3FF) | ((value as u16 & 0x03) << 10);
    }

    fn read_status(&mut self) -> u8 {
        let mut result = self.register & 0x1F;
        if self.sprite_overflow {
            result |= PpuStatus::SPRITE_OVERFLOW;
        }
        if self.sprite_zero_hit {
            result |= PpuStatus::SPRITE_ZERO_HIT;
        }
        if self.nmi_occurred {
            result |= PpuStatus::VBLANK;
        }
        self.nmi_occurred = false;
        self.nmi_change();
        self.w = false;
        result
    }

    fn read_oam_data(&self) -> u8 {
        let data = self.oam[self.oam_address as usize];
        // Attribute bits 2-4 are not implemented in hardware
        if self.oam_address & 0x03 == 0x02 {
            data & 0xE3
        } else {
            data
        }
    }

    fn write_oam_data(&mut self, value: u8) {
        self.oam[self.oam_address as usize] = value;
        self.oam_address = self.oam_address.wrapping_add(1);
    }

    fn write_scroll(&mut self, value: u8) {
        if !self.w {
            // t: ........ ...HGFED = d: HGFED...
            // x:               CBA = d: .....CBA
            self.t = (self.t & 0xFFE0) | (value as u16 >> 3);
            self.x = value & 0x07;
            self.w = true;
        } else {
            // t: .CBA..HG FED..... = d: HGFEDCBA
            self.t = (self.t & 0x8FFF) | ((value as u16 & 0x07) << 12);
            self.t = (self.t & 0xFC1F) | ((value as u16 & 0xF8) << 2);
            self.w = false;
        }
    }

    fn write_address(&mut self, value: u8) {
        if !self.w {
            // t: ..FEDCBA ........ = d: ..FEDCBA
            // t: .X...... ........ = 0
            self.t = (self.t & 0x80FF) | ((value as u16 & 0x3F) << 8);
            self.w = true;
        } else {
            // t: ........ HGFEDCBA = d: HGFEDCBA
            // v                    = t
            self.t = (self.t & 0xFF00) | value as u16;
            self.v = self.t;
            self.w = false;
        }
    }

    fn read_data(&mut self, bus: &mut impl PpuBus) -> u8 {
        let mut value = self.read(bus, self.v);
        if self.v % 0x4000 < 0x3F00 {
            std::mem::swap(&mut self.buffered_data, &mut value);
        } else {
            // Palette reads are immediate; the buffer gets the nametable byte underneath
            self.buffered_data = self.read(bus, self.v.wrapping_sub(0x1000));
        }
        self.v = self.v.wrapping_add(self.ctrl.increment());
        value
    }

    fn write_data(&mut self, bus: &mut impl PpuBus, value: u8) {
        self.write(bus, self.v, value);
        self.v = self.v.wrapping_add(self.ctrl.increment());
    }

    fn increment_x(&mut self) {
        if self.v & 0x001F == 31 {
            // Coarse X wraps into the neighbouring horizontal nametable
            self.v &= 0xFFE0;
            self.v ^= 0x0400;
        } else {
            self.v += 1;
        }
    }

    fn increment_y(&mut self) {
        if self.v & 0x7000 != 0x7000 {
            self.v += 0x1000;
            return;
        }
        self.v &= 0x8FFF;
        let mut y = (self.v & 0x03E0) >> 5;
        if y == 29 {
            y = 0;
            self.v ^= 0x0800;
        } else if y == 31 {
            // Attribute rows: wrap without switching nametables
            y = 0;
        } else {
            y += 1;
        }
        self.v = (self.v & 0xFC1F) | (y << 5);
    }

    fn copy_x(&mut self) {
        // v: .....F.. ...EDCBA = t: .....F.. ...EDCBA
        self.v = (self.v & 0xFBE0) | (self.t & 0x041F);
    }

    fn copy_y(&mut self) {
        // v: .IHGF.ED CBA..... = t: .IHGF.ED CBA.....
        self.v = (self.v & 0x841F) | (self.t & 0x7BE0);
    }

    fn nmi_change(&mut self) {
        let nmi = self.nmi_output && self.nmi_occurred;
        if nmi && !self.nmi_previous {
            self.nmi_delay = NMI_DELAY;
        }
        self.nmi_previous = nmi;
    }

    fn fetch_nametable_byte(&mut self, bus: &mut impl PpuBus) {
        let address = 0x2000 | (self.v & 0x0FFF);
        self.nametable_byte = self.read(bus, address);
    }

    fn fetch_attribute_byte(&mut self, bus: &mut impl PpuBus) {
        let v = self.v;
        let address = 0x23C0 | (v & 0x0C00) | ((v >> 4) & 0x38) | ((v >> 2) & 0x07);
        let shift = ((v >> 4) & 4) | (v & 2);
        self.attribute_byte = ((self.read(bus, address) >> shift) & 3) << 2;
    }

    fn tile_address(&self) -> u16 {
        let fine_y = (self.v >> 12) & 7;
        self.ctrl.background_table() + self.nametable_byte as u16 * 16 + fine_y
    }

    fn fetch_low_tile_byte(&mut self, bus: &mut impl PpuBus) {
        let address = self.tile_address();
        self.low_tile_byte = self.read(bus, address);
    }

    fn fetch_high_tile_byte(&mut self, bus: &mut impl PpuBus) {
        let address = self.tile_address() + 8;
        self.high_tile_byte = self.read(bus, address);
    }

    /// Push eight 4-bit pixels (attribute bits + pattern bits) into the pipeline
    fn store_tile_data(&mut self) {
        let mut data: u32 = 0;
        for _ in 0..8 {
            let p1 = (self.low_tile_byte & 0x80) >> 7;
            let p2 = (self.high_tile_byte & 0x80) >> 6;
            self.low_tile_byte <<= 1;
            self.high_tile_byte <<= 1;
            data <<= 4;
            data |= (self.attribute_byte | p1 | p2) as u32;
        }
        self.tile_data |= data as u64;
    }

    fn background_pixel(&self) -> u8 {
        if !self.mask.show_background() {
            return 0;
        }
        let data = (self.tile_data >> 32) as u32 >> ((7 - self.x as u32) * 4);
        (data & 0x0F) as u8
    }

    /// Returns (slot, colour) of the first opaque sprite pixel at this dot
    fn sprite_pixel(&self) -> (usize, u8) {
        if !self.mask.show_sprites() {
            return (0, 0);
        }
        let x = self.cycle as i32 - 1;
        for slot in 0..self.sprites.count {
            let offset = x - self.sprites.positions[slot] as i32;
            if !(0..=7).contains(&offset) {
                continue;
            }
            let shift = (7 - offset) * 4;
            let color = ((self.sprites.patterns[slot] >> shift) & 0x0F) as u8;
            if color % 4 == 0 {
                continue;
            }
            return (slot, color);
        }
        (0, 0)
    }

    fn render_pixel(&mut self) {
        let x = self.cycle as usize - 1;
        let y = self.scanline as usize;
        let mut background = self.background_pixel();
        let (slot, mut sprite) = self.sprite_pixel();
        if x < 8 && !self.mask.show_left_background() {
            background = 0;
        }
        if x < 8 && !self.mask.show_left_sprites() {
            sprite = 0;
        }

        let opaque_bg = background % 4 != 0;
        let opaque_sprite = sprite % 4 != 0;
        let color = match (opaque_bg, opaque_sprite) {
            (false, false) => 0,
            (false, true) => sprite | 0x10,
            (true, false) => background,
            (true, true) => {
                if self.sprites.indexes[slot] == 0 && x < 255 {
                    self.sprite_zero_hit = true;
                }
                if self.sprites.priorities[slot] == 0 {
                    sprite | 0x10
                } else {
                    background
                }
            }
        };
        self.back[y * WIDTH + x] = palette::color(self.read_palette(color as u16));
    }

    fn fetch_sprite_pattern(&mut self, bus: &mut impl PpuBus, sprite: usize, row: u16) -> u32 {
        let mut tile = self.oam[sprite * 4 + 1] as u16;
        let attributes = self.oam[sprite * 4 + 2];
        let flip_vertical = attributes & 0x80 != 0;
        let flip_horizontal = attributes & 0x40 != 0;

        let address = if !self.ctrl.sprite_size() {
            let row = if flip_vertical { 7 - row } else { row };
            self.ctrl.sprite_table() + tile * 16 + row
        } else {
            let mut row = if flip_vertical { 15 - row } else { row };
            let table = (tile & 1) * 0x1000;
            tile &= 0xFE;
            if row > 7 {
                tile += 1;
                row -= 8;
            }
            table + tile * 16 + row
        };

        let palette_bits = (attributes & 3) << 2;
        let mut low = self.read(bus, address);
        let mut high = self.read(bus, address + 8);
        let mut data: u32 = 0;
        for _ in 0..8 {
            let (p1, p2) = if flip_horizontal {
                let bits = (low & 1, (high & 1) << 1);
                low >>= 1;
                high >>= 1;
                bits
            } else {
                let bits = ((low & 0x80) >> 7, (high & 0x80) >> 6);
                low <<= 1;
                high <<= 1;
                bits
            };
            data <<= 4;
            data |= (palette_bits | p1 | p2) as u32;
        }
        data
    }

    fn evaluate_sprites(&mut self, bus: &mut impl PpuBus) {
        let height: i32 = if self.ctrl.sprite_size() { 16 } else { 8 };
        let mut count = 0;
        for sprite in 0..64 {
            let y = self.oam[sprite * 4];
            let attributes = self.oam[sprite * 4 + 2];
            let x = self.oam[sprite * 4 + 3];
            let row = self.scanline as i32 - y as i32;
            if row < 0 || row >= height {
                continue;
            }
            if count < 8 {
                self.sprites.patterns[count] = self.fetch_sprite_pattern(bus, sprite, row as u16);
                self.sprites.positions[count] = x;
                self.sprites.priorities[count] = (attributes >> 5) & 1;
                self.sprites.indexes[count] = sprite as u8;
            }
            count += 1;
        }
        if count > 8 {
            count = 8;
            self.sprite_overflow = true;
        }
        self.sprites.count = count;
    }

    /// Advance the dot/scanline/frame counters; true when the delayed NMI fires
    fn tick(&mut self) -> bool {
        let mut nmi = false;
        if self.nmi_delay > 0 {
            self.nmi_delay -= 1;
            nmi = self.nmi_delay == 0 && self.nmi_output && self.nmi_occurred;
        }

        // Odd frames skip the last dot of the pre-render line while rendering
        if self.mask.rendering()
            && self.odd_frame
            && self.scanline == PRE_RENDER_SCANLINE
            && self.cycle == 339
        {
            self.cycle = 0;
            self.scanline = 0;
            self.end_frame();
            return nmi;
        }

        self.cycle += 1;
        if self.cycle >= DOTS_PER_SCANLINE {
            self.cycle = 0;
            self.scanline += 1;
            if self.scanline >= SCANLINES_PER_FRAME {
                self.scanline = 0;
                self.end_frame();
            }
        }
        nmi
    }

    fn end_frame(&mut self) {
        self.frame += 1;
        self.odd_frame = !self.odd_frame;
        std::mem::swap(&mut self.front, &mut self.back);
    }

    /// Execute a single PPU dot. Returns true when the CPU should take an NMI.
    pub fn step(&mut self, bus: &mut impl PpuBus) -> bool {
        let nmi = self.tick();

        let rendering = self.mask.rendering();
        let pre_line = self.scanline == PRE_RENDER_SCANLINE;
        let visible_line = self.scanline < HEIGHT as u16;
        let render_line = pre_line || visible_line;
        let prefetch_cycle = (321..=336).contains(&self.cycle);
        let visible_cycle = (1..=256).contains(&self.cycle);
        let fetch_cycle = prefetch_cycle || visible_cycle;

        if rendering {
            if visible_line && visible_cycle {
                self.render_pixel();
            }
            if render_line && fetch_cycle {
                self.tile_data <<= 4;
                match self.cycle % 8 {
                    1 => self.fetch_nametable_byte(bus),
                    3 => self.fetch_attribute_byte(bus),
                    5 => self.fetch_low_tile_byte(bus),
                    7 => self.fetch_high_tile_byte(bus),
                    0 => self.store_tile_data(),
                    _ => {}
                }
            }
            if pre_line && (280..=304).contains(&self.cycle) {
                self.copy_y();
            }
            if render_line {
                if fetch_cycle && self.cycle % 8 == 0 {
                    self.increment_x();
                }
                if self.cycle == 256 {
                    self.increment_y();
                }
                if self.cycle == 257 {
                    self.copy_x();
                }
            }

            if self.cycle == 257 {
                if visible_line {
                    self.evaluate_sprites(bus);
                } else {
                    self.sprites.count = 0;
                }
            }
        }

        if self.scanline == VBLANK_SCANLINE && self.cycle == 1 {
            self.nmi_occurred = true;
            self.nmi_change();
        }
        if pre_line && self.cycle == 1 {
            self.nmi_occurred = false;
            self.nmi_change();
            self.sprite_zero_hit = false;
            self.sprite_overflow = false;
        }

        nmi
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

/// Palette RAM slot for an address, folding $10/$14/$18/$1C onto $00/$04/$08/$0C
fn palette_index(address: u16) -> usize {
    let index = address as usize % PALETTE_SIZE;
    if index >= 16 && index % 4 == 0 {
        index - 16
    } else {
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestBus {
        chr: Vec<u8>,
        mirroring: Mirroring,
    }

    impl TestBus {
        fn new() -> Self {
            Self { chr: vec![0; 0x2000], mirroring: Mirroring::Vertical }
        }
    }

    impl PpuBus for TestBus {
        fn read_pattern(&mut self, address: u16) -> u8 {
            self.chr[address as usize]
        }

        fn write_pattern(&mut self, address: u16, value: u8) {
            self.chr[address as usize] = value;
        }

        fn mirroring(&self) -> Mirroring {
            self.mirroring
        }
    }

    fn set_address(ppu: &mut Ppu, bus: &mut TestBus, address: u16) {
        ppu.write_register(0x2006, (address >> 8) as u8, bus);
        ppu.write_register(0x2006, address as u8, bus);
    }

    #[test]
    fn test_reset_position() {
        let ppu = Ppu::new();
        assert_eq!(ppu.cycle(), 340);
        assert_eq!(ppu.scanline(), 240);
        assert_eq!(ppu.front_buffer().len(), WIDTH * HEIGHT);
    }

    #[test]
    fn test_scroll_writes_fill_t_and_fine_x() {
        let mut ppu = Ppu::new();
        let mut bus = TestBus::new();
        ppu.write_register(0x2005, 0x7D, &mut bus);
        assert!(ppu.w);
        assert_eq!(ppu.x, 0x05);
        assert_eq!(ppu.t & 0x001F, 0x0F);
        ppu.write_register(0x2005, 0x5E, &mut bus);
        assert!(!ppu.w);
        assert_eq!(ppu.t, 0x616F);
    }

    #[test]
    fn test_status_read_resets_toggle() {
        let mut ppu = Ppu::new();
        let mut bus = TestBus::new();
        ppu.write_register(0x2006, 0x21, &mut bus);
        assert!(ppu.w);
        ppu.read_register(0x2002, &mut bus);
        assert!(!ppu.w);
        set_address(&mut ppu, &mut bus, 0x2108);
        assert_eq!(ppu.vram_address(), 0x2108);
    }

    #[test]
    fn test_data_read_is_buffered() {
        let mut ppu = Ppu::new();
        let mut bus = TestBus::new();
        set_address(&mut ppu, &mut bus, 0x2000);
        ppu.write_register(0x2007, 0xAA, &mut bus);
        ppu.write_register(0x2007, 0xBB, &mut bus);

        set_address(&mut ppu, &mut bus, 0x2000);
        let _stale = ppu.read_register(0x2007, &mut bus);
        assert_eq!(ppu.read_register(0x2007, &mut bus), 0xAA);
        assert_eq!(ppu.read_register(0x2007, &mut bus), 0xBB);
    }

    #[test]
    fn test_increment_32() {
        let mut ppu = Ppu::new();
        let mut bus = TestBus::new();
        ppu.write_register(0x2000, PpuCtrl::VRAM_INC, &mut bus);
        set_address(&mut ppu, &mut bus, 0x2000);
        ppu.write_register(0x2007, 1, &mut bus);
        assert_eq!(ppu.vram_address(), 0x2020);
    }

    #[test]
    fn test_palette_reads_are_immediate_and_mirrored() {
        let mut ppu = Ppu::new();
        let mut bus = TestBus::new();
        set_address(&mut ppu, &mut bus, 0x3F10);
        ppu.write_register(0x2007, 0x2C, &mut bus);
        assert_eq!(ppu.read_palette(0x00), 0x2C);

        set_address(&mut ppu, &mut bus, 0x3F00);
        assert_eq!(ppu.read_register(0x2007, &mut bus), 0x2C);
    }

    #[test]
    fn test_vertical_mirroring_aliases_nametables() {
        let mut ppu = Ppu::new();
        let mut bus = TestBus::new();
        set_address(&mut ppu, &mut bus, 0x2805);
        ppu.write_register(0x2007, 0x77, &mut bus);
        assert_eq!(ppu.nametable[5], 0x77);
    }

    #[test]
    fn test_oam_data_attribute_mask() {
        let mut ppu = Ppu::new();
        let mut bus = TestBus::new();
        ppu.write_register(0x2003, 0x02, &mut bus);
        ppu.write_register(0x2004, 0xFF, &mut bus);
        ppu.write_register(0x2003, 0x02, &mut bus);
        assert_eq!(ppu.read_register(0x2004, &mut bus), 0xE3);
    }

    #[test]
    fn test_oam_dma_starts_at_oam_address() {
        let mut ppu = Ppu::new();
        let mut bus = TestBus::new();
        ppu.write_register(0x2003, 0xFF, &mut bus);
        let mut page = [0u8; OAM_SIZE];
        page[0] = 0x11;
        page[1] = 0x22;
        ppu.write_oam_dma(&page);
        assert_eq!(ppu.oam()[0xFF], 0x11);
        assert_eq!(ppu.oam()[0x00], 0x22);
    }

    #[test]
    fn test_increment_y_wraps_at_row_29() {
        let mut ppu = Ppu::new();
        ppu.v = 0x7000 | (29 << 5);
        ppu.increment_y();
        assert_eq!(ppu.v, 0x0800);
    }

    #[test]
    fn test_nmi_fires_after_delay() {
        let mut ppu = Ppu::new();
        let mut bus = TestBus::new();
        ppu.write_register(0x2000, PpuCtrl::NMI_ENABLE, &mut bus);

        // (240, 340) -> (241, 0) -> (241, 1) sets vblank
        assert!(!ppu.step(&mut bus));
        assert!(!ppu.step(&mut bus));
        assert!(ppu.in_vblank());

        let fired = (0..NMI_DELAY as usize).map(|_| ppu.step(&mut bus)).position(|nmi| nmi);
        assert_eq!(fired, Some(NMI_DELAY as usize - 1));
    }

    #[test]
    fn test_status_read_suppresses_pending_nmi() {
        let mut ppu = Ppu::new();
        let mut bus = TestBus::new();
        ppu.write_register(0x2000, PpuCtrl::NMI_ENABLE, &mut bus);
        ppu.step(&mut bus);
        ppu.step(&mut bus);
        let status = ppu.read_register(0x2002, &mut bus);
        assert_eq!(status & PpuStatus::VBLANK, PpuStatus::VBLANK);
        assert!((0..32).all(|_| !ppu.step(&mut bus)));
    }
    #[test]
    fn test_validate_rejects_bad_geometry() {
        let ppu = Ppu::new();
        assert!(ppu.validate().is_ok());

        let mut short = ppu.clone();
        short.back.truncate(WIDTH);
        assert!(matches!(short.validate(), Err(StateError::Invalid("back buffer size"))));

        let mut crowded = ppu.clone();
        crowded.sprites.count = 9;
        assert!(crowded.validate().is_err());

        let mut off_screen = ppu;
        off_screen.scanline = SCANLINES_PER_FRAME;
        assert!(off_screen.validate().is_err());
    }
}
