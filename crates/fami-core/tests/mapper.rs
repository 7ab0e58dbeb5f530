//! Mapper tests: bank switching driven by real CPU programs, plus the
//! scanline and cycle IRQ counters

use fami_core::bus::Mirroring;
use fami_core::cartridge::{Cartridge, CHR_BANK_SIZE, PRG_BANK_SIZE};
use fami_core::mapper::{AnyMapper, Mapper, PpuTiming};
use fami_core::Device;

/// Offset of a CPU address inside a PRG image whose last 16KB bank sits at $C000
fn last_bank(prg: &[u8], address: u16) -> usize {
    prg.len() - PRG_BANK_SIZE + (address as usize - 0xC000)
}

/// PRG image of `banks` 16KB banks filled with NOPs, a marker byte
/// `0x10 + bank` at offset $3000 of every bank, `program` at $C000 and all
/// vectors pointing at it
fn prg_image(banks: usize, program: &[u8]) -> Vec<u8> {
    let mut prg = vec![0xEA; banks * PRG_BANK_SIZE];
    for bank in 0..banks {
        prg[bank * PRG_BANK_SIZE + 0x3000] = 0x10 + bank as u8;
    }
    let start = last_bank(&prg, 0xC000);
    prg[start..start + program.len()].copy_from_slice(program);
    for vector in [0xFFFA, 0xFFFC, 0xFFFE] {
        let offset = last_bank(&prg, vector);
        prg[offset] = 0x00;
        prg[offset + 1] = 0xC0;
    }
    prg
}

fn run(device: &mut Device, steps: usize) {
    for _ in 0..steps {
        device.step().unwrap();
    }
}

#[test]
fn test_uxrom_switches_lower_bank() {
    let program = [
        0xA9, 0x02, // LDA #$02
        0x8D, 0x00, 0x80, // STA $8000
        0xAD, 0x00, 0xB0, // LDA $B000
        0x85, 0x00, // STA $00
        0xAD, 0x00, 0xF0, // LDA $F000
        0x85, 0x01, // STA $01
    ];
    let cart = Cartridge::new(prg_image(4, &program), vec![], 2, Mirroring::Vertical);
    let mut device = Device::new(cart).unwrap();
    run(&mut device, 6);
    assert_eq!(device.ram()[0], 0x12);
    assert_eq!(device.ram()[1], 0x13);
}

#[test]
fn test_nrom_ignores_writes_and_mirrors_16k() {
    let program = [
        0xA9, 0x01, // LDA #$01
        0x8D, 0x00, 0x80, // STA $8000
        0xAD, 0x00, 0xB0, // LDA $B000
        0x85, 0x00, // STA $00
    ];
    let cart = Cartridge::new(prg_image(1, &program), vec![], 0, Mirroring::Horizontal);
    let mut device = Device::new(cart).unwrap();
    assert_eq!(device.mapper().name(), "NROM");
    run(&mut device, 4);
    assert_eq!(device.ram()[0], 0x10);
    assert_eq!(device.mapper().read(device.cartridge(), 0xF000), Ok(0x10));
}

#[test]
fn test_mmc1_serial_prg_select() {
    let mut cart = Cartridge::new(prg_image(8, &[]), vec![], 1, Mirroring::Horizontal);
    let mut mapper = AnyMapper::new(&cart).unwrap();

    // Control = 0x0E: vertical mirroring, last bank fixed at $C000
    for bit in [0, 1, 1, 1, 0] {
        mapper.write(&mut cart, 0x8000, bit).unwrap();
    }
    assert_eq!(cart.mirroring(), Mirroring::Vertical);

    // PRG bank 5, one bit per write starting with the lowest
    for bit in [1, 0, 1, 0, 0] {
        mapper.write(&mut cart, 0xE000, bit).unwrap();
    }
    assert_eq!(mapper.read(&cart, 0xB000), Ok(0x15));
    assert_eq!(mapper.read(&cart, 0xF000), Ok(0x17));
}

#[test]
fn test_mmc1_reset_bit_discards_partial_load() {
    let mut cart = Cartridge::new(prg_image(8, &[]), vec![], 1, Mirroring::Horizontal);
    let mut mapper = AnyMapper::new(&cart).unwrap();
    mapper.write(&mut cart, 0xE000, 1).unwrap();
    mapper.write(&mut cart, 0xE000, 1).unwrap();
    mapper.write(&mut cart, 0xE000, 0x80).unwrap();

    for bit in [0, 1, 0, 0, 0] {
        mapper.write(&mut cart, 0xE000, bit).unwrap();
    }
    assert_eq!(mapper.read(&cart, 0xB000), Ok(0x12));
}

#[test]
fn test_cnrom_selects_chr_bank() {
    let mut chr = vec![0; 4 * CHR_BANK_SIZE];
    for bank in 0..4 {
        chr[bank * CHR_BANK_SIZE + 0x10] = 0xC0 | bank as u8;
    }
    let mut cart = Cartridge::new(prg_image(2, &[]), chr, 3, Mirroring::Vertical);
    let mut mapper = AnyMapper::new(&cart).unwrap();
    assert_eq!(mapper.read(&cart, 0x0010), Ok(0xC0));
    mapper.write(&mut cart, 0x8000, 0x02).unwrap();
    assert_eq!(mapper.read(&cart, 0x0010), Ok(0xC2));
    // Only the low two bits select
    mapper.write(&mut cart, 0x8000, 0x07).unwrap();
    assert_eq!(mapper.read(&cart, 0x0010), Ok(0xC3));
    // CHR ROM is not writable
    mapper.write(&mut cart, 0x0010, 0x00).unwrap();
    assert_eq!(mapper.read(&cart, 0x0010), Ok(0xC3));
}

#[test]
fn test_axrom_32k_bank_and_single_screen() {
    let mut cart = Cartridge::new(prg_image(8, &[]), vec![], 7, Mirroring::Horizontal);
    let mut mapper = AnyMapper::new(&cart).unwrap();

    mapper.write(&mut cart, 0x8000, 0x12).unwrap();
    assert_eq!(cart.mirroring(), Mirroring::SingleUpper);
    // 32KB bank 2 covers 16KB banks 4 and 5
    assert_eq!(mapper.read(&cart, 0xB000), Ok(0x14));
    assert_eq!(mapper.read(&cart, 0xF000), Ok(0x15));

    mapper.write(&mut cart, 0x8000, 0x00).unwrap();
    assert_eq!(cart.mirroring(), Mirroring::SingleLower);
    assert_eq!(mapper.read(&cart, 0xB000), Ok(0x10));
}

#[test]
fn test_mapper225_address_latch() {
    let mut cart = Cartridge::new(prg_image(8, &[]), vec![], 225, Mirroring::Vertical);
    let mut mapper = AnyMapper::new(&cart).unwrap();

    // 16KB mode, PRG bank 3, horizontal mirroring
    mapper.write(&mut cart, 0x8000 | 0x3000 | (3 << 6), 0).unwrap();
    assert_eq!(cart.mirroring(), Mirroring::Horizontal);
    assert_eq!(mapper.read(&cart, 0xB000), Ok(0x13));
    assert_eq!(mapper.read(&cart, 0xF000), Ok(0x13));

    // 32KB mode pairs banks 2 and 3
    mapper.write(&mut cart, 0x8000 | (3 << 6), 0).unwrap();
    assert_eq!(cart.mirroring(), Mirroring::Vertical);
    assert_eq!(mapper.read(&cart, 0xB000), Ok(0x12));
    assert_eq!(mapper.read(&cart, 0xF000), Ok(0x13));
}

#[test]
fn test_mmc3_counter_fires_once_per_reload_period() {
    let mut cart = Cartridge::new(prg_image(4, &[]), vec![], 4, Mirroring::Vertical);
    let mut mapper = AnyMapper::new(&cart).unwrap();
    let reload = 4;
    mapper.write(&mut cart, 0xC000, reload).unwrap();
    mapper.write(&mut cart, 0xC001, 0).unwrap();
    mapper.write(&mut cart, 0xE001, 0).unwrap();

    let mut fired = 0;
    for scanline in 0..=reload as u16 {
        for cycle in 0..341 {
            if mapper.step(PpuTiming { cycle, scanline, rendering: true }) {
                fired += 1;
            }
        }
    }
    assert_eq!(fired, 1);
}

#[test]
fn test_mmc3_irq_reaches_cpu() {
    let mut prg = prg_image(4, &[]);
    let main = [
        0xA9, 0x0A, // LDA #$0A
        0x8D, 0x00, 0xC0, // STA $C000
        0x8D, 0x01, 0xC0, // STA $C001
        0x8D, 0x01, 0xE0, // STA $E001
        0xA9, 0x08, // LDA #$08
        0x8D, 0x01, 0x20, // STA $2001
        0x58, // CLI
        0x4C, 0x11, 0xE0, // JMP $E011
    ];
    let handler = [
        0xE6, 0x00, // INC $00
        0x8D, 0x00, 0xE0, // STA $E000
        0x40, // RTI
    ];
    let main_at = last_bank(&prg, 0xE000);
    prg[main_at..main_at + main.len()].copy_from_slice(&main);
    let handler_at = last_bank(&prg, 0xE100);
    prg[handler_at..handler_at + handler.len()].copy_from_slice(&handler);
    for (vector, target) in [(0xFFFA, 0xE100u16), (0xFFFC, 0xE000), (0xFFFE, 0xE100)] {
        let offset = last_bank(&prg, vector);
        prg[offset..offset + 2].copy_from_slice(&target.to_le_bytes());
    }

    let cart = Cartridge::new(prg, vec![], 4, Mirroring::Vertical);
    let mut device = Device::new(cart).unwrap();
    device.step_frame().unwrap();
    device.step_frame().unwrap();
    assert_eq!(device.ram()[0], 1);
}

#[test]
fn test_mapper40_irq_after_4096_cpu_cycles() {
    let mut prg = vec![0; 0x10000];
    for bank in 0..8 {
        prg[bank * 0x2000] = bank as u8;
    }
    let mut cart = Cartridge::new(prg, vec![0; CHR_BANK_SIZE], 40, Mirroring::Vertical);
    let mut mapper = AnyMapper::new(&cart).unwrap();
    assert_eq!(mapper.name(), "SMB2J");

    mapper.write(&mut cart, 0xE000, 0x0B).unwrap();
    assert_eq!(mapper.read(&cart, 0xC000), Ok(3));
    assert_eq!(mapper.read(&cart, 0x6000), Ok(6));

    mapper.write(&mut cart, 0xA000, 0).unwrap();
    let timing = PpuTiming::default();
    let dots = (0..4096 * 3).take_while(|_| !mapper.step(timing)).count();
    assert_eq!(dots, 4096 * 3 - 1);
}

#[test]
fn test_mapper_state_equality_after_clone() {
    let mut cart = Cartridge::new(prg_image(4, &[]), vec![], 2, Mirroring::Vertical);
    let mut mapper = AnyMapper::new(&cart).unwrap();
    let before = mapper.clone();
    mapper.write(&mut cart, 0x8000, 1).unwrap();
    assert_ne!(mapper, before);
}
