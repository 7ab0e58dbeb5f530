//! iNES parsing tests

use fami_core::bus::Mirroring;
use fami_core::cartridge::{
    Cartridge, CartridgeError, InesHeader, CHR_BANK_SIZE, HEADER_SIZE, PRG_BANK_SIZE, TRAINER_SIZE,
};

fn header(prg_banks: u8, chr_banks: u8, control1: u8, control2: u8) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[..4].copy_from_slice(b"NES\x1A");
    header[4] = prg_banks;
    header[5] = chr_banks;
    header[6] = control1;
    header[7] = control2;
    header
}

fn image(prg_banks: u8, chr_banks: u8, control1: u8, control2: u8) -> Vec<u8> {
    let mut rom = header(prg_banks, chr_banks, control1, control2).to_vec();
    if control1 & 0x04 != 0 {
        rom.extend(std::iter::repeat(0xEE).take(TRAINER_SIZE));
    }
    for bank in 0..prg_banks {
        rom.extend(std::iter::repeat(0x10 + bank).take(PRG_BANK_SIZE));
    }
    for bank in 0..chr_banks {
        rom.extend(std::iter::repeat(0x80 + bank).take(CHR_BANK_SIZE));
    }
    rom
}

#[test]
fn test_rejects_bad_magic() {
    let mut rom = image(1, 1, 0, 0);
    rom[3] = 0x00;
    match Cartridge::from_bytes(&rom) {
        Err(CartridgeError::InvalidMagic(magic)) => assert_eq!(magic, 0x0053_454E),
        other => panic!("expected InvalidMagic, got {:?}", other),
    }
}

#[test]
fn test_mapper_id_from_both_nibbles() {
    let cart = Cartridge::from_bytes(&image(1, 1, 0x10, 0x40)).unwrap();
    assert_eq!(cart.mapper_id(), 0x41);
    let parsed = InesHeader::parse(&header(1, 1, 0x40, 0x00)).unwrap();
    assert_eq!(parsed.mapper_id(), 4);
}

#[test]
fn test_mirroring_flags() {
    let horizontal = Cartridge::from_bytes(&image(1, 1, 0x00, 0)).unwrap();
    assert_eq!(horizontal.mirroring(), Mirroring::Horizontal);
    let vertical = Cartridge::from_bytes(&image(1, 1, 0x01, 0)).unwrap();
    assert_eq!(vertical.mirroring(), Mirroring::Vertical);
    let lower = Cartridge::from_bytes(&image(1, 1, 0x08, 0)).unwrap();
    assert_eq!(lower.mirroring(), Mirroring::SingleLower);
    let upper = Cartridge::from_bytes(&image(1, 1, 0x09, 0)).unwrap();
    assert_eq!(upper.mirroring(), Mirroring::SingleUpper);
}

#[test]
fn test_trainer_is_skipped() {
    let cart = Cartridge::from_bytes(&image(2, 1, 0x04, 0)).unwrap();
    assert_eq!(cart.prg().len(), 2 * PRG_BANK_SIZE);
    assert_eq!(cart.prg()[0], 0x10);
    assert_eq!(cart.prg()[PRG_BANK_SIZE], 0x11);
    assert_eq!(cart.chr()[0], 0x80);
}

#[test]
fn test_battery_flag() {
    let cart = Cartridge::from_bytes(&image(1, 1, 0x02, 0)).unwrap();
    assert!(cart.has_battery());
    assert_eq!(cart.sram().len(), 8 * 1024);
}

#[test]
fn test_zero_chr_banks_get_chr_ram() {
    let mut cart = Cartridge::from_bytes(&image(1, 0, 0, 0)).unwrap();
    assert!(cart.has_chr_ram());
    assert_eq!(cart.chr().len(), CHR_BANK_SIZE);
    cart.write_chr(0x123, 0x5A);
    assert_eq!(cart.read_chr(0x123), 0x5A);
}

#[test]
fn test_chr_rom_ignores_writes() {
    let mut cart = Cartridge::from_bytes(&image(1, 1, 0, 0)).unwrap();
    cart.write_chr(0, 0x00);
    assert_eq!(cart.read_chr(0), 0x80);
}

#[test]
fn test_truncated_sections() {
    let rom = image(2, 1, 0, 0);
    let short_prg = &rom[..HEADER_SIZE + PRG_BANK_SIZE];
    assert!(matches!(
        Cartridge::from_bytes(short_prg),
        Err(CartridgeError::Truncated("PRG ROM"))
    ));
    let short_chr = &rom[..rom.len() - 1];
    assert!(matches!(
        Cartridge::from_bytes(short_chr),
        Err(CartridgeError::Truncated("CHR ROM"))
    ));
    assert!(matches!(
        Cartridge::from_bytes(&rom[..10]),
        Err(CartridgeError::Truncated("header"))
    ));
}

#[test]
fn test_state_round_trip_restores_sram_and_mirroring() {
    let mut cart = Cartridge::from_bytes(&image(1, 0, 0, 0)).unwrap();
    cart.write_sram(0x10, 0x42);
    cart.write_chr(0x20, 0x99);
    let state = cart.state();

    cart.write_sram(0x10, 0x00);
    cart.write_chr(0x20, 0x00);
    cart.set_mirroring(Mirroring::SingleUpper);
    cart.restore(state);

    assert_eq!(cart.read_sram(0x10), 0x42);
    assert_eq!(cart.read_chr(0x20), 0x99);
    assert_eq!(cart.mirroring(), Mirroring::Horizontal);
}

#[test]
fn test_open_missing_file() {
    assert!(matches!(
        Cartridge::open("/nonexistent/game.nes"),
        Err(CartridgeError::Io(_))
    ));
}
