//! CPU tests against a flat 64KB memory

use fami_core::cpu::{Bus, Cpu, Interrupt, StatusFlags, IRQ_VECTOR, NMI_VECTOR};
use fami_core::opcode::{self, AddressingMode, Opcode};

struct Memory(Vec<u8>);

impl Bus for Memory {
    fn read(&mut self, address: u16) -> u8 {
        self.0[address as usize]
    }

    fn write(&mut self, address: u16, value: u8) {
        self.0[address as usize] = value;
    }
}

/// Memory with `program` at $8000 and every vector pointing at $8000
fn memory(program: &[u8]) -> Memory {
    let mut memory = vec![0xEA; 0x10000];
    memory[0x8000..0x8000 + program.len()].copy_from_slice(program);
    for vector in [NMI_VECTOR, 0xFFFC, IRQ_VECTOR] {
        memory[vector as usize] = 0x00;
        memory[vector as usize + 1] = 0x80;
    }
    Memory(memory)
}

fn boot(program: &[u8]) -> (Cpu, Memory) {
    let mut bus = memory(program);
    let mut cpu = Cpu::new();
    cpu.reset(&mut bus);
    (cpu, bus)
}

/// Encoded length implied by an addressing mode
fn mode_size(mode: AddressingMode) -> u16 {
    match mode {
        AddressingMode::Implied | AddressingMode::Accumulator => 1,
        AddressingMode::Absolute
        | AddressingMode::AbsoluteX
        | AddressingMode::AbsoluteY
        | AddressingMode::Indirect => 3,
        _ => 2,
    }
}

#[test]
fn test_every_documented_opcode_follows_table() {
    let mut checked = 0;
    for byte in 0..=255u8 {
        let info = opcode::decode(byte);
        if !info.opcode.is_documented() {
            continue;
        }
        // Zeroed memory: every operand and pointer is $00, X = Y = 0, so no
        // page is crossed and every vector and stack slot reads $0000
        let mut bus = Memory(vec![0; 0x10000]);
        bus.0[0x8000] = byte;
        let mut cpu = Cpu::new();
        cpu.registers_mut().pc = 0x8000;
        cpu.registers_mut().sp = 0xFD;
        let status = cpu.status();

        let cycles = cpu.step(&mut bus);
        let pc = cpu.registers().pc;

        let taken = match info.opcode {
            Opcode::BCC => !status.carry,
            Opcode::BCS => status.carry,
            Opcode::BNE => !status.zero,
            Opcode::BEQ => status.zero,
            Opcode::BPL => !status.negative,
            Opcode::BMI => status.negative,
            Opcode::BVC => !status.overflow,
            Opcode::BVS => status.overflow,
            _ => false,
        };
        match info.opcode {
            Opcode::JMP | Opcode::JSR | Opcode::RTI | Opcode::BRK => {
                assert_eq!(pc, 0x0000, "${byte:02X} target")
            }
            // Pulls $0000 and adds one
            Opcode::RTS => assert_eq!(pc, 0x0001, "${byte:02X} target"),
            _ => {
                assert_eq!(info.size as u16, mode_size(info.mode), "${byte:02X} size");
                assert_eq!(pc, 0x8000 + info.size as u16, "${byte:02X} next PC");
            }
        }
        assert_eq!(cycles, info.cycles as u32 + taken as u32, "${byte:02X} cycles");
        checked += 1;
    }
    // The 151 official opcodes plus the NOP and SBC aliases
    assert!(checked >= 151, "only {checked} opcodes checked");
}

#[test]
fn test_adc_sets_overflow() {
    // LDA #$50; ADC #$50
    let (mut cpu, mut bus) = boot(&[0xA9, 0x50, 0x69, 0x50]);
    cpu.step(&mut bus);
    cpu.step(&mut bus);
    assert_eq!(cpu.registers().a, 0xA0);
    let status = cpu.status();
    assert!(status.overflow);
    assert!(status.negative);
    assert!(!status.carry);
    assert!(!status.zero);
}

#[test]
fn test_sbc_borrow() {
    // SEC; LDA #$10; SBC #$20
    let (mut cpu, mut bus) = boot(&[0x38, 0xA9, 0x10, 0xE9, 0x20]);
    for _ in 0..3 {
        cpu.step(&mut bus);
    }
    assert_eq!(cpu.registers().a, 0xF0);
    assert!(!cpu.status().carry);
    assert!(cpu.status().negative);
}

#[test]
fn test_undocumented_sbc_alias() {
    // SEC; LDA #$05; SBC #$03 via $EB
    let (mut cpu, mut bus) = boot(&[0x38, 0xA9, 0x05, 0xEB, 0x03]);
    for _ in 0..3 {
        cpu.step(&mut bus);
    }
    assert_eq!(cpu.registers().a, 0x02);
    assert!(cpu.status().carry);
}

#[test]
fn test_compare_flags() {
    // LDX #$40; CPX #$40; CPX #$41
    let (mut cpu, mut bus) = boot(&[0xA2, 0x40, 0xE0, 0x40, 0xE0, 0x41]);
    cpu.step(&mut bus);
    cpu.step(&mut bus);
    assert!(cpu.status().zero);
    assert!(cpu.status().carry);
    cpu.step(&mut bus);
    assert!(!cpu.status().zero);
    assert!(!cpu.status().carry);
    assert!(cpu.status().negative);
}

#[test]
fn test_branch_cycle_costs() {
    // BNE +0 (taken, same page); BEQ +0 (not taken)
    let (mut cpu, mut bus) = boot(&[0xD0, 0x00, 0xF0, 0x00]);
    assert_eq!(cpu.step(&mut bus), 3);
    assert_eq!(cpu.step(&mut bus), 2);

    // BNE +$20 from $80F0 lands on $8112
    let (mut cpu, mut bus) = boot(&[]);
    bus.0[0x80F0] = 0xD0;
    bus.0[0x80F1] = 0x20;
    cpu.registers_mut().pc = 0x80F0;
    assert_eq!(cpu.step(&mut bus), 4);
    assert_eq!(cpu.registers().pc, 0x8112);
}

#[test]
fn test_indexed_page_cross_penalty() {
    // LDX #$FF; LDA $1001,X; LDA $1000,X
    let (mut cpu, mut bus) = boot(&[0xA2, 0xFF, 0xBD, 0x01, 0x10, 0xBD, 0x00, 0x10]);
    bus.0[0x1100] = 0x42;
    cpu.step(&mut bus);
    assert_eq!(cpu.step(&mut bus), 5);
    assert_eq!(cpu.registers().a, 0x42);
    assert_eq!(cpu.step(&mut bus), 4);
}

#[test]
fn test_store_never_pays_page_penalty() {
    // LDY #$FF; STA $10FF,Y
    let (mut cpu, mut bus) = boot(&[0xA0, 0xFF, 0x99, 0xFF, 0x10]);
    cpu.step(&mut bus);
    assert_eq!(cpu.step(&mut bus), 5);
}

#[test]
fn test_jsr_rts() {
    // JSR $8010 ... $8010: RTS
    let (mut cpu, mut bus) = boot(&[0x20, 0x10, 0x80]);
    bus.0[0x8010] = 0x60;
    assert_eq!(cpu.step(&mut bus), 6);
    assert_eq!(cpu.registers().pc, 0x8010);
    assert_eq!(cpu.registers().sp, 0xFB);
    assert_eq!(bus.0[0x01FD], 0x80);
    assert_eq!(bus.0[0x01FC], 0x02);

    assert_eq!(cpu.step(&mut bus), 6);
    assert_eq!(cpu.registers().pc, 0x8003);
    assert_eq!(cpu.registers().sp, 0xFD);
}

#[test]
fn test_jmp_indirect_page_bug() {
    // JMP ($02FF)
    let (mut cpu, mut bus) = boot(&[0x6C, 0xFF, 0x02]);
    bus.0[0x02FF] = 0x34;
    bus.0[0x0200] = 0x12;
    bus.0[0x0300] = 0x56;
    cpu.step(&mut bus);
    assert_eq!(cpu.registers().pc, 0x1234);
}

#[test]
fn test_zero_page_index_wraps() {
    // LDX #$10; LDA $F8,X reads $0008
    let (mut cpu, mut bus) = boot(&[0xA2, 0x10, 0xB5, 0xF8]);
    bus.0[0x0008] = 0x77;
    bus.0[0x0108] = 0x99;
    cpu.step(&mut bus);
    cpu.step(&mut bus);
    assert_eq!(cpu.registers().a, 0x77);
}

#[test]
fn test_brk_pushes_break_flag() {
    let (mut cpu, mut bus) = boot(&[0x00]);
    assert_eq!(cpu.step(&mut bus), 7);
    // Return address skips the padding byte
    assert_eq!(bus.0[0x01FD], 0x80);
    assert_eq!(bus.0[0x01FC], 0x02);
    assert_eq!(bus.0[0x01FB], 0x34);
    assert!(cpu.status().interrupt);
    assert_eq!(cpu.registers().pc, 0x8000);
}

#[test]
fn test_nmi_pushes_clear_break_flag() {
    let (mut cpu, mut bus) = boot(&[0xEA]);
    cpu.trigger_nmi();
    assert_eq!(cpu.pending_interrupt(), Interrupt::Nmi);
    assert_eq!(cpu.step(&mut bus), 7);
    assert_eq!(cpu.pending_interrupt(), Interrupt::None);
    assert_eq!(bus.0[0x01FB] & StatusFlags::BREAK, 0);
    assert_eq!(bus.0[0x01FB] & StatusFlags::UNUSED, StatusFlags::UNUSED);
    // The interrupted instruction has not run
    assert_eq!(bus.0[0x01FC], 0x00);
}

#[test]
fn test_irq_masked_by_interrupt_flag() {
    // Reset leaves I set
    let (mut cpu, mut bus) = boot(&[0x58, 0xEA]);
    cpu.trigger_irq();
    assert_eq!(cpu.pending_interrupt(), Interrupt::None);

    // CLI, then the IRQ is taken
    cpu.step(&mut bus);
    cpu.trigger_irq();
    assert_eq!(cpu.pending_interrupt(), Interrupt::Irq);
    assert_eq!(cpu.step(&mut bus), 7);
    assert!(cpu.status().interrupt);
}

#[test]
fn test_plp_forces_unused_clears_break() {
    // LDA #$FF; PHA; PLP
    let (mut cpu, mut bus) = boot(&[0xA9, 0xFF, 0x48, 0x28]);
    for _ in 0..3 {
        cpu.step(&mut bus);
    }
    assert_eq!(cpu.status().to_u8(), 0xEF);
}

#[test]
fn test_rmw_accumulator_and_memory() {
    // LDA #$81; ASL A; ROR $10
    let (mut cpu, mut bus) = boot(&[0xA9, 0x81, 0x0A, 0x66, 0x10]);
    bus.0[0x0010] = 0x02;
    cpu.step(&mut bus);
    cpu.step(&mut bus);
    assert_eq!(cpu.registers().a, 0x02);
    assert!(cpu.status().carry);
    assert_eq!(cpu.step(&mut bus), 5);
    assert_eq!(bus.0[0x0010], 0x81);
    assert!(!cpu.status().carry);
}

#[test]
fn test_undocumented_opcodes_are_nops() {
    // LAX $10 would load A and X on hardware
    let (mut cpu, mut bus) = boot(&[0xA7, 0x10]);
    bus.0[0x0010] = 0x55;
    assert_eq!(cpu.step(&mut bus), 3);
    assert_eq!(cpu.registers().pc, 0x8002);
    assert_eq!(cpu.registers().a, 0);
    assert_eq!(cpu.registers().x, 0);
}

#[test]
fn test_kil_jams_cpu() {
    let (mut cpu, mut bus) = boot(&[0x02]);
    for _ in 0..4 {
        cpu.step(&mut bus);
    }
    assert_eq!(cpu.registers().pc, 0x8000);
}

#[test]
fn test_cycle_counter_accumulates() {
    // LDA #$01 (2); STA $0200 (4); NOP (2)
    let (mut cpu, mut bus) = boot(&[0xA9, 0x01, 0x8D, 0x00, 0x02, 0xEA]);
    let total: u32 = (0..3).map(|_| cpu.step(&mut bus)).sum();
    assert_eq!(total, 8);
    assert_eq!(cpu.cycles(), 8);
    assert_eq!(bus.0[0x0200], 0x01);
}

#[test]
fn test_decode_table_shape() {
    let lda = opcode::decode(0xB9);
    assert_eq!(lda.opcode, Opcode::LDA);
    assert_eq!(lda.mode, AddressingMode::AbsoluteY);
    assert_eq!((lda.size, lda.cycles, lda.page_cycles), (3, 4, 1));
    assert_eq!(opcode::decode(0x02).size, 0);
}
