//! CPU module - 2A03 (6502 variant) implementation
//!
//! The NES uses a modified 6502 CPU without decimal mode. The CPU does not
//! own any memory; every access goes through a [`Bus`] supplied per step, so
//! the same core can run against the console memory map or a flat test
//! buffer.

use std::fmt;

use bincode::{Decode, Encode};

use crate::opcode::{self, AddressingMode, InstructionInfo, Opcode};
use crate::state::{ensure, StateError};

/// NTSC CPU clock rate in Hz
pub const CPU_FREQUENCY: u32 = 1_789_773;

/// Vector addresses
pub const NMI_VECTOR: u16 = 0xFFFA;
pub const RESET_VECTOR: u16 = 0xFFFC;
pub const IRQ_VECTOR: u16 = 0xFFFE;

/// Cycles taken by the NMI/IRQ entry sequence
pub const INTERRUPT_CYCLES: u32 = 7;

/// CPU-visible memory
pub trait Bus {
    /// Read a byte from the bus
    fn read(&mut self, address: u16) -> u8;
    /// Write a byte to the bus
    fn write(&mut self, address: u16, value: u8);
}

/// 2A03 CPU registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct CpuRegisters {
    pub a: u8,    // Accumulator
    pub x: u8,    // X index register
    pub y: u8,    // Y index register
    pub sp: u8,   // Stack pointer
    pub pc: u16,  // Program counter
}

impl Default for CpuRegisters {
    fn default() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            sp: 0xFD, // Stack starts at $01FD
            pc: 0,    // Will be set by reset vector
        }
    }
}

/// CPU status flags, one field per bit of P
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct StatusFlags {
    pub carry: bool,
    pub zero: bool,
    pub interrupt: bool,
    pub decimal: bool,
    pub brk: bool,
    pub unused: bool,
    pub overflow: bool,
    pub negative: bool,
}

impl StatusFlags {
    pub const CARRY: u8 = 0b0000_0001;
    pub const ZERO: u8 = 0b0000_0010;
    pub const INTERRUPT: u8 = 0b0000_0100;
    pub const DECIMAL: u8 = 0b0000_1000;
    pub const BREAK: u8 = 0b0001_0000;
    pub const UNUSED: u8 = 0b0010_0000;
    pub const OVERFLOW: u8 = 0b0100_0000;
    pub const NEGATIVE: u8 = 0b1000_0000;

    /// Unpack a status byte
    pub fn from_u8(value: u8) -> Self {
        Self {
            carry: value & Self::CARRY != 0,
            zero: value & Self::ZERO != 0,
            interrupt: value & Self::INTERRUPT != 0,
            decimal: value & Self::DECIMAL != 0,
            brk: value & Self::BREAK != 0,
            unused: value & Self::UNUSED != 0,
            overflow: value & Self::OVERFLOW != 0,
            negative: value & Self::NEGATIVE != 0,
        }
    }

    /// Pack the flags into a status byte
    pub fn to_u8(self) -> u8 {
        let mut value = 0;
        for (set, bit) in [
            (self.carry, Self::CARRY),
            (self.zero, Self::ZERO),
            (self.interrupt, Self::INTERRUPT),
            (self.decimal, Self::DECIMAL),
            (self.brk, Self::BREAK),
            (self.unused, Self::UNUSED),
            (self.overflow, Self::OVERFLOW),
            (self.negative, Self::NEGATIVE),
        ] {
            if set {
                value |= bit;
            }
        }
        value
    }

    /// Set Z and N from a result byte
    fn set_zn(&mut self, value: u8) {
        self.zero = value == 0;
        self.negative = value & 0x80 != 0;
    }
}

impl fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "C:{} Z:{} I:{} D:{} B:{} U:{} V:{} N:{}",
            self.carry as u8,
            self.zero as u8,
            self.interrupt as u8,
            self.decimal as u8,
            self.brk as u8,
            self.unused as u8,
            self.overflow as u8,
            self.negative as u8
        )
    }
}

/// Interrupt latched for the next step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub enum Interrupt {
    #[default]
    None,
    Nmi,
    Irq,
}

/// Resolved operand of the instruction being executed
#[derive(Debug, Clone, Copy)]
struct Operand {
    address: u16,
    /// PC after the instruction bytes were consumed
    pc: u16,
    mode: AddressingMode,
}

/// 2A03 CPU
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct Cpu {
    registers: CpuRegisters,
    status: StatusFlags,
    /// Total cycles executed
    cycles: u64,
    interrupt: Interrupt,
    /// Cycles to idle before the next instruction
    stall: u32,
}

impl Cpu {
    /// Create a CPU in its power-on state. Call [`Cpu::reset`] to load PC.
    pub fn new() -> Self {
        Self {
            status: StatusFlags::from_u8(0x24),
            ..Self::default()
        }
    }

    /// Load PC from the reset vector and reinitialize SP and flags
    pub fn reset(&mut self, bus: &mut impl Bus) {
        self.registers.pc = read16(bus, RESET_VECTOR);
        self.registers.sp = 0xFD;
        self.status = StatusFlags::from_u8(0x24);
    }

    /// Get CPU registers
    pub fn registers(&self) -> &CpuRegisters {
        &self.registers
    }

    /// Get mutable CPU registers
    pub fn registers_mut(&mut self) -> &mut CpuRegisters {
        &mut self.registers
    }

    /// Get status flags
    pub fn status(&self) -> StatusFlags {
        self.status
    }

    /// Replace the status flags
    pub fn set_status(&mut self, status: StatusFlags) {
        self.status = status;
    }

    /// Total cycles executed since power-on
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Remaining stall cycles
    pub fn stall(&self) -> u32 {
        self.stall
    }

    /// Add idle cycles, e.g. for DMC sample fetches
    pub fn add_stall(&mut self, cycles: u32) {
        self.stall += cycles;
    }

    /// Charge the cycles taken by a 256-byte OAM DMA transfer
    pub fn stall_for_oam_dma(&mut self) {
        self.stall += 513;
        if self.cycles % 2 == 1 {
            self.stall += 1;
        }
    }

    /// Check a decoded state before it replaces the live one. Stalls are
    /// at most a DMA transfer plus a few DMC fetches.
    pub fn validate(&self) -> Result<(), StateError> {
        ensure(self.stall <= u16::MAX as u32, "CPU stall")
    }

    /// Pending interrupt
    pub fn pending_interrupt(&self) -> Interrupt {
        self.interrupt
    }

    /// Latch an NMI for the next step
    pub fn trigger_nmi(&mut self) {
        self.interrupt = Interrupt::Nmi;
    }

    /// Latch an IRQ for the next step unless interrupts are disabled
    pub fn trigger_irq(&mut self) {
        if !self.status.interrupt {
            self.interrupt = Interrupt::Irq;
        }
    }

    /// Execute one unit of work and return the CPU cycles it consumed.
    ///
    /// A stalled CPU burns a single cycle. A pending interrupt runs its
    /// 7-cycle entry sequence instead of an instruction. Otherwise the
    /// instruction at PC executes.
    pub fn step(&mut self, bus: &mut impl Bus) -> u32 {
        if self.stall > 0 {
            self.stall -= 1;
            self.cycles += 1;
            return 1;
        }

        match std::mem::take(&mut self.interrupt) {
            Interrupt::Nmi => return self.enter_interrupt(bus, NMI_VECTOR),
            Interrupt::Irq => return self.enter_interrupt(bus, IRQ_VECTOR),
            Interrupt::None => {}
        }

        let start = self.cycles;
        let info = opcode::decode(bus.read(self.registers.pc));
        let (address, page_crossed) = self.operand_address(bus, info.mode);

        self.registers.pc = self.registers.pc.wrapping_add(info.size as u16);
        self.cycles += info.cycles as u64;
        if page_crossed {
            self.cycles += info.page_cycles as u64;
        }

        let operand = Operand {
            address,
            pc: self.registers.pc,
            mode: info.mode,
        };
        self.execute(bus, info, operand);

        (self.cycles - start) as u32
    }

    fn enter_interrupt(&mut self, bus: &mut impl Bus, vector: u16) -> u32 {
        self.push16(bus, self.registers.pc);
        let mut pushed = self.status;
        pushed.brk = false;
        pushed.unused = true;
        self.push(bus, pushed.to_u8());
        self.registers.pc = read16(bus, vector);
        self.status.interrupt = true;
        self.cycles += INTERRUPT_CYCLES as u64;
        INTERRUPT_CYCLES
    }

    /// Effective address for a mode plus whether indexing crossed a page
    fn operand_address(&mut self, bus: &mut impl Bus, mode: AddressingMode) -> (u16, bool) {
        let pc = self.registers.pc;
        let x = self.registers.x as u16;
        let y = self.registers.y as u16;
        match mode {
            AddressingMode::Absolute => (read16(bus, pc.wrapping_add(1)), false),
            AddressingMode::AbsoluteX => {
                let base = read16(bus, pc.wrapping_add(1));
                let address = base.wrapping_add(x);
                (address, pages_differ(base, address))
            }
            AddressingMode::AbsoluteY => {
                let base = read16(bus, pc.wrapping_add(1));
                let address = base.wrapping_add(y);
                (address, pages_differ(base, address))
            }
            AddressingMode::Accumulator | AddressingMode::Implied => (0, false),
            AddressingMode::Immediate => (pc.wrapping_add(1), false),
            AddressingMode::IndexedIndirect => {
                let pointer = bus.read(pc.wrapping_add(1)).wrapping_add(self.registers.x);
                (read16_bug(bus, pointer as u16), false)
            }
            AddressingMode::Indirect => {
                let pointer = read16(bus, pc.wrapping_add(1));
                (read16_bug(bus, pointer), false)
            }
            AddressingMode::IndirectIndexed => {
                let pointer = bus.read(pc.wrapping_add(1)) as u16;
                let base = read16_bug(bus, pointer);
                let address = base.wrapping_add(y);
                (address, pages_differ(base, address))
            }
            AddressingMode::Relative => {
                let offset = bus.read(pc.wrapping_add(1)) as i8;
                (pc.wrapping_add(2).wrapping_add(offset as u16), false)
            }
            AddressingMode::ZeroPage => (bus.read(pc.wrapping_add(1)) as u16, false),
            AddressingMode::ZeroPageX => {
                (bus.read(pc.wrapping_add(1)).wrapping_add(self.registers.x) as u16, false)
            }
            AddressingMode::ZeroPageY => {
                (bus.read(pc.wrapping_add(1)).wrapping_add(self.registers.y) as u16, false)
            }
        }
    }

    fn execute(&mut self, bus: &mut impl Bus, info: &InstructionInfo, op: Operand) {
        match info.opcode {
            Opcode::ADC => {
                let value = bus.read(op.address);
                self.add_with_carry(value);
            }
            Opcode::SBC => {
                let value = bus.read(op.address);
                self.add_with_carry(!value);
            }
            Opcode::AND => {
                self.registers.a &= bus.read(op.address);
                self.status.set_zn(self.registers.a);
            }
            Opcode::ORA => {
                self.registers.a |= bus.read(op.address);
                self.status.set_zn(self.registers.a);
            }
            Opcode::EOR => {
                self.registers.a ^= bus.read(op.address);
                self.status.set_zn(self.registers.a);
            }
            Opcode::ASL => self.modify(bus, op, |cpu, value| {
                cpu.status.carry = value & 0x80 != 0;
                value << 1
            }),
            Opcode::LSR => self.modify(bus, op, |cpu, value| {
                cpu.status.carry = value & 0x01 != 0;
                value >> 1
            }),
            Opcode::ROL => self.modify(bus, op, |cpu, value| {
                let carry_in = cpu.status.carry as u8;
                cpu.status.carry = value & 0x80 != 0;
                (value << 1) | carry_in
            }),
            Opcode::ROR => self.modify(bus, op, |cpu, value| {
                let carry_in = (cpu.status.carry as u8) << 7;
                cpu.status.carry = value & 0x01 != 0;
                (value >> 1) | carry_in
            }),
            Opcode::BIT => {
                let value = bus.read(op.address);
                self.status.overflow = value & 0x40 != 0;
                self.status.negative = value & 0x80 != 0;
                self.status.zero = value & self.registers.a == 0;
            }

            Opcode::BCC => self.branch(!self.status.carry, op),
            Opcode::BCS => self.branch(self.status.carry, op),
            Opcode::BEQ => self.branch(self.status.zero, op),
            Opcode::BNE => self.branch(!self.status.zero, op),
            Opcode::BMI => self.branch(self.status.negative, op),
            Opcode::BPL => self.branch(!self.status.negative, op),
            Opcode::BVS => self.branch(self.status.overflow, op),
            Opcode::BVC => self.branch(!self.status.overflow, op),

            Opcode::BRK => {
                self.push16(bus, self.registers.pc);
                self.push_status(bus);
                self.status.interrupt = true;
                self.registers.pc = read16(bus, IRQ_VECTOR);
            }
            Opcode::JMP => self.registers.pc = op.address,
            Opcode::JSR => {
                self.push16(bus, self.registers.pc.wrapping_sub(1));
                self.registers.pc = op.address;
            }
            Opcode::RTS => self.registers.pc = self.pull16(bus).wrapping_add(1),
            Opcode::RTI => {
                self.pull_status(bus);
                self.registers.pc = self.pull16(bus);
            }

            Opcode::CLC => self.status.carry = false,
            Opcode::CLD => self.status.decimal = false,
            Opcode::CLI => self.status.interrupt = false,
            Opcode::CLV => self.status.overflow = false,
            Opcode::SEC => self.status.carry = true,
            Opcode::SED => self.status.decimal = true,
            Opcode::SEI => self.status.interrupt = true,

            Opcode::CMP => {
                let value = bus.read(op.address);
                self.compare(self.registers.a, value);
            }
            Opcode::CPX => {
                let value = bus.read(op.address);
                self.compare(self.registers.x, value);
            }
            Opcode::CPY => {
                let value = bus.read(op.address);
                self.compare(self.registers.y, value);
            }

            Opcode::DEC => {
                let value = bus.read(op.address).wrapping_sub(1);
                bus.write(op.address, value);
                self.status.set_zn(value);
            }
            Opcode::INC => {
                let value = bus.read(op.address).wrapping_add(1);
                bus.write(op.address, value);
                self.status.set_zn(value);
            }
            Opcode::DEX => {
                self.registers.x = self.registers.x.wrapping_sub(1);
                self.status.set_zn(self.registers.x);
            }
            Opcode::DEY => {
                self.registers.y = self.registers.y.wrapping_sub(1);
                self.status.set_zn(self.registers.y);
            }
            Opcode::INX => {
                self.registers.x = self.registers.x.wrapping_add(1);
                self.status.set_zn(self.registers.x);
            }
            Opcode::INY => {
                self.registers.y = self.registers.y.wrapping_add(1);
                self.status.set_zn(self.registers.y);
            }

            Opcode::LDA => {
                self.registers.a = bus.read(op.address);
                self.status.set_zn(self.registers.a);
            }
            Opcode::LDX => {
                self.registers.x = bus.read(op.address);
                self.status.set_zn(self.registers.x);
            }
            Opcode::LDY => {
                self.registers.y = bus.read(op.address);
                self.status.set_zn(self.registers.y);
            }
            Opcode::STA => bus.write(op.address, self.registers.a),
            Opcode::STX => bus.write(op.address, self.registers.x),
            Opcode::STY => bus.write(op.address, self.registers.y),

            Opcode::PHA => self.push(bus, self.registers.a),
            Opcode::PHP => self.push_status(bus),
            Opcode::PLA => {
                self.registers.a = self.pull(bus);
                self.status.set_zn(self.registers.a);
            }
            Opcode::PLP => self.pull_status(bus),

            Opcode::TAX => {
                self.registers.x = self.registers.a;
                self.status.set_zn(self.registers.x);
            }
            Opcode::TAY => {
                self.registers.y = self.registers.a;
                self.status.set_zn(self.registers.y);
            }
            Opcode::TSX => {
                self.registers.x = self.registers.sp;
                self.status.set_zn(self.registers.x);
            }
            Opcode::TXA => {
                self.registers.a = self.registers.x;
                self.status.set_zn(self.registers.a);
            }
            Opcode::TXS => self.registers.sp = self.registers.x,
            Opcode::TYA => {
                self.registers.a = self.registers.y;
                self.status.set_zn(self.registers.a);
            }

            // Undocumented opcodes only advance PC and charge cycles.
            Opcode::NOP
            | Opcode::AHX
            | Opcode::ALR
            | Opcode::ANC
            | Opcode::ARR
            | Opcode::AXS
            | Opcode::DCP
            | Opcode::ISC
            | Opcode::KIL
            | Opcode::LAS
            | Opcode::LAX
            | Opcode::RLA
            | Opcode::RRA
            | Opcode::SAX
            | Opcode::SHX
            | Opcode::SHY
            | Opcode::SLO
            | Opcode::SRE
            | Opcode::TAS
            | Opcode::XAA => {}
        }
    }

    fn add_with_carry(&mut self, value: u8) {
        let a = self.registers.a;
        let sum = a as u16 + value as u16 + self.status.carry as u16;
        let result = sum as u8;
        self.status.carry = sum > 0xFF;
        self.status.overflow = (a ^ value) & 0x80 == 0 && (a ^ result) & 0x80 != 0;
        self.registers.a = result;
        self.status.set_zn(result);
    }

    fn compare(&mut self, register: u8, value: u8) {
        self.status.set_zn(register.wrapping_sub(value));
        self.status.carry = register >= value;
    }

    /// Read-modify-write on the accumulator or memory
    fn modify(&mut self, bus: &mut impl Bus, op: Operand, f: impl FnOnce(&mut Self, u8) -> u8) {
        if op.mode == AddressingMode::Accumulator {
            let a = self.registers.a;
            let value = f(self, a);
            self.registers.a = value;
            self.status.set_zn(value);
        } else {
            let value = bus.read(op.address);
            let value = f(self, value);
            bus.write(op.address, value);
            self.status.set_zn(value);
        }
    }

    fn branch(&mut self, condition: bool, op: Operand) {
        if condition {
            self.registers.pc = op.address;
            self.cycles += 1;
            if pages_differ(op.pc, op.address) {
                self.cycles += 1;
            }
        }
    }

    fn push(&mut self, bus: &mut impl Bus, value: u8) {
        bus.write(0x100 | self.registers.sp as u16, value);
        self.registers.sp = self.registers.sp.wrapping_sub(1);
    }

    fn pull(&mut self, bus: &mut impl Bus) -> u8 {
        self.registers.sp = self.registers.sp.wrapping_add(1);
        bus.read(0x100 | self.registers.sp as u16)
    }

    fn push16(&mut self, bus: &mut impl Bus, value: u16) {
        self.push(bus, (value >> 8) as u8);
        self.push(bus, value as u8);
    }

    fn pull16(&mut self, bus: &mut impl Bus) -> u16 {
        let lo = self.pull(bus) as u16;
        let hi = self.pull(bus) as u16;
        (hi << 8) | lo
    }

    /// PHP and BRK push P with B set
    fn push_status(&mut self, bus: &mut impl Bus) {
        self.push(bus, self.status.to_u8() | StatusFlags::BREAK);
    }

    /// PLP and RTI drop B and force U
    fn pull_status(&mut self, bus: &mut impl Bus) {
        let value = self.pull(bus);
        self.status = StatusFlags::from_u8((value & !StatusFlags::BREAK) | StatusFlags::UNUSED);
    }
}

/// Little-endian 16-bit read
pub fn read16(bus: &mut impl Bus, address: u16) -> u16 {
    let lo = bus.read(address) as u16;
    let hi = bus.read(address.wrapping_add(1)) as u16;
    (hi << 8) | lo
}

/// 16-bit read where the high byte wraps within the page of the low byte
pub fn read16_bug(bus: &mut impl Bus, address: u16) -> u16 {
    let wrapped = (address & 0xFF00) | (address as u8).wrapping_add(1) as u16;
    let lo = bus.read(address) as u16;
    let hi = bus.read(wrapped) as u16;
    (hi << 8) | lo
}

fn pages_differ(a: u16, b: u16) -> bool {
    a & 0xFF00 != b & 0xFF00
}
