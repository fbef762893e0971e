//! Abstraction layer for the 68000 CPU backend.
//!
//! The board never executes instructions itself; it hands a [`CpuBus`] to a
//! [`Cpu68k`] implementation, which calls back for every memory access,
//! interrupt level sample and interrupt-acknowledge cycle. The default
//! backend wraps the `r68k` emulator.

mod disasm;
mod r68k_impl;

pub use disasm::disassemble;
pub use r68k_impl::R68kBackend;

/// Default CPU backend type alias.
pub type DefaultCpu = R68kBackend;

/// Bus interface consumed by CPU backends.
///
/// Implementations decode addresses onto RAM, ROM and memory-mapped
/// peripherals.
pub trait CpuBus {
    /// Read a byte.
    fn read8(&mut self, addr: u32) -> u8;

    /// Read a 16-bit word (big-endian).
    fn read16(&mut self, addr: u32) -> u16;

    /// Write a byte.
    fn write8(&mut self, addr: u32, value: u8);

    /// Write a 16-bit word (big-endian).
    fn write16(&mut self, addr: u32, value: u16);

    /// Read a word without peripheral side effects (debugger/disassembler
    /// access). I/O space reads as 0.
    fn peek16(&self, addr: u32) -> u16;

    /// Interrupt priority level currently presented on the IPL pins (0-7).
    fn interrupt_level(&self) -> u8;

    /// Vector supplied by the device acknowledged at `level`.
    fn read_irq_user_vector(&mut self, level: u8) -> u16;

    /// Called when the CPU executes a RESET instruction.
    fn reset_instruction(&mut self);
}

/// Snapshot of the programmer-visible register file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    /// Program counter
    pub pc: u32,
    /// Status register
    pub sr: u16,
    /// Data registers D0-D7
    pub d: [u32; 8],
    /// Address registers A0-A7 (A7 is the active stack pointer)
    pub a: [u32; 8],
    /// Vector base register (always 0 on a 68000)
    pub vbr: u32,
}

impl Registers {
    /// Carry flag.
    pub fn c(&self) -> bool {
        self.sr & 0x0001 != 0
    }

    /// Overflow flag.
    pub fn v(&self) -> bool {
        self.sr & 0x0002 != 0
    }

    /// Zero flag.
    pub fn z(&self) -> bool {
        self.sr & 0x0004 != 0
    }

    /// Negative flag.
    pub fn n(&self) -> bool {
        self.sr & 0x0008 != 0
    }

    /// Extend flag.
    pub fn x(&self) -> bool {
        self.sr & 0x0010 != 0
    }

    /// Supervisor state.
    pub fn s(&self) -> bool {
        self.sr & 0x2000 != 0
    }

    /// Trace flag.
    pub fn t(&self) -> bool {
        self.sr & 0x8000 != 0
    }

    /// Interrupt mask (SR bits 8-10).
    pub fn ipl(&self) -> u8 {
        ((self.sr >> 8) & 0x07) as u8
    }
}

/// One disassembled instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disassembly {
    /// Address of the first opcode word
    pub address: u32,
    /// Instruction length in bytes
    pub length: u32,
    /// Assembly text
    pub text: String,
}

/// Unified 68000 CPU interface.
pub trait Cpu68k {
    /// Create a new CPU instance.
    fn new() -> Self;

    /// Hardware reset: fetch the initial SSP and PC from vectors 0 and 1.
    fn reset<B: CpuBus>(&mut self, bus: &mut B);

    /// Execute a single instruction and return the number of cycles consumed.
    fn step<B: CpuBus>(&mut self, bus: &mut B) -> usize;

    /// Current register snapshot.
    fn registers(&self) -> Registers;

    /// Disassemble the instruction at `addr`.
    fn disassemble<B: CpuBus>(&self, bus: &B, addr: u32) -> Disassembly;

    /// Get the program counter.
    fn pc(&self) -> u32;

    /// Set the program counter.
    fn set_pc(&mut self, pc: u32);

    /// Check if the CPU is stopped or halted.
    fn is_stopped(&self) -> bool;
}
