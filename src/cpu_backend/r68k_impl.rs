//! [`Cpu68k`] on top of the r68k interpreter.
//!
//! # Safety Architecture
//!
//! The r68k core owns both its `AddressBus` and its `InterruptController`,
//! but the board's bus is external state that the core only borrows for one
//! step. Both are therefore zero-sized proxies that reach the current
//! [`CpuBus`] through a thread-local raw pointer.
//!
//! ## Safety Invariants
//!
//! 1. **Single-threaded execution**: `BUS_CONTEXT` is thread-local, and a
//!    backend instance is `!Send` through the raw pointer it stores.
//!
//! 2. **Scoped lifetime**: the pointer is installed immediately before
//!    `execute1()` and removed immediately after, so it never outlives the
//!    `&mut B` borrow it was created from.
//!
//! 3. **No re-entrancy**: `step()` must not be called from inside a bus
//!    callback.
//!
//! Outside a step the proxies behave as an empty bus: reads return 0, writes
//! are dropped, and no interrupt is pending.

use super::{disasm, Cpu68k, CpuBus, Disassembly, Registers};
use r68k::cpu::{ConfiguredCore, ProcessingState};
use r68k::interrupts::InterruptController;
use r68k::ram::{AddressBus, AddressSpace};
use std::cell::UnsafeCell;

// SAFETY: see module docs. The UnsafeCell lets the proxies, which only get
// `&self` on the read paths, reach a mutable bus.
thread_local! {
    static BUS_CONTEXT: UnsafeCell<Option<*mut dyn CpuBusDyn>> = const { UnsafeCell::new(None) };
}

/// Object-safe view of [`CpuBus`] for thread-local storage.
trait CpuBusDyn {
    fn read8(&mut self, addr: u32) -> u8;
    fn read16(&mut self, addr: u32) -> u16;
    fn write8(&mut self, addr: u32, value: u8);
    fn write16(&mut self, addr: u32, value: u16);
    fn interrupt_level(&self) -> u8;
    fn read_irq_user_vector(&mut self, level: u8) -> u16;
    fn reset_instruction(&mut self);
}

impl<B: CpuBus> CpuBusDyn for B {
    fn read8(&mut self, addr: u32) -> u8 {
        CpuBus::read8(self, addr)
    }
    fn read16(&mut self, addr: u32) -> u16 {
        CpuBus::read16(self, addr)
    }
    fn write8(&mut self, addr: u32, value: u8) {
        CpuBus::write8(self, addr, value);
    }
    fn write16(&mut self, addr: u32, value: u16) {
        CpuBus::write16(self, addr, value);
    }
    fn interrupt_level(&self) -> u8 {
        CpuBus::interrupt_level(self)
    }
    fn read_irq_user_vector(&mut self, level: u8) -> u16 {
        CpuBus::read_irq_user_vector(self, level)
    }
    fn reset_instruction(&mut self) {
        CpuBus::reset_instruction(self);
    }
}

/// Run `f` against the installed bus, or return `idle` if none is installed.
fn with_bus<R>(idle: R, f: impl FnOnce(&mut dyn CpuBusDyn) -> R) -> R {
    BUS_CONTEXT.with(|ctx| {
        // SAFETY: the pointer, when present, was installed by `step()` from a
        // live `&mut B` and is removed before that borrow ends. Nothing else
        // dereferences it concurrently on this thread.
        unsafe {
            match *ctx.get() {
                Some(ptr) => f(&mut *ptr),
                None => idle,
            }
        }
    })
}

/// Install `bus` for the duration of `f`.
fn with_installed<B: CpuBus, R>(bus: &mut B, f: impl FnOnce() -> R) -> R {
    let ptr: *mut (dyn CpuBusDyn + '_) = bus as *mut B;
    // SAFETY: only the trait-object lifetime is erased; the pointer is
    // removed again before `bus` is released.
    let ptr: *mut (dyn CpuBusDyn + 'static) = unsafe { std::mem::transmute(ptr) };
    BUS_CONTEXT.with(|ctx| {
        // SAFETY: exclusive access to this thread's cell.
        unsafe { *ctx.get() = Some(ptr) };
    });

    let result = f();

    BUS_CONTEXT.with(|ctx| {
        // SAFETY: clearing the pointer ensures it cannot be used after `bus`
        // goes out of scope.
        unsafe { *ctx.get() = None };
    });
    result
}

/// Proxy AddressBus that delegates to the installed [`CpuBus`].
#[derive(Clone, Copy, Default)]
pub struct ProxyBus;

impl AddressBus for ProxyBus {
    fn copy_from(&mut self, _other: &Self) {
        // No-op: state is external
    }

    fn read_byte(&self, _address_space: AddressSpace, address: u32) -> u32 {
        with_bus(0, |bus| bus.read8(address) as u32)
    }

    fn read_word(&self, _address_space: AddressSpace, address: u32) -> u32 {
        with_bus(0, |bus| bus.read16(address) as u32)
    }

    fn read_long(&self, address_space: AddressSpace, address: u32) -> u32 {
        let hi = self.read_word(address_space, address);
        let lo = self.read_word(address_space, address.wrapping_add(2));
        (hi << 16) | lo
    }

    fn write_byte(&mut self, _address_space: AddressSpace, address: u32, value: u32) {
        with_bus((), |bus| bus.write8(address, value as u8));
    }

    fn write_word(&mut self, _address_space: AddressSpace, address: u32, value: u32) {
        with_bus((), |bus| bus.write16(address, value as u16));
    }

    fn write_long(&mut self, address_space: AddressSpace, address: u32, value: u32) {
        self.write_word(address_space, address, value >> 16);
        self.write_word(address_space, address.wrapping_add(2), value & 0xFFFF);
    }

    fn reset_instruction(&mut self) {
        with_bus((), |bus| bus.reset_instruction());
    }
}

/// Proxy interrupt controller: the IPL and acknowledge cycle come from the
/// installed [`CpuBus`].
#[derive(Clone, Copy, Default)]
pub struct ProxyInterrupts;

impl InterruptController for ProxyInterrupts {
    fn reset_external_devices(&mut self) {
        // Peripherals are reset through `CpuBus::reset_instruction`.
    }

    fn highest_priority(&self) -> u8 {
        with_bus(0, |bus| bus.interrupt_level())
    }

    fn acknowledge_interrupt(&mut self, priority: u8) -> Option<u8> {
        with_bus(None, |bus| Some(bus.read_irq_user_vector(priority) as u8))
    }
}

type Core = ConfiguredCore<ProxyInterrupts, ProxyBus>;

fn fresh_core() -> Core {
    let mut cpu = ConfiguredCore::new_with(0, ProxyInterrupts, ProxyBus);
    cpu.set_cycle_granularity(4);
    cpu
}

/// r68k CPU backend.
pub struct R68kBackend {
    cpu: Core,
}

impl Cpu68k for R68kBackend {
    fn new() -> Self {
        Self { cpu: fresh_core() }
    }

    fn reset<B: CpuBus>(&mut self, bus: &mut B) {
        // A fresh core is in supervisor state with interrupts masked; load
        // SSP and PC from the reset vectors through the bus.
        let mut cpu = fresh_core();
        let read_long = |bus: &mut B, addr: u32| {
            ((bus.read16(addr) as u32) << 16) | bus.read16(addr + 2) as u32
        };
        cpu.dar[15] = read_long(bus, 0);
        cpu.pc = read_long(bus, 4);
        cpu.prefetch_addr = !0;
        cpu.processing_state = ProcessingState::Normal;
        self.cpu = cpu;
    }

    fn step<B: CpuBus>(&mut self, bus: &mut B) -> usize {
        let cpu = &mut self.cpu;
        let cycles = with_installed(bus, || cpu.execute1());
        cycles.0 as usize
    }

    fn registers(&self) -> Registers {
        let mut d = [0; 8];
        let mut a = [0; 8];
        d.copy_from_slice(&self.cpu.dar[..8]);
        a.copy_from_slice(&self.cpu.dar[8..]);
        Registers {
            pc: self.cpu.pc,
            sr: self.cpu.status_register(),
            d,
            a,
            vbr: 0,
        }
    }

    fn disassemble<B: CpuBus>(&self, bus: &B, addr: u32) -> Disassembly {
        disasm::disassemble(|a| bus.peek16(a), addr)
    }

    fn pc(&self) -> u32 {
        self.cpu.pc
    }

    fn set_pc(&mut self, pc: u32) {
        self.cpu.pc = pc;
        // Invalidate the prefetch queue so the next step fetches at `pc`.
        self.cpu.prefetch_addr = !0;
    }

    fn is_stopped(&self) -> bool {
        matches!(
            self.cpu.processing_state,
            ProcessingState::Stopped | ProcessingState::Halted
        )
    }
}
