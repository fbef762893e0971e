//! rosco_m68k board emulation.
//!
//! The board ties a 68000 core to its bus:
//!
//! - RAM from address 0
//! - ROM window (1 MiB at 0xE00000 by default)
//! - I/O window (top 1 MiB), DUART registers on odd addresses of its first
//!   0x20 bytes
//! - Interrupt controller with the DUART on level 4
//!
//! Memory map (defaults):
//! - 0x000000 - 0x0FFFFF: RAM
//! - 0xE00000 - 0xEFFFFF: ROM
//! - 0xF00001 - 0xF0001F: XR68C681 DUART (odd addresses)
//!
//! At reset the ROM is overlaid at address 0 so the CPU can fetch its
//! initial stack pointer and program counter, then the overlay is removed.

use crate::clock::{Clock, SystemClock};
use crate::config::{BoardConfig, MemoryMap, ADDRESS_SPACE_END};
use crate::cpu_backend::{Cpu68k, CpuBus, DefaultCpu, Disassembly, Registers};
use crate::duart::{Channel, Duart68681, SerialReceiver};
use crate::interrupts::{InterruptController, SharedSource};
#[cfg(feature = "sdcard")]
use crate::spi::{sdcard::SdCard, SpiSelect};
use crate::{BoardError, Result};
use log::info;
use std::cell::RefCell;
use std::ops::RangeInclusive;
use std::rc::Rc;
use std::sync::Arc;

/// 24-bit address bus mask.
const ADDRESS_MASK: u32 = ADDRESS_SPACE_END - 1;

/// Memory and peripheral subsystem (separate from CPU to avoid borrow issues).
pub struct BoardBus {
    map: MemoryMap,
    ram: Vec<u8>,
    rom: Vec<u8>,
    /// ROM visible at address 0 (reset vector fetch)
    boot_overlay: bool,
    controller: InterruptController,
    duart: Rc<RefCell<Duart68681>>,
    /// IPL latched before the current instruction
    ipl: u8,
}

impl BoardBus {
    fn new(
        map: MemoryMap,
        duart_level: u8,
        image: &[u8],
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        map.validate()?;
        let capacity = map.rom_window() as usize;
        if image.len() > capacity {
            return Err(BoardError::RomTooLarge {
                size: image.len(),
                capacity,
            });
        }
        let mut rom = vec![0; capacity];
        rom[..image.len()].copy_from_slice(image);

        let duart = Rc::new(RefCell::new(Duart68681::with_clock(clock)));
        let mut controller = InterruptController::new();
        let source: SharedSource = duart.clone();
        if !controller.source_add(source, duart_level) {
            return Err(BoardError::InvalidConfig(format!(
                "cannot attach DUART at interrupt level {duart_level}"
            )));
        }

        Ok(Self {
            map,
            ram: vec![0; map.ram_size as usize],
            rom,
            boot_overlay: false,
            controller,
            duart,
            ipl: 0,
        })
    }

    /// Memory layout.
    pub fn memory_map(&self) -> &MemoryMap {
        &self.map
    }

    /// Interrupt controller.
    pub fn controller(&self) -> &InterruptController {
        &self.controller
    }

    /// Interrupt controller (mutable, for attaching further sources).
    pub fn controller_mut(&mut self) -> &mut InterruptController {
        &mut self.controller
    }

    /// Shared handle to the DUART.
    pub fn duart(&self) -> Rc<RefCell<Duart68681>> {
        self.duart.clone()
    }

    /// Whether the ROM is overlaid at address 0.
    pub fn boot_overlay(&self) -> bool {
        self.boot_overlay
    }

    fn read_ram_region(&self, addr: u32) -> u8 {
        let slot = if self.boot_overlay { &self.rom } else { &self.ram };
        slot.get(addr as usize).copied().unwrap_or(0)
    }

    /// Side-effect-free byte read; I/O space reads as 0.
    pub fn peek8(&self, addr: u32) -> u8 {
        let addr = addr & ADDRESS_MASK;
        if self.map.in_ram(addr) {
            return self.read_ram_region(addr);
        }
        if let Some(offset) = self.map.rom_offset(addr) {
            return self.rom[offset];
        }
        0
    }

    /// Read a byte.
    pub fn read8(&mut self, addr: u32) -> u8 {
        let addr = addr & ADDRESS_MASK;

        if self.map.in_ram(addr) {
            return self.read_ram_region(addr);
        }

        if let Some(offset) = self.map.rom_offset(addr) {
            return self.rom[offset];
        }

        // DUART (odd addresses only)
        if let Some(register) = self.map.duart_register(addr) {
            return self.duart.borrow_mut().bus_read(register);
        }

        0
    }

    /// Write a byte. ROM and unmapped writes are discarded.
    ///
    /// Bytes the DUART transmits are handed to their callbacks after the
    /// register write has released the chip.
    pub fn write8(&mut self, addr: u32, value: u8) {
        let addr = addr & ADDRESS_MASK;

        if self.map.in_ram(addr) {
            self.ram[addr as usize] = value;
            return;
        }

        if self.map.rom_offset(addr).is_some() {
            return;
        }

        if let Some(register) = self.map.duart_register(addr) {
            self.duart.borrow_mut().bus_write(register, value);
            Duart68681::deliver_transmitted(&self.duart);
        }
    }

    /// Read a big-endian word as two byte accesses.
    pub fn read16(&mut self, addr: u32) -> u16 {
        ((self.read8(addr) as u16) << 8) | self.read8(addr.wrapping_add(1)) as u16
    }

    /// Write a big-endian word as two byte accesses.
    pub fn write16(&mut self, addr: u32, value: u16) {
        self.write8(addr, (value >> 8) as u8);
        self.write8(addr.wrapping_add(1), value as u8);
    }

    /// Vector for the interrupt acknowledged at `level`.
    pub fn read_irq_user_vector(&mut self, level: u8) -> u16 {
        self.controller.mpu_read_vector(level) as u16
    }
}

impl CpuBus for BoardBus {
    fn read8(&mut self, addr: u32) -> u8 {
        BoardBus::read8(self, addr)
    }

    fn read16(&mut self, addr: u32) -> u16 {
        BoardBus::read16(self, addr)
    }

    fn write8(&mut self, addr: u32, value: u8) {
        BoardBus::write8(self, addr, value);
    }

    fn write16(&mut self, addr: u32, value: u16) {
        BoardBus::write16(self, addr, value);
    }

    fn peek16(&self, addr: u32) -> u16 {
        ((self.peek8(addr) as u16) << 8) | self.peek8(addr.wrapping_add(1)) as u16
    }

    fn interrupt_level(&self) -> u8 {
        self.ipl
    }

    fn read_irq_user_vector(&mut self, level: u8) -> u16 {
        BoardBus::read_irq_user_vector(self, level)
    }

    fn reset_instruction(&mut self) {
        // RESET drives the peripheral reset line.
        self.controller.reset();
    }
}

/// rosco_m68k single-board computer.
pub struct Board<C: Cpu68k = DefaultCpu> {
    /// 68000 CPU
    cpu: C,
    /// Memory and peripherals
    bus: BoardBus,
}

impl<C: Cpu68k> Board<C> {
    /// Build a board from `config`, loading the ROM image from disk.
    pub fn new(config: &BoardConfig) -> Result<Self> {
        let image = std::fs::read(&config.rom).map_err(|source| BoardError::RomIo {
            path: config.rom.clone(),
            source,
        })?;
        Self::with_rom(config, &image)
    }

    /// Build a board from `config` with an in-memory ROM image.
    pub fn with_rom(config: &BoardConfig, image: &[u8]) -> Result<Self> {
        Self::with_clock(config, image, Arc::new(SystemClock::new()))
    }

    /// Build a board whose DUART timer reads `clock`.
    pub fn with_clock(config: &BoardConfig, image: &[u8], clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let bus = BoardBus::new(config.memory_map, config.duart_level, image, clock)?;
        let mut board = Self { cpu: C::new(), bus };
        info!(
            "rosco_m68k board: {} KiB RAM, {} byte ROM at 0x{:06X}, DUART on level {}",
            config.memory_map.ram_size / 1024,
            image.len(),
            config.memory_map.rom_base,
            config.duart_level
        );
        board.reset();
        Ok(board)
    }

    /// Reset peripherals and the CPU.
    ///
    /// The ROM is overlaid at address 0 while the CPU fetches its reset
    /// vectors.
    pub fn reset(&mut self) {
        self.bus.controller.reset();
        self.bus.ipl = 0;
        self.bus.boot_overlay = true;
        self.cpu.reset(&mut self.bus);
        self.bus.boot_overlay = false;
        info!("reset: PC=0x{:06X}", self.cpu.pc());
    }

    /// Execute `steps` instructions, sampling the interrupt level before
    /// each one. Returns the cycles consumed.
    pub fn run(&mut self, steps: usize) -> usize {
        let mut cycles = 0;
        for _ in 0..steps {
            self.bus.ipl = self.bus.controller.mpu_poll_interrupt();
            cycles += self.cpu.step(&mut self.bus);
        }
        cycles
    }

    /// Read a byte through the bus (with peripheral side effects).
    pub fn read8(&mut self, addr: u32) -> u8 {
        self.bus.read8(addr)
    }

    /// Read a word through the bus.
    pub fn read16(&mut self, addr: u32) -> u16 {
        self.bus.read16(addr)
    }

    /// Write a byte through the bus.
    pub fn write8(&mut self, addr: u32, value: u8) {
        self.bus.write8(addr, value);
    }

    /// Write a word through the bus.
    pub fn write16(&mut self, addr: u32, value: u16) {
        self.bus.write16(addr, value);
    }

    /// Vector for the interrupt acknowledged at `level`.
    pub fn read_irq_user_vector(&mut self, level: u8) -> u16 {
        self.bus.read_irq_user_vector(level)
    }

    /// Copy `data` into RAM at `addr`.
    pub fn upload(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let start = addr as usize;
        let end = start.checked_add(data.len());
        match end {
            Some(end) if end <= self.bus.ram.len() => {
                self.bus.ram[start..end].copy_from_slice(data);
                Ok(())
            }
            _ => Err(BoardError::UploadOutOfRange {
                address: addr,
                len: data.len(),
            }),
        }
    }

    /// Read a byte for memory dumps: RAM and ROM only, I/O reads as 0.
    pub fn peek(&self, addr: u32) -> u8 {
        self.bus.peek8(addr)
    }

    /// RAM address range.
    pub fn ram_extents(&self) -> RangeInclusive<u32> {
        0..=self.bus.map.ram_size - 1
    }

    /// ROM window address range.
    pub fn rom_extents(&self) -> RangeInclusive<u32> {
        let map = &self.bus.map;
        map.rom_base..=map.rom_base + (map.rom_window() - 1)
    }

    /// CPU register snapshot.
    pub fn registers(&self) -> Registers {
        self.cpu.registers()
    }

    /// Disassemble the instruction at `addr`.
    pub fn disassemble(&self, addr: u32) -> Disassembly {
        self.cpu.disassemble(&self.bus, addr)
    }

    /// Current interrupt level latched for the CPU.
    pub fn interrupt_level(&self) -> u8 {
        self.bus.ipl
    }

    /// Shared handle to the DUART.
    pub fn duart(&self) -> Rc<RefCell<Duart68681>> {
        self.bus.duart()
    }

    /// Thread-safe serial input handle for `channel`.
    pub fn serial_receiver(&self, channel: Channel) -> SerialReceiver {
        self.bus.duart.borrow_mut().receiver(channel)
    }

    /// Attach an SD card behind `select`.
    #[cfg(feature = "sdcard")]
    pub fn attach_sd_card(&mut self, select: SpiSelect, card: SdCard) {
        self.bus
            .duart
            .borrow_mut()
            .attach_spi_device(select, Box::new(card));
    }

    /// The CPU.
    pub fn cpu(&self) -> &C {
        &self.cpu
    }

    /// The CPU (mutable).
    pub fn cpu_mut(&mut self) -> &mut C {
        &mut self.cpu
    }

    /// Memory and peripherals.
    pub fn bus(&self) -> &BoardBus {
        &self.bus
    }

    /// Memory and peripherals (mutable).
    pub fn bus_mut(&mut self) -> &mut BoardBus {
        &mut self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn bus() -> BoardBus {
        let rom = [0x00, 0x10, 0x00, 0x00, 0x00, 0xE0, 0x00, 0x08];
        BoardBus::new(
            MemoryMap::default(),
            4,
            &rom,
            Arc::new(ManualClock::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_ram_round_trip_and_mask() {
        let mut bus = bus();
        bus.write16(0x1000, 0xBEEF);
        assert_eq!(bus.read8(0x1000), 0xBE);
        assert_eq!(bus.read16(0xFF00_1000), 0xBEEF);
    }

    #[test]
    fn test_rom_is_read_only() {
        let mut bus = bus();
        assert_eq!(bus.read8(0xE00005), 0xE0);
        bus.write8(0xE00005, 0x12);
        assert_eq!(bus.read8(0xE00005), 0xE0);
    }

    #[test]
    fn test_unmapped_reads_zero() {
        let mut bus = bus();
        bus.write8(0x200000, 0x55);
        assert_eq!(bus.read8(0x200000), 0);
        assert_eq!(bus.read8(0xF00100), 0);
    }

    #[test]
    fn test_boot_overlay_shows_rom_at_zero() {
        let mut bus = bus();
        bus.write8(0x5, 0x77);
        bus.boot_overlay = true;
        assert_eq!(bus.read8(0x5), 0xE0);
        bus.boot_overlay = false;
        assert_eq!(bus.read8(0x5), 0x77);
    }

    #[test]
    fn test_oversized_rom_rejected() {
        let map = MemoryMap {
            rom_size: 4,
            ..MemoryMap::default()
        };
        let result = BoardBus::new(map, 4, &[0; 8], Arc::new(ManualClock::new()));
        assert!(matches!(
            result,
            Err(BoardError::RomTooLarge { size: 8, capacity: 4 })
        ));
    }

    #[test]
    fn test_top_of_memory_rom_variant() {
        let map = MemoryMap {
            rom_base: 0xFC_0000,
            ..MemoryMap::default()
        };
        let mut bus =
            BoardBus::new(map, 4, &[0x4E, 0x71], Arc::new(ManualClock::new())).unwrap();
        assert_eq!(bus.read16(0xFC0000), 0x4E71);
        assert_eq!(bus.read8(0xFFFFFF), 0x00);

        bus.write8(0xFC0001, 0x00);
        assert_eq!(bus.read8(0xFC0001), 0x71);

        // The DUART sits below the ROM window and stays live.
        bus.write8(0xF00019, 0x42);
        assert_eq!(bus.read8(0xF00019), 0x42);
    }

    #[test]
    fn test_rom_image_limited_to_clipped_window() {
        let map = MemoryMap {
            rom_base: 0xFC_0000,
            ..MemoryMap::default()
        };
        let result = BoardBus::new(map, 4, &[0; 0x4_0001], Arc::new(ManualClock::new()));
        assert!(matches!(
            result,
            Err(BoardError::RomTooLarge { capacity: 0x4_0000, .. })
        ));
    }

    #[test]
    fn test_peek_skips_io() {
        let mut bus = bus();
        bus.write8(0xF00019, 0x42);
        assert_eq!(bus.read8(0xF00019), 0x42);
        assert_eq!(bus.peek8(0xF00019), 0);
        assert_eq!(bus.peek16(0xE00004), 0x00E0);
    }
}
