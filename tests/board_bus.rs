use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use approx::assert_relative_eq;
use rosco_m68k::cpu_backend::disassemble;
use rosco_m68k::{
    Board, BoardConfig, BoardError, Channel, Cpu68k, CpuBus, Disassembly, ManualClock, Registers,
    UNINITIALIZED_VECTOR,
};

const IO_BASE: u32 = 0xF00000;

/// Address of DUART register `n`.
const fn duart(n: u32) -> u32 {
    IO_BASE + (n << 1) + 1
}

const MRA: u32 = duart(0x0);
const CRA: u32 = duart(0x2);
const MISR: u32 = duart(0x2);
const RHRA: u32 = duart(0x3);
const CRB: u32 = duart(0xA);
const RHRB: u32 = duart(0xB);
const THRA: u32 = duart(0x3);
const ACR: u32 = duart(0x4);
const ISR: u32 = duart(0x5);
const IMR: u32 = duart(0x5);
const CTU: u32 = duart(0x6);
const CTL: u32 = duart(0x7);
const IVR: u32 = duart(0xC);
const START_COUNTER: u32 = duart(0xE);
const STOP_COUNTER: u32 = duart(0xF);

/// Instruction-free CPU: every step acknowledges any pending interrupt
/// above its mask and records the vector.
#[derive(Default)]
struct FakeCpu {
    pc: u32,
    ssp: u32,
    mask: u8,
    acknowledged: Vec<(u8, u16)>,
    levels_seen: Vec<u8>,
}

impl Cpu68k for FakeCpu {
    fn new() -> Self {
        Self::default()
    }

    fn reset<B: CpuBus>(&mut self, bus: &mut B) {
        self.ssp = ((bus.read16(0) as u32) << 16) | bus.read16(2) as u32;
        self.pc = ((bus.read16(4) as u32) << 16) | bus.read16(6) as u32;
        self.mask = 0;
    }

    fn step<B: CpuBus>(&mut self, bus: &mut B) -> usize {
        let level = bus.interrupt_level();
        self.levels_seen.push(level);
        if level > self.mask {
            let vector = bus.read_irq_user_vector(level);
            self.acknowledged.push((level, vector));
        }
        self.pc += 2;
        4
    }

    fn registers(&self) -> Registers {
        let mut a = [0; 8];
        a[7] = self.ssp;
        Registers {
            pc: self.pc,
            sr: 0x2700,
            a,
            ..Registers::default()
        }
    }

    fn disassemble<B: CpuBus>(&self, bus: &B, addr: u32) -> Disassembly {
        disassemble(|a| bus.peek16(a), addr)
    }

    fn pc(&self) -> u32 {
        self.pc
    }

    fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }

    fn is_stopped(&self) -> bool {
        false
    }
}

fn rom() -> Vec<u8> {
    let mut rom = vec![0u8; 0x100];
    // Initial SSP 0x00100000, PC 0x00E00008
    rom[..8].copy_from_slice(&[0x00, 0x10, 0x00, 0x00, 0x00, 0xE0, 0x00, 0x08]);
    // nop; bra.s *
    rom[8..12].copy_from_slice(&[0x4E, 0x71, 0x60, 0xFE]);
    rom
}

fn board_with_clock() -> (ManualClock, Board<FakeCpu>) {
    let clock = ManualClock::new();
    let config = BoardConfig::new("unused.rom");
    let board = Board::with_clock(&config, &rom(), Arc::new(clock.clone())).unwrap();
    (clock, board)
}

#[test]
fn reset_fetches_vectors_through_overlay() {
    let (_clock, board) = board_with_clock();
    let regs = board.registers();
    assert_eq!(regs.pc, 0xE00008);
    assert_eq!(regs.a[7], 0x100000);
    // Overlay is gone after reset: RAM at 0 is blank again.
    assert_eq!(board.peek(0x0005), 0x00);
    assert!(!board.bus().boot_overlay());
}

#[test]
fn duart_registers_on_odd_addresses_only() {
    let (_clock, mut board) = board_with_clock();
    board.write8(IVR, 0x45);
    assert_eq!(board.read8(IVR), 0x45);
    // io_base + 4 is an even address: inert.
    board.write8(IO_BASE + 4, 0xFF);
    assert_eq!(board.read8(IO_BASE + 4), 0);
    // io_base + 5 is register 2 (CRA on write, MISR on read).
    board.write8(IO_BASE + 5, 0x05);
    board.write8(IMR, 0x01);
    assert_eq!(board.read8(IO_BASE + 5), 0x01);
    // Past the DUART window.
    assert_eq!(board.read8(IO_BASE + 0x21), 0);
}

#[test]
fn word_access_is_big_endian_pairs() {
    let (_clock, mut board) = board_with_clock();
    board.write16(0x2000, 0x1234);
    assert_eq!(board.read8(0x2000), 0x12);
    assert_eq!(board.read8(0x2001), 0x34);
    // Word read at an even DUART address sees the odd register in the low byte.
    board.write8(IVR, 0x66);
    assert_eq!(board.read16(IVR - 1), 0x0066);
}

#[test]
fn duart_level_four_receive_scenario() {
    let (_clock, mut board) = board_with_clock();
    board.write8(IVR, 0x45);
    board.write8(IMR, 0x02);
    board.write8(CRA, 0x01);

    board.run(1);
    assert_eq!(board.interrupt_level(), 0);

    board.duart().borrow_mut().serial_port_receive(Channel::A, b'x');
    board.run(1);
    assert_eq!(board.interrupt_level(), 4);
    assert_eq!(board.cpu().acknowledged, vec![(4, 0x45)]);
    assert_eq!(board.read8(ISR) & 0x02, 0x02);
    assert_eq!(board.read8(MISR), 0x02);

    assert_eq!(board.read8(RHRA), b'x');
    board.run(1);
    assert_eq!(board.interrupt_level(), 0);
    assert_eq!(board.cpu().levels_seen, vec![0, 4, 0]);
}

#[test]
fn unconfigured_vector_reads_uninitialized() {
    let (_clock, mut board) = board_with_clock();
    assert_eq!(board.read_irq_user_vector(4), UNINITIALIZED_VECTOR as u16);
    assert_eq!(board.read_irq_user_vector(3), UNINITIALIZED_VECTOR as u16);
    board.write8(IVR, 0x40);
    assert_eq!(board.read_irq_user_vector(4), 0x40);
    assert!(board.bus_mut().controller_mut().source_disable_level(4));
    assert_eq!(board.read_irq_user_vector(4), UNINITIALIZED_VECTOR as u16);
}

#[test]
fn serial_receiver_feeds_from_another_thread() -> anyhow::Result<()> {
    let (_clock, mut board) = board_with_clock();
    board.write8(CRA, 0x01);
    let receiver = board.serial_receiver(Channel::A);

    let sent = std::thread::spawn(move || receiver.send_all(b"ok")).join();
    assert_eq!(sent.map_err(|_| anyhow::anyhow!("sender panicked"))?, 2);
    assert_eq!(board.read8(RHRA), b'o');
    assert_eq!(board.read8(RHRA), b'k');
    assert_eq!(board.read8(RHRA), 0);
    Ok(())
}

#[test]
fn transmit_reaches_callback() {
    let (_clock, mut board) = board_with_clock();
    let out = Rc::new(RefCell::new(String::new()));
    let sink = out.clone();
    board.duart().borrow_mut().set_serial_transmitter(
        Channel::A,
        Box::new(move |_, byte| sink.borrow_mut().push(byte as char)),
    );
    board.write8(CRA, 0x04);
    for byte in b"hi" {
        board.write8(THRA, *byte);
    }
    assert_eq!(out.borrow().as_str(), "hi");
}

#[test]
fn transmit_callback_can_loop_back_into_the_duart() {
    let (_clock, mut board) = board_with_clock();
    let duart = Rc::downgrade(&board.duart());
    board.duart().borrow_mut().set_serial_transmitter(
        Channel::A,
        Box::new(move |_, byte| {
            if let Some(duart) = duart.upgrade() {
                duart.borrow_mut().serial_port_receive(Channel::B, byte);
            }
        }),
    );
    board.write8(CRA, 0x05);
    board.write8(CRB, 0x01);
    board.write8(THRA, b'Q');
    assert_eq!(board.read8(RHRB), b'Q');
    assert_eq!(board.read8(RHRB), 0);
}

#[test]
fn counter_timer_ticks_with_injected_clock() {
    let (clock, mut board) = board_with_clock();
    board.write8(IVR, 0x50);
    board.write8(ACR, 0x60);
    board.write8(CTU, (1800u16 >> 8) as u8);
    board.write8(CTL, 1800u16 as u8);
    board.write8(IMR, 0x08);
    assert_eq!(board.read8(START_COUNTER), 0);

    let period = board
        .duart()
        .borrow()
        .timer_period()
        .expect("timer running");
    assert_relative_eq!(period.as_secs_f64() * 1000.0, 0.9765625, epsilon = 1e-9);

    board.run(1);
    assert_eq!(board.interrupt_level(), 0);

    // Counter ready is raised exactly when the first period has elapsed.
    clock.set(period - Duration::from_nanos(1));
    assert_eq!(board.read8(ISR) & 0x08, 0);
    board.run(1);
    assert_eq!(board.interrupt_level(), 0);

    clock.set(period);
    assert_eq!(board.read8(ISR) & 0x08, 0x08);
    board.run(1);
    assert_eq!(board.interrupt_level(), 4);
    assert_eq!(board.cpu().acknowledged, vec![(4, 0x50)]);

    // Stop counter acknowledges until the next period elapses.
    board.read8(STOP_COUNTER);
    board.run(1);
    assert_eq!(board.interrupt_level(), 0);

    clock.set(period * 2);
    board.run(1);
    assert_eq!(board.interrupt_level(), 4);
}

#[test]
fn standby_silences_the_chip() {
    let (_clock, mut board) = board_with_clock();
    board.write8(IVR, 0x45);
    board.write8(CRA, 0x05);
    board.write8(IMR, 0x01);
    board.run(1);
    assert_eq!(board.interrupt_level(), 4);

    board.write8(CRA, 0xC0);
    board.run(1);
    assert_eq!(board.interrupt_level(), 0);
    assert_eq!(board.read8(IVR), 0);

    board.write8(CRA, 0xD0);
    assert_eq!(board.read8(IVR), 0x45);
    board.run(1);
    assert_eq!(board.interrupt_level(), 4);
}

#[test]
fn mode_register_pointer_through_bus() {
    let (_clock, mut board) = board_with_clock();
    board.write8(CRA, 0x10);
    board.write8(MRA, 0x13);
    board.write8(MRA, 0x07);
    board.write8(CRA, 0x10);
    assert_eq!(board.read8(MRA), 0x13);
    assert_eq!(board.read8(MRA), 0x07);
}

#[test]
fn rom_at_top_of_memory() -> anyhow::Result<()> {
    let config = BoardConfig::from_json(
        r#"{ "rom": "top.rom", "memory_map": { "rom_base": 16515072 } }"#,
    )?;
    let mut rom = rom();
    rom[5] = 0xFC;
    let mut board: Board<FakeCpu> =
        Board::with_clock(&config, &rom, Arc::new(ManualClock::new()))?;

    assert_eq!(board.registers().pc, 0xFC0008);
    assert_eq!(board.rom_extents(), 0xFC0000..=0xFFFFFF);
    assert_eq!(board.read16(0xFC0008), 0x4E71);
    assert_eq!(board.disassemble(0xFC0008).text, "nop");

    board.write8(IVR, 0x47);
    assert_eq!(board.read8(IVR), 0x47);
    Ok(())
}

#[test]
fn upload_and_extents() {
    let (_clock, mut board) = board_with_clock();
    board.upload(0x400, &[1, 2, 3]).unwrap();
    assert_eq!(board.peek(0x401), 2);
    assert!(matches!(
        board.upload(0xFFFFF, &[1, 2]),
        Err(BoardError::UploadOutOfRange { address: 0xFFFFF, len: 2 })
    ));
    assert_eq!(board.ram_extents(), 0..=0x0FFFFF);
    assert_eq!(board.rom_extents(), 0xE00000..=0xEFFFFF);
}

#[test]
fn disassembles_rom_without_io_side_effects() {
    let (_clock, board) = board_with_clock();
    assert_eq!(board.disassemble(0xE00008).text, "nop");
    let line = board.disassemble(0xE0000A);
    assert_eq!(line.text, "bra.s $E0000A");
    assert_eq!(line.length, 2);
}

#[test]
fn rom_loaded_from_config_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("boot.rom"), rom())?;
    let config_path = dir.path().join("board.json");
    std::fs::write(&config_path, r#"{ "rom": "boot.rom", "duart_level": 4 }"#)?;

    let config = BoardConfig::load(&config_path)?;
    let board: Board<FakeCpu> = Board::new(&config)?;
    assert_eq!(board.registers().pc, 0xE00008);
    Ok(())
}

#[test]
fn missing_rom_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = BoardConfig::new(dir.path().join("absent.rom"));
    let result: Result<Board<FakeCpu>, _> = Board::new(&config);
    assert!(matches!(result, Err(BoardError::RomIo { .. })));
}

#[test]
fn oversized_rom_is_an_error() {
    let config = BoardConfig::new("big.rom");
    let image = vec![0u8; 0x10_0001];
    let result: Result<Board<FakeCpu>, _> = Board::with_rom(&config, &image);
    assert!(matches!(result, Err(BoardError::RomTooLarge { .. })));
}
