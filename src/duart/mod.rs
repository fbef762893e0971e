//! XR68C681 DUART emulation.
//!
//! The rosco_m68k uses its DUART for nearly everything besides memory:
//!
//! - Two serial channels (A is the console)
//! - Counter/timer, used as the system tick
//! - 6-bit input port and 8-bit output port (LEDs and bit-banged SPI)
//! - A single vectored interrupt output, wired to IPL level 4
//!
//! Register reads and writes arrive as a 4-bit register address (see
//! [`registers`]). Some reads act as commands (start/stop counter) and the
//! output port is driven through set/reset bit commands, so both directions
//! decode through [`ReadRegister`] / [`WriteRegister`].
//!
//! ## Interrupt status (ISR)
//!
//! | Bit | Source                                        |
//! |-----|-----------------------------------------------|
//! | 0   | Channel A Tx ready                            |
//! | 1   | Channel A Rx ready                            |
//! | 2   | Channel A break change (not modeled)          |
//! | 3   | Counter ready                                 |
//! | 4   | Channel B Tx ready                            |
//! | 5   | Channel B Rx ready                            |
//! | 6   | Channel B break change (not modeled)          |
//! | 7   | Input port change on an ACR-enabled pin       |

mod fifo;
pub mod registers;
mod timer;
mod uart;

pub use fifo::{ReceiveFifo, SerialReceiver, RECEIVE_FIFO_CAPACITY};
pub use registers::{ChannelStatus, InterruptStatus, OutputPins};
pub use timer::{timer_interval, CounterTimer, DUART_CRYSTAL_HZ};
pub use uart::{Channel, Duart68681Uart, TransmitCallback};

use crate::clock::{Clock, SystemClock};
use crate::interrupts::{InterruptSource, UNINITIALIZED_VECTOR};
use crate::spi::{SpiBus, SpiDevice, SpiSelect};
use log::debug;
use num_traits::FromPrimitive;
use registers::{ChannelCommand, ReadRegister, WriteRegister, INPUT_PORT_MASK, INPUT_SPI_MISO};
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uart::SharedTransmitter;

/// Offset between channel A and channel B register blocks.
const CHANNEL_B_OFFSET: u8 = 0x08;

/// Board LED state (true = lit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Leds {
    /// Red LED on OP3
    pub red: bool,
    /// Green LED on OP5
    pub green: bool,
}

/// XR68C681 dual UART with counter/timer and GPIO.
pub struct Duart68681 {
    port_a: Duart68681Uart,
    port_b: Duart68681Uart,
    interrupt_vector_register: u8,
    interrupt_mask_register: u8,
    auxiliary_control: u8,
    counter_timer: u16,
    output_port: u8,
    input_port_value: u8,
    input_port_changes: u8,
    standby: Arc<AtomicBool>,
    timer: CounterTimer,
    spi: SpiBus,
}

impl Duart68681 {
    /// Create a DUART timed by the host clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a DUART whose counter/timer reads `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let mut duart = Self {
            port_a: Duart68681Uart::new(Channel::A),
            port_b: Duart68681Uart::new(Channel::B),
            interrupt_vector_register: UNINITIALIZED_VECTOR,
            interrupt_mask_register: 0,
            auxiliary_control: 0,
            counter_timer: 0,
            output_port: 0,
            input_port_value: 0,
            input_port_changes: 0,
            standby: Arc::new(AtomicBool::new(false)),
            timer: CounterTimer::new(clock),
            spi: SpiBus::new(),
        };
        duart.reset();
        duart
    }

    /// Restore register defaults and reset both channels.
    ///
    /// The input port level and standby mode survive; pending input changes
    /// are reloaded from the current level.
    pub fn reset(&mut self) {
        self.interrupt_vector_register = UNINITIALIZED_VECTOR;
        self.interrupt_mask_register = 0;
        self.port_a.reset();
        self.port_b.reset();
        self.input_port_changes = self.input_port_value;
        self.auxiliary_control = 0;
        self.counter_timer = 0;
        self.output_port = 0;
        self.timer.reset();
        self.drive_spi();
    }

    fn port(&mut self, channel: Channel) -> &mut Duart68681Uart {
        match channel {
            Channel::A => &mut self.port_a,
            Channel::B => &mut self.port_b,
        }
    }

    /// Read a register (address 0x0..=0xF).
    ///
    /// Returns 0 with no side effects while in standby.
    pub fn bus_read(&mut self, address: u8) -> u8 {
        if self.is_standby() {
            return 0;
        }

        let Some(register) = ReadRegister::from_u8(address) else {
            return 0;
        };
        match register {
            ReadRegister::ModeA | ReadRegister::StatusA | ReadRegister::ReceiveA => {
                self.port_a.bus_read(address)
            }
            ReadRegister::ModeB | ReadRegister::StatusB | ReadRegister::ReceiveB => {
                self.port_b.bus_read(address - CHANNEL_B_OFFSET)
            }
            ReadRegister::MaskedInterruptStatus => self.get_isr() & self.interrupt_mask_register,
            ReadRegister::InputPortChange => {
                let ipcr = (self.input_port_value & 0x0F) | ((self.input_port_changes & 0x0F) << 4);
                self.input_port_changes = 0;
                ipcr
            }
            ReadRegister::InterruptStatus => self.get_isr(),
            ReadRegister::CounterUpper => (self.counter_timer >> 8) as u8,
            ReadRegister::CounterLower => self.counter_timer as u8,
            ReadRegister::InterruptVector => self.interrupt_vector_register,
            ReadRegister::InputPort => self.input_port_value,
            ReadRegister::StartCounter => {
                self.timer_start();
                0
            }
            ReadRegister::StopCounter => {
                self.timer_stop();
                0
            }
            ReadRegister::Reserved => 0,
        }
    }

    /// Write a register (address 0x0..=0xF).
    ///
    /// While in standby only an "active mode" channel command is accepted.
    pub fn bus_write(&mut self, address: u8, data: u8) {
        let Some(register) = WriteRegister::from_u8(address) else {
            return;
        };

        if self.is_standby() {
            if matches!(register, WriteRegister::CommandA | WriteRegister::CommandB)
                && ChannelCommand::from_u8(data >> 4) == Some(ChannelCommand::Active)
            {
                self.set_standby(false);
            }
            return;
        }

        match register {
            WriteRegister::ModeA
            | WriteRegister::ClockSelectA
            | WriteRegister::CommandA
            | WriteRegister::TransmitA => {
                let command = self.port_a.bus_write(address, data);
                self.chip_command(command);
            }
            WriteRegister::ModeB
            | WriteRegister::ClockSelectB
            | WriteRegister::CommandB
            | WriteRegister::TransmitB => {
                let command = self.port_b.bus_write(address - CHANNEL_B_OFFSET, data);
                self.chip_command(command);
            }
            WriteRegister::AuxiliaryControl => self.auxiliary_control = data,
            WriteRegister::InterruptMask => self.interrupt_mask_register = data,
            WriteRegister::CounterUpper => {
                self.counter_timer = (self.counter_timer & 0x00FF) | ((data as u16) << 8);
            }
            WriteRegister::CounterLower => {
                self.counter_timer = (self.counter_timer & 0xFF00) | data as u16;
            }
            WriteRegister::InterruptVector => self.interrupt_vector_register = data,
            WriteRegister::OutputPortConfig => {}
            WriteRegister::SetOutputBits => {
                self.output_port |= data;
                self.drive_spi();
            }
            WriteRegister::ResetOutputBits => {
                self.output_port &= !data;
                self.drive_spi();
            }
        }
    }

    fn chip_command(&mut self, command: Option<ChannelCommand>) {
        if command == Some(ChannelCommand::Standby) {
            self.set_standby(true);
        }
    }

    fn set_standby(&mut self, standby: bool) {
        let previous = self.standby.swap(standby, Ordering::AcqRel);
        if previous != standby {
            debug!("DUART {} standby", if standby { "entering" } else { "leaving" });
        }
    }

    /// Whether the chip is in standby mode.
    pub fn is_standby(&self) -> bool {
        self.standby.load(Ordering::Acquire)
    }

    /// Unmasked interrupt status. Recomputed on every call.
    pub fn get_isr(&mut self) -> u8 {
        let port_change = self.input_port_changes & self.auxiliary_control & 0x0F != 0;

        let mut isr = InterruptStatus::from_bits_retain(self.port_a.poll_for_interrupt());
        isr |= InterruptStatus::from_bits_retain(self.port_b.poll_for_interrupt() << 4);
        isr.set(InterruptStatus::INPUT_CHANGE, port_change);
        isr.set(InterruptStatus::COUNTER_READY, self.timer.check_interrupt());
        isr.bits()
    }

    /// Interrupt mask register.
    pub fn interrupt_mask(&self) -> u8 {
        self.interrupt_mask_register
    }

    /// Interrupt vector register.
    pub fn interrupt_vector(&self) -> u8 {
        self.interrupt_vector_register
    }

    /// Counter/timer preload.
    pub fn counter_timer(&self) -> u16 {
        self.counter_timer
    }

    /// Deliver a byte received on `channel`'s serial line.
    ///
    /// Ignored in standby, when the receiver is disabled, or when the FIFO
    /// is full.
    pub fn serial_port_receive(&mut self, channel: Channel, byte: u8) -> bool {
        if self.is_standby() {
            return false;
        }
        self.port(channel).receive(byte)
    }

    /// Where bytes the guest transmits on `channel` go.
    ///
    /// Bytes are handed over by [`Duart68681::deliver_transmitted`], never
    /// from inside a register write.
    pub fn set_serial_transmitter(&mut self, channel: Channel, transmitter: TransmitCallback) {
        self.port(channel).set_transmitter(transmitter);
    }

    /// Run the transmit callbacks for every queued byte, channel A first.
    ///
    /// No borrow of `chip` is held while a callback runs, so a callback may
    /// reach back into the chip through the same handle. Bytes queued by a
    /// callback are delivered before this returns. Returns the number of
    /// bytes delivered.
    pub fn deliver_transmitted(chip: &RefCell<Self>) -> usize {
        let mut delivered = 0;
        loop {
            let next = chip.borrow_mut().take_transmitted();
            let Some((channel, transmitter, byte)) = next else {
                return delivered;
            };
            (*transmitter.borrow_mut())(channel, byte);
            delivered += 1;
        }
    }

    fn take_transmitted(&mut self) -> Option<(Channel, SharedTransmitter, u8)> {
        if let Some((transmitter, byte)) = self.port_a.take_transmitted() {
            return Some((Channel::A, transmitter, byte));
        }
        self.port_b
            .take_transmitted()
            .map(|(transmitter, byte)| (Channel::B, transmitter, byte))
    }

    /// Thread-safe handle for feeding `channel` from outside the emulation
    /// thread.
    pub fn receiver(&mut self, channel: Channel) -> SerialReceiver {
        let standby = self.standby.clone();
        self.port(channel).receiver(standby)
    }

    /// Drive the input port pins (6 bits); records which pins changed.
    pub fn set_input_port(&mut self, value: u8) {
        let value = value & INPUT_PORT_MASK;
        self.input_port_changes = self.input_port_value ^ value;
        self.input_port_value = value;
    }

    /// Current input port level.
    pub fn input_port(&self) -> u8 {
        self.input_port_value
    }

    /// Output port register as latched (1 = pin driven low).
    pub fn read_output_port(&self) -> u8 {
        self.output_port
    }

    /// Physical output pin levels (1 = high).
    pub fn output_pins(&self) -> OutputPins {
        OutputPins::from_bits_retain(!self.output_port)
    }

    /// Board LEDs, lit when their pin is low.
    pub fn leds(&self) -> Leds {
        let pins = self.output_pins();
        Leds {
            red: !pins.contains(OutputPins::LED_RED),
            green: !pins.contains(OutputPins::LED_GREEN),
        }
    }

    /// Attach an SPI peripheral behind one of the output-port chip selects.
    ///
    /// Returns the device previously attached there, if any.
    pub fn attach_spi_device(
        &mut self,
        select: SpiSelect,
        device: Box<dyn SpiDevice>,
    ) -> Option<Box<dyn SpiDevice>> {
        let previous = self.spi.attach(select, device);
        self.drive_spi();
        previous
    }

    /// Detach the SPI peripheral behind `select`.
    pub fn detach_spi_device(&mut self, select: SpiSelect) -> Option<Box<dyn SpiDevice>> {
        let device = self.spi.detach(select);
        self.drive_spi();
        device
    }

    /// Start counter command (also reachable via a register read).
    pub fn timer_start(&mut self) {
        self.timer.start(self.auxiliary_control, self.counter_timer);
    }

    /// Stop counter command: acknowledges counter ready.
    pub fn timer_stop(&mut self) {
        self.timer.stop();
    }

    /// Period of the running counter/timer.
    pub fn timer_period(&self) -> Option<Duration> {
        self.timer.interval()
    }

    /// Counter-ready condition, advancing deadlines as needed.
    pub fn timer_check_interrupt(&mut self) -> bool {
        self.timer.check_interrupt()
    }

    fn drive_spi(&mut self) {
        let pins = self.output_pins();
        if let Some(miso) = self.spi.update(pins) {
            let value = if miso {
                self.input_port_value | INPUT_SPI_MISO
            } else {
                self.input_port_value & !INPUT_SPI_MISO
            };
            if value != self.input_port_value {
                self.set_input_port(value);
            }
        }
    }
}

impl Default for Duart68681 {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptSource for Duart68681 {
    fn reset(&mut self) {
        Duart68681::reset(self);
    }

    fn read_vector(&mut self) -> u8 {
        self.interrupt_vector_register
    }

    fn poll_for_interrupt(&mut self) -> bool {
        if self.is_standby() {
            return false;
        }
        self.get_isr() & self.interrupt_mask_register != 0
    }
}
