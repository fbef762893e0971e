//! One serial channel of the DUART.

use super::fifo::{ReceiveFifo, SerialReceiver};
use super::registers::{ChannelCommand, ChannelStatus};
use log::debug;
use num_traits::FromPrimitive;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// DUART serial channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Channel A (console on the rosco_m68k)
    A = 0,
    /// Channel B
    B = 1,
}

/// Callback receiving every byte the guest transmits.
pub type TransmitCallback = Box<dyn FnMut(Channel, u8)>;

/// Callback handle that can be cloned out of the chip before it is invoked.
pub(crate) type SharedTransmitter = Rc<RefCell<TransmitCallback>>;

/// Channel register offsets after removing the channel B base.
const REG_MODE: u8 = 0x0;
const REG_STATUS_CLOCK: u8 = 0x1;
const REG_COMMAND: u8 = 0x2;
const REG_HOLDING: u8 = 0x3;

/// Per-channel UART core.
///
/// The transmitter always reports ready and empty while enabled. A byte
/// written to the holding register is queued for the callback and handed
/// over by the chip's owner once it has released the chip.
pub struct Duart68681Uart {
    channel: Channel,
    fifo: Arc<ReceiveFifo>,
    transmitter_enabled: bool,
    mode: [u8; 2],
    mode_pointer: usize,
    clock_select: u8,
    transmitter: Option<SharedTransmitter>,
    transmitted: VecDeque<u8>,
}

impl Duart68681Uart {
    /// Create a channel in its reset state.
    pub fn new(channel: Channel) -> Self {
        let mut uart = Self {
            channel,
            fifo: Arc::new(ReceiveFifo::new()),
            transmitter_enabled: false,
            mode: [0; 2],
            mode_pointer: 0,
            clock_select: 0,
            transmitter: None,
            transmitted: VecDeque::new(),
        };
        uart.reset();
        uart
    }

    /// Disable both directions, empty the FIFO and clear the mode latches.
    ///
    /// The transmit callback stays registered; undelivered bytes are lost.
    pub fn reset(&mut self) {
        self.fifo.reset();
        self.transmitted.clear();
        self.transmitter_enabled = false;
        self.mode = [0; 2];
        self.mode_pointer = 0;
        self.clock_select = 0;
    }

    /// Channel identity.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Register the transmit callback, replacing any previous one.
    pub fn set_transmitter(&mut self, transmitter: TransmitCallback) {
        self.transmitter = Some(Rc::new(RefCell::new(transmitter)));
    }

    /// Oldest byte waiting for delivery, with the callback it goes to.
    pub(crate) fn take_transmitted(&mut self) -> Option<(SharedTransmitter, u8)> {
        let byte = self.transmitted.pop_front()?;
        let transmitter = self.transmitter.clone()?;
        Some((transmitter, byte))
    }

    /// Handle feeding this channel's FIFO from any thread.
    pub(crate) fn receiver(&self, standby: Arc<AtomicBool>) -> SerialReceiver {
        SerialReceiver::new(self.channel, self.fifo.clone(), standby)
    }

    /// Queue a received byte (dropped if disabled or full).
    pub fn receive(&self, byte: u8) -> bool {
        self.fifo.push(byte)
    }

    /// Whether the receiver accepts bytes.
    pub fn receiver_enabled(&self) -> bool {
        self.fifo.receiver_enabled()
    }

    /// Whether the transmitter is enabled.
    pub fn transmitter_enabled(&self) -> bool {
        self.transmitter_enabled
    }

    /// Last value written to the clock select register.
    pub fn clock_select(&self) -> u8 {
        self.clock_select
    }

    /// Number of buffered received bytes.
    pub fn pending(&self) -> usize {
        self.fifo.len()
    }

    /// Interrupt bits: bit 0 Tx ready, bit 1 Rx ready.
    pub fn poll_for_interrupt(&self) -> u8 {
        let mut bits = 0;
        if self.transmitter_enabled {
            bits |= 0x01;
        }
        if !self.fifo.is_empty() {
            bits |= 0x02;
        }
        bits
    }

    /// Status register value.
    pub fn status(&self) -> ChannelStatus {
        let mut status = ChannelStatus::empty();
        if self.transmitter_enabled {
            status |= ChannelStatus::TX_READY | ChannelStatus::TX_EMPTY;
        }
        let pending = self.fifo.len();
        if pending > 2 {
            status |= ChannelStatus::FIFO_FULL;
        }
        if pending > 0 {
            status |= ChannelStatus::RX_READY;
        }
        status
    }

    /// Read a channel register (offset 0x0..=0x3).
    pub fn bus_read(&mut self, offset: u8) -> u8 {
        match offset {
            REG_MODE => {
                let mode = self.mode[self.mode_pointer];
                self.mode_pointer = 1;
                mode
            }
            REG_STATUS_CLOCK => self.status().bits(),
            REG_HOLDING => self.fifo.pop().unwrap_or(0),
            _ => 0,
        }
    }

    /// Write a channel register (offset 0x0..=0x3).
    ///
    /// Returns the miscellaneous command carried by a command-register
    /// write so the chip can act on chip-wide commands (standby).
    pub fn bus_write(&mut self, offset: u8, data: u8) -> Option<ChannelCommand> {
        match offset {
            REG_MODE => {
                self.mode[self.mode_pointer] = data;
                self.mode_pointer = 1;
                None
            }
            REG_STATUS_CLOCK => {
                self.clock_select = data;
                None
            }
            REG_COMMAND => self.command(data),
            REG_HOLDING => {
                self.transmit(data);
                None
            }
            _ => None,
        }
    }

    fn command(&mut self, data: u8) -> Option<ChannelCommand> {
        match data & 0x03 {
            0x01 => self.fifo.set_receiver_enabled(true),
            0x02 => self.fifo.set_receiver_enabled(false),
            _ => {}
        }
        match data & 0x0C {
            0x04 => self.transmitter_enabled = true,
            0x08 => self.transmitter_enabled = false,
            _ => {}
        }

        let command = ChannelCommand::from_u8(data >> 4)?;
        match command {
            ChannelCommand::Nop => {}
            ChannelCommand::ResetModePointer => self.mode_pointer = 0,
            ChannelCommand::ResetReceiver => self.fifo.reset(),
            ChannelCommand::ResetTransmitter => self.transmitter_enabled = false,
            // Error and break status are never raised.
            ChannelCommand::ResetErrorStatus | ChannelCommand::ResetBreakInterrupt => {}
            // Chip-wide; handled by the caller.
            ChannelCommand::Standby | ChannelCommand::Active => {}
            other => debug!("channel {:?}: ignoring command {other:?}", self.channel),
        }
        Some(command)
    }

    fn transmit(&mut self, data: u8) {
        // Without a callback the byte leaves on an unconnected line.
        if self.transmitter_enabled && self.transmitter.is_some() {
            self.transmitted.push_back(data);
        }
    }
}
