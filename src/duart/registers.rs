//! XR68C681 register map.
//!
//! Sixteen register addresses, each with a distinct meaning on read and on
//! write. On the rosco_m68k board register `n` sits at `io_base + 2n + 1`.
//!
//! | Addr | Read                  | Write                    |
//! |------|-----------------------|--------------------------|
//! | 0x0  | MR1A/MR2A             | MR1A/MR2A                |
//! | 0x1  | SRA                   | CSRA                     |
//! | 0x2  | MISR (masked ISR)     | CRA                      |
//! | 0x3  | RHRA                  | THRA                     |
//! | 0x4  | IPCR                  | ACR                      |
//! | 0x5  | ISR                   | IMR                      |
//! | 0x6  | CTU                   | CTU                      |
//! | 0x7  | CTL                   | CTL                      |
//! | 0x8  | MR1B/MR2B             | MR1B/MR2B                |
//! | 0x9  | SRB                   | CSRB                     |
//! | 0xA  | reserved              | CRB                      |
//! | 0xB  | RHRB                  | THRB                     |
//! | 0xC  | IVR                   | IVR                      |
//! | 0xD  | IP (input port)       | OPCR                     |
//! | 0xE  | start counter command | set output port bits     |
//! | 0xF  | stop counter command  | reset output port bits   |

use bitflags::bitflags;
use num_derive::FromPrimitive;

/// Registers selected by a read access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum ReadRegister {
    /// Channel A mode register (MR1A, then MR2A)
    ModeA = 0x0,
    /// Channel A status
    StatusA = 0x1,
    /// Interrupt status masked by IMR
    MaskedInterruptStatus = 0x2,
    /// Channel A receive holding register
    ReceiveA = 0x3,
    /// Input port change register
    InputPortChange = 0x4,
    /// Interrupt status
    InterruptStatus = 0x5,
    /// Counter/timer upper byte
    CounterUpper = 0x6,
    /// Counter/timer lower byte
    CounterLower = 0x7,
    /// Channel B mode register
    ModeB = 0x8,
    /// Channel B status
    StatusB = 0x9,
    /// Reserved
    Reserved = 0xA,
    /// Channel B receive holding register
    ReceiveB = 0xB,
    /// Interrupt vector register
    InterruptVector = 0xC,
    /// Input port pin levels
    InputPort = 0xD,
    /// Start counter/timer (read side effect)
    StartCounter = 0xE,
    /// Stop counter/timer (read side effect)
    StopCounter = 0xF,
}

/// Registers selected by a write access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum WriteRegister {
    /// Channel A mode register
    ModeA = 0x0,
    /// Channel A clock select
    ClockSelectA = 0x1,
    /// Channel A command
    CommandA = 0x2,
    /// Channel A transmit holding register
    TransmitA = 0x3,
    /// Auxiliary control register
    AuxiliaryControl = 0x4,
    /// Interrupt mask register
    InterruptMask = 0x5,
    /// Counter/timer upper byte
    CounterUpper = 0x6,
    /// Counter/timer lower byte
    CounterLower = 0x7,
    /// Channel B mode register
    ModeB = 0x8,
    /// Channel B clock select
    ClockSelectB = 0x9,
    /// Channel B command
    CommandB = 0xA,
    /// Channel B transmit holding register
    TransmitB = 0xB,
    /// Interrupt vector register
    InterruptVector = 0xC,
    /// Output port configuration (not modeled)
    OutputPortConfig = 0xD,
    /// Set output port bits (drives pins low)
    SetOutputBits = 0xE,
    /// Reset output port bits (drives pins high)
    ResetOutputBits = 0xF,
}

/// Miscellaneous commands in the upper nibble of a channel command write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum ChannelCommand {
    /// No operation
    Nop = 0x0,
    /// Point the mode register pointer back at MR1
    ResetModePointer = 0x1,
    /// Disable the receiver and flush its FIFO
    ResetReceiver = 0x2,
    /// Disable the transmitter
    ResetTransmitter = 0x3,
    /// Clear error flags in the status register
    ResetErrorStatus = 0x4,
    /// Clear the break-change interrupt
    ResetBreakInterrupt = 0x5,
    /// Start break
    StartBreak = 0x6,
    /// Stop break
    StopBreak = 0x7,
    /// Set Rx baud-rate extend bit
    SetRxExtend = 0x8,
    /// Clear Rx baud-rate extend bit
    ClearRxExtend = 0x9,
    /// Set Tx baud-rate extend bit
    SetTxExtend = 0xA,
    /// Clear Tx baud-rate extend bit
    ClearTxExtend = 0xB,
    /// Enter standby (whole chip)
    Standby = 0xC,
    /// Leave standby
    Active = 0xD,
    /// Reserved
    ReservedE = 0xE,
    /// Reserved
    ReservedF = 0xF,
}

bitflags! {
    /// Interrupt status register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InterruptStatus: u8 {
        /// Channel A transmitter ready
        const TX_READY_A = 0x01;
        /// Channel A receiver ready
        const RX_READY_A = 0x02;
        /// Channel A break change (never raised)
        const BREAK_A = 0x04;
        /// Counter ready
        const COUNTER_READY = 0x08;
        /// Channel B transmitter ready
        const TX_READY_B = 0x10;
        /// Channel B receiver ready
        const RX_READY_B = 0x20;
        /// Channel B break change (never raised)
        const BREAK_B = 0x40;
        /// Input port change
        const INPUT_CHANGE = 0x80;
    }
}

bitflags! {
    /// Channel status register bits that the emulation reports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChannelStatus: u8 {
        /// At least one received byte is waiting
        const RX_READY = 0x01;
        /// More than two received bytes are waiting
        const FIFO_FULL = 0x02;
        /// Transmit holding register can accept a byte
        const TX_READY = 0x04;
        /// Transmitter is idle
        const TX_EMPTY = 0x08;
    }
}

bitflags! {
    /// Output port bits as wired on the rosco_m68k.
    ///
    /// A set register bit drives the pin low.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OutputPins: u8 {
        /// OP2: SPI chip select 1 (active low)
        const SPI_CS1 = 0x04;
        /// OP3: red LED (lit when low)
        const LED_RED = 0x08;
        /// OP4: SPI clock
        const SPI_CLK = 0x10;
        /// OP5: green LED (lit when low)
        const LED_GREEN = 0x20;
        /// OP6: SPI data out (MOSI)
        const SPI_MOSI = 0x40;
        /// OP7: SPI chip select 2 (active low)
        const SPI_CS2 = 0x80;
    }
}

/// Input port bit carrying SPI data in (MISO, IP2).
pub const INPUT_SPI_MISO: u8 = 0x04;

/// Input port width mask (IP0..IP5).
pub const INPUT_PORT_MASK: u8 = 0x3F;

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn test_every_address_decodes() {
        for addr in 0..16u8 {
            assert!(ReadRegister::from_u8(addr).is_some());
            assert!(WriteRegister::from_u8(addr).is_some());
            assert!(ChannelCommand::from_u8(addr).is_some());
        }
        assert!(ReadRegister::from_u8(16).is_none());
    }

    #[test]
    fn test_channel_b_mirrors_channel_a_layout() {
        assert_eq!(WriteRegister::CommandB as u8 - 8, WriteRegister::CommandA as u8);
        assert_eq!(ReadRegister::ReceiveB as u8 - 8, ReadRegister::ReceiveA as u8);
    }
}
