//! SD card in SPI mode, backed by an in-memory image.
//!
//! Covers the commands the rosco_m68k firmware issues during card bring-up
//! and block reads:
//!
//! | Command | Response                                   |
//! |---------|--------------------------------------------|
//! | CMD0    | R1 (idle)                                  |
//! | CMD8    | R7: R1, version/voltage, echoed check byte |
//! | CMD16   | R1; block length up to 512                 |
//! | CMD17   | R1, then start token, data block, CRC      |
//! | CMD55   | R1; next command is application-specific   |
//! | ACMD41  | R1; leaves the idle state                  |
//! | CMD58   | R1 + OCR                                   |
//!
//! Anything else answers "illegal command". CRCs are neither checked nor
//! generated. The card powers up already in SPI mode, so it idles with
//! MISO high.

use super::SpiDevice;
use bitflags::bitflags;
use log::{debug, trace};
use std::collections::VecDeque;

/// Data block size in bytes.
pub const BLOCK_SIZE: usize = 512;

/// Length of a command frame (command byte, 4 argument bytes, CRC).
const COMMAND_LEN: usize = 6;

/// Data token preceding a single-block read.
const START_BLOCK_TOKEN: u8 = 0xFE;

/// OCR: 3.2-3.4V window.
const OCR_VOLTAGE_WINDOW: u32 = 0x00FF_8000;
/// OCR: power-up sequence finished.
const OCR_POWER_UP: u32 = 0x8000_0000;

bitflags! {
    /// R1 response bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct R1: u8 {
        /// Card is in the idle state
        const IDLE = 0x01;
        /// Erase reset
        const ERASE_RESET = 0x02;
        /// Illegal command
        const ILLEGAL_COMMAND = 0x04;
        /// Command CRC error
        const CRC_ERROR = 0x08;
        /// Erase sequence error
        const ERASE_SEQUENCE = 0x10;
        /// Misaligned or out-of-range address
        const ADDRESS_ERROR = 0x20;
        /// Argument out of range
        const PARAMETER_ERROR = 0x40;
    }
}

/// SD card peripheral for [`SpiBus`](super::SpiBus).
pub struct SdCard {
    image: Vec<u8>,
    selected: bool,
    command: [u8; COMMAND_LEN],
    command_len: usize,
    responses: VecDeque<u8>,
    idle: bool,
    app_command: bool,
    block_length: usize,
}

impl SdCard {
    /// Create a card holding `image`. The image is padded to whole blocks.
    pub fn new(mut image: Vec<u8>) -> Self {
        let remainder = image.len() % BLOCK_SIZE;
        if remainder != 0 {
            image.resize(image.len() + BLOCK_SIZE - remainder, 0);
        }
        Self {
            image,
            selected: false,
            command: [0; COMMAND_LEN],
            command_len: 0,
            responses: VecDeque::new(),
            idle: true,
            app_command: false,
            block_length: BLOCK_SIZE,
        }
    }

    /// Blank card of `blocks` blocks.
    pub fn blank(blocks: usize) -> Self {
        Self::new(vec![0; blocks * BLOCK_SIZE])
    }

    /// Backing image.
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Whether ACMD41 has completed initialization.
    pub fn is_initialized(&self) -> bool {
        !self.idle
    }

    /// Current block length (CMD16).
    pub fn block_length(&self) -> usize {
        self.block_length
    }

    fn status(&self) -> R1 {
        if self.idle {
            R1::IDLE
        } else {
            R1::empty()
        }
    }

    fn respond(&mut self, bytes: &[u8]) {
        self.responses.extend(bytes.iter().copied());
    }

    fn execute(&mut self) {
        let index = self.command[0] & 0x3F;
        let arg = u32::from_be_bytes([
            self.command[1],
            self.command[2],
            self.command[3],
            self.command[4],
        ]);
        let app = std::mem::take(&mut self.app_command);
        trace!("SD {}CMD{index} arg 0x{arg:08X}", if app { "A" } else { "" });

        match (app, index) {
            (_, 0) => {
                self.idle = true;
                self.block_length = BLOCK_SIZE;
                self.respond(&[R1::IDLE.bits()]);
            }
            (_, 8) => {
                let r1 = self.status().bits();
                let voltage = self.command[3] & 0x0F;
                let check = self.command[4];
                self.respond(&[r1, 0x00, 0x00, voltage, check]);
            }
            (_, 58) => {
                let mut ocr = OCR_VOLTAGE_WINDOW;
                if !self.idle {
                    ocr |= OCR_POWER_UP;
                }
                let r1 = self.status().bits();
                self.respond(&[r1]);
                self.respond(&ocr.to_be_bytes());
            }
            (_, 55) => {
                self.app_command = true;
                let r1 = self.status().bits();
                self.respond(&[r1]);
            }
            (true, 41) => {
                if self.idle {
                    debug!("SD card initialized");
                }
                self.idle = false;
                self.respond(&[R1::empty().bits()]);
            }
            (false, 16) => {
                let length = arg as usize;
                let r1 = if length == 0 || length > BLOCK_SIZE {
                    self.status() | R1::PARAMETER_ERROR
                } else {
                    self.block_length = length;
                    self.status()
                };
                self.respond(&[r1.bits()]);
            }
            (false, 17) => self.read_block(arg as usize),
            _ => {
                debug!("SD card: unsupported {}CMD{index}", if app { "A" } else { "" });
                let r1 = self.status() | R1::ILLEGAL_COMMAND;
                self.respond(&[r1.bits()]);
            }
        }
    }

    fn read_block(&mut self, address: usize) {
        let end = address.checked_add(self.block_length);
        let Some(end) = end.filter(|&end| end <= self.image.len()) else {
            let r1 = self.status() | R1::ADDRESS_ERROR;
            self.respond(&[r1.bits()]);
            return;
        };

        let r1 = self.status().bits();
        self.respond(&[r1, 0xFF, START_BLOCK_TOKEN]);
        self.responses.extend(self.image[address..end].iter().copied());
        self.respond(&[0xFF, 0xFF]);
    }
}

impl SpiDevice for SdCard {
    fn select(&mut self, selected: bool) {
        self.selected = selected;
        if !selected {
            self.command_len = 0;
            self.responses.clear();
        }
    }

    fn next_output(&mut self) -> u8 {
        if !self.selected {
            return 0xFF;
        }
        self.responses.pop_front().unwrap_or(0xFF)
    }

    fn receive(&mut self, byte: u8) {
        if self.command_len == 0 {
            // Command frames start with bits 7:6 = 01.
            if byte & 0xC0 != 0x40 {
                return;
            }
            self.responses.clear();
        }
        self.command[self.command_len] = byte;
        self.command_len += 1;
        if self.command_len == COMMAND_LEN {
            self.command_len = 0;
            self.execute();
        }
    }
}
