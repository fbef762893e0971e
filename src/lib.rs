//! rosco_m68k board emulation
//!
//! Peripheral and interrupt subsystem of the rosco_m68k single-board computer,
//! built around a Motorola 68000 core. The crate provides the environment the
//! CPU core calls into on every memory access and instruction boundary:
//!
//! - 24-bit address decoding for RAM, ROM and the I/O window
//! - A 7-level priority interrupt controller with vector routing
//! - XR68C681 DUART emulation: two serial channels, counter/timer, GPIO
//! - Bit-banged SPI on the DUART output port, with an SD card peripheral
//!
//! # Crate feature flags
//! - `sdcard` (default): SD card peripheral (`spi::sdcard`)
//!
//! # Quick start
//! ```no_run
//! use rosco_m68k::{Board, BoardConfig, Channel};
//!
//! let config = BoardConfig::load("board.json").unwrap();
//! let mut board: Board = Board::new(&config).unwrap();
//! board.duart().borrow_mut().set_serial_transmitter(
//!     Channel::A,
//!     Box::new(|_, byte| print!("{}", byte as char)),
//! );
//! board.run(10_000);
//! ```

#![warn(missing_docs)]

pub mod board;
pub mod clock;
pub mod config;
pub mod cpu_backend;
pub mod duart;
pub mod interrupts;
pub mod spi;

pub use board::{Board, BoardBus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BoardConfig, MemoryMap};
pub use cpu_backend::{Cpu68k, CpuBus, DefaultCpu, Disassembly, Registers};
pub use duart::{Channel, Duart68681, SerialReceiver};
pub use interrupts::{InterruptController, InterruptSource, UNINITIALIZED_VECTOR};
#[cfg(feature = "sdcard")]
pub use spi::sdcard::SdCard;
pub use spi::{SpiBus, SpiDevice, SpiSelect};

use std::path::PathBuf;

/// Error types for board construction and configuration
#[derive(thiserror::Error, Debug)]
pub enum BoardError {
    /// ROM image could not be read
    #[error("Failed to read ROM image {path}: {source}")]
    RomIo {
        /// Path of the ROM image
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// ROM image does not fit the ROM window
    #[error("ROM image is {size} bytes, ROM window holds {capacity}")]
    RomTooLarge {
        /// Image size in bytes
        size: usize,
        /// ROM window size in bytes
        capacity: usize,
    },

    /// Invalid board configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be parsed
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// IO error while reading a configuration file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Upload does not fit in RAM
    #[error("Upload of {len} bytes at 0x{address:06X} exceeds RAM size")]
    UploadOutOfRange {
        /// Target address
        address: u32,
        /// Payload length
        len: usize,
    },
}

/// Result type for board operations
pub type Result<T> = std::result::Result<T, BoardError>;
