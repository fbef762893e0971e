//! Board configuration.
//!
//! A board is described by its ROM image and memory map, typically loaded
//! from JSON:
//!
//! ```json
//! {
//!   "rom": "rosco_m68k.rom",
//!   "memory_map": { "rom_base": 14680064 },
//!   "duart_level": 4
//! }
//! ```
//!
//! Every field except `rom` has a default matching the rosco_m68k r2.

use crate::{BoardError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top of the 24-bit address space (exclusive).
pub const ADDRESS_SPACE_END: u32 = 0x0100_0000;

/// Size of the DUART register window (16 registers on odd addresses).
pub const DUART_WINDOW: u32 = 0x20;

/// Physical memory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryMap {
    /// RAM size in bytes, mapped from address 0
    pub ram_size: u32,
    /// ROM window base
    pub rom_base: u32,
    /// ROM window size; clipped at the top of the address space
    pub rom_size: u32,
    /// I/O window base
    pub io_base: u32,
    /// I/O window size
    pub io_size: u32,
    /// Span of the DUART register window at the start of the I/O window
    pub duart_window: u32,
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self {
            ram_size: 0x10_0000,
            rom_base: 0xE0_0000,
            rom_size: 0x10_0000,
            io_base: 0xF0_0000,
            io_size: 0x10_0000,
            duart_window: DUART_WINDOW,
        }
    }
}

impl MemoryMap {
    /// Check that regions are non-empty and start inside 24 bits, that ROM
    /// lies above RAM, and that the DUART window fits the I/O window.
    ///
    /// ROM may overlap the I/O window. Decode order is RAM, ROM, then I/O,
    /// so the ROM shadows whatever part of the I/O window it covers.
    pub fn validate(&self) -> Result<()> {
        let end = |base: u32, size: u32| base as u64 + size as u64;
        if self.ram_size == 0 || self.rom_size == 0 || self.io_size == 0 {
            return Err(BoardError::InvalidConfig(
                "memory regions must be non-empty".into(),
            ));
        }
        if end(self.io_base, self.io_size) > ADDRESS_SPACE_END as u64 {
            return Err(BoardError::InvalidConfig(format!(
                "I/O window 0x{:06X}+0x{:X} exceeds the 24-bit address space",
                self.io_base, self.io_size
            )));
        }
        if self.ram_size as u64 > self.rom_base as u64 {
            return Err(BoardError::InvalidConfig(format!(
                "RAM (0x{:X} bytes) overlaps ROM at 0x{:06X}",
                self.ram_size, self.rom_base
            )));
        }
        if self.rom_base >= ADDRESS_SPACE_END {
            return Err(BoardError::InvalidConfig(format!(
                "ROM base 0x{:X} is outside the 24-bit address space",
                self.rom_base
            )));
        }
        if self.duart_window == 0 || self.duart_window > self.io_size {
            return Err(BoardError::InvalidConfig(format!(
                "DUART window 0x{:X} does not fit the I/O window",
                self.duart_window
            )));
        }
        Ok(())
    }

    /// Whether `addr` (already masked to 24 bits) is in RAM.
    pub fn in_ram(&self, addr: u32) -> bool {
        addr < self.ram_size
    }

    /// Addressable ROM window size: `rom_size` clipped at the end of the
    /// 24-bit address space.
    pub fn rom_window(&self) -> u32 {
        self.rom_size.min(ADDRESS_SPACE_END.saturating_sub(self.rom_base))
    }

    /// Offset into the ROM image if `addr` is in the ROM window.
    pub fn rom_offset(&self, addr: u32) -> Option<usize> {
        addr.checked_sub(self.rom_base)
            .filter(|&offset| offset < self.rom_window())
            .map(|offset| offset as usize)
    }

    /// DUART register for `addr`, if it is an odd address in the DUART window.
    pub fn duart_register(&self, addr: u32) -> Option<u8> {
        let offset = addr.checked_sub(self.io_base)?;
        if offset >= self.duart_window || offset & 1 == 0 {
            return None;
        }
        Some(((offset >> 1) & 0xFF) as u8)
    }
}

fn default_duart_level() -> u8 {
    4
}

/// Complete board description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardConfig {
    /// ROM image path
    pub rom: PathBuf,
    /// Memory layout
    #[serde(default)]
    pub memory_map: MemoryMap,
    /// Interrupt level the DUART is wired to
    #[serde(default = "default_duart_level")]
    pub duart_level: u8,
}

impl BoardConfig {
    /// Default rosco_m68k layout with the given ROM image.
    pub fn new(rom: impl Into<PathBuf>) -> Self {
        Self {
            rom: rom.into(),
            memory_map: MemoryMap::default(),
            duart_level: default_duart_level(),
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: BoardConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    ///
    /// A relative ROM path is resolved against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let mut config = Self::from_json(&json)?;
        if config.rom.is_relative() {
            if let Some(dir) = path.parent() {
                config.rom = dir.join(&config.rom);
            }
        }
        Ok(config)
    }

    /// Validate the memory map and interrupt level.
    pub fn validate(&self) -> Result<()> {
        self.memory_map.validate()?;
        if !(1..=7).contains(&self.duart_level) {
            return Err(BoardError::InvalidConfig(format!(
                "DUART interrupt level {} outside 1..=7",
                self.duart_level
            )));
        }
        Ok(())
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BoardConfig::new("rom.bin");
        assert!(config.validate().is_ok());
        assert_eq!(config.duart_level, 4);
        assert_eq!(config.memory_map.rom_base, 0xE00000);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = BoardConfig::from_json(r#"{ "rom": "boot.rom" }"#).unwrap();
        assert_eq!(config.memory_map, MemoryMap::default());
        assert_eq!(config.rom, PathBuf::from("boot.rom"));
    }

    #[test]
    fn test_from_json_overrides_rom_base() {
        let json = r#"{ "rom": "boot.rom", "memory_map": { "rom_base": 15466496, "rom_size": 262144 } }"#;
        let config = BoardConfig::from_json(json).unwrap();
        assert_eq!(config.memory_map.rom_base, 0xEC0000);
        assert_eq!(config.memory_map.io_base, 0xF00000);
    }

    #[test]
    fn test_rejects_bad_level_and_overlap() {
        let json = r#"{ "rom": "a", "duart_level": 0 }"#;
        assert!(matches!(
            BoardConfig::from_json(json),
            Err(BoardError::InvalidConfig(_))
        ));

        let json = r#"{ "rom": "a", "memory_map": { "ram_size": 15728640 } }"#;
        assert!(matches!(
            BoardConfig::from_json(json),
            Err(BoardError::InvalidConfig(_))
        ));

        let json = r#"{ "rom": "a", "memory_map": { "rom_base": 16777216 } }"#;
        assert!(matches!(
            BoardConfig::from_json(json),
            Err(BoardError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_top_of_memory_rom_base_is_accepted() {
        let json = r#"{ "rom": "x", "memory_map": { "rom_base": 16515072 } }"#;
        let config = BoardConfig::from_json(json).unwrap();
        let map = config.memory_map;
        assert_eq!(map.rom_window(), 0x4_0000);
        assert_eq!(map.rom_offset(0xFC0000), Some(0));
        assert_eq!(map.rom_offset(0xFFFFFF), Some(0x3_FFFF));
        assert_eq!(map.rom_offset(0xFBFFFF), None);
        assert_eq!(map.duart_register(0xF00001), Some(0x0));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(
            BoardConfig::from_json("{ rom: }"),
            Err(BoardError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_duart_register_decode() {
        let map = MemoryMap::default();
        assert_eq!(map.duart_register(0xF00001), Some(0x0));
        assert_eq!(map.duart_register(0xF00005), Some(0x2));
        assert_eq!(map.duart_register(0xF0001F), Some(0xF));
        assert_eq!(map.duart_register(0xF00004), None);
        assert_eq!(map.duart_register(0xF00021), None);
        assert_eq!(map.duart_register(0xEFFFFF), None);
    }

    #[test]
    fn test_round_trips_through_json() {
        let config = BoardConfig::new("x.rom");
        let json = config.to_json().unwrap();
        assert_eq!(BoardConfig::from_json(&json).unwrap(), config);
    }
}
