//! SPI bus bit-banged through the DUART output port.
//!
//! Pin assignment on the rosco_m68k:
//!
//! | Signal | Pin | Direction |
//! |--------|-----|-----------|
//! | CS1    | OP2 | out, active low |
//! | CS2    | OP7 | out, active low |
//! | SCK    | OP4 | out |
//! | MOSI   | OP6 | out |
//! | MISO   | IP2 | in  |
//!
//! Mode 0 framing, MSB first: MOSI is sampled on the SCK rising edge and the
//! device's next bit is presented on MISO after the falling edge, so it is
//! stable while the guest reads it with the clock high.

#[cfg(feature = "sdcard")]
pub mod sdcard;

use crate::duart::OutputPins;

/// A peripheral on the SPI bus.
///
/// The bus handles bit timing; devices see whole bytes.
pub trait SpiDevice {
    /// Chip select changed (true = selected).
    fn select(&mut self, selected: bool);

    /// Byte to shift out on the next transfer.
    fn next_output(&mut self) -> u8;

    /// A full byte was shifted in from the host.
    fn receive(&mut self, byte: u8);
}

/// Chip-select line a device is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiSelect {
    /// CS1 on OP2
    Cs1,
    /// CS2 on OP7
    Cs2,
}

impl SpiSelect {
    fn index(self) -> usize {
        match self {
            SpiSelect::Cs1 => 0,
            SpiSelect::Cs2 => 1,
        }
    }

    fn pin(self) -> OutputPins {
        match self {
            SpiSelect::Cs1 => OutputPins::SPI_CS1,
            SpiSelect::Cs2 => OutputPins::SPI_CS2,
        }
    }
}

const SELECTS: [SpiSelect; 2] = [SpiSelect::Cs1, SpiSelect::Cs2];

#[derive(Default)]
struct Lane {
    device: Option<Box<dyn SpiDevice>>,
    selected: bool,
    shift_in: u8,
    bit_count: u8,
    shift_out: u8,
    reload: bool,
}

impl Lane {
    fn begin(&mut self) {
        self.shift_in = 0;
        self.bit_count = 0;
        self.reload = false;
        if let Some(device) = self.device.as_mut() {
            device.select(true);
            self.shift_out = device.next_output();
        }
    }

    fn end(&mut self) {
        if let Some(device) = self.device.as_mut() {
            device.select(false);
        }
    }

    fn rising_edge(&mut self, mosi: bool) {
        self.shift_in = (self.shift_in << 1) | mosi as u8;
        self.bit_count += 1;
        if self.bit_count == 8 {
            if let Some(device) = self.device.as_mut() {
                device.receive(self.shift_in);
            }
            self.shift_in = 0;
            self.bit_count = 0;
            self.reload = true;
        }
    }

    fn falling_edge(&mut self) {
        if self.reload {
            self.reload = false;
            if let Some(device) = self.device.as_mut() {
                self.shift_out = device.next_output();
            }
        } else {
            self.shift_out <<= 1;
        }
    }

    fn miso(&self) -> bool {
        self.shift_out & 0x80 != 0
    }
}

/// Pin-level SPI master decoder.
#[derive(Default)]
pub struct SpiBus {
    lanes: [Lane; 2],
    clock_high: bool,
}

impl SpiBus {
    /// Create a bus with nothing attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `device` behind `select`, returning the previous device.
    pub fn attach(
        &mut self,
        select: SpiSelect,
        device: Box<dyn SpiDevice>,
    ) -> Option<Box<dyn SpiDevice>> {
        let lane = &mut self.lanes[select.index()];
        lane.selected = false;
        lane.device.replace(device)
    }

    /// Remove the device behind `select`.
    pub fn detach(&mut self, select: SpiSelect) -> Option<Box<dyn SpiDevice>> {
        let lane = &mut self.lanes[select.index()];
        lane.selected = false;
        lane.device.take()
    }

    /// Whether any device is attached.
    pub fn has_devices(&self) -> bool {
        self.lanes.iter().any(|lane| lane.device.is_some())
    }

    /// Apply new output pin levels.
    ///
    /// Returns the MISO level to present on IP2, or `None` when no device is
    /// attached (the input pin is left alone). With devices attached but
    /// none selected the line idles high.
    pub fn update(&mut self, pins: OutputPins) -> Option<bool> {
        if !self.has_devices() {
            self.clock_high = pins.contains(OutputPins::SPI_CLK);
            return None;
        }

        for select in SELECTS {
            let lane = &mut self.lanes[select.index()];
            let selected = lane.device.is_some() && !pins.contains(select.pin());
            if selected != lane.selected {
                lane.selected = selected;
                if selected {
                    lane.begin();
                } else {
                    lane.end();
                }
            }
        }

        let clock_high = pins.contains(OutputPins::SPI_CLK);
        let mosi = pins.contains(OutputPins::SPI_MOSI);
        if clock_high != self.clock_high {
            self.clock_high = clock_high;
            for lane in self.lanes.iter_mut().filter(|lane| lane.selected) {
                if clock_high {
                    lane.rising_edge(mosi);
                } else {
                    lane.falling_edge();
                }
            }
        }

        // Open-drain style: any selected device driving low wins.
        let miso = self
            .lanes
            .iter()
            .filter(|lane| lane.selected)
            .all(|lane| lane.miso());
        Some(miso)
    }
}
