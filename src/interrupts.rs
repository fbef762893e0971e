//! Seven-level priority interrupt controller.
//!
//! The 68000 samples a 3-bit interrupt priority level (IPL) before every
//! instruction. The controller owns one optional source per level (1 lowest,
//! 7 non-maskable), reports the highest asserting level, and routes the
//! interrupt-acknowledge vector fetch back to the source on that level.

use log::warn;
use std::cell::RefCell;
use std::rc::Rc;

/// Vector returned when no source supplies one (68000 "uninitialized interrupt").
pub const UNINITIALIZED_VECTOR: u8 = 0x0F;

/// Number of prioritized levels (1..=7).
const LEVEL_COUNT: usize = 7;

/// A device that can request interrupts.
pub trait InterruptSource {
    /// Reset the device to its power-on state.
    fn reset(&mut self);

    /// Vector supplied during the interrupt-acknowledge cycle.
    fn read_vector(&mut self) -> u8;

    /// Whether the device is currently asserting its interrupt line.
    fn poll_for_interrupt(&mut self) -> bool;
}

/// Shared handle to a registered interrupt source.
///
/// The board keeps its own handle to each device for register access; the
/// controller only needs the [`InterruptSource`] view. Identity is pointer
/// identity of the allocation.
pub type SharedSource = Rc<RefCell<dyn InterruptSource>>;

struct Slot {
    source: SharedSource,
    enabled: bool,
}

/// Priority interrupt controller with one slot per level.
#[derive(Default)]
pub struct InterruptController {
    slots: [Option<Slot>; LEVEL_COUNT],
}

fn slot_index(level: u8) -> Option<usize> {
    match level {
        1..=7 => Some(level as usize - 1),
        _ => None,
    }
}

impl InterruptController {
    /// Create a controller with every level empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset every registered source. Membership and enable flags are kept.
    pub fn reset(&mut self) {
        for slot in self.slots.iter().flatten() {
            slot.source.borrow_mut().reset();
        }
    }

    /// Bind `source` to `level` and enable it.
    ///
    /// Returns false if the level is outside 1..=7 or already occupied.
    pub fn source_add(&mut self, source: SharedSource, level: u8) -> bool {
        let Some(index) = slot_index(level) else {
            warn!("interrupt source rejected: level {level} out of range");
            return false;
        };
        if self.slots[index].is_some() {
            warn!("interrupt source rejected: level {level} already occupied");
            return false;
        }
        self.slots[index] = Some(Slot {
            source,
            enabled: true,
        });
        true
    }

    /// Unbind `source` from whichever level holds it.
    pub fn source_remove(&mut self, source: &SharedSource) -> bool {
        match self.find(source) {
            Some(index) => {
                self.slots[index] = None;
                true
            }
            None => false,
        }
    }

    /// Unbind whatever source occupies `level`.
    pub fn source_remove_level(&mut self, level: u8) -> bool {
        match slot_index(level) {
            Some(index) => self.slots[index].take().is_some(),
            None => false,
        }
    }

    /// Re-enable `source` at its level.
    pub fn source_enable(&mut self, source: &SharedSource) -> bool {
        self.set_enabled_by_source(source, true)
    }

    /// Re-enable the source occupying `level`.
    pub fn source_enable_level(&mut self, level: u8) -> bool {
        self.set_enabled_by_level(level, true)
    }

    /// Mask `source` without unbinding it.
    pub fn source_disable(&mut self, source: &SharedSource) -> bool {
        self.set_enabled_by_source(source, false)
    }

    /// Mask the source occupying `level` without unbinding it.
    pub fn source_disable_level(&mut self, level: u8) -> bool {
        self.set_enabled_by_level(level, false)
    }

    /// Whether `level` holds a source.
    pub fn is_present(&self, level: u8) -> bool {
        slot_index(level).is_some_and(|index| self.slots[index].is_some())
    }

    /// Whether `level` holds an enabled source.
    pub fn is_enabled(&self, level: u8) -> bool {
        slot_index(level)
            .and_then(|index| self.slots[index].as_ref())
            .is_some_and(|slot| slot.enabled)
    }

    /// Current IPL: the highest level whose source is present, enabled and
    /// asserting, or 0.
    ///
    /// Every enabled source is polled, even below a level that already
    /// asserted, so pollers with side effects (timer deadlines) advance
    /// uniformly.
    pub fn mpu_poll_interrupt(&self) -> u8 {
        let mut level = 0;
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(slot) = slot {
                if slot.enabled && slot.source.borrow_mut().poll_for_interrupt() {
                    level = index as u8 + 1;
                }
            }
        }
        level
    }

    /// Vector for an acknowledged interrupt at `level`.
    ///
    /// Empty, disabled and out-of-range levels yield [`UNINITIALIZED_VECTOR`].
    pub fn mpu_read_vector(&self, level: u8) -> u8 {
        slot_index(level)
            .and_then(|index| self.slots[index].as_ref())
            .filter(|slot| slot.enabled)
            .map_or(UNINITIALIZED_VECTOR, |slot| {
                slot.source.borrow_mut().read_vector()
            })
    }

    fn find(&self, source: &SharedSource) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|slot| Rc::ptr_eq(&slot.source, source))
        })
    }

    fn set_enabled_by_source(&mut self, source: &SharedSource, enabled: bool) -> bool {
        match self.find(source) {
            Some(index) => self.set_enabled_at(index, enabled),
            None => false,
        }
    }

    fn set_enabled_by_level(&mut self, level: u8, enabled: bool) -> bool {
        match slot_index(level) {
            Some(index) => self.set_enabled_at(index, enabled),
            None => false,
        }
    }

    fn set_enabled_at(&mut self, index: usize, enabled: bool) -> bool {
        match self.slots[index].as_mut() {
            Some(slot) => {
                slot.enabled = enabled;
                true
            }
            None => false,
        }
    }
}
