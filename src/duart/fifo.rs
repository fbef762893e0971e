//! Receive FIFO shared between the emulation thread and serial input threads.
//!
//! Host-side input (a terminal, a socket) usually arrives on its own thread,
//! so each channel's FIFO sits behind a `parking_lot::Mutex` and is handed out
//! through [`SerialReceiver`] clones.

use super::uart::Channel;
use log::trace;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Maximum number of buffered received bytes per channel.
pub const RECEIVE_FIFO_CAPACITY: usize = 255;

#[derive(Debug, Default)]
struct FifoState {
    bytes: VecDeque<u8>,
    receiver_enabled: bool,
}

/// Bounded receive FIFO with drop-on-full semantics.
///
/// The receiver-enable flag lives under the same lock as the bytes so a
/// push racing a "disable receiver" command sees a consistent state.
#[derive(Debug, Default)]
pub struct ReceiveFifo {
    state: Mutex<FifoState>,
}

impl ReceiveFifo {
    /// Create an empty FIFO with the receiver disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a received byte.
    ///
    /// Returns false if the receiver is disabled or the FIFO is full; the
    /// byte is dropped in both cases.
    pub fn push(&self, byte: u8) -> bool {
        let mut state = self.state.lock();
        if !state.receiver_enabled {
            return false;
        }
        if state.bytes.len() >= RECEIVE_FIFO_CAPACITY {
            trace!("receive FIFO full, dropping 0x{byte:02X}");
            return false;
        }
        state.bytes.push_back(byte);
        true
    }

    /// Take the oldest byte.
    pub fn pop(&self) -> Option<u8> {
        self.state.lock().bytes.pop_front()
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.state.lock().bytes.len()
    }

    /// Whether no bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.state.lock().bytes.is_empty()
    }

    /// Whether the receiver accepts bytes.
    pub fn receiver_enabled(&self) -> bool {
        self.state.lock().receiver_enabled
    }

    /// Enable or disable the receiver without touching buffered bytes.
    pub fn set_receiver_enabled(&self, enabled: bool) {
        self.state.lock().receiver_enabled = enabled;
    }

    /// Disable the receiver and discard everything buffered.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.receiver_enabled = false;
        state.bytes.clear();
    }
}

/// Cloneable handle that injects received bytes into one DUART channel.
///
/// Safe to move to another thread. Bytes sent while the chip is in standby,
/// while the receiver is disabled, or while the FIFO is full are dropped.
#[derive(Debug, Clone)]
pub struct SerialReceiver {
    channel: Channel,
    fifo: Arc<ReceiveFifo>,
    standby: Arc<AtomicBool>,
}

impl SerialReceiver {
    pub(crate) fn new(channel: Channel, fifo: Arc<ReceiveFifo>, standby: Arc<AtomicBool>) -> Self {
        Self {
            channel,
            fifo,
            standby,
        }
    }

    /// Channel this handle feeds.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Deliver one byte as if it arrived on the serial line.
    ///
    /// Returns whether the byte was queued.
    pub fn send(&self, byte: u8) -> bool {
        if self.standby.load(Ordering::Acquire) {
            return false;
        }
        self.fifo.push(byte)
    }

    /// Deliver a run of bytes, returning how many were queued.
    pub fn send_all(&self, bytes: &[u8]) -> usize {
        bytes.iter().filter(|&&byte| self.send(byte)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_fifo() -> ReceiveFifo {
        let fifo = ReceiveFifo::new();
        fifo.set_receiver_enabled(true);
        fifo
    }

    #[test]
    fn test_fifo_preserves_order() {
        let fifo = enabled_fifo();
        for byte in [0x10, 0x20, 0x30] {
            assert!(fifo.push(byte));
        }
        assert_eq!(fifo.pop(), Some(0x10));
        assert_eq!(fifo.pop(), Some(0x20));
        assert_eq!(fifo.pop(), Some(0x30));
        assert_eq!(fifo.pop(), None);
    }

    #[test]
    fn test_fifo_drops_when_full() {
        let fifo = enabled_fifo();
        for n in 0..300u32 {
            fifo.push(n as u8);
        }
        assert_eq!(fifo.len(), RECEIVE_FIFO_CAPACITY);
        assert_eq!(fifo.pop(), Some(0));
    }

    #[test]
    fn test_fifo_ignores_bytes_while_disabled() {
        let fifo = ReceiveFifo::new();
        assert!(!fifo.push(0x41));
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_reset_disables_and_empties() {
        let fifo = enabled_fifo();
        fifo.push(1);
        fifo.reset();
        assert!(fifo.is_empty());
        assert!(!fifo.receiver_enabled());
    }

    #[test]
    fn test_receiver_handle_from_another_thread() {
        let fifo = Arc::new(enabled_fifo());
        let standby = Arc::new(AtomicBool::new(false));
        let receiver = SerialReceiver::new(Channel::A, fifo.clone(), standby);

        let handle = std::thread::spawn(move || receiver.send_all(b"hi"));
        assert_eq!(handle.join().unwrap(), 2);
        assert_eq!(fifo.pop(), Some(b'h'));
        assert_eq!(fifo.pop(), Some(b'i'));
    }

    #[test]
    fn test_receiver_handle_respects_standby() {
        let fifo = Arc::new(enabled_fifo());
        let standby = Arc::new(AtomicBool::new(true));
        let receiver = SerialReceiver::new(Channel::B, fifo.clone(), standby.clone());
        assert!(!receiver.send(0x55));
        standby.store(false, Ordering::Release);
        assert!(receiver.send(0x55));
        assert_eq!(receiver.channel(), Channel::B);
    }
}
