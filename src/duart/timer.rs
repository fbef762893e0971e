//! Counter/timer in timer mode.
//!
//! Only the crystal-derived timer sources are modeled (ACR[6:4] = 110 for
//! X1/CLK, 111 for X1/CLK divided by 16). The output square wave toggles
//! every `counter` source clocks, so one full period is `2 * counter` clocks.
//! Deadlines are wall-clock, read from an injected [`Clock`].

use crate::clock::Clock;
use log::debug;
use std::sync::Arc;
use std::time::Duration;

/// DUART crystal frequency on the rosco_m68k.
pub const DUART_CRYSTAL_HZ: u32 = 3_686_400;

const ACR_TIMER_SOURCE_MASK: u8 = 0x70;
const ACR_TIMER_XTAL: u8 = 0x60;
const ACR_TIMER_XTAL_DIV16: u8 = 0x70;

/// Timer period for the given ACR and counter value, if the mode is modeled.
pub fn timer_interval(acr: u8, counter: u16) -> Option<Duration> {
    let divisor = match acr & ACR_TIMER_SOURCE_MASK {
        ACR_TIMER_XTAL => 1.0,
        ACR_TIMER_XTAL_DIV16 => 16.0,
        _ => return None,
    };
    if counter == 0 {
        return None;
    }
    let frequency = (DUART_CRYSTAL_HZ as f64 / divisor) / (2.0 * counter as f64);
    Some(Duration::from_secs_f64(1.0 / frequency))
}

/// Free-running counter/timer state.
pub struct CounterTimer {
    clock: Arc<dyn Clock>,
    started: bool,
    cleared: bool,
    interval: Duration,
    interrupt_current: Duration,
    interrupt_next: Duration,
}

impl CounterTimer {
    /// Create a stopped timer reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            started: false,
            cleared: false,
            interval: Duration::ZERO,
            interrupt_current: Duration::ZERO,
            interrupt_next: Duration::ZERO,
        }
    }

    /// Return to the stopped state.
    pub fn reset(&mut self) {
        self.started = false;
        self.cleared = false;
        self.interval = Duration::ZERO;
        self.interrupt_current = Duration::ZERO;
        self.interrupt_next = Duration::ZERO;
    }

    /// Start counter command. Unsupported modes and a zero preload stop
    /// the timer instead.
    pub fn start(&mut self, acr: u8, counter: u16) {
        let Some(interval) = timer_interval(acr, counter) else {
            debug!("counter/timer not started (ACR 0x{acr:02X}, preload {counter})");
            self.reset();
            return;
        };

        let now = self.clock.now();
        self.interval = interval;
        self.started = true;
        self.cleared = false;
        self.interrupt_current = now + interval;
        self.interrupt_next = self.interrupt_current + interval;
        debug!("counter/timer started, period {interval:?}");
    }

    /// Stop counter command: acknowledges the pending counter-ready
    /// condition. The timer keeps running.
    pub fn stop(&mut self) {
        self.cleared = true;
    }

    /// Whether the timer is running.
    pub fn is_running(&self) -> bool {
        self.started
    }

    /// Current period, if running.
    pub fn interval(&self) -> Option<Duration> {
        self.started.then_some(self.interval)
    }

    /// Counter-ready condition.
    ///
    /// Asserts once per passed deadline and stays asserted until the stop
    /// command acknowledges it. Passing the next deadline re-asserts it even
    /// if acknowledged.
    pub fn check_interrupt(&mut self) -> bool {
        if !self.started {
            return false;
        }

        let now = self.clock.now();
        if now >= self.interrupt_next {
            self.cleared = false;
            self.interrupt_current = self.interrupt_next;
            self.interrupt_next = now + self.interval;
            return true;
        }
        if now >= self.interrupt_current {
            return !self.cleared;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use approx::assert_relative_eq;

    fn timer() -> (ManualClock, CounterTimer) {
        let clock = ManualClock::new();
        let timer = CounterTimer::new(Arc::new(clock.clone()));
        (clock, timer)
    }

    #[test]
    fn test_interval_xtal_div1() {
        let interval = timer_interval(0x60, 1800).unwrap();
        assert_relative_eq!(interval.as_secs_f64() * 1000.0, 0.9765625, epsilon = 1e-9);
    }

    #[test]
    fn test_interval_xtal_div16() {
        let interval = timer_interval(0x70, 1800).unwrap();
        assert_relative_eq!(interval.as_secs_f64() * 1000.0, 15.625, epsilon = 1e-9);
    }

    #[test]
    fn test_unsupported_modes_do_not_start() {
        assert!(timer_interval(0x00, 1800).is_none());
        assert!(timer_interval(0x30, 1800).is_none());
        assert!(timer_interval(0x60, 0).is_none());

        let (_clock, mut timer) = timer();
        timer.start(0x20, 100);
        assert!(!timer.is_running());
        assert!(!timer.check_interrupt());
    }

    #[test]
    fn test_fires_after_first_period_until_acknowledged() {
        let (clock, mut timer) = timer();
        timer.start(0x60, 1800);
        assert!(!timer.check_interrupt());

        clock.advance(Duration::from_micros(990));
        assert!(timer.check_interrupt());
        assert!(timer.check_interrupt());

        timer.stop();
        assert!(!timer.check_interrupt());
    }

    #[test]
    fn test_next_deadline_refires_after_acknowledge() {
        let (clock, mut timer) = timer();
        timer.start(0x60, 1800);
        clock.advance(Duration::from_micros(990));
        assert!(timer.check_interrupt());
        timer.stop();

        clock.advance(Duration::from_micros(990));
        assert!(timer.check_interrupt());
        // Deadline rolled forward; still unacknowledged.
        assert!(timer.check_interrupt());
        timer.stop();
        assert!(!timer.check_interrupt());
    }

    #[test]
    fn test_reset_stops() {
        let (clock, mut timer) = timer();
        timer.start(0x70, 10);
        assert!(timer.interval().is_some());
        timer.reset();
        clock.advance(Duration::from_secs(1));
        assert!(!timer.check_interrupt());
        assert_eq!(timer.interval(), None);
    }
}
