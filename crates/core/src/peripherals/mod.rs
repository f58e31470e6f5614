//! LC86K on-chip peripherals.
//!
//! - [`Timer`] — dual 8-bit / 16-bit Timer 0 and Timer 1 (Timer 1 also drives the buzzer)
//! - [`Prescaler`] — Timer 0 clock divider (`T0PRR`)
//! - [`BaseTimer`] — 32.768 kHz base timer (clock and HALT wakeup)

mod base_timer;
mod timer;

pub use base_timer::{BaseTimer, QUARTZ_HZ};
pub use timer::{Prescaler, Timer, TimerAddrs};
