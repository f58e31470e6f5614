//! Base timer, clocked by the 32.768 kHz quartz.
//!
//! Interrupt 0 fires every half second (or every 128 quartz ticks in fast
//! mode) and drives the firmware clock. Interrupt 1 has a selectable short
//! period and is mostly used to wake the CPU from HALT.

use crate::interrupts::{Interrupts, Source};
use crate::memory::Memory;
use crate::sfr;

pub const QUARTZ_HZ: u32 = 32_768;

/// Quartz ticks per interrupt 0 (normal / fast)
const INT0_PERIOD: u32 = 16_384;
const INT0_PERIOD_FAST: u32 = 128;
/// Quartz ticks per interrupt 1, indexed by BTCR bits 4-5
const INT1_PERIODS: [u32; 4] = [32, 128, 512, 2048];

pub struct BaseTimer {
    /// Fractional quartz ticks accumulated from CPU cycles
    phase: u32,
    /// Quartz tick count, wraps at the longest period
    count: u32,
    pub dbg_int0_count: u32,
}

impl BaseTimer {
    pub fn new() -> Self {
        BaseTimer {
            phase: 0,
            count: 0,
            dbg_int0_count: 0,
        }
    }

    pub fn reset(&mut self) {
        self.phase = 0;
        self.count = 0;
        self.dbg_int0_count = 0;
    }

    /// Advance by one CPU cycle at `cycle_hz`.
    pub fn tick(&mut self, mem: &mut Memory, irq: &mut Interrupts, cycle_hz: u32) {
        let btcr = mem.read_raw(sfr::BTCR);
        if btcr & sfr::BTCR_RUN == 0 || cycle_hz == 0 {
            return;
        }
        self.phase += QUARTZ_HZ;
        while self.phase >= cycle_hz {
            self.phase -= cycle_hz;
            self.quartz_tick(mem, irq, btcr);
        }
    }

    fn quartz_tick(&mut self, mem: &mut Memory, irq: &mut Interrupts, btcr: u8) {
        self.count = (self.count + 1) % INT0_PERIOD;

        let int0_period = if btcr & sfr::BTCR_INT0_FAST != 0 {
            INT0_PERIOD_FAST
        } else {
            INT0_PERIOD
        };
        if self.count % int0_period == 0 {
            self.dbg_int0_count += 1;
            irq.raise(mem, Source::BaseTimer0);
        }

        let int1_period = INT1_PERIODS[((btcr & sfr::BTCR_INT1_CYCLE) >> 4) as usize];
        if self.count % int1_period == 0 {
            irq.raise(mem, Source::BaseTimer1);
        }
    }
}

impl Default for BaseTimer {
    fn default() -> Self {
        Self::new()
    }
}
