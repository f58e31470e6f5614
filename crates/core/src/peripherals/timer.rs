//! LC86K dual-half timer (Timer 0 / Timer 1).
//!
//! Each timer has an 8-bit low and high half, each with its own run bit,
//! reload register and overflow flag. In long mode the halves chain into one
//! 16-bit counter driven by the low half. Counters and control are written
//! back through raw access so the CPU-side SFR effects do not fire.
//!
//! The same logic serves both timers; [`TimerAddrs`] carries the register
//! wiring and interrupt sources.

use tracing::trace;

use crate::interrupts::{Interrupts, Source};
use crate::memory::Memory;
use crate::sfr;

#[derive(Debug, Clone)]
pub struct TimerAddrs {
    pub control: u16,
    pub low: u16,
    pub low_reload: u16,
    pub high: u16,
    pub high_reload: u16,
    pub low_source: Source,
    pub high_source: Source,
}

impl TimerAddrs {
    pub fn timer0() -> Self {
        TimerAddrs {
            control: sfr::T0CNT,
            low: sfr::T0L,
            low_reload: sfr::T0LR,
            high: sfr::T0H,
            high_reload: sfr::T0HR,
            low_source: Source::T0Low,
            high_source: Source::T0High,
        }
    }

    /// Timer 1 reloads live behind the counter addresses (write latch).
    pub fn timer1() -> Self {
        TimerAddrs {
            control: sfr::T1CNT,
            low: sfr::T1L,
            low_reload: sfr::T1L,
            high: sfr::T1H,
            high_reload: sfr::T1H,
            low_source: Source::T1Low,
            high_source: Source::T1High,
        }
    }
}

pub struct Timer {
    addrs: TimerAddrs,
    /// Counter values; wider than 8 bits so overflow is visible before reload
    low: u16,
    high: u16,
    low_started: bool,
    high_started: bool,
    pub dbg_low_ovf_count: u32,
    pub dbg_high_ovf_count: u32,
}

impl Timer {
    pub fn new(addrs: TimerAddrs) -> Self {
        Timer {
            addrs,
            low: 0,
            high: 0,
            low_started: false,
            high_started: false,
            dbg_low_ovf_count: 0,
            dbg_high_ovf_count: 0,
        }
    }

    pub fn reset(&mut self) {
        self.low = 0;
        self.high = 0;
        self.low_started = false;
        self.high_started = false;
        self.dbg_low_ovf_count = 0;
        self.dbg_high_ovf_count = 0;
    }

    /// Advance one step. `active` is true when the timer's clock source
    /// fired this cycle (prescaler for Timer 0, every cycle for Timer 1).
    pub fn tick(&mut self, mem: &mut Memory, irq: &mut Interrupts, active: bool) {
        let mut control = mem.read_raw(self.addrs.control);
        let long = control & sfr::TCNT_LONG != 0;

        // A half that was just enabled loads its reload value before counting
        if control & sfr::TCNT_LRUN != 0 {
            if !self.low_started {
                self.low_started = true;
                self.low = self.low_reload(mem);
            } else if active {
                self.low += 1;
            }
        } else {
            self.low = self.low_reload(mem);
            self.low_started = false;
        }

        if control & sfr::TCNT_HRUN != 0 {
            if !self.high_started {
                self.high_started = true;
                self.high = self.high_reload(mem);
            } else if active && !long {
                self.high += 1;
            }
        } else {
            self.high = self.high_reload(mem);
            self.high_started = false;
        }

        let mut raise_low = false;
        let mut request_low = false;
        let mut raise_high = false;

        if self.low > 0xFF {
            if long {
                request_low = self.carry_into_high(mem, control);
            } else {
                raise_low = self.overflow_low_8bit(mem, &mut control);
            }
        }
        if self.high > 0xFF {
            raise_high = if long {
                self.overflow_long(mem, &mut control)
            } else {
                self.overflow_high_8bit(mem, &mut control)
            };
        }

        mem.write_raw(self.addrs.low, self.low as u8);
        mem.write_raw(self.addrs.high, self.high as u8);
        mem.write_raw(self.addrs.control, control);

        if raise_low {
            irq.raise(mem, self.addrs.low_source);
        }
        if request_low {
            irq.request(self.addrs.low_source);
        }
        if raise_high {
            irq.raise(mem, self.addrs.high_source);
        }
    }

    fn low_reload(&self, mem: &Memory) -> u16 {
        mem.read_latch(self.addrs.low_reload) as u16
    }

    fn high_reload(&self, mem: &Memory) -> u16 {
        mem.read_latch(self.addrs.high_reload) as u16
    }

    /// 8-bit mode low overflow: flag, reload, interrupt if enabled.
    fn overflow_low_8bit(&mut self, mem: &Memory, control: &mut u8) -> bool {
        self.dbg_low_ovf_count += 1;
        *control |= sfr::TCNT_LOVF;
        self.low = self.low_reload(mem);
        *control & sfr::TCNT_LIE != 0
    }

    /// Long mode low overflow: carry into the high half. The low flag stays
    /// clear but the low vector is still requested if enabled.
    fn carry_into_high(&mut self, mem: &Memory, control: u8) -> bool {
        self.high += 1;
        self.low = self.low_reload(mem);
        control & sfr::TCNT_LIE != 0
    }

    /// 8-bit mode high overflow: flag, interrupt if enabled, then the high
    /// half stops itself.
    fn overflow_high_8bit(&mut self, mem: &Memory, control: &mut u8) -> bool {
        self.dbg_high_ovf_count += 1;
        *control |= sfr::TCNT_HOVF;
        let raise = *control & sfr::TCNT_HIE != 0;
        Self::force_stop_high(control);
        self.high = self.high_reload(mem);
        trace!("timer {:03X}: high half stopped after overflow", self.addrs.control);
        raise
    }

    fn force_stop_high(control: &mut u8) {
        *control &= !sfr::TCNT_HRUN;
    }

    /// Long mode 16-bit overflow: both flags, high interrupt if enabled,
    /// both halves reload. The high half keeps running.
    fn overflow_long(&mut self, mem: &Memory, control: &mut u8) -> bool {
        self.dbg_high_ovf_count += 1;
        *control |= sfr::TCNT_LOVF | sfr::TCNT_HOVF;
        self.low = self.low_reload(mem);
        self.high = self.high_reload(mem);
        *control & sfr::TCNT_HIE != 0
    }
}

/// Timer 0 prescaler: fires once every `256 - T0PRR` cycles.
pub struct Prescaler {
    count: u16,
}

impl Prescaler {
    pub fn new() -> Self {
        Prescaler { count: 0 }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Count one cycle; true when the prescaler output fires.
    pub fn tick(&mut self, reload: u8) -> bool {
        self.count += 1;
        if self.count >= 0x100 - reload as u16 {
            self.count = 0;
            true
        } else {
            false
        }
    }
}

impl Default for Prescaler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn setup(control: u8) -> (Memory, Interrupts, Timer) {
        let mut mem = Memory::new();
        mem.write_raw(sfr::T0CNT, control);
        (mem, Interrupts::new(), Timer::new(TimerAddrs::timer0()))
    }

    #[test]
    fn test_first_enabled_tick_loads_reload() {
        let (mut mem, mut irq, mut t) = setup(sfr::TCNT_LRUN);
        mem.write_raw(sfr::T0LR, 0x80);
        t.tick(&mut mem, &mut irq, true);
        assert_eq!(mem.read_raw(sfr::T0L), 0x80);
        t.tick(&mut mem, &mut irq, true);
        assert_eq!(mem.read_raw(sfr::T0L), 0x81);
        t.tick(&mut mem, &mut irq, false);
        assert_eq!(mem.read_raw(sfr::T0L), 0x81);
    }

    #[test]
    fn test_low_8bit_overflow_interrupt() {
        let (mut mem, mut irq, mut t) = setup(sfr::TCNT_LRUN | sfr::TCNT_LIE);
        mem.write_raw(sfr::T0LR, 0xFE);
        mem.write_raw(sfr::IE, sfr::IE_MASTER);
        t.tick(&mut mem, &mut irq, true); // load FE
        t.tick(&mut mem, &mut irq, true); // FF
        assert_eq!(irq.next_pending(&mem), None);
        t.tick(&mut mem, &mut irq, true); // overflow
        assert_eq!(mem.read_raw(sfr::T0L), 0xFE);
        assert_ne!(mem.read_raw(sfr::T0CNT) & sfr::TCNT_LOVF, 0);
        assert_eq!(irq.next_pending(&mem), Some(Source::T0Low));
    }

    #[test]
    fn test_long_mode_low_overflow_requests_without_flag() {
        let ctl = sfr::TCNT_LRUN | sfr::TCNT_HRUN | sfr::TCNT_LONG | sfr::TCNT_LIE;
        let (mut mem, mut irq, mut t) = setup(ctl);
        mem.write_raw(sfr::T0LR, 0xFF);
        mem.write_raw(sfr::T0HR, 0x10);
        mem.write_raw(sfr::IE, sfr::IE_MASTER);
        t.tick(&mut mem, &mut irq, true);
        t.tick(&mut mem, &mut irq, true);
        assert_eq!(mem.read_raw(sfr::T0L), 0xFF);
        assert_eq!(mem.read_raw(sfr::T0H), 0x11);
        assert_eq!(mem.read_raw(sfr::T0CNT), ctl);
        assert_eq!(irq.dbg_raise_count, 1);
        assert_eq!(irq.next_pending(&mem), Some(Source::T0Low));
        assert_eq!(Source::T0Low.vector(), 0x13);
    }

    #[test]
    fn test_long_mode_low_overflow_without_enable_is_silent() {
        let ctl = sfr::TCNT_LRUN | sfr::TCNT_HRUN | sfr::TCNT_LONG;
        let (mut mem, mut irq, mut t) = setup(ctl);
        mem.write_raw(sfr::T0LR, 0xFF);
        mem.write_raw(sfr::IE, sfr::IE_MASTER);
        t.tick(&mut mem, &mut irq, true);
        t.tick(&mut mem, &mut irq, true);
        assert_eq!(mem.read_raw(sfr::T0CNT), ctl);
        assert_eq!(irq.dbg_raise_count, 0);
        assert_eq!(irq.next_pending(&mem), None);
    }

    #[test]
    fn test_long_mode_full_overflow() {
        let ctl = sfr::TCNT_LRUN | sfr::TCNT_HRUN | sfr::TCNT_LONG | sfr::TCNT_HIE;
        let (mut mem, mut irq, mut t) = setup(ctl);
        mem.write_raw(sfr::T0LR, 0xFF);
        mem.write_raw(sfr::T0HR, 0xFF);
        mem.write_raw(sfr::IE, sfr::IE_MASTER);
        t.tick(&mut mem, &mut irq, true);
        t.tick(&mut mem, &mut irq, true);
        let c = mem.read_raw(sfr::T0CNT);
        assert_ne!(c & sfr::TCNT_LOVF, 0);
        assert_ne!(c & sfr::TCNT_HOVF, 0);
        assert_ne!(c & sfr::TCNT_HRUN, 0);
        assert_eq!(mem.read_raw(sfr::T0L), 0xFF);
        assert_eq!(mem.read_raw(sfr::T0H), 0xFF);
        assert_eq!(irq.next_pending(&mem), Some(Source::T0High));
    }

    #[test]
    fn test_high_8bit_overflow_forces_stop() {
        let (mut mem, mut irq, mut t) = setup(sfr::TCNT_HRUN);
        mem.write_raw(sfr::T0HR, 0xFF);
        t.tick(&mut mem, &mut irq, true);
        t.tick(&mut mem, &mut irq, true);
        let c = mem.read_raw(sfr::T0CNT);
        assert_eq!(c & sfr::TCNT_HRUN, 0);
        assert_ne!(c & sfr::TCNT_HOVF, 0);
        assert_eq!(mem.read_raw(sfr::T0H), 0xFF);
        // Flag set but interrupt disabled: nothing ready
        assert_eq!(irq.next_pending(&mem), None);

        // Stopped half stays pinned at reload
        mem.write_raw(sfr::T0HR, 0x42);
        for _ in 0..10 {
            t.tick(&mut mem, &mut irq, true);
            assert_eq!(mem.read_raw(sfr::T0H), 0x42);
        }
        assert_eq!(mem.read_raw(sfr::T0CNT) & sfr::TCNT_HRUN, 0);
    }

    #[test]
    fn test_disabled_half_pinned_to_reload() {
        let (mut mem, mut irq, mut t) = setup(0);
        mem.write_raw(sfr::T0LR, 0x33);
        mem.write_raw(sfr::T0HR, 0x44);
        t.tick(&mut mem, &mut irq, true);
        assert_eq!(mem.read_raw(sfr::T0L), 0x33);
        assert_eq!(mem.read_raw(sfr::T0H), 0x44);
    }

    #[test]
    fn test_timer1_uses_reload_latch() {
        let mut mem = Memory::new();
        let mut irq = Interrupts::new();
        let mut t = Timer::new(TimerAddrs::timer1());
        mem.write(sfr::T1L, 0xF0);
        mem.write_raw(sfr::T1CNT, sfr::TCNT_LRUN);
        t.tick(&mut mem, &mut irq, true);
        assert_eq!(mem.read_raw(sfr::T1L), 0xF0);
        for _ in 0..16 {
            t.tick(&mut mem, &mut irq, true);
        }
        assert_eq!(mem.read_raw(sfr::T1L), 0xF0);
        assert_ne!(mem.read_raw(sfr::T1CNT) & sfr::TCNT_LOVF, 0);
        // Counter writes back never disturb the latch
        assert_eq!(mem.read_latch(sfr::T1L), 0xF0);
    }

    #[test]
    fn test_prescaler_period() {
        let mut p = Prescaler::new();
        let fired = (0..512).filter(|_| p.tick(0)).count();
        assert_eq!(fired, 2);
        let mut p = Prescaler::new();
        assert!((0..4).all(|_| p.tick(0xFF)));
        let mut p = Prescaler::new();
        let fired = (0..100).filter(|_| p.tick(0xF6)).count();
        assert_eq!(fired, 10);
    }

    proptest! {
        #[test]
        fn prop_8bit_low_counts_and_overflows(reload in 0u8..=0xFF, steps in 1usize..600) {
            let (mut mem, mut irq, mut t) = setup(sfr::TCNT_LRUN);
            mem.write_raw(sfr::T0LR, reload);
            t.tick(&mut mem, &mut irq, true);
            prop_assert_eq!(mem.read_raw(sfr::T0L), reload);

            let period = 0x100 - reload as usize;
            for n in 1..=steps {
                t.tick(&mut mem, &mut irq, true);
                let expected = reload as usize + n % period;
                prop_assert_eq!(mem.read_raw(sfr::T0L) as usize, expected);
                let flagged = mem.read_raw(sfr::T0CNT) & sfr::TCNT_LOVF != 0;
                prop_assert_eq!(flagged, n >= period);
            }
        }
    }
}
