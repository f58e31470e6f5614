//! LC86K interrupt controller.
//!
//! Every source owns an enable bit and a flag bit inside an SFR. Peripherals
//! raise a source by setting its flag through raw access; the CPU asks for the
//! highest-priority source whose flag and enable are both set, at instruction
//! boundaries only.

use crate::memory::Memory;
use crate::sfr;

/// Interrupt sources, declared in fixed priority order (highest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Int0,
    Int1,
    Int2,
    T0Low,
    Int3,
    BaseTimer0,
    BaseTimer1,
    T0High,
    T1Low,
    T1High,
    Sio0,
    Sio1,
    Port3,
}

/// Who clears a source's flag once it has been dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearPolicy {
    /// Cleared by the controller on dispatch
    Hardware,
    /// Left set; the handler must clear it
    Handler,
}

impl Source {
    /// All sources, highest priority first.
    pub const ALL: [Source; 13] = [
        Source::Int0,
        Source::Int1,
        Source::Int2,
        Source::T0Low,
        Source::Int3,
        Source::BaseTimer0,
        Source::BaseTimer1,
        Source::T0High,
        Source::T1Low,
        Source::T1High,
        Source::Sio0,
        Source::Sio1,
        Source::Port3,
    ];

    /// Program address the CPU jumps to when this source is dispatched.
    pub fn vector(self) -> u16 {
        match self {
            Source::Int0 => 0x03,
            Source::Int1 => 0x0B,
            Source::Int2 | Source::T0Low => 0x13,
            Source::Int3 | Source::BaseTimer0 | Source::BaseTimer1 => 0x1B,
            Source::T0High => 0x23,
            Source::T1Low | Source::T1High => 0x2B,
            Source::Sio0 => 0x33,
            Source::Sio1 => 0x3B,
            Source::Port3 => 0x4B,
        }
    }

    /// (control register, enable mask, flag mask)
    fn wiring(self) -> (u16, u8, u8) {
        match self {
            Source::Int0 => (sfr::I01CR, 0x01, 0x02),
            Source::Int1 => (sfr::I01CR, 0x10, 0x20),
            Source::Int2 => (sfr::I23CR, 0x01, 0x02),
            Source::T0Low => (sfr::T0CNT, sfr::TCNT_LIE, sfr::TCNT_LOVF),
            Source::Int3 => (sfr::I23CR, 0x10, 0x20),
            Source::BaseTimer0 => (sfr::BTCR, sfr::BTCR_INT0_IE, sfr::BTCR_INT0_FLAG),
            Source::BaseTimer1 => (sfr::BTCR, sfr::BTCR_INT1_IE, sfr::BTCR_INT1_FLAG),
            Source::T0High => (sfr::T0CNT, sfr::TCNT_HIE, sfr::TCNT_HOVF),
            Source::T1Low => (sfr::T1CNT, sfr::TCNT_LIE, sfr::TCNT_LOVF),
            Source::T1High => (sfr::T1CNT, sfr::TCNT_HIE, sfr::TCNT_HOVF),
            Source::Sio0 => (sfr::SCON0, 0x01, 0x02),
            Source::Sio1 => (sfr::SCON1, 0x01, 0x02),
            Source::Port3 => (sfr::P3INT, 0x01, 0x02),
        }
    }

    fn bit(self) -> u16 {
        1 << self as u16
    }

    pub fn clear_policy(self) -> ClearPolicy {
        match self {
            Source::Int0 | Source::Int1 => ClearPolicy::Hardware,
            _ => ClearPolicy::Handler,
        }
    }
}

pub struct Interrupts {
    /// Requests latched without a flag bit, one bit per source in `ALL` order
    requests: u16,
    pub dbg_raise_count: u64,
    pub dbg_dispatch_count: u64,
}

impl Interrupts {
    pub fn new() -> Self {
        Interrupts {
            requests: 0,
            dbg_raise_count: 0,
            dbg_dispatch_count: 0,
        }
    }

    pub fn reset(&mut self) {
        self.requests = 0;
        self.dbg_raise_count = 0;
        self.dbg_dispatch_count = 0;
    }

    /// Latch a request: set the source's flag bit (raw write).
    pub fn raise(&mut self, mem: &mut Memory, source: Source) {
        let (reg, _, flag) = source.wiring();
        let v = mem.read_raw(reg);
        mem.write_raw(reg, v | flag);
        self.dbg_raise_count += 1;
    }

    /// Latch a request on the source's vector without touching its flag bit.
    /// Still gated by the source's enable; cleared on dispatch.
    pub fn request(&mut self, source: Source) {
        self.requests |= source.bit();
        self.dbg_raise_count += 1;
    }

    /// Flag bit set, regardless of enable.
    pub fn is_flagged(&self, mem: &Memory, source: Source) -> bool {
        let (reg, _, flag) = source.wiring();
        mem.read_raw(reg) & flag != 0
    }

    /// Enable set, and either the flag or a flagless request.
    pub fn is_ready(&self, mem: &Memory, source: Source) -> bool {
        let (reg, enable, flag) = source.wiring();
        let v = mem.read_raw(reg);
        v & enable != 0 && (v & flag != 0 || self.requests & source.bit() != 0)
    }

    /// Highest-priority ready source, if the master enable is on.
    pub fn next_pending(&self, mem: &Memory) -> Option<Source> {
        if mem.read_raw(sfr::IE) & sfr::IE_MASTER == 0 {
            return None;
        }
        Source::ALL.into_iter().find(|&s| self.is_ready(mem, s))
    }

    /// Bookkeeping on dispatch: clears the flag for hardware-cleared sources.
    pub fn acknowledge(&mut self, mem: &mut Memory, source: Source) {
        self.dbg_dispatch_count += 1;
        self.requests &= !source.bit();
        if source.clear_policy() == ClearPolicy::Hardware {
            let (reg, _, flag) = source.wiring();
            let v = mem.read_raw(reg);
            mem.write_raw(reg, v & !flag);
        }
    }
}

impl Default for Interrupts {
    fn default() -> Self {
        Self::new()
    }
}
