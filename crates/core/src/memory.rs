//! LC86K memory subsystem.
//!
//! Direct (`d9`) addresses cover a 512-byte window:
//!
//! | Address Range | Content                                     |
//! |---------------|---------------------------------------------|
//! | 0x000–0x0FF   | RAM, bank selected by `PSW.RAMBK0`          |
//! | 0x100–0x17F   | Special-function registers                  |
//! | 0x180–0x1FF   | XRAM (LCD), bank selected by `XBNK`         |
//!
//! Program memory is the low 64 KB of [`Flash`]. The 512-byte Maple work
//! RAM is only reachable through the `VTRBF` register.
//!
//! Every location has two access paths. [`Memory::read_raw`] and
//! [`Memory::write_raw`] are plain storage, used by peripherals writing back
//! their own derived state. [`Memory::read`] and [`Memory::write`] apply the
//! SFR side-effect table and are used by the CPU and by input injection.

use crate::flash::Flash;
use crate::sfr;

/// Size of one RAM bank
pub const RAM_BANK_SIZE: usize = 0x100;
/// Size of the SFR block
pub const SFR_SIZE: usize = 0x80;
/// Size of one XRAM bank
pub const XRAM_BANK_SIZE: usize = 0x80;
/// Number of XRAM banks (two LCD halves + icon bank)
pub const XRAM_BANKS: usize = 3;
/// Maple work RAM size
pub const WRAM_SIZE: usize = 0x200;

/// Direct address width mask (9 bits)
const ADDR_MASK: u16 = 0x1FF;

pub struct Memory {
    /// Two 256-byte RAM banks. Stack and indirect registers always use bank 0.
    pub ram: [[u8; RAM_BANK_SIZE]; 2],
    /// SFR storage (0x100–0x17F)
    pub sfr: [u8; SFR_SIZE],
    /// XRAM banks mapped at 0x180–0x1FF
    pub xram: [[u8; XRAM_BANK_SIZE]; XRAM_BANKS],
    /// Work RAM behind VTRBF
    pub wram: [u8; WRAM_SIZE],
    /// Flash controller backing program memory
    pub flash: Flash,
    /// Write-side latches for T1LR / T1HR, which share addresses with T1L / T1H
    t1_reload: [u8; 2],
    /// Set by an effectful read of P3; drained by the CPU after each instruction
    p3_sampled: bool,
}

impl Memory {
    pub fn new() -> Self {
        Memory {
            ram: [[0u8; RAM_BANK_SIZE]; 2],
            sfr: [0u8; SFR_SIZE],
            xram: [[0u8; XRAM_BANK_SIZE]; XRAM_BANKS],
            wram: [0u8; WRAM_SIZE],
            flash: Flash::new(),
            t1_reload: [0; 2],
            p3_sampled: false,
        }
    }

    /// Clear RAM and registers. Flash contents are kept.
    pub fn reset(&mut self) {
        self.ram = [[0u8; RAM_BANK_SIZE]; 2];
        self.sfr = [0u8; SFR_SIZE];
        self.xram = [[0u8; XRAM_BANK_SIZE]; XRAM_BANKS];
        self.wram = [0u8; WRAM_SIZE];
        self.t1_reload = [0; 2];
        self.p3_sampled = false;
    }

    #[inline(always)]
    fn ram_bank(&self) -> usize {
        ((self.sfr_raw(sfr::PSW) & sfr::PSW_RAMBK0) >> 1) as usize
    }

    #[inline(always)]
    fn xram_bank(&self) -> usize {
        (self.sfr_raw(sfr::XBNK) as usize).min(XRAM_BANKS - 1)
    }

    #[inline(always)]
    fn sfr_raw(&self, addr: u16) -> u8 {
        self.sfr[(addr - sfr::SFR_BASE) as usize]
    }

    // --- Raw access ---

    #[inline(always)]
    pub fn read_raw(&self, addr: u16) -> u8 {
        let a = addr & ADDR_MASK;
        if a < sfr::SFR_BASE {
            self.ram[self.ram_bank()][a as usize]
        } else if a < sfr::XRAM_BASE {
            self.sfr_raw(a)
        } else {
            self.xram[self.xram_bank()][(a - sfr::XRAM_BASE) as usize]
        }
    }

    #[inline(always)]
    pub fn write_raw(&mut self, addr: u16, v: u8) {
        let a = addr & ADDR_MASK;
        if a < sfr::SFR_BASE {
            let bank = self.ram_bank();
            self.ram[bank][a as usize] = v;
        } else if a < sfr::XRAM_BASE {
            self.sfr[(a - sfr::SFR_BASE) as usize] = v;
        } else {
            let bank = self.xram_bank();
            self.xram[bank][(a - sfr::XRAM_BASE) as usize] = v;
        }
    }

    /// Value last written to a reload register.
    ///
    /// Identical to [`read_raw`](Self::read_raw) except for T1LR / T1HR,
    /// whose write latch lives behind the T1L / T1H counter addresses.
    pub fn read_latch(&self, addr: u16) -> u8 {
        match addr & ADDR_MASK {
            sfr::T1L => self.t1_reload[0],
            sfr::T1H => self.t1_reload[1],
            a => self.read_raw(a),
        }
    }

    // --- Effectful access ---

    /// CPU read with SFR side effects.
    pub fn read(&mut self, addr: u16) -> u8 {
        match addr & ADDR_MASK {
            sfr::VTRBF => {
                let a = self.wram_addr();
                let v = self.wram[a];
                self.advance_wram_addr();
                v
            }
            sfr::P3 => {
                self.p3_sampled = true;
                self.sfr_raw(sfr::P3)
            }
            a => self.read_raw(a),
        }
    }

    /// CPU / input-injection write with SFR side effects.
    pub fn write(&mut self, addr: u16, value: u8) {
        match addr & ADDR_MASK {
            sfr::ACC => {
                self.write_raw(sfr::ACC, value);
                self.update_parity();
            }
            sfr::PSW => {
                self.write_raw(sfr::PSW, value);
                self.update_parity();
            }
            sfr::T1L => self.t1_reload[0] = value,
            sfr::T1H => self.t1_reload[1] = value,
            sfr::XBNK => self.write_raw(sfr::XBNK, value & 0x03),
            sfr::VTRBF => {
                let a = self.wram_addr();
                self.wram[a] = value;
                self.advance_wram_addr();
            }
            sfr::P3 => {
                // Pins configured as outputs keep their latched level
                let ddr = self.sfr_raw(sfr::P3DDR);
                let old = self.sfr_raw(sfr::P3);
                self.write_raw(sfr::P3, (value & !ddr) | (old & ddr));
            }
            a => self.write_raw(a, value),
        }
    }

    /// Returns true once per effectful P3 read.
    pub fn take_p3_sampled(&mut self) -> bool {
        std::mem::take(&mut self.p3_sampled)
    }

    /// PSW.P tracks the parity of ACC (set when the bit count is odd).
    fn update_parity(&mut self) {
        let acc = self.sfr_raw(sfr::ACC);
        let psw = self.sfr_raw(sfr::PSW) & !sfr::PSW_P;
        let p = (acc.count_ones() & 1) as u8;
        self.write_raw(sfr::PSW, psw | p);
    }

    fn wram_addr(&self) -> usize {
        (((self.sfr_raw(sfr::VRMAD2) & 1) as usize) << 8) | self.sfr_raw(sfr::VRMAD1) as usize
    }

    fn advance_wram_addr(&mut self) {
        if self.sfr_raw(sfr::VSEL) & sfr::VSEL_INCE == 0 {
            return;
        }
        let next = (self.wram_addr() + 1) & (WRAM_SIZE - 1);
        self.write_raw(sfr::VRMAD1, next as u8);
        self.write_raw(sfr::VRMAD2, (next >> 8) as u8);
    }

    // --- Stack and indirect registers ---

    /// Push onto the stack (pre-increment, RAM bank 0).
    pub fn push(&mut self, v: u8) {
        let sp = self.sfr_raw(sfr::SP).wrapping_add(1);
        self.write_raw(sfr::SP, sp);
        self.ram[0][sp as usize] = v;
    }

    /// Pop from the stack (post-decrement, RAM bank 0).
    pub fn pop(&mut self) -> u8 {
        let sp = self.sfr_raw(sfr::SP);
        let v = self.ram[0][sp as usize];
        self.write_raw(sfr::SP, sp.wrapping_sub(1));
        v
    }

    /// Resolve `@Rn` to a direct address.
    ///
    /// R0–R3 live in RAM bank 0 at `IRBK * 4`. R0/R1 point into RAM,
    /// R2/R3 point into the SFR/XRAM half.
    pub fn indirect_addr(&self, n: u8) -> u16 {
        let irbk = (self.sfr_raw(sfr::PSW) >> 3) & 0x03;
        let ptr = self.ram[0][(irbk * 4 + (n & 3)) as usize] as u16;
        if n & 2 != 0 { ptr | 0x100 } else { ptr }
    }

    // --- Program memory ---

    /// Read a byte from the program memory window (flash bank 0).
    #[inline(always)]
    pub fn read_program(&self, addr: u16) -> u8 {
        self.flash.read(addr as usize)
    }

    /// XRAM bank contents, for the LCD renderer.
    pub fn xram_bank_data(&self, bank: usize) -> &[u8; XRAM_BANK_SIZE] {
        &self.xram[bank.min(XRAM_BANKS - 1)]
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ram_bank_select() {
        let mut mem = Memory::new();
        mem.write_raw(0x10, 0xAA);
        mem.write(sfr::PSW, sfr::PSW_RAMBK0);
        assert_eq!(mem.read_raw(0x10), 0x00);
        mem.write_raw(0x10, 0x55);
        mem.write(sfr::PSW, 0);
        assert_eq!(mem.read_raw(0x10), 0xAA);
        assert_eq!(mem.ram[1][0x10], 0x55);
    }

    #[test]
    fn test_xram_bank_select() {
        let mut mem = Memory::new();
        mem.write(sfr::XBNK, 1);
        mem.write(0x180, 0x12);
        assert_eq!(mem.xram[1][0], 0x12);
        mem.write(sfr::XBNK, 0xFF);
        assert_eq!(mem.read_raw(sfr::XBNK), 0x03);
        // Bank 3 does not exist; the icon bank is the last one
        mem.write(0x181, 0x34);
        assert_eq!(mem.xram[2][1], 0x34);

        // Raw writes store the full byte, no mask
        mem.write_raw(sfr::XBNK, 0xFF);
        assert_eq!(mem.read_raw(sfr::XBNK), 0xFF);
        assert_eq!(mem.read(sfr::XBNK), 0xFF);
        mem.write_raw(sfr::XBNK, 0x05);
        assert_eq!(mem.read_raw(sfr::XBNK), 0x05);
        mem.write(sfr::XBNK, 0x05);
        assert_eq!(mem.read_raw(sfr::XBNK), 0x01);
    }

    #[test]
    fn test_acc_parity_effectful_only() {
        let mut mem = Memory::new();
        mem.write(sfr::ACC, 0b0000_0111);
        assert_eq!(mem.read_raw(sfr::PSW) & sfr::PSW_P, 1);
        mem.write(sfr::ACC, 0b0000_0011);
        assert_eq!(mem.read_raw(sfr::PSW) & sfr::PSW_P, 0);
        mem.write_raw(sfr::ACC, 0b0000_0001);
        assert_eq!(mem.read_raw(sfr::PSW) & sfr::PSW_P, 0);
    }

    #[test]
    fn test_psw_write_keeps_parity() {
        let mut mem = Memory::new();
        mem.write(sfr::ACC, 0x01);
        mem.write(sfr::PSW, sfr::PSW_CY);
        assert_eq!(mem.read_raw(sfr::PSW), sfr::PSW_CY | sfr::PSW_P);
        mem.write_raw(sfr::PSW, sfr::PSW_CY);
        assert_eq!(mem.read_raw(sfr::PSW), sfr::PSW_CY);
    }

    #[test]
    fn test_t1_reload_latch() {
        let mut mem = Memory::new();
        mem.write_raw(sfr::T1L, 0x42);
        mem.write(sfr::T1L, 0xF0);
        assert_eq!(mem.read(sfr::T1L), 0x42);
        assert_eq!(mem.read_latch(sfr::T1L), 0xF0);
        mem.write(sfr::T1H, 0x80);
        assert_eq!(mem.read_latch(sfr::T1H), 0x80);
        assert_eq!(mem.read_raw(sfr::T1H), 0x00);
        // Raw writes hit the counter byte, never the latch
        mem.write_raw(sfr::T1L, 0x01);
        assert_eq!(mem.read_latch(sfr::T1L), 0xF0);
        // Ordinary registers have no separate latch
        mem.write(sfr::T0LR, 0x33);
        assert_eq!(mem.read_latch(sfr::T0LR), 0x33);
    }

    #[test]
    fn test_vtrbf_autoincrement() {
        let mut mem = Memory::new();
        mem.write(sfr::VSEL, sfr::VSEL_INCE);
        mem.write(sfr::VRMAD1, 0xFF);
        mem.write(sfr::VRMAD2, 0x00);
        mem.write(sfr::VTRBF, 0xAB);
        mem.write(sfr::VTRBF, 0xCD);
        assert_eq!(mem.wram[0x0FF], 0xAB);
        assert_eq!(mem.wram[0x100], 0xCD);
        assert_eq!(mem.read_raw(sfr::VRMAD1), 0x01);
        assert_eq!(mem.read_raw(sfr::VRMAD2), 0x01);

        mem.write(sfr::VRMAD1, 0xFF);
        mem.write(sfr::VRMAD2, 0x00);
        assert_eq!(mem.read(sfr::VTRBF), 0xAB);
        assert_eq!(mem.read(sfr::VTRBF), 0xCD);
    }

    #[test]
    fn test_vtrbf_raw_is_plain_storage() {
        let mut mem = Memory::new();
        mem.write(sfr::VSEL, sfr::VSEL_INCE);
        mem.write_raw(sfr::VTRBF, 0x77);
        assert_eq!(mem.read_raw(sfr::VTRBF), 0x77);
        assert_eq!(mem.wram[0], 0);
        assert_eq!(mem.read_raw(sfr::VRMAD1), 0);
    }

    #[test]
    fn test_p3_output_pins_keep_latch() {
        let mut mem = Memory::new();
        mem.write_raw(sfr::P3, 0xFF);
        mem.write(sfr::P3DDR, 0x80);
        mem.write(sfr::P3, 0x00);
        assert_eq!(mem.read_raw(sfr::P3), 0x80);
        mem.write_raw(sfr::P3, 0x00);
        assert_eq!(mem.read_raw(sfr::P3), 0x00);
    }

    #[test]
    fn test_p3_read_marks_sample() {
        let mut mem = Memory::new();
        mem.read_raw(sfr::P3);
        assert!(!mem.take_p3_sampled());
        mem.read(sfr::P3);
        assert!(mem.take_p3_sampled());
        assert!(!mem.take_p3_sampled());
    }

    #[test]
    fn test_stack_push_pop() {
        let mut mem = Memory::new();
        mem.write(sfr::SP, 0x7F);
        mem.write(sfr::PSW, sfr::PSW_RAMBK0);
        mem.push(0x12);
        mem.push(0x34);
        assert_eq!(mem.read_raw(sfr::SP), 0x81);
        assert_eq!(mem.ram[0][0x80], 0x12);
        assert_eq!(mem.pop(), 0x34);
        assert_eq!(mem.pop(), 0x12);
        assert_eq!(mem.read_raw(sfr::SP), 0x7F);
    }

    #[test]
    fn test_indirect_registers() {
        let mut mem = Memory::new();
        mem.ram[0][0] = 0x20;
        mem.ram[0][2] = 0x44;
        mem.ram[0][4 + 1] = 0x30;
        assert_eq!(mem.indirect_addr(0), 0x020);
        assert_eq!(mem.indirect_addr(2), 0x144);
        mem.write(sfr::PSW, sfr::PSW_IRBK0);
        assert_eq!(mem.indirect_addr(1), 0x030);
    }
}
