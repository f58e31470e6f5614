//! LC86K CPU core.
//!
//! The CPU advances one clock cycle per [`Vmu::step`]. At an instruction
//! boundary it dispatches a pending interrupt, idles in HALT, runs a firmware
//! service when execution has entered the ROM bank, or executes the next
//! instruction and owes its remaining cycles to the following steps.
//!
//! Arithmetic flags live in `PSW` (memory-mapped), so the flag helpers
//! operate on [`Memory`] directly. ACC writes go through the effectful path
//! to keep `PSW.P` in sync.

use tracing::{debug, trace, warn, Level};

use crate::disasm;
use crate::interrupts::Source;
use crate::memory::Memory;
use crate::opcodes::{self, Instruction, Operand};
use crate::sfr;
use crate::Vmu;

/// Cycles charged for interrupt entry
pub const INTERRUPT_CYCLES: u8 = 2;
/// Cycles charged for a firmware service call
pub const FIRMWARE_CYCLES: u8 = 2;

// Firmware entry points in the ROM bank
pub const FW_FLASH_WRITE: u16 = 0x100;
pub const FW_FLASH_VERIFY: u16 = 0x110;
pub const FW_FLASH_READ: u16 = 0x120;
pub const FW_CLOCK: u16 = 0x130;
pub const FW_EXIT: u16 = 0x1F0;

/// RAM bank 1 addresses used by the flash services: address bit 16, high, low
const FW_ADDR_BANK: usize = 0x7D;
const FW_ADDR_HI: usize = 0x7E;
const FW_ADDR_LO: usize = 0x7F;
/// Data buffer for the flash services (RAM bank 1)
const FW_BUFFER: usize = 0x80;
const FW_BLOCK: usize = 128;

/// CPU state for the LC86K.
///
/// Registers (ACC, PSW, SP, ...) are SFRs and live in [`Memory`].
pub struct Cpu {
    pub pc: u16,
    /// Monotonic cycle counter
    pub tick: u64,
    /// Cycles still owed by the instruction in progress
    pub busy: u8,
    /// An interrupt handler is running (no RETI yet)
    pub in_service: bool,
    /// Executing from the ROM bank (latched from EXT.0 by JMPF)
    pub in_rom: bool,
    /// Address in flash where ROM code resumes
    pub rom_return: u16,
    /// P3 has been sampled since the last input injection
    pub input_consumed: bool,
    /// Set by the exit service or an unserviced ROM entry
    pub stopped: bool,
}

impl Cpu {
    pub fn new() -> Self {
        Cpu {
            pc: 0,
            tick: 0,
            busy: 0,
            in_service: false,
            in_rom: false,
            rom_return: 0,
            input_consumed: true,
            stopped: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Cpu::new();
    }

    /// True when the next step starts a new instruction.
    pub fn at_boundary(&self) -> bool {
        self.busy == 0
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

// --- Flag helpers ---

#[inline(always)]
fn psw_flag(mem: &Memory, mask: u8) -> bool {
    mem.read_raw(sfr::PSW) & mask != 0
}

/// Update CY, AC and OV, leaving the other PSW bits alone.
fn set_arith_flags(mem: &mut Memory, cy: bool, ac: bool, ov: bool) {
    let mut psw = mem.read_raw(sfr::PSW) & !(sfr::PSW_CY | sfr::PSW_AC | sfr::PSW_OV);
    if cy { psw |= sfr::PSW_CY; }
    if ac { psw |= sfr::PSW_AC; }
    if ov { psw |= sfr::PSW_OV; }
    mem.write_raw(sfr::PSW, psw);
}

fn set_carry(mem: &mut Memory, cy: bool) {
    let psw = mem.read_raw(sfr::PSW) & !sfr::PSW_CY;
    mem.write_raw(sfr::PSW, if cy { psw | sfr::PSW_CY } else { psw });
}

/// ADD/ADDC result and flags.
pub fn flags_add(mem: &mut Memory, a: u8, v: u8, c: u8) -> u8 {
    let sum = a as u16 + v as u16 + c as u16;
    let r = sum as u8;
    let ac = (a & 0x0F) + (v & 0x0F) + c > 0x0F;
    let ov = (a ^ r) & (v ^ r) & 0x80 != 0;
    set_arith_flags(mem, sum > 0xFF, ac, ov);
    r
}

/// SUB/SUBC result and flags (CY and AC are borrows).
pub fn flags_sub(mem: &mut Memory, a: u8, v: u8, c: u8) -> u8 {
    let diff = a as i16 - v as i16 - c as i16;
    let r = diff as u8;
    let ac = (a & 0x0F) < (v & 0x0F) + c;
    let ov = (a ^ v) & (a ^ r) & 0x80 != 0;
    set_arith_flags(mem, diff < 0, ac, ov);
    r
}

impl Vmu {
    /// Advance the CPU by one clock cycle.
    pub fn step(&mut self) {
        self.cpu.tick += 1;
        if self.cpu.busy > 0 {
            self.cpu.busy -= 1;
            return;
        }
        if self.cpu.stopped {
            return;
        }

        // Firmware services run to completion before any dispatch
        if !self.cpu.in_service && !self.cpu.in_rom {
            if let Some(source) = self.irq.next_pending(&self.mem) {
                self.enter_interrupt(source);
                self.cpu.busy = INTERRUPT_CYCLES - 1;
                return;
            }
        }

        if self.mem.read_raw(sfr::PCON) & sfr::PCON_HALT != 0 {
            return;
        }

        if self.cpu.in_rom {
            let cycles = self.firmware_call();
            self.cpu.busy = cycles.saturating_sub(1);
            return;
        }

        let pc = self.cpu.pc;
        let (inst, size) = opcodes::decode(self.fetch(pc));
        if tracing::enabled!(Level::TRACE) {
            trace!("{:04X}: {}", pc, disasm::disassemble(inst, pc));
        }
        let cycles = self.execute_inst(inst, size);
        self.cpu.busy = cycles - 1;

        if self.mem.take_p3_sampled() {
            self.cpu.input_consumed = true;
        }
    }

    /// Opcode byte and the two bytes after it.
    pub fn fetch(&self, pc: u16) -> [u8; 3] {
        [
            self.mem.read_program(pc),
            self.mem.read_program(pc.wrapping_add(1)),
            self.mem.read_program(pc.wrapping_add(2)),
        ]
    }

    fn enter_interrupt(&mut self, source: Source) {
        self.irq.acknowledge(&mut self.mem, source);
        let pc = self.cpu.pc;
        self.push_pc(pc);
        self.cpu.pc = source.vector();
        self.cpu.in_service = true;
        let pcon = self.mem.read_raw(sfr::PCON);
        self.mem.write_raw(sfr::PCON, pcon & !sfr::PCON_HALT);
        trace!("interrupt {:?}: {:04X} -> {:04X}", source, pc, self.cpu.pc);
    }

    /// Execute a single decoded instruction and return the cycle cost.
    pub fn execute_inst(&mut self, inst: Instruction, size: u8) -> u8 {
        self.cpu.pc = self.cpu.pc.wrapping_add(size as u16);
        let next = self.cpu.pc;

        match inst {
            Instruction::Nop => {}

            // -- Branches --
            Instruction::Br { r } => self.branch(r),
            Instruction::Brf { r } => self.cpu.pc = next.wrapping_sub(1).wrapping_add(r),
            Instruction::Bz { r } => {
                if self.acc() == 0 { self.branch(r); }
            }
            Instruction::Bnz { r } => {
                if self.acc() != 0 { self.branch(r); }
            }
            Instruction::Bp { d, b, r } => {
                if self.mem.read(d) & (1 << b) != 0 { self.branch(r); }
            }
            Instruction::Bn { d, b, r } => {
                if self.mem.read(d) & (1 << b) == 0 { self.branch(r); }
            }
            Instruction::Bpc { d, b, r } => {
                let v = self.mem.read(d);
                if v & (1 << b) != 0 {
                    self.mem.write(d, v & !(1 << b));
                    self.branch(r);
                }
            }
            Instruction::Be { src, r } => {
                let a = self.acc();
                let v = self.read_operand(src);
                self.compare_branch(a, v, true, r);
            }
            Instruction::BeInd { n, k, r } => {
                let v = self.read_operand(Operand::Indirect(n));
                self.compare_branch(v, k, true, r);
            }
            Instruction::Bne { src, r } => {
                let a = self.acc();
                let v = self.read_operand(src);
                self.compare_branch(a, v, false, r);
            }
            Instruction::BneInd { n, k, r } => {
                let v = self.read_operand(Operand::Indirect(n));
                self.compare_branch(v, k, false, r);
            }
            Instruction::Dbnz { dst, r } => {
                let v = self.read_operand(dst).wrapping_sub(1);
                self.write_operand(dst, v);
                if v != 0 { self.branch(r); }
            }

            // -- Jumps and calls --
            Instruction::Jmp { a } => self.cpu.pc = (next & 0xF000) | a,
            Instruction::Jmpf { a } => {
                self.cpu.pc = a;
                // Bank changes written to EXT take effect here
                let rom = self.mem.read_raw(sfr::EXT) & sfr::EXT_FLASH == 0;
                if rom {
                    self.cpu.rom_return = next;
                }
                self.cpu.in_rom = rom;
            }
            Instruction::Call { a } => {
                self.push_pc(next);
                self.cpu.pc = (next & 0xF000) | a;
            }
            Instruction::Callf { a } => {
                self.push_pc(next);
                self.cpu.pc = a;
            }
            Instruction::Callr { r } => {
                self.push_pc(next);
                self.cpu.pc = next.wrapping_sub(1).wrapping_add(r);
            }
            Instruction::Ret => self.cpu.pc = self.pop_pc(),
            Instruction::Reti => {
                self.cpu.pc = self.pop_pc();
                self.cpu.in_service = false;
            }

            // -- Data transfer --
            Instruction::Ld { src } => {
                let v = self.read_operand(src);
                self.set_acc(v);
            }
            Instruction::St { dst } => {
                let a = self.acc();
                self.write_operand(dst, a);
            }
            Instruction::Mov { k, dst } => self.write_operand(dst, k),
            Instruction::Ldc => {
                let addr = self.table_addr().wrapping_add(self.acc() as u16);
                let v = self.mem.read_program(addr);
                self.set_acc(v);
            }
            Instruction::Ldf => {
                let v = self.mem.flash.read(self.flash_addr());
                self.set_acc(v);
            }
            Instruction::Stf => {
                let addr = self.flash_addr();
                let a = self.acc();
                self.mem.flash.write(addr, a);
            }
            Instruction::Push { d } => {
                let v = self.mem.read(d);
                self.mem.push(v);
            }
            Instruction::Pop { d } => {
                let v = self.mem.pop();
                self.mem.write(d, v);
            }
            Instruction::Xch { src } => {
                let v = self.read_operand(src);
                let a = self.acc();
                self.write_operand(src, a);
                self.set_acc(v);
            }

            // -- Arithmetic --
            Instruction::Inc { dst } => {
                let v = self.read_operand(dst).wrapping_add(1);
                self.write_operand(dst, v);
            }
            Instruction::Dec { dst } => {
                let v = self.read_operand(dst).wrapping_sub(1);
                self.write_operand(dst, v);
            }
            Instruction::Add { src } => {
                let v = self.read_operand(src);
                let a = self.acc();
                let r = flags_add(&mut self.mem, a, v, 0);
                self.set_acc(r);
            }
            Instruction::Addc { src } => {
                let v = self.read_operand(src);
                let a = self.acc();
                let c = psw_flag(&self.mem, sfr::PSW_CY) as u8;
                let r = flags_add(&mut self.mem, a, v, c);
                self.set_acc(r);
            }
            Instruction::Sub { src } => {
                let v = self.read_operand(src);
                let a = self.acc();
                let r = flags_sub(&mut self.mem, a, v, 0);
                self.set_acc(r);
            }
            Instruction::Subc { src } => {
                let v = self.read_operand(src);
                let a = self.acc();
                let c = psw_flag(&self.mem, sfr::PSW_CY) as u8;
                let r = flags_sub(&mut self.mem, a, v, c);
                self.set_acc(r);
            }
            Instruction::Mul => {
                let x = ((self.acc() as u32) << 8) | self.mem.read_raw(sfr::C) as u32;
                let p = x * self.mem.read_raw(sfr::B) as u32;
                self.mem.write(sfr::B, (p >> 16) as u8);
                self.mem.write(sfr::C, p as u8);
                self.set_acc((p >> 8) as u8);
                let psw = self.mem.read_raw(sfr::PSW) & !(sfr::PSW_CY | sfr::PSW_OV);
                let ov = if p > 0xFFFF { sfr::PSW_OV } else { 0 };
                self.mem.write_raw(sfr::PSW, psw | ov);
            }
            Instruction::Div => {
                let x = ((self.acc() as u16) << 8) | self.mem.read_raw(sfr::C) as u16;
                let d = self.mem.read_raw(sfr::B) as u16;
                let psw = self.mem.read_raw(sfr::PSW) & !(sfr::PSW_CY | sfr::PSW_OV);
                if d == 0 {
                    // Operands are left untouched
                    self.mem.write_raw(sfr::PSW, psw | sfr::PSW_OV);
                } else {
                    let (q, rem) = (x / d, x % d);
                    self.mem.write(sfr::B, rem as u8);
                    self.mem.write(sfr::C, q as u8);
                    self.set_acc((q >> 8) as u8);
                    let psw = self.mem.read_raw(sfr::PSW) & !(sfr::PSW_CY | sfr::PSW_OV);
                    self.mem.write_raw(sfr::PSW, psw);
                }
            }

            // -- Logic --
            Instruction::And { src } => {
                let v = self.read_operand(src);
                self.set_acc(self.acc() & v);
            }
            Instruction::Or { src } => {
                let v = self.read_operand(src);
                self.set_acc(self.acc() | v);
            }
            Instruction::Xor { src } => {
                let v = self.read_operand(src);
                self.set_acc(self.acc() ^ v);
            }
            Instruction::Rol => self.set_acc(self.acc().rotate_left(1)),
            Instruction::Ror => self.set_acc(self.acc().rotate_right(1)),
            Instruction::Rolc => {
                let a = self.acc();
                let c = psw_flag(&self.mem, sfr::PSW_CY) as u8;
                self.set_acc((a << 1) | c);
                set_carry(&mut self.mem, a & 0x80 != 0);
            }
            Instruction::Rorc => {
                let a = self.acc();
                let c = psw_flag(&self.mem, sfr::PSW_CY) as u8;
                self.set_acc((a >> 1) | (c << 7));
                set_carry(&mut self.mem, a & 0x01 != 0);
            }

            // -- Bit manipulation --
            Instruction::Set1 { d, b } => {
                let v = self.mem.read(d);
                self.mem.write(d, v | (1 << b));
            }
            Instruction::Clr1 { d, b } => {
                let v = self.mem.read(d);
                self.mem.write(d, v & !(1 << b));
            }
            Instruction::Not1 { d, b } => {
                let v = self.mem.read(d);
                self.mem.write(d, v ^ (1 << b));
            }
        }

        inst.cycles()
    }

    #[inline(always)]
    fn acc(&self) -> u8 {
        self.mem.read_raw(sfr::ACC)
    }

    #[inline(always)]
    fn set_acc(&mut self, v: u8) {
        self.mem.write(sfr::ACC, v);
    }

    fn branch(&mut self, r: i8) {
        self.cpu.pc = self.cpu.pc.wrapping_add(r as i16 as u16);
    }

    /// BE/BNE: CY = lhs < rhs, branch on (in)equality.
    fn compare_branch(&mut self, lhs: u8, rhs: u8, on_equal: bool, r: i8) {
        set_carry(&mut self.mem, lhs < rhs);
        if (lhs == rhs) == on_equal {
            self.branch(r);
        }
    }

    fn read_operand(&mut self, op: Operand) -> u8 {
        match op {
            Operand::Imm(k) => k,
            Operand::Direct(d) => self.mem.read(d),
            Operand::Indirect(n) => {
                let addr = self.mem.indirect_addr(n);
                self.mem.read(addr)
            }
        }
    }

    fn write_operand(&mut self, op: Operand, v: u8) {
        match op {
            // The decoder never produces an immediate destination
            Operand::Imm(_) => {}
            Operand::Direct(d) => self.mem.write(d, v),
            Operand::Indirect(n) => {
                let addr = self.mem.indirect_addr(n);
                self.mem.write(addr, v);
            }
        }
    }

    fn table_addr(&self) -> u16 {
        ((self.mem.read_raw(sfr::TRH) as u16) << 8) | self.mem.read_raw(sfr::TRL) as u16
    }

    /// LDF/STF address: FPR bit 0 selects the upper 64 KB.
    fn flash_addr(&self) -> usize {
        (((self.mem.read_raw(sfr::FPR) & 1) as usize) << 16) | self.table_addr() as usize
    }

    /// Push a return address: low byte first.
    fn push_pc(&mut self, pc: u16) {
        self.mem.push(pc as u8);
        self.mem.push((pc >> 8) as u8);
    }

    fn pop_pc(&mut self) -> u16 {
        let hi = self.mem.pop();
        let lo = self.mem.pop();
        ((hi as u16) << 8) | lo as u16
    }

    // --- Firmware services ---

    /// Run the firmware routine at the current ROM address and return to flash.
    fn firmware_call(&mut self) -> u8 {
        let entry = self.cpu.pc;
        match entry {
            FW_FLASH_WRITE => {
                let addr = self.fw_flash_addr();
                for i in 0..FW_BLOCK {
                    let v = self.mem.ram[1][FW_BUFFER + i];
                    self.mem.flash.write(addr + i, v);
                }
                self.set_acc(0);
            }
            FW_FLASH_VERIFY => {
                let addr = self.fw_flash_addr();
                let same = (0..FW_BLOCK)
                    .all(|i| self.mem.flash.read(addr + i) == self.mem.ram[1][FW_BUFFER + i]);
                self.set_acc(if same { 0 } else { 0xFF });
            }
            FW_FLASH_READ => {
                let addr = self.fw_flash_addr();
                for i in 0..FW_BLOCK {
                    self.mem.ram[1][FW_BUFFER + i] = self.mem.flash.read(addr + i);
                }
            }
            FW_CLOCK => {
                let btcr = self.mem.read_raw(sfr::BTCR);
                self.mem.write_raw(sfr::BTCR, btcr & !sfr::BTCR_INT0_FLAG);
            }
            FW_EXIT => {
                debug!("firmware: exit requested, stopping CPU");
                self.cpu.stopped = true;
                return 1;
            }
            _ => {
                warn!("firmware: no service at ROM {:04X}, stopping CPU", entry);
                self.cpu.stopped = true;
                return 1;
            }
        }
        trace!("firmware: service {:04X} done, resuming at {:04X}", entry, self.cpu.rom_return);

        let ext = self.mem.read_raw(sfr::EXT);
        self.mem.write_raw(sfr::EXT, ext | sfr::EXT_FLASH);
        self.cpu.in_rom = false;
        self.cpu.pc = self.cpu.rom_return;
        FIRMWARE_CYCLES
    }

    fn fw_flash_addr(&self) -> usize {
        let ram = &self.mem.ram[1];
        (((ram[FW_ADDR_BANK] & 1) as usize) << 16)
            | ((ram[FW_ADDR_HI] as usize) << 8)
            | ram[FW_ADDR_LO] as usize
    }
}
