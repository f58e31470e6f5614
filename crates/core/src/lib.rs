//! # vmu-core
//!
//! Cycle-accurate emulation core for the Dreamcast Visual Memory Unit.
//!
//! Emulates the Sanyo LC86K-family 8-bit CPU with its memory-mapped special
//! function registers, two general-purpose timers, the 32.768 kHz base timer,
//! the interrupt controller and 128 KB of flash. The 48×32 LCD is not a
//! separate device: the frontend decodes it from XRAM.
//!
//! ## Architecture
//!
//! - [`Vmu`] — Machine context that owns every component and drives the frame loop
//! - [`Cpu`] — PC, in-flight instruction cycles, interrupt-in-service and ROM bank state
//! - [`Memory`] — RAM banks, SFRs, XRAM, Maple work RAM and flash, with raw and effectful access
//! - [`interrupts`] — Interrupt sources, priority and vectors
//! - [`peripherals`] — Timer 0/1, the Timer 0 prescaler and the base timer
//! - [`flash`] / [`image`] — Flash controller and raw / VMS / DCI image conversion
//! - [`disasm`] — Instruction disassembler for trace logs and debug views
//!
//! ## Timing
//!
//! One [`Vmu::run_cycle`] is one CPU cycle followed by one tick of each
//! timer. [`Vmu::run_frame`] samples input once, then runs exactly
//! `frequency / fps` cycles.

pub mod config;
pub mod cpu;
pub mod disasm;
pub mod error;
pub mod flash;
pub mod image;
pub mod interrupts;
pub mod memory;
pub mod opcodes;
pub mod peripherals;
pub mod sfr;

use tracing::debug;

pub use config::VmuConfig;
pub use cpu::Cpu;
pub use error::LoadError;
pub use flash::FLASH_SIZE;
pub use image::ImageFormat;
pub use interrupts::{Interrupts, Source};
pub use memory::Memory;

/// LCD width in pixels
pub const LCD_WIDTH: usize = 48;
/// LCD height in pixels
pub const LCD_HEIGHT: usize = 32;

/// RC oscillator frequency
pub const RC_HZ: u32 = 879_236;

// Register values after reset
const RESET_SP: u8 = 0x7F;
const RESET_P3: u8 = 0xFF;
const RESET_EXT: u8 = sfr::EXT_FLASH;
const RESET_OCR: u8 = sfr::OCR_DIV6 | 0x01;
const RESET_VCCR: u8 = 0x80;
const RESET_MCR: u8 = sfr::MCR_LCD_ON;
const RESET_IE: u8 = sfr::IE_MASTER;
const RESET_BTCR: u8 = sfr::BTCR_RUN | sfr::BTCR_INT0_IE;

/// P3 bits driven by the d-pad and A/B
const P3_INPUT_MASK: u8 = 0x3F;

/// VMU button identifiers, in P3 bit order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Up,
    Down,
    Left,
    Right,
    A,
    B,
    Mode,
    Sleep,
}

impl Button {
    /// P3 bit mask (the port is active-low)
    pub fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Main VMU emulator combining all subsystems
pub struct Vmu {
    pub cpu: Cpu,
    pub mem: Memory,
    pub irq: Interrupts,
    pub timer0: peripherals::Timer,
    pub timer1: peripherals::Timer,
    pub prescaler: peripherals::Prescaler,
    pub base_timer: peripherals::BaseTimer,
    pub config: VmuConfig,
    /// Pressed buttons, one bit per [`Button`] (1 = pressed)
    buttons: u8,
    /// Frames run since reset
    pub frame_count: u64,
    /// Debug counter: input samples written to P3
    pub dbg_input_writes: u64,
}

impl Vmu {
    /// Create a VMU with default settings and no image loaded.
    pub fn new() -> Self {
        Self::with_config(VmuConfig::default())
    }

    pub fn with_config(config: VmuConfig) -> Self {
        let mut vmu = Vmu {
            cpu: Cpu::new(),
            mem: Memory::new(),
            irq: Interrupts::new(),
            timer0: peripherals::Timer::new(peripherals::TimerAddrs::timer0()),
            timer1: peripherals::Timer::new(peripherals::TimerAddrs::timer1()),
            prescaler: peripherals::Prescaler::new(),
            base_timer: peripherals::BaseTimer::new(),
            config,
            buttons: 0,
            frame_count: 0,
            dbg_input_writes: 0,
        };
        vmu.reset();
        vmu
    }

    /// Reset CPU, registers and peripherals. Flash contents survive.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.mem.reset();
        self.irq.reset();
        self.timer0.reset();
        self.timer1.reset();
        self.prescaler.reset();
        self.base_timer.reset();

        self.mem.write_raw(sfr::SP, RESET_SP);
        self.mem.write_raw(sfr::P3, RESET_P3);
        self.mem.write_raw(sfr::EXT, RESET_EXT);
        self.mem.write_raw(sfr::OCR, RESET_OCR);
        self.mem.write_raw(sfr::VCCR, RESET_VCCR);
        self.mem.write_raw(sfr::MCR, RESET_MCR);
        self.mem.write_raw(sfr::IE, RESET_IE);
        self.mem.write_raw(sfr::BTCR, RESET_BTCR);

        self.frame_count = 0;
        self.dbg_input_writes = 0;
        // Note: held buttons are NOT cleared on reset (host input state)
        debug!("vmu: reset ({} Hz, {} cycles/frame)", self.frequency(), self.frame_cycles());
    }

    /// Install a flash image and reset the machine.
    ///
    /// On error nothing changes: the previous image stays installed and
    /// the machine keeps running.
    pub fn load_image(
        &mut self,
        bytes: &[u8],
        format: ImageFormat,
        source: &str,
        write_enabled: bool,
    ) -> Result<(), LoadError> {
        self.mem.flash.load_image(bytes, format, source, write_enabled)?;
        self.reset();
        Ok(())
    }

    /// Set button state (true = pressed). Takes effect at the next input sample.
    pub fn set_button(&mut self, btn: Button, pressed: bool) {
        if pressed {
            self.buttons |= btn.bit();
        } else {
            self.buttons &= !btn.bit();
        }
    }

    pub fn is_pressed(&self, btn: Button) -> bool {
        self.buttons & btn.bit() != 0
    }

    /// Inject the current button state into P3.
    ///
    /// Only runs once the program has read P3 since the last injection.
    /// A press also raises the port 3 interrupt and arms the handshake
    /// again. Mode and Sleep are not injected: without the BIOS nothing
    /// handles them. Returns true when P3 was written.
    pub fn process_input(&mut self) -> bool {
        if !self.cpu.input_consumed {
            return false;
        }
        let pressed = self.buttons & P3_INPUT_MASK;
        self.mem.write(sfr::P3, !pressed);
        self.dbg_input_writes += 1;
        if pressed != 0 {
            self.irq.raise(&mut self.mem, Source::Port3);
            self.cpu.input_consumed = false;
        }
        true
    }

    /// One CPU cycle followed by one tick of each timer.
    pub fn run_cycle(&mut self) {
        self.step();

        let t0prr = self.mem.read_raw(sfr::T0PRR);
        let t0_active = self.prescaler.tick(t0prr);
        self.timer0.tick(&mut self.mem, &mut self.irq, t0_active);
        self.timer1.tick(&mut self.mem, &mut self.irq, true);
        let hz = self.frequency();
        self.base_timer.tick(&mut self.mem, &mut self.irq, hz);
    }

    /// Run one frame: sample input, then exactly [`frame_cycles`](Self::frame_cycles) cycles.
    ///
    /// Returns the number of cycles run.
    pub fn run_frame(&mut self) -> u32 {
        self.process_input();
        let cycles = self.frame_cycles();
        for _ in 0..cycles {
            self.run_cycle();
        }
        self.frame_count += 1;
        cycles
    }

    /// CPU cycles per second for the current `OCR` clock selection.
    pub fn frequency(&self) -> u32 {
        let ocr = self.mem.read_raw(sfr::OCR);
        let osc = if ocr & sfr::OCR_QUARTZ != 0 {
            peripherals::QUARTZ_HZ
        } else {
            RC_HZ
        };
        if ocr & sfr::OCR_DIV6 != 0 {
            osc / 6
        } else {
            osc / 12
        }
    }

    /// Cycles per frame at the configured fps.
    pub fn frame_cycles(&self) -> u32 {
        self.frequency() / self.config.fps.max(1)
    }

    /// XRAM bank contents (LCD memory), bank 0..=2.
    pub fn xram(&self, bank: usize) -> &[u8; memory::XRAM_BANK_SIZE] {
        self.mem.xram_bank_data(bank)
    }

    /// LCD refresh enabled (`MCR` bit 3).
    pub fn lcd_enabled(&self) -> bool {
        self.mem.read_raw(sfr::MCR) & sfr::MCR_LCD_ON != 0
    }

    /// Buzzer frequency in Hz, if Timer 1 is driving the speaker.
    ///
    /// The buzzer is Timer 1's low half with output enabled (`ELD`); the
    /// period is `256 - T1LR` cycles.
    pub fn audio_tone(&self) -> Option<f32> {
        let t1cnt = self.mem.read_raw(sfr::T1CNT);
        if t1cnt & sfr::TCNT_LRUN == 0 || t1cnt & sfr::TCNT_ELD == 0 {
            return None;
        }
        let reload = self.mem.read_latch(sfr::T1L);
        if reload == 0xFF {
            return None;
        }
        let period = 0x100 - reload as u32;
        Some(self.frequency() as f32 / period as f32)
    }

    /// Save states are not supported.
    pub fn serialize_size(&self) -> usize {
        0
    }

    pub fn serialize(&self, _buf: &mut [u8]) -> bool {
        false
    }

    pub fn unserialize(&mut self, _buf: &[u8]) -> bool {
        false
    }

    /// Disassemble the instruction at the current PC without executing it.
    pub fn disasm_at_pc(&self) -> String {
        let pc = self.cpu.pc;
        let (inst, _) = opcodes::decode(self.fetch(pc));
        format!("{:04X}: {}", pc, disasm::disassemble(inst, pc))
    }

    /// Format a register dump with ACC, B, C, PSW, SP, TRH:TRL and PC.
    pub fn dump_regs(&self) -> String {
        let r = |addr| self.mem.read_raw(addr);
        let psw = r(sfr::PSW);
        let mut s = format!(
            "PC={:04X} ACC={:02X} B={:02X} C={:02X} SP={:02X} TR={:02X}{:02X}",
            self.cpu.pc,
            r(sfr::ACC),
            r(sfr::B),
            r(sfr::C),
            r(sfr::SP),
            r(sfr::TRH),
            r(sfr::TRL)
        );
        s.push_str(&format!("\nPSW={} (0x{:02X})", disasm::format_psw(psw), psw));
        s.push_str(&format!(
            "\nIE={:02X} PCON={:02X} EXT={:02X} OCR={:02X} P3={:02X} BTCR={:02X}",
            r(sfr::IE),
            r(sfr::PCON),
            r(sfr::EXT),
            r(sfr::OCR),
            r(sfr::P3),
            r(sfr::BTCR)
        ));
        s.push_str(&format!(
            "\nT0CNT={:02X} T0={:02X}{:02X} T1CNT={:02X} T1={:02X}{:02X}",
            r(sfr::T0CNT),
            r(sfr::T0H),
            r(sfr::T0L),
            r(sfr::T1CNT),
            r(sfr::T1H),
            r(sfr::T1L)
        ));
        if self.cpu.in_rom {
            s.push_str(&format!("\n[ROM] return={:04X}", self.cpu.rom_return));
        }
        s
    }
}

impl Default for Vmu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vmu_with(program: &[u8]) -> Vmu {
        let mut v = Vmu::new();
        v.load_image(program, ImageFormat::RawBinary, "test.bin", false).unwrap();
        v
    }

    #[test]
    fn test_vmu_creation() {
        let v = Vmu::new();
        assert_eq!(v.cpu.pc, 0);
        assert_eq!(v.mem.read_raw(sfr::SP), 0x7F);
        assert_eq!(v.mem.read_raw(sfr::P3), 0xFF);
        assert_eq!(v.mem.read_raw(sfr::EXT) & sfr::EXT_FLASH, sfr::EXT_FLASH);
        assert_eq!(v.mem.read_raw(sfr::PSW), 0);
        assert!(v.lcd_enabled());
        assert!(v.cpu.input_consumed);
        assert!(!v.mem.flash.loaded);
    }

    #[test]
    fn test_reset_keeps_flash() {
        let mut v = vmu_with(&[0x00, 0x01, 0x02]);
        v.cpu.pc = 0x123;
        v.mem.write_raw(0x40, 0x55);
        v.reset();
        assert_eq!(v.cpu.pc, 0);
        assert_eq!(v.mem.read_raw(0x40), 0);
        assert_eq!(v.mem.flash.data(), &[0x00, 0x01, 0x02]);
    }

    #[test]
    fn test_frequency_follows_ocr() {
        let mut v = Vmu::new();
        assert_eq!(v.frequency(), RC_HZ / 6);
        v.mem.write_raw(sfr::OCR, 0x00);
        assert_eq!(v.frequency(), RC_HZ / 12);
        v.mem.write_raw(sfr::OCR, sfr::OCR_QUARTZ | sfr::OCR_DIV6);
        assert_eq!(v.frequency(), 32_768 / 6);
        v.mem.write_raw(sfr::OCR, sfr::OCR_QUARTZ);
        assert_eq!(v.frequency(), 32_768 / 12);
    }

    #[test]
    fn test_run_frame_runs_f_over_r_cycles() {
        for fps in [50, 60, 30] {
            let mut v = Vmu::with_config(VmuConfig { fps, ..VmuConfig::default() });
            v.load_image(&[0x00; 16], ImageFormat::RawBinary, "nop.bin", false).unwrap();
            let f = v.frequency();
            let before = v.cpu.tick;
            assert_eq!(v.run_frame(), f / fps);
            assert_eq!(v.cpu.tick - before, (f / fps) as u64);
            let before = v.cpu.tick;
            v.run_frame();
            assert_eq!(v.cpu.tick - before, (f / fps) as u64);
            assert_eq!(v.frame_count, 2);
        }
    }

    #[test]
    fn test_run_frame_deterministic() {
        // INC $30 ; BR -4
        let program = [0x62, 0x30, 0x01, 0xFC];
        let mut a = vmu_with(&program);
        let mut b = vmu_with(&program);
        for _ in 0..3 {
            a.run_frame();
            b.run_frame();
        }
        assert_eq!(a.cpu.pc, b.cpu.pc);
        assert_eq!(a.cpu.tick, b.cpu.tick);
        assert_eq!(a.mem.read_raw(0x30), b.mem.read_raw(0x30));
        assert_ne!(a.mem.read_raw(0x30), 0);
    }

    #[test]
    fn test_button_press_injects_p3() {
        let mut v = Vmu::new();
        v.set_button(Button::A, true);
        v.set_button(Button::Left, true);
        assert!(v.is_pressed(Button::A));
        assert!(v.process_input());
        assert_eq!(v.mem.read_raw(sfr::P3), !(Button::A.bit() | Button::Left.bit()));
        assert!(v.irq.is_flagged(&v.mem, Source::Port3));
        assert_eq!(v.mem.read_raw(sfr::P3INT) & 0x02, 0x02);
        assert!(!v.cpu.input_consumed);
    }

    #[test]
    fn test_input_waits_for_p3_read() {
        // LD P3 ; BR -4
        let mut v = vmu_with(&[0x03, 0x4C, 0x01, 0xFC]);
        v.set_button(Button::Up, true);
        assert!(v.process_input());
        v.set_button(Button::Up, false);
        v.set_button(Button::Down, true);
        assert!(!v.process_input());
        assert_eq!(v.mem.read_raw(sfr::P3), !Button::Up.bit());
        // Program samples P3
        v.run_cycle();
        assert!(v.cpu.input_consumed);
        assert!(v.process_input());
        assert_eq!(v.mem.read_raw(sfr::P3), !Button::Down.bit());
    }

    #[test]
    fn test_release_does_not_raise_interrupt() {
        let mut v = Vmu::new();
        assert!(v.process_input());
        assert_eq!(v.mem.read_raw(sfr::P3), 0xFF);
        assert!(!v.irq.is_flagged(&v.mem, Source::Port3));
        assert!(v.cpu.input_consumed);
    }

    #[test]
    fn test_mode_and_sleep_not_injected() {
        let mut v = Vmu::new();
        v.set_button(Button::Mode, true);
        v.set_button(Button::Sleep, true);
        v.process_input();
        assert_eq!(v.mem.read_raw(sfr::P3), 0xFF);
        assert!(!v.irq.is_flagged(&v.mem, Source::Port3));
    }

    #[test]
    fn test_input_respects_p3_outputs() {
        let mut v = Vmu::new();
        v.mem.write(sfr::P3DDR, 0x01);
        v.mem.write_raw(sfr::P3, 0xFE);
        v.set_button(Button::B, true);
        v.process_input();
        // Bit 0 is an output and keeps its latch
        assert_eq!(v.mem.read_raw(sfr::P3), !Button::B.bit() & 0xFE);
    }

    #[test]
    fn test_failed_load_keeps_image() {
        let mut v = vmu_with(&[0xAA, 0xBB]);
        assert_eq!(v.load_image(&[], ImageFormat::RawBinary, "x.bin", false), Err(LoadError::Empty));
        assert!(v.load_image(&[0u8; 0x100], ImageFormat::Vms, "x.vms", false).is_err());
        assert_eq!(v.mem.flash.data(), &[0xAA, 0xBB]);
        assert_eq!(v.mem.flash.source(), "test.bin");
    }

    #[test]
    fn test_raw_load_round_trip() {
        let program: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
        let v = vmu_with(&program);
        assert_eq!(v.mem.flash.data(), program.as_slice());
    }

    #[test]
    fn test_audio_tone() {
        let mut v = Vmu::new();
        assert_eq!(v.audio_tone(), None);
        v.mem.write(sfr::T1L, 0xF0);
        v.mem.write_raw(sfr::T1CNT, sfr::TCNT_LRUN | sfr::TCNT_ELD);
        let tone = v.audio_tone().unwrap();
        assert!((tone - v.frequency() as f32 / 16.0).abs() < 0.01);
        v.mem.write_raw(sfr::T1CNT, sfr::TCNT_LRUN);
        assert_eq!(v.audio_tone(), None);
    }

    #[test]
    fn test_base_timer_runs_in_frame() {
        let mut v = vmu_with(&[0x00; 4]);
        v.mem.write_raw(sfr::IE, 0);
        // Just over half a second
        for _ in 0..31 {
            v.run_frame();
        }
        assert_eq!(v.base_timer.dbg_int0_count, 1);
        assert!(v.irq.is_flagged(&v.mem, Source::BaseTimer0));
    }

    #[test]
    fn test_serialize_unsupported() {
        let mut v = Vmu::new();
        let mut buf = [0u8; 16];
        assert_eq!(v.serialize_size(), 0);
        assert!(!v.serialize(&mut buf));
        assert!(!v.unserialize(&buf));
    }

    #[test]
    fn test_dump_regs_and_disasm() {
        let mut v = vmu_with(&[0x23, 0x0E, 0x81]);
        v.mem.write(sfr::ACC, 0x12);
        assert!(v.dump_regs().starts_with("PC=0000 ACC=12"));
        assert_eq!(v.disasm_at_pc(), "0000: MOV #$81, OCR");
    }
}
