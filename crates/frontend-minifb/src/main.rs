//! VMU emulator frontend.
//!
//! Provides two execution modes:
//!
//! - **GUI mode** (default): Scaled LCD window with buzzer audio and
//!   keyboard/gamepad input.
//! - **Headless mode** (`--headless`): Runs a fixed number of frames and
//!   prints the LCD as text.
//!
//! Settings come from an optional JSON config file (`--config`); command-line
//! flags override it.

use anyhow::{Context, Result};
use clap::Parser;
use gilrs::{Axis, Button as GilrsButton, Event as GilrsEvent, EventType, Gilrs};
use minifb::{Key, Scale, ScaleMode, Window, WindowOptions};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use vmu_core::disasm::disassemble_range;
use vmu_core::{Button, ImageFormat, Vmu, VmuConfig, LCD_HEIGHT, LCD_WIDTH};

/// Audio output sample rate in Hz
const AUDIO_SAMPLE_RATE: u32 = 44100;
/// Square wave amplitude (0.0–1.0)
const AUDIO_VOLUME: f32 = 0.15;
/// Analog stick deadzone
const STICK_DEADZONE: f32 = 0.3;

/// Pixel colors: dark blue-gray on pale green, like the real LCD
const COLOR_ON: u32 = 0x0020_3040;
const COLOR_OFF: u32 = 0x00A8_C8A0;
/// Bytes per LCD row in XRAM and rows per XRAM bank
const LCD_ROW_BYTES: usize = 6;
const LCD_ROWS_PER_BANK: usize = 16;

const WINDOW_TITLE: &str = "VMU Emulator";
/// Program bytes listed at startup with --debug (vector table and entry)
const STARTUP_LISTING_LEN: u16 = 0x50;

#[derive(Debug, Parser)]
#[command(name = "vmu-emu", about = "Dreamcast VMU emulator")]
struct Args {
    /// Image to load (.bin, .vms or .dci)
    image: PathBuf,

    /// Run without a window
    #[arg(long)]
    headless: bool,

    /// Frames to run in headless mode
    #[arg(long, default_value_t = 60)]
    frames: u32,

    /// Print the LCD after this frame (headless, repeatable)
    #[arg(long)]
    snapshot: Vec<u32>,

    /// Hold A from this frame for five frames (headless)
    #[arg(long)]
    press: Option<u32>,

    /// Per-frame diagnostics and debug-level logging
    #[arg(long)]
    debug: bool,

    /// Start with audio muted
    #[arg(long)]
    mute: bool,

    /// Initial window scale 1-12
    #[arg(long, default_value_t = 8)]
    scale: usize,

    /// Allow the program to write flash and save it back on exit; .bin only
    /// (overrides the config file)
    #[arg(long)]
    flash_write: bool,

    /// Frames per second (overrides the config file)
    #[arg(long)]
    fps: Option<u32>,

    /// JSON settings file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

// ─── Audio ──────────────────────────────────────────────────────────────────

/// Square wave at the buzzer frequency published by the emulation loop.
struct BuzzerSource {
    freq: Arc<AtomicU32>,
    sample_rate: u32,
    phase: f32,
}

impl Iterator for BuzzerSource {
    type Item = f32;
    fn next(&mut self) -> Option<f32> {
        let freq = f32::from_bits(self.freq.load(Ordering::Relaxed));
        if freq <= 0.0 {
            self.phase = 0.0;
            return Some(0.0);
        }
        let s = if self.phase < 0.5 { AUDIO_VOLUME } else { -AUDIO_VOLUME };
        self.phase += freq / self.sample_rate as f32;
        self.phase %= 1.0;
        Some(s)
    }
}

impl rodio::Source for BuzzerSource {
    fn current_frame_len(&self) -> Option<usize> { None }
    fn channels(&self) -> u16 { 1 }
    fn sample_rate(&self) -> u32 { self.sample_rate }
    fn total_duration(&self) -> Option<Duration> { None }
}

fn setup_audio(freq: Arc<AtomicU32>) -> Option<(rodio::OutputStream, rodio::Sink)> {
    let (stream, handle) = match rodio::OutputStream::try_default() {
        Ok(s) => s,
        Err(e) => {
            warn!("audio device: {}", e);
            return None;
        }
    };
    match rodio::Sink::try_new(&handle) {
        Ok(sink) => {
            sink.append(BuzzerSource { freq, sample_rate: AUDIO_SAMPLE_RATE, phase: 0.0 });
            Some((stream, sink))
        }
        Err(e) => {
            warn!("audio sink: {}", e);
            None
        }
    }
}

// ─── Gamepad ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct GamepadState {
    up: bool, down: bool, left: bool, right: bool,
    a: bool, b: bool,
    stick_x: f32, stick_y: f32,
}

impl GamepadState {
    fn eff_up(&self)    -> bool { self.up    || self.stick_y < -STICK_DEADZONE }
    fn eff_down(&self)  -> bool { self.down  || self.stick_y >  STICK_DEADZONE }
    fn eff_left(&self)  -> bool { self.left  || self.stick_x < -STICK_DEADZONE }
    fn eff_right(&self) -> bool { self.right || self.stick_x >  STICK_DEADZONE }
}

fn init_gamepad() -> Option<Gilrs> {
    match Gilrs::new() {
        Ok(gilrs) => {
            for (id, gp) in gilrs.gamepads() {
                debug!("gamepad [{}] \"{}\" ({})", id, gp.name(), gp.os_name());
            }
            Some(gilrs)
        }
        Err(e) => {
            warn!("gamepad: {}", e);
            None
        }
    }
}

fn poll_gamepad(gilrs: &mut Gilrs, state: &mut GamepadState) {
    while let Some(GilrsEvent { event, .. }) = gilrs.next_event() {
        match event {
            EventType::ButtonPressed(b, _)  => apply_button(state, b, true),
            EventType::ButtonReleased(b, _) => apply_button(state, b, false),
            EventType::AxisChanged(a, v, _) => apply_axis(state, a, v),
            EventType::Disconnected => {
                debug!("gamepad disconnected");
                *state = GamepadState::default();
            }
            _ => {}
        }
    }
}

fn apply_button(state: &mut GamepadState, btn: GilrsButton, pressed: bool) {
    match btn {
        GilrsButton::DPadUp    => state.up    = pressed,
        GilrsButton::DPadDown  => state.down  = pressed,
        GilrsButton::DPadLeft  => state.left  = pressed,
        GilrsButton::DPadRight => state.right = pressed,
        GilrsButton::South => state.a = pressed,
        GilrsButton::East  => state.b = pressed,
        _ => {}
    }
}

fn apply_axis(state: &mut GamepadState, axis: Axis, value: f32) {
    match axis {
        Axis::LeftStickX => state.stick_x = value,
        // gilrs reports stick up as positive
        Axis::LeftStickY => state.stick_y = -value,
        Axis::DPadX => { state.left = value < -STICK_DEADZONE; state.right = value > STICK_DEADZONE; }
        Axis::DPadY => { state.up = value > STICK_DEADZONE; state.down = value < -STICK_DEADZONE; }
        _ => {}
    }
}

// ─── LCD ────────────────────────────────────────────────────────────────────

/// Decode the LCD from XRAM, one bool per pixel (true = dark).
///
/// Bank 0 holds rows 0-15, bank 1 rows 16-31. Each 16-byte line holds two
/// rows of six bytes, MSB leftmost. A disabled LCD shows blank.
fn lcd_pixels(vmu: &Vmu) -> Vec<bool> {
    let mut px = vec![false; LCD_WIDTH * LCD_HEIGHT];
    if !vmu.lcd_enabled() {
        return px;
    }
    for y in 0..LCD_HEIGHT {
        let bank = vmu.xram(y / LCD_ROWS_PER_BANK);
        let row = y % LCD_ROWS_PER_BANK;
        let base = (row / 2) * 16 + (row % 2) * LCD_ROW_BYTES;
        for x in 0..LCD_WIDTH {
            let byte = bank[base + x / 8];
            px[y * LCD_WIDTH + x] = byte & (0x80 >> (x % 8)) != 0;
        }
    }
    px
}

fn render_scaled(px: &[bool], buf: &mut [u32], scale: usize) {
    let w = LCD_WIDTH * scale;
    for y in 0..LCD_HEIGHT {
        for x in 0..LCD_WIDTH {
            let c = if px[y * LCD_WIDTH + x] { COLOR_ON } else { COLOR_OFF };
            for sy in 0..scale {
                let base = (y * scale + sy) * w + x * scale;
                buf[base..base + scale].fill(c);
            }
        }
    }
}

fn print_lcd(vmu: &Vmu) {
    let px = lcd_pixels(vmu);
    let lit = px.iter().filter(|&&p| p).count();
    println!("  ({} px lit)", lit);
    for y in (0..LCD_HEIGHT).step_by(2) {
        let mut l = String::with_capacity(LCD_WIDTH + 4);
        l.push_str("  |");
        for x in 0..LCD_WIDTH {
            let t = px[y * LCD_WIDTH + x];
            let b = px[(y + 1) * LCD_WIDTH + x];
            l.push(match (t, b) { (true, true) => '█', (true, false) => '▀', (false, true) => '▄', _ => ' ' });
        }
        l.push('|');
        println!("{}", l);
    }
}

// ─── Main ───────────────────────────────────────────────────────────────────

fn load_config(path: Option<&Path>) -> Result<VmuConfig> {
    let Some(path) = path else {
        return Ok(VmuConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

/// Only raw images are written back, so only they may be written at runtime.
fn flash_writes_allowed(format: ImageFormat, requested: bool) -> bool {
    requested && format == ImageFormat::RawBinary
}

/// Write the flash back to its image file if the program changed it.
fn save_flash(path: &Path, vmu: &mut Vmu) -> Result<bool> {
    let flash = &vmu.mem.flash;
    if !flash.write_enabled() || !flash.is_dirty() {
        return Ok(false);
    }
    fs::write(path, flash.data()).with_context(|| format!("saving flash to {}", path.display()))?;
    info!("saved {} bytes of flash to {}", flash.data().len(), path.display());
    vmu.mem.flash.clear_dirty();
    Ok(true)
}

fn listing(vmu: &Vmu, start: u16, len: u16) -> Vec<String> {
    disassemble_range(vmu.mem.flash.data(), start, start.saturating_add(len))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.debug { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = load_config(args.config.as_deref())?;
    if args.flash_write {
        config.flash_write_enabled = true;
    }
    if let Some(fps) = args.fps {
        config.fps = fps;
    }

    let format = ImageFormat::from_path(&args.image)?;
    let bytes = fs::read(&args.image)
        .with_context(|| format!("reading {}", args.image.display()))?;
    let source = args.image.to_string_lossy();

    let write_enabled = flash_writes_allowed(format, config.flash_write_enabled);
    if config.flash_write_enabled && !write_enabled {
        warn!("{} images are loaded write-protected; ignoring flash write option", format);
    }

    let mut vmu = Vmu::with_config(config.clone());
    vmu.load_image(&bytes, format, &source, write_enabled)
        .with_context(|| format!("loading {}", args.image.display()))?;
    info!(
        "loaded {} ({}, {} bytes), {} Hz, {} cycles/frame",
        args.image.display(),
        format,
        bytes.len(),
        vmu.frequency(),
        vmu.frame_cycles()
    );
    if args.debug {
        for line in listing(&vmu, 0, STARTUP_LISTING_LEN) {
            println!("  {}", line);
        }
    }

    let run = if args.headless {
        run_headless(&args, &mut vmu);
        Ok(())
    } else {
        run_gui(&args, &mut vmu)
    };
    save_flash(&args.image, &mut vmu)?;
    run
}

// ─── GUI Mode ───────────────────────────────────────────────────────────────

fn open_window(scale: usize, fps: u32) -> Result<Window> {
    let mut window = Window::new(
        WINDOW_TITLE,
        LCD_WIDTH * scale,
        LCD_HEIGHT * scale,
        WindowOptions {
            scale: Scale::X1,
            scale_mode: ScaleMode::AspectRatioStretch,
            resize: true,
            ..Default::default()
        },
    )
    .context("creating window")?;
    window.set_target_fps(fps as usize);
    Ok(window)
}

fn run_gui(args: &Args, vmu: &mut Vmu) -> Result<()> {
    let fps = vmu.config.fps.max(1);
    let mut scale = args.scale.clamp(1, 12);
    let mut window = open_window(scale, fps)?;
    let mut scaled_buf = vec![COLOR_OFF; LCD_WIDTH * LCD_HEIGHT * scale * scale];

    let freq = Arc::new(AtomicU32::new(0.0f32.to_bits()));
    let mut muted = args.mute;
    let mut _audio = if muted { None } else { setup_audio(freq.clone()) };

    let mut gilrs = init_gamepad();
    let mut gp = GamepadState::default();
    let start_time = Instant::now();
    let mut last_fps_time = Instant::now();
    let mut fps_frames: u64 = 0;
    let mut prev_m = false;
    let mut prev_d = false;
    let mut prev_r = false;
    let mut prev_plus = false;
    let mut prev_minus = false;

    while window.is_open() && !window.is_key_down(Key::Escape) {
        if let Some(ref mut g) = gilrs {
            poll_gamepad(g, &mut gp);
        }

        // Scale (+/-)
        let plus = window.is_key_down(Key::Equal);
        let minus = window.is_key_down(Key::Minus);
        if (plus && !prev_plus && scale < 12) || (minus && !prev_minus && scale > 1) {
            scale = if plus { scale + 1 } else { scale - 1 };
            scaled_buf = vec![COLOR_OFF; LCD_WIDTH * LCD_HEIGHT * scale * scale];
            window = open_window(scale, fps)?;
        }
        prev_plus = plus;
        prev_minus = minus;

        // Mute (M)
        let m = window.is_key_down(Key::M);
        if m && !prev_m {
            muted = !muted;
            if muted {
                freq.store(0.0f32.to_bits(), Ordering::Relaxed);
                _audio = None;
            } else {
                _audio = setup_audio(freq.clone());
            }
        }
        prev_m = m;

        // Reg dump (D)
        let d = window.is_key_down(Key::D);
        if d && !prev_d {
            eprintln!("--- Regs (frame {}) ---\n{}\nNext: {}\n---",
                vmu.frame_count, vmu.dump_regs(), vmu.disasm_at_pc());
            if args.debug {
                for line in listing(vmu, vmu.cpu.pc, 16) {
                    eprintln!("  {}", line);
                }
            }
        }
        prev_d = d;

        // Reset (R)
        let r = window.is_key_down(Key::R);
        if r && !prev_r {
            info!("reset");
            vmu.reset();
        }
        prev_r = r;

        vmu.set_button(Button::Up,    window.is_key_down(Key::Up)    || gp.eff_up());
        vmu.set_button(Button::Down,  window.is_key_down(Key::Down)  || gp.eff_down());
        vmu.set_button(Button::Left,  window.is_key_down(Key::Left)  || gp.eff_left());
        vmu.set_button(Button::Right, window.is_key_down(Key::Right) || gp.eff_right());
        vmu.set_button(Button::A,     window.is_key_down(Key::Z)     || gp.a);
        vmu.set_button(Button::B,     window.is_key_down(Key::X)     || gp.b);

        vmu.run_frame();
        fps_frames += 1;

        if !muted {
            let tone = vmu.audio_tone().unwrap_or(0.0);
            freq.store(tone.to_bits(), Ordering::Relaxed);
        }

        render_scaled(&lcd_pixels(vmu), &mut scaled_buf, scale);
        window
            .update_with_buffer(&scaled_buf, LCD_WIDTH * scale, LCD_HEIGHT * scale)
            .context("updating window")?;

        if last_fps_time.elapsed() >= Duration::from_secs(2) {
            let rate = fps_frames as f64 / last_fps_time.elapsed().as_secs_f64();
            let tone = vmu.audio_tone().map(|f| format!(" {:.0}Hz", f)).unwrap_or_default();
            let ms = if muted { " [MUTE]" } else { "" };
            let halted = if vmu.cpu.stopped { " [STOPPED]" } else { "" };
            window.set_title(&format!("{} - {:.0} FPS{}{}{} ({}x)", WINDOW_TITLE, rate, tone, ms, halted, scale));
            fps_frames = 0;
            last_fps_time = Instant::now();
        }
    }

    let e = start_time.elapsed().as_secs_f64();
    debug!(
        "{} frames in {:.1}s ({:.1} FPS), {} cycles",
        vmu.frame_count,
        e,
        vmu.frame_count as f64 / e,
        vmu.cpu.tick
    );
    Ok(())
}

// ─── Headless Mode ──────────────────────────────────────────────────────────

fn run_headless(args: &Args, vmu: &mut Vmu) {
    if let Some(pf) = args.press {
        debug!("press A on frame {}", pf);
    }
    for frame in 0..args.frames {
        if let Some(pf) = args.press {
            if frame == pf {
                vmu.set_button(Button::A, true);
            } else if frame == pf + 5 {
                vmu.set_button(Button::A, false);
            }
        }
        let int0 = vmu.base_timer.dbg_int0_count;
        let dispatched = vmu.irq.dbg_dispatch_count;
        let cycles = vmu.run_frame();
        if args.debug {
            let tone = vmu.audio_tone().map(|f| format!("  tone={:.0}Hz", f)).unwrap_or_default();
            println!(
                "  Frame {:3}: +{:6} cyc  pc={:04X}  irq={:3}  bt0={}  t0ovf={}/{}  t1ovf={}/{}  in={}{}",
                frame + 1,
                cycles,
                vmu.cpu.pc,
                vmu.irq.dbg_dispatch_count - dispatched,
                vmu.base_timer.dbg_int0_count - int0,
                vmu.timer0.dbg_low_ovf_count,
                vmu.timer0.dbg_high_ovf_count,
                vmu.timer1.dbg_low_ovf_count,
                vmu.timer1.dbg_high_ovf_count,
                vmu.dbg_input_writes,
                tone
            );
        }
        if vmu.cpu.stopped {
            println!("  Stopped at frame {}\n{}", frame + 1, vmu.dump_regs());
            break;
        }
        if args.snapshot.contains(&(frame + 1)) || (args.debug && frame + 1 == args.frames) {
            println!("\n  === Frame {} ===", frame + 1);
            print_lcd(vmu);
        }
    }
    debug!("done, {} cycles, {} flash writes dropped", vmu.cpu.tick, vmu.mem.flash.dbg_dropped_writes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lcd_decode_layout() {
        let mut vmu = Vmu::new();
        // Row 0, leftmost pixel
        vmu.mem.xram[0][0] = 0x80;
        // Row 1, pixel 47
        vmu.mem.xram[0][6 + 5] = 0x01;
        // Row 2 starts the second 16-byte line
        vmu.mem.xram[0][16] = 0x40;
        // Row 16 is the first row of bank 1
        vmu.mem.xram[1][0] = 0x80;
        let px = lcd_pixels(&vmu);
        assert!(px[0]);
        assert!(px[LCD_WIDTH + 47]);
        assert!(px[2 * LCD_WIDTH + 1]);
        assert!(px[16 * LCD_WIDTH]);
        assert_eq!(px.iter().filter(|&&p| p).count(), 4);
    }

    #[test]
    fn test_lcd_off_is_blank() {
        let mut vmu = Vmu::new();
        vmu.mem.xram[0][0] = 0xFF;
        vmu.mem.write_raw(vmu_core::sfr::MCR, 0);
        assert!(lcd_pixels(&vmu).iter().all(|&p| !p));
    }

    #[test]
    fn test_config_json_defaults() {
        let cfg: VmuConfig = serde_json::from_str(r#"{"fps": 50}"#).unwrap();
        assert_eq!(cfg.fps, 50);
        assert!(!cfg.flash_write_enabled);
    }

    #[test]
    fn test_flash_writes_only_for_raw() {
        assert!(flash_writes_allowed(ImageFormat::RawBinary, true));
        assert!(!flash_writes_allowed(ImageFormat::RawBinary, false));
        assert!(!flash_writes_allowed(ImageFormat::Vms, true));
        assert!(!flash_writes_allowed(ImageFormat::Dci, true));
    }

    #[test]
    fn test_save_flash_writes_back_dirty_image() {
        let path = std::env::temp_dir().join(format!("vmu-emu-save-{}.bin", std::process::id()));
        let mut vmu = Vmu::new();
        vmu.load_image(&[0u8; 0x200], ImageFormat::RawBinary, "save.bin", true).unwrap();

        // Nothing written yet
        assert!(!save_flash(&path, &mut vmu).unwrap());
        assert!(!path.exists());

        assert!(vmu.mem.flash.write(0x300, 0x42));
        assert!(save_flash(&path, &mut vmu).unwrap());
        let saved = fs::read(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(saved.len(), 0x301);
        assert_eq!(saved[0x300], 0x42);
        assert!(!vmu.mem.flash.is_dirty());
    }

    #[test]
    fn test_save_flash_skips_protected_image() {
        let path = std::env::temp_dir().join(format!("vmu-emu-ro-{}.bin", std::process::id()));
        let mut vmu = Vmu::new();
        vmu.load_image(&[0u8; 0x200], ImageFormat::RawBinary, "ro.bin", false).unwrap();
        assert!(!vmu.mem.flash.write(0x10, 0x42));
        assert!(!save_flash(&path, &mut vmu).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_startup_listing() {
        let mut vmu = Vmu::new();
        // JMPF $0123 at the reset vector, then NOP
        vmu.load_image(&[0x21, 0x01, 0x23, 0x00], ImageFormat::RawBinary, "l.bin", false).unwrap();
        let lines = listing(&vmu, 0, 4);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0000: 21 01 23"));
        assert!(lines[1].ends_with("NOP"));
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["vmu-emu", "game.vms", "--headless", "--frames", "10", "--snapshot", "5", "--snapshot", "10"]).unwrap();
        assert!(args.headless);
        assert_eq!(args.frames, 10);
        assert_eq!(args.snapshot, vec![5, 10]);
        assert_eq!(args.scale, 8);
    }
}
