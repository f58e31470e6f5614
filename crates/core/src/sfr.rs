//! LC86K special-function register map.
//!
//! Addresses are absolute 9-bit direct addresses (`d9`). The SFR block sits
//! at 0x100–0x17F, directly above the two 256-byte RAM banks and below the
//! banked XRAM window at 0x180–0x1FF.

/// First SFR address
pub const SFR_BASE: u16 = 0x100;
/// First XRAM (LCD memory) address
pub const XRAM_BASE: u16 = 0x180;

/// Accumulator
pub const ACC: u16 = 0x100;
/// Program status word: CY AC - IRBK1 IRBK0 OV RAMBK0 P
pub const PSW: u16 = 0x101;
/// B register (MUL/DIV operand)
pub const B: u16 = 0x102;
/// C register (MUL/DIV low byte)
pub const C: u16 = 0x103;
/// Table reference register, low byte
pub const TRL: u16 = 0x104;
/// Table reference register, high byte
pub const TRH: u16 = 0x105;
/// Stack pointer
pub const SP: u16 = 0x106;
/// Power control (bit 0 = HALT)
pub const PCON: u16 = 0x107;
/// Interrupt enable (bit 7 = master enable)
pub const IE: u16 = 0x108;
/// Interrupt priority
pub const IP: u16 = 0x109;
/// External memory control (bit 0: 0 = ROM bank, 1 = flash bank)
pub const EXT: u16 = 0x10D;
/// Oscillation control
pub const OCR: u16 = 0x10E;

/// Timer 0 control
pub const T0CNT: u16 = 0x110;
/// Timer 0 prescaler reload
pub const T0PRR: u16 = 0x111;
/// Timer 0 low counter
pub const T0L: u16 = 0x112;
/// Timer 0 low reload
pub const T0LR: u16 = 0x113;
/// Timer 0 high counter
pub const T0H: u16 = 0x114;
/// Timer 0 high reload
pub const T0HR: u16 = 0x115;

/// Timer 1 control
pub const T1CNT: u16 = 0x118;
/// Timer 1 low compare (pulse width)
pub const T1LC: u16 = 0x11A;
/// Timer 1 low counter (read) / low reload T1LR (write)
pub const T1L: u16 = 0x11B;
/// Timer 1 high compare
pub const T1HC: u16 = 0x11C;
/// Timer 1 high counter (read) / high reload T1HR (write)
pub const T1H: u16 = 0x11D;

/// Mode control (bit 3 = LCD refresh enable)
pub const MCR: u16 = 0x120;
/// Start address register
pub const STAD: u16 = 0x122;
/// Character number register
pub const CNR: u16 = 0x123;
/// Time division register
pub const TDR: u16 = 0x124;
/// XRAM bank select (0–2)
pub const XBNK: u16 = 0x125;
/// LCD contrast control (bit 7 = LCD on)
pub const VCCR: u16 = 0x127;

/// Serial interface 0 control
pub const SCON0: u16 = 0x130;
/// Serial interface 0 buffer
pub const SBUF0: u16 = 0x131;
/// Serial baud rate
pub const SBR: u16 = 0x132;
/// Serial interface 1 control
pub const SCON1: u16 = 0x134;
/// Serial interface 1 buffer
pub const SBUF1: u16 = 0x135;

/// Port 1 latch (bit 7 = sound output)
pub const P1: u16 = 0x144;
/// Port 1 data direction
pub const P1DDR: u16 = 0x145;
/// Port 1 function control
pub const P1FCR: u16 = 0x146;
/// Port 3 data (buttons, active low)
pub const P3: u16 = 0x14C;
/// Port 3 data direction
pub const P3DDR: u16 = 0x14D;
/// Port 3 interrupt control (bit 0 = enable, bit 1 = flag)
pub const P3INT: u16 = 0x14E;
/// Flash program register (bit 0 = flash address bit 16)
pub const FPR: u16 = 0x154;
/// Port 7 (connection/battery detect)
pub const P7: u16 = 0x15C;
/// External interrupt 0/1 control
pub const I01CR: u16 = 0x15D;
/// External interrupt 2/3 control
pub const I23CR: u16 = 0x15E;
/// Input signal select
pub const ISL: u16 = 0x15F;

/// Maple/VMS control
pub const VSEL: u16 = 0x163;
/// Work RAM access address, low byte
pub const VRMAD1: u16 = 0x164;
/// Work RAM access address, bit 8
pub const VRMAD2: u16 = 0x165;
/// Work RAM transfer buffer
pub const VTRBF: u16 = 0x166;
/// Work RAM transfer length
pub const VLREG: u16 = 0x167;
/// Base timer control
pub const BTCR: u16 = 0x17F;

// PSW bits
pub const PSW_CY: u8 = 0x80;
pub const PSW_AC: u8 = 0x40;
pub const PSW_IRBK1: u8 = 0x10;
pub const PSW_IRBK0: u8 = 0x08;
pub const PSW_OV: u8 = 0x04;
pub const PSW_RAMBK0: u8 = 0x02;
pub const PSW_P: u8 = 0x01;

/// IE bit 7: master interrupt enable
pub const IE_MASTER: u8 = 0x80;
/// PCON bit 0: HALT mode
pub const PCON_HALT: u8 = 0x01;
/// EXT bit 0: executing from flash (1) or ROM (0)
pub const EXT_FLASH: u8 = 0x01;
/// OCR bit 7: cycle clock = oscillator / 6 (otherwise / 12)
pub const OCR_DIV6: u8 = 0x80;
/// OCR bit 5: quartz (32 kHz) oscillator selected
pub const OCR_QUARTZ: u8 = 0x20;
/// MCR bit 3: LCD refresh enabled
pub const MCR_LCD_ON: u8 = 0x08;
/// VSEL bit 4: auto-increment VRMAD on VTRBF access
pub const VSEL_INCE: u8 = 0x10;

// Timer control bits, shared by T0CNT and T1CNT
/// Low-half interrupt enable
pub const TCNT_LIE: u8 = 0x01;
/// Low-half overflow flag
pub const TCNT_LOVF: u8 = 0x02;
/// High-half interrupt enable
pub const TCNT_HIE: u8 = 0x04;
/// High-half overflow flag
pub const TCNT_HOVF: u8 = 0x08;
/// T1 only: pulse output enable
pub const TCNT_ELD: u8 = 0x10;
/// 16-bit ("long") mode
pub const TCNT_LONG: u8 = 0x20;
/// Low-half run
pub const TCNT_LRUN: u8 = 0x40;
/// High-half run
pub const TCNT_HRUN: u8 = 0x80;

// Base timer control bits
pub const BTCR_INT0_IE: u8 = 0x01;
pub const BTCR_INT0_FLAG: u8 = 0x02;
pub const BTCR_INT1_IE: u8 = 0x04;
pub const BTCR_INT1_FLAG: u8 = 0x08;
pub const BTCR_INT1_CYCLE: u8 = 0x30;
pub const BTCR_RUN: u8 = 0x40;
pub const BTCR_INT0_FAST: u8 = 0x80;

/// Human-readable SFR name, for disassembly and register dumps.
pub fn name(addr: u16) -> Option<&'static str> {
    Some(match addr {
        ACC => "ACC", PSW => "PSW", B => "B", C => "C",
        TRL => "TRL", TRH => "TRH", SP => "SP", PCON => "PCON",
        IE => "IE", IP => "IP", EXT => "EXT", OCR => "OCR",
        T0CNT => "T0CNT", T0PRR => "T0PRR", T0L => "T0L", T0LR => "T0LR",
        T0H => "T0H", T0HR => "T0HR",
        T1CNT => "T1CNT", T1LC => "T1LC", T1L => "T1L", T1HC => "T1HC", T1H => "T1H",
        MCR => "MCR", STAD => "STAD", CNR => "CNR", TDR => "TDR",
        XBNK => "XBNK", VCCR => "VCCR",
        SCON0 => "SCON0", SBUF0 => "SBUF0", SBR => "SBR", SCON1 => "SCON1", SBUF1 => "SBUF1",
        P1 => "P1", P1DDR => "P1DDR", P1FCR => "P1FCR",
        P3 => "P3", P3DDR => "P3DDR", P3INT => "P3INT",
        FPR => "FPR", P7 => "P7", I01CR => "I01CR", I23CR => "I23CR", ISL => "ISL",
        VSEL => "VSEL", VRMAD1 => "VRMAD1", VRMAD2 => "VRMAD2", VTRBF => "VTRBF",
        VLREG => "VLREG", BTCR => "BTCR",
        _ => return None,
    })
}
