//! LC86K instruction decoder.
//!
//! Instructions are 1 to 3 bytes. The opcode byte alone determines the
//! length and addressing mode, and all 256 opcode values are assigned, so
//! decoding never fails.
//!
//! Opcodes with a low nibble of 8–F encode an operand in the opcode itself
//! (bit number or the high bits of a 12-bit address); the rest select the
//! addressing mode by low nibble: 0/1 special, 2/3 direct (`d9`, bit 0 is
//! address bit 8), 4–7 indirect (`@R0`–`@R3`).

/// Source or destination of a data instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// `#i8`
    Imm(u8),
    /// `d9` direct address
    Direct(u16),
    /// `@Rn`, n = 0–3
    Indirect(u8),
}

/// Decoded LC86K instruction with operands.
///
/// Relative branch offsets (`r`) are relative to the address of the next
/// instruction. Absolute 12-bit targets (`a12`) replace the low 12 bits of
/// the next-instruction address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    // Branches
    Br { r: i8 },
    Brf { r: u16 },
    Bz { r: i8 },
    Bnz { r: i8 },
    Bp { d: u16, b: u8, r: i8 },
    Bpc { d: u16, b: u8, r: i8 },
    Bn { d: u16, b: u8, r: i8 },
    /// Branch if ACC == operand (`#i8` or `d9`)
    Be { src: Operand, r: i8 },
    /// Branch if @Rn == #i8
    BeInd { n: u8, k: u8, r: i8 },
    Bne { src: Operand, r: i8 },
    BneInd { n: u8, k: u8, r: i8 },
    Dbnz { dst: Operand, r: i8 },
    // Jumps and calls
    Jmp { a: u16 },
    Jmpf { a: u16 },
    Call { a: u16 },
    Callf { a: u16 },
    Callr { r: u16 },
    Ret,
    Reti,
    // Data transfer
    Ld { src: Operand },
    St { dst: Operand },
    Mov { k: u8, dst: Operand },
    Ldc,
    Ldf,
    Stf,
    Push { d: u16 },
    Pop { d: u16 },
    Xch { src: Operand },
    // Arithmetic
    Inc { dst: Operand },
    Dec { dst: Operand },
    Add { src: Operand },
    Addc { src: Operand },
    Sub { src: Operand },
    Subc { src: Operand },
    Mul,
    Div,
    // Logic
    And { src: Operand },
    Or { src: Operand },
    Xor { src: Operand },
    Rol,
    Rolc,
    Ror,
    Rorc,
    // Bit manipulation
    Set1 { d: u16, b: u8 },
    Clr1 { d: u16, b: u8 },
    Not1 { d: u16, b: u8 },
}

impl Operand {
    /// Bytes the operand adds to a data instruction.
    fn size(self) -> u8 {
        match self {
            Operand::Imm(_) | Operand::Direct(_) => 1,
            Operand::Indirect(_) => 0,
        }
    }
}

impl Instruction {
    /// Encoded length in bytes.
    pub fn size(&self) -> u8 {
        use Instruction::*;
        match self {
            Brf { .. } | Callr { .. } | Callf { .. } | Jmpf { .. } => 3,
            Bp { .. } | Bpc { .. } | Bn { .. } => 3,
            Be { .. } | BeInd { .. } | Bne { .. } | BneInd { .. } => 3,
            Dbnz { dst, .. } => 2 + dst.size(),
            Mov { dst, .. } => 2 + dst.size(),
            Br { .. } | Bz { .. } | Bnz { .. } | Jmp { .. } | Call { .. } => 2,
            Push { .. } | Pop { .. } | Set1 { .. } | Clr1 { .. } | Not1 { .. } => 2,
            Ld { src } | Xch { src } | Add { src } | Addc { src } | Sub { src }
            | Subc { src } | And { src } | Or { src } | Xor { src } => 1 + src.size(),
            St { dst } | Inc { dst } | Dec { dst } => 1 + dst.size(),
            Nop | Ret | Reti | Ldc | Ldf | Stf | Mul | Div | Rol | Rolc | Ror | Rorc => 1,
        }
    }

    /// Cycle cost of one execution.
    pub fn cycles(&self) -> u8 {
        use Instruction::*;
        match self {
            Mul | Div => 7,
            Brf { .. } | Callr { .. } => 4,
            Br { .. } | Bz { .. } | Bnz { .. } | Bp { .. } | Bpc { .. } | Bn { .. }
            | Be { .. } | BeInd { .. } | Bne { .. } | BneInd { .. } | Dbnz { .. }
            | Jmp { .. } | Jmpf { .. } | Call { .. } | Callf { .. } | Ret | Reti
            | Ldc | Ldf | Stf | Push { .. } | Pop { .. } => 2,
            Mov { dst: Operand::Direct(_), .. } => 2,
            _ => 1,
        }
    }
}

/// Decode the instruction starting at `bytes[0]`.
///
/// `bytes` must hold the opcode and the two following program bytes (values
/// past the instruction's length are ignored). Returns the instruction and
/// its size in bytes.
pub fn decode(bytes: [u8; 3]) -> (Instruction, u8) {
    use Instruction::*;

    let [op, b1, b2] = bytes;
    let hi = op >> 4;
    let lo = op & 0x0F;

    // Low nibble 8-F: operand folded into the opcode
    if lo >= 8 {
        let b = op & 0x07;
        let d = (((op & 0x10) as u16) << 4) | b1 as u16;
        let a12 = (((op & 0x10) as u16) << 7) | (((op & 0x07) as u16) << 8) | b1 as u16;
        let r = b2 as i8;
        return match hi >> 1 {
            0 => (Call { a: a12 }, 2),
            1 => (Jmp { a: a12 }, 2),
            2 => (Bpc { d, b, r }, 3),
            3 => (Bp { d, b, r }, 3),
            4 => (Bn { d, b, r }, 3),
            5 => (Not1 { d, b }, 2),
            6 => (Clr1 { d, b }, 2),
            _ => (Set1 { d, b }, 2),
        };
    }

    let direct = Operand::Direct((((op & 1) as u16) << 8) | b1 as u16);
    let indirect = Operand::Indirect(op & 0x03);
    // Data-transfer/ALU form: (operand, size) for low nibble 1-7
    let alu = |imm_ok: bool| -> (Operand, u8) {
        match lo {
            1 if imm_ok => (Operand::Imm(b1), 2),
            2 | 3 => (direct, 2),
            _ => (indirect, 1),
        }
    };

    match (hi, lo) {
        (0x0, 0) => (Nop, 1),
        (0x0, 1) => (Br { r: b1 as i8 }, 2),
        (0x0, _) => {
            let (src, size) = alu(false);
            (Ld { src }, size)
        }

        (0x1, 0) => (Callr { r: u16::from_le_bytes([b1, b2]) }, 3),
        (0x1, 1) => (Brf { r: u16::from_le_bytes([b1, b2]) }, 3),
        (0x1, _) => {
            let (dst, size) = alu(false);
            (St { dst }, size)
        }

        (0x2, 0) => (Callf { a: u16::from_be_bytes([b1, b2]) }, 3),
        (0x2, 1) => (Jmpf { a: u16::from_be_bytes([b1, b2]) }, 3),
        (0x2, 2 | 3) => (Mov { k: b2, dst: direct }, 3),
        (0x2, _) => (Mov { k: b1, dst: indirect }, 2),

        (0x3, 0) => (Mul, 1),
        (0x3, 1) => (Be { src: Operand::Imm(b1), r: b2 as i8 }, 3),
        (0x3, 2 | 3) => (Be { src: direct, r: b2 as i8 }, 3),
        (0x3, _) => (BeInd { n: op & 3, k: b1, r: b2 as i8 }, 3),

        (0x4, 0) => (Div, 1),
        (0x4, 1) => (Bne { src: Operand::Imm(b1), r: b2 as i8 }, 3),
        (0x4, 2 | 3) => (Bne { src: direct, r: b2 as i8 }, 3),
        (0x4, _) => (BneInd { n: op & 3, k: b1, r: b2 as i8 }, 3),

        (0x5, 0) => (Ldf, 1),
        (0x5, 1) => (Stf, 1),
        (0x5, 2 | 3) => (Dbnz { dst: direct, r: b2 as i8 }, 3),
        (0x5, _) => (Dbnz { dst: indirect, r: b1 as i8 }, 2),

        // PUSH/POP take d9 in the 0/1 slots
        (0x6, 0 | 1) => (Push { d: (((op & 1) as u16) << 8) | b1 as u16 }, 2),
        (0x6, _) => {
            let (dst, size) = alu(false);
            (Inc { dst }, size)
        }
        (0x7, 0 | 1) => (Pop { d: (((op & 1) as u16) << 8) | b1 as u16 }, 2),
        (0x7, _) => {
            let (dst, size) = alu(false);
            (Dec { dst }, size)
        }

        (0x8, 0) => (Bz { r: b1 as i8 }, 2),
        (0x8, _) => {
            let (src, size) = alu(true);
            (Add { src }, size)
        }
        (0x9, 0) => (Bnz { r: b1 as i8 }, 2),
        (0x9, _) => {
            let (src, size) = alu(true);
            (Addc { src }, size)
        }
        (0xA, 0) => (Ret, 1),
        (0xA, _) => {
            let (src, size) = alu(true);
            (Sub { src }, size)
        }
        (0xB, 0) => (Reti, 1),
        (0xB, _) => {
            let (src, size) = alu(true);
            (Subc { src }, size)
        }
        (0xC, 0) => (Ror, 1),
        (0xC, 1) => (Ldc, 1),
        (0xC, _) => {
            let (src, size) = alu(false);
            (Xch { src }, size)
        }
        (0xD, 0) => (Rorc, 1),
        (0xD, _) => {
            let (src, size) = alu(true);
            (Or { src }, size)
        }
        (0xE, 0) => (Rol, 1),
        (0xE, _) => {
            let (src, size) = alu(true);
            (And { src }, size)
        }
        (0xF, 0) => (Rolc, 1),
        _ => {
            let (src, size) = alu(true);
            (Xor { src }, size)
        }
    }
}
