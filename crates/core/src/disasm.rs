//! LC86K instruction disassembler.
//!
//! Converts decoded [`Instruction`] values back to assembly text for trace
//! logs and the frontend's register dump. SFR operands are shown by name.

use crate::opcodes::{self, Instruction, Operand};
use crate::sfr;

/// Format a direct address, using the SFR name when there is one.
fn d9(addr: u16) -> String {
    match sfr::name(addr) {
        Some(name) => name.to_string(),
        None => format!("${:03X}", addr),
    }
}

fn operand(op: Operand) -> String {
    match op {
        Operand::Imm(k) => format!("#${:02X}", k),
        Operand::Direct(d) => d9(d),
        Operand::Indirect(n) => format!("@R{}", n),
    }
}

/// Format a decoded instruction as an assembly string.
///
/// `pc` is the address of the instruction; branch and call targets are
/// printed as absolute addresses.
pub fn disassemble(inst: Instruction, pc: u16) -> String {
    let next = pc.wrapping_add(inst.size() as u16);
    let rel = |r: i8| next.wrapping_add(r as i16 as u16);
    match inst {
        Instruction::Nop => "NOP".into(),
        // Branches
        Instruction::Br { r } => format!("BR ${:04X}", rel(r)),
        Instruction::Brf { r } => format!("BRF ${:04X}", next.wrapping_sub(1).wrapping_add(r)),
        Instruction::Bz { r } => format!("BZ ${:04X}", rel(r)),
        Instruction::Bnz { r } => format!("BNZ ${:04X}", rel(r)),
        Instruction::Bp { d, b, r } => format!("BP {}, {}, ${:04X}", d9(d), b, rel(r)),
        Instruction::Bpc { d, b, r } => format!("BPC {}, {}, ${:04X}", d9(d), b, rel(r)),
        Instruction::Bn { d, b, r } => format!("BN {}, {}, ${:04X}", d9(d), b, rel(r)),
        Instruction::Be { src, r } => format!("BE {}, ${:04X}", operand(src), rel(r)),
        Instruction::BeInd { n, k, r } => format!("BE @R{}, #${:02X}, ${:04X}", n, k, rel(r)),
        Instruction::Bne { src, r } => format!("BNE {}, ${:04X}", operand(src), rel(r)),
        Instruction::BneInd { n, k, r } => format!("BNE @R{}, #${:02X}, ${:04X}", n, k, rel(r)),
        Instruction::Dbnz { dst, r } => format!("DBNZ {}, ${:04X}", operand(dst), rel(r)),
        // Jumps and calls
        Instruction::Jmp { a } => format!("JMP ${:04X}", (next & 0xF000) | a),
        Instruction::Jmpf { a } => format!("JMPF ${:04X}", a),
        Instruction::Call { a } => format!("CALL ${:04X}", (next & 0xF000) | a),
        Instruction::Callf { a } => format!("CALLF ${:04X}", a),
        Instruction::Callr { r } => format!("CALLR ${:04X}", next.wrapping_sub(1).wrapping_add(r)),
        Instruction::Ret => "RET".into(),
        Instruction::Reti => "RETI".into(),
        // Data transfer
        Instruction::Ld { src } => format!("LD {}", operand(src)),
        Instruction::St { dst } => format!("ST {}", operand(dst)),
        Instruction::Mov { k, dst } => format!("MOV #${:02X}, {}", k, operand(dst)),
        Instruction::Ldc => "LDC".into(),
        Instruction::Ldf => "LDF".into(),
        Instruction::Stf => "STF".into(),
        Instruction::Push { d } => format!("PUSH {}", d9(d)),
        Instruction::Pop { d } => format!("POP {}", d9(d)),
        Instruction::Xch { src } => format!("XCH {}", operand(src)),
        // Arithmetic
        Instruction::Inc { dst } => format!("INC {}", operand(dst)),
        Instruction::Dec { dst } => format!("DEC {}", operand(dst)),
        Instruction::Add { src } => format!("ADD {}", operand(src)),
        Instruction::Addc { src } => format!("ADDC {}", operand(src)),
        Instruction::Sub { src } => format!("SUB {}", operand(src)),
        Instruction::Subc { src } => format!("SUBC {}", operand(src)),
        Instruction::Mul => "MUL".into(),
        Instruction::Div => "DIV".into(),
        // Logic
        Instruction::And { src } => format!("AND {}", operand(src)),
        Instruction::Or { src } => format!("OR {}", operand(src)),
        Instruction::Xor { src } => format!("XOR {}", operand(src)),
        Instruction::Rol => "ROL".into(),
        Instruction::Rolc => "ROLC".into(),
        Instruction::Ror => "ROR".into(),
        Instruction::Rorc => "RORC".into(),
        // Bits
        Instruction::Set1 { d, b } => format!("SET1 {}, {}", d9(d), b),
        Instruction::Clr1 { d, b } => format!("CLR1 {}, {}", d9(d), b),
        Instruction::Not1 { d, b } => format!("NOT1 {}, {}", d9(d), b),
    }
}

/// Format PSW as a flag string like "cy ac ov p" (lowercase = clear, upper = set),
/// followed by the register and RAM bank selects.
pub fn format_psw(psw: u8) -> String {
    let flag = |mask: u8, name: &str| {
        if psw & mask != 0 { name.to_ascii_uppercase() } else { name.to_string() }
    };
    format!(
        "{} {} {} {} irbk={} rambk={}",
        flag(sfr::PSW_CY, "cy"),
        flag(sfr::PSW_AC, "ac"),
        flag(sfr::PSW_OV, "ov"),
        flag(sfr::PSW_P, "p"),
        (psw >> 3) & 3,
        (psw >> 1) & 1
    )
}

/// Disassemble program memory from `start` up to (not including) `end`.
///
/// Returns lines of `"AAAA: BYTES  MNEMONIC"`.
pub fn disassemble_range(program: &[u8], start: u16, end: u16) -> Vec<String> {
    let byte = |a: u16| program.get(a as usize).copied().unwrap_or(0);
    let mut lines = Vec::new();
    let mut addr = start;
    while addr < end {
        let bytes = [byte(addr), byte(addr.wrapping_add(1)), byte(addr.wrapping_add(2))];
        let (inst, size) = opcodes::decode(bytes);
        let hex: Vec<String> = bytes[..size as usize].iter().map(|b| format!("{:02X}", b)).collect();
        lines.push(format!("{:04X}: {:<8}  {}", addr, hex.join(" "), disassemble(inst, addr)));
        match addr.checked_add(size as u16) {
            Some(a) => addr = a,
            None => break,
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disasm_basic() {
        assert_eq!(disassemble(Instruction::Nop, 0), "NOP");
        assert_eq!(disassemble(Instruction::Ld { src: Operand::Direct(0x102) }, 0), "LD B");
        assert_eq!(disassemble(Instruction::Ld { src: Operand::Direct(0x030) }, 0), "LD $030");
        assert_eq!(
            disassemble(Instruction::Mov { k: 0x81, dst: Operand::Direct(sfr::OCR) }, 0),
            "MOV #$81, OCR"
        );
        assert_eq!(disassemble(Instruction::Add { src: Operand::Indirect(2) }, 0), "ADD @R2");
    }

    #[test]
    fn test_disasm_branch_targets() {
        // BR -2 at 0x10: next = 0x12, target = 0x10
        assert_eq!(disassemble(Instruction::Br { r: -2 }, 0x10), "BR $0010");
        assert_eq!(disassemble(Instruction::Jmp { a: 0x123 }, 0x4FFE), "JMP $5123");
        assert_eq!(
            disassemble(Instruction::Bp { d: sfr::P3, b: 4, r: 3 }, 0x200),
            "BP P3, 4, $0206"
        );
    }

    #[test]
    fn test_format_psw() {
        assert_eq!(format_psw(0x00), "cy ac ov p irbk=0 rambk=0");
        assert_eq!(format_psw(0x83 | 0x08), "CY ac ov P irbk=1 rambk=1");
    }

    #[test]
    fn test_disassemble_range() {
        let program = [0x23, 0x0E, 0x81, 0x00, 0xA0];
        let lines = disassemble_range(&program, 0, 5);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("0000: 23 0E 81"));
        assert!(lines[0].ends_with("MOV #$81, OCR"));
        assert!(lines[2].ends_with("RET"));
    }
}
