//! Minimal 68000 disassembler for debugger views.
//!
//! Covers the instructions that dominate boot and polling loops (moves,
//! branches, jumps, quick arithmetic, control). Anything else is rendered as
//! a `dc.w` data word so the listing stays aligned.

use super::Disassembly;

const CONDITIONS: [&str; 16] = [
    "t", "f", "hi", "ls", "cc", "cs", "ne", "eq", "vc", "vs", "pl", "mi", "ge", "lt", "gt", "le",
];

#[derive(Clone, Copy)]
enum Size {
    Byte,
    Word,
    Long,
}

impl Size {
    fn suffix(self) -> &'static str {
        match self {
            Size::Byte => "b",
            Size::Word => "w",
            Size::Long => "l",
        }
    }

    /// Size field in bits 7:6 (CLR, TST, ADDQ, SUBQ).
    fn from_bits_76(opcode: u16) -> Option<Size> {
        match (opcode >> 6) & 0x3 {
            0 => Some(Size::Byte),
            1 => Some(Size::Word),
            2 => Some(Size::Long),
            _ => None,
        }
    }
}

struct Reader<F> {
    fetch: F,
    start: u32,
    pos: u32,
}

impl<F: Fn(u32) -> u16> Reader<F> {
    fn word(&mut self) -> u16 {
        let word = (self.fetch)(self.pos);
        self.pos = self.pos.wrapping_add(2);
        word
    }

    fn long(&mut self) -> u32 {
        let hi = self.word() as u32;
        let lo = self.word() as u32;
        (hi << 16) | lo
    }

    fn index(&mut self, base: &str) -> String {
        let ext = self.word();
        let kind = if ext & 0x8000 != 0 { 'a' } else { 'd' };
        let reg = (ext >> 12) & 0x7;
        let size = if ext & 0x0800 != 0 { 'l' } else { 'w' };
        format!("{}({base},{kind}{reg}.{size})", ext as u8 as i8)
    }

    fn ea(&mut self, mode: u16, reg: u16, size: Size) -> Option<String> {
        let text = match mode {
            0 => format!("d{reg}"),
            1 => format!("a{reg}"),
            2 => format!("(a{reg})"),
            3 => format!("(a{reg})+"),
            4 => format!("-(a{reg})"),
            5 => format!("{}(a{reg})", self.word() as i16),
            6 => self.index(&format!("a{reg}")),
            7 => match reg {
                0 => format!("${:04X}.w", self.word()),
                1 => format!("${:08X}", self.long()),
                2 => format!("{}(pc)", self.word() as i16),
                3 => self.index("pc"),
                4 => match size {
                    Size::Byte => format!("#${:02X}", self.word() & 0xFF),
                    Size::Word => format!("#${:04X}", self.word()),
                    Size::Long => format!("#${:08X}", self.long()),
                },
                _ => return None,
            },
            _ => return None,
        };
        Some(text)
    }

    fn ea_low(&mut self, opcode: u16, size: Size) -> Option<String> {
        self.ea((opcode >> 3) & 0x7, opcode & 0x7, size)
    }
}

/// Disassemble one instruction at `addr`, reading opcode words with `fetch`.
pub fn disassemble(fetch: impl Fn(u32) -> u16, addr: u32) -> Disassembly {
    let mut reader = Reader {
        fetch,
        start: addr,
        pos: addr,
    };
    let opcode = reader.word();
    let text = decode(&mut reader, opcode);

    match text {
        Some(text) => Disassembly {
            address: addr,
            length: reader.pos.wrapping_sub(reader.start),
            text,
        },
        None => Disassembly {
            address: addr,
            length: 2,
            text: format!("dc.w ${opcode:04X}"),
        },
    }
}

fn decode<F: Fn(u32) -> u16>(r: &mut Reader<F>, opcode: u16) -> Option<String> {
    match opcode {
        0x4E70 => return Some("reset".into()),
        0x4E71 => return Some("nop".into()),
        0x4E72 => return Some(format!("stop #${:04X}", r.word())),
        0x4E73 => return Some("rte".into()),
        0x4E75 => return Some("rts".into()),
        0x4E76 => return Some("trapv".into()),
        0x4E77 => return Some("rtr".into()),
        _ => {}
    }

    if opcode & 0xFFF0 == 0x4E40 {
        return Some(format!("trap #{}", opcode & 0xF));
    }
    if opcode & 0xFFC0 == 0x4EC0 {
        return Some(format!("jmp {}", r.ea_low(opcode, Size::Long)?));
    }
    if opcode & 0xFFC0 == 0x4E80 {
        return Some(format!("jsr {}", r.ea_low(opcode, Size::Long)?));
    }
    if opcode & 0xF1C0 == 0x41C0 {
        let an = (opcode >> 9) & 0x7;
        return Some(format!("lea {},a{an}", r.ea_low(opcode, Size::Long)?));
    }
    if opcode & 0xFF00 == 0x4200 {
        let size = Size::from_bits_76(opcode)?;
        return Some(format!("clr.{} {}", size.suffix(), r.ea_low(opcode, size)?));
    }
    if opcode & 0xFF00 == 0x4A00 {
        let size = Size::from_bits_76(opcode)?;
        return Some(format!("tst.{} {}", size.suffix(), r.ea_low(opcode, size)?));
    }
    if opcode & 0xF100 == 0x7000 {
        let dn = (opcode >> 9) & 0x7;
        return Some(format!("moveq #{},d{dn}", opcode as u8 as i8));
    }
    if opcode & 0xF0F8 == 0x50C8 {
        let condition = CONDITIONS[((opcode >> 8) & 0xF) as usize];
        let base = r.pos;
        let target = base.wrapping_add(r.word() as i16 as u32);
        let dn = opcode & 0x7;
        return Some(format!("db{condition} d{dn},${target:06X}"));
    }
    if opcode & 0xF000 == 0x5000 {
        let size = Size::from_bits_76(opcode)?;
        let mnemonic = if opcode & 0x0100 != 0 { "subq" } else { "addq" };
        let data = match (opcode >> 9) & 0x7 {
            0 => 8,
            n => n,
        };
        let ea = r.ea_low(opcode, size)?;
        return Some(format!("{mnemonic}.{} #{data},{ea}", size.suffix()));
    }
    if opcode & 0xF000 == 0x6000 {
        let mnemonic = match (opcode >> 8) & 0xF {
            0 => "bra",
            1 => "bsr",
            n => &CONDITIONS[n as usize][..],
        };
        let prefix = if (opcode >> 8) & 0xF >= 2 { "b" } else { "" };
        let base = r.pos;
        let (displacement, suffix) = match opcode & 0xFF {
            0 => (r.word() as i16 as u32, ".w"),
            short => (short as u8 as i8 as u32, ".s"),
        };
        let target = base.wrapping_add(displacement);
        return Some(format!("{prefix}{mnemonic}{suffix} ${target:06X}"));
    }
    if opcode & 0xC000 == 0 {
        let size = match (opcode >> 12) & 0x3 {
            1 => Size::Byte,
            3 => Size::Word,
            2 => Size::Long,
            _ => return None,
        };
        let src = r.ea_low(opcode, size)?;
        let dst_mode = (opcode >> 6) & 0x7;
        let dst_reg = (opcode >> 9) & 0x7;
        if dst_mode == 1 {
            if matches!(size, Size::Byte) {
                return None;
            }
            return Some(format!("movea.{} {src},a{dst_reg}", size.suffix()));
        }
        let dst = r.ea(dst_mode, dst_reg, size)?;
        return Some(format!("move.{} {src},{dst}", size.suffix()));
    }

    None
}
