//! Streams every decoded instruction in a [`BytecodeImage`] to a text sink.
//! A minor companion to the interpreter: it reuses [`crate::decoder::decode`]
//! and never evaluates anything.

use std::io::Write;

use image::BytecodeImage;

use crate::decoder::{self, Capture, Instruction, Pattern};
use crate::error::DisasmError;
use crate::value::Designation;

fn designation_letter(space: Designation) -> &'static str {
    match space {
        Designation::Global => "G",
        Designation::Local => "L",
        Designation::Arg => "A",
        Designation::Access => "C",
    }
}

fn format_captures(captures: &[Capture]) -> String {
    captures
        .iter()
        .map(|c| format!("{}({})", designation_letter(c.space), c.index))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_string(image: &BytecodeImage, offset: u32) -> String {
    image
        .string_at(offset)
        .map(str::to_owned)
        .unwrap_or_else(|_| format!("<bad string offset {:#010x}>", offset))
}

/// Splits an [`Instruction`] into its mnemonic and rendered operand list, the
/// way `<hex pc>:\t<mnemonic>\t<args>` wants them.
fn render(image: &BytecodeImage, instruction: &Instruction) -> (&'static str, String) {
    match instruction {
        Instruction::BinOp(op) => ("BINOP", op.mnemonic().to_string()),
        Instruction::Const(k) => ("CONST", k.to_string()),
        Instruction::MakeString(off) => ("STRING", render_string(image, *off)),
        Instruction::MakeSexp { name_offset, n } => {
            ("SEXP", format!("{} {}", render_string(image, *name_offset), n))
        }
        Instruction::Sti => ("STI", String::new()),
        Instruction::Sta => ("STA", String::new()),
        Instruction::Jmp(off) => ("JMP", format!("{:#010x}", off)),
        Instruction::End => ("END", String::new()),
        Instruction::Ret => ("RET", String::new()),
        Instruction::Drop => ("DROP", String::new()),
        Instruction::Dup => ("DUP", String::new()),
        Instruction::Swap => ("SWAP", String::new()),
        Instruction::Elem => ("ELEM", String::new()),
        Instruction::Ld { space, index } => ("LD", format!("{}({})", designation_letter(*space), index)),
        Instruction::Lda { space, index } => ("LDA", format!("{}({})", designation_letter(*space), index)),
        Instruction::St { space, index } => ("ST", format!("{}({})", designation_letter(*space), index)),
        Instruction::CJmpZero(off) => ("CJMPz", format!("{:#010x}", off)),
        Instruction::CJmpNonZero(off) => ("CJMPnz", format!("{:#010x}", off)),
        Instruction::Begin { args, locals } => ("BEGIN", format!("{} {}", args, locals)),
        Instruction::CBegin { args, locals } => ("CBEGIN", format!("{} {}", args, locals)),
        Instruction::Closure { entry, captures } => (
            "CLOSURE",
            format!("{:#010x} {}", entry, format_captures(captures)),
        ),
        Instruction::CallC { nargs } => ("CALLC", nargs.to_string()),
        Instruction::Call { entry, nargs } => ("CALL", format!("{:#010x} {}", entry, nargs)),
        Instruction::Tag { name_offset, n } => {
            ("TAG", format!("{} {}", render_string(image, *name_offset), n))
        }
        Instruction::ArrayPattern(n) => ("ARRAY", n.to_string()),
        Instruction::Fail { line, col } => ("FAIL", format!("{} {}", line, col)),
        Instruction::Line(n) => ("LINE", n.to_string()),
        Instruction::Pattern(p) => (
            "PATTERN",
            match p {
                Pattern::StrEq => "=str",
                Pattern::IsString => "#string",
                Pattern::IsArray => "#array",
                Pattern::IsSexp => "#sexp",
                Pattern::IsRef => "#ref",
                Pattern::IsVal => "#val",
                Pattern::IsFun => "#fun",
            }
            .to_string(),
        ),
        Instruction::LRead => ("CALL", "Lread".to_string()),
        Instruction::LWrite => ("CALL", "Lwrite".to_string()),
        Instruction::LLength => ("CALL", "Llength".to_string()),
        Instruction::LString => ("CALL", "Lstring".to_string()),
        Instruction::BArray(n) => ("CALL", format!("Barray {}", n)),
        Instruction::Stop => ("STOP", String::new()),
    }
}

fn write_header<W: Write>(image: &BytecodeImage, out: &mut W) -> std::io::Result<()> {
    writeln!(out, "string table size : {}", image.string_table().len())?;
    writeln!(out, "globals area size : {}", image.globals_size())?;
    writeln!(out, "public symbols    : {}", image.publics().len())?;
    for public in image.publics() {
        let name = image
            .string_at(public.name_offset)
            .unwrap_or("<bad string offset>");
        writeln!(out, "  {:#010x}\t{}", public.code_offset, name)?;
    }
    writeln!(out)
}

/// Disassembles every instruction in `image`'s code region to `out`, one
/// line per instruction, stopping after the first `STOP`.
pub fn disassemble<W: Write>(image: &BytecodeImage, out: &mut W) -> Result<(), DisasmError> {
    write_header(image, out)?;

    let code = image.code();
    let mut ip = 0usize;
    loop {
        let (instruction, next_ip) = decoder::decode(code, ip)?;
        let (mnemonic, args) = render(image, &instruction);
        if args.is_empty() {
            writeln!(out, "{:#010x}:\t{}", ip, mnemonic)?;
        } else {
            writeln!(out, "{:#010x}:\t{}\t{}", ip, mnemonic, args)?;
        }
        if matches!(instruction, Instruction::Stop) {
            writeln!(out, "<end>")?;
            return Ok(());
        }
        ip = next_ip;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use byteorder::WriteBytesExt;
    use util::Endian;

    fn build_image(code: &[u8]) -> BytecodeImage {
        let mut buf = Vec::new();
        buf.write_u32::<Endian>(0).unwrap();
        buf.write_u32::<Endian>(0).unwrap();
        buf.write_u32::<Endian>(0).unwrap();
        buf.extend_from_slice(code);
        image::read(&mut &buf[..]).unwrap()
    }

    #[test]
    fn disassembles_const_and_stop() {
        let image = build_image(&[0x10, 0x2A, 0x00, 0x00, 0x00, 0xF0]);
        let mut out = Vec::new();
        disassemble(&image, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("0x00000000:\tCONST\t42"));
        assert!(text.contains("0x00000005:\tSTOP"));
        assert!(text.ends_with("<end>\n"));
    }

    #[test]
    fn disassembles_runtime_calls_by_their_library_name() {
        let image = build_image(&[0x71, 0xF0]);
        let mut out = Vec::new();
        disassemble(&image, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("CALL\tLwrite"));
    }

    #[test]
    fn propagates_decode_errors() {
        // high=2 (LD), low=9: not a valid designation nibble.
        let image = build_image(&[0x29, 0x00, 0x00, 0x00, 0x00]);
        let mut out = Vec::new();
        let err = disassemble(&image, &mut out).unwrap_err();
        assert!(matches!(err, DisasmError::Decode(_)));
    }

    #[test]
    fn decoding_is_deterministic_across_repeated_passes() {
        let code = [
            0x10, 0x01, 0x00, 0x00, 0x00, 0x10, 0x02, 0x00, 0x00, 0x00, 0x01, 0x71, 0xF0,
        ];
        let image = build_image(&code);
        let mut first = Vec::new();
        let mut second = Vec::new();
        disassemble(&image, &mut first).unwrap();
        disassemble(&image, &mut second).unwrap();
        assert_eq!(first, second);
    }
}
