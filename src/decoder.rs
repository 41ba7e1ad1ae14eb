//! Decodes one instruction at a time from a byte cursor into the code
//! region. Shared by the disassembler and the interpreter dispatch loop.

use crate::error::DecodeError;
use crate::value::Designation;
use byteorder::ByteOrder;
use util::Endian;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    fn from_low_nibble(l: u8) -> Option<BinOp> {
        use BinOp::*;
        Some(match l {
            1 => Add,
            2 => Sub,
            3 => Mul,
            4 => Div,
            5 => Mod,
            6 => Lt,
            7 => Le,
            8 => Gt,
            9 => Ge,
            10 => Eq,
            11 => Ne,
            12 => And,
            13 => Or,
            _ => return None,
        })
    }

    pub fn mnemonic(self) -> &'static str {
        use BinOp::*;
        match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
            Mod => "%",
            Lt => "<",
            Le => "<=",
            Gt => ">",
            Ge => ">=",
            Eq => "==",
            Ne => "!=",
            And => "&&",
            Or => "||",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pattern {
    StrEq,
    IsString,
    IsArray,
    IsSexp,
    IsRef,
    IsVal,
    IsFun,
}

/// A captured-value reference used by `CLOSURE`'s operand list: the
/// designation and index to evaluate, at closure-construction time, in the
/// enclosing scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capture {
    pub space: Designation,
    pub index: i32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    BinOp(BinOp),
    Const(i32),
    MakeString(u32),
    MakeSexp { name_offset: u32, n: u32 },
    Sti,
    Sta,
    Jmp(u32),
    End,
    Ret,
    Drop,
    Dup,
    Swap,
    Elem,
    Ld { space: Designation, index: i32 },
    Lda { space: Designation, index: i32 },
    St { space: Designation, index: i32 },
    CJmpZero(u32),
    CJmpNonZero(u32),
    Begin { args: u32, locals: u32 },
    CBegin { args: u32, locals: u32 },
    Closure { entry: u32, captures: Vec<Capture> },
    CallC { nargs: u32 },
    Call { entry: u32, nargs: u32 },
    Tag { name_offset: u32, n: u32 },
    ArrayPattern(u32),
    Fail { line: u32, col: u32 },
    Line(u32),
    Pattern(Pattern),
    LRead,
    LWrite,
    LLength,
    LString,
    BArray(u32),
    Stop,
}

fn read_u8(code: &[u8], ip: usize) -> Result<u8, DecodeError> {
    code.get(ip).copied().ok_or(DecodeError::Truncated { ip })
}

fn read_u32(code: &[u8], ip: usize) -> Result<u32, DecodeError> {
    let bytes = code
        .get(ip..ip + 4)
        .ok_or(DecodeError::Truncated { ip })?;
    Ok(Endian::read_u32(bytes))
}

/// `LD`/`LDA`/`ST` encode their designation directly in the opcode's low
/// nibble (not as a trailing operand byte, unlike `CLOSURE`'s per-capture
/// designations — see `read_capture_designation`).
fn designation_from_nibble(ip: usize, low: u8) -> Result<Designation, DecodeError> {
    Designation::from_byte(low).ok_or(DecodeError::UnknownDesignation { ip, byte: low })
}

fn read_capture_designation(code: &[u8], ip: usize) -> Result<Designation, DecodeError> {
    let byte = read_u8(code, ip)?;
    Designation::from_byte(byte).ok_or(DecodeError::UnknownDesignation { ip, byte })
}

/// Decodes the instruction starting at `ip`, returning it along with the
/// offset of the byte immediately after it.
pub fn decode(code: &[u8], ip: usize) -> Result<(Instruction, usize), DecodeError> {
    let opcode = read_u8(code, ip)?;
    let high = opcode >> 4;
    let low = opcode & 0x0F;
    let mut cur = ip + 1;

    let mut next_u32 = |cur: &mut usize| -> Result<u32, DecodeError> {
        let v = read_u32(code, *cur)?;
        *cur += 4;
        Ok(v)
    };
    let mut next_i32 = |cur: &mut usize| -> Result<i32, DecodeError> {
        Ok(next_u32(cur)? as i32)
    };

    let instruction = match high {
        0 => {
            let op = BinOp::from_low_nibble(low)
                .ok_or(DecodeError::UnknownOpcode { ip, high, low })?;
            Instruction::BinOp(op)
        }
        1 => match low {
            0 => Instruction::Const(next_i32(&mut cur)?),
            1 => Instruction::MakeString(next_u32(&mut cur)?),
            2 => {
                let name_offset = next_u32(&mut cur)?;
                let n = next_u32(&mut cur)?;
                Instruction::MakeSexp { name_offset, n }
            }
            3 => Instruction::Sti,
            4 => Instruction::Sta,
            5 => Instruction::Jmp(next_u32(&mut cur)?),
            6 => Instruction::End,
            7 => Instruction::Ret,
            8 => Instruction::Drop,
            9 => Instruction::Dup,
            10 => Instruction::Swap,
            11 => Instruction::Elem,
            _ => return Err(DecodeError::UnknownOpcode { ip, high, low }),
        },
        2 => {
            let space = designation_from_nibble(ip, low)?;
            let index = next_i32(&mut cur)?;
            Instruction::Ld { space, index }
        }
        3 => {
            let space = designation_from_nibble(ip, low)?;
            let index = next_i32(&mut cur)?;
            Instruction::Lda { space, index }
        }
        4 => {
            let space = designation_from_nibble(ip, low)?;
            let index = next_i32(&mut cur)?;
            Instruction::St { space, index }
        }
        5 => match low {
            0 => Instruction::CJmpZero(next_u32(&mut cur)?),
            1 => Instruction::CJmpNonZero(next_u32(&mut cur)?),
            2 => {
                let args = next_u32(&mut cur)?;
                let locals = next_u32(&mut cur)?;
                Instruction::Begin { args, locals }
            }
            3 => {
                let args = next_u32(&mut cur)?;
                let locals = next_u32(&mut cur)?;
                Instruction::CBegin { args, locals }
            }
            4 => {
                let entry = next_u32(&mut cur)?;
                let n = next_u32(&mut cur)?;
                let mut captures = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    let space = read_capture_designation(code, cur)?;
                    cur += 1;
                    let index = next_i32(&mut cur)?;
                    captures.push(Capture { space, index });
                }
                Instruction::Closure { entry, captures }
            }
            5 => Instruction::CallC {
                nargs: next_u32(&mut cur)?,
            },
            6 => {
                let entry = next_u32(&mut cur)?;
                let nargs = next_u32(&mut cur)?;
                Instruction::Call { entry, nargs }
            }
            7 => {
                let name_offset = next_u32(&mut cur)?;
                let n = next_u32(&mut cur)?;
                Instruction::Tag { name_offset, n }
            }
            8 => Instruction::ArrayPattern(next_u32(&mut cur)?),
            9 => {
                let line = next_u32(&mut cur)?;
                let col = next_u32(&mut cur)?;
                Instruction::Fail { line, col }
            }
            10 => Instruction::Line(next_u32(&mut cur)?),
            _ => return Err(DecodeError::UnknownOpcode { ip, high, low }),
        },
        6 => {
            let pattern = match low {
                0 => Pattern::StrEq,
                1 => Pattern::IsString,
                2 => Pattern::IsArray,
                3 => Pattern::IsSexp,
                4 => Pattern::IsRef,
                5 => Pattern::IsVal,
                6 => Pattern::IsFun,
                _ => return Err(DecodeError::UnknownOpcode { ip, high, low }),
            };
            Instruction::Pattern(pattern)
        }
        7 => match low {
            0 => Instruction::LRead,
            1 => Instruction::LWrite,
            2 => Instruction::LLength,
            3 => Instruction::LString,
            4 => Instruction::BArray(next_u32(&mut cur)?),
            _ => return Err(DecodeError::UnknownOpcode { ip, high, low }),
        },
        15 => Instruction::Stop,
        _ => return Err(DecodeError::UnknownOpcode { ip, high, low }),
    };

    Ok((instruction, cur))
}
