//! The interpreter core: operand stack, activation frames, dispatch loop,
//! the closure protocol and pattern-matching primitives.
//!
//! Frames are kept as explicit descriptors (see [`crate::frame::Frame`])
//! rather than laid out inside the operand stack via raw pointer
//! arithmetic. The "current frame" is always the last element of
//! `self.frames`; opening one is a `push`, tearing one down is a `pop`,
//! which gives the restoration of the enclosing frame for free.

use std::collections::HashMap;
use std::rc::Rc;

use image::BytecodeImage;

use crate::decoder::{self, BinOp, Instruction, Pattern};
use crate::error::RuntimeError;
use crate::frame::Frame;
use crate::runtime::Runtime;
use crate::value::{Designation, Value};

/// Reserved operand-stack capacity, in `Value` slots, sized to roughly
/// match the reference implementation's 10 MiB byte stack.
const STACK_RESERVE: usize = (10 * 1024 * 1024) / std::mem::size_of::<Value>();

enum Flow {
    Next(usize),
    Stop,
}

/// Every live tagged reference this run holds, exposed read-only for the
/// external GC to enumerate as roots (see the resource model's "Cyclic
/// references" note: closures can reference globals which can reference
/// closures, and the conservative GC cannot scan Rust's own `Vec`/`Rc`
/// allocations the way it scans a `malloc`'d stack). This struct is the
/// interpreter's half of that contract; the GC itself lives entirely in
/// the external runtime library.
pub struct RootSet<'a> {
    /// The operand stack, including transient `Value::Address` slots (the
    /// GC ignores those; they never carry a heap handle).
    pub stack: &'a [Value],
    /// The globals area.
    pub globals: &'a [Value],
    /// Capture cells of every frame currently on the call stack, not just
    /// the innermost one: once a closure object is popped off the operand
    /// stack by `CALLC`, its enclosing `CBEGIN` frame's `captures` is the
    /// only reference the interpreter still holds to its captured values.
    captures: Vec<Value>,
}

impl<'a> RootSet<'a> {
    /// Capture cells live across every active frame, flattened into one
    /// set (the GC only needs the set of live values, not which frame or
    /// index each belongs to).
    pub fn captures(&self) -> &[Value] {
        &self.captures
    }

    /// Every live tagged value in this run, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        self.stack
            .iter()
            .copied()
            .chain(self.globals.iter().copied())
            .chain(self.captures.iter().copied())
    }
}

/// One run of the interpreter over a single [`BytecodeImage`].
///
/// Globals, the operand stack and the frame stack are all owned here and
/// live only for the duration of `run`; none of it is process-wide state.
pub struct Interpreter<'a, R: Runtime> {
    image: &'a BytecodeImage,
    runtime: R,
    source_name: String,
    stack: Vec<Value>,
    globals: Vec<Value>,
    frames: Vec<Frame>,
    /// Entry offset and capture vector for closures built by `CLOSURE`,
    /// keyed by the boxed handle the runtime returned for that closure
    /// object. The closure object itself is opaque to the core; this side
    /// table is how the core recovers both the code to jump to and the
    /// `ACCESS`-addressable captures from a closure value, without reaching
    /// into runtime-owned heap memory.
    closures: HashMap<u32, (u32, Rc<[Value]>)>,
    /// Threaded from `CALL`/`CALLC` to the `BEGIN`/`CBEGIN` that opens the
    /// callee's frame; there is never other code between them. `None` only
    /// before the program's own entry-point frame, which has no caller.
    pending_return: Option<usize>,
    pending_captures: Option<Rc<[Value]>>,
}

impl<'a, R: Runtime> Interpreter<'a, R> {
    pub fn new(image: &'a BytecodeImage, runtime: R, source_name: impl Into<String>) -> Self {
        let globals = vec![Value::Int(0); image.globals_size() as usize];
        Interpreter {
            image,
            runtime,
            source_name: source_name.into(),
            stack: Vec::with_capacity(STACK_RESERVE.max(64)),
            globals,
            frames: Vec::new(),
            closures: HashMap::new(),
            pending_return: None,
            pending_captures: None,
        }
    }

    /// Runs the program from the first byte of the code region until
    /// `STOP` or the outermost frame returns.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        let mut ip = 0usize;
        loop {
            let (instruction, next_ip) = decoder::decode(self.image.code(), ip)?;
            log::trace!("{:#08x}: {:?}", ip, instruction);
            match self.step(instruction, ip, next_ip)? {
                Flow::Next(new_ip) => ip = new_ip,
                Flow::Stop => return Ok(()),
            }
        }
    }

    /// Exposes every live tagged reference reachable from this run, for
    /// the external GC to enumerate as roots. May be called at any point
    /// between instructions (in particular, from inside a `Runtime` call,
    /// where the GC may run per the resource model).
    pub fn roots(&self) -> RootSet<'_> {
        let captures = self
            .frames
            .iter()
            .filter_map(|frame| frame.captures.as_deref())
            .flat_map(|captures| captures.iter().copied())
            .collect();
        RootSet {
            stack: &self.stack,
            globals: &self.globals,
            captures,
        }
    }

    fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    fn pop(&mut self, ip: usize) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow { ip })
    }

    fn peek(&self, ip: usize) -> Result<Value, RuntimeError> {
        self.stack.last().copied().ok_or(RuntimeError::StackUnderflow { ip })
    }

    fn pop_int(&mut self, ip: usize) -> Result<i32, RuntimeError> {
        let v = self.pop(ip)?;
        v.as_int().ok_or(RuntimeError::ExpectedInt { ip })
    }

    fn check_jump(&self, ip: usize, target: u32) -> Result<usize, RuntimeError> {
        let target = target as usize;
        if target < self.image.code().len() {
            Ok(target)
        } else {
            Err(RuntimeError::BadJump { ip, target })
        }
    }

    fn current_frame(&self) -> &Frame {
        self.frames.last().expect("LD/ST of a local/arg/capture outside any frame")
    }

    /// Resolves a code-referenced string-table offset (`STRING`/`SEXP`/`TAG`),
    /// turning a malformed offset into a fatal `RuntimeError` instead of a
    /// panic: unlike public-symbol offsets, these are never range-checked at
    /// load time (they are opaque operand words until the instruction that
    /// carries them actually executes).
    fn string_at(&self, ip: usize, offset: u32) -> Result<&str, RuntimeError> {
        self.image
            .string_at(offset)
            .map_err(|source| RuntimeError::BadString { ip, source })
    }

    /// Reads the current value addressed by `space, index`.
    fn read_var(&self, ip: usize, space: Designation, index: i32) -> Result<Value, RuntimeError> {
        let index = index as usize;
        Ok(match space {
            Designation::Global => self.globals[index],
            Designation::Local => self.stack[self.current_frame().locals_base + index],
            Designation::Arg => self.stack[self.current_frame().args_base + index],
            Designation::Access => {
                let captures = self
                    .current_frame()
                    .captures
                    .as_ref()
                    .ok_or(RuntimeError::NoCaptures(space))?;
                captures[index]
            }
        })
    }

    /// Writes `value` into the cell addressed by `space, index`. Used by
    /// `ST`, which writes without consuming the stack, and by `STI`
    /// through a previously materialized [`Value::Address`].
    fn write_var(&mut self, ip: usize, space: Designation, index: i32, value: Value) -> Result<(), RuntimeError> {
        let index = index as usize;
        match space {
            Designation::Global => self.globals[index] = value,
            Designation::Local => {
                let base = self.current_frame().locals_base;
                self.stack[base + index] = value;
            }
            Designation::Arg => {
                let base = self.current_frame().args_base;
                self.stack[base + index] = value;
            }
            Designation::Access => return Err(RuntimeError::ImmutableCapture { ip }),
        }
        Ok(())
    }

    fn step(&mut self, instruction: Instruction, ip: usize, next_ip: usize) -> Result<Flow, RuntimeError> {
        match instruction {
            Instruction::BinOp(op) => {
                let rhs = self.pop_int(ip)?;
                let lhs = self.pop_int(ip)?;
                let result = self.eval_binop(ip, op, lhs, rhs)?;
                self.push(Value::Int(result));
            }

            Instruction::Const(k) => self.push(Value::Int(k)),

            Instruction::MakeString(off) => {
                let s = self.string_at(ip, off)?;
                let v = self.runtime.make_string(s);
                self.push(v);
            }

            Instruction::MakeSexp { name_offset, n } => {
                let fields = self.pop_fields(ip, n)?;
                let tag = self.string_at(ip, name_offset)?;
                let v = self.runtime.make_sexp(tag, &fields);
                self.push(v);
            }

            Instruction::Sti => {
                let value = self.pop(ip)?;
                let addr = self.pop(ip)?;
                match addr {
                    Value::Address { space, index } => self.write_var(ip, space, index, value)?,
                    _ => return Err(RuntimeError::ExpectedAddress { ip }),
                }
                self.push(value);
            }

            Instruction::Sta => {
                let value = self.pop(ip)?;
                let index = self.pop(ip)?;
                let container = self.pop(ip)?;
                let v = self.runtime.store(container, index, value);
                self.push(v);
            }

            Instruction::Jmp(off) => return Ok(Flow::Next(self.check_jump(ip, off)?)),

            Instruction::End | Instruction::Ret => return self.teardown_frame(ip),

            Instruction::Drop => {
                self.pop(ip)?;
            }

            Instruction::Dup => {
                let v = self.peek(ip)?;
                self.push(v);
            }

            Instruction::Swap => {
                let b = self.pop(ip)?;
                let a = self.pop(ip)?;
                self.push(b);
                self.push(a);
            }

            Instruction::Elem => {
                let index = self.pop(ip)?;
                let container = self.pop(ip)?;
                let v = self.runtime.elem(container, index);
                self.push(v);
            }

            Instruction::Ld { space, index } => {
                let v = self.read_var(ip, space, index)?;
                self.push(v);
            }

            Instruction::Lda { space, index } => {
                let addr = Value::Address { space, index: index as usize };
                self.push(addr);
                self.push(addr);
            }

            Instruction::St { space, index } => {
                let v = self.peek(ip)?;
                self.write_var(ip, space, index, v)?;
            }

            Instruction::CJmpZero(off) => {
                let v = self.pop_int(ip)?;
                if v == 0 {
                    return Ok(Flow::Next(self.check_jump(ip, off)?));
                }
            }

            Instruction::CJmpNonZero(off) => {
                let v = self.pop_int(ip)?;
                if v != 0 {
                    return Ok(Flow::Next(self.check_jump(ip, off)?));
                }
            }

            Instruction::Begin { args, locals } => self.open_frame(args, locals, None),

            Instruction::CBegin { args, locals } => {
                let captures = self.pending_captures.take();
                self.open_frame(args, locals, captures);
            }

            Instruction::Closure { entry, captures } => {
                let mut values = Vec::with_capacity(captures.len());
                for c in &captures {
                    values.push(self.read_var(ip, c.space, c.index)?);
                }
                let handle = self.runtime.make_closure(entry, &values);
                if let Value::Boxed(h) = handle {
                    self.closures.insert(h, (entry, Rc::from(values)));
                }
                self.push(handle);
            }

            Instruction::CallC { nargs } => {
                let closure_pos = self
                    .stack
                    .len()
                    .checked_sub(nargs as usize + 1)
                    .ok_or(RuntimeError::StackUnderflow { ip })?;
                let closure = self.stack.remove(closure_pos);
                let handle = closure.as_boxed().expect("CALLC operand is a closure value");
                let (entry, captures) = self
                    .closures
                    .get(&handle)
                    .cloned()
                    .expect("CALLC operand was constructed by a preceding CLOSURE");
                self.pending_return = Some(next_ip);
                self.pending_captures = Some(captures);
                return Ok(Flow::Next(self.check_jump(ip, entry)?));
            }

            Instruction::Call { entry, .. } => {
                self.pending_return = Some(next_ip);
                self.pending_captures = None;
                return Ok(Flow::Next(self.check_jump(ip, entry)?));
            }

            Instruction::Tag { name_offset, n } => {
                let v = self.pop(ip)?;
                let tag = self.string_at(ip, name_offset)?;
                let result = self.runtime.is_sexp_with(v, tag, n);
                self.push(result);
            }

            Instruction::ArrayPattern(n) => {
                let v = self.pop(ip)?;
                let result = self.runtime.is_array_of_size(v, n);
                self.push(result);
            }

            Instruction::Fail { line, col } => {
                let v = self.pop(ip)?;
                self.runtime.match_failure(v, &self.source_name, line, col);
            }

            Instruction::Line(_) => {}

            Instruction::Pattern(pattern) => {
                let result = match pattern {
                    Pattern::StrEq => {
                        let pat = self.pop(ip)?;
                        let v = self.pop(ip)?;
                        self.runtime.string_eq_pattern(pat, v)
                    }
                    Pattern::IsString => {
                        let v = self.pop(ip)?;
                        self.runtime.is_string(v)
                    }
                    Pattern::IsArray => {
                        let v = self.pop(ip)?;
                        self.runtime.is_array(v)
                    }
                    Pattern::IsSexp => {
                        let v = self.pop(ip)?;
                        self.runtime.is_sexp(v)
                    }
                    Pattern::IsRef => {
                        let v = self.pop(ip)?;
                        self.runtime.is_ref(v)
                    }
                    Pattern::IsVal => {
                        let v = self.pop(ip)?;
                        self.runtime.is_val(v)
                    }
                    Pattern::IsFun => {
                        let v = self.pop(ip)?;
                        self.runtime.is_fun(v)
                    }
                };
                self.push(result);
            }

            Instruction::LRead => {
                let v = self.runtime.read();
                self.push(v);
            }

            Instruction::LWrite => {
                let v = self.pop(ip)?;
                let result = self.runtime.write(v);
                self.push(result);
            }

            Instruction::LLength => {
                let v = self.pop(ip)?;
                let result = self.runtime.length(v);
                self.push(result);
            }

            Instruction::LString => {
                let v = self.pop(ip)?;
                let result = self.runtime.to_string(v);
                self.push(result);
            }

            Instruction::BArray(n) => {
                let fields = self.pop_fields(ip, n)?;
                let v = self.runtime.make_array(&fields);
                self.push(v);
            }

            Instruction::Stop => return Ok(Flow::Stop),
        }

        Ok(Flow::Next(next_ip))
    }

    /// Pops `n` values off the stack into natural field order: the value
    /// popped last (i.e. deepest on the stack) becomes `fields[0]`, the
    /// value popped first (the instruction's top of stack) becomes
    /// `fields[n - 1]`.
    fn pop_fields(&mut self, ip: usize, n: u32) -> Result<Vec<Value>, RuntimeError> {
        let mut fields = Vec::with_capacity(n as usize);
        for _ in 0..n {
            fields.push(self.pop(ip)?);
        }
        fields.reverse();
        Ok(fields)
    }

    fn eval_binop(&self, ip: usize, op: BinOp, lhs: i32, rhs: i32) -> Result<i32, RuntimeError> {
        use BinOp::*;
        Ok(match op {
            Add => lhs.wrapping_add(rhs),
            Sub => lhs.wrapping_sub(rhs),
            Mul => lhs.wrapping_mul(rhs),
            Div => {
                if rhs == 0 {
                    return Err(RuntimeError::DivByZero { ip });
                }
                lhs.wrapping_div(rhs)
            }
            Mod => {
                if rhs == 0 {
                    return Err(RuntimeError::DivByZero { ip });
                }
                lhs.wrapping_rem(rhs)
            }
            Lt => (lhs < rhs) as i32,
            Le => (lhs <= rhs) as i32,
            Gt => (lhs > rhs) as i32,
            Ge => (lhs >= rhs) as i32,
            Eq => (lhs == rhs) as i32,
            Ne => (lhs != rhs) as i32,
            And => (lhs != 0 && rhs != 0) as i32,
            Or => (lhs != 0 || rhs != 0) as i32,
        })
    }

    fn open_frame(&mut self, args: u32, locals: u32, captures: Option<Rc<[Value]>>) {
        let args_base = self.stack.len() - args as usize;
        let locals_base = self.stack.len();
        for _ in 0..locals {
            self.push(Value::Int(0));
        }
        let outermost = self.frames.is_empty();
        // The compiler emits the program's entry point as a `BEGIN` at
        // ip=0 with no preceding `CALL` to thread a return address through;
        // `pending_return` is only `None` in exactly that case, since every
        // nested call sets it right before jumping here. The outermost
        // frame's `saved_ip` is never read (`teardown_frame` stops instead
        // of resuming a caller), so the default is never observed.
        let saved_ip = self.pending_return.take().unwrap_or(0);
        self.frames.push(Frame {
            args_base,
            locals_base,
            saved_ip,
            captures,
            outermost,
        });
    }

    fn teardown_frame(&mut self, ip: usize) -> Result<Flow, RuntimeError> {
        let result = self.pop(ip)?;
        let frame = self
            .frames
            .pop()
            .ok_or(RuntimeError::OutermostUnderflow { ip })?;
        self.stack.truncate(frame.args_base);
        if frame.outermost {
            return Ok(Flow::Stop);
        }
        self.push(result);
        Ok(Flow::Next(frame.saved_ip))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use byteorder::WriteBytesExt;
    use util::Endian;

    fn build_image(globals_size: u32, code: &[u8]) -> BytecodeImage {
        build_image_with_strings(globals_size, b"", code)
    }

    fn build_image_with_strings(globals_size: u32, strings: &[u8], code: &[u8]) -> BytecodeImage {
        let mut buf = Vec::new();
        buf.write_u32::<Endian>(strings.len() as u32).unwrap();
        buf.write_u32::<Endian>(globals_size).unwrap();
        buf.write_u32::<Endian>(0).unwrap(); // n_publics
        buf.extend_from_slice(strings);
        buf.extend_from_slice(code);
        image::read(&mut &buf[..]).unwrap()
    }

    fn run(globals_size: u32, code: &[u8]) -> Vec<i32> {
        let img = build_image(globals_size, code);
        let rt = crate::mock_runtime::MockRuntime::new();
        let mut interp = Interpreter::new(&img, &rt, "test.lama");
        interp.run().unwrap();
        rt.output()
    }

    #[test]
    fn writes_a_constant() {
        let code = [
            0x10, 0x2A, 0x00, 0x00, 0x00, // CONST 42
            0x71, // Lwrite
            0x10, 0x00, 0x00, 0x00, 0x00, // CONST 0
            0xF0, // STOP
        ];
        assert_eq!(run(0, &code), vec![42]);
    }

    #[test]
    fn adds_two_constants() {
        let code = [
            0x10, 0x02, 0x00, 0x00, 0x00,
            0x10, 0x03, 0x00, 0x00, 0x00,
            0x01, // BINOP +
            0x71,
            0xF0,
        ];
        assert_eq!(run(0, &code), vec![5]);
    }

    #[test]
    fn global_round_trip() {
        let code = [
            0x10, 0x07, 0x00, 0x00, 0x00, // CONST 7
            0x40, 0x00, 0x00, 0x00, 0x00, // ST GLOBAL(0) -- designation in low nibble
            0x20, 0x00, 0x00, 0x00, 0x00, // LD GLOBAL(0)
            0x71,
            0xF0,
        ];
        assert_eq!(run(1, &code), vec![7]);
    }

    #[test]
    fn conditional_jump_takes_the_else_branch() {
        let code = [
            0x10, 0x00, 0x00, 0x00, 0x00, // 0: CONST 0
            0x50, 0x14, 0x00, 0x00, 0x00, // 5: CJMPz 20 (jump to else)
            0x10, 0x01, 0x00, 0x00, 0x00, // 10: CONST 1 (then)
            0x15, 0x19, 0x00, 0x00, 0x00, // 15: JMP 25 (skip else)
            0x10, 0x02, 0x00, 0x00, 0x00, // 20: CONST 2 (else)
            0x71, // 25: Lwrite
            0xF0, // 26: STOP
        ];
        assert_eq!(run(0, &code), vec![2]);
    }

    #[test]
    fn division_by_zero_aborts() {
        let code = [
            0x10, 0x01, 0x00, 0x00, 0x00,
            0x10, 0x00, 0x00, 0x00, 0x00,
            0x04, // BINOP /
            0xF0,
        ];
        let img = build_image(0, &code);
        let rt = crate::mock_runtime::MockRuntime::new();
        let mut interp = Interpreter::new(&img, &rt, "test.lama");
        assert!(matches!(interp.run(), Err(RuntimeError::DivByZero { .. })));
    }

    #[test]
    fn int_min_div_minus_one_wraps() {
        let mut code = Vec::new();
        code.push(0x10);
        code.extend_from_slice(&i32::MIN.to_le_bytes());
        code.push(0x10);
        code.extend_from_slice(&(-1i32).to_le_bytes());
        code.push(0x04); // BINOP /
        code.push(0x71); // Lwrite
        code.extend_from_slice(&[0x10, 0x00, 0x00, 0x00, 0x00]);
        code.push(0xF0);
        assert_eq!(run(0, &code), vec![i32::MIN]);
    }

    #[test]
    fn dup_then_drop_is_a_no_op() {
        let code = [
            0x10, 0x09, 0x00, 0x00, 0x00, // CONST 9
            0x19, // DUP
            0x18, // DROP
            0x71,
            0xF0,
        ];
        assert_eq!(run(0, &code), vec![9]);
    }

    #[test]
    fn swap_twice_is_a_no_op() {
        let code = [
            0x10, 0x01, 0x00, 0x00, 0x00, // CONST 1
            0x10, 0x02, 0x00, 0x00, 0x00, // CONST 2
            0x1A, // SWAP
            0x1A, // SWAP
            0x18, // DROP (top is 2)
            0x71, // write 1
            0xF0,
        ];
        assert_eq!(run(0, &code), vec![1]);
    }

    #[test]
    fn bad_jump_target_is_rejected() {
        let code = [
            0x15, 0xFF, 0x00, 0x00, 0x00, // JMP 0xff (out of range)
            0xF0,
        ];
        let img = build_image(0, &code);
        let rt = crate::mock_runtime::MockRuntime::new();
        let mut interp = Interpreter::new(&img, &rt, "test.lama");
        assert!(matches!(interp.run(), Err(RuntimeError::BadJump { .. })));
    }

    #[test]
    fn call_and_return_threads_the_argument_back() {
        // top level: BEGIN 0,0 ; CONST 9 ; CALL callee,1 ; Lwrite ; END
        // callee: BEGIN 1,0 ; LD ARG 0 ; RET
        //
        // The whole program runs inside its own outermost BEGIN/END, the
        // way the compiler always wraps a program's entry point: only then
        // is the callee's frame a genuine nested call rather than another
        // candidate for "the" outermost frame.
        let mut code = Vec::new();
        code.push(0x52); // BEGIN 0,0 (outermost)
        code.extend_from_slice(&0u32.to_le_bytes());
        code.extend_from_slice(&0u32.to_le_bytes());
        code.extend_from_slice(&[0x10, 0x09, 0x00, 0x00, 0x00]); // CONST 9
        code.push(0x56); // CALL
        let entry_patch_at = code.len();
        code.extend_from_slice(&0u32.to_le_bytes()); // entry, patched below
        code.extend_from_slice(&1u32.to_le_bytes()); // nargs=1
        code.push(0x71); // Lwrite
        code.push(0x16); // END

        let callee_off = code.len() as u32;
        code[entry_patch_at..entry_patch_at + 4].copy_from_slice(&callee_off.to_le_bytes());

        code.push(0x52); // BEGIN
        code.extend_from_slice(&1u32.to_le_bytes()); // args=1
        code.extend_from_slice(&0u32.to_le_bytes()); // locals=0
        code.push(0x22); // LD ARG(0) -- designation(ARG=2) in the low nibble
        code.extend_from_slice(&0i32.to_le_bytes());
        code.push(0x17); // RET

        assert_eq!(run(0, &code), vec![9]);
    }

    #[test]
    fn lda_sti_writes_through_the_addressed_global() {
        // LDA GLOBAL(0) ; CONST 9 ; STI ; DROP ; DROP ; LD GLOBAL(0) ; Lwrite ; STOP
        let mut code = Vec::new();
        code.push(0x30); // LDA GLOBAL(0)
        code.extend_from_slice(&0i32.to_le_bytes());
        code.extend_from_slice(&[0x10, 0x09, 0x00, 0x00, 0x00]); // CONST 9
        code.push(0x13); // STI
        code.push(0x18); // DROP (the value STI pushed back)
        code.push(0x18); // DROP (the leftover address copy from LDA)
        code.push(0x20); // LD GLOBAL(0)
        code.extend_from_slice(&0i32.to_le_bytes());
        code.push(0x71); // Lwrite
        code.push(0xF0); // STOP
        assert_eq!(run(1, &code), vec![9]);
    }

    #[test]
    fn lda_sti_writes_through_the_addressed_local() {
        // BEGIN 0,1 ; LDA LOCAL(0) ; CONST 9 ; STI ; DROP ; DROP ;
        // LD LOCAL(0) ; Lwrite ; END
        let mut code = Vec::new();
        code.push(0x52); // BEGIN 0,1 (outermost)
        code.extend_from_slice(&0u32.to_le_bytes());
        code.extend_from_slice(&1u32.to_le_bytes());

        code.push(0x31); // LDA LOCAL(0)
        code.extend_from_slice(&0i32.to_le_bytes());
        code.extend_from_slice(&[0x10, 0x09, 0x00, 0x00, 0x00]); // CONST 9
        code.push(0x13); // STI
        code.push(0x18); // DROP (the value STI pushed back)
        code.push(0x18); // DROP (the leftover address copy from LDA)
        code.push(0x21); // LD LOCAL(0)
        code.extend_from_slice(&0i32.to_le_bytes());
        code.push(0x71); // Lwrite
        code.push(0x16); // END

        assert_eq!(run(0, &code), vec![9]);
    }

    #[test]
    fn lda_sti_writes_through_the_addressed_arg() {
        // top level: BEGIN 0,0 ; CONST 9 ; CALL callee,1 ; Lwrite ; END
        // callee: BEGIN 1,0 ; LDA ARG(0) ; CONST 42 ; STI ; DROP ; DROP ;
        //         LD ARG(0) ; RET
        let mut code = Vec::new();
        code.push(0x52); // BEGIN 0,0 (outermost)
        code.extend_from_slice(&0u32.to_le_bytes());
        code.extend_from_slice(&0u32.to_le_bytes());
        code.extend_from_slice(&[0x10, 0x09, 0x00, 0x00, 0x00]); // CONST 9
        code.push(0x56); // CALL
        let entry_patch_at = code.len();
        code.extend_from_slice(&0u32.to_le_bytes()); // entry, patched below
        code.extend_from_slice(&1u32.to_le_bytes()); // nargs=1
        code.push(0x71); // Lwrite
        code.push(0x16); // END

        let callee_off = code.len() as u32;
        code[entry_patch_at..entry_patch_at + 4].copy_from_slice(&callee_off.to_le_bytes());

        code.push(0x52); // BEGIN 1,0
        code.extend_from_slice(&1u32.to_le_bytes());
        code.extend_from_slice(&0u32.to_le_bytes());
        code.push(0x32); // LDA ARG(0)
        code.extend_from_slice(&0i32.to_le_bytes());
        code.extend_from_slice(&[0x10, 0x2A, 0x00, 0x00, 0x00]); // CONST 42
        code.push(0x13); // STI
        code.push(0x18); // DROP (the value STI pushed back)
        code.push(0x18); // DROP (the leftover address copy from LDA)
        code.push(0x22); // LD ARG(0)
        code.extend_from_slice(&0i32.to_le_bytes());
        code.push(0x17); // RET

        assert_eq!(run(0, &code), vec![42]);
    }

    #[test]
    fn closure_capture_is_snapshotted_and_reachable_via_access() {
        // top level: BEGIN 0,0 ; CONST 5 ; ST GLOBAL(0) ; DROP ;
        //            CLOSURE callee,[(GLOBAL,0)] ; CALLC 0 ; Lwrite ; END
        // callee: CBEGIN 0,0 ; LD ACCESS(0) ; RET
        //
        // As with `call_and_return_threads_the_argument_back`, the call
        // happens from inside the program's own outermost frame so the
        // callee's `CBEGIN` is a nested call, not another outermost frame.
        let mut code = Vec::new();
        code.push(0x52); // BEGIN 0,0 (outermost)
        code.extend_from_slice(&0u32.to_le_bytes());
        code.extend_from_slice(&0u32.to_le_bytes());

        code.extend_from_slice(&[0x10, 0x05, 0x00, 0x00, 0x00]); // CONST 5
        code.push(0x40); // ST GLOBAL(0)
        code.extend_from_slice(&0i32.to_le_bytes());
        code.push(0x18); // DROP

        let closure_instr_start = code.len();
        code.push(0x54); // CLOSURE
        let entry_patch_at = code.len();
        code.extend_from_slice(&0u32.to_le_bytes()); // entry, patched below
        code.extend_from_slice(&1u32.to_le_bytes()); // n=1 capture
        code.push(0x00); // designation GLOBAL
        code.extend_from_slice(&0i32.to_le_bytes()); // index 0
        assert_eq!(code.len() - closure_instr_start, 14);

        code.push(0x55); // CALLC
        code.extend_from_slice(&0u32.to_le_bytes()); // nargs=0
        code.push(0x71); // Lwrite
        code.push(0x16); // END

        let entry = code.len() as u32;
        code[entry_patch_at..entry_patch_at + 4].copy_from_slice(&entry.to_le_bytes());

        code.push(0x53); // CBEGIN 0,0
        code.extend_from_slice(&0u32.to_le_bytes());
        code.extend_from_slice(&0u32.to_le_bytes());
        code.push(0x23); // LD ACCESS(0)
        code.extend_from_slice(&0i32.to_le_bytes());
        code.push(0x17); // RET

        assert_eq!(run(1, &code), vec![5]);
    }

    #[test]
    fn sexp_construction_is_recognized_by_tag_pattern() {
        let mut code = Vec::new();
        code.extend_from_slice(&[0x10, 0x01, 0x00, 0x00, 0x00]); // CONST 1
        code.extend_from_slice(&[0x10, 0x02, 0x00, 0x00, 0x00]); // CONST 2
        code.push(0x12); // SEXP "Pair", 2
        code.extend_from_slice(&0u32.to_le_bytes()); // name_offset=0
        code.extend_from_slice(&2u32.to_le_bytes());
        code.push(0x57); // TAG "Pair", 2
        code.extend_from_slice(&0u32.to_le_bytes());
        code.extend_from_slice(&2u32.to_le_bytes());
        code.push(0x71); // Lwrite
        code.extend_from_slice(&[0x10, 0x00, 0x00, 0x00, 0x00]); // CONST 0
        code.push(0xF0); // STOP

        let img = build_image_with_strings(0, b"Pair\0", &code);
        let rt = crate::mock_runtime::MockRuntime::new();
        let mut interp = Interpreter::new(&img, &rt, "test.lama");
        interp.run().unwrap();
        assert_eq!(rt.output(), vec![1]);
    }

    #[test]
    fn barray_is_recognized_by_array_size_pattern() {
        let code = [
            0x10, 0x01, 0x00, 0x00, 0x00, // CONST 1
            0x10, 0x02, 0x00, 0x00, 0x00, // CONST 2
            0x10, 0x03, 0x00, 0x00, 0x00, // CONST 3
            0x74, 0x03, 0x00, 0x00, 0x00, // Barray 3
            0x58, 0x03, 0x00, 0x00, 0x00, // ARRAY 3 (pattern)
            0x71, // Lwrite
            0x10, 0x00, 0x00, 0x00, 0x00, // CONST 0
            0xF0, // STOP
        ];
        assert_eq!(run(0, &code), vec![1]);
    }

    #[test]
    fn roots_reports_globals_and_stack_when_idle() {
        let img = build_image(2, &[0xF0]);
        let rt = crate::mock_runtime::MockRuntime::new();
        let mut interp = Interpreter::new(&img, &rt, "test.lama");
        interp.run().unwrap();
        let roots = interp.roots();
        assert_eq!(roots.globals.len(), 2);
        assert!(roots.stack.is_empty());
        assert!(roots.captures().is_empty());
    }

    #[test]
    fn roots_reaches_values_only_held_by_an_active_closure_capture() {
        // top level: BEGIN 0,0 ; CONST 5 ; ST GLOBAL(0) ; DROP ;
        //            CLOSURE callee,[(GLOBAL,0)] ; CALLC 0
        // callee: CBEGIN 0,0 ; STOP
        //
        // STOP terminates the run without unwinding any frame, so the
        // callee's CBEGIN frame stays on `self.frames`; its captured value
        // is reachable only through `roots().captures()`, not through the
        // (by-then empty) stack.
        let mut code = Vec::new();
        code.push(0x52); // BEGIN 0,0 (outermost)
        code.extend_from_slice(&0u32.to_le_bytes());
        code.extend_from_slice(&0u32.to_le_bytes());

        code.extend_from_slice(&[0x10, 0x05, 0x00, 0x00, 0x00]); // CONST 5
        code.push(0x40); // ST GLOBAL(0)
        code.extend_from_slice(&0i32.to_le_bytes());
        code.push(0x18); // DROP

        code.push(0x54); // CLOSURE
        let entry_patch_at = code.len();
        code.extend_from_slice(&0u32.to_le_bytes()); // entry, patched below
        code.extend_from_slice(&1u32.to_le_bytes()); // n=1 capture
        code.push(0x00); // designation GLOBAL
        code.extend_from_slice(&0i32.to_le_bytes()); // index 0

        code.push(0x55); // CALLC
        code.extend_from_slice(&0u32.to_le_bytes()); // nargs=0

        let entry = code.len() as u32;
        code[entry_patch_at..entry_patch_at + 4].copy_from_slice(&entry.to_le_bytes());

        code.push(0x53); // CBEGIN 0,0
        code.extend_from_slice(&0u32.to_le_bytes());
        code.extend_from_slice(&0u32.to_le_bytes());
        code.push(0xF0); // STOP

        let img = build_image(1, &code);
        let rt = crate::mock_runtime::MockRuntime::new();
        let mut interp = Interpreter::new(&img, &rt, "test.lama");
        interp.run().unwrap();

        let roots = interp.roots();
        assert_eq!(roots.captures(), &[Value::Int(5)]);
        assert!(roots.iter().any(|v| v == Value::Int(5)));
    }

    #[test]
    fn fail_invokes_runtime_match_failure() {
        let code = [
            0x10, 0x00, 0x00, 0x00, 0x00, // CONST 0
            0x59, 0x03, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00, // FAIL line=3 col=5
            0xF0,
        ];
        let img = build_image(0, &code);
        let rt = crate::mock_runtime::MockRuntime::new();
        let mut interp = Interpreter::new(&img, &rt, "test.lama");
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| interp.run()));
        let panic_payload = result.unwrap_err();
        let message = panic_payload
            .downcast_ref::<String>()
            .cloned()
            .unwrap_or_default();
        assert!(message.contains("test.lama"));
        assert!(message.contains("3:5"));
    }
}
