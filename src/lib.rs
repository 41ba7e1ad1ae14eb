//! `byterun-vm`: the stack-machine interpreter core for a compact bytecode
//! format produced by a separate compiler. This crate owns the value
//! tagging convention, the instruction decoder, the disassembler, the
//! runtime bridge and the interpreter dispatch loop. It knows nothing about
//! command-line parsing or file I/O beyond the `image` crate's loader.

pub mod decoder;
pub mod disasm;
pub mod error;
pub mod frame;
pub mod interpreter;
pub mod mock_runtime;
pub mod runtime;
pub mod value;

pub use disasm::disassemble;
pub use error::{DecodeError, DisasmError, RuntimeError};
pub use interpreter::{Interpreter, RootSet};
pub use runtime::{Runtime, RuntimeBridge};
pub use value::{Designation, Value};
