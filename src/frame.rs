use std::rc::Rc;

use crate::value::Value;

/// An activation record, kept as an explicit descriptor rather than laid
/// out inside the operand stack via raw pointer arithmetic (see the
/// interpreter's design notes on activation frames).
#[derive(Debug)]
pub struct Frame {
    /// Index into the operand stack where this frame's arguments begin.
    pub args_base: usize,
    /// Index into the operand stack where this frame's locals begin.
    pub locals_base: usize,
    /// Code offset to resume at in the caller, restored on return.
    pub saved_ip: usize,
    /// Capture vector bound by `CBEGIN`; absent for plain `BEGIN` frames.
    pub captures: Option<Rc<[Value]>>,
    /// True only for the first frame opened in a run; its `RET`/`END`
    /// terminates the interpreter instead of resuming a caller.
    pub outermost: bool,
}
