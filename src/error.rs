use thiserror::Error;

#[derive(Error, Debug)]
pub enum DisasmError {
    #[error("i/o error writing disassembly: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unknown opcode {high:x}:{low:x} at ip={ip:#x}")]
    UnknownOpcode { ip: usize, high: u8, low: u8 },

    #[error("unknown designation byte {byte:#x} at ip={ip:#x}")]
    UnknownDesignation { ip: usize, byte: u8 },

    #[error("instruction stream truncated at ip={ip:#x}")]
    Truncated { ip: usize },
}

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("division or modulus by zero at ip={ip:#x}")]
    DivByZero { ip: usize },

    #[error("operand stack underflow at ip={ip:#x}")]
    StackUnderflow { ip: usize },

    #[error("jump target {target:#x} out of range at ip={ip:#x}")]
    BadJump { ip: usize, target: usize },

    #[error("return from outermost frame with frames still pending at ip={ip:#x}")]
    OutermostUnderflow { ip: usize },

    #[error("access designation {0:?} invalid outside a closure frame")]
    NoCaptures(crate::value::Designation),

    #[error("cannot write through a captured-cell address at ip={ip:#x}")]
    ImmutableCapture { ip: usize },

    #[error("expected an unboxed integer operand at ip={ip:#x}")]
    ExpectedInt { ip: usize },

    #[error("STI requires an address produced by a preceding LDA, at ip={ip:#x}")]
    ExpectedAddress { ip: usize },

    #[error("bad string offset referenced at ip={ip:#x}: {source}")]
    BadString {
        ip: usize,
        #[source]
        source: image::LoadError,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),
}
