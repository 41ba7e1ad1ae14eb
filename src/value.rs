//! Tagged value representation shared by the stack, globals, locals, args
//! and closure captures.

/// A designation selects which storage space an index addresses, for the
/// `LD`/`LDA`/`ST` family and for `ACCESS`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Designation {
    Global,
    Local,
    Arg,
    Access,
}

impl Designation {
    pub fn from_byte(b: u8) -> Option<Designation> {
        match b {
            0 => Some(Designation::Global),
            1 => Some(Designation::Local),
            2 => Some(Designation::Arg),
            3 => Some(Designation::Access),
            _ => None,
        }
    }
}

/// A first-class value: either an unboxed integer or an opaque handle into
/// runtime-owned heap storage (strings, arrays, S-expressions, closures).
///
/// `Address` is an interpreter-internal third kind produced by `LDA` and
/// consumed by `STI`/`STA`; it is never passed across the runtime boundary
/// and never observed by bytecode as an ordinary value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    Boxed(u32),
    Address { space: Designation, index: usize },
}

impl Value {
    /// The integer payload of an `Int` value, used by arithmetic, jump
    /// conditions and pattern predicates that treat the result as a bool.
    pub fn as_int(self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_boxed(self) -> Option<u32> {
        match self {
            Value::Boxed(h) => Some(h),
            _ => None,
        }
    }

    pub fn truthy(self) -> bool {
        matches!(self, Value::Int(i) if i != 0)
    }

    pub fn from_bool(b: bool) -> Value {
        Value::Int(if b { 1 } else { 0 })
    }
}
