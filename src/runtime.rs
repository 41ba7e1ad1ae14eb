//! Facade over the external runtime library: heap object construction,
//! element access, pattern predicates and the handful of I/O primitives.
//! The core never touches raw words from the runtime directly; every
//! crossing happens through a function in this module.

use crate::value::Value;
use std::ffi::CString;
use std::os::raw::{c_char, c_int};
use std::sync::Once;

#[allow(non_camel_case_types)]
type word = i32;

extern "C" {
    fn gc_init();

    fn make_string(s: *const c_char) -> word;
    fn make_sexp(tag_hash: c_int, n: c_int, fields: *const word) -> word;
    fn make_array(n: c_int, fields: *const word) -> word;
    fn make_closure(entry: c_int, n: c_int, captures: *const word) -> word;

    fn elem(container: word, index: word) -> word;
    fn store(container: word, index: word, value: word) -> word;

    fn Lread() -> word;
    fn Lwrite(value: word) -> word;
    fn Llength(value: word) -> word;
    fn Lstring(value: word) -> word;

    fn tag_hash(s: *const c_char) -> c_int;

    fn is_string(v: word) -> word;
    fn is_array(v: word) -> word;
    fn is_sexp(v: word) -> word;
    fn is_ref(v: word) -> word;
    fn is_val(v: word) -> word;
    fn is_fun(v: word) -> word;
    fn is_array_of_size(v: word, n: c_int) -> word;
    fn string_eq_pattern(pattern: word, v: word) -> word;
    fn is_sexp_with(v: word, tag_hash: c_int, n: c_int) -> word;

    fn match_failure(v: word, source_name: *const c_char, line: c_int, col: c_int) -> !;
}

fn to_word(v: Value) -> word {
    match v {
        Value::Int(i) => (i << 1) | 1,
        Value::Boxed(h) => (h as i32) << 1,
        Value::Address { .. } => unreachable!("addresses never cross the runtime boundary"),
    }
}

fn from_word(w: word) -> Value {
    if w & 1 == 1 {
        Value::Int(w >> 1)
    } else {
        Value::Boxed((w as u32) >> 1)
    }
}

static GC_INIT: Once = Once::new();

/// Ensures `gc_init` has run exactly once before any runtime call, per the
/// resource model's one-shot initialization requirement.
fn ensure_init() {
    GC_INIT.call_once(|| unsafe { gc_init() });
}

/// The typed surface the interpreter core drives the external runtime
/// library through. `RuntimeBridge` is the production implementation,
/// bound to the `extern "C"` entry points of §6; `mock_runtime` provides an
/// in-process implementation used by this workspace's own tests, since the
/// real library is an external collaborator this crate does not build.
pub trait Runtime {
    fn make_string(&self, s: &str) -> Value;
    fn make_sexp(&self, tag: &str, fields: &[Value]) -> Value;
    fn make_array(&self, fields: &[Value]) -> Value;
    fn make_closure(&self, entry: u32, captures: &[Value]) -> Value;

    fn elem(&self, container: Value, index: Value) -> Value;
    fn store(&self, container: Value, index: Value, value: Value) -> Value;

    fn read(&self) -> Value;
    fn write(&self, value: Value) -> Value;
    fn length(&self, value: Value) -> Value;
    fn to_string(&self, value: Value) -> Value;

    fn tag_hash(&self, tag: &str) -> i32;

    fn is_string(&self, v: Value) -> Value;
    fn is_array(&self, v: Value) -> Value;
    fn is_sexp(&self, v: Value) -> Value;
    fn is_ref(&self, v: Value) -> Value;
    fn is_val(&self, v: Value) -> Value;
    fn is_fun(&self, v: Value) -> Value;
    fn is_array_of_size(&self, v: Value, n: u32) -> Value;
    fn string_eq_pattern(&self, pattern: Value, v: Value) -> Value;
    fn is_sexp_with(&self, v: Value, tag: &str, n: u32) -> Value;

    fn match_failure(&self, v: Value, source_name: &str, line: u32, col: u32) -> !;
}

/// Lets the interpreter be generic over `R: Runtime` while tests and
/// callers hold onto their runtime and pass it by shared reference.
impl<T: Runtime + ?Sized> Runtime for &T {
    fn make_string(&self, s: &str) -> Value {
        (**self).make_string(s)
    }
    fn make_sexp(&self, tag: &str, fields: &[Value]) -> Value {
        (**self).make_sexp(tag, fields)
    }
    fn make_array(&self, fields: &[Value]) -> Value {
        (**self).make_array(fields)
    }
    fn make_closure(&self, entry: u32, captures: &[Value]) -> Value {
        (**self).make_closure(entry, captures)
    }
    fn elem(&self, container: Value, index: Value) -> Value {
        (**self).elem(container, index)
    }
    fn store(&self, container: Value, index: Value, value: Value) -> Value {
        (**self).store(container, index, value)
    }
    fn read(&self) -> Value {
        (**self).read()
    }
    fn write(&self, value: Value) -> Value {
        (**self).write(value)
    }
    fn length(&self, value: Value) -> Value {
        (**self).length(value)
    }
    fn to_string(&self, value: Value) -> Value {
        (**self).to_string(value)
    }
    fn tag_hash(&self, tag: &str) -> i32 {
        (**self).tag_hash(tag)
    }
    fn is_string(&self, v: Value) -> Value {
        (**self).is_string(v)
    }
    fn is_array(&self, v: Value) -> Value {
        (**self).is_array(v)
    }
    fn is_sexp(&self, v: Value) -> Value {
        (**self).is_sexp(v)
    }
    fn is_ref(&self, v: Value) -> Value {
        (**self).is_ref(v)
    }
    fn is_val(&self, v: Value) -> Value {
        (**self).is_val(v)
    }
    fn is_fun(&self, v: Value) -> Value {
        (**self).is_fun(v)
    }
    fn is_array_of_size(&self, v: Value, n: u32) -> Value {
        (**self).is_array_of_size(v, n)
    }
    fn string_eq_pattern(&self, pattern: Value, v: Value) -> Value {
        (**self).string_eq_pattern(pattern, v)
    }
    fn is_sexp_with(&self, v: Value, tag: &str, n: u32) -> Value {
        (**self).is_sexp_with(v, tag, n)
    }
    fn match_failure(&self, v: Value, source_name: &str, line: u32, col: u32) -> ! {
        (**self).match_failure(v, source_name, line, col)
    }
}

pub struct RuntimeBridge;

impl RuntimeBridge {
    pub fn new() -> RuntimeBridge {
        ensure_init();
        RuntimeBridge
    }

    pub fn make_string(&self, s: &str) -> Value {
        let c = CString::new(s).expect("string table entries never contain NUL");
        from_word(unsafe { make_string(c.as_ptr()) })
    }

    pub fn make_sexp(&self, tag: &str, fields: &[Value]) -> Value {
        let hash = self.tag_hash(tag);
        let words: Vec<word> = fields.iter().copied().map(to_word).collect();
        from_word(unsafe { make_sexp(hash, words.len() as c_int, words.as_ptr()) })
    }

    pub fn make_array(&self, fields: &[Value]) -> Value {
        let words: Vec<word> = fields.iter().copied().map(to_word).collect();
        from_word(unsafe { make_array(words.len() as c_int, words.as_ptr()) })
    }

    pub fn make_closure(&self, entry: u32, captures: &[Value]) -> Value {
        let words: Vec<word> = captures.iter().copied().map(to_word).collect();
        from_word(unsafe { make_closure(entry as c_int, words.len() as c_int, words.as_ptr()) })
    }

    pub fn elem(&self, container: Value, index: Value) -> Value {
        from_word(unsafe { elem(to_word(container), to_word(index)) })
    }

    pub fn store(&self, container: Value, index: Value, value: Value) -> Value {
        from_word(unsafe { store(to_word(container), to_word(index), to_word(value)) })
    }

    pub fn read(&self) -> Value {
        from_word(unsafe { Lread() })
    }

    pub fn write(&self, value: Value) -> Value {
        from_word(unsafe { Lwrite(to_word(value)) })
    }

    pub fn length(&self, value: Value) -> Value {
        from_word(unsafe { Llength(to_word(value)) })
    }

    pub fn to_string(&self, value: Value) -> Value {
        from_word(unsafe { Lstring(to_word(value)) })
    }

    pub fn tag_hash(&self, tag: &str) -> c_int {
        let c = CString::new(tag).expect("tag names never contain NUL");
        unsafe { tag_hash(c.as_ptr()) }
    }

    pub fn is_string(&self, v: Value) -> Value {
        from_word(unsafe { is_string(to_word(v)) })
    }

    pub fn is_array(&self, v: Value) -> Value {
        from_word(unsafe { is_array(to_word(v)) })
    }

    pub fn is_sexp(&self, v: Value) -> Value {
        from_word(unsafe { is_sexp(to_word(v)) })
    }

    pub fn is_ref(&self, v: Value) -> Value {
        from_word(unsafe { is_ref(to_word(v)) })
    }

    pub fn is_val(&self, v: Value) -> Value {
        from_word(unsafe { is_val(to_word(v)) })
    }

    pub fn is_fun(&self, v: Value) -> Value {
        from_word(unsafe { is_fun(to_word(v)) })
    }

    pub fn is_array_of_size(&self, v: Value, n: u32) -> Value {
        from_word(unsafe { is_array_of_size(to_word(v), n as c_int) })
    }

    pub fn string_eq_pattern(&self, pattern: Value, v: Value) -> Value {
        from_word(unsafe { string_eq_pattern(to_word(pattern), to_word(v)) })
    }

    pub fn is_sexp_with(&self, v: Value, tag: &str, n: u32) -> Value {
        let hash = self.tag_hash(tag);
        from_word(unsafe { is_sexp_with(to_word(v), hash, n as c_int) })
    }

    /// Reports a failed pattern match. Diverges: the external runtime
    /// prints a diagnostic and terminates the process.
    pub fn match_failure(&self, v: Value, source_name: &str, line: u32, col: u32) -> ! {
        let c = CString::new(source_name).expect("source file name never contains NUL");
        unsafe { match_failure(to_word(v), c.as_ptr(), line as c_int, col as c_int) }
    }
}

impl Default for RuntimeBridge {
    fn default() -> Self {
        RuntimeBridge::new()
    }
}

impl Runtime for RuntimeBridge {
    fn make_string(&self, s: &str) -> Value {
        RuntimeBridge::make_string(self, s)
    }
    fn make_sexp(&self, tag: &str, fields: &[Value]) -> Value {
        RuntimeBridge::make_sexp(self, tag, fields)
    }
    fn make_array(&self, fields: &[Value]) -> Value {
        RuntimeBridge::make_array(self, fields)
    }
    fn make_closure(&self, entry: u32, captures: &[Value]) -> Value {
        RuntimeBridge::make_closure(self, entry, captures)
    }
    fn elem(&self, container: Value, index: Value) -> Value {
        RuntimeBridge::elem(self, container, index)
    }
    fn store(&self, container: Value, index: Value, value: Value) -> Value {
        RuntimeBridge::store(self, container, index, value)
    }
    fn read(&self) -> Value {
        RuntimeBridge::read(self)
    }
    fn write(&self, value: Value) -> Value {
        RuntimeBridge::write(self, value)
    }
    fn length(&self, value: Value) -> Value {
        RuntimeBridge::length(self, value)
    }
    fn to_string(&self, value: Value) -> Value {
        RuntimeBridge::to_string(self, value)
    }
    fn tag_hash(&self, tag: &str) -> i32 {
        RuntimeBridge::tag_hash(self, tag)
    }
    fn is_string(&self, v: Value) -> Value {
        RuntimeBridge::is_string(self, v)
    }
    fn is_array(&self, v: Value) -> Value {
        RuntimeBridge::is_array(self, v)
    }
    fn is_sexp(&self, v: Value) -> Value {
        RuntimeBridge::is_sexp(self, v)
    }
    fn is_ref(&self, v: Value) -> Value {
        RuntimeBridge::is_ref(self, v)
    }
    fn is_val(&self, v: Value) -> Value {
        RuntimeBridge::is_val(self, v)
    }
    fn is_fun(&self, v: Value) -> Value {
        RuntimeBridge::is_fun(self, v)
    }
    fn is_array_of_size(&self, v: Value, n: u32) -> Value {
        RuntimeBridge::is_array_of_size(self, v, n)
    }
    fn string_eq_pattern(&self, pattern: Value, v: Value) -> Value {
        RuntimeBridge::string_eq_pattern(self, pattern, v)
    }
    fn is_sexp_with(&self, v: Value, tag: &str, n: u32) -> Value {
        RuntimeBridge::is_sexp_with(self, v, tag, n)
    }
    fn match_failure(&self, v: Value, source_name: &str, line: u32, col: u32) -> ! {
        RuntimeBridge::match_failure(self, v, source_name, line, col)
    }
}
