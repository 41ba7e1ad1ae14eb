//! An in-process stand-in for the external runtime library.
//!
//! The real runtime (string/array/S-expression construction, pattern
//! predicates, the conservative GC) lives outside this workspace and is
//! linked in as a set of `extern "C"` symbols by [`crate::runtime::RuntimeBridge`].
//! This module reimplements just enough of its observable behavior, as a
//! plain Rust [`Runtime`] impl, to exercise the interpreter core in tests
//! without that external library.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use crate::runtime::Runtime;
use crate::value::Value;

#[derive(Clone, Debug, PartialEq)]
enum Heap {
    String(String),
    Array(Vec<Value>),
    Sexp { tag: String, fields: Vec<Value> },
    Closure { entry: u32, captures: Vec<Value> },
}

/// A minimal heap plus stdio capture, addressable the same way the real
/// runtime's boxed handles are: a `Value::Boxed` index into this table.
pub struct MockRuntime {
    heap: RefCell<Vec<Heap>>,
    input: RefCell<VecDeque<i32>>,
    output: RefCell<Vec<i32>>,
    tags: RefCell<HashMap<String, i32>>,
}

impl MockRuntime {
    pub fn new() -> MockRuntime {
        MockRuntime {
            heap: RefCell::new(Vec::new()),
            input: RefCell::new(VecDeque::new()),
            output: RefCell::new(Vec::new()),
            tags: RefCell::new(HashMap::new()),
        }
    }

    /// Queues values that `Lread` will hand out, oldest first.
    pub fn feed_input(&self, values: impl IntoIterator<Item = i32>) {
        self.input.borrow_mut().extend(values);
    }

    /// Everything written so far via `Lwrite`, in call order.
    pub fn output(&self) -> Vec<i32> {
        self.output.borrow().clone()
    }

    fn alloc(&self, obj: Heap) -> Value {
        let mut heap = self.heap.borrow_mut();
        let handle = heap.len() as u32;
        heap.push(obj);
        Value::Boxed(handle)
    }

    fn get(&self, v: Value) -> Heap {
        match v {
            Value::Boxed(h) => self.heap.borrow()[h as usize].clone(),
            Value::Int(_) => panic!("mock runtime: expected a boxed handle, got an unboxed int"),
            Value::Address { .. } => panic!("mock runtime: addresses never cross the runtime boundary"),
        }
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        MockRuntime::new()
    }
}

impl Runtime for MockRuntime {
    fn make_string(&self, s: &str) -> Value {
        self.alloc(Heap::String(s.to_owned()))
    }

    fn make_sexp(&self, tag: &str, fields: &[Value]) -> Value {
        self.alloc(Heap::Sexp {
            tag: tag.to_owned(),
            fields: fields.to_vec(),
        })
    }

    fn make_array(&self, fields: &[Value]) -> Value {
        self.alloc(Heap::Array(fields.to_vec()))
    }

    fn make_closure(&self, entry: u32, captures: &[Value]) -> Value {
        self.alloc(Heap::Closure {
            entry,
            captures: captures.to_vec(),
        })
    }

    fn elem(&self, container: Value, index: Value) -> Value {
        let i = index.as_int().expect("elem index is an unboxed int") as usize;
        match self.get(container) {
            Heap::Array(fields) | Heap::Sexp { fields, .. } => fields[i],
            Heap::String(s) => Value::Int(s.as_bytes()[i] as i32),
            Heap::Closure { .. } => panic!("mock runtime: elem on a closure"),
        }
    }

    fn store(&self, container: Value, index: Value, value: Value) -> Value {
        let i = index.as_int().expect("store index is an unboxed int") as usize;
        match container {
            Value::Boxed(h) => {
                let mut heap = self.heap.borrow_mut();
                match &mut heap[h as usize] {
                    Heap::Array(fields) | Heap::Sexp { fields, .. } => fields[i] = value,
                    _ => panic!("mock runtime: store into a non-container"),
                }
            }
            _ => panic!("mock runtime: store into a non-boxed value"),
        }
        value
    }

    fn read(&self) -> Value {
        let v = self
            .input
            .borrow_mut()
            .pop_front()
            .expect("mock runtime: Lread at end of queued input");
        Value::Int(v)
    }

    fn write(&self, value: Value) -> Value {
        let i = value.as_int().expect("Lwrite takes an unboxed int");
        self.output.borrow_mut().push(i);
        Value::Int(0)
    }

    fn length(&self, value: Value) -> Value {
        let n = match self.get(value) {
            Heap::Array(fields) | Heap::Sexp { fields, .. } => fields.len(),
            Heap::String(s) => s.len(),
            Heap::Closure { captures, .. } => captures.len(),
        };
        Value::Int(n as i32)
    }

    fn to_string(&self, value: Value) -> Value {
        let s = match self.get(value) {
            Heap::String(s) => s,
            Heap::Array(fields) => format!("{:?}", fields),
            Heap::Sexp { tag, fields } => format!("{} {:?}", tag, fields),
            Heap::Closure { .. } => "<closure>".to_owned(),
        };
        self.make_string(&s)
    }

    fn tag_hash(&self, tag: &str) -> i32 {
        let mut tags = self.tags.borrow_mut();
        let next = tags.len() as i32;
        *tags.entry(tag.to_owned()).or_insert(next)
    }

    fn is_string(&self, v: Value) -> Value {
        Value::from_bool(matches!(self.get(v), Heap::String(_)))
    }

    fn is_array(&self, v: Value) -> Value {
        Value::from_bool(matches!(self.get(v), Heap::Array(_)))
    }

    fn is_sexp(&self, v: Value) -> Value {
        Value::from_bool(matches!(self.get(v), Heap::Sexp { .. }))
    }

    fn is_ref(&self, v: Value) -> Value {
        Value::from_bool(matches!(v, Value::Boxed(_)))
    }

    fn is_val(&self, v: Value) -> Value {
        Value::from_bool(matches!(v, Value::Int(_)))
    }

    fn is_fun(&self, v: Value) -> Value {
        Value::from_bool(matches!(self.get(v), Heap::Closure { .. }))
    }

    fn is_array_of_size(&self, v: Value, n: u32) -> Value {
        Value::from_bool(matches!(self.get(v), Heap::Array(fields) if fields.len() == n as usize))
    }

    fn string_eq_pattern(&self, pattern: Value, v: Value) -> Value {
        let want = match self.get(pattern) {
            Heap::String(s) => s,
            _ => return Value::from_bool(false),
        };
        let got = match self.get(v) {
            Heap::String(s) => s,
            _ => return Value::from_bool(false),
        };
        Value::from_bool(want == got)
    }

    fn is_sexp_with(&self, v: Value, tag: &str, n: u32) -> Value {
        Value::from_bool(matches!(
            self.get(v),
            Heap::Sexp { tag: t, fields } if t == tag && fields.len() == n as usize
        ))
    }

    fn match_failure(&self, v: Value, source_name: &str, line: u32, col: u32) -> ! {
        panic!(
            "match failure in {} at {}:{}: {:?}",
            source_name, line, col, v
        );
    }
}
