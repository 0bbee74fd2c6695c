//! Heap object payloads. Grounded on `amex.h`'s `ObjType` enum and its
//! per-kind struct family (`ObjString`, `ObjArray`, `ObjTable`,
//! `ObjFunction`, `ObjClosure`, `ObjUpvalue`, `ObjNative`).

use crate::common::chunk::Chunk;
use crate::common::heap::Handle;
use crate::common::value::Value;
pub use crate::collections::array::ArrayObj;
use crate::collections::table::Table;
use crate::error::RuntimeError;
use crate::vm::vm::Vm;

pub struct AmexString {
    pub bytes: String,
    pub hash: u32,
}

impl AmexString {
    pub fn new(bytes: String) -> Self {
        let hash = fnv1a(bytes.as_bytes());
        AmexString { bytes, hash }
    }
}

/// FNV-1a, 32-bit, matching `object.c`'s `hash_string`.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

#[derive(Clone)]
pub struct Function {
    /// Required-parameter count.
    pub min_arity: u8,
    /// Total declared parameter count, or -1 if the function is variadic
    /// (has an `&rest` parameter).
    pub arity: i32,
    pub upvalue_count: u8,
    pub chunk: Chunk,
    pub name: Option<String>,
}

#[derive(Clone, Copy, Debug)]
pub struct UpvalueDesc {
    pub is_local: bool,
    pub index: u8,
}

pub struct Closure {
    pub function: Handle,
    pub upvalues: Vec<Handle>,
}

pub enum Upvalue {
    Open(usize),
    Closed(Value),
}

pub type NativeFnPtr = fn(&mut Vm, &[Value]) -> Result<Value, RuntimeError>;

pub struct NativeFn {
    pub name: &'static str,
    pub arity: i32,
    pub func: NativeFnPtr,
}

pub enum Object {
    Str(AmexString),
    Array(ArrayObj),
    Tuple(ArrayObj),
    Table(Table),
    Function(Function),
    Closure(Closure),
    Upvalue(Upvalue),
    Native(NativeFn),
}

impl Object {
    pub fn approx_size(&self) -> usize {
        match self {
            Object::Str(s) => s.bytes.len() + 16,
            Object::Array(a) | Object::Tuple(a) => a.items.len() * 16 + 24,
            Object::Table(t) => t.capacity() * 32 + 24,
            Object::Function(f) => f.chunk.code.len() + f.chunk.constants.len() * 16 + 48,
            Object::Closure(c) => c.upvalues.len() * 8 + 16,
            Object::Upvalue(_) => 16,
            Object::Native(_) => 16,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Object::Str(s) => &s.bytes,
            _ => panic!("object is not a string"),
        }
    }

    pub fn as_array(&self) -> &[Value] {
        match self {
            Object::Array(a) | Object::Tuple(a) => &a.items,
            _ => panic!("object is not an array or tuple"),
        }
    }

    pub fn as_array_mut(&mut self) -> &mut Vec<Value> {
        match self {
            Object::Array(a) | Object::Tuple(a) => &mut a.items,
            _ => panic!("object is not an array or tuple"),
        }
    }

    pub fn as_function(&self) -> &Function {
        match self {
            Object::Function(f) => f,
            _ => panic!("object is not a function"),
        }
    }

    pub fn as_closure(&self) -> &Closure {
        match self {
            Object::Closure(c) => c,
            _ => panic!("object is not a closure"),
        }
    }

    pub fn as_closure_mut(&mut self) -> &mut Closure {
        match self {
            Object::Closure(c) => c,
            _ => panic!("object is not a closure"),
        }
    }

    pub fn as_table(&self) -> &Table {
        match self {
            Object::Table(t) => t,
            _ => panic!("object is not a table"),
        }
    }

    pub fn as_table_mut(&mut self) -> &mut Table {
        match self {
            Object::Table(t) => t,
            _ => panic!("object is not a table"),
        }
    }

    pub fn as_upvalue(&self) -> &Upvalue {
        match self {
            Object::Upvalue(u) => u,
            _ => panic!("object is not an upvalue"),
        }
    }

    pub fn as_upvalue_mut(&mut self) -> &mut Upvalue {
        match self {
            Object::Upvalue(u) => u,
            _ => panic!("object is not an upvalue"),
        }
    }

    pub fn as_native(&self) -> &NativeFn {
        match self {
            Object::Native(n) => n,
            _ => panic!("object is not a native function"),
        }
    }

    /// Every `Value` reachable directly from this object, for the GC's
    /// `blacken` step (spec.md §4.4).
    pub fn trace(&self) -> Vec<Value> {
        match self {
            Object::Str(_) | Object::Native(_) => Vec::new(),
            Object::Array(a) | Object::Tuple(a) => a.items.clone(),
            Object::Table(t) => t.trace_values(),
            Object::Function(f) => f.chunk.constants.clone(),
            Object::Closure(c) => vec![Value::Function(c.function)],
            Object::Upvalue(Upvalue::Closed(v)) => vec![*v],
            Object::Upvalue(Upvalue::Open(_)) => Vec::new(),
        }
    }

    /// Handles reachable from this object that aren't wrapped in a
    /// `Value` (closures point at `Upvalue` objects directly, which have
    /// no surface-level `Value` variant of their own).
    pub fn trace_handles(&self) -> Vec<Handle> {
        match self {
            Object::Closure(c) => c.upvalues.clone(),
            _ => Vec::new(),
        }
    }
}
