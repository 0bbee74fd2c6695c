//! Amex: a small Lisp with closures, macros, and a tracing garbage
//! collector. The four stages (reader, compiler, VM, collector) are
//! exposed as separate modules so a host binary can drive them
//! independently — e.g. compiling once and calling `Vm::interpret`
//! repeatedly against warm globals.

pub mod collections;
pub mod common;
pub mod compiler;
pub mod core;
pub mod error;
pub mod vm;

pub use common::gc::{Gc, GcConfig};
pub use common::value::Value;
pub use compiler::compiler::compile;
pub use compiler::parser::{Datum, Parser};
pub use error::{AmexError, AmexExitCode, CompileError, ParseError, RuntimeError};
pub use vm::vm::{Vm, VmConfig};

/// Compiles and runs `source` in one shot, installing the primitive
/// operators into `vm.gc.globals` first if they aren't there yet.
pub fn interpret(source: &str, vm: &mut Vm) -> Result<Value, AmexError> {
    core::install(&mut vm.gc);
    let function = compile(source, &mut vm.gc)?;
    Ok(vm.interpret(function)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_a_small_program() {
        let mut vm = Vm::new();
        let result = interpret("(do (def square (fn [x] (* x x))) (square 7))", &mut vm).unwrap();
        assert_eq!(result, Value::Number(49.0));
    }
}
