//! Global environment wiring: native fallbacks for the primitive
//! operators, so they stay ordinary first-class values (passable to
//! `apply`, stored in a table, etc.) even though calling one of them in
//! head position compiles straight to a dedicated opcode instead of
//! going through this path.

use crate::common::gc::Gc;
use crate::common::object::{NativeFn, NativeFnPtr, Object};
use crate::common::string_intern::intern_symbol;
use crate::common::value::Value;
use crate::error::RuntimeError;
use crate::vm::vm::Vm;

fn as_numbers(args: &[Value]) -> Result<Vec<f64>, RuntimeError> {
    args.iter()
        .map(|v| match v {
            Value::Number(n) => Ok(*n),
            _ => Err(RuntimeError::NotANumber),
        })
        .collect()
}

fn sum(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Number(as_numbers(args)?.iter().sum()))
}

fn subtract(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let nums = as_numbers(args)?;
    Ok(Value::Number(match nums.len() {
        0 => 0.0,
        1 => -nums[0],
        _ => nums[1..].iter().fold(nums[0], |acc, n| acc - n),
    }))
}

fn multiply(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Number(as_numbers(args)?.iter().product()))
}

fn divide(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let nums = as_numbers(args)?;
    match nums.len() {
        0 => Ok(Value::Number(1.0)),
        1 => {
            if nums[0] == 0.0 {
                return Err(RuntimeError::DivisionByZero);
            }
            Ok(Value::Number(1.0 / nums[0]))
        }
        _ => {
            let mut acc = nums[0];
            for n in &nums[1..] {
                if *n == 0.0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                acc /= n;
            }
            Ok(Value::Number(acc))
        }
    }
}

fn chain_numeric(args: &[Value], op: fn(f64, f64) -> bool) -> Result<Value, RuntimeError> {
    let nums = as_numbers(args)?;
    Ok(Value::Bool(nums.windows(2).all(|p| op(p[0], p[1]))))
}

fn greater(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    chain_numeric(args, |a, b| a > b)
}

fn less(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    chain_numeric(args, |a, b| a < b)
}

fn greater_equal(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    chain_numeric(args, |a, b| a >= b)
}

fn less_equal(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    chain_numeric(args, |a, b| a <= b)
}

fn equal(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(args.windows(2).all(|p| p[0].eq(&p[1]))))
}

fn not_equal(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(!args.windows(2).all(|p| p[0].eq(&p[1]))))
}

fn or_native(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(args
        .iter()
        .copied()
        .find(|v| v.is_truthy())
        .or_else(|| args.last().copied())
        .unwrap_or(Value::Nil))
}

fn and_native(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(args
        .iter()
        .copied()
        .find(|v| !v.is_truthy())
        .or_else(|| args.last().copied())
        .unwrap_or(Value::Nil))
}

fn print_native(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    match args.first() {
        Some(v) => {
            println!("{}", v.display(&vm.gc.heap));
            Ok(*v)
        }
        None => {
            println!();
            Ok(Value::Nil)
        }
    }
}

const NATIVES: &[(&str, i32, NativeFnPtr)] = &[
    ("+", -1, sum),
    ("-", -1, subtract),
    ("*", -1, multiply),
    ("/", -1, divide),
    (">", -1, greater),
    ("<", -1, less),
    (">=", -1, greater_equal),
    ("<=", -1, less_equal),
    ("=", -1, equal),
    ("not=", -1, not_equal),
    ("or", -1, or_native),
    ("and", -1, and_native),
    ("print", -1, print_native),
];

/// Installs the native fallback for every primitive operator into
/// `gc.globals`.
pub fn install(gc: &mut Gc) {
    for (name, arity, func) in NATIVES {
        let handle = gc.alloc(Object::Native(NativeFn { name, arity: *arity, func: *func }));
        let key = intern_symbol(gc, name);
        gc.globals.set(key, Value::Native(handle), &gc.heap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::gc::GcConfig;

    #[test]
    fn installs_every_primitive() {
        let mut gc = Gc::new(GcConfig::default());
        install(&mut gc);
        for (name, _, _) in NATIVES {
            let key = intern_symbol(&mut gc, name);
            assert!(gc.globals.get(&key, &gc.heap).is_some(), "missing native: {name}");
        }
    }

    #[test]
    fn divide_by_zero_is_an_error() {
        let mut vm = Vm::new();
        let err = divide(&mut vm, &[Value::Number(1.0), Value::Number(0.0)]).unwrap_err();
        assert_eq!(err, RuntimeError::DivisionByZero);
    }
}
