//! The compiler: walks a `Datum` tree and emits bytecode into a `Chunk`,
//! grounded on `examples/original_source/src/compiler.c` in full — one
//! `CompilerFrame` per function being compiled, a chain of enclosing
//! frames for upvalue resolution, and the same local-slot bookkeeping
//! (`Local` name/depth/is_captured) the reference keeps in its own
//! `Compiler` struct. Unlike the reference, which threads a single
//! global `Compiler*`, every frame here lives in an explicit `Vec` owned
//! by this `Compiler` value, per spec.md §9's redesign note.

use std::collections::HashMap;

use crate::collections::array::ArrayObj;
use crate::collections::table::Table;
use crate::common::chunk::Chunk;
use crate::common::gc::Gc;
use crate::common::heap::Heap;
use crate::common::object::{Function, Object, UpvalueDesc};
use crate::common::string_intern::{intern_keyword, intern_str, intern_symbol};
use crate::common::value::Value;
use crate::compiler::parser::{Datum, Parser};
use crate::error::CompileError;
use crate::vm::opcode::Opcode;
use crate::vm::vm::Vm;

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;
const MAX_CONSTANTS: usize = 65535;
const MAX_PARAMS: usize = 255;
const MACRO_EXPANSION_LIMIT: usize = 256;

#[derive(Clone, Copy, PartialEq)]
enum FunctionKind {
    Script,
    Function,
}

struct Local {
    /// `None` for the anonymous slot a non-`def` statement in a `do`
    /// body leaves behind; such a slot still needs to occupy a tracked
    /// position so later locals resolve to the right index.
    name: Option<String>,
    /// `None` while the local's own initializer is still compiling, so
    /// `(def x x)` can be rejected.
    depth: Option<usize>,
    is_captured: bool,
}

struct CompilerFrame {
    function: Function,
    kind: FunctionKind,
    locals: Vec<Local>,
    scope_depth: usize,
    upvalues: Vec<UpvalueDesc>,
}

impl CompilerFrame {
    fn new(kind: FunctionKind, name: Option<String>) -> Self {
        CompilerFrame {
            function: Function {
                min_arity: 0,
                arity: 0,
                upvalue_count: 0,
                chunk: Chunk::new(),
                name,
            },
            kind,
            // Slot 0 always holds the running closure itself (`call_closure`
            // pushes it before the declared parameters).
            locals: vec![Local {
                name: None,
                depth: Some(0),
                is_captured: false,
            }],
            scope_depth: 0,
            upvalues: Vec::new(),
        }
    }
}

fn primitive_opcode(name: &str) -> Option<Opcode> {
    match name {
        "+" => Some(Opcode::SumN),
        "-" => Some(Opcode::SubtractN),
        "*" => Some(Opcode::MultiplyN),
        "/" => Some(Opcode::DivideN),
        ">" => Some(Opcode::Greater),
        "<" => Some(Opcode::Less),
        ">=" => Some(Opcode::GreaterEqual),
        "<=" => Some(Opcode::LessEqual),
        "=" => Some(Opcode::Equal),
        "not=" => Some(Opcode::NotEqual),
        "or" => Some(Opcode::Or),
        "and" => Some(Opcode::And),
        "print" => Some(Opcode::Print),
        _ => None,
    }
}

fn is_form(datum: &Datum, head: &str) -> bool {
    matches!(datum, Datum::Tuple(items)
        if items.len() == 2 && matches!(&items[0], Datum::Symbol(s) if s == head))
}

fn form_inner(datum: &Datum) -> &Datum {
    match datum {
        Datum::Tuple(items) => &items[1],
        _ => unreachable!("is_form guards this"),
    }
}

pub struct Compiler<'g> {
    gc: &'g mut Gc,
    frames: Vec<CompilerFrame>,
    /// Compile-time-only macro registry (name -> transformer value). The
    /// full design keeps macro-ness as a `[flags, value]` pair inside the
    /// runtime globals table; this crate keeps macros out of `gc.globals`
    /// entirely; see DESIGN.md for the reasoning.
    macros: HashMap<String, Value>,
    macro_rounds: usize,
}

impl<'g> Compiler<'g> {
    fn current(&mut self) -> &mut CompilerFrame {
        self.frames.last_mut().expect("compiler always has an active frame")
    }

    fn emit_byte(&mut self, byte: u8) {
        self.current().function.chunk.write_byte(byte, 0);
    }

    fn emit_op(&mut self, op: Opcode) {
        self.current().function.chunk.write_op(op, 0);
    }

    fn emit_u16(&mut self, value: u16) {
        self.current().function.chunk.write_u16(value, 0);
    }

    fn chunk_len(&mut self) -> usize {
        self.current().function.chunk.code.len()
    }

    fn add_constant(&mut self, value: Value) -> Result<u16, CompileError> {
        let chunk = &mut self.current().function.chunk;
        if chunk.constants.len() >= MAX_CONSTANTS {
            return Err(CompileError::TooManyConstants);
        }
        Ok(chunk.add_constant(value) as u16)
    }

    fn emit_constant(&mut self, value: Value) -> Result<(), CompileError> {
        let idx = self.add_constant(value)?;
        self.emit_op(Opcode::Constant);
        self.emit_u16(idx);
        Ok(())
    }

    fn emit_jump(&mut self, op: Opcode) -> usize {
        self.emit_op(op);
        self.emit_u16(0xFFFF);
        self.chunk_len() - 2
    }

    fn patch_jump(&mut self, operand_pos: usize) {
        let target = self.chunk_len();
        let offset = (target - (operand_pos + 2)) as u16;
        let chunk = &mut self.current().function.chunk;
        chunk.code[operand_pos] = (offset >> 8) as u8;
        chunk.code[operand_pos + 1] = (offset & 0xff) as u8;
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(Opcode::Loop);
        let offset = (self.chunk_len() + 2 - loop_start) as u16;
        self.emit_u16(offset);
    }

    // --- locals & variable resolution ---------------------------------

    fn begin_scope(&mut self) {
        self.current().scope_depth += 1;
    }

    /// Closes the current scope: stashes its last pushed value, bulk-pops
    /// `pop_count` locals beneath it (closing any that were captured),
    /// then restores the stashed value. Grounded on spec.md §4.2/§4.3's
    /// `SAVE_TOP`/`CLOSE_UPVALUE`/`POPN`/`RESTORE_TOP` sequence for `do`.
    fn end_scope(&mut self, pop_count: usize) -> Result<(), CompileError> {
        self.emit_op(Opcode::SaveTop);
        let depth = self.current().scope_depth;
        let locals_len = self.current().locals.len();
        let mut first_removed = locals_len;
        while first_removed > 0 && self.current().locals[first_removed - 1].depth == Some(depth) {
            first_removed -= 1;
        }
        debug_assert_eq!(locals_len - first_removed, pop_count);
        for slot in first_removed..locals_len {
            if self.current().locals[slot].is_captured {
                self.emit_op(Opcode::CloseUpvalue);
                self.emit_byte(slot as u8);
            }
        }
        self.current().locals.truncate(first_removed);
        self.emit_op(Opcode::PopN);
        self.emit_u16(pop_count as u16);
        self.emit_op(Opcode::RestoreTop);
        self.current().scope_depth -= 1;
        Ok(())
    }

    fn declare_local(&mut self, name: &str) -> Result<(), CompileError> {
        let depth = self.current().scope_depth;
        for local in self.current().locals.iter().rev() {
            if local.depth.is_some_and(|d| d < depth) {
                break;
            }
            if local.name.as_deref() == Some(name) {
                return Err(CompileError::DuplicateLocal(name.to_string()));
            }
        }
        if self.current().locals.len() >= MAX_LOCALS {
            return Err(CompileError::TooManyLocals);
        }
        self.current().locals.push(Local {
            name: Some(name.to_string()),
            depth: None,
            is_captured: false,
        });
        Ok(())
    }

    fn declare_anonymous_local(&mut self) -> Result<(), CompileError> {
        if self.current().locals.len() >= MAX_LOCALS {
            return Err(CompileError::TooManyLocals);
        }
        let depth = self.current().scope_depth;
        self.current().locals.push(Local {
            name: None,
            depth: Some(depth),
            is_captured: false,
        });
        Ok(())
    }

    fn mark_initialized(&mut self) {
        let depth = self.current().scope_depth;
        if let Some(local) = self.current().locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    fn resolve_local(&self, frame_index: usize, name: &str) -> Result<Option<usize>, CompileError> {
        let frame = &self.frames[frame_index];
        for (i, local) in frame.locals.iter().enumerate().rev() {
            if local.name.as_deref() == Some(name) {
                if local.depth.is_none() {
                    return Err(CompileError::ReadOwnInitializer(name.to_string()));
                }
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    fn resolve_upvalue(&mut self, frame_index: usize, name: &str) -> Result<Option<usize>, CompileError> {
        if frame_index == 0 {
            return Ok(None);
        }
        let enclosing = frame_index - 1;
        if let Some(local_idx) = self.resolve_local(enclosing, name)? {
            self.frames[enclosing].locals[local_idx].is_captured = true;
            return Ok(Some(self.add_upvalue(frame_index, local_idx as u8, true)?));
        }
        if let Some(up_idx) = self.resolve_upvalue(enclosing, name)? {
            return Ok(Some(self.add_upvalue(frame_index, up_idx as u8, false)?));
        }
        Ok(None)
    }

    fn add_upvalue(&mut self, frame_index: usize, index: u8, is_local: bool) -> Result<usize, CompileError> {
        let frame = &mut self.frames[frame_index];
        for (i, uv) in frame.upvalues.iter().enumerate() {
            if uv.index == index && uv.is_local == is_local {
                return Ok(i);
            }
        }
        if frame.upvalues.len() >= MAX_UPVALUES {
            return Err(CompileError::TooManyUpvalues);
        }
        frame.upvalues.push(UpvalueDesc { is_local, index });
        frame.function.upvalue_count = frame.upvalues.len() as u8;
        Ok(frame.upvalues.len() - 1)
    }

    fn compile_variable_get(&mut self, name: &str) -> Result<(), CompileError> {
        let frame_index = self.frames.len() - 1;
        if let Some(slot) = self.resolve_local(frame_index, name)? {
            self.emit_op(Opcode::GetLocal);
            self.emit_byte(slot as u8);
            return Ok(());
        }
        if let Some(slot) = self.resolve_upvalue(frame_index, name)? {
            self.emit_op(Opcode::GetUpvalue);
            self.emit_byte(slot as u8);
            return Ok(());
        }
        let sym = intern_symbol(self.gc, name);
        let idx = self.add_constant(sym)?;
        self.emit_op(Opcode::GetGlobal);
        self.emit_u16(idx);
        Ok(())
    }

    // --- datum <-> value reification -----------------------------------

    /// Folds a literal `Datum` into a heap `Value` at compile time, for
    /// `quote` and table literals (the instruction set has no opcode that
    /// builds a `Table` at runtime, so `{...}` can only hold literal data,
    /// the same way `'(...)` can). Table keys are restricted to
    /// Number/String/Symbol/Keyword, matching the invariant the runtime
    /// table implementation assumes.
    fn datum_to_value(&mut self, datum: &Datum) -> Result<Value, CompileError> {
        Ok(match datum {
            Datum::Nil => Value::Nil,
            Datum::Bool(b) => Value::Bool(*b),
            Datum::Number(n) => Value::Number(*n),
            Datum::Str(s) => intern_str(self.gc, s),
            Datum::Symbol(s) => intern_symbol(self.gc, s),
            Datum::Keyword(s) => intern_keyword(self.gc, s),
            Datum::Tuple(items) => {
                let mut values = Vec::with_capacity(items.len());
                for d in items {
                    values.push(self.datum_to_value(d)?);
                }
                let handle = self.gc.alloc(Object::Tuple(ArrayObj::with_items(values)));
                Value::Tuple(handle)
            }
            Datum::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for d in items {
                    values.push(self.datum_to_value(d)?);
                }
                let handle = self.gc.alloc(Object::Array(ArrayObj::with_items(values)));
                Value::Array(handle)
            }
            Datum::Table(pairs) => {
                let mut table = Table::new();
                for (k, v) in pairs {
                    if !matches!(k, Datum::Number(_) | Datum::Str(_) | Datum::Symbol(_) | Datum::Keyword(_)) {
                        return Err(CompileError::InvalidTableKey(format!("{k:?}")));
                    }
                    let kv = self.datum_to_value(k)?;
                    let vv = self.datum_to_value(v)?;
                    table.set(kv, vv, &self.gc.heap);
                }
                let handle = self.gc.alloc(Object::Table(table));
                Value::Table(handle)
            }
        })
    }

    // --- expression compilation -----------------------------------------

    fn compile_expr(&mut self, datum: &Datum) -> Result<(), CompileError> {
        match datum {
            Datum::Nil => self.emit_op(Opcode::Nil),
            Datum::Bool(true) => self.emit_op(Opcode::True),
            Datum::Bool(false) => self.emit_op(Opcode::False),
            Datum::Number(n) => self.emit_constant(Value::Number(*n))?,
            Datum::Str(s) => {
                let v = intern_str(self.gc, s);
                self.emit_constant(v)?;
            }
            Datum::Keyword(k) => {
                let v = intern_keyword(self.gc, k);
                self.emit_constant(v)?;
            }
            Datum::Symbol(name) => self.compile_variable_get(name)?,
            Datum::Array(items) => self.compile_array_literal(items)?,
            Datum::Table(pairs) => {
                let value = self.datum_to_value(&Datum::Table(pairs.clone()))?;
                self.emit_constant(value)?;
            }
            Datum::Tuple(items) => self.compile_form(items)?,
        }
        Ok(())
    }

    fn compile_array_literal(&mut self, items: &[Datum]) -> Result<(), CompileError> {
        let count = self.compile_counted_items(items)?;
        self.emit_op(Opcode::Array);
        self.emit_byte(count);
        Ok(())
    }

    /// Compiles a list of items feeding a counted opcode (`Array`, `Call`,
    /// or a primitive's arithmetic/comparison family), recognizing a
    /// `(splice x)` item and emitting `x` followed by `Splice` so the
    /// consumer's runtime count picks up `splice_extra`'s correction.
    /// Outside one of these positions `splice` has no count to adjust, so
    /// `try_special_form` rejects it on its own.
    fn compile_counted_items(&mut self, items: &[Datum]) -> Result<u8, CompileError> {
        if items.len() > u8::MAX as usize {
            return Err(CompileError::TooManyParams);
        }
        for item in items {
            if is_form(item, "splice") {
                let inner = form_inner(item).clone();
                if is_form(&inner, "splice") {
                    return Err(CompileError::NestedSplice);
                }
                self.compile_expr(&inner)?;
                self.emit_op(Opcode::Splice);
            } else {
                self.compile_expr(item)?;
            }
        }
        Ok(items.len() as u8)
    }

    fn compile_form(&mut self, items: &[Datum]) -> Result<(), CompileError> {
        let head = items.first().ok_or(CompileError::EmptyForm)?;
        let rest = &items[1..];
        if let Datum::Symbol(name) = head {
            if let Some(()) = self.try_special_form(name, rest)? {
                return Ok(());
            }
            if self.macros.contains_key(name) {
                let expanded = self.expand_macro(name, rest)?;
                return self.compile_expr(&expanded);
            }
            if let Some(op) = primitive_opcode(name) {
                return self.compile_primitive_call(op, rest);
            }
        }
        if matches!(
            head,
            Datum::Number(_) | Datum::Bool(_) | Datum::Nil | Datum::Str(_) | Datum::Keyword(_) | Datum::Array(_) | Datum::Table(_)
        ) {
            return Err(CompileError::NotCallable(format!("{head:?}")));
        }
        self.compile_expr(head)?;
        let count = self.compile_counted_items(rest)?;
        self.emit_op(Opcode::Call);
        self.emit_byte(count);
        Ok(())
    }

    fn compile_primitive_call(&mut self, op: Opcode, args: &[Datum]) -> Result<(), CompileError> {
        let count = self.compile_counted_items(args)?;
        self.emit_op(op);
        self.emit_byte(count);
        Ok(())
    }

    fn try_special_form(&mut self, name: &str, rest: &[Datum]) -> Result<Option<()>, CompileError> {
        match name {
            "quote" => {
                self.compile_quote(rest)?;
                Ok(Some(()))
            }
            "quasiquote" => {
                let inner = rest.first().ok_or(CompileError::MalformedSpecialForm("quasiquote"))?.clone();
                self.compile_quasiquote(&inner, 1)?;
                Ok(Some(()))
            }
            "unquote" => Err(CompileError::UnquoteOutsideQuasiquote),
            "splice" => Err(CompileError::SpliceOutsideQuasiquote),
            "def" => {
                self.compile_def(rest)?;
                Ok(Some(()))
            }
            "set" => {
                self.compile_set(rest)?;
                Ok(Some(()))
            }
            "do" => {
                self.compile_do(rest)?;
                Ok(Some(()))
            }
            "if" => {
                self.compile_if(rest)?;
                Ok(Some(()))
            }
            "while" => {
                self.compile_while(rest)?;
                Ok(Some(()))
            }
            "fn" => {
                self.compile_fn(rest)?;
                Ok(Some(()))
            }
            _ => Ok(None),
        }
    }

    fn compile_quote(&mut self, rest: &[Datum]) -> Result<(), CompileError> {
        let datum = rest.first().ok_or(CompileError::MalformedSpecialForm("quote"))?.clone();
        let value = self.datum_to_value(&datum)?;
        self.emit_constant(value)
    }

    /// Compiles a quasiquoted datum at nesting `level`. `unquote` evaluates
    /// its operand once `level` reaches 1; deeper occurrences, and nested
    /// `quasiquote`, are rebuilt literally with the level shifted, per
    /// spec.md §4.2's quasiquote/unquote/splice level tracking.
    fn compile_quasiquote(&mut self, datum: &Datum, level: usize) -> Result<(), CompileError> {
        if is_form(datum, "unquote") {
            let inner = form_inner(datum).clone();
            return if level == 1 {
                self.compile_expr(&inner)
            } else {
                self.rebuild_wrapped("unquote", &inner, level - 1)
            };
        }
        if is_form(datum, "quasiquote") {
            let inner = form_inner(datum).clone();
            return self.rebuild_wrapped("quasiquote", &inner, level + 1);
        }
        if is_form(datum, "splice") {
            return Err(CompileError::SpliceOutsideQuasiquote);
        }
        match datum {
            Datum::Tuple(items) => self.compile_quasiquote_container(items, level, Opcode::Tuple),
            Datum::Array(items) => self.compile_quasiquote_container(items, level, Opcode::Array),
            _ => {
                let value = self.datum_to_value(datum)?;
                self.emit_constant(value)
            }
        }
    }

    fn rebuild_wrapped(&mut self, head: &str, inner: &Datum, level: usize) -> Result<(), CompileError> {
        let sym = intern_symbol(self.gc, head);
        self.emit_constant(sym)?;
        self.compile_quasiquote(inner, level)?;
        self.emit_op(Opcode::Tuple);
        self.emit_byte(2);
        Ok(())
    }

    fn compile_quasiquote_container(&mut self, items: &[Datum], level: usize, op: Opcode) -> Result<(), CompileError> {
        let mut count: usize = 0;
        for item in items {
            if is_form(item, "splice") {
                let inner = form_inner(item).clone();
                if level == 1 {
                    if is_form(&inner, "splice") {
                        return Err(CompileError::NestedSplice);
                    }
                    self.compile_expr(&inner)?;
                    self.emit_op(Opcode::Splice);
                } else {
                    self.rebuild_wrapped("splice", &inner, level - 1)?;
                }
            } else {
                self.compile_quasiquote(item, level)?;
            }
            count += 1;
        }
        if count > u8::MAX as usize {
            return Err(CompileError::TooManyParams);
        }
        self.emit_op(op);
        self.emit_byte(count as u8);
        Ok(())
    }

    fn compile_def(&mut self, rest: &[Datum]) -> Result<(), CompileError> {
        let name = match rest.first() {
            Some(Datum::Symbol(s)) => s.clone(),
            Some(_) => return Err(CompileError::ExpectedSymbol("def")),
            None => return Err(CompileError::MalformedSpecialForm("def")),
        };
        let value_forms = &rest[1..];
        let is_macro = matches!(value_forms.first(), Some(Datum::Keyword(k)) if k == "macro");
        if !is_macro && value_forms.iter().any(|d| matches!(d, Datum::Keyword(k) if k == "macro")) {
            return Err(CompileError::MisplacedMacroKeyword);
        }
        if is_macro {
            if value_forms.len() != 2 {
                return Err(CompileError::MalformedSpecialForm("def"));
            }
            let value = self.compile_standalone(&value_forms[1])?;
            self.macros.insert(name, value);
            self.emit_op(Opcode::Nil);
            return Ok(());
        }
        if value_forms.len() != 1 {
            return Err(CompileError::MalformedSpecialForm("def"));
        }
        if self.current().scope_depth == 0 {
            self.compile_expr(&value_forms[0])?;
            let sym = intern_symbol(self.gc, &name);
            let idx = self.add_constant(sym)?;
            self.emit_op(Opcode::DefineGlobal);
            self.emit_u16(idx);
            self.emit_op(Opcode::Nil);
        } else {
            self.declare_local(&name)?;
            self.compile_expr(&value_forms[0])?;
            self.mark_initialized();
        }
        Ok(())
    }

    fn compile_set(&mut self, rest: &[Datum]) -> Result<(), CompileError> {
        if rest.len() != 2 {
            return Err(CompileError::MalformedSpecialForm("set"));
        }
        let name = match &rest[0] {
            Datum::Symbol(s) => s.clone(),
            other => return Err(CompileError::InvalidSetTarget(format!("{other:?}"))),
        };
        self.compile_expr(&rest[1])?;
        let frame_index = self.frames.len() - 1;
        if let Some(slot) = self.resolve_local(frame_index, &name)? {
            self.emit_op(Opcode::SetLocal);
            self.emit_byte(slot as u8);
        } else if let Some(slot) = self.resolve_upvalue(frame_index, &name)? {
            self.emit_op(Opcode::SetUpvalue);
            self.emit_byte(slot as u8);
        } else {
            let sym = intern_symbol(self.gc, &name);
            let idx = self.add_constant(sym)?;
            self.emit_op(Opcode::SetGlobal);
            self.emit_u16(idx);
        }
        Ok(())
    }

    fn compile_do(&mut self, rest: &[Datum]) -> Result<(), CompileError> {
        self.begin_scope();
        if rest.is_empty() {
            self.emit_op(Opcode::Nil);
            return self.end_scope(0);
        }
        for stmt in rest {
            let before = self.current().locals.len();
            self.compile_expr(stmt)?;
            if self.current().locals.len() == before {
                self.declare_anonymous_local()?;
            }
        }
        self.end_scope(rest.len() - 1)
    }

    fn compile_if(&mut self, rest: &[Datum]) -> Result<(), CompileError> {
        if rest.len() != 2 && rest.len() != 3 {
            return Err(CompileError::MalformedSpecialForm("if"));
        }
        self.compile_expr(&rest[0])?;
        let then_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit_op(Opcode::Pop);
        self.compile_expr(&rest[1])?;
        let else_jump = self.emit_jump(Opcode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(Opcode::Pop);
        match rest.get(2) {
            Some(else_branch) => self.compile_expr(else_branch)?,
            None => self.emit_op(Opcode::Nil),
        }
        self.patch_jump(else_jump);
        Ok(())
    }

    fn compile_while(&mut self, rest: &[Datum]) -> Result<(), CompileError> {
        let cond = rest.first().ok_or(CompileError::MalformedSpecialForm("while"))?;
        let body = &rest[1..];
        let loop_start = self.chunk_len();
        self.compile_expr(cond)?;
        let exit_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit_op(Opcode::Pop);
        for form in body {
            self.compile_expr(form)?;
            self.emit_op(Opcode::Pop);
        }
        self.emit_loop(loop_start);
        self.patch_jump(exit_jump);
        self.emit_op(Opcode::Pop);
        self.emit_op(Opcode::Nil);
        Ok(())
    }

    fn compile_fn(&mut self, rest: &[Datum]) -> Result<(), CompileError> {
        let (name, idx) = match rest.first() {
            Some(Datum::Symbol(s)) => (Some(s.clone()), 1),
            _ => (None, 0),
        };
        let params = match rest.get(idx) {
            Some(Datum::Array(items)) => items.clone(),
            _ => return Err(CompileError::MalformedParams),
        };
        let body = &rest[idx + 1..];

        if let Some(n) = &name {
            if self.current().scope_depth > 0 {
                self.declare_local(n)?;
                self.mark_initialized();
            }
        }

        self.compile_function_body(name.clone(), &params, body)?;

        if let Some(n) = name {
            if self.current().scope_depth == 0 {
                let sym = intern_symbol(self.gc, &n);
                let idx = self.add_constant(sym)?;
                self.emit_op(Opcode::DefineGlobal);
                self.emit_u16(idx);
                self.emit_op(Opcode::Nil);
            }
        }
        Ok(())
    }

    fn compile_function_body(&mut self, name: Option<String>, params: &[Datum], body: &[Datum]) -> Result<(), CompileError> {
        let mut fixed_names = Vec::new();
        let mut variadic_name: Option<String> = None;
        let mut i = 0;
        while i < params.len() {
            match &params[i] {
                Datum::Symbol(s) if s == "&" => {
                    if variadic_name.is_some() || i != params.len() - 2 {
                        return Err(CompileError::MisplacedAmpersand);
                    }
                    i += 1;
                    match params.get(i) {
                        Some(Datum::Symbol(rest_name)) => variadic_name = Some(rest_name.clone()),
                        _ => return Err(CompileError::MalformedParams),
                    }
                }
                Datum::Symbol(s) => fixed_names.push(s.clone()),
                _ => return Err(CompileError::MalformedParams),
            }
            i += 1;
        }
        if fixed_names.len() + variadic_name.is_some() as usize > MAX_PARAMS {
            return Err(CompileError::TooManyParams);
        }
        let min_arity = fixed_names.len() as u8;
        let arity: i32 = if variadic_name.is_some() {
            -((fixed_names.len() as i32) + 1)
        } else {
            fixed_names.len() as i32
        };

        let mut frame = CompilerFrame::new(FunctionKind::Function, name);
        frame.function.min_arity = min_arity;
        frame.function.arity = arity;
        self.frames.push(frame);

        for p in &fixed_names {
            self.declare_local(p)?;
            self.mark_initialized();
        }
        if let Some(rn) = &variadic_name {
            self.declare_local(rn)?;
            self.mark_initialized();
        }

        if body.is_empty() {
            self.emit_op(Opcode::Nil);
        } else {
            self.compile_do(body)?;
        }
        self.emit_op(Opcode::Return);

        let frame = self.frames.pop().expect("just pushed");
        let mut function = frame.function;
        function.upvalue_count = frame.upvalues.len() as u8;
        let upvalues = frame.upvalues;

        let fn_handle = self.gc.alloc(Object::Function(function));
        let cidx = self.add_constant(Value::Function(fn_handle))?;
        self.emit_op(Opcode::Closure);
        self.emit_u16(cidx);
        for uv in &upvalues {
            self.emit_byte(uv.is_local as u8);
            self.emit_byte(uv.index);
        }
        Ok(())
    }

    // --- macros ----------------------------------------------------------

    /// Every `Value` kept alive only by compiler-side state rather than by
    /// `gc.globals` or a running `Vm`'s own stack: the macro table (whose
    /// transformers are real `Closure`/`Function` objects, per
    /// `compile_def`'s `:macro` path) and the constant pool of every
    /// frame still being compiled. A reentrant `Vm` must be told about
    /// these before it runs anything that can trigger a collection, or a
    /// macro defined earlier than the one currently expanding can be
    /// swept out from under `self.macros`.
    fn gc_roots(&self) -> Vec<Value> {
        self.macros
            .values()
            .copied()
            .chain(self.frames.iter().flat_map(|f| f.function.chunk.constants.iter().copied()))
            .collect()
    }

    /// Compiles `datum` as a zero-argument function and runs it to
    /// completion immediately, via a throwaway `Vm` that borrows this
    /// compiler's `Gc` for the duration of the call. Used to evaluate a
    /// macro's value-expression at `def`-time.
    fn compile_standalone(&mut self, datum: &Datum) -> Result<Value, CompileError> {
        let frame = CompilerFrame::new(FunctionKind::Function, None);
        self.frames.push(frame);
        self.compile_expr(datum)?;
        self.emit_op(Opcode::Return);
        let frame = self.frames.pop().expect("just pushed");
        let mut function = frame.function;
        function.upvalue_count = frame.upvalues.len() as u8;

        let mut vm = Vm::new();
        std::mem::swap(&mut vm.gc, &mut *self.gc);
        vm.set_extra_roots(self.gc_roots());
        let result = vm.interpret(function);
        std::mem::swap(&mut vm.gc, &mut *self.gc);
        result.map_err(|e| CompileError::MacroRuntimeError(e.to_string()))
    }

    fn expand_macro(&mut self, name: &str, rest: &[Datum]) -> Result<Datum, CompileError> {
        self.macro_rounds += 1;
        if self.macro_rounds > MACRO_EXPANSION_LIMIT {
            return Err(CompileError::MacroExpansionLimit { max: MACRO_EXPANSION_LIMIT });
        }
        let transformer = *self.macros.get(name).expect("caller checked contains_key");
        let mut args = Vec::with_capacity(rest.len());
        for d in rest {
            args.push(self.datum_to_value(d)?);
        }

        let mut vm = Vm::new();
        std::mem::swap(&mut vm.gc, &mut *self.gc);
        vm.set_extra_roots(self.gc_roots());
        let result = vm.call(transformer, &args);
        std::mem::swap(&mut vm.gc, &mut *self.gc);

        let value = result.map_err(|e| CompileError::MacroRuntimeError(e.to_string()))?;
        Ok(value_to_datum(&value, &self.gc.heap))
    }
}

fn value_to_datum(value: &Value, heap: &Heap) -> Datum {
    match value {
        Value::Nil => Datum::Nil,
        Value::Bool(b) => Datum::Bool(*b),
        Value::Number(n) => Datum::Number(*n),
        Value::String(h) => Datum::Str(heap.get(*h).as_str().to_string()),
        Value::Symbol(h) => Datum::Symbol(heap.get(*h).as_str().to_string()),
        Value::Keyword(h) => Datum::Keyword(heap.get(*h).as_str().to_string()),
        Value::Tuple(h) => Datum::Tuple(heap.get(*h).as_array().iter().map(|v| value_to_datum(v, heap)).collect()),
        Value::Array(h) => Datum::Array(heap.get(*h).as_array().iter().map(|v| value_to_datum(v, heap)).collect()),
        Value::Table(h) => Datum::Table(
            heap.get(*h)
                .as_table()
                .iter()
                .map(|(k, v)| (value_to_datum(&k, heap), value_to_datum(&v, heap)))
                .collect(),
        ),
        // Functions, closures, and natives have no literal reader syntax;
        // a macro returning one collapses to `nil` rather than failing.
        Value::Function(_) | Value::Closure(_) | Value::Native(_) => Datum::Nil,
    }
}

/// Compiles `source` into a zero-argument top-level `Function`, the entry
/// point `Vm::interpret` expects. Every form but the last is compiled as
/// a discarded statement; the last form's value becomes the script's
/// result, matching a REPL's last-expression convention.
pub fn compile(source: &str, gc: &mut Gc) -> Result<Function, CompileError> {
    let forms = Parser::parse_cstring(source)?;
    let mut compiler = Compiler {
        gc,
        frames: vec![CompilerFrame::new(FunctionKind::Script, None)],
        macros: HashMap::new(),
        macro_rounds: 0,
    };

    if forms.is_empty() {
        compiler.emit_op(Opcode::Nil);
    } else {
        let last = forms.len() - 1;
        for (i, form) in forms.iter().enumerate() {
            compiler.compile_expr(form)?;
            if i != last {
                compiler.emit_op(Opcode::Pop);
            }
        }
    }
    compiler.emit_op(Opcode::Return);

    let mut function = compiler.frames.pop().expect("script frame").function;
    function.min_arity = 0;
    function.arity = 0;
    function.upvalue_count = 0;
    Ok(function)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::vm::Vm;

    fn run(source: &str) -> Value {
        let mut vm = Vm::new();
        crate::core::install(&mut vm.gc);
        let function = compile(source, &mut vm.gc).expect("compiles");
        vm.interpret(function).expect("runs")
    }

    #[test]
    fn arithmetic_and_locals() {
        let v = run("(do (def x 2) (def y 3) (+ x y 10))");
        assert_eq!(v, Value::Number(15.0));
    }

    #[test]
    fn if_and_comparisons() {
        let v = run("(if (> 3 2) :yes :no)");
        match v {
            Value::Keyword(_) => {}
            _ => panic!("expected a keyword"),
        }
    }

    #[test]
    fn closures_capture_by_reference() {
        let v = run(
            "(do
               (def counter (do
                 (def n 0)
                 (fn [] (do (set n (+ n 1)) n))))
               (counter)
               (counter)
               (counter))",
        );
        assert_eq!(v, Value::Number(3.0));
    }

    #[test]
    fn variadic_and_splice() {
        let v = run("(do (def f (fn [a & rest] rest)) (f 1 2 3 4))");
        match v {
            Value::Array(_) => {}
            _ => panic!("expected the rest array"),
        }
    }

    #[test]
    fn splice_at_call_site() {
        let v = run("(do (def f (fn [a b c] (+ a b c))) (f ;[1 2 3]))");
        assert_eq!(v, Value::Number(6.0));
    }

    #[test]
    fn while_loop_accumulates() {
        let v = run("(do (def i 0) (def total 0) (while (< i 5) (set total (+ total i)) (set i (+ i 1))) total)");
        assert_eq!(v, Value::Number(10.0));
    }

    #[test]
    fn quasiquote_unquote_splice() {
        let v = run("(do (def xs [2 3]) (quasiquote [1 (unquote (+ 1 0)) (splice xs)]))");
        match v {
            Value::Array(_) => {}
            _ => panic!("expected an array"),
        }
    }

    #[test]
    fn nested_splice_is_rejected() {
        let mut vm = Vm::new();
        let err = compile("(quasiquote [(splice (splice x))])", &mut vm.gc).unwrap_err();
        assert_eq!(err, CompileError::NestedSplice);
    }

    #[test]
    fn misplaced_macro_keyword_is_rejected() {
        let mut vm = Vm::new();
        let err = compile("(def x 1 :macro)", &mut vm.gc).unwrap_err();
        assert_eq!(err, CompileError::MisplacedMacroKeyword);
    }

    #[test]
    fn read_own_initializer_is_rejected() {
        let mut vm = Vm::new();
        let err = compile("(do (def x x))", &mut vm.gc).unwrap_err();
        assert_eq!(err, CompileError::ReadOwnInitializer("x".to_string()));
    }
}
