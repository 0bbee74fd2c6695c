//! The instruction set, grounded on `examples/original_source/src/amex.h`'s
//! `OpCode` enum. Count-like immediates (`CALL`, `TUPLE`, `ARRAY`, the
//! arithmetic/comparison/boolean families, local/upvalue slots) are a
//! single byte; constant indices and jump offsets are two bytes,
//! big-endian. `PopN`'s immediate is two bytes since it discards an
//! entire scope's worth of locals at once (up to the 256-local cap).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Nil,
    True,
    False,
    /// Pushes `chunk.constants[operand]` (u16 operand).
    Constant,
    Pop,
    /// Pops `operand` (u16) values at once.
    PopN,
    /// Pops the top value into the VM's one-slot save register, used by
    /// `do` to carry its result across the scope-exit `PopN`.
    SaveTop,
    /// Pushes the value stashed by a prior `SaveTop`.
    RestoreTop,

    GetLocal,
    SetLocal,
    GetUpvalue,
    SetUpvalue,
    /// Closes the open upvalue (if any) over the frame-relative local slot
    /// (u8 operand) that is about to go out of scope.
    CloseUpvalue,
    GetGlobal,
    DefineGlobal,
    SetGlobal,

    /// Pops `operand` (u8) values plus whatever `Splice` added to the
    /// runtime splice-extra accumulator, and pushes a fresh `Tuple`.
    Tuple,
    /// As `Tuple`, but pushes an `Array`.
    Array,
    /// Pops one collection (array or tuple) and pushes each of its
    /// elements in order, bumping the splice-extra accumulator by
    /// `len - 1` so the enclosing `Tuple`/`Array`/`Call` pops the right
    /// number of values.
    Splice,

    Jump,
    JumpIfFalse,
    Loop,
    /// Calls with `operand` (u8) eagerly-evaluated arguments already on
    /// the stack above the callee, adjusted by the splice-extra
    /// accumulator exactly as `Tuple`/`Array` are.
    Call,
    Closure,
    Return,

    // Variadic arithmetic family (spec.md's SUMN/SUBTRACTN/...); u8 count.
    SumN,
    SubtractN,
    MultiplyN,
    DivideN,

    // Variadic chain comparisons; u8 count.
    Greater,
    Less,
    GreaterEqual,
    LessEqual,
    Equal,
    NotEqual,

    // Boolean family: eager n-ary value selection (spec.md §9 Open
    // Question 1 resolves these as leftmost-truthy/leftmost-falsey value
    // pickers over already-evaluated operands, not true short-circuit).
    Or,
    And,
    Print,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        use Opcode::*;
        let op = match byte {
            0 => Nil,
            1 => True,
            2 => False,
            3 => Constant,
            4 => Pop,
            5 => PopN,
            6 => SaveTop,
            7 => RestoreTop,
            8 => GetLocal,
            9 => SetLocal,
            10 => GetUpvalue,
            11 => SetUpvalue,
            12 => CloseUpvalue,
            13 => GetGlobal,
            14 => DefineGlobal,
            15 => SetGlobal,
            16 => Tuple,
            17 => Array,
            18 => Splice,
            19 => Jump,
            20 => JumpIfFalse,
            21 => Loop,
            22 => Call,
            23 => Closure,
            24 => Return,
            25 => SumN,
            26 => SubtractN,
            27 => MultiplyN,
            28 => DivideN,
            29 => Greater,
            30 => Less,
            31 => GreaterEqual,
            32 => LessEqual,
            33 => Equal,
            34 => NotEqual,
            35 => Or,
            36 => And,
            37 => Print,
            _ => return None,
        };
        Some(op)
    }
}
