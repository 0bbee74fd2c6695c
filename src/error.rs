//! Error types for each stage of the pipeline, plus the exit-code mapping
//! a host binary can use to drive `std::process::exit`.

use thiserror::Error;

/// Errors the parser can report. The parser keeps the first error it sees
/// and stays restartable afterward (see `Parser::status`).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Unexpected closing delimiter")]
    UnexpectedClosingDelimiter,
    #[error("Unexpected EOF")]
    UnexpectedEof,
    #[error("Unterminated string literal")]
    UnterminatedString,
    #[error("Invalid number literal: '{0}'")]
    InvalidNumber(String),
    #[error("Unterminated list")]
    UnterminatedList,
    #[error("Reader macro '{0}' is missing its operand")]
    DanglingReaderMacro(char),
    #[error("Quasiquote nesting exceeds the maximum depth of {max}")]
    QuasiquoteTooDeep { max: usize },
    #[error("Odd number of items in dict literal")]
    OddTableLiteral,
    #[error("Symbols cannot start with digits.")]
    SymbolStartsWithDigit,
}

/// Errors the compiler can report. A compile error aborts the whole
/// compilation: no `Function` is produced and the in-progress compiler
/// chain is discarded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Too many locals in one function (max 256)")]
    TooManyLocals,
    #[error("Too many upvalues in one function (max 256)")]
    TooManyUpvalues,
    #[error("Too many constants in one chunk (max 65535)")]
    TooManyConstants,
    #[error("Too many parameters in one function (max 255)")]
    TooManyParams,
    #[error("Can't read local variable '{0}' in its own initializer")]
    ReadOwnInitializer(String),
    #[error("Variable '{0}' already declared in this scope")]
    DuplicateLocal(String),
    #[error("'set' target '{0}' is not a variable")]
    InvalidSetTarget(String),
    #[error("'fn' expects a parameter list")]
    MalformedParams,
    #[error("'{0}' expects a symbol, got something else")]
    ExpectedSymbol(&'static str),
    #[error("':macro' must immediately precede the value in a 'def'")]
    MisplacedMacroKeyword,
    #[error("nested splice is unsupported")]
    NestedSplice,
    #[error("'splice' is only valid inside 'quasiquote'")]
    SpliceOutsideQuasiquote,
    #[error("'unquote' is only valid inside 'quasiquote'")]
    UnquoteOutsideQuasiquote,
    #[error("macro expansion exceeded the maximum of {max} rounds")]
    MacroExpansionLimit { max: usize },
    #[error("macro expansion failed: {0}")]
    MacroRuntimeError(String),
    #[error("empty form cannot be compiled")]
    EmptyForm,
    #[error("'{0}' is not callable in operator position")]
    NotCallable(String),
    #[error("'&' may only appear immediately before the final parameter")]
    MisplacedAmpersand,
    #[error("malformed '{0}' form")]
    MalformedSpecialForm(&'static str),
    #[error("table key must be a number, string, symbol, or keyword, got {0}")]
    InvalidTableKey(String),
}

/// Errors the VM can report while executing a chunk. The VM resets its
/// stack and frames on any of these but stays reusable; globals survive.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("Stack overflow")]
    StackOverflow,
    #[error("Call stack overflow")]
    FrameOverflow,
    #[error("Undefined variable '{0}'.")]
    UndefinedVariable(String),
    #[error("expected {expected} arguments but got {got}.")]
    ArityMismatch { expected: String, got: usize },
    #[error("'{0}' is not callable")]
    NotCallable(String),
    #[error("operand must be a number")]
    NotANumber,
    #[error("operand must be a string")]
    NotAString,
    #[error("operand must be an array or tuple")]
    NotAnArray,
    #[error("index {index} is out of bounds for a collection of length {len}")]
    IndexOutOfBounds { index: i64, len: usize },
    #[error("division by zero")]
    DivisionByZero,
    #[error("table key must be a number, string, symbol, or keyword")]
    InvalidTableKey,
    #[error("corrupt bytecode: {0}")]
    CorruptBytecode(&'static str),
}

/// Mirrors the informational exit codes spec.md §6 documents for the
/// (out-of-scope) thin CLI, so a host binary can translate an error into
/// one without re-deriving the table. Matches `examples/original_source/src/main.c`'s
/// `exit(64|65|66|67|74)` calls exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum AmexExitCode {
    Ok = 0,
    UsageError = 64,
    ParseFailure = 65,
    CompileFailure = 66,
    RuntimeFailure = 67,
    IoError = 74,
}

impl From<&ParseError> for AmexExitCode {
    fn from(_: &ParseError) -> Self {
        AmexExitCode::ParseFailure
    }
}

impl From<&CompileError> for AmexExitCode {
    fn from(_: &CompileError) -> Self {
        AmexExitCode::CompileFailure
    }
}

impl From<&RuntimeError> for AmexExitCode {
    fn from(_: &RuntimeError) -> Self {
        AmexExitCode::RuntimeFailure
    }
}

/// Unifies the three stage-specific error types for callers (like
/// `interpret`) that run the whole pipeline in one shot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AmexError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl From<&AmexError> for AmexExitCode {
    fn from(err: &AmexError) -> Self {
        match err {
            AmexError::Compile(e) => AmexExitCode::from(e),
            AmexError::Runtime(e) => AmexExitCode::from(e),
        }
    }
}
