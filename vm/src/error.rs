use nospace_protocol::ErrorEntry;
use nospace_protocol::format_error_entries;
use thiserror::Error;

/// Failure while turning source text into a [`crate::Program`]. Carries
/// every diagnostic found, not only the first.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", format_error_entries(.diagnostics))]
pub struct CompileError {
    pub diagnostics: Vec<ErrorEntry>,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            diagnostics: vec![ErrorEntry::new(message)],
        }
    }

    pub fn at(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            diagnostics: vec![ErrorEntry::at(message, line, column)],
        }
    }
}

impl From<Vec<ErrorEntry>> for CompileError {
    fn from(diagnostics: Vec<ErrorEntry>) -> Self {
        Self { diagnostics }
    }
}

/// Runtime fault. Once a machine reports one it stays faulted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("stack underflow at instruction {pc} (`{opcode}`)")]
    StackUnderflow { pc: usize, opcode: &'static str },

    #[error("division by zero at instruction {pc}")]
    DivisionByZero { pc: usize },

    #[error("arithmetic overflow at instruction {pc} (`{opcode}`)")]
    Overflow { pc: usize, opcode: &'static str },

    #[error("invalid operand {value} for `{opcode}` at instruction {pc}")]
    InvalidOperand {
        pc: usize,
        opcode: &'static str,
        value: i64,
    },

    #[error("return outside of a subroutine at instruction {pc}")]
    CallStackUnderflow { pc: usize },

    #[error("call stack exceeded {limit} frames")]
    CallStackOverflow { limit: usize },

    #[error("attempted to read past the end of input")]
    EndOfInput,

    #[error("invalid number on input: {0:?}")]
    InvalidNumberInput(String),

    #[error("cannot print {0} as a character")]
    InvalidCharCode(i64),
}
