//! A whitespace virtual machine that runs in bounded step budgets.
//!
//! Programs come from two source forms:
//! - whitespace bytecode (`ws`), parsed by [`parse_whitespace`];
//! - a line oriented mnemonic assembly (`standard` and `min`), see
//!   [`assemble`].
//!
//! Both produce a linked [`Program`]. A [`Machine`] executes it with
//! [`Machine::step`], which never runs more than the requested number of
//! instructions, so a host can interleave many machines or stay responsive
//! to cancellation between budgets.

mod assembler;
mod compile;
mod emit;
mod error;
mod instruction;
mod machine;
mod parser;
mod program;

pub use assembler::Dialect;
pub use assembler::assemble;
pub use compile::compile;
pub use compile::load_program;
pub use error::CompileError;
pub use error::VmError;
pub use instruction::Instruction;
pub use instruction::Label;
pub use instruction::Opcode;
pub use instruction::OperandKind;
pub use machine::Machine;
pub use machine::StepOutcome;
pub use parser::parse_whitespace;
pub use program::Program;
pub use program::Spanned;
