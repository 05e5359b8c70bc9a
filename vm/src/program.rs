use std::collections::HashMap;

use nospace_protocol::ErrorEntry;

use crate::CompileError;
use crate::Instruction;
use crate::Label;

/// An instruction together with where it started in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    pub instruction: Instruction,
    pub line: u32,
    pub column: u32,
}

/// Resolved form executed by the machine. Jump targets are instruction
/// indices, so every op is `Copy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Push(i64),
    Duplicate,
    Copy(i64),
    Swap,
    Discard,
    Slide(i64),
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Store,
    Retrieve,
    Mark,
    Call(usize),
    Jump(usize),
    JumpIfZero(usize),
    JumpIfNegative(usize),
    Return,
    End,
    OutputChar,
    OutputNumber,
    ReadChar,
    ReadNumber,
}

/// A linked program: every label is defined exactly once and every jump
/// target exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    instructions: Vec<Instruction>,
    ops: Vec<Op>,
}

impl Program {
    pub fn link(spanned: Vec<Spanned>) -> Result<Program, CompileError> {
        let mut diagnostics = Vec::new();
        let mut targets: HashMap<&Label, usize> = HashMap::new();
        for (index, item) in spanned.iter().enumerate() {
            if let Instruction::Mark(label) = &item.instruction
                && targets.insert(label, index).is_some()
            {
                diagnostics.push(ErrorEntry::at(
                    format!("duplicate label `{label}`"),
                    item.line,
                    item.column,
                ));
            }
        }

        let mut ops = Vec::with_capacity(spanned.len());
        for item in &spanned {
            let resolve = |label: &Label, diagnostics: &mut Vec<ErrorEntry>| match targets
                .get(label)
            {
                Some(index) => *index,
                None => {
                    diagnostics.push(ErrorEntry::at(
                        format!("undefined label `{label}`"),
                        item.line,
                        item.column,
                    ));
                    0
                }
            };
            let op = match &item.instruction {
                Instruction::Push(value) => Op::Push(*value),
                Instruction::Duplicate => Op::Duplicate,
                Instruction::Copy(value) => Op::Copy(*value),
                Instruction::Swap => Op::Swap,
                Instruction::Discard => Op::Discard,
                Instruction::Slide(value) => Op::Slide(*value),
                Instruction::Add => Op::Add,
                Instruction::Subtract => Op::Subtract,
                Instruction::Multiply => Op::Multiply,
                Instruction::Divide => Op::Divide,
                Instruction::Modulo => Op::Modulo,
                Instruction::Store => Op::Store,
                Instruction::Retrieve => Op::Retrieve,
                Instruction::Mark(_) => Op::Mark,
                Instruction::Call(label) => Op::Call(resolve(label, &mut diagnostics)),
                Instruction::Jump(label) => Op::Jump(resolve(label, &mut diagnostics)),
                Instruction::JumpIfZero(label) => {
                    Op::JumpIfZero(resolve(label, &mut diagnostics))
                }
                Instruction::JumpIfNegative(label) => {
                    Op::JumpIfNegative(resolve(label, &mut diagnostics))
                }
                Instruction::Return => Op::Return,
                Instruction::End => Op::End,
                Instruction::OutputChar => Op::OutputChar,
                Instruction::OutputNumber => Op::OutputNumber,
                Instruction::ReadChar => Op::ReadChar,
                Instruction::ReadNumber => Op::ReadNumber,
            };
            ops.push(op);
        }

        if !diagnostics.is_empty() {
            return Err(CompileError::from(diagnostics));
        }
        let instructions = spanned.into_iter().map(|item| item.instruction).collect();
        Ok(Program { instructions, ops })
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub(crate) fn op(&self, pc: usize) -> Option<Op> {
        self.ops.get(pc).copied()
    }
}
