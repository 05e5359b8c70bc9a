use serde::Deserialize;
use serde::Serialize;

/// A jump target. Whitespace labels are bit strings; the assembler allows
/// arbitrary identifiers. Either way labels only compare by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Label decoded from whitespace bits, e.g. `[false, true]` -> `L01`.
    pub(crate) fn from_bits(bits: &[bool]) -> Self {
        let mut name = String::with_capacity(bits.len() + 1);
        name.push('L');
        name.extend(bits.iter().map(|bit| if *bit { '1' } else { '0' }));
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    Number,
    Label,
}

/// Operation without its operand. Carries the fixed facts about every
/// instruction: assembly name, whitespace encoding and operand shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Opcode {
    Push,
    Duplicate,
    Copy,
    Swap,
    Discard,
    Slide,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Store,
    Retrieve,
    Mark,
    Call,
    Jump,
    JumpIfZero,
    JumpIfNegative,
    Return,
    End,
    OutputChar,
    OutputNumber,
    ReadChar,
    ReadNumber,
}

impl Opcode {
    pub const ALL: [Opcode; 24] = [
        Opcode::Push,
        Opcode::Duplicate,
        Opcode::Copy,
        Opcode::Swap,
        Opcode::Discard,
        Opcode::Slide,
        Opcode::Add,
        Opcode::Subtract,
        Opcode::Multiply,
        Opcode::Divide,
        Opcode::Modulo,
        Opcode::Store,
        Opcode::Retrieve,
        Opcode::Mark,
        Opcode::Call,
        Opcode::Jump,
        Opcode::JumpIfZero,
        Opcode::JumpIfNegative,
        Opcode::Return,
        Opcode::End,
        Opcode::OutputChar,
        Opcode::OutputNumber,
        Opcode::ReadChar,
        Opcode::ReadNumber,
    ];

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Push => "push",
            Opcode::Duplicate => "dup",
            Opcode::Copy => "copy",
            Opcode::Swap => "swap",
            Opcode::Discard => "drop",
            Opcode::Slide => "slide",
            Opcode::Add => "add",
            Opcode::Subtract => "sub",
            Opcode::Multiply => "mul",
            Opcode::Divide => "div",
            Opcode::Modulo => "mod",
            Opcode::Store => "store",
            Opcode::Retrieve => "retrieve",
            Opcode::Mark => "label",
            Opcode::Call => "call",
            Opcode::Jump => "jump",
            Opcode::JumpIfZero => "jz",
            Opcode::JumpIfNegative => "jn",
            Opcode::Return => "ret",
            Opcode::End => "end",
            Opcode::OutputChar => "putc",
            Opcode::OutputNumber => "putn",
            Opcode::ReadChar => "getc",
            Opcode::ReadNumber => "getn",
        }
    }

    pub fn from_mnemonic(name: &str) -> Option<Opcode> {
        Opcode::ALL.into_iter().find(|op| op.mnemonic() == name)
    }

    /// Instruction prefix spelled with `S` (space), `T` (tab) and `L`
    /// (linefeed). The set of encodings is prefix free.
    pub fn encoding(self) -> &'static str {
        match self {
            Opcode::Push => "SS",
            Opcode::Duplicate => "SLS",
            Opcode::Copy => "STS",
            Opcode::Swap => "SLT",
            Opcode::Discard => "SLL",
            Opcode::Slide => "STL",
            Opcode::Add => "TSSS",
            Opcode::Subtract => "TSST",
            Opcode::Multiply => "TSSL",
            Opcode::Divide => "TSTS",
            Opcode::Modulo => "TSTT",
            Opcode::Store => "TTS",
            Opcode::Retrieve => "TTT",
            Opcode::Mark => "LSS",
            Opcode::Call => "LST",
            Opcode::Jump => "LSL",
            Opcode::JumpIfZero => "LTS",
            Opcode::JumpIfNegative => "LTT",
            Opcode::Return => "LTL",
            Opcode::End => "LLL",
            Opcode::OutputChar => "TLSS",
            Opcode::OutputNumber => "TLST",
            Opcode::ReadChar => "TLTS",
            Opcode::ReadNumber => "TLTT",
        }
    }

    pub fn operand(self) -> OperandKind {
        match self {
            Opcode::Push | Opcode::Copy | Opcode::Slide => OperandKind::Number,
            Opcode::Mark
            | Opcode::Call
            | Opcode::Jump
            | Opcode::JumpIfZero
            | Opcode::JumpIfNegative => OperandKind::Label,
            _ => OperandKind::None,
        }
    }

    /// `copy` and `slide` arrived with whitespace 0.3; the `min` dialect
    /// sticks to the 0.2 set.
    pub fn in_minimal_set(self) -> bool {
        !matches!(self, Opcode::Copy | Opcode::Slide)
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "arg", rename_all = "snake_case")]
pub enum Instruction {
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
    Mark(Label),
    Call(Label),
    Jump(Label),
    JumpIfZero(Label),
    JumpIfNegative(Label),
    Return,
    End,
    OutputChar,
    OutputNumber,
    ReadChar,
    ReadNumber,
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Push(_) => Opcode::Push,
            Instruction::Duplicate => Opcode::Duplicate,
            Instruction::Copy(_) => Opcode::Copy,
            Instruction::Swap => Opcode::Swap,
            Instruction::Discard => Opcode::Discard,
            Instruction::Slide(_) => Opcode::Slide,
            Instruction::Add => Opcode::Add,
            Instruction::Subtract => Opcode::Subtract,
            Instruction::Multiply => Opcode::Multiply,
            Instruction::Divide => Opcode::Divide,
            Instruction::Modulo => Opcode::Modulo,
            Instruction::Store => Opcode::Store,
            Instruction::Retrieve => Opcode::Retrieve,
            Instruction::Mark(_) => Opcode::Mark,
            Instruction::Call(_) => Opcode::Call,
            Instruction::Jump(_) => Opcode::Jump,
            Instruction::JumpIfZero(_) => Opcode::JumpIfZero,
            Instruction::JumpIfNegative(_) => Opcode::JumpIfNegative,
            Instruction::Return => Opcode::Return,
            Instruction::End => Opcode::End,
            Instruction::OutputChar => Opcode::OutputChar,
            Instruction::OutputNumber => Opcode::OutputNumber,
            Instruction::ReadChar => Opcode::ReadChar,
            Instruction::ReadNumber => Opcode::ReadNumber,
        }
    }

    /// Builds an operand-less instruction. Returns `None` for opcodes that
    /// need a number or a label.
    pub fn bare(opcode: Opcode) -> Option<Instruction> {
        let instruction = match opcode {
            Opcode::Duplicate => Instruction::Duplicate,
            Opcode::Swap => Instruction::Swap,
            Opcode::Discard => Instruction::Discard,
            Opcode::Add => Instruction::Add,
            Opcode::Subtract => Instruction::Subtract,
            Opcode::Multiply => Instruction::Multiply,
            Opcode::Divide => Instruction::Divide,
            Opcode::Modulo => Instruction::Modulo,
            Opcode::Store => Instruction::Store,
            Opcode::Retrieve => Instruction::Retrieve,
            Opcode::Return => Instruction::Return,
            Opcode::End => Instruction::End,
            Opcode::OutputChar => Instruction::OutputChar,
            Opcode::OutputNumber => Instruction::OutputNumber,
            Opcode::ReadChar => Instruction::ReadChar,
            Opcode::ReadNumber => Instruction::ReadNumber,
            _ => return None,
        };
        Some(instruction)
    }

    pub fn with_number(opcode: Opcode, value: i64) -> Option<Instruction> {
        match opcode {
            Opcode::Push => Some(Instruction::Push(value)),
            Opcode::Copy => Some(Instruction::Copy(value)),
            Opcode::Slide => Some(Instruction::Slide(value)),
            _ => None,
        }
    }

    pub fn with_label(opcode: Opcode, label: Label) -> Option<Instruction> {
        match opcode {
            Opcode::Mark => Some(Instruction::Mark(label)),
            Opcode::Call => Some(Instruction::Call(label)),
            Opcode::Jump => Some(Instruction::Jump(label)),
            Opcode::JumpIfZero => Some(Instruction::JumpIfZero(label)),
            Opcode::JumpIfNegative => Some(Instruction::JumpIfNegative(label)),
            _ => None,
        }
    }

    pub fn number(&self) -> Option<i64> {
        match self {
            Instruction::Push(value) | Instruction::Copy(value) | Instruction::Slide(value) => {
                Some(*value)
            }
            _ => None,
        }
    }

    pub fn label(&self) -> Option<&Label> {
        match self {
            Instruction::Mark(label)
            | Instruction::Call(label)
            | Instruction::Jump(label)
            | Instruction::JumpIfZero(label)
            | Instruction::JumpIfNegative(label) => Some(label),
            _ => None,
        }
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mnemonic = self.opcode().mnemonic();
        if let Some(value) = self.number() {
            write!(f, "{mnemonic} {value}")
        } else if let Some(label) = self.label() {
            write!(f, "{mnemonic} {label}")
        } else {
            f.write_str(mnemonic)
        }
    }
}
