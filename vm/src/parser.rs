use nospace_protocol::ErrorEntry;

use crate::CompileError;
use crate::Instruction;
use crate::Label;
use crate::Opcode;
use crate::OperandKind;
use crate::Program;
use crate::Spanned;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Space,
    Tab,
    Linefeed,
}

impl Token {
    fn letter(self) -> char {
        match self {
            Token::Space => 'S',
            Token::Tab => 'T',
            Token::Linefeed => 'L',
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Located {
    token: Token,
    line: u32,
    column: u32,
}

fn tokenize(source: &str) -> Vec<Located> {
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut column = 1;
    for ch in source.chars() {
        let token = match ch {
            ' ' => Some(Token::Space),
            '\t' => Some(Token::Tab),
            '\n' => Some(Token::Linefeed),
            _ => None,
        };
        if let Some(token) = token {
            tokens.push(Located {
                token,
                line,
                column,
            });
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    tokens
}

struct Cursor {
    tokens: Vec<Located>,
    pos: usize,
}

impl Cursor {
    fn peek_letters(&self, len: usize) -> Option<String> {
        let slice = self.tokens.get(self.pos..self.pos + len)?;
        Some(slice.iter().map(|t| t.token.letter()).collect())
    }

    fn next(&mut self) -> Option<Located> {
        let token = self.tokens.get(self.pos).copied();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn end_position(&self) -> (u32, u32) {
        self.tokens
            .last()
            .map_or((1, 1), |last| (last.line, last.column))
    }

    /// Bits up to and including the terminating linefeed.
    fn bits(&mut self, what: &str) -> Result<Vec<bool>, CompileError> {
        let mut bits = Vec::new();
        loop {
            match self.next() {
                Some(Located {
                    token: Token::Linefeed,
                    ..
                }) => return Ok(bits),
                Some(Located {
                    token: Token::Space,
                    ..
                }) => bits.push(false),
                Some(Located {
                    token: Token::Tab, ..
                }) => bits.push(true),
                None => {
                    let (line, column) = self.end_position();
                    return Err(CompileError::at(
                        format!("unterminated {what}"),
                        line,
                        column,
                    ));
                }
            }
        }
    }

    fn number(&mut self) -> Result<i64, CompileError> {
        let Some(sign) = self.next() else {
            let (line, column) = self.end_position();
            return Err(CompileError::at("missing number", line, column));
        };
        let negative = match sign.token {
            Token::Space => false,
            Token::Tab => true,
            Token::Linefeed => {
                return Err(CompileError::at(
                    "number is missing its sign",
                    sign.line,
                    sign.column,
                ));
            }
        };
        let bits = self.bits("number")?;
        let mut magnitude: i128 = 0;
        for bit in bits {
            magnitude = magnitude * 2 + i128::from(bit);
            if magnitude > i128::from(u64::MAX) {
                break;
            }
        }
        let value = if negative { -magnitude } else { magnitude };
        i64::try_from(value).map_err(|_| {
            CompileError::at("number does not fit in 64 bits", sign.line, sign.column)
        })
    }
}

/// Parses whitespace source. Every character other than space, tab and
/// linefeed is a comment.
pub fn parse_whitespace(source: &str) -> Result<Program, CompileError> {
    let mut cursor = Cursor {
        tokens: tokenize(source),
        pos: 0,
    };
    let mut spanned = Vec::new();
    while let Some(start) = cursor.tokens.get(cursor.pos).copied() {
        let Some(opcode) = Opcode::ALL.into_iter().find(|op| {
            let encoding = op.encoding();
            cursor.peek_letters(encoding.len()).as_deref() == Some(encoding)
        }) else {
            return Err(CompileError::from(vec![ErrorEntry::at(
                "unknown instruction",
                start.line,
                start.column,
            )]));
        };
        cursor.pos += opcode.encoding().len();
        let instruction = match opcode.operand() {
            OperandKind::None => Instruction::bare(opcode),
            OperandKind::Number => Instruction::with_number(opcode, cursor.number()?),
            OperandKind::Label => {
                let bits = cursor.bits("label")?;
                Instruction::with_label(opcode, Label::from_bits(&bits))
            }
        };
        let Some(instruction) = instruction else {
            return Err(CompileError::at(
                format!("malformed `{opcode}` instruction"),
                start.line,
                start.column,
            ));
        };
        spanned.push(Spanned {
            instruction,
            line: start.line,
            column: start.column,
        });
    }
    Program::link(spanned)
}
