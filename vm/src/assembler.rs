//! Line oriented assembly for the `standard` and `min` subsets.
//!
//! ```text
//! ; greet the user
//! main:
//!     push 'H'
//!     putc
//!     call newline
//!     end
//! newline:
//!     push 10
//!     putc
//!     ret
//! ```
//!
//! One instruction per line, optionally preceded by a `name:` label. `label
//! name` is accepted as well. `;` and `#` start a comment. Number operands
//! are decimal or a character literal such as `'a'` or `'\n'`.

use nospace_protocol::ErrorEntry;

use crate::CompileError;
use crate::Instruction;
use crate::Label;
use crate::Opcode;
use crate::OperandKind;
use crate::Program;
use crate::Spanned;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Standard,
    /// Whitespace 0.2 instruction set only.
    Minimal,
}

#[derive(Debug, Clone, Copy)]
struct Word<'a> {
    text: &'a str,
    column: u32,
}

fn column_of(code: &str, offset: usize) -> u32 {
    let chars = code.get(..offset).map_or(0, |prefix| prefix.chars().count());
    u32::try_from(chars + 1).unwrap_or(u32::MAX)
}

/// Splits a line into words. A character literal is one word even when it
/// contains a space or a comment character; an unquoted `;` or `#` ends the
/// line.
fn words(code: &str) -> Vec<Word<'_>> {
    let mut words = Vec::new();
    let mut chars = code.char_indices().peekable();
    while let Some((start, ch)) = chars.next() {
        if ch.is_whitespace() {
            continue;
        }
        if ch == ';' || ch == '#' {
            break;
        }
        let mut end = start + ch.len_utf8();
        if ch == '\'' {
            let mut escaped = false;
            for (offset, inner) in chars.by_ref() {
                end = offset + inner.len_utf8();
                if escaped {
                    escaped = false;
                } else if inner == '\\' {
                    escaped = true;
                } else if inner == '\'' {
                    break;
                }
            }
        } else {
            while let Some((offset, next)) = chars.peek().copied() {
                if next.is_whitespace() || next == ';' || next == '#' {
                    break;
                }
                end = offset + next.len_utf8();
                chars.next();
            }
        }
        words.push(Word {
            text: &code[start..end],
            column: column_of(code, start),
        });
    }
    words
}

fn parse_char_literal(text: &str) -> Option<i64> {
    let inner = text.strip_prefix('\'')?.strip_suffix('\'')?;
    let ch = match inner {
        "\\n" => '\n',
        "\\t" => '\t',
        "\\r" => '\r',
        "\\0" => '\0',
        "\\\\" => '\\',
        "\\'" => '\'',
        _ => {
            let mut chars = inner.chars();
            let ch = chars.next()?;
            if chars.next().is_some() {
                return None;
            }
            ch
        }
    };
    Some(i64::from(u32::from(ch)))
}

fn parse_number(text: &str) -> Result<i64, String> {
    if text.starts_with('\'') {
        return parse_char_literal(text).ok_or_else(|| format!("invalid character literal {text}"));
    }
    text.parse::<i64>()
        .map_err(|_| format!("invalid number `{text}`"))
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '.')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

struct LineAssembler<'a> {
    dialect: Dialect,
    line: u32,
    diagnostics: &'a mut Vec<ErrorEntry>,
    spanned: &'a mut Vec<Spanned>,
}

impl LineAssembler<'_> {
    fn error(&mut self, message: impl Into<String>, column: u32) {
        self.diagnostics
            .push(ErrorEntry::at(message, self.line, column));
    }

    fn emit(&mut self, instruction: Instruction, column: u32) {
        self.spanned.push(Spanned {
            instruction,
            line: self.line,
            column,
        });
    }

    fn assemble(&mut self, words: &[Word<'_>]) {
        let mut rest = words;
        if let Some((first, tail)) = rest.split_first()
            && let Some(name) = first.text.strip_suffix(':')
        {
            if is_identifier(name) {
                self.emit(Instruction::Mark(Label::new(name)), first.column);
            } else {
                self.error(format!("invalid label name `{name}`"), first.column);
            }
            rest = tail;
        }

        let Some((head, operands)) = rest.split_first() else {
            return;
        };
        let Some(opcode) = Opcode::from_mnemonic(&head.text.to_ascii_lowercase()) else {
            self.error(format!("unknown instruction `{}`", head.text), head.column);
            return;
        };
        if self.dialect == Dialect::Minimal && !opcode.in_minimal_set() {
            self.error(
                format!("`{opcode}` is not available in the min subset"),
                head.column,
            );
            return;
        }

        let expected = usize::from(opcode.operand() != OperandKind::None);
        if operands.len() > expected {
            let extra = operands[expected];
            self.error(format!("unexpected operand `{}`", extra.text), extra.column);
            return;
        }

        let instruction = match (opcode.operand(), operands.first()) {
            (OperandKind::None, _) => Instruction::bare(opcode),
            (_, None) => {
                self.error(format!("`{opcode}` needs an operand"), head.column);
                return;
            }
            (OperandKind::Number, Some(word)) => match parse_number(word.text) {
                Ok(value) => Instruction::with_number(opcode, value),
                Err(message) => {
                    self.error(message, word.column);
                    return;
                }
            },
            (OperandKind::Label, Some(word)) => {
                if !is_identifier(word.text) {
                    self.error(format!("invalid label name `{}`", word.text), word.column);
                    return;
                }
                Instruction::with_label(opcode, Label::new(word.text))
            }
        };
        match instruction {
            Some(instruction) => self.emit(instruction, head.column),
            None => self.error(format!("malformed `{opcode}` instruction"), head.column),
        }
    }
}

/// Assembles mnemonic source. All diagnostics are collected before failing.
pub fn assemble(source: &str, dialect: Dialect) -> Result<Program, CompileError> {
    let mut diagnostics = Vec::new();
    let mut spanned = Vec::new();
    for (index, code) in source.lines().enumerate() {
        let line = u32::try_from(index + 1).unwrap_or(u32::MAX);
        let words = words(code);
        LineAssembler {
            dialect,
            line,
            diagnostics: &mut diagnostics,
            spanned: &mut spanned,
        }
        .assemble(&words);
    }
    if !diagnostics.is_empty() {
        return Err(CompileError::from(diagnostics));
    }
    Program::link(spanned)
}
