use std::collections::HashMap;

use crate::CompileError;
use crate::Instruction;
use crate::Label;
use crate::Program;

/// Assigns every label a compact bit string in order of first appearance.
fn label_bits(program: &Program) -> HashMap<&Label, String> {
    let mut bits = HashMap::new();
    for label in program.instructions().iter().filter_map(Instruction::label) {
        let next = bits.len();
        bits.entry(label).or_insert_with(|| format!("{next:b}"));
    }
    bits
}

fn number_letters(value: i64) -> String {
    let sign = if value < 0 { 'T' } else { 'S' };
    let magnitude = format!("{:b}", value.unsigned_abs());
    let mut letters = String::with_capacity(magnitude.len() + 2);
    letters.push(sign);
    letters.extend(magnitude.chars().map(|bit| if bit == '1' { 'T' } else { 'S' }));
    letters.push('L');
    letters
}

/// One string of `S`/`T`/`L` letters per instruction.
fn letter_lines(program: &Program) -> Vec<String> {
    let labels = label_bits(program);
    program
        .instructions()
        .iter()
        .map(|instruction| {
            let mut letters = instruction.opcode().encoding().to_string();
            if let Some(value) = instruction.number() {
                letters.push_str(&number_letters(value));
            } else if let Some(label) = instruction.label() {
                let bits = labels.get(label).map_or("", String::as_str);
                letters.extend(bits.chars().map(|bit| if bit == '1' { 'T' } else { 'S' }));
                letters.push('L');
            }
            letters
        })
        .collect()
}

pub(crate) fn whitespace(program: &Program) -> String {
    letter_lines(program)
        .concat()
        .chars()
        .map(|letter| match letter {
            'S' => ' ',
            'T' => '\t',
            _ => '\n',
        })
        .collect()
}

pub(crate) fn visible(program: &Program) -> String {
    letter_lines(program).join("\n")
}

pub(crate) fn mnemonic(program: &Program) -> String {
    program
        .instructions()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn json(program: &Program) -> Result<String, CompileError> {
    serde_json::to_string_pretty(program.instructions())
        .map_err(|err| CompileError::new(format!("failed to serialize program: {err}")))
}
