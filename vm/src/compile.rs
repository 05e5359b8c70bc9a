use nospace_protocol::CompileTarget;
use nospace_protocol::LanguageSubset;

use crate::CompileError;
use crate::Dialect;
use crate::Program;
use crate::assemble;
use crate::emit;
use crate::parse_whitespace;

/// Turns source in the given language subset into a linked program.
pub fn load_program(source: &str, language: LanguageSubset) -> Result<Program, CompileError> {
    if language.is_bytecode() {
        return parse_whitespace(source);
    }
    let dialect = match language {
        LanguageSubset::Min => Dialect::Minimal,
        _ => Dialect::Standard,
    };
    assemble(source, dialect)
}

/// Compiles `source` and renders it in `target` form.
pub fn compile(
    source: &str,
    language: LanguageSubset,
    target: CompileTarget,
) -> Result<String, CompileError> {
    let program = load_program(source, language)?;
    match target {
        CompileTarget::Ws => Ok(emit::whitespace(&program)),
        CompileTarget::Mnemonic => Ok(emit::mnemonic(&program)),
        CompileTarget::ExWs => Ok(emit::visible(&program)),
        CompileTarget::Json => emit::json(&program),
    }
}
