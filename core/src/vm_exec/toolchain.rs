use nospace_protocol::CompileOptions;
use nospace_protocol::LanguageSubset;
use nospace_vm::Machine;

use super::Raised;

/// Builds machines and compiled text from source. The VM backend calls it
/// inside `catch_unwind`, so implementations may panic as well as return
/// errors.
pub trait Toolchain: Send + Sync {
    fn load(&self, code: &str, language: LanguageSubset, stdin: &str) -> Result<Machine, Raised>;

    fn compile(&self, code: &str, options: &CompileOptions) -> Result<String, Raised>;
}

/// The `nospace-vm` assembler, parser and emitters.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeToolchain;

impl Toolchain for NativeToolchain {
    fn load(&self, code: &str, language: LanguageSubset, stdin: &str) -> Result<Machine, Raised> {
        let program = nospace_vm::load_program(code, language)?;
        Ok(Machine::new(program, stdin))
    }

    fn compile(&self, code: &str, options: &CompileOptions) -> Result<String, Raised> {
        Ok(nospace_vm::compile(code, options.language, options.target)?)
    }
}
