use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

/// Language subset accepted by the interpreter's `--std` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LanguageSubset {
    #[default]
    Standard,
    Min,
    /// Raw whitespace bytecode, loaded without compilation.
    Ws,
}

impl LanguageSubset {
    pub fn is_bytecode(self) -> bool {
        matches!(self, LanguageSubset::Ws)
    }
}

impl FromStr for LanguageSubset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Self::Standard),
            "min" => Ok(Self::Min),
            "ws" => Ok(Self::Ws),
            other => Err(format!("unknown language subset `{other}` (expected standard, min or ws)")),
        }
    }
}

/// How stdin is fed to a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InputMode {
    /// The whole payload is supplied up front and the stream is closed.
    Batch,
    /// Lines arrive over the connection while the program runs.
    #[default]
    Interactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunOptions {
    pub language: LanguageSubset,
    pub debug: bool,
    pub ignore_debug: bool,
    pub input_mode: InputMode,
}

/// Output format produced by `compile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum CompileTarget {
    #[default]
    Ws,
    Mnemonic,
    /// Whitespace spelled with visible `S`, `T` and `L`.
    ExWs,
    Json,
}

impl FromStr for CompileTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ws" => Ok(Self::Ws),
            "mnemonic" => Ok(Self::Mnemonic),
            "ex-ws" => Ok(Self::ExWs),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "unknown compile target `{other}` (expected ws, mnemonic, ex-ws or json)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompileOptions {
    pub language: LanguageSubset,
    pub target: CompileTarget,
}
