use serde::Deserialize;
use serde::Serialize;

/// One compiler or interpreter diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl ErrorEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
            column: Some(column),
        }
    }
}

impl std::fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)?;
        // A column is only meaningful together with its line.
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
            if let Some(column) = self.column {
                write!(f, ":{column}")?;
            }
        }
        Ok(())
    }
}

/// Renders diagnostics as `message[:line[:column]]`, one per line.
pub fn format_error_entries(entries: &[ErrorEntry]) -> String {
    entries
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Deserialize)]
struct FailureReport {
    success: bool,
    errors: Vec<ErrorEntry>,
}

/// Interprets interpreter stderr of the form
/// `{"success":false,"errors":[...]}` and renders its diagnostics. Returns
/// `None` for anything else so callers can show the raw text.
pub fn try_format_error_json(text: &str) -> Option<String> {
    let report: FailureReport = serde_json::from_str(text.trim()).ok()?;
    if report.success {
        return None;
    }
    Some(format_error_entries(&report.errors))
}
