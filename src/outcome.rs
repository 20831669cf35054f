//! FHIR `OperationOutcome` bodies returned by the notification endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Shown when an outcome cannot be turned into messages.
pub const FALLBACK_MESSAGE: &str = "The error message could not be created.";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    #[serde(default = "default_resource_type")]
    pub resource_type: String,
    #[serde(default)]
    pub issue: Vec<Issue>,
}

fn default_resource_type() -> String {
    "OperationOutcome".into()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub diagnostics: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub location: Vec<String>,
}

/// Parsed outcome plus the untouched JSON, which is what ends up on the clipboard.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedOutcome {
    pub outcome: OperationOutcome,
    pub raw: Value,
}

/// Parse a stringified outcome, e.g. the `detail` of a 422 problem response.
pub fn parse(detail: &str) -> Result<ParsedOutcome, serde_json::Error> {
    let raw: Value = serde_json::from_str(detail)?;
    let outcome = serde_json::from_value(raw.clone())?;
    Ok(ParsedOutcome { outcome, raw })
}

/// Diagnostics of all issues with severity `error`.
pub fn error_diagnostics(outcome: &OperationOutcome) -> Vec<String> {
    outcome
        .issue
        .iter()
        .filter(|i| i.severity == "error")
        .map(|i| i.diagnostics.clone().unwrap_or_default())
        .collect()
}
