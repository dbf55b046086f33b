#[cfg(feature = "napi")]
use napi_derive::napi;
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_NO_FILES_MATCHED: &str = "L-ERR-DISCOVERY-001";
pub const ERR_INVALID_PATTERN: &str = "L-ERR-DISCOVERY-002";
pub const ERR_MODULE_LOAD: &str = "L-ERR-LOAD-001";
pub const ERR_DUPLICATE_JOB: &str = "L-ERR-GRAPH-001";
pub const ERR_UNEXPORTED_JOB: &str = "L-ERR-GRAPH-002";
pub const ERR_INVALID_JOB_NAME: &str = "L-ERR-NAME-001";
pub const ERR_FREE_VARIABLE: &str = "L-ERR-SCOPE-001";
pub const ERR_SCRIPT_NOT_FUNCTION: &str = "L-ERR-SCOPE-002";
pub const ERR_SYNTAX: &str = "L-ERR-SYNTAX-001";
pub const ERR_REWRITE: &str = "L-ERR-REWRITE-001";
pub const ERR_BUNDLE: &str = "L-ERR-BUNDLE-001";

// ═══════════════════════════════════════════════════════════════════════════════
// GUARANTEES
// ═══════════════════════════════════════════════════════════════════════════════

fn get_guarantee(code: &str) -> &'static str {
    match code {
        ERR_NO_FILES_MATCHED => "Every resource family matches at least one source file.",
        ERR_INVALID_PATTERN => "Include and exclude patterns are valid glob syntax.",
        ERR_MODULE_LOAD => "Every matched file loads and evaluates cleanly.",
        ERR_DUPLICATE_JOB => "Job names are unique across the whole deployment.",
        ERR_UNEXPORTED_JOB => {
            "Every job reachable via deps is independently loadable by the bundler."
        }
        ERR_INVALID_JOB_NAME => {
            "Job names are lowercase, start with a letter, and use only letters, digits and dashes."
        }
        ERR_FREE_VARIABLE => {
            "Field scripts reference only their own parameters, locals and ambient built-ins."
        }
        ERR_SCRIPT_NOT_FUNCTION => "Field scripts are function expressions.",
        ERR_SYNTAX => "All analyzed source parses as a valid module or expression.",
        ERR_REWRITE => "Rewrite edits are structurally sound and never overlap.",
        ERR_BUNDLE => "Every runnable unit bundles and minifies to a complete artifact.",
        _ => "Unknown invariant.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILD ERROR
// ═══════════════════════════════════════════════════════════════════════════════

/// Coded, serializable build failure. Serialized across the bridge to the
/// deploy CLI, which renders `code`, `message` and `guarantee` to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "napi", napi(object))]
pub struct BuildError {
    pub code: String,
    pub message: String,
    pub guarantee: String,
    pub file: Option<String>,
}

impl BuildError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        BuildError {
            code: code.to_string(),
            message: message.into(),
            guarantee: get_guarantee(code).to_string(),
            file: None,
        }
    }

    pub fn in_file(code: &str, message: impl Into<String>, file: impl Into<String>) -> Self {
        BuildError {
            file: Some(file.into()),
            ..Self::new(code, message)
        }
    }
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.file {
            Some(file) => write!(f, "[{}] {} ({})", self.code, self.message, file),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

impl std::error::Error for BuildError {}

pub type BuildResult<T> = Result<T, BuildError>;
