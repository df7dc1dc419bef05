//! Post-run result records handed to the rendering side.

use serde::Serialize;
use uuid::Uuid;

use crate::error::ModuleFault;
use crate::module::{DisplayMode, RunContext};

/// Text shown in place of a disabled module's output.
pub const ERROR_PLACEHOLDER: &str = "This module encountered an error and could not be displayed.";

/// One module's slot in the result list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleResult {
    pub handle: String,
    pub name: String,
    pub mode: DisplayMode,
    pub markup: Markup,
}

/// Opaque payload from `output()`, or the fixed error placeholder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Markup {
    Content { content: serde_json::Value },
    Error { message: String, cause: String },
}

impl Markup {
    pub fn content(value: serde_json::Value) -> Self {
        Markup::Content { content: value }
    }

    pub fn error(fault: &ModuleFault) -> Self {
        Markup::Error {
            message: ERROR_PLACEHOLDER.to_owned(),
            cause: format!("{fault:#}"),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Markup::Error { .. })
    }
}

/// A disabled module and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleErrorSummary {
    pub handle: String,
    pub message: String,
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub run_id: Uuid,
    pub context: RunContext,
    pub results: Vec<ModuleResult>,
    pub errors: Vec<ModuleErrorSummary>,
}

impl Report {
    pub fn result(&self, handle: &str) -> Option<&ModuleResult> {
        self.results.iter().find(|r| r.handle == handle)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
