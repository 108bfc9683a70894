use serde::{Deserialize, Serialize};

/// Error kinds from spec §7, grouped by semantic class. Every surfaced
/// error in the system collapses into one of these before it crosses a
/// tool boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    NotFound,
    Conflict,
    AlreadyDiscarded,
    AlreadyExecuted,
    InternalError,
    ButlerUnreachable,
    OverloadRejected,
    TargetUnavailable,
    CasConflict,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::AlreadyDiscarded => "already_discarded",
            ErrorKind::AlreadyExecuted => "already_executed",
            ErrorKind::InternalError => "internal_error",
            ErrorKind::ButlerUnreachable => "butler_unreachable",
            ErrorKind::OverloadRejected => "overload_rejected",
            ErrorKind::TargetUnavailable => "target_unavailable",
            ErrorKind::CasConflict => "cas_conflict",
        }
    }
}

/// The `{"error": {...}}` shape every tool response uses instead of an
/// exception crossing the RPC boundary (spec §4.B, §9 "Exceptions for
/// control flow").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    pub class: String,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            class: kind.as_str().to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

impl std::error::Error for ToolError {}
