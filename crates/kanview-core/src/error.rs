use std::fmt;
use std::time::Duration;

/// Machine-readable error codes for clients deciding how to react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigurationInvalid,
    ConfigParseError,
    UnknownBoard,
    StaleView,
    ViewMismatch,
    SourceUnavailable,
    RebuildTimeout,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigurationInvalid => "E1001",
            Self::ConfigParseError => "E1002",
            Self::UnknownBoard => "E2001",
            Self::StaleView => "E2002",
            Self::ViewMismatch => "E2003",
            Self::SourceUnavailable => "E3001",
            Self::RebuildTimeout => "E3002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigurationInvalid => "Board configuration invalid",
            Self::ConfigParseError => "Board configuration parse error",
            Self::UnknownBoard => "Unknown board",
            Self::StaleView => "View is stale",
            Self::ViewMismatch => "Change set does not apply to this view",
            Self::SourceUnavailable => "Issue source unavailable",
            Self::RebuildTimeout => "Timed out waiting for board rebuild",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and clients.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigurationInvalid => {
                Some("Fix the column and project mappings in the board configuration.")
            }
            Self::ConfigParseError => Some("Fix syntax in the board TOML file and retry."),
            Self::UnknownBoard => Some("Check the board code against the configured boards."),
            Self::StaleView => Some("Fetch the full board and resume polling from its version."),
            Self::ViewMismatch => Some("Fetch the full board; the cached view is out of sequence."),
            Self::SourceUnavailable => {
                Some("Retry later; the last good board is still being served.")
            }
            Self::RebuildTimeout => Some("Retry; the rebuild keeps running in the background."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Failures surfaced by the board engine.
///
/// `Clone` so that a single failed rebuild can be handed to every caller
/// that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    /// The board configuration is malformed or incomplete.
    #[error("board '{board}' configuration is invalid: {reason}")]
    Configuration { board: String, reason: String },

    /// A board definition could not be parsed at all.
    #[error("board definition parse error: {0}")]
    ConfigParse(String),

    /// The issue source could not produce an issue list.
    #[error("issue source unavailable for board '{board}': {reason}")]
    SourceUnavailable { board: String, reason: String },

    /// The requested version is no longer (or not yet) covered by the change log.
    #[error("view {requested} of board '{board}' is stale (retained: {oldest}..={current})")]
    StaleView {
        board: String,
        requested: u64,
        oldest: u64,
        current: u64,
    },

    /// No configuration exists for the board code.
    #[error("unknown board '{0}'")]
    UnknownBoard(String),

    /// A change record was applied to a view at a different version.
    #[error("change set from view {expected} cannot be applied to view {actual}")]
    ViewMismatch { expected: u64, actual: u64 },

    /// The caller stopped waiting for an in-flight rebuild.
    #[error("gave up on rebuild of board '{board}' after {waited:?}")]
    RebuildTimeout { board: String, waited: Duration },

    /// A rebuild ended without producing a result (it panicked).
    #[error("rebuild of board '{0}' ended unexpectedly")]
    Internal(String),
}

impl BoardError {
    pub(crate) fn configuration(board: &str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            board: board.to_string(),
            reason: reason.into(),
        }
    }

    /// Build a `SourceUnavailable` error; intended for issue source adapters.
    pub fn source_unavailable(board: &str, reason: impl fmt::Display) -> Self {
        Self::SourceUnavailable {
            board: board.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Configuration { .. } => ErrorCode::ConfigurationInvalid,
            Self::ConfigParse(_) => ErrorCode::ConfigParseError,
            Self::SourceUnavailable { .. } => ErrorCode::SourceUnavailable,
            Self::StaleView { .. } => ErrorCode::StaleView,
            Self::UnknownBoard(_) => ErrorCode::UnknownBoard,
            Self::ViewMismatch { .. } => ErrorCode::ViewMismatch,
            Self::RebuildTimeout { .. } => ErrorCode::RebuildTimeout,
            Self::Internal(_) => ErrorCode::InternalUnexpected,
        }
    }

    /// Optional remediation hint for operators and clients.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }

    /// Whether the client should drop its cached view and fetch the full board.
    #[must_use]
    pub const fn requires_full_fetch(&self) -> bool {
        matches!(self, Self::StaleView { .. } | Self::ViewMismatch { .. })
    }

    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. } | Self::RebuildTimeout { .. } | Self::Internal(_)
        )
    }
}

pub type Result<T, E = BoardError> = std::result::Result<T, E>;
