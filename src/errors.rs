//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Application error enumeration covering all domain failure modes.
///
/// `Clone` is required because a single spawn outcome fans out to every
/// caller waiting on the same shared spawn future.
#[derive(Debug, Clone)]
pub enum BridgeError {
    /// Child process could not be started, or its pipe broke mid-request.
    Connection {
        /// What failed.
        message: String,
        /// Underlying error text, when one exists.
        cause: Option<String>,
    },
    /// A request did not receive its response within the allotted time.
    Timeout {
        /// JSON-RPC method that timed out.
        method: String,
        /// Timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },
    /// The child answered with a JSON-RPC error object.
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
        /// Optional structured error payload.
        data: Option<serde_json::Value>,
    },
    /// No RepoQL executable could be located.
    ExecutableNotFound {
        /// Every path that was checked, in order.
        searched: Vec<String>,
    },
    /// Configuration parsing or validation failure.
    Config(String),
    /// Wire framing or JSON-RPC protocol violation.
    Protocol(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl BridgeError {
    /// Builds a connection error with no underlying cause.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            cause: None,
        }
    }

    /// Builds a connection error wrapping an underlying error.
    pub fn connection_with(message: impl Into<String>, cause: &(impl Display + ?Sized)) -> Self {
        Self::Connection {
            message: message.into(),
            cause: Some(cause.to_string()),
        }
    }

    /// Flattens the error into the text shown to tool callers.
    ///
    /// Unlike `Display`, this keeps the distinguishing fields inline so
    /// callers still see the RPC code and payload after the error has been
    /// reduced to a string.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Connection {
                message,
                cause: Some(cause),
            } => format!("{message}: {cause}"),
            Self::Connection { message, .. } => message.clone(),
            Self::Timeout { method, timeout_ms } => {
                format!("request '{method}' timed out after {timeout_ms}ms")
            }
            Self::Rpc {
                code,
                message,
                data: Some(data),
            } => format!("{message} (code {code}, {data})"),
            Self::Rpc { code, message, .. } => format!("{message} (code {code})"),
            Self::ExecutableNotFound { searched } => format!(
                "RepoQL executable not found. Searched: {}. Install RepoQL or set exe_path in the config.",
                searched.join(", ")
            ),
            Self::Config(msg) | Self::Protocol(msg) | Self::Io(msg) => msg.clone(),
        }
    }
}

impl Display for BridgeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection {
                message,
                cause: Some(cause),
            } => write!(f, "connection: {message}: {cause}"),
            Self::Connection { message, .. } => write!(f, "connection: {message}"),
            Self::Timeout { method, timeout_ms } => {
                write!(f, "timeout: request '{method}' timed out after {timeout_ms}ms")
            }
            Self::Rpc { code, message, .. } => write!(f, "rpc error {code}: {message}"),
            Self::ExecutableNotFound { searched } => {
                write!(f, "RepoQL executable not found. Searched: {}", searched.join(", "))
            }
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<toml::de::Error> for BridgeError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
