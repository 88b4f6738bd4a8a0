//! Error types for the event coordination core
//!
//! Errors are classified by where they are recovered:
//! - Fatal: a source could not be registered before dispatch began
//! - Local to a module: construction or update failures
//! - Dropped: malformed IPC payloads and unknown actions

use std::path::PathBuf;
use thiserror::Error;

use crate::reactor::SourceId;

/// An event source could not be attached to the reactor.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Source {0} is already registered")]
    Duplicate(SourceId),

    #[error("Failed to open source {id}: {reason}")]
    Open { id: SourceId, reason: String },
}

/// Transient failure reported by a single event source.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Source backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        SourceError::Io(err.to_string())
    }
}

/// Failure of a single module.
#[derive(Debug, Error)]
pub enum ModuleError {
    // Construction time: the module is omitted
    #[error("Unknown module type \"{kind}\" for module {module}")]
    UnknownType { module: String, kind: String },

    #[error("Module {module} is misconfigured: {reason}")]
    Misconfigured { module: String, reason: String },

    // Runtime: logged, last output retained
    #[error("Module {module} failed: {reason}")]
    Io { module: String, reason: String },
}

impl ModuleError {
    pub fn misconfigured(module: &str, reason: impl Into<String>) -> Self {
        ModuleError::Misconfigured {
            module: module.to_string(),
            reason: reason.into(),
        }
    }

    pub fn io(module: &str, reason: impl Into<String>) -> Self {
        ModuleError::Io {
            module: module.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns true if the next update cycle may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ModuleError::Io { .. })
    }
}

/// Inbound IPC payload or action string that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedInput {
    #[error("empty message")]
    Empty,

    #[error("message is not valid UTF-8")]
    InvalidUtf8,

    #[error("message contains control characters")]
    ControlCharacters,

    #[error("message exceeds {0} bytes")]
    TooLong(usize),

    #[error("unknown message type: {0}")]
    UnknownPrefix(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("invalid hook reference: {0}")]
    InvalidHook(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),
}

/// Failure reported by the rendering surface.
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("Connection to the display server lost: {0}")]
    ConnectionLost(String),

    #[error("Surface error: {0}")]
    Other(String),
}

impl SurfaceError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SurfaceError::ConnectionLost(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found at {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors that end a run of the bar.
#[derive(Debug, Error)]
pub enum BarError {
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl BarError {
    /// Get a user-facing recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            BarError::Registration(RegistrationError::Duplicate(_)) => {
                "Each event source can only be registered once."
            }
            BarError::Registration(RegistrationError::Open { .. }) => {
                "Check that the IPC socket path is writable and not in use."
            }
            BarError::Config(ConfigError::NotFound(_)) => {
                "Create a config file, see README for the format."
            }
            BarError::Config(_) => "Check the config file is valid JSON.",
            BarError::Runtime(_) => "Check the logs for details.",
        }
    }
}

impl From<std::io::Error> for BarError {
    fn from(err: std::io::Error) -> Self {
        BarError::Runtime(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_error_transience() {
        assert!(ModuleError::io("clock", "timeout").is_transient());
        assert!(!ModuleError::misconfigured("clock", "bad format").is_transient());
    }

    #[test]
    fn test_registration_error_message_names_source() {
        let err = RegistrationError::Duplicate(SourceId::Ipc);
        assert_eq!(err.to_string(), "Source ipc is already registered");
    }

    #[test]
    fn test_config_not_found_has_suggestion() {
        let err = BarError::from(ConfigError::NotFound(PathBuf::from("/nope.json")));
        assert!(err.recovery_suggestion().contains("config"));
    }
}
