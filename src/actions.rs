//! Action strings routed to modules.
//!
//! Clicks and `action:` IPC messages carry an action string. The structured
//! form names its target module:
//!
//! ```text
//! #<module>.<action>[.<data>]
//! ```
//!
//! Anything else is a legacy action: a bare command that is offered to every
//! module until one accepts it.

use std::fmt;
use std::str::FromStr;

use crate::error::MalformedInput;

/// A parsed action string.
///
/// `to_string()` parses back to the same value only for values that
/// [`FromStr`] could have produced: module and action names without `.`,
/// and legacy commands that are trimmed, non-empty and do not start with
/// `#`. Build legacy actions with [`Action::legacy`] to have that checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Structured {
        module: String,
        action: String,
        data: String,
    },
    Legacy(String),
}

impl Action {
    pub fn structured(
        module: impl Into<String>,
        action: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Action::Structured {
            module: module.into(),
            action: action.into(),
            data: data.into(),
        }
    }

    /// A legacy command, rejected if it would read back as something else.
    pub fn legacy(cmd: impl Into<String>) -> Result<Self, MalformedInput> {
        let cmd = cmd.into();
        if cmd.trim().is_empty() {
            return Err(MalformedInput::Empty);
        }
        if cmd.starts_with('#') || cmd.trim() != cmd {
            return Err(MalformedInput::InvalidAction(cmd));
        }
        Ok(Action::Legacy(cmd))
    }
}

impl FromStr for Action {
    type Err = MalformedInput;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.is_empty() {
            return Err(MalformedInput::Empty);
        }
        let Some(rest) = input.strip_prefix('#') else {
            return Action::legacy(input);
        };

        let invalid = || MalformedInput::InvalidAction(input.to_string());
        // Data may itself contain dots, so only the first two separators count
        let mut parts = rest.splitn(3, '.');
        let module = parts.next().filter(|m| !m.is_empty()).ok_or_else(invalid)?;
        let action = parts.next().filter(|a| !a.is_empty()).ok_or_else(invalid)?;
        let data = parts.next().unwrap_or("");

        Ok(Action::structured(module, action, data))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Structured { module, action, data } if data.is_empty() => {
                write!(f, "#{}.{}", module, action)
            }
            Action::Structured { module, action, data } => {
                write!(f, "#{}.{}.{}", module, action, data)
            }
            Action::Legacy(cmd) => f.write_str(cmd),
        }
    }
}
