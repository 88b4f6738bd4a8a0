use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use chrono::Local;

use super::Module;
use crate::error::ModuleError;

pub const TYPE: &str = "internal/date";

const DEFAULT_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Clock text, polled by its own worker thread.
///
/// Section keys: `format`, optional `format-alt` (switched with the
/// `toggle` action) and `interval` in seconds.
pub struct DateModule {
    name: String,
    format: String,
    alt_format: Option<String>,
    toggled: bool,
    interval: Duration,
    current: String,
}

fn validate_format(module: &str, format: &str) -> Result<(), ModuleError> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(ModuleError::misconfigured(
            module,
            format!("invalid date format \"{}\"", format),
        ));
    }
    Ok(())
}

impl DateModule {
    pub fn new(name: &str, format: &str) -> Result<Self, ModuleError> {
        validate_format(name, format)?;
        Ok(Self {
            name: name.to_string(),
            format: format.to_string(),
            alt_format: None,
            toggled: false,
            interval: Duration::from_secs(1),
            current: String::new(),
        })
    }

    pub fn from_section(name: &str, section: &serde_json::Value) -> Result<Self, ModuleError> {
        let format = section
            .get("format")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_FORMAT);
        let mut module = Self::new(name, format)?;

        if let Some(alt) = section.get("format-alt").and_then(|v| v.as_str()) {
            validate_format(name, alt)?;
            module.alt_format = Some(alt.to_string());
        }
        if let Some(secs) = section.get("interval") {
            let secs = secs
                .as_f64()
                .filter(|s| *s > 0.0)
                .ok_or_else(|| ModuleError::misconfigured(name, "interval must be a positive number"))?;
            module.interval = Duration::from_secs_f64(secs);
        }
        Ok(module)
    }

    fn active_format(&self) -> &str {
        match (&self.alt_format, self.toggled) {
            (Some(alt), true) => alt,
            _ => &self.format,
        }
    }

    fn render(&self) -> String {
        Local::now().format(self.active_format()).to_string()
    }
}

impl Module for DateModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_event(&mut self) -> bool {
        self.render() != self.current
    }

    fn poll_interval(&self) -> Duration {
        self.interval
    }

    fn update(&mut self, force: bool) -> Result<bool, ModuleError> {
        let next = self.render();
        if next == self.current && !force {
            return Ok(false);
        }
        self.current = next;
        Ok(true)
    }

    fn get_output(&self) -> String {
        self.current.clone()
    }

    fn input(&mut self, action: &str, _data: &str) -> bool {
        if action != "toggle" || self.alt_format.is_none() {
            return false;
        }
        self.toggled = !self.toggled;
        self.current = self.render();
        true
    }

    fn drives_own_thread(&self) -> bool {
        true
    }
}
