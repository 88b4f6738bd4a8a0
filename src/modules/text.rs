use super::Module;
use crate::error::ModuleError;

pub const TYPE: &str = "custom/text";

/// Static text set in the configuration.
pub struct TextModule {
    name: String,
    content: String,
    dirty: bool,
}

impl TextModule {
    pub fn new(name: &str, content: &str) -> Self {
        Self {
            name: name.to_string(),
            content: content.to_string(),
            dirty: true,
        }
    }

    pub fn from_section(name: &str, section: &serde_json::Value) -> Result<Self, ModuleError> {
        let content = section
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ModuleError::misconfigured(name, "missing \"content\""))?;
        Ok(Self::new(name, content))
    }
}

impl Module for TextModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, force: bool) -> Result<bool, ModuleError> {
        Ok(std::mem::take(&mut self.dirty) || force)
    }

    fn get_output(&self) -> String {
        self.content.clone()
    }
}
