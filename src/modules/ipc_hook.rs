//! Module whose text is set by shell hooks run on request.
//!
//! `hook:<module>.<index>` messages (or the action `#<module>.hook.<index>`)
//! run the indexed command through `sh -c` and show the first line it
//! prints.

use std::process::Command;

use super::Module;
use crate::error::ModuleError;

pub const TYPE: &str = "custom/ipc";

pub struct IpcHookModule {
    name: String,
    hooks: Vec<String>,
    /// Hook to run on setup, 1-based; 0 runs none
    initial: usize,
    output: String,
    dirty: bool,
}

impl IpcHookModule {
    pub fn new(name: &str, hooks: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            hooks,
            initial: 0,
            output: String::new(),
            dirty: false,
        }
    }

    pub fn from_section(name: &str, section: &serde_json::Value) -> Result<Self, ModuleError> {
        let hooks = section
            .get("hook")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ModuleError::misconfigured(name, "missing \"hook\" list"))?
            .iter()
            .map(|h| {
                h.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ModuleError::misconfigured(name, "hooks must be strings"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut module = Self::new(name, hooks);
        if let Some(initial) = section.get("initial") {
            let initial = initial
                .as_u64()
                .map(|i| i as usize)
                .filter(|i| *i <= module.hooks.len())
                .ok_or_else(|| ModuleError::misconfigured(name, "initial is not a hook number"))?;
            module.initial = initial;
        }
        Ok(module)
    }

    fn run_hook(&mut self, index: usize) -> Result<(), ModuleError> {
        let command = self
            .hooks
            .get(index)
            .ok_or_else(|| ModuleError::misconfigured(&self.name, format!("no hook {}", index)))?;

        let out = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|e| ModuleError::io(&self.name, e.to_string()))?;
        if !out.status.success() {
            log::warn!("IpcHook: {} hook {} exited with {}", self.name, index, out.status);
        }

        let stdout = String::from_utf8_lossy(&out.stdout);
        self.output = stdout.lines().next().unwrap_or("").to_string();
        self.dirty = true;
        Ok(())
    }
}

impl Module for IpcHookModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self) -> Result<(), ModuleError> {
        if self.initial > 0 {
            self.run_hook(self.initial - 1)?;
        }
        Ok(())
    }

    fn update(&mut self, force: bool) -> Result<bool, ModuleError> {
        Ok(std::mem::take(&mut self.dirty) || force)
    }

    fn get_output(&self) -> String {
        self.output.clone()
    }

    fn input(&mut self, action: &str, data: &str) -> bool {
        if action != "hook" {
            return false;
        }
        let Ok(index) = data.parse::<usize>() else {
            log::warn!("IpcHook: {} got invalid hook index \"{}\"", self.name, data);
            return false;
        };
        if index >= self.hooks.len() {
            log::warn!("IpcHook: {} has no hook {}", self.name, index);
            return false;
        }
        if let Err(e) = self.run_hook(index) {
            log::warn!("IpcHook: {} hook {} failed ({})", self.name, index, e);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hook_sets_first_line() {
        let mut module = IpcHookModule::from_section(
            "demo",
            &json!({ "hook": ["echo hello", "printf 'first\\nsecond\\n'"] }),
        )
        .unwrap();
        module.setup().unwrap();
        assert!(!module.update(false).unwrap());

        assert!(module.input("hook", "1"));
        assert!(module.update(false).unwrap());
        assert_eq!(module.get_output(), "first");
    }

    #[test]
    fn test_initial_hook_runs_on_setup() {
        let mut module = IpcHookModule::from_section(
            "demo",
            &json!({ "hook": ["echo ready"], "initial": 1 }),
        )
        .unwrap();
        module.setup().unwrap();
        assert!(module.update(false).unwrap());
        assert_eq!(module.get_output(), "ready");
    }

    #[test]
    fn test_bad_hook_references_are_not_handled() {
        let mut module = IpcHookModule::new("demo", vec!["echo a".into()]);
        assert!(!module.input("hook", "7"));
        assert!(!module.input("hook", "x"));
        assert!(!module.input("inc", ""));
        assert!(IpcHookModule::from_section("demo", &json!({ "hook": ["a"], "initial": 2 })).is_err());
    }
}
