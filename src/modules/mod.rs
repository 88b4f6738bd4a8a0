//! Bar modules and the adapter the controller drives them through.
//!
//! A module produces one piece of bar text. The controller only ever talks
//! to a module through [`Module`]; failures stay local to that module.
//!
//! Two flavours exist:
//! - event-driven modules are updated by the controller during an update
//!   pass
//! - threaded modules ([`Module::drives_own_thread`]) are polled by a
//!   dedicated worker thread which reports changes through the controller's
//!   hand-off queue

pub mod date;
pub mod ipc_hook;
pub mod text;
pub mod volume;
mod worker;

use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{Alignment, BarConfig};
use crate::controller::ControllerHandle;
use crate::error::ModuleError;

pub use date::DateModule;
pub use ipc_hook::IpcHookModule;
pub use text::TextModule;
pub use volume::{Mixer, SoftMixer, VolumeModule};

/// Interval between polls of a threaded module unless it asks otherwise
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub trait Module: Send {
    fn name(&self) -> &str;

    /// Acquire resources. Failing here omits the module from the bar.
    fn setup(&mut self) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Cheap check for new data; called under the module lock, so it must
    /// return quickly.
    fn has_event(&mut self) -> bool {
        false
    }

    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    /// Refresh internal state. Returns whether the output changed.
    fn update(&mut self, force: bool) -> Result<bool, ModuleError>;

    fn get_output(&self) -> String;

    /// Handle an action. Returns false if the action is not for this module.
    fn input(&mut self, _action: &str, _data: &str) -> bool {
        false
    }

    fn teardown(&mut self) {}

    fn drives_own_thread(&self) -> bool {
        false
    }
}

/// Builds modules from their configuration sections.
pub trait ModuleFactory {
    fn create(
        &self,
        name: &str,
        section: &serde_json::Value,
    ) -> Result<Box<dyn Module>, ModuleError>;
}

/// Factory for the modules shipped with the crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinModules;

impl ModuleFactory for BuiltinModules {
    fn create(
        &self,
        name: &str,
        section: &serde_json::Value,
    ) -> Result<Box<dyn Module>, ModuleError> {
        let kind = section
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| ModuleError::misconfigured(name, "missing \"type\""))?;

        match kind {
            date::TYPE => Ok(Box::new(DateModule::from_section(name, section)?)),
            text::TYPE => Ok(Box::new(TextModule::from_section(name, section)?)),
            ipc_hook::TYPE => Ok(Box::new(IpcHookModule::from_section(name, section)?)),
            volume::TYPE => Ok(Box::new(VolumeModule::from_section(name, section)?)),
            other => Err(ModuleError::UnknownType {
                module: name.to_string(),
                kind: other.to_string(),
            }),
        }
    }
}

/// Build and set up every module placed in `config`.
///
/// Modules that cannot be built or set up are logged and left out.
pub fn build_modules(config: &BarConfig, factory: &dyn ModuleFactory) -> Vec<ModuleHandle> {
    let mut seen = HashSet::new();
    let mut modules = Vec::new();

    for (alignment, name) in config.placements() {
        if !seen.insert(name) {
            log::warn!("Modules: {} is placed more than once, keeping the first", name);
            continue;
        }
        let Some(section) = config.modules.get(name) else {
            log::error!("Modules: no configuration section for {}", name);
            continue;
        };

        let module = match factory.create(name, section) {
            Ok(module) => module,
            Err(e) => {
                log::error!("Modules: disabling {} ({})", name, e);
                continue;
            }
        };
        let mut handle = ModuleHandle::new(name, alignment, module);
        if let Err(e) = handle.setup() {
            log::error!("Modules: disabling {} ({})", name, e);
            continue;
        }
        modules.push(handle);
    }

    log::info!("Modules: loaded {} module(s)", modules.len());
    modules
}

pub(crate) type SharedModule = Arc<Mutex<Box<dyn Module>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Created,
    Running,
    /// Halted on its own; still needs teardown
    Stopped,
    TornDown,
}

/// Controller-side view of one module.
///
/// Lives on the reactor thread. Keeps the last good output so failed
/// updates leave the bar unchanged.
pub struct ModuleHandle {
    name: String,
    alignment: Alignment,
    module: SharedModule,
    output: String,
    threaded: bool,
    state: ModuleState,
    // Threaded module reported new output since the last pass
    pending: bool,
}

impl ModuleHandle {
    pub fn new(name: &str, alignment: Alignment, module: Box<dyn Module>) -> Self {
        let threaded = module.drives_own_thread();
        Self {
            name: name.to_string(),
            alignment,
            module: Arc::new(Mutex::new(module)),
            output: String::new(),
            threaded,
            state: ModuleState::Created,
            pending: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    /// Last output taken from the module
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ModuleState::Running
    }

    pub fn is_threaded(&self) -> bool {
        self.threaded
    }

    pub fn setup(&mut self) -> Result<(), ModuleError> {
        self.module.lock().setup()?;
        self.state = ModuleState::Running;
        Ok(())
    }

    /// Bring the cached output up to date. Returns whether it changed.
    pub fn refresh(&mut self, force: bool) -> bool {
        if !self.is_running() {
            return false;
        }

        let fetch = if self.threaded {
            std::mem::take(&mut self.pending) || force
        } else {
            match self.module.lock().update(force) {
                Ok(changed) => changed || force,
                Err(e) => {
                    log::warn!("Modules: {} update failed, keeping last output ({})", self.name, e);
                    false
                }
            }
        };
        if !fetch {
            return false;
        }

        let output = self.module.lock().get_output();
        if output == self.output {
            return false;
        }
        self.output = output;
        true
    }

    pub fn input(&mut self, action: &str, data: &str) -> bool {
        let accepted = self.module.lock().input(action, data);
        if accepted {
            self.pending = true;
        }
        accepted
    }

    pub(crate) fn mark_changed(&mut self) {
        self.pending = true;
    }

    pub(crate) fn mark_stopped(&mut self) {
        if self.is_running() {
            log::info!("Modules: {} stopped", self.name);
            self.state = ModuleState::Stopped;
        }
    }

    /// Start the worker thread for a threaded module.
    pub(crate) fn spawn_worker(
        &self,
        index: usize,
        controller: ControllerHandle,
    ) -> Option<io::Result<JoinHandle<()>>> {
        if !self.threaded || !self.is_running() {
            return None;
        }
        Some(worker::spawn(
            index,
            &self.name,
            Arc::clone(&self.module),
            controller,
        ))
    }

    /// Release the module. Only the first call after a successful setup
    /// reaches the module.
    pub fn teardown(&mut self) {
        if matches!(self.state, ModuleState::Running | ModuleState::Stopped) {
            self.module.lock().teardown();
            log::debug!("Modules: {} torn down", self.name);
        }
        self.state = ModuleState::TornDown;
    }
}
