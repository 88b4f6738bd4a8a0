//! Event coordination core for a desktop status bar.
//!
//! One reactor thread multiplexes the bar's event sources (OS signals, the
//! IPC socket, the configuration watch, the display connection), turns raw
//! events into [`signals::Signal`]s on a priority bus, debounces module
//! change notifications and writes the assembled bar text out.

pub mod actions;
pub mod config;
pub mod controller;
pub mod error;
pub mod ipc;
pub mod modules;
pub mod reactor;
pub mod signals;
pub mod surface;
pub mod watcher;

use std::path::PathBuf;

use config::BarConfig;
use controller::{Controller, RunOutcome};
use error::BarError;
use ipc::{default_socket_path, IpcSource};
use modules::{build_modules, ModuleFactory};
use reactor::SignalSource;
use watcher::ConfigWatchSource;

/// Command-line controls for [`run`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config_path: PathBuf,
    /// Print each update instead of drawing a window
    pub writeback: bool,
    pub snapshot_dst: Option<PathBuf>,
}

/// Run the bar until it quits, rebuilding it from fresh configuration on
/// every reload.
pub fn run(options: &RunOptions, factory: &dyn ModuleFactory) -> Result<(), BarError> {
    loop {
        let config = BarConfig::load(&options.config_path)?;
        let modules = build_modules(&config, factory);

        let mut controller = Controller::new(&config, modules, None)?;
        controller.add_source(Box::new(SignalSource::new()));
        if config.enable_ipc {
            let path = config.ipc_socket.clone().unwrap_or_else(default_socket_path);
            controller.add_source(Box::new(IpcSource::new(path)));
        }
        controller.add_source(Box::new(ConfigWatchSource::new(&options.config_path)));

        match controller.run(options.writeback, options.snapshot_dst.clone())? {
            RunOutcome::Quit => return Ok(()),
            RunOutcome::Reload => {
                log::info!(
                    "Bar: reloading configuration from {}",
                    options.config_path.display()
                );
            }
        }
    }
}
